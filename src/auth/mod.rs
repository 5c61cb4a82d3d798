//! Picks the authentication path for a request and asks the access engine.
//!
//! Git transport over HTTP tries, in order: the shared API secret, a
//! deployment key carried in either Basic field, then a username/password
//! sign-in. SSH connections arrive already resolved to candidate users.

use crate::access::template_id;
use crate::model::repository::RepositoryId;
use crate::serve::AppCore;
use crate::service::GitService;
use crate::token::MIN_HEX_LEN;
use tracing::{debug, info, warn};

#[derive(Clone, Debug, Default)]
pub struct Credentials {
    /// Value of the `X-API-Secret` header.
    pub api_secret: Option<String>,
    /// Basic auth `(username, password)`.
    pub basic: Option<(String, String)>,
}

impl Credentials {
    fn deployment_key(&self) -> Option<&str> {
        let (username, password) = self.basic.as_ref()?;
        if username.len() >= MIN_HEX_LEN {
            Some(username)
        } else if password.len() >= MIN_HEX_LEN {
            Some(password)
        } else {
            None
        }
    }
}

/// True when no secret is configured, or the header or either Basic field carries it.
pub fn check_api_secret(secret: Option<&str>, credentials: &Credentials) -> bool {
    let Some(secret) = secret else {
        return true;
    };
    if credentials.api_secret.as_deref() == Some(secret) {
        return true;
    }
    match &credentials.basic {
        Some((username, password)) => username == secret || password == secret,
        None => false,
    }
}

/// Authorizes a Smart HTTP request for `service` on `repo`.
/// `url_org` is the organization exactly as it appeared in the URL.
pub async fn authorize_git(
    core: &AppCore,
    credentials: &Credentials,
    url_org: &str,
    repo: &RepositoryId,
    service: &str,
) -> bool {
    if check_api_secret(core.api_secret.as_deref(), credentials) {
        return true;
    }
    let Some((username, password)) = credentials.basic.as_ref() else {
        return false;
    };
    let repo_id = repo.to_string();

    if let Some(token) = credentials.deployment_key() {
        let key = match core.keys.decode(token) {
            Ok(key) => key,
            Err(e) => {
                let prefix: String = token.chars().take(8).collect();
                info!("No {} access to `{}` for token `{}...`: {}", service, repo_id, prefix, e);
                return false;
            }
        };
        let decision = match core.access.access(&repo_id, service, std::slice::from_ref(&key.user_id)).await {
            Ok(decision) => decision,
            Err(e) => {
                info!("No {} access to `{}` for token user `{}`: {}", service, repo_id, key.user_id, e);
                return false;
            }
        };
        if let Some(e) = &decision.error {
            warn!("Checking `{}` access for token user `{}`: {}", repo_id, key.user_id, e);
        }
        if !decision.granted {
            return false;
        }
        return match key.template_id() {
            None => true,
            Some(subject) => {
                let allowed = template_id(&repo_id).is_ok_and(|id| id == subject);
                if !allowed {
                    info!("Token of `{}` is restricted to template `{}`, not `{}`", key.user_id, subject, repo_id);
                }
                allowed
            }
        };
    }

    match core
        .access
        .access_with_login(url_org, &repo_id, service, username, password)
        .await
    {
        Ok(decision) => {
            if let Some(e) = &decision.error {
                info!("No {} access to `{}` for user `{}`: {}", service, repo_id, username, e);
            }
            decision.granted
        }
        Err(e) => {
            info!("No {} access to `{}` for user `{}`: {}", service, repo_id, username, e);
            false
        }
    }
}

/// Authorizes an SSH exec for the users the connection's key resolved to.
pub async fn authorize_exec(core: &AppCore, users: &[String], repo: &RepositoryId, service: GitService) -> bool {
    let repo_id = repo.to_string();
    match core.access.access(&repo_id, service.as_str(), users).await {
        Ok(decision) => {
            if let Some(e) = &decision.error {
                warn!("Checking `{}` repo permissions for {:?}: {}", repo_id, users, e);
            }
            if decision.granted {
                debug!("{:?} have access to `{}`", users, repo_id);
            } else {
                info!("{:?} have no access to `{}`", users, repo_id);
            }
            decision.granted
        }
        Err(e) => {
            warn!("Checking `{}` repo permissions for {:?}: {}", repo_id, users, e);
            false
        }
    }
}
