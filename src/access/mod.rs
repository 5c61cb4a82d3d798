use crate::error::GitsError;
use crate::extapi::Directory;
use crate::service::GitService;
use std::sync::Arc;
use tracing::debug;

/// Outcome of an access check. `error` is advisory: a granted decision may
/// still carry the first team lookup failure, and a denied one says why.
#[derive(Clone, Debug)]
pub struct AccessDecision {
    pub granted: bool,
    pub error: Option<GitsError>,
}

impl AccessDecision {
    fn grant(error: Option<GitsError>) -> Self {
        Self { granted: true, error }
    }

    fn deny(error: Option<GitsError>) -> Self {
        Self { granted: false, error }
    }
}

struct UserAccess {
    user_id: String,
    can_write: bool,
}

/// Organization id of `org/name`: the text before the first `/`.
pub fn org_id(repo: &str) -> Result<&str, GitsError> {
    match repo.find('/') {
        Some(slash) if slash >= 1 && slash < repo.len() - 1 => Ok(&repo[..slash]),
        _ => Err(GitsError::BadRepoName(format!(
            "unable to determine organization id from repo name `{}`",
            repo
        ))),
    }
}

/// Template id of `org/name-<templateId>`: the text after the last `-`.
pub fn template_id(repo: &str) -> Result<&str, GitsError> {
    match repo.rfind('-') {
        Some(dash) if dash > 1 && dash < repo.len() - 1 => Ok(&repo[dash + 1..]),
        _ => Err(GitsError::BadRepoName(format!(
            "unable to determine template id from repo name `{}`",
            repo
        ))),
    }
}

fn write_requested(verb: &str) -> bool {
    GitService::from_string(verb).is_some_and(|s| s.is_write())
}

#[derive(Clone)]
pub struct AccessEngine {
    directory: Arc<dyn Directory>,
}

impl AccessEngine {
    pub fn new(directory: Arc<dyn Directory>) -> Self {
        Self { directory }
    }

    /// Decides whether any of `users` may run `verb` against `repo`.
    ///
    /// Malformed repository names and template lookup failures are errors.
    /// An unknown organization, or one without source access, is a denial.
    pub async fn access(&self, repo: &str, verb: &str, users: &[String]) -> Result<AccessDecision, GitsError> {
        let org_id = org_id(repo)?;
        let template_id = template_id(repo)?;

        let org = match self.directory.org_by_id(org_id).await {
            Ok(org) => org,
            Err(e) => {
                return Ok(AccessDecision::deny(Some(GitsError::Dependency(format!(
                    "unable to fetch organization `{}` info: {}",
                    org_id,
                    e.message()
                )))));
            }
        };
        if !org.show_source {
            return Ok(AccessDecision::deny(Some(GitsError::Unauthorized(format!(
                "organization `{}` has no source code access",
                org_id
            )))));
        }

        let template = self.directory.template_by_id(template_id).await.map_err(|e| {
            GitsError::Dependency(format!("unable to fetch template `{}` info: {}", template_id, e.message()))
        })?;

        let mut granted = vec![UserAccess {
            user_id: template.owner_user_id.clone(),
            can_write: true,
        }];
        let mut team_error = None;
        for team in &template.teams {
            match self.directory.users_by_team(&team.team_id).await {
                Ok(members) => granted.extend(members.into_iter().map(|user_id| UserAccess {
                    user_id,
                    can_write: team.can_write,
                })),
                Err(e) => {
                    debug!("Team `{}` of template `{}`: {}", team.team_id, template_id, e);
                    team_error.get_or_insert(e);
                }
            }
        }

        let write = write_requested(verb);
        for user in users {
            if granted
                .iter()
                .any(|grant| &grant.user_id == user && (!write || grant.can_write))
            {
                return Ok(AccessDecision::grant(team_error));
            }
        }
        Ok(AccessDecision::deny(team_error))
    }

    /// Same decision for an interactive user, identified by signing in to the
    /// auth service. Template teams are matched against the user's groups by name.
    pub async fn access_with_login(
        &self,
        org: &str,
        repo: &str,
        verb: &str,
        username: &str,
        password: &str,
    ) -> Result<AccessDecision, GitsError> {
        let org_id = org_id(repo)?;
        let template_id = template_id(repo)?;

        let user = match self.directory.login(username, password).await {
            Ok(user) => user,
            Err(e) => {
                return Ok(AccessDecision::deny(Some(GitsError::Unauthorized(format!(
                    "unable to sign in user `{}`: {}",
                    username,
                    e.message()
                )))));
            }
        };
        if !org.eq_ignore_ascii_case(&user.organization) {
            return Ok(AccessDecision::deny(Some(GitsError::Unauthorized(format!(
                "user org `{}` does not match repo org `{}`",
                user.organization, org
            )))));
        }

        let hub_org = match self.directory.org_by_id(org_id).await {
            Ok(hub_org) => hub_org,
            Err(e) => {
                return Ok(AccessDecision::deny(Some(GitsError::Dependency(format!(
                    "unable to fetch organization `{}` info: {}",
                    org_id,
                    e.message()
                )))));
            }
        };
        if !hub_org.show_source {
            return Ok(AccessDecision::deny(Some(GitsError::Unauthorized(format!(
                "organization `{}` has no source code access",
                org_id
            )))));
        }

        let template = self.directory.template_by_id(template_id).await.map_err(|e| {
            GitsError::Dependency(format!("unable to fetch template `{}` info: {}", template_id, e.message()))
        })?;

        if user.uid == template.owner_user_id {
            return Ok(AccessDecision::grant(None));
        }
        let write = write_requested(verb);
        for group in &user.groups {
            if template
                .teams
                .iter()
                .any(|team| &team.team_name == group && (!write || team.can_write))
            {
                return Ok(AccessDecision::grant(None));
            }
        }
        Ok(AccessDecision::deny(None))
    }
}
