use crate::config::extapi::ExtApiConfig;
use crate::config::secrets::Secrets;
use crate::error::GitsError;
use crate::extapi::Directory;
use crate::model::sshkey::SshKey;
use crate::model::template::{Organization, TeamAccess, Template};
use crate::model::user::LoginUser;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{instrument, trace};

const SECRET_HEADER: &str = "X-API-Secret";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HubTeam {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    role: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HubTemplate {
    owner_id: String,
    #[serde(default)]
    teams_permissions: Vec<HubTeam>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HubUserKey {
    user_id: String,
    public_key: String,
}

#[derive(Deserialize)]
struct AuthTeamMember {
    id: String,
    status: String,
}

#[derive(Deserialize)]
struct AuthTeam {
    #[serde(default)]
    members: Vec<AuthTeamMember>,
}

#[derive(Serialize)]
struct SignIn<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubsOrganization {
    id: String,
    #[serde(default)]
    show_source: bool,
}

/// One external service: base URL plus the secret sent with every request.
#[derive(Clone, Debug)]
struct Service {
    name: &'static str,
    base: Url,
    secret: Option<String>,
}

impl Service {
    fn new(name: &'static str, endpoint: &str, secret: Option<String>) -> Result<Self, GitsError> {
        let base = Url::parse(endpoint)
            .map_err(|e| GitsError::Config(format!("{} endpoint `{}`: {}", name, endpoint, e)))?;
        if base.cannot_be_a_base() {
            return Err(GitsError::Config(format!("{} endpoint `{}` cannot be a base URL", name, endpoint)));
        }
        Ok(Self { name, base, secret })
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.secret {
            Some(secret) => request.header(SECRET_HEADER, secret),
            None => request,
        }
    }
}

/// Directory backed by the hub, auth and subscriptions HTTP APIs.
pub struct HttpDirectory {
    http: Client,
    hub: Service,
    auth: Service,
    subs: Service,
}

impl HttpDirectory {
    pub fn new(config: &ExtApiConfig, secrets: &Secrets) -> Result<Self, GitsError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(format!("gits/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GitsError::Config(format!("http client: {}", e)))?;
        Ok(Self {
            http,
            hub: Service::new("hub", &config.hub_endpoint, secrets.hub.clone())?,
            auth: Service::new("auth", &config.auth_endpoint, secrets.auth.clone())?,
            subs: Service::new("subscriptions", &config.subs_endpoint, secrets.subs.clone())?,
        })
    }

    async fn send(&self, service: &Service, request: RequestBuilder) -> Result<Response, GitsError> {
        let response = service.authorize(request).send().await.map_err(|e| {
            GitsError::Dependency(format!("error querying {} service: {}", service.name, e))
        })?;
        trace!("{} {}: {}", service.name, response.url(), response.status());
        Ok(response)
    }

    async fn json<T: DeserializeOwned>(service: &Service, response: Response) -> Result<T, GitsError> {
        if response.status() != StatusCode::OK {
            return Err(GitsError::Dependency(format!(
                "got {} HTTP from {} service",
                response.status().as_u16(),
                service.name
            )));
        }
        response.json::<T>().await.map_err(|e| {
            GitsError::Dependency(format!("error reading {} service response: {}", service.name, e))
        })
    }
}

#[async_trait]
impl Directory for HttpDirectory {
    #[instrument(skip(self))]
    async fn org_by_id(&self, org_id: &str) -> Result<Organization, GitsError> {
        let org_id = org_id.to_uppercase();
        let url = self.subs.url(&["organizations", &org_id]);
        let response = self.send(&self.subs, self.http.get(url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(GitsError::Dependency(format!("no `{}` organization found", org_id)));
        }
        let org: SubsOrganization = Self::json(&self.subs, response).await?;
        Ok(Organization {
            id: org.id,
            show_source: org.show_source,
        })
    }

    #[instrument(skip(self))]
    async fn template_by_id(&self, template_id: &str) -> Result<Template, GitsError> {
        let url = self.hub.url(&["templates", template_id]);
        let response = self.send(&self.hub, self.http.get(url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(GitsError::Dependency(format!("no `{}` template found", template_id)));
        }
        let template: HubTemplate = Self::json(&self.hub, response).await?;
        Ok(Template {
            owner_user_id: template.owner_id,
            teams: template
                .teams_permissions
                .into_iter()
                .map(|team| TeamAccess {
                    can_write: team.role == "admin" || team.role == "write",
                    team_id: team.id,
                    team_name: team.name,
                })
                .collect(),
        })
    }

    #[instrument(skip(self))]
    async fn users_by_team(&self, team_id: &str) -> Result<Vec<String>, GitsError> {
        let url = self.auth.url(&["teams", team_id]);
        let response = self.send(&self.auth, self.http.get(url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(GitsError::Dependency(format!("no `{}` team found", team_id)));
        }
        let team: AuthTeam = Self::json(&self.auth, response).await?;
        Ok(team
            .members
            .into_iter()
            .filter(|member| member.status == "ACTIVE")
            .map(|member| member.id)
            .collect())
    }

    #[instrument(skip(self, key), fields(fingerprint = %key.fingerprint))]
    async fn users_by_ssh_key(&self, key: &SshKey) -> Result<Vec<String>, GitsError> {
        let mut url = self.hub.url(&["api", "v1", "user", "keys"]);
        url.query_pairs_mut().append_pair("fingerprint", &key.fingerprint);
        let response = self.send(&self.hub, self.http.get(url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(vec![]);
        }
        let keys: Vec<HubUserKey> = Self::json(&self.hub, response).await?;
        Ok(keys
            .into_iter()
            .filter(|uk| uk.public_key == key.base64)
            .map(|uk| uk.user_id)
            .collect())
    }

    #[instrument(skip(self, password))]
    async fn login(&self, username: &str, password: &str) -> Result<LoginUser, GitsError> {
        let url = self.auth.url(&["signin"]);
        let request = self.http.post(url).json(&SignIn { username, password });
        let response = self.send(&self.auth, request).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(GitsError::Dependency(format!("no `{}` user found", username)));
        }
        Self::json(&self.auth, response).await
    }
}
