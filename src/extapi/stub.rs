use crate::error::GitsError;
use crate::extapi::Directory;
use crate::model::sshkey::SshKey;
use crate::model::template::{Organization, TeamAccess, Template};
use crate::model::user::LoginUser;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

pub const FIXTURE_USERS: [&str; 7] = ["anton", "arkadi", "igor", "igorlysak", "nikolay", "oleg", "rick"];
pub const FIXTURE_ORG: &str = "ASI";

#[derive(Default)]
struct StubData {
    orgs: HashMap<String, Organization>,
    templates: HashMap<String, Template>,
    teams: HashMap<String, Vec<String>>,
    keys: HashMap<String, Vec<String>>,
    logins: HashMap<String, (Option<String>, LoginUser)>,
    any_org: Option<Organization>,
    any_template: Option<Template>,
    any_key: Option<Vec<String>>,
}

/// In-memory directory. Serves the `no_ext_api_calls` mode and tests.
#[derive(Default)]
pub struct StubDirectory {
    data: RwLock<StubData>,
}

impl StubDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every organization shows source, every template is owned by `arkadi`
    /// with team `1` (all fixture users, write) and team `2` (read, which
    /// never resolves), every key belongs to all fixture users, and every
    /// fixture user can log in to organization `ASI` as a member of `ASI.Dev`.
    pub fn fixture() -> Self {
        let users: Vec<String> = FIXTURE_USERS.iter().map(|u| u.to_string()).collect();
        let mut data = StubData {
            any_org: Some(Organization {
                id: FIXTURE_ORG.to_string(),
                show_source: true,
            }),
            any_template: Some(Template {
                owner_user_id: "arkadi".to_string(),
                teams: vec![
                    TeamAccess {
                        team_id: "1".to_string(),
                        team_name: "ASI.Dev".to_string(),
                        can_write: true,
                    },
                    TeamAccess {
                        team_id: "2".to_string(),
                        team_name: "ASI.Ops".to_string(),
                        can_write: false,
                    },
                ],
            }),
            any_key: Some(users.clone()),
            ..StubData::default()
        };
        data.teams.insert("1".to_string(), users.clone());
        for user in &users {
            data.logins.insert(
                user.clone(),
                (
                    None,
                    LoginUser {
                        uid: user.clone(),
                        organization: FIXTURE_ORG.to_string(),
                        groups: vec!["ASI.Dev".to_string()],
                    },
                ),
            );
        }
        Self {
            data: RwLock::new(data),
        }
    }

    pub async fn put_org(&self, org: Organization) {
        self.data.write().await.orgs.insert(org.id.to_uppercase(), org);
    }

    pub async fn put_template(&self, template_id: &str, template: Template) {
        self.data.write().await.templates.insert(template_id.to_string(), template);
    }

    pub async fn put_team(&self, team_id: &str, members: &[&str]) {
        self.data
            .write()
            .await
            .teams
            .insert(team_id.to_string(), members.iter().map(|m| m.to_string()).collect());
    }

    pub async fn remove_team(&self, team_id: &str) {
        self.data.write().await.teams.remove(team_id);
    }

    pub async fn put_ssh_key(&self, key: &SshKey, users: &[&str]) {
        self.data
            .write()
            .await
            .keys
            .insert(key.fingerprint.clone(), users.iter().map(|u| u.to_string()).collect());
    }

    /// `password: None` accepts any password.
    pub async fn put_login(&self, username: &str, password: Option<&str>, user: LoginUser) {
        self.data
            .write()
            .await
            .logins
            .insert(username.to_string(), (password.map(str::to_string), user));
    }
}

#[async_trait]
impl Directory for StubDirectory {
    async fn org_by_id(&self, org_id: &str) -> Result<Organization, GitsError> {
        let data = self.data.read().await;
        data.orgs
            .get(&org_id.to_uppercase())
            .or(data.any_org.as_ref())
            .cloned()
            .ok_or_else(|| GitsError::Dependency(format!("no `{}` organization found", org_id)))
    }

    async fn template_by_id(&self, template_id: &str) -> Result<Template, GitsError> {
        let data = self.data.read().await;
        data.templates
            .get(template_id)
            .or(data.any_template.as_ref())
            .cloned()
            .ok_or_else(|| GitsError::Dependency(format!("no `{}` template found", template_id)))
    }

    async fn users_by_team(&self, team_id: &str) -> Result<Vec<String>, GitsError> {
        self.data
            .read()
            .await
            .teams
            .get(team_id)
            .cloned()
            .ok_or_else(|| GitsError::Dependency(format!("no `{}` team found", team_id)))
    }

    async fn users_by_ssh_key(&self, key: &SshKey) -> Result<Vec<String>, GitsError> {
        let data = self.data.read().await;
        Ok(data
            .keys
            .get(&key.fingerprint)
            .or(data.any_key.as_ref())
            .cloned()
            .unwrap_or_default())
    }

    async fn login(&self, username: &str, password: &str) -> Result<LoginUser, GitsError> {
        match self.data.read().await.logins.get(username) {
            Some((expected, user)) if expected.as_deref().is_none_or(|p| p == password) => Ok(user.clone()),
            Some(_) => Err(GitsError::Dependency(format!("bad password for `{}`", username))),
            None => Err(GitsError::Dependency(format!("no `{}` user found", username))),
        }
    }
}
