use crate::config::extapi::ExtApiConfig;
use crate::config::secrets::Secrets;
use crate::error::GitsError;
use crate::model::sshkey::SshKey;
use crate::model::template::{Organization, Template};
use crate::model::user::LoginUser;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Identity and entitlement lookups. Nothing is cached: every access check
/// sees the current state of the external services.
#[async_trait]
pub trait Directory: Send + Sync + 'static {
    async fn org_by_id(&self, org_id: &str) -> Result<Organization, GitsError>;
    async fn template_by_id(&self, template_id: &str) -> Result<Template, GitsError>;
    /// Active members of a team.
    async fn users_by_team(&self, team_id: &str) -> Result<Vec<String>, GitsError>;
    /// Owners of a public key. An unknown key yields an empty list, not an error.
    async fn users_by_ssh_key(&self, key: &SshKey) -> Result<Vec<String>, GitsError>;
    async fn login(&self, username: &str, password: &str) -> Result<LoginUser, GitsError>;
}

pub fn directory(config: &ExtApiConfig, secrets: &Secrets) -> Result<Arc<dyn Directory>, GitsError> {
    if config.no_ext_api_calls {
        info!("External API calls disabled, using the built-in directory fixture");
        return Ok(Arc::new(stub::StubDirectory::fixture()));
    }
    Ok(Arc::new(hub::HttpDirectory::new(config, secrets)?))
}

pub mod hub;
pub mod stub;
