use crate::access::AccessEngine;
use crate::config::AppConfig;
use crate::error::GitsError;
use crate::extapi::{Directory, directory};
use crate::maintenance::Maintenance;
use crate::model::repository::RepositoryId;
use crate::repository::archive::ArchiveSource;
use crate::repository::local::LocalRepoStore;
use crate::repository::{AddFile, CreateRequest, Git, RepoStatus, Subtree};
use crate::service::GitService;
use crate::stream::ByteStream;
use crate::token::DeploymentKeys;
use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::process::Child;
use tracing::info;

/// Everything the HTTP and SSH front ends share. Built once at startup and
/// cloned into every worker.
#[derive(Clone)]
pub struct AppCore {
    pub repos: Arc<dyn RepoStore>,
    pub lifecycle: Arc<dyn RepoLifecycle>,
    pub directory: Arc<dyn Directory>,
    pub keys: DeploymentKeys,
    pub access: AccessEngine,
    pub maintenance: Arc<Maintenance>,
    /// Shared secret for the management API and git transport; `None` leaves both open.
    pub api_secret: Option<String>,
}

/// Git transport over an existing repository.
#[async_trait]
pub trait RepoStore: Send + Sync + 'static {
    async fn exist(&self, repo: &RepositoryId) -> bool;
    /// Output of `<service> --stateless-rpc --advertise-refs .`, without the
    /// service announcement.
    async fn refs_info(&self, repo: &RepositoryId, service: GitService) -> Result<ByteStream, GitsError>;
    /// Runs `<service> --stateless-rpc .` with `input` on stdin.
    async fn pack(&self, repo: &RepositoryId, service: GitService, input: ByteStream) -> Result<ByteStream, GitsError>;
    /// Spawns `<service> .` with piped stdio for an SSH channel.
    async fn serve(&self, repo: &RepositoryId, service: GitService) -> Result<Child, GitsError>;
}

/// Management operations behind `/api/v1/repositories`.
#[async_trait]
pub trait RepoLifecycle: Send + Sync + 'static {
    async fn create(&self, repo: &RepositoryId, request: &CreateRequest) -> Result<(), GitsError>;
    async fn delete(&self, repo: &RepositoryId) -> Result<(), GitsError>;
    async fn add(
        &self,
        repo: &RepositoryId,
        branch: Option<&str>,
        files: Vec<AddFile>,
        message: Option<&str>,
    ) -> Result<(), GitsError>;
    async fn blob(&self, repo: &RepositoryId, git_ref: Option<&str>, path: &str) -> Result<Bytes, GitsError>;
    async fn log(&self, repo: &RepositoryId, git_ref: Option<&str>) -> Result<Bytes, GitsError>;
    async fn status(&self, repo: &RepositoryId, git_ref: Option<&str>) -> Result<RepoStatus, GitsError>;
    async fn add_subtrees(
        &self,
        repo: &RepositoryId,
        branch: Option<&str>,
        subtrees: Vec<Subtree>,
    ) -> Result<(), GitsError>;
}

impl AppCore {
    pub fn from_config(config: &AppConfig) -> Result<Self, GitsError> {
        let secrets = config.secrets.resolve();
        let git = Git::new(&config.repo.git_bin_default);
        info!("Using {} for git", git.bin().display());
        let archives = ArchiveSource::new(config.aws.region.clone(), config.repo.blobs_from.clone());
        let store = Arc::new(LocalRepoStore::new(PathBuf::from(&config.repo.dir), git, archives));
        let directory = directory(&config.extapi, &secrets)?;
        let keys = DeploymentKeys::from_secrets(secrets.hub.as_deref(), secrets.api.as_deref());
        let maintenance = Maintenance::new(config.repo.maintenance_file.as_ref().map(PathBuf::from));
        if !keys.is_enabled() {
            info!("Deployment keys disabled");
        }
        if secrets.api.is_none() {
            info!("No API secret configured, management API and git transport are open");
        }
        Ok(Self {
            repos: store.clone(),
            lifecycle: store,
            access: AccessEngine::new(directory.clone()),
            directory,
            keys,
            maintenance: Arc::new(maintenance),
            api_secret: secrets.api,
        })
    }
}

#[cfg(test)]
pub mod testing;
