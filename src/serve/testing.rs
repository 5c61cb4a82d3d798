//! In-memory stand-ins used by the HTTP, SSH and auth tests.

use crate::access::AccessEngine;
use crate::error::GitsError;
use crate::extapi::stub::StubDirectory;
use crate::maintenance::Maintenance;
use crate::model::repository::RepositoryId;
use crate::repository::{AddFile, CreateRequest, RepoStatus, Subtree, subtrees};
use crate::serve::{AppCore, RepoLifecycle, RepoStore};
use crate::service::GitService;
use crate::stream::{self, ByteStream};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tokio_stream::StreamExt;

pub const ADVERTISEMENT: &[u8] = b"003f8a3c1f0e7d2b4c6a9e0f1d2c3b4a596877665544 refs/heads/master\n0000";
pub const COMMIT: &str = "8a3c1f0e7d2b4c6a9e0f1d2c3b4a596877665544";

/// Repositories that exist only as names and a few files. `pack` and
/// `serve` echo their input so tests can observe what reached the git process.
#[derive(Default)]
pub struct MemoryRepos {
    repos: Mutex<HashMap<RepositoryId, HashMap<String, Bytes>>>,
    pub served: AtomicUsize,
}

impl MemoryRepos {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_repo(self, org: &str, name: &str) -> Self {
        if let Ok(repo) = RepositoryId::from_segments(org, name) {
            self.repos.lock().unwrap().insert(repo, HashMap::new());
        }
        self
    }

    pub fn file(&self, repo: &RepositoryId, path: &str) -> Option<Bytes> {
        self.repos.lock().unwrap().get(repo)?.get(path).cloned()
    }

    fn missing(repo: &RepositoryId) -> GitsError {
        GitsError::NotFound(format!("repo `{}`", repo))
    }
}

#[async_trait]
impl RepoStore for MemoryRepos {
    async fn exist(&self, repo: &RepositoryId) -> bool {
        self.repos.lock().unwrap().contains_key(repo)
    }

    async fn refs_info(&self, _repo: &RepositoryId, _service: GitService) -> Result<ByteStream, GitsError> {
        Ok(stream::once(Bytes::from_static(ADVERTISEMENT)))
    }

    async fn pack(&self, _repo: &RepositoryId, _service: GitService, mut input: ByteStream) -> Result<ByteStream, GitsError> {
        let mut echoed = BytesMut::new();
        while let Some(chunk) = input.next().await {
            echoed.extend_from_slice(&chunk?);
        }
        Ok(stream::once(echoed.freeze()))
    }

    /// `cat` stands in for the git process: whatever the client sends comes back.
    async fn serve(&self, repo: &RepositoryId, service: GitService) -> Result<Child, GitsError> {
        self.served.fetch_add(1, Ordering::SeqCst);
        Command::new("cat")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| GitsError::Git(format!("unable to start {} for `{}`: {}", service, repo, e)))
    }
}

#[async_trait]
impl RepoLifecycle for MemoryRepos {
    async fn create(&self, repo: &RepositoryId, _request: &CreateRequest) -> Result<(), GitsError> {
        let mut repos = self.repos.lock().unwrap();
        if repos.contains_key(repo) {
            return Err(GitsError::Conflict(format!("repo `{}` exists", repo)));
        }
        repos.insert(repo.clone(), HashMap::new());
        Ok(())
    }

    async fn delete(&self, repo: &RepositoryId) -> Result<(), GitsError> {
        match self.repos.lock().unwrap().remove(repo) {
            Some(_) => Ok(()),
            None => Err(Self::missing(repo)),
        }
    }

    async fn add(
        &self,
        repo: &RepositoryId,
        _branch: Option<&str>,
        files: Vec<AddFile>,
        _message: Option<&str>,
    ) -> Result<(), GitsError> {
        let mut repos = self.repos.lock().unwrap();
        let stored = repos.get_mut(repo).ok_or_else(|| Self::missing(repo))?;
        for file in files {
            stored.insert(file.path, file.content);
        }
        Ok(())
    }

    async fn blob(&self, repo: &RepositoryId, _git_ref: Option<&str>, path: &str) -> Result<Bytes, GitsError> {
        self.file(repo, path)
            .ok_or_else(|| GitsError::NotFound(format!("`{}` in `{}`", path, repo)))
    }

    async fn log(&self, _repo: &RepositoryId, _git_ref: Option<&str>) -> Result<Bytes, GitsError> {
        Ok(Bytes::from(format!("commit {}\n\n    Initial import\n", COMMIT)))
    }

    async fn status(&self, _repo: &RepositoryId, git_ref: Option<&str>) -> Result<RepoStatus, GitsError> {
        Ok(RepoStatus {
            commit: COMMIT.to_string(),
            git_ref: format!("refs/heads/{}", git_ref.unwrap_or("master")),
            subject: "Initial import".to_string(),
            ..RepoStatus::default()
        })
    }

    async fn add_subtrees(
        &self,
        _repo: &RepositoryId,
        _branch: Option<&str>,
        mut requested: Vec<Subtree>,
    ) -> Result<(), GitsError> {
        subtrees::validate(&mut requested)
    }
}

pub fn core_with(
    repos: Arc<MemoryRepos>,
    directory: Arc<StubDirectory>,
    keys: crate::token::DeploymentKeys,
    api_secret: Option<&str>,
) -> AppCore {
    AppCore {
        repos: repos.clone(),
        lifecycle: repos,
        access: AccessEngine::new(directory.clone()),
        directory,
        keys,
        maintenance: Arc::new(Maintenance::disabled()),
        api_secret: api_secret.map(str::to_string),
    }
}
