use crate::error::GitsError;
use crate::model::repository::RepositoryId;
use crate::repository::archive::ArchiveSource;
use crate::repository::{AddFile, CreateRequest, DEFAULT_BRANCH, Git, RepoStatus, Subtree, status, subtrees, worktree};
use crate::serve::{RepoLifecycle, RepoStore};
use crate::service::GitService;
use crate::stream::{self, ByteStream};
use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio_stream::StreamExt;
use tracing::{debug, error, info, trace, warn};

/// Bare repositories under `<base>/<org>/<name>`, driven by the git binaries.
pub struct LocalRepoStore {
    base: PathBuf,
    git: Git,
    archives: ArchiveSource,
}

impl LocalRepoStore {
    pub fn new(base: PathBuf, git: Git, archives: ArchiveSource) -> Self {
        Self { base, git, archives }
    }

    fn dir(&self, repo: &RepositoryId) -> PathBuf {
        repo.path_in(&self.base)
    }

    async fn init_bare(&self, dir: &Path) -> Result<(), GitsError> {
        self.git.run(dir, ["init", "--bare"]).await?;
        Ok(())
    }

    async fn init_with_remote(&self, dir: &Path, remote: &str, git_ref: Option<&str>) -> Result<(), GitsError> {
        let git_ref = git_ref.filter(|r| !r.is_empty()).unwrap_or(DEFAULT_BRANCH);
        if remote.starts_with('-') || git_ref.starts_with('-') {
            return Err(GitsError::BadRequest(format!("invalid remote `{}` ref `{}`", remote, git_ref)));
        }
        self.init_bare(dir).await?;
        let refspec = format!("{}:{}", git_ref, DEFAULT_BRANCH);
        self.git
            .run(dir, ["fetch", "-n", remote, refspec.as_str()])
            .await
            .map_err(|e| GitsError::Git(format!("unable to fetch `{}` from `{}`: {}", git_ref, remote, e.message())))?;
        Ok(())
    }

    async fn init(&self, dir: &Path, request: &CreateRequest) -> Result<(), GitsError> {
        if let Some(archive) = request.archive.as_deref().filter(|a| !a.is_empty()) {
            return self.archives.unarchive(archive, dir).await;
        }
        if let Some(remote) = request.remote.as_deref().filter(|r| !r.is_empty()) {
            if request.squash {
                return Err(GitsError::NotSupported("squash is not implemented".to_string()));
            }
            return self.init_with_remote(dir, remote, request.git_ref.as_deref()).await;
        }
        self.init_bare(dir).await
    }
}

/// Spawns `cmd` and streams its stdout. Stderr goes to the debug log, the
/// exit status to the log once the process is reaped.
fn spawn_streaming(mut cmd: Command, input: Option<ByteStream>, what: String) -> Result<ByteStream, GitsError> {
    cmd.stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    trace!("Starting {:?}", cmd.as_std());
    let mut child = cmd
        .spawn()
        .map_err(|e| GitsError::Git(format!("unable to start {}: {}", what, e)))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| GitsError::Internal(format!("{}: stdout not captured", what)))?;

    if let (Some(mut input), Some(mut stdin)) = (input, child.stdin.take()) {
        let label = what.clone();
        tokio::spawn(async move {
            while let Some(chunk) = input.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        warn!("Request body for {}: {}", label, e);
                        break;
                    }
                };
                if let Err(e) = stdin.write_all(&chunk).await {
                    debug!("Writing to {}: {}", label, e);
                    break;
                }
            }
        });
    }
    if let Some(stderr) = child.stderr.take() {
        let label = what.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!("{}: {}", label, line);
            }
        });
    }
    let label = what.clone();
    tokio::spawn(async move {
        match child.wait().await {
            Ok(status) if status.success() => trace!("{} finished", label),
            Ok(status) => warn!("{} exited with {}", label, status),
            Err(e) => error!("Waiting for {}: {}", label, e),
        }
    });
    Ok(stream::from_reader(stdout, what))
}

#[async_trait]
impl RepoStore for LocalRepoStore {
    async fn exist(&self, repo: &RepositoryId) -> bool {
        tokio::fs::metadata(self.dir(repo))
            .await
            .is_ok_and(|meta| meta.is_dir())
    }

    async fn refs_info(&self, repo: &RepositoryId, service: GitService) -> Result<ByteStream, GitsError> {
        let mut cmd = self.git.service(service, &self.dir(repo));
        cmd.args(["--stateless-rpc", "--advertise-refs", "."]);
        spawn_streaming(cmd, None, format!("{} refs of `{}`", service, repo))
    }

    async fn pack(&self, repo: &RepositoryId, service: GitService, input: ByteStream) -> Result<ByteStream, GitsError> {
        let mut cmd = self.git.service(service, &self.dir(repo));
        cmd.args(["--stateless-rpc", "."]);
        spawn_streaming(cmd, Some(input), format!("{} pack of `{}`", service, repo))
    }

    async fn serve(&self, repo: &RepositoryId, service: GitService) -> Result<Child, GitsError> {
        let mut cmd = self.git.service(service, &self.dir(repo));
        cmd.arg(".")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        trace!("Starting {:?}", cmd.as_std());
        cmd.spawn()
            .map_err(|e| GitsError::Git(format!("unable to start {} for `{}`: {}", service, repo, e)))
    }
}

#[async_trait]
impl RepoLifecycle for LocalRepoStore {
    async fn create(&self, repo: &RepositoryId, request: &CreateRequest) -> Result<(), GitsError> {
        if let Some(archive) = request.archive.as_deref().filter(|a| !a.is_empty()) {
            self.archives.check(archive)?;
        }
        let dir = self.dir(repo);
        if tokio::fs::symlink_metadata(&dir).await.is_ok() {
            return Err(GitsError::Conflict(format!("directory already exists: {}", dir.display())));
        }
        tokio::fs::create_dir_all(&dir).await?;
        if let Err(e) = self.init(&dir, request).await {
            if let Err(rm) = tokio::fs::remove_dir_all(&dir).await {
                warn!("Unable to remove `{}` after failed create: {}", dir.display(), rm);
            }
            return Err(e);
        }
        info!("Repo `{}` created", repo);
        Ok(())
    }

    async fn delete(&self, repo: &RepositoryId) -> Result<(), GitsError> {
        let dir = self.dir(repo);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                info!("Repo `{}` deleted", repo);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(GitsError::NotFound(format!("repo `{}`", repo))),
            Err(e) => Err(GitsError::Io(format!("unable to delete `{}`: {}", dir.display(), e))),
        }
    }

    async fn add(
        &self,
        repo: &RepositoryId,
        branch: Option<&str>,
        files: Vec<AddFile>,
        message: Option<&str>,
    ) -> Result<(), GitsError> {
        worktree::add(&self.git, &self.dir(repo), branch, &files, message).await
    }

    async fn blob(&self, repo: &RepositoryId, git_ref: Option<&str>, path: &str) -> Result<Bytes, GitsError> {
        worktree::blob(&self.git, &self.dir(repo), git_ref, path).await
    }

    async fn log(&self, repo: &RepositoryId, git_ref: Option<&str>) -> Result<Bytes, GitsError> {
        let mut args = vec!["log"];
        if let Some(git_ref) = git_ref.filter(|r| !r.is_empty()) {
            args.extend([git_ref, "--"]);
        }
        let output = self.git.run(&self.dir(repo), &args).await?;
        Ok(Bytes::from(output.stdout))
    }

    async fn status(&self, repo: &RepositoryId, git_ref: Option<&str>) -> Result<RepoStatus, GitsError> {
        status::status(&self.git, &self.dir(repo), git_ref).await
    }

    async fn add_subtrees(
        &self,
        repo: &RepositoryId,
        branch: Option<&str>,
        subtrees: Vec<Subtree>,
    ) -> Result<(), GitsError> {
        subtrees::add_subtrees(&self.git, &self.dir(repo), branch, subtrees).await
    }
}
