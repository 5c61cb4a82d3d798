use crate::error::GitsError;
use crate::service::GitService;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use tokio::process::Command;
use tracing::{debug, trace};

pub const DEFAULT_BRANCH: &str = "master";

/// Body of `PUT /api/v1/repositories/{org}/{repo}`. All fields optional:
/// an empty body creates a bare repository.
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct CreateRequest {
    #[serde(default)]
    pub archive: Option<String>,
    #[serde(default)]
    pub remote: Option<String>,
    #[serde(default, rename = "ref")]
    pub git_ref: Option<String>,
    #[serde(default)]
    pub squash: bool,
}

#[derive(Clone, Debug)]
pub struct AddFile {
    pub path: String,
    pub content: Bytes,
    /// Unix permission bits; `None` means 0644.
    pub mode: Option<u32>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct RepoStatus {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub commit: String,
    #[serde(rename = "ref", skip_serializing_if = "String::is_empty")]
    pub git_ref: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub date: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub author: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub subject: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Subtree {
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub remote: String,
    #[serde(default, rename = "ref")]
    pub git_ref: String,
    #[serde(default, rename = "splitPrefix")]
    pub split_prefix: String,
    #[serde(default)]
    pub squash: bool,
}

/// Locates the git executables: a binary from `PATH` when there is one,
/// the configured default otherwise.
#[derive(Clone, Debug)]
pub struct Git {
    bin: PathBuf,
}

pub fn lookup_path(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

impl Git {
    pub fn new(default_bin: &str) -> Self {
        let bin = lookup_path("git").unwrap_or_else(|| {
            trace!("git not found on PATH, using {}", default_bin);
            PathBuf::from(default_bin)
        });
        Self { bin }
    }

    pub fn bin(&self) -> &Path {
        &self.bin
    }

    /// `git <args>` in `dir`.
    pub fn command<I, S>(&self, dir: &Path, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new(&self.bin);
        cmd.args(args).current_dir(dir).env("GIT_TERMINAL_PROMPT", "0");
        cmd
    }

    /// The transport service binary (`git-upload-pack` and friends), falling
    /// back to `git <subcommand>`.
    pub fn service(&self, service: GitService, dir: &Path) -> Command {
        let mut cmd = match lookup_path(service.as_str()) {
            Some(path) => Command::new(path),
            None => {
                let mut cmd = Command::new(&self.bin);
                cmd.arg(service.subcommand());
                cmd
            }
        };
        cmd.current_dir(dir);
        cmd
    }

    /// Runs `git <args>` to completion, capturing stdout and stderr.
    pub async fn output<I, S>(&self, dir: &Path, args: I) -> Result<Output, GitsError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = self.command(dir, args);
        cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
        debug!("{:?} ({})", cmd.as_std(), dir.display());
        cmd.output()
            .await
            .map_err(|e| GitsError::Git(format!("unable to start git: {}", e)))
    }

    /// Like [`Git::output`], failing with stderr when git exits non-zero.
    pub async fn run<I, S>(&self, dir: &Path, args: I) -> Result<Output, GitsError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = self.output(dir, args).await?;
        if !output.status.success() {
            return Err(GitsError::Git(format!(
                "{}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output)
    }
}

pub mod archive;
pub mod local;
pub mod status;
pub mod subtrees;
pub mod worktree;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_request_forms() {
        let bare: CreateRequest = serde_json::from_str("{}").unwrap();
        assert!(bare.archive.is_none() && bare.remote.is_none());
        let remote: CreateRequest =
            serde_json::from_str(r#"{"remote":"https://example.com/x.git","ref":"main"}"#).unwrap();
        assert_eq!(remote.git_ref.as_deref(), Some("main"));
    }

    #[test]
    fn test_status_omits_empty_fields() {
        let status = RepoStatus {
            commit: "abc".to_string(),
            ..RepoStatus::default()
        };
        assert_eq!(serde_json::to_string(&status).unwrap(), r#"{"commit":"abc"}"#);
    }

    #[test]
    fn test_lookup_missing_binary() {
        assert!(lookup_path("surely-not-a-real-binary-name").is_none());
    }
}
