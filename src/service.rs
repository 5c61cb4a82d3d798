use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Git transport services the server is willing to run.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum GitService {
    #[serde(rename = "git-upload-pack")]
    UploadPack,
    #[serde(rename = "git-receive-pack")]
    ReceivePack,
    #[serde(rename = "git-upload-archive")]
    UploadArchive,
}

impl GitService {
    pub fn from_string(s: &str) -> Option<GitService> {
        match s {
            "git-upload-pack" => Some(GitService::UploadPack),
            "git-receive-pack" => Some(GitService::ReceivePack),
            "git-upload-archive" => Some(GitService::UploadArchive),
            _ => None,
        }
    }

    /// Services reachable over Smart HTTP; upload-archive is SSH only.
    pub fn from_http(s: &str) -> Option<GitService> {
        match GitService::from_string(s) {
            Some(GitService::UploadArchive) | None => None,
            service => service,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GitService::UploadPack => "git-upload-pack",
            GitService::ReceivePack => "git-receive-pack",
            GitService::UploadArchive => "git-upload-archive",
        }
    }

    /// Name of the git subcommand when the service binary is not on `PATH`.
    pub fn subcommand(&self) -> &'static str {
        &self.as_str()[4..]
    }

    pub fn is_write(&self) -> bool {
        matches!(self, GitService::ReceivePack)
    }

    pub fn advertisement_content_type(&self) -> String {
        format!("application/x-{}-advertisement", self.as_str())
    }

    pub fn result_content_type(&self) -> String {
        format!("application/x-{}-result", self.as_str())
    }
}

impl Display for GitService {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_rejects_archive() {
        assert_eq!(GitService::from_http("git-upload-pack"), Some(GitService::UploadPack));
        assert_eq!(GitService::from_http("git-receive-pack"), Some(GitService::ReceivePack));
        assert_eq!(GitService::from_http("git-upload-archive"), None);
        assert_eq!(GitService::from_http("git-gc"), None);
        assert_eq!(GitService::from_string("git-upload-archive"), Some(GitService::UploadArchive));
    }

    #[test]
    fn test_subcommand() {
        assert_eq!(GitService::ReceivePack.subcommand(), "receive-pack");
        assert!(GitService::ReceivePack.is_write());
        assert!(!GitService::UploadArchive.is_write());
    }
}
