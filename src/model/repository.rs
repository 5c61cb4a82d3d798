use crate::error::GitsError;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

/// `{organization}/{name}` with both segments reduced to `[a-z0-9-]`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepositoryId {
    pub organization: String,
    pub name: String,
}

/// Lowercases and collapses every run of characters outside `[a-z0-9-]` into one `-`.
pub fn sanitize(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    let mut in_run = false;
    for c in segment.to_lowercase().chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
            out.push(c);
            in_run = false;
        } else if !in_run {
            out.push('-');
            in_run = true;
        }
    }
    out
}

impl RepositoryId {
    pub fn from_segments(organization: &str, name: &str) -> Result<Self, GitsError> {
        let organization = sanitize(organization);
        let name = sanitize(name.strip_suffix(".git").unwrap_or(name));
        if organization.is_empty() || name.is_empty() {
            return Err(GitsError::BadRepoName(format!("{}/{}", organization, name)));
        }
        Ok(Self { organization, name })
    }

    /// Parses the `org/name` form used on the SSH command line.
    pub fn parse(repo: &str) -> Result<Self, GitsError> {
        match repo.split_once('/') {
            Some((organization, name)) => Self::from_segments(organization, name),
            None => Err(GitsError::BadRepoName(repo.to_string())),
        }
    }

    pub fn path_in<P: AsRef<Path>>(&self, base: P) -> PathBuf {
        base.as_ref().join(&self.organization).join(&self.name)
    }
}

impl Display for RepositoryId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.organization, self.name)
    }
}
