use crate::error::GitsError;
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct RepoConfig {
    /// Base directory holding `<org>/<name>` bare repositories.
    pub dir: String,
    /// The server refuses writes while this file exists.
    pub maintenance_file: Option<String>,
    pub git_bin_default: String,
    /// Allowed `s3://` prefixes for archive sources; empty means unrestricted.
    #[serde(default)]
    pub blobs_from: Vec<String>,
}

impl RepoConfig {
    pub fn validate(&self) -> Result<(), GitsError> {
        if self.dir.trim_end_matches('/').is_empty() {
            return Err(GitsError::Config("repository directory cannot be `/`".to_string()));
        }
        if let Some(prefix) = self.blobs_from.iter().find(|p| !p.starts_with("s3://")) {
            return Err(GitsError::Config(format!(
                "blob source `{}` must start with s3://",
                prefix
            )));
        }
        Ok(())
    }
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            dir: "/git".to_string(),
            maintenance_file: None,
            git_bin_default: "/usr/bin/git".to_string(),
            blobs_from: vec![],
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct AwsConfig {
    pub region: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_prefixes_must_be_s3() {
        let mut config = RepoConfig::default();
        config.blobs_from = vec!["s3://bucket/templates/".to_string()];
        assert!(config.validate().is_ok());
        config.blobs_from.push("https://example.com/".to_string());
        assert!(config.validate().is_err());
    }
}
