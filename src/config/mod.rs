use crate::config::extapi::ExtApiConfig;
use crate::config::http::HttpConfig;
use crate::config::repo::{AwsConfig, RepoConfig};
use crate::config::secrets::SecretsConfig;
use crate::config::ssh::SshConfig;
use crate::error::GitsError;
use serde::{Deserialize, Serialize};
use std::env::var;
use std::path::Path;
use tracing::info;

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub ssh: SshConfig,
    #[serde(default)]
    pub repo: RepoConfig,
    #[serde(default)]
    pub extapi: ExtApiConfig,
    #[serde(default)]
    pub secrets: SecretsConfig,
    #[serde(default)]
    pub aws: AwsConfig,
}

impl AppConfig {
    pub fn config_file() -> String {
        var("CONFIG_FILE").unwrap_or("config.toml".to_string())
    }

    /// Loads the configuration from `CONFIG_FILE` (or `config.toml`).
    ///
    /// A missing file is not an error: the defaults are written to that path
    /// and returned. A file that exists but does not parse is.
    pub fn load() -> Result<Self, GitsError> {
        Self::load_from(Self::config_file())
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, GitsError> {
        let path = path.as_ref();
        let config_content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(_) => {
                let config = Self::default();
                config.save_to(path)?;
                info!("Wrote default configuration to {}", path.display());
                return Ok(config);
            }
        };
        let config: AppConfig = toml::from_str(&config_content)
            .map_err(|e| GitsError::Config(format!("could not parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<(), GitsError> {
        let toml_str = toml::to_string_pretty(self)
            .map_err(|e| GitsError::Config(format!("could not serialize config: {}", e)))?;
        std::fs::write(path, toml_str)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), GitsError> {
        self.repo.validate()?;
        self.extapi.validate()?;
        Ok(())
    }
}

pub mod extapi;
pub mod http;
pub mod repo;
pub mod secrets;
pub mod ssh;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gits.toml");
        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.http.port, 8005);
        assert_eq!(config.ssh.port, 2022);
        assert!(path.exists());
        let again = AppConfig::load_from(&path).unwrap();
        assert_eq!(again.repo.dir, config.repo.dir);
    }

    #[test]
    fn test_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gits.toml");
        std::fs::write(
            &path,
            "[repo]\ndir = \"/srv/git\"\n\n[extapi]\nno_ext_api_calls = true\n",
        )
        .unwrap();
        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.repo.dir, "/srv/git");
        assert!(config.extapi.no_ext_api_calls);
        assert_eq!(config.http.read_timeout_secs, 10);
    }

    #[test]
    fn test_root_repo_dir_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gits.toml");
        std::fs::write(&path, "[repo]\ndir = \"/\"\n").unwrap();
        assert!(matches!(AppConfig::load_from(&path), Err(GitsError::Config(_))));
    }
}
