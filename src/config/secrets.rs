use serde::{Deserialize, Serialize};
use std::env::var;

/// Names of the environment variables the shared secrets are read from.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct SecretsConfig {
    pub api_secret_env: String,
    pub hub_api_secret_env: String,
    pub auth_api_secret_env: String,
    pub subs_api_secret_env: String,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            api_secret_env: "GIT_API_SECRET".to_string(),
            hub_api_secret_env: "HUB_API_SECRET".to_string(),
            auth_api_secret_env: "AUTH_API_SECRET".to_string(),
            subs_api_secret_env: "SUBS_API_SECRET".to_string(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Secrets {
    pub api: Option<String>,
    pub hub: Option<String>,
    pub auth: Option<String>,
    pub subs: Option<String>,
}

impl SecretsConfig {
    /// Reads every secret once. Unset and empty variables both mean "no secret".
    pub fn resolve(&self) -> Secrets {
        Secrets {
            api: from_env(&self.api_secret_env),
            hub: from_env(&self.hub_api_secret_env),
            auth: from_env(&self.auth_api_secret_env),
            subs: from_env(&self.subs_api_secret_env),
        }
    }
}

fn from_env(name: &str) -> Option<String> {
    if name.is_empty() {
        return None;
    }
    var(name).ok().filter(|v| !v.is_empty())
}
