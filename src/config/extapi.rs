use crate::error::GitsError;
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct ExtApiConfig {
    /// Answer directory lookups from the built-in fixture instead of HTTP.
    pub no_ext_api_calls: bool,
    pub hub_endpoint: String,
    pub auth_endpoint: String,
    pub subs_endpoint: String,
    pub timeout_secs: u64,
}

impl ExtApiConfig {
    pub fn validate(&self) -> Result<(), GitsError> {
        if self.no_ext_api_calls {
            return Ok(());
        }
        for (name, endpoint) in [
            ("hub_endpoint", &self.hub_endpoint),
            ("auth_endpoint", &self.auth_endpoint),
            ("subs_endpoint", &self.subs_endpoint),
        ] {
            if endpoint.is_empty() {
                return Err(GitsError::Config(format!(
                    "extapi.{} is required unless no_ext_api_calls is set",
                    name
                )));
            }
        }
        Ok(())
    }
}

impl Default for ExtApiConfig {
    fn default() -> Self {
        Self {
            no_ext_api_calls: true,
            hub_endpoint: "".to_string(),
            auth_endpoint: "".to_string(),
            subs_endpoint: "".to_string(),
            timeout_secs: 10,
        }
    }
}
