use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct SshConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    /// Path to the server's private host key.
    pub host_key: String,
}

impl SshConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "0.0.0.0".to_string(),
            port: 2022,
            host_key: "gits-key".to_string(),
        }
    }
}
