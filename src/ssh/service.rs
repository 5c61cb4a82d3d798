use crate::config::ssh::SshConfig;
use crate::error::GitsError;
use crate::serve::AppCore;
use crate::ssh::handler::SshHandler;
use russh::keys::load_secret_key;
use russh::server::{Config, Server};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct SshServer {
    pub config: SshConfig,
    pub core: AppCore,
}

impl SshServer {
    pub fn new(config: SshConfig, core: AppCore) -> Self {
        Self { config, core }
    }

    pub fn server_config(&self) -> Result<Config, GitsError> {
        let key = load_secret_key(&self.config.host_key, None).map_err(|e| {
            GitsError::SshServerStartError(format!(
                "failed to load SSH host private key from `{}`: {}",
                self.config.host_key, e
            ))
        })?;
        Ok(Config {
            keys: vec![key],
            max_auth_attempts: 20,
            auth_rejection_time: Duration::from_secs(1),
            auth_rejection_time_initial: Some(Duration::from_secs(0)),
            ..Default::default()
        })
    }

    pub async fn run(&mut self) -> Result<(), GitsError> {
        let config = Arc::new(self.server_config()?);
        let addr = self.config.bind_addr();
        info!("SSH listening on {}", addr);
        self.run_on_address(config, addr.as_str())
            .await
            .map_err(|e| GitsError::SshServerStartError(e.to_string()))
    }
}

impl Server for SshServer {
    type Handler = SshHandler;

    fn new_client(&mut self, peer_addr: Option<SocketAddr>) -> Self::Handler {
        info!("SSH accepted connection from {:?}", peer_addr);
        SshHandler::new(self.core.clone(), peer_addr)
    }

    fn handle_session_error(&mut self, error: GitsError) {
        warn!("SSH session terminated: {}", error);
    }
}
