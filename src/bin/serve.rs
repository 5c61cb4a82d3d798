use gits::config::AppConfig;
use gits::http::HttpServer;
use gits::serve::AppCore;
use gits::ssh::service::SshServer;
use tokio::select;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Loads `.env` and the configuration, then serves Smart HTTP and SSH until
/// either server stops or CTRL+C is received.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenv::dotenv().ok();
    let tracing_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_filter(EnvFilter::new(tracing_level));
    tracing_subscriber::registry().with(fmt_layer).init();

    let config = AppConfig::load()?;
    let core = AppCore::from_config(&config)?;
    info!("Serving repositories from {}", config.repo.dir);

    let http = HttpServer::new(config.http.clone(), core.clone());
    let ssh_enabled = config.ssh.enabled;
    let mut ssh = SshServer::new(config.ssh.clone(), core);
    let ssh_handle = tokio::spawn(async move {
        if !ssh_enabled {
            info!("SSH server disabled");
            return std::future::pending::<()>().await;
        }
        if let Err(e) = ssh.run().await {
            error!("SSH server error: {}", e);
        }
    });

    select! {
        result = http.run() => {
            if let Err(e) = result {
                error!("HTTP server error: {}", e);
            }
            info!("HTTP server completed.");
        }
        _ = ssh_handle => {
            info!("SSH server task completed.");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received.");
        }
    }
    Ok(())
}
