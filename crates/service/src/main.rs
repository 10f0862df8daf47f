//! UXP Developer Service
//!
//! Brokers the developer CLI, host applications and DevTools debuggers over
//! one local WebSocket port.

use clap::Parser;
use tracing::{info, warn};

use uxp_devtools_service::config::{Args, ServiceConfig};
use uxp_devtools_service::logging::{init_logging, Logger};
use uxp_devtools_service::{discovery, paths, service};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = ServiceConfig::from(args);

    let data_dir = paths::resolve_data_dir(config.data_dir.as_deref());
    paths::ensure_dirs(&data_dir)?;
    let logging = init_logging(&paths::log_dir(&data_dir))?;

    info!(
        component = "main",
        event = "service.starting",
        run_id = %logging.run_id,
        data_dir = %data_dir.display(),
        port = config.port,
        "Starting UXP developer service"
    );

    let handle = service::start(config, Logger::new()).await?;
    discovery::advertise(&data_dir, handle.port())?;

    tokio::signal::ctrl_c().await?;
    info!(
        component = "main",
        event = "service.shutdown_requested",
        "Shutting down"
    );

    if let Err(err) = discovery::withdraw(&data_dir) {
        warn!(
            component = "main",
            event = "discovery.withdraw_failed",
            error = %err,
            "Failed to remove advertised port"
        );
    }
    handle.close().await?;
    Ok(())
}
