use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use device_trust::config::{load_or_default, watcher::ConfigWatcher};
use device_trust::lifecycle::{spawn_signal_handler, Shutdown};
use device_trust::observability::{logging::init_logging, metrics::init_metrics};
use device_trust::HttpServer;

#[derive(Parser)]
#[command(name = "device-trust")]
#[command(about = "Device trust and anomaly detection service", long_about = None)]
struct Args {
    /// TOML configuration file. Watched for changes when given.
    #[arg(short, long, env = "DEVICE_TRUST_CONFIG")]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = load_or_default(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.listener.bind_address = bind;
    }

    init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "device-trust starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        geolocation = ?config.geolocation.provider,
        tracking = config.device_tracking.enabled,
        block_suspicious = config.device_tracking.suspicious_activity.block_suspicious,
        admin = config.admin.enabled,
        "configuration loaded"
    );

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "listening for connections");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "failed to parse metrics address"
            ),
        }
    }

    // The watcher handle must outlive the server.
    let (_watcher, config_updates) = match &args.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            (Some(watcher.run()?), updates)
        }
        None => {
            let (_tx, updates) = mpsc::unbounded_channel();
            (None, updates)
        }
    };

    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());

    let server = HttpServer::from_config(config)?;
    server.run(listener, config_updates, shutdown.subscribe()).await?;

    tracing::info!("shutdown complete");
    Ok(())
}
