//! Standalone management daemon.
//!
//! ```text
//!     mgmt client ──TCP──▶ ┌──────────────────────┐
//!                          │  management server   │ ◀── input statistics
//!                          │  (mgmt-server thread)│
//!                          └─────────┬────────────┘
//!                                    │ config channel
//!                          ┌─────────▼────────────┐
//!     config file ──watch─▶│   control thread     │
//!                          └──────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;

use mux_mgmt::config::watcher::ConfigWatcher;
use mux_mgmt::config::{load_config, MgmtConfig};
use mux_mgmt::control::{ConfigChannel, ConfigDocument};
use mux_mgmt::lifecycle::{shutdown_signal, Supervisor};
use mux_mgmt::observability::{logging, metrics};
use mux_mgmt::server::ManagementServer;
use mux_mgmt::stats::{StatRegistry, StateThresholds};

#[derive(Parser)]
#[command(name = "mux-mgmt")]
#[command(about = "Management server for the broadcast multiplexer", long_about = None)]
struct Args {
    /// TOML configuration file, watched for changes
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen port, overriding the configuration file
    #[arg(short, long)]
    port: Option<u16>,

    /// Initial configuration document (JSON object)
    #[arg(short, long)]
    document: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let file_config = match &args.config {
        Some(path) => load_config(path)?,
        None => MgmtConfig::default(),
    };
    let mut config = file_config.clone();
    if let Some(port) = args.port {
        config.server.port = port;
    }

    logging::init_logging(&config.observability.log_level);
    tracing::info!(
        service = %config.server.service_name,
        version = %config.server.service_version,
        "mux-mgmt starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let live = match &args.document {
        Some(path) => ConfigDocument::parse(&std::fs::read_to_string(path)?)?,
        None => ConfigDocument::new(),
    };

    let registry = Arc::new(StatRegistry::new(StateThresholds::from(&config.inputs)));
    let channel = Arc::new(ConfigChannel::with_document(live.clone()));
    let server = Arc::new(ManagementServer::new(
        config.server.clone(),
        registry,
        channel,
    ));

    let addr = server.start()?;
    tracing::info!(address = %addr, "Listening for management connections");

    let mut supervisor =
        Supervisor::new(Arc::clone(&server), live, config).with_port_override(args.port);

    // Dropping the watcher ends file notifications, so it lives until exit.
    let _watcher = match &args.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path, file_config);
            supervisor = supervisor.with_updates(updates);
            match watcher.run() {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    tracing::error!(error = %e, "Config watcher unavailable, hot reload disabled");
                    None
                }
            }
        }
        None => None,
    };

    let stop = Arc::new(AtomicBool::new(false));
    let control = {
        let stop = Arc::clone(&stop);
        std::thread::Builder::new()
            .name("control".into())
            .spawn(move || supervisor.run(stop))?
    };

    shutdown_signal().await;

    stop.store(true, Ordering::SeqCst);
    tokio::task::spawn_blocking(move || {
        if control.join().is_err() {
            tracing::error!("Control thread panicked");
        }
        server.stop();
    })
    .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
