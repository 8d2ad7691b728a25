//! zonesyncd - DNS zone and firewall change distribution daemon
//!
//! Runs the control plane, one resolver node, or both in a single process
//! depending on `node.role`.

use anyhow::Result;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use zonesync::{app::App, cli::Cli, config::Config};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration by layering sources: defaults, file, environment, and CLI args.
    let config = match Config::load(&cli) {
        Ok(config) => config,
        Err(err) => {
            tracing_subscriber::fmt().with_env_filter(EnvFilter::new("error")).init();
            error!("Failed to load configuration: {:#}", err);
            std::process::exit(1);
        }
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    info!("zonesync starting up...");
    info!("-------------------- Configuration --------------------");
    info!("Server ID: {}", config.node.server_id);
    info!("Role: {:?}", config.node.role);
    info!("Roster: {}", config.ledger.servers.join(", "));
    info!("Poll Interval: {}ms", config.distributor.poll_interval_ms);
    info!("Batch Size: {}", config.distributor.batch_size);
    info!("Ack Queue: {}", config.distributor.ack_queue);
    match &config.resolver.store_path {
        Some(path) => info!("Store Path: {}", path.display()),
        None => info!("Store Path: in-memory"),
    }
    info!("Firewall Order: {:?}", config.resolver.firewall_order);
    info!("-------------------------------------------------------");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let app = App::builder(config).build(shutdown_rx).await?;
    if let Some(addr) = app.metrics_addr() {
        info!("Metrics available at http://{}/metrics", addr);
    }

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
        }
        info!("Shutdown signal received. Shutting down gracefully...");
        let _ = shutdown_tx.send(true);
    });

    app.run().await?;
    info!("All tasks shut down. Exiting.");
    Ok(())
}
