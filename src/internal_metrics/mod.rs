//! # Internal Metrics Module
//!
//! Call sites record through the `metrics` facade macros directly. This
//! module registers descriptions for every metric the crate emits and, when
//! a listen address is configured, installs the Prometheus recorder and
//! builds the [`MetricsServer`] that exposes `/metrics`.

pub mod server;

pub use server::MetricsServer;

use crate::config::MetricsConfig;
use anyhow::{Context, Result};
use metrics::Unit;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

/// Registers descriptions for all metrics with the global recorder.
pub fn describe() {
    metrics::describe_counter!("outbox_published_total", Unit::Count, "Outbox rows confirmed by the message bus.");
    metrics::describe_counter!("outbox_publish_failures_total", Unit::Count, "Outbox publishes that failed or timed out and were left pending.");
    metrics::describe_counter!("changes_applied_total", Unit::Count, "Changes handled by resolvers, labeled by outcome.");
    metrics::describe_counter!("acks_processed_total", Unit::Count, "Acknowledgments that moved a target to INSYNC.");
    metrics::describe_counter!("queries_total", Unit::Count, "Queries resolved, labeled by outcome.");
    metrics::describe_counter!("firewall_hits_total", Unit::Count, "Queries answered by a firewall rule.");
    metrics::describe_histogram!("apply_duration_seconds", Unit::Seconds, "Time spent applying one change to the local store.");
}

/// Builder for the metrics system.
pub struct MetricsBuilder {
    config: MetricsConfig,
}

impl MetricsBuilder {
    pub fn new(config: MetricsConfig) -> Self {
        Self { config }
    }

    /// Installs the Prometheus recorder and returns the server to spawn, or
    /// `None` when no listen address is configured.
    pub fn build(self, shutdown_rx: watch::Receiver<bool>) -> Result<Option<(MetricsServer, SocketAddr)>> {
        let Some(listen_addr) = self.config.listen_addr else {
            return Ok(None);
        };

        let recorder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0],
            )
            .context("invalid histogram buckets")?
            .build_recorder();
        let handle = recorder.handle();

        // Bind before installing so a port conflict leaves the no-op recorder in place.
        let listener = std::net::TcpListener::bind(listen_addr)
            .with_context(|| format!("failed to bind metrics server to {}", listen_addr))?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;
        let listener = TcpListener::from_std(listener)?;

        metrics::set_global_recorder(recorder)
            .map_err(|e| anyhow::anyhow!("failed to install Prometheus recorder: {}", e))?;
        describe();
        info!(%addr, "Metrics server listening");

        Ok(Some((MetricsServer::new(listener, handle, shutdown_rx), addr)))
    }
}
