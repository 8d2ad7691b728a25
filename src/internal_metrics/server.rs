//! # Metrics Server
//!
//! An `axum` server exposing `/metrics` in the Prometheus exposition format
//! until the shutdown signal fires.

use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::future::Future;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, trace};

pub struct MetricsServer {
    listener: TcpListener,
    prom_handle: PrometheusHandle,
    shutdown_rx: watch::Receiver<bool>,
}

impl MetricsServer {
    pub fn new(
        listener: TcpListener,
        prom_handle: PrometheusHandle,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            listener,
            prom_handle,
            shutdown_rx,
        }
    }

    /// Returns a future that serves until a shutdown signal is received.
    pub fn run(mut self) -> impl Future<Output = ()> {
        let handle = self.prom_handle.clone();
        let app = Router::new().route(
            "/metrics",
            get(move || {
                let handle = handle.clone();
                async move { handle.render() }
            }),
        );

        async move {
            tokio::select! {
                biased;
                _ = self.shutdown_rx.changed() => {
                    trace!("Metrics server received shutdown signal.");
                }
                result = axum::serve(self.listener, app.into_make_service()) => {
                    if let Err(e) = result {
                        error!(error = %e, "Metrics server error");
                    }
                }
            }
            trace!("Metrics server task finished.");
        }
    }
}
