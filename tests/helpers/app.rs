//! Test helpers for running a full standalone cluster in-process.

use anyhow::{anyhow, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::{sync::watch, task::JoinHandle, time::timeout};
use zonesync::{
    app::{App, ResolverNode},
    bus::{MemoryBus, MessageBus},
    config::{Config, Role},
    core::{Change, ChangeId, ChangeStatus},
    distributor::{route_key, ChangeSubmitter},
    ledger::{ChangeLedger, InMemoryLedger, SyncStatus},
};

/// A running control plane plus one resolver per roster entry.
pub struct TestCluster {
    pub config: Config,
    pub ledger: Arc<InMemoryLedger>,
    pub bus: Arc<MemoryBus>,
    pub submitter: ChangeSubmitter,
    pub metrics_addr: Option<SocketAddr>,
    resolvers: Vec<ResolverNode>,
    shutdown_tx: watch::Sender<bool>,
    app_handle: Option<JoinHandle<Result<()>>>,
}

impl TestCluster {
    pub fn resolver(&self, server_id: &str) -> &ResolverNode {
        self.resolvers
            .iter()
            .find(|r| r.server_id == server_id)
            .unwrap_or_else(|| panic!("no resolver named {}", server_id))
    }

    pub fn resolvers(&self) -> &[ResolverNode] {
        &self.resolvers
    }

    pub async fn submit(&self, change: Change) -> Result<Change> {
        Ok(self.submitter.submit(change).await?)
    }

    /// Polls the ledger until `id` is INSYNC on every target.
    pub async fn wait_in_sync(&self, id: ChangeId, within: Duration) -> Result<SyncStatus> {
        timeout(within, async {
            loop {
                if let Some(status) = self.ledger.sync_status(id).await? {
                    if status.change.status == ChangeStatus::InSync {
                        return Ok::<_, anyhow::Error>(status);
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .map_err(|_| anyhow!("change {} did not reach INSYNC within {:?}", id, within))?
    }

    /// Submits and waits for convergence.
    pub async fn submit_and_sync(&self, change: Change) -> Result<Change> {
        let change = self.submit(change).await?;
        Ok(self.wait_in_sync(change.id, Duration::from_secs(5)).await?.change)
    }

    /// Signals shutdown and waits for every task to stop.
    pub async fn shutdown(mut self, within: Duration) -> Result<()> {
        self.shutdown_tx.send(true)?;
        if let Some(handle) = self.app_handle.take() {
            match timeout(within, handle).await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => Err(e.into()),
                Err(_) => Err(anyhow!("cluster failed to shut down within {:?}", within)),
            }
        } else {
            Ok(())
        }
    }
}

/// A builder for creating `TestCluster` instances with specific configurations.
pub struct TestClusterBuilder {
    pub config: Config,
    ledger: Arc<InMemoryLedger>,
    bus: Arc<MemoryBus>,
    bus_wrapper: Option<Arc<dyn MessageBus>>,
}

impl TestClusterBuilder {
    pub fn new(servers: &[&str]) -> Self {
        let mut config = Config::default();
        config.node.role = Role::Standalone;
        config.ledger.servers = servers.iter().map(|s| s.to_string()).collect();
        config.distributor.poll_interval_ms = 10;
        config.distributor.publish_timeout_ms = 500;
        config.distributor.redelivery_delay_ms = 10;

        let bus = Arc::new(MemoryBus::new(config.distributor.redelivery_delay()));
        bus.declare_queue(&config.distributor.ack_queue);
        for server in servers {
            bus.declare_queue(&route_key(&config.distributor.route_prefix, server));
        }

        Self {
            config,
            ledger: Arc::new(InMemoryLedger::new()),
            bus,
            bus_wrapper: None,
        }
    }

    pub fn with_config_modifier(mut self, modifier: impl FnOnce(&mut Config)) -> Self {
        modifier(&mut self.config);
        self
    }

    /// Routes all traffic through `wrap(memory_bus)` instead of the bus itself.
    pub fn with_bus_wrapper(mut self, wrap: impl FnOnce(Arc<MemoryBus>) -> Arc<dyn MessageBus>) -> Self {
        self.bus_wrapper = Some(wrap(self.bus.clone()));
        self
    }

    pub async fn start(self) -> Result<TestCluster> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let bus: Arc<dyn MessageBus> = match self.bus_wrapper {
            Some(wrapped) => wrapped,
            None => self.bus.clone(),
        };

        let app = App::builder(self.config.clone())
            .bus_override(bus)
            .ledger_override(self.ledger.clone())
            .build(shutdown_rx)
            .await?;

        let submitter = app
            .submitter()
            .ok_or_else(|| anyhow!("standalone app has no submitter"))?;
        let resolvers = app.resolvers().to_vec();
        let metrics_addr = app.metrics_addr();
        let app_handle = tokio::spawn(app.run());

        Ok(TestCluster {
            config: self.config,
            ledger: self.ledger,
            bus: self.bus,
            submitter,
            metrics_addr,
            resolvers,
            shutdown_tx,
            app_handle: Some(app_handle),
        })
    }
}
