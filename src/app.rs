//! The main application logic, decoupled from the entry point.

use crate::{
    bus::{MemoryBus, MessageBus, MessageHandler},
    codec::{RrCodec, TextRrCodec},
    config::{Config, Role},
    distributor::{route_key, AckListener, ChangeReceiver, ChangeSubmitter, OutboxPoller},
    internal_metrics::{self, MetricsBuilder},
    ledger::{ChangeLedger, InMemoryLedger, SyncedChangePurger},
    resolver::{ChangeApplier, QueryEngine, ResolverState},
    store::AuthoritativeStore,
    task_manager::TaskManager,
};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Barrier};
use tracing::{error, info, instrument};

/// One resolver node hosted by this process.
#[derive(Clone, Debug)]
pub struct ResolverNode {
    pub server_id: String,
    pub state: Arc<ResolverState>,
    pub query: QueryEngine,
}

/// A handle to the running application.
pub struct App {
    task_manager: TaskManager,
    metrics_addr: Option<SocketAddr>,
    startup_barrier: Option<Arc<Barrier>>,
    ledger: Arc<dyn ChangeLedger>,
    submitter: Option<ChangeSubmitter>,
    resolvers: Vec<ResolverNode>,
}

impl App {
    pub fn builder(config: Config) -> AppBuilder {
        AppBuilder::new(config)
    }

    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.metrics_addr
    }

    pub fn ledger(&self) -> Arc<dyn ChangeLedger> {
        self.ledger.clone()
    }

    /// The change entry point; `None` on a resolver-only process.
    pub fn submitter(&self) -> Option<ChangeSubmitter> {
        self.submitter.clone()
    }

    pub fn resolvers(&self) -> &[ResolverNode] {
        &self.resolvers
    }

    pub fn resolver(&self, server_id: &str) -> Option<ResolverNode> {
        self.resolvers.iter().find(|r| r.server_id == server_id).cloned()
    }

    /// Waits for the shutdown signal and then gracefully shuts down all tasks.
    pub async fn run(self) -> Result<()> {
        if let Some(barrier) = &self.startup_barrier {
            barrier.wait().await;
        }

        let mut shutdown_rx = self.task_manager.get_shutdown_rx();
        if !*shutdown_rx.borrow() {
            shutdown_rx.changed().await.ok();
        }
        info!("Shutdown signal received. Waiting for tasks to complete...");

        self.task_manager.shutdown().await;
        info!("All tasks shut down.");
        Ok(())
    }
}

/// Builder for the main application.
///
/// The bus, ledger and codec default to the in-process implementations and
/// can be replaced, which is how tests observe or sabotage them.
pub struct AppBuilder {
    config: Config,
    bus_override: Option<Arc<dyn MessageBus>>,
    ledger_override: Option<Arc<dyn ChangeLedger>>,
    codec_override: Option<Arc<dyn RrCodec>>,
    startup_barrier: Option<Arc<Barrier>>,
}

impl AppBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            bus_override: None,
            ledger_override: None,
            codec_override: None,
            startup_barrier: None,
        }
    }

    /// Uses `bus` instead of a private [`MemoryBus`]. Queues on a
    /// caller-supplied bus must already exist or be declared by consumers.
    pub fn bus_override(mut self, bus: Arc<dyn MessageBus>) -> Self {
        self.bus_override = Some(bus);
        self
    }

    pub fn ledger_override(mut self, ledger: Arc<dyn ChangeLedger>) -> Self {
        self.ledger_override = Some(ledger);
        self
    }

    pub fn codec_override(mut self, codec: Arc<dyn RrCodec>) -> Self {
        self.codec_override = Some(codec);
        self
    }

    pub fn startup_barrier(mut self, barrier: Arc<Barrier>) -> Self {
        self.startup_barrier = Some(barrier);
        self
    }

    /// Builds all components for the configured role and spawns their loops.
    #[instrument(skip_all, fields(role = ?self.config.node.role, server_id = %self.config.node.server_id))]
    pub async fn build(self, shutdown_rx: watch::Receiver<bool>) -> Result<App> {
        let config = self.config;
        config.validate()?;
        let task_manager = TaskManager::new(shutdown_rx);

        // =========================================================================
        // Metrics
        // =========================================================================
        let metrics_addr = match MetricsBuilder::new(config.metrics.clone()).build(task_manager.get_shutdown_rx())? {
            Some((server, addr)) => {
                task_manager.spawn("MetricsServer", server.run());
                Some(addr)
            }
            None => {
                internal_metrics::describe();
                None
            }
        };

        // =========================================================================
        // Shared collaborators
        // =========================================================================
        let dist = &config.distributor;
        let resolver_ids: Vec<String> = match config.node.role {
            Role::Control => Vec::new(),
            Role::Resolver => vec![config.node.server_id.clone()],
            Role::Standalone => config.ledger.servers.clone(),
        };

        let bus: Arc<dyn MessageBus> = match self.bus_override {
            Some(bus) => bus,
            None => {
                let bus = MemoryBus::new(dist.redelivery_delay());
                bus.declare_queue(&dist.ack_queue);
                for server_id in config.ledger.servers.iter().chain(&resolver_ids) {
                    bus.declare_queue(&route_key(&dist.route_prefix, server_id));
                }
                Arc::new(bus)
            }
        };

        let ledger: Arc<dyn ChangeLedger> = self
            .ledger_override
            .unwrap_or_else(|| Arc::new(InMemoryLedger::new()));
        for server_id in &config.ledger.servers {
            ledger
                .register_server(server_id)
                .await
                .with_context(|| format!("failed to register server '{}'", server_id))?;
        }

        let codec: Arc<dyn RrCodec> = self.codec_override.unwrap_or_else(|| Arc::new(TextRrCodec));

        // =========================================================================
        // Control plane
        // =========================================================================
        let submitter = if config.node.role == Role::Resolver {
            None
        } else {
            let poller = OutboxPoller::new(ledger.clone(), bus.clone(), dist.ack_queue.clone())
                .with_batch_size(dist.batch_size)
                .with_poll_interval(dist.poll_interval())
                .with_publish_timeout(dist.publish_timeout());
            task_manager.spawn("OutboxPoller", poller.run(task_manager.get_shutdown_rx()));

            let ack_listener: Arc<dyn MessageHandler> = Arc::new(AckListener::new(ledger.clone()));
            spawn_consumer(&task_manager, bus.clone(), dist.ack_queue.clone(), ack_listener, "AckListener".to_string());

            let purger = SyncedChangePurger::new(
                ledger.clone(),
                Duration::from_secs(config.ledger.purge_interval_seconds.max(1)),
                Duration::from_secs(config.ledger.retain_synced_seconds),
            );
            task_manager.spawn("LedgerPurger", purger.run(task_manager.get_shutdown_rx()));

            Some(ChangeSubmitter::new(ledger.clone(), dist.route_prefix.clone()))
        };

        // =========================================================================
        // Resolver nodes
        // =========================================================================
        let mut resolvers = Vec::with_capacity(resolver_ids.len());
        for server_id in resolver_ids {
            let store = match &config.resolver.store_path {
                Some(path) => {
                    let path = node_store_path(path, &server_id, config.node.role);
                    AuthoritativeStore::open(&path)
                        .with_context(|| format!("failed to open store at {}", path.display()))?
                }
                None => AuthoritativeStore::in_memory(),
            };
            let state = Arc::new(
                ResolverState::load(Arc::new(store))
                    .with_context(|| format!("failed to load resolver state for '{}'", server_id))?,
            );

            let applier = Arc::new(ChangeApplier::new(state.clone(), codec.clone()));
            let receiver: Arc<dyn MessageHandler> = Arc::new(ChangeReceiver::new(
                server_id.clone(),
                applier,
                bus.clone(),
                config.resolver.applied_cache_size,
                Duration::from_secs(config.resolver.applied_cache_ttl_seconds),
            ));
            spawn_consumer(
                &task_manager,
                bus.clone(),
                route_key(&dist.route_prefix, &server_id),
                receiver,
                format!("ChangeReceiver[{}]", server_id),
            );

            resolvers.push(ResolverNode {
                query: QueryEngine::new(state.clone(), config.resolver.firewall_order),
                server_id,
                state,
            });
        }

        info!(
            tasks = task_manager.len(),
            resolvers = resolvers.len(),
            "Application built"
        );

        Ok(App {
            task_manager,
            metrics_addr,
            startup_barrier: self.startup_barrier,
            ledger,
            submitter,
            resolvers,
        })
    }
}

fn spawn_consumer(
    task_manager: &TaskManager,
    bus: Arc<dyn MessageBus>,
    queue: String,
    handler: Arc<dyn MessageHandler>,
    task_name: String,
) {
    let shutdown_rx = task_manager.get_shutdown_rx();
    task_manager.spawn(task_name, async move {
        if let Err(e) = bus.consume(&queue, handler, shutdown_rx).await {
            error!(queue = %queue, error = %e, "Consumer stopped");
        }
    });
}

/// In standalone mode every hosted node gets its own snapshot file next to
/// the configured one, e.g. `store.json` becomes `store.ns1.json`.
fn node_store_path(path: &Path, server_id: &str, role: Role) -> PathBuf {
    if role != Role::Standalone {
        return path.to_path_buf();
    }
    let extension = path
        .extension()
        .map(|ext| format!("{}.{}", server_id, ext.to_string_lossy()))
        .unwrap_or_else(|| server_id.to_string());
    path.with_extension(extension)
}
