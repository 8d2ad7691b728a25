//! Configuration management for zonesync
//!
//! This module defines the main `Config` struct and its sub-structs. It uses
//! the `figment` crate to layer built-in defaults, a `zonesync.toml` file,
//! `ZONESYNC_`-prefixed environment variables and command-line overrides.

use crate::cli::Cli;
use crate::resolver::FirewallOrder;
use anyhow::{bail, Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "zonesync.toml";

/// The main configuration struct for the application.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    /// The logging level (an `EnvFilter` directive); `RUST_LOG` wins if set.
    pub log_level: String,
    pub node: NodeConfig,
    pub distributor: DistributorConfig,
    pub resolver: ResolverConfig,
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Which halves of the system this process runs.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Outbox poller, acknowledgment listener and ledger maintenance.
    Control,
    /// A single resolver node consuming its own queue.
    Resolver,
    /// Control plane plus one in-process resolver per roster entry.
    Standalone,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct NodeConfig {
    /// This node's identity; resolvers consume `route_prefix + server_id`.
    pub server_id: String,
    pub role: Role,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DistributorConfig {
    pub poll_interval_ms: u64,
    /// Outbox rows published per poll.
    pub batch_size: usize,
    pub publish_timeout_ms: u64,
    /// Queue resolvers publish acknowledgments to.
    pub ack_queue: String,
    /// Prefix of every resolver's queue name.
    pub route_prefix: String,
    /// Delay before a retryable delivery is requeued.
    pub redelivery_delay_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ResolverConfig {
    /// Snapshot file for the authoritative store; in-memory only when unset.
    pub store_path: Option<PathBuf>,
    pub firewall_order: FirewallOrder,
    /// Number of applied change IDs remembered for duplicate suppression.
    pub applied_cache_size: u64,
    pub applied_cache_ttl_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LedgerConfig {
    /// The known resolver roster.
    pub servers: Vec<String>,
    pub purge_interval_seconds: u64,
    /// How long fully synchronized changes are kept.
    pub retain_synced_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct MetricsConfig {
    /// Serve Prometheus metrics on this address when set.
    pub listen_addr: Option<SocketAddr>,
}

impl DistributorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    pub fn redelivery_delay(&self) -> Duration {
        Duration::from_millis(self.redelivery_delay_ms)
    }
}

impl Config {
    /// Loads the configuration by layering defaults, the TOML file, the
    /// environment and the command line, then validates it.
    pub fn load(cli: &Cli) -> Result<Self> {
        let path = cli
            .config
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        if cli.config.is_some() && !path.exists() {
            bail!("configuration file {} does not exist", path.display());
        }
        Self::figment(&path)
            .merge(cli.clone())
            .extract::<Config>()
            .context("failed to load configuration")
            .and_then(Config::validated)
    }

    /// Loads from a file and the environment only.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::figment(path.as_ref())
            .extract::<Config>()
            .with_context(|| format!("failed to load configuration from {}", path.as_ref().display()))
            .and_then(Config::validated)
    }

    fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            // e.g. ZONESYNC_NODE__SERVER_ID=ns1
            .merge(Env::prefixed("ZONESYNC_").split("__"))
    }

    fn validated(self) -> Result<Self> {
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.node.server_id.trim().is_empty() {
            bail!("node.server_id must not be empty");
        }
        if self.distributor.batch_size == 0 {
            bail!("distributor.batch_size must be greater than zero");
        }
        if self.distributor.poll_interval_ms == 0 {
            bail!("distributor.poll_interval_ms must be greater than zero");
        }
        if self.node.role != Role::Resolver && self.ledger.servers.is_empty() {
            bail!("ledger.servers must list at least one resolver for the {:?} role", self.node.role);
        }
        if let Some(dup) = self.ledger.servers.iter().duplicates().next() {
            bail!("ledger.servers lists '{}' more than once", dup);
        }
        if self.resolver.applied_cache_size == 0 {
            bail!("resolver.applied_cache_size must be greater than zero");
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            node: NodeConfig {
                server_id: "local".to_string(),
                role: Role::Standalone,
            },
            distributor: DistributorConfig {
                poll_interval_ms: 1000,
                batch_size: 100,
                publish_timeout_ms: 5000,
                ack_queue: "zonesync.acks".to_string(),
                route_prefix: "zonesync.node.".to_string(),
                redelivery_delay_ms: 250,
            },
            resolver: ResolverConfig {
                store_path: None,
                firewall_order: FirewallOrder::BeforeZone,
                applied_cache_size: 10_000,
                applied_cache_ttl_seconds: 3600,
            },
            ledger: LedgerConfig {
                servers: vec!["local".to_string()],
                purge_interval_seconds: 300,
                retain_synced_seconds: 86_400,
            },
            metrics: MetricsConfig::default(),
        }
    }
}
