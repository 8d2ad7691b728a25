//! Command-Line Interface (CLI) argument parsing.
//!
//! Arguments are parsed at startup and merged over the configuration file and
//! environment; `Cli` is itself a figment [`Provider`] for that purpose.

use clap::Parser;
use figment::{
    value::{Dict, Map, Value},
    Error, Metadata, Profile, Provider,
};
use std::path::PathBuf;

/// Zone and firewall change distribution for authoritative DNS resolvers.
#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// This node's server ID.
    #[arg(long, value_name = "ID")]
    pub server_id: Option<String>,

    /// Process role: control, resolver or standalone.
    #[arg(long, value_name = "ROLE")]
    pub role: Option<String>,

    /// Snapshot file for the resolver's authoritative store.
    #[arg(long, value_name = "FILE")]
    pub store_path: Option<PathBuf>,

    /// Outbox poll interval in milliseconds.
    #[arg(long, value_name = "MS")]
    pub poll_interval_ms: Option<u64>,

    /// Log level filter, e.g. `debug` or `zonesync=trace`.
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Address to serve Prometheus metrics on.
    #[arg(long, value_name = "ADDR")]
    pub metrics_addr: Option<String>,
}

impl Provider for Cli {
    fn metadata(&self) -> Metadata {
        Metadata::named("Command-Line Arguments")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, Error> {
        let mut root = Dict::new();
        let mut node = Dict::new();
        let mut distributor = Dict::new();
        let mut resolver = Dict::new();
        let mut metrics = Dict::new();

        if let Some(level) = &self.log_level {
            root.insert("log_level".into(), Value::from(level.clone()));
        }
        if let Some(id) = &self.server_id {
            node.insert("server_id".into(), Value::from(id.clone()));
        }
        if let Some(role) = &self.role {
            node.insert("role".into(), Value::from(role.to_ascii_lowercase()));
        }
        if let Some(path) = &self.store_path {
            resolver.insert("store_path".into(), Value::from(path.display().to_string()));
        }
        if let Some(ms) = self.poll_interval_ms {
            distributor.insert("poll_interval_ms".into(), Value::from(ms));
        }
        if let Some(addr) = &self.metrics_addr {
            metrics.insert("listen_addr".into(), Value::from(addr.clone()));
        }

        for (section, dict) in [
            ("node", node),
            ("distributor", distributor),
            ("resolver", resolver),
            ("metrics", metrics),
        ] {
            if !dict.is_empty() {
                root.insert(section.into(), Value::from(dict));
            }
        }

        let mut map = Map::new();
        map.insert(Profile::Default, root);
        Ok(map)
    }
}
