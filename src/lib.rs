//! zonesync - reliable distribution of DNS zone and firewall changes
//!
//! A control plane records every change in a transactional ledger together
//! with one outbox row per target resolver. A poller publishes the outbox to
//! per-resolver queues, resolvers apply changes idempotently to their local
//! authoritative store and acknowledge, and the ledger tracks each target
//! from PENDING through SENT to INSYNC.

pub mod app;
pub mod bus;
pub mod cli;
pub mod codec;
pub mod config;
pub mod core;
pub mod distributor;
pub mod firewall;
pub mod internal_metrics;
pub mod ledger;
pub mod names;
pub mod resolver;
pub mod store;
pub mod task_manager;
pub mod trie;

// Re-export core types for convenience
pub use core::*;
