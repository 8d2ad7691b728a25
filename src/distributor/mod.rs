//! Reliable change distribution between the control plane and resolvers.
//!
//! - [`ChangeSubmitter`] records a change for every known resolver.
//! - [`OutboxPoller`] drains the ledger's outbox onto the bus.
//! - [`ChangeReceiver`] applies delivered changes on a resolver and acknowledges them.
//! - [`AckListener`] turns acknowledgments into INSYNC target rows.
//!
//! Delivery is at-least-once end to end. A message can be published, applied
//! and acknowledged any number of times; the ledger status machine and the
//! idempotent apply routine absorb the duplicates.

pub mod ack;
pub mod outbox;
pub mod receiver;

pub use ack::AckListener;
pub use outbox::{OutboxPoller, PollStats};
pub use receiver::ChangeReceiver;

use crate::core::Change;
use crate::ledger::{ChangeLedger, LedgerError, NewTarget};
use std::sync::Arc;
use tracing::info;

/// Builds the route key (queue name) for a resolver.
pub fn route_key(prefix: &str, server_id: &str) -> String {
    format!("{}{}", prefix, server_id)
}

/// Entry point for mutations: records a change addressed to the current roster.
#[derive(Clone)]
pub struct ChangeSubmitter {
    ledger: Arc<dyn ChangeLedger>,
    route_prefix: String,
}

impl ChangeSubmitter {
    pub fn new(ledger: Arc<dyn ChangeLedger>, route_prefix: impl Into<String>) -> Self {
        Self {
            ledger,
            route_prefix: route_prefix.into(),
        }
    }

    /// Records `change` with one target per server on the roster right now.
    /// Servers registered later never receive it through this path.
    pub async fn submit(&self, change: Change) -> Result<Change, LedgerError> {
        let targets: Vec<NewTarget> = self
            .ledger
            .servers()
            .await?
            .into_iter()
            .map(|server_id| NewTarget {
                route_key: route_key(&self.route_prefix, &server_id),
                server_id,
            })
            .collect();

        let change = self.ledger.create_change(change, &targets).await?;
        info!(
            change_id = %change.id,
            subject = %change.subject(),
            targets = targets.len(),
            "Change submitted"
        );
        Ok(change)
    }
}
