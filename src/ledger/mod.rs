//! Control-plane bookkeeping of what every resolver must eventually apply.
//!
//! The ledger is the single source of truth for "has this target seen this
//! change". A change, one target row per resolver and one outbox row per
//! target are always written in a single transaction, so a change can never
//! be recorded without being queued or queued without being recorded.
//!
//! The relational store behind the ledger is an external collaborator; this
//! module defines the contract ([`ChangeLedger`]) and ships an in-memory
//! implementation with the same transactional guarantees ([`InMemoryLedger`]).

pub mod memory;

pub use memory::{InMemoryLedger, LedgerFault};

use crate::core::{Change, ChangeId, ChangeTarget, OutboxMessage, ServerId, TargetStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("change {0} not found")]
    ChangeNotFound(ChangeId),

    #[error("change {change_id} has no target '{server_id}'")]
    TargetNotFound {
        change_id: ChangeId,
        server_id: ServerId,
    },

    #[error("a change needs at least one target")]
    NoTargets,

    #[error("failed to encode change payload: {0}")]
    Encode(String),

    /// The backing store failed; the whole transaction was rolled back.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

impl LedgerError {
    /// Returns `true` for infrastructure failures worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Unavailable(_))
    }
}

/// Where one target's copy of a change should be delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTarget {
    pub server_id: ServerId,
    pub route_key: String,
}

/// Outcome of a status transition request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusUpdate {
    /// The target moved forward.
    Advanced,
    /// The target was already at or past the requested status.
    Unchanged,
}

/// Aggregate and per-target status of one change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    pub change: Change,
    pub targets: Vec<ChangeTarget>,
}

#[async_trait]
pub trait ChangeLedger: Send + Sync {
    /// Adds a resolver to the roster that future changes fan out to.
    async fn register_server(&self, server_id: &str) -> Result<(), LedgerError>;

    /// Returns the current resolver roster.
    async fn servers(&self) -> Result<Vec<ServerId>, LedgerError>;

    /// Atomically writes the change, one target per entry in `targets` and
    /// the matching outbox rows. Returns the change with its assigned ID.
    async fn create_change(&self, change: Change, targets: &[NewTarget]) -> Result<Change, LedgerError>;

    async fn get_change(&self, id: ChangeId) -> Result<Option<Change>, LedgerError>;

    /// Changes with at least one target not yet in sync, oldest first.
    async fn changes_with_pending_targets(&self) -> Result<Vec<Change>, LedgerError>;

    /// Targets of `id` that are not yet in sync.
    async fn pending_targets_for_change(&self, id: ChangeId) -> Result<Vec<ChangeTarget>, LedgerError>;

    async fn sync_status(&self, id: ChangeId) -> Result<Option<SyncStatus>, LedgerError>;

    /// Moves a target forward (PENDING → SENT → INSYNC). Requests that would
    /// move it backwards or sideways are no-ops.
    async fn update_change_target_status(
        &self,
        id: ChangeId,
        server_id: &str,
        status: TargetStatus,
    ) -> Result<StatusUpdate, LedgerError>;

    /// Up to `limit` unpublished outbox rows, oldest change first.
    async fn pending_outbox(&self, limit: usize) -> Result<Vec<OutboxMessage>, LedgerError>;

    /// Deletes a published outbox row and marks its target SENT, in one transaction.
    async fn mark_published(&self, outbox_id: u64) -> Result<(), LedgerError>;

    /// Deletes fully synchronized changes whose last acknowledgment is older
    /// than `older_than`. Returns the number of changes removed.
    async fn purge_synced(&self, older_than: DateTime<Utc>) -> Result<usize, LedgerError>;
}

/// Periodically deletes changes that every target acknowledged long enough ago.
pub struct SyncedChangePurger {
    ledger: Arc<dyn ChangeLedger>,
    interval: Duration,
    retain: Duration,
}

impl SyncedChangePurger {
    pub fn new(ledger: Arc<dyn ChangeLedger>, interval: Duration, retain: Duration) -> Self {
        Self {
            ledger,
            interval,
            retain,
        }
    }

    pub async fn purge_once(&self) -> Result<usize, LedgerError> {
        let retain = chrono::Duration::from_std(self.retain).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(retain)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.ledger.purge_synced(cutoff).await
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // Skip the immediate first tick.
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    info!("Ledger purger received shutdown signal.");
                    break;
                }
                _ = ticker.tick() => match self.purge_once().await {
                    Ok(0) => {}
                    Ok(purged) => debug!(purged, "Purged synchronized changes"),
                    Err(e) => warn!(error = %e, "Ledger purge failed"),
                },
            }
        }
    }
}
