//! An in-memory [`ChangeLedger`] with all-or-nothing transactions.
//!
//! Every mutating call runs against a staged copy of the tables that replaces
//! the live tables only when the whole call succeeds.

use super::{ChangeLedger, LedgerError, NewTarget, StatusUpdate, SyncStatus};
use crate::core::{
    Change, ChangeId, ChangeStatus, ChangeTarget, OutboxMessage, ServerId, TargetStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::debug;

/// Points inside `create_change` where an injected failure can abort the
/// transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerFault {
    AfterChangeRow,
    AfterTargetRows,
    AfterOutboxRows,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    next_change_id: u64,
    next_outbox_id: u64,
    servers: BTreeSet<ServerId>,
    changes: BTreeMap<ChangeId, Change>,
    targets: BTreeMap<ChangeId, BTreeMap<ServerId, ChangeTarget>>,
    outbox: BTreeMap<u64, OutboxMessage>,
}

#[derive(Debug, Default)]
pub struct InMemoryLedger {
    tables: Mutex<Tables>,
    fault: Mutex<Option<LedgerFault>>,
    unavailable: AtomicBool,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a ledger with `servers` already on the roster.
    pub fn with_servers<I, S>(servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ServerId>,
    {
        let ledger = Self::new();
        ledger.lock().servers = servers.into_iter().map(Into::into).collect();
        ledger
    }

    /// Arms a one-shot failure at `fault` for the next `create_change`.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn inject_fault(&self, fault: LedgerFault) {
        *self.fault.lock().unwrap_or_else(PoisonError::into_inner) = Some(fault);
    }

    /// Simulates the backing database going away (or coming back).
    #[cfg(any(test, feature = "test-utils"))]
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Number of outbox rows, published or not yet.
    pub fn outbox_len(&self) -> usize {
        self.lock().outbox.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_fault(&self, point: LedgerFault) -> Result<(), LedgerError> {
        let mut fault = self.fault.lock().unwrap_or_else(PoisonError::into_inner);
        if *fault == Some(point) {
            *fault = None;
            return Err(LedgerError::Unavailable(format!("injected fault at {:?}", point)));
        }
        Ok(())
    }

    fn check_available(&self) -> Result<(), LedgerError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("database unreachable".to_string()));
        }
        Ok(())
    }

    fn read<R>(&self, f: impl FnOnce(&Tables) -> R) -> Result<R, LedgerError> {
        self.check_available()?;
        Ok(f(&self.lock()))
    }

    fn transaction<R>(
        &self,
        f: impl FnOnce(&mut Tables) -> Result<R, LedgerError>,
    ) -> Result<R, LedgerError> {
        self.check_available()?;
        let mut live = self.lock();
        let mut staged = live.clone();
        let result = f(&mut staged)?;
        *live = staged;
        Ok(result)
    }
}

#[async_trait]
impl ChangeLedger for InMemoryLedger {
    async fn register_server(&self, server_id: &str) -> Result<(), LedgerError> {
        self.transaction(|t| {
            t.servers.insert(server_id.to_string());
            Ok(())
        })
    }

    async fn servers(&self) -> Result<Vec<ServerId>, LedgerError> {
        self.read(|t| t.servers.iter().cloned().collect())
    }

    async fn create_change(&self, change: Change, targets: &[NewTarget]) -> Result<Change, LedgerError> {
        if targets.is_empty() {
            return Err(LedgerError::NoTargets);
        }
        self.transaction(|t| {
            t.next_change_id += 1;
            let mut change = change;
            change.id = ChangeId(t.next_change_id);
            change.status = ChangeStatus::Pending;
            t.changes.insert(change.id, change.clone());
            self.check_fault(LedgerFault::AfterChangeRow)?;

            let rows = t.targets.entry(change.id).or_default();
            for target in targets {
                rows.insert(
                    target.server_id.clone(),
                    ChangeTarget {
                        change_id: change.id,
                        server_id: target.server_id.clone(),
                        status: TargetStatus::Pending,
                        synced_at: None,
                    },
                );
            }
            self.check_fault(LedgerFault::AfterTargetRows)?;

            let payload = change
                .encode()
                .map_err(|e| LedgerError::Encode(e.to_string()))?;
            for target in targets {
                t.next_outbox_id += 1;
                t.outbox.insert(
                    t.next_outbox_id,
                    OutboxMessage {
                        id: t.next_outbox_id,
                        change_id: change.id,
                        server_id: target.server_id.clone(),
                        route_key: target.route_key.clone(),
                        payload: payload.clone(),
                    },
                );
            }
            self.check_fault(LedgerFault::AfterOutboxRows)?;

            debug!(change_id = %change.id, targets = targets.len(), "Change recorded");
            Ok(change)
        })
    }

    async fn get_change(&self, id: ChangeId) -> Result<Option<Change>, LedgerError> {
        self.read(|t| t.changes.get(&id).cloned())
    }

    async fn changes_with_pending_targets(&self) -> Result<Vec<Change>, LedgerError> {
        self.read(|t| {
            let mut pending: Vec<Change> = t
                .changes
                .values()
                .filter(|c| c.status == ChangeStatus::Pending)
                .cloned()
                .collect();
            pending.sort_by_key(|c| (c.submitted_at, c.id));
            pending
        })
    }

    async fn pending_targets_for_change(&self, id: ChangeId) -> Result<Vec<ChangeTarget>, LedgerError> {
        self.read(|t| {
            t.targets
                .get(&id)
                .map(|rows| {
                    rows.values()
                        .filter(|r| r.status != TargetStatus::InSync)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        })
    }

    async fn sync_status(&self, id: ChangeId) -> Result<Option<SyncStatus>, LedgerError> {
        self.read(|t| {
            t.changes.get(&id).map(|change| SyncStatus {
                change: change.clone(),
                targets: t
                    .targets
                    .get(&id)
                    .map(|rows| rows.values().cloned().collect())
                    .unwrap_or_default(),
            })
        })
    }

    async fn update_change_target_status(
        &self,
        id: ChangeId,
        server_id: &str,
        status: TargetStatus,
    ) -> Result<StatusUpdate, LedgerError> {
        self.transaction(|t| {
            let rows = t.targets.get_mut(&id).ok_or(LedgerError::ChangeNotFound(id))?;
            let target = rows
                .get_mut(server_id)
                .ok_or_else(|| LedgerError::TargetNotFound {
                    change_id: id,
                    server_id: server_id.to_string(),
                })?;

            if status <= target.status {
                return Ok(StatusUpdate::Unchanged);
            }
            target.status = status;
            if status == TargetStatus::InSync {
                target.synced_at = Some(Utc::now());
            }

            if rows.values().all(|r| r.status == TargetStatus::InSync) {
                if let Some(change) = t.changes.get_mut(&id) {
                    change.status = ChangeStatus::InSync;
                    debug!(change_id = %id, "All targets in sync");
                }
            }
            Ok(StatusUpdate::Advanced)
        })
    }

    async fn pending_outbox(&self, limit: usize) -> Result<Vec<OutboxMessage>, LedgerError> {
        self.read(|t| {
            let mut rows: Vec<&OutboxMessage> = t.outbox.values().collect();
            rows.sort_by_key(|m| {
                let submitted = t.changes.get(&m.change_id).map(|c| c.submitted_at);
                (submitted, m.change_id, m.id)
            });
            rows.into_iter().take(limit).cloned().collect()
        })
    }

    async fn mark_published(&self, outbox_id: u64) -> Result<(), LedgerError> {
        self.transaction(|t| {
            let Some(message) = t.outbox.remove(&outbox_id) else {
                return Ok(());
            };
            if let Some(target) = t
                .targets
                .get_mut(&message.change_id)
                .and_then(|rows| rows.get_mut(&message.server_id))
            {
                if target.status < TargetStatus::Sent {
                    target.status = TargetStatus::Sent;
                }
            }
            Ok(())
        })
    }

    async fn purge_synced(&self, older_than: DateTime<Utc>) -> Result<usize, LedgerError> {
        self.transaction(|t| {
            let expired: Vec<ChangeId> = t
                .changes
                .values()
                .filter(|c| c.status == ChangeStatus::InSync)
                .filter(|c| {
                    t.targets
                        .get(&c.id)
                        .and_then(|rows| rows.values().filter_map(|r| r.synced_at).max())
                        .map_or(true, |last| last < older_than)
                })
                .map(|c| c.id)
                .collect();

            for id in &expired {
                t.changes.remove(id);
                t.targets.remove(id);
            }
            t.outbox.retain(|_, m| !expired.contains(&m.change_id));
            Ok(expired.len())
        })
    }
}
