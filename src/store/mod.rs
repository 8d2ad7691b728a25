//! The resolver-local authoritative store.
//!
//! An ordered key-value map holding zone markers, encoded record sets and
//! firewall rules (see [`key`] for the layout). It is owned by exactly one
//! resolver process: the change-application task is the only writer, while
//! any number of query tasks read concurrently.
//!
//! Writes go through [`Batch`] / [`ZoneTransaction`] and are applied
//! atomically. When a snapshot path is configured, each commit first writes
//! the complete post-commit state to a temporary file and renames it into
//! place; only then is the in-memory map swapped, so a failed write leaves
//! both the file and the readers' view untouched.

pub mod key;
pub mod transaction;

pub use transaction::{Batch, ZoneTransaction};

use crate::codec::WireRecord;
use crate::core::{ChangeId, RecordType, RuleId};
use crate::firewall::StoredRule;
use futures::stream::{self, Stream, StreamExt};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{debug, warn};
use transaction::{encode_change_id, Op};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to persist store snapshot: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode store value: {0}")]
    Serialization(String),

    #[error("corrupt value at key '{key}': {reason}")]
    Corrupt { key: String, reason: String },

    #[error("commit failed (injected)")]
    Injected,

    #[error("subscriber fell behind and missed {0} events")]
    Lagged(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Put,
    Delete,
}

/// One key-level change observed by a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEvent {
    pub key: String,
    /// The new value for `Put`; empty for `Delete`.
    pub value: Vec<u8>,
    pub event_type: EventType,
}

type Map = BTreeMap<String, Vec<u8>>;

pub struct AuthoritativeStore {
    data: RwLock<Map>,
    events: broadcast::Sender<StoreEvent>,
    snapshot_path: Option<PathBuf>,
    injected_failures: AtomicUsize,
}

impl std::fmt::Debug for AuthoritativeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthoritativeStore")
            .field("snapshot_path", &self.snapshot_path)
            .finish_non_exhaustive()
    }
}

impl AuthoritativeStore {
    /// Creates an empty, purely in-memory store.
    pub fn in_memory() -> Self {
        Self::with_data(Map::new(), None)
    }

    /// Opens a store persisted at `path`, loading the existing snapshot if
    /// there is one.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let data = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
                key: path.display().to_string(),
                reason: e.to_string(),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), keys = data.len(), "Opened authoritative store");
        Ok(Self::with_data(data, Some(path)))
    }

    fn with_data(data: Map, snapshot_path: Option<PathBuf>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            data: RwLock::new(data),
            events,
            snapshot_path,
            injected_failures: AtomicUsize::new(0),
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.read().get(key).cloned()
    }

    /// Returns every entry whose key starts with `prefix`, in key order.
    pub fn scan_prefix(&self, prefix: &str) -> Vec<(String, Vec<u8>)> {
        let data = self.read();
        scan(&data, prefix)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn zone_exists(&self, zone: &str) -> bool {
        self.read().contains_key(&key::zone_marker(zone))
    }

    /// Lists the zones that currently have a marker.
    pub fn zones(&self) -> Vec<String> {
        let data = self.read();
        scan(&data, key::ZONE_PREFIX)
            .filter_map(|(k, _)| key::parse_zone_marker(k).map(str::to_string))
            .collect()
    }

    /// Looks up the record set stored at (zone, name, type).
    ///
    /// A missing set is `Ok(None)`; only an undecodable value is an error.
    pub fn get_record_set(
        &self,
        zone: &str,
        name: &str,
        record_type: RecordType,
    ) -> Result<Option<Vec<WireRecord>>, StoreError> {
        let key = key::rrset(zone, name, record_type);
        match self.get(&key) {
            Some(bytes) => decode(&key, &bytes).map(Some),
            None => Ok(None),
        }
    }

    pub fn firewall_rule(&self, id: RuleId) -> Result<Option<StoredRule>, StoreError> {
        let key = key::firewall_rule(id);
        match self.get(&key) {
            Some(bytes) => decode(&key, &bytes).map(Some),
            None => Ok(None),
        }
    }

    /// The newest change applied to `zone`, if any.
    pub fn last_applied_to_zone(&self, zone: &str) -> Result<Option<ChangeId>, StoreError> {
        self.last_applied(&key::applied_zone(zone))
    }

    /// The newest change applied to rule `id`, if any.
    pub fn last_applied_to_rule(&self, id: RuleId) -> Result<Option<ChangeId>, StoreError> {
        self.last_applied(&key::applied_rule(id))
    }

    fn last_applied(&self, key: &str) -> Result<Option<ChangeId>, StoreError> {
        let Some(bytes) = self.get(key) else {
            return Ok(None);
        };
        std::str::from_utf8(&bytes)
            .ok()
            .and_then(|s| s.parse().ok())
            .map(|id| Some(ChangeId(id)))
            .ok_or_else(|| StoreError::Corrupt {
                key: key.to_string(),
                reason: "not a change ID".to_string(),
            })
    }

    pub fn firewall_rules(&self) -> Result<Vec<StoredRule>, StoreError> {
        self.scan_prefix(key::FIREWALL_RULE_PREFIX)
            .iter()
            .map(|(key, bytes)| decode(key, bytes))
            .collect()
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Starts a raw, atomic batch of key operations.
    pub fn batch(&self) -> Batch<'_> {
        Batch::new(self)
    }

    /// Starts a mutation scoped to `zone`.
    pub fn transaction(&self, zone: &str) -> ZoneTransaction<'_> {
        ZoneTransaction::new(self, zone)
    }

    /// Removes the zone marker and every record set under the zone, atomically.
    ///
    /// The zone's last-applied change ID is kept (and set to `change_id`), so
    /// an older change arriving late cannot bring the zone back.
    pub fn delete_zone(&self, zone: &str, change_id: ChangeId) -> Result<(), StoreError> {
        let mut batch = self.batch();
        batch
            .delete(key::zone_marker(zone))
            .delete_prefix(key::zone_rrsets(zone))
            .put(key::applied_zone(zone), encode_change_id(change_id));
        batch.commit()
    }

    /// Writes a firewall rule and its domain mappings, replacing the mappings
    /// of any previous version of the same rule.
    pub fn put_firewall_rule(&self, stored: &StoredRule, change_id: ChangeId) -> Result<(), StoreError> {
        let previous = self.firewall_rule(stored.rule.id)?;
        let value = serde_json::to_vec(stored).map_err(|e| StoreError::Serialization(e.to_string()))?;

        let mut batch = self.batch();
        if let Some(previous) = previous {
            for domain in previous.rule.normalized_domains() {
                batch.delete(key::firewall_domain(&domain, previous.rule.id));
            }
        }
        batch.put(key::firewall_rule(stored.rule.id), value);
        for domain in stored.rule.normalized_domains() {
            batch.put(key::firewall_domain(&domain, stored.rule.id), Vec::new());
        }
        batch.put(key::applied_rule(stored.rule.id), encode_change_id(change_id));
        batch.commit()
    }

    /// Deletes a firewall rule and its domain mappings, returning the removed rule.
    ///
    /// `change_id` is recorded even when the rule is already gone.
    pub fn delete_firewall_rule(
        &self,
        id: RuleId,
        change_id: ChangeId,
    ) -> Result<Option<StoredRule>, StoreError> {
        let previous = self.firewall_rule(id)?;
        let mut batch = self.batch();
        if let Some(previous) = &previous {
            batch.delete(key::firewall_rule(id));
            for domain in previous.rule.normalized_domains() {
                batch.delete(key::firewall_domain(&domain, id));
            }
        }
        batch.put(key::applied_rule(id), encode_change_id(change_id));
        batch.commit()?;
        Ok(previous)
    }

    pub(crate) fn apply(&self, ops: Vec<Op>) -> Result<(), StoreError> {
        if self.take_injected_failure() {
            return Err(StoreError::Injected);
        }

        let mut data = self.write();
        let events = match &self.snapshot_path {
            Some(path) => {
                let mut next = data.clone();
                let events = apply_ops(&mut next, ops);
                write_snapshot(path, &next)?;
                *data = next;
                events
            }
            None => apply_ops(&mut data, ops),
        };

        // Sent while still holding the write lock so that `subscribe` never
        // sees an event that is also part of its snapshot, or misses one.
        for event in events {
            let _ = self.events.send(event);
        }
        Ok(())
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Streams the current entries under `prefix` as `Put` events, followed
    /// by every later change under `prefix`.
    ///
    /// A subscriber that falls more than the channel capacity behind gets a
    /// single [`StoreError::Lagged`] and the stream ends there; its copy is
    /// no longer complete and it has to subscribe again for a fresh snapshot.
    pub fn subscribe(
        &self,
        prefix: &str,
    ) -> impl Stream<Item = Result<StoreEvent, StoreError>> + Send + 'static {
        let (snapshot, rx) = {
            let data = self.read();
            let snapshot: Vec<StoreEvent> = scan(&data, prefix)
                .map(|(k, v)| StoreEvent {
                    key: k.clone(),
                    value: v.clone(),
                    event_type: EventType::Put,
                })
                .collect();
            (snapshot, self.events.subscribe())
        };

        let prefix = prefix.to_string();
        let live = BroadcastStream::new(rx)
            .filter_map(move |item| {
                let event = match item {
                    Ok(event) if event.key.starts_with(&prefix) => Some(Ok(event)),
                    Ok(_) => None,
                    Err(BroadcastStreamRecvError::Lagged(missed)) => {
                        warn!(prefix = %prefix, missed, "Store subscriber lagged; ending subscription");
                        Some(Err(StoreError::Lagged(missed)))
                    }
                };
                futures::future::ready(event)
            })
            .scan(false, |lagged, item| {
                if *lagged {
                    return futures::future::ready(None);
                }
                *lagged = item.is_err();
                futures::future::ready(Some(item))
            });

        stream::iter(snapshot.into_iter().map(Ok)).chain(live)
    }

    // =========================================================================
    // Fault injection
    // =========================================================================

    /// Makes the next `n` commits fail without applying anything.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn fail_next_commits(&self, n: usize) {
        self.injected_failures.store(n, Ordering::SeqCst);
    }

    fn take_injected_failure(&self) -> bool {
        self.injected_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Map> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Map> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn scan<'a>(data: &'a Map, prefix: &'a str) -> impl Iterator<Item = (&'a String, &'a Vec<u8>)> + 'a {
    data.range(prefix.to_string()..)
        .take_while(move |(k, _)| k.starts_with(prefix))
}

fn apply_ops(data: &mut Map, ops: Vec<Op>) -> Vec<StoreEvent> {
    let mut events = Vec::new();
    for op in ops {
        match op {
            Op::Put(key, value) => {
                data.insert(key.clone(), value.clone());
                events.push(StoreEvent {
                    key,
                    value,
                    event_type: EventType::Put,
                });
            }
            Op::Delete(key) => {
                if data.remove(&key).is_some() {
                    events.push(deleted(key));
                }
            }
            Op::DeletePrefix(prefix) => {
                let keys: Vec<String> = scan(data, &prefix).map(|(k, _)| k.clone()).collect();
                for key in keys {
                    data.remove(&key);
                    events.push(deleted(key));
                }
            }
        }
    }
    events
}

fn deleted(key: String) -> StoreEvent {
    StoreEvent {
        key,
        value: Vec::new(),
        event_type: EventType::Delete,
    }
}

fn write_snapshot(path: &Path, data: &Map) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec(data).map_err(|e| StoreError::Serialization(e.to_string()))?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn decode<T: serde::de::DeserializeOwned>(key: &str, bytes: &[u8]) -> Result<T, StoreError> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Corrupt {
        key: key.to_string(),
        reason: e.to_string(),
    })
}
