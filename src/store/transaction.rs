//! Scoped, all-or-nothing mutation handles.

use super::{key, AuthoritativeStore, StoreError};
use crate::codec::WireRecord;
use crate::core::{ChangeId, RecordType};

/// One buffered mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Op {
    Put(String, Vec<u8>),
    Delete(String),
    DeletePrefix(String),
}

/// A buffer of raw key operations applied atomically on [`Batch::commit`].
///
/// Nothing is visible to readers until the commit succeeds, and a failed
/// commit leaves the store exactly as it was.
#[must_use = "a batch does nothing until committed"]
pub struct Batch<'a> {
    store: &'a AuthoritativeStore,
    ops: Vec<Op>,
}

impl<'a> Batch<'a> {
    pub(crate) fn new(store: &'a AuthoritativeStore) -> Self {
        Self {
            store,
            ops: Vec::new(),
        }
    }

    pub fn put(&mut self, key: impl Into<String>, value: Vec<u8>) -> &mut Self {
        self.ops.push(Op::Put(key.into(), value));
        self
    }

    pub fn delete(&mut self, key: impl Into<String>) -> &mut Self {
        self.ops.push(Op::Delete(key.into()));
        self
    }

    /// Deletes every key starting with `prefix` at commit time.
    pub fn delete_prefix(&mut self, prefix: impl Into<String>) -> &mut Self {
        self.ops.push(Op::DeletePrefix(prefix.into()));
        self
    }

    pub fn commit(self) -> Result<(), StoreError> {
        self.store.apply(self.ops)
    }
}

/// A mutation handle scoped to one zone.
#[must_use = "a transaction does nothing until committed"]
pub struct ZoneTransaction<'a> {
    zone: String,
    batch: Batch<'a>,
    error: Option<StoreError>,
}

impl<'a> ZoneTransaction<'a> {
    pub(crate) fn new(store: &'a AuthoritativeStore, zone: &str) -> Self {
        Self {
            zone: crate::names::fqdn(zone),
            batch: Batch::new(store),
            error: None,
        }
    }

    pub fn create_zone_marker(&mut self) -> &mut Self {
        let marker = key::zone_marker(&self.zone);
        self.batch.put(marker, Vec::new());
        self
    }

    pub fn put_record_set(
        &mut self,
        name: &str,
        record_type: RecordType,
        records: &[WireRecord],
    ) -> &mut Self {
        match serde_json::to_vec(records) {
            Ok(value) => {
                let key = key::rrset(&self.zone, name, record_type);
                self.batch.put(key, value);
            }
            // Surfaced on commit so the chain stays infallible.
            Err(e) => {
                self.error.get_or_insert(StoreError::Serialization(e.to_string()));
            }
        }
        self
    }

    pub fn delete_record_set(&mut self, name: &str, record_type: RecordType) -> &mut Self {
        let key = key::rrset(&self.zone, name, record_type);
        self.batch.delete(key);
        self
    }

    /// Records `change_id` as the last change applied to this zone.
    pub fn mark_applied(&mut self, change_id: ChangeId) -> &mut Self {
        self.batch.put(key::applied_zone(&self.zone), encode_change_id(change_id));
        self
    }

    pub fn commit(self) -> Result<(), StoreError> {
        if let Some(e) = self.error {
            return Err(e);
        }
        self.batch.commit()
    }
}

pub(crate) fn encode_change_id(change_id: ChangeId) -> Vec<u8> {
    change_id.0.to_string().into_bytes()
}
