//! Core domain types for zonesync
//!
//! This module defines the data model shared by the control plane and the
//! resolver nodes: record sets, zone and firewall changes, the ledger rows
//! that track their distribution, and the acknowledgment message that closes
//! the loop.
//!
//! Every enum that crosses the message bus carries an `Unspecified` variant
//! that unknown wire values deserialize into, so a newer control plane can
//! never make an older resolver panic while decoding.

use crate::firewall::FirewallRule;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a resolver node (also used as the `host` bus header).
pub type ServerId = String;

/// Identity of a firewall rule.
pub type RuleId = u64;

/// Identity of a ledger change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeId(pub u64);

impl fmt::Display for ChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Records
// =============================================================================

/// DNS record types understood by the distribution pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordType {
    A,
    Aaaa,
    Caa,
    Cname,
    Mx,
    Ns,
    Ptr,
    Soa,
    Srv,
    Txt,
    #[serde(other)]
    Unspecified,
}

impl RecordType {
    /// Returns the mnemonic used in store keys and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::Aaaa => "AAAA",
            RecordType::Caa => "CAA",
            RecordType::Cname => "CNAME",
            RecordType::Mx => "MX",
            RecordType::Ns => "NS",
            RecordType::Ptr => "PTR",
            RecordType::Soa => "SOA",
            RecordType::Srv => "SRV",
            RecordType::Txt => "TXT",
            RecordType::Unspecified => "UNSPECIFIED",
        }
    }

    /// Parses a mnemonic, case-insensitively. Unknown mnemonics map to
    /// [`RecordType::Unspecified`].
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "A" => RecordType::A,
            "AAAA" => RecordType::Aaaa,
            "CAA" => RecordType::Caa,
            "CNAME" => RecordType::Cname,
            "MX" => RecordType::Mx,
            "NS" => RecordType::Ns,
            "PTR" => RecordType::Ptr,
            "SOA" => RecordType::Soa,
            "SRV" => RecordType::Srv,
            "TXT" => RecordType::Txt,
            _ => RecordType::Unspecified,
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single record value in presentation format (e.g. `192.0.2.1`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub value: String,
}

impl ResourceRecord {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

/// All records sharing a (name, type) within a zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecordSet {
    pub name: String,
    #[serde(rename = "type")]
    pub record_type: RecordType,
    pub ttl: u32,
    pub records: Vec<ResourceRecord>,
}

impl ResourceRecordSet {
    pub fn new(
        name: impl Into<String>,
        record_type: RecordType,
        ttl: u32,
        values: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            record_type,
            ttl,
            records: values.into_iter().map(ResourceRecord::new).collect(),
        }
    }
}

// =============================================================================
// Changes
// =============================================================================

/// What to do with one record set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordSetAction {
    /// Fails at the mutation API if the (name, type) exists; applied as an
    /// upsert on resolvers so that redelivery is harmless.
    Create,
    Upsert,
    /// Removes by (name, type); the record content is ignored.
    Delete,
    #[serde(other)]
    Unspecified,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecordSetChange {
    pub action: RecordSetAction,
    pub record_set: ResourceRecordSet,
}

impl ResourceRecordSetChange {
    pub fn create(record_set: ResourceRecordSet) -> Self {
        Self {
            action: RecordSetAction::Create,
            record_set,
        }
    }

    pub fn upsert(record_set: ResourceRecordSet) -> Self {
        Self {
            action: RecordSetAction::Upsert,
            record_set,
        }
    }

    pub fn delete(name: impl Into<String>, record_type: RecordType) -> Self {
        Self {
            action: RecordSetAction::Delete,
            record_set: ResourceRecordSet {
                name: name.into(),
                record_type,
                ttl: 0,
                records: Vec::new(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ZoneAction {
    Create,
    Update,
    Delete,
    #[serde(other)]
    Unspecified,
}

/// A mutation of one zone. The order of `changes` is significant and is
/// replayed verbatim on every resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneChange {
    pub zone_name: String,
    pub action: ZoneAction,
    #[serde(default)]
    pub changes: Vec<ResourceRecordSetChange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FirewallAction {
    Upsert,
    Delete,
    #[serde(other)]
    Unspecified,
}

/// A mutation of one firewall rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallChange {
    pub action: FirewallAction,
    pub rule: FirewallRule,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeType {
    Zone,
    Firewall,
    #[serde(other)]
    Unspecified,
}

/// Aggregate distribution status of a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeStatus {
    /// At least one target has not acknowledged yet.
    Pending,
    /// Every target has acknowledged.
    InSync,
}

/// A ledger row: one mutation that every target resolver must eventually apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub id: ChangeId,
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<ZoneChange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firewall: Option<FirewallChange>,
    pub submitted_at: DateTime<Utc>,
    pub status: ChangeStatus,
}

impl Change {
    /// Builds a pending zone change. The ledger assigns the final ID.
    pub fn for_zone(zone: ZoneChange) -> Self {
        Self {
            id: ChangeId(0),
            change_type: ChangeType::Zone,
            zone: Some(zone),
            firewall: None,
            submitted_at: Utc::now(),
            status: ChangeStatus::Pending,
        }
    }

    /// Builds a pending firewall change. The ledger assigns the final ID.
    pub fn for_firewall(firewall: FirewallChange) -> Self {
        Self {
            id: ChangeId(0),
            change_type: ChangeType::Firewall,
            zone: None,
            firewall: Some(firewall),
            submitted_at: Utc::now(),
            status: ChangeStatus::Pending,
        }
    }

    /// A short description for logs, e.g. the zone name.
    pub fn subject(&self) -> String {
        match (&self.zone, &self.firewall) {
            (Some(zone), _) => zone.zone_name.clone(),
            (None, Some(fw)) => format!("firewall rule {}", fw.rule.id),
            (None, None) => "<empty>".to_string(),
        }
    }

    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

/// Per-target synchronization state. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TargetStatus {
    Pending,
    /// Handed to the bus.
    Sent,
    /// Acknowledged by the resolver.
    InSync,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeTarget {
    pub change_id: ChangeId,
    pub server_id: ServerId,
    pub status: TargetStatus,
    pub synced_at: Option<DateTime<Utc>>,
}

/// A queued publication, written in the same transaction as its change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxMessage {
    pub id: u64,
    pub change_id: ChangeId,
    pub server_id: ServerId,
    pub route_key: String,
    pub payload: Vec<u8>,
}

/// Sent by a resolver to the `reply_to` queue once a change is applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckMessage {
    pub change_id: ChangeId,
    pub server_id: ServerId,
}

impl AckMessage {
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}
