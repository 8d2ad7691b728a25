//! Applies a distributed [`Change`] to the local store and tries.
//!
//! Application is idempotent: record-set CREATE is written as an upsert and
//! DELETE of something already gone is a no-op, so replaying a change any
//! number of times leaves the store exactly as a single application would.
//!
//! Each zone and each firewall rule also remembers the ID of the last change
//! applied to it, written in the same commit. Ledger IDs only grow, so a
//! change at or below that ID is older than what the store already reflects
//! and is skipped as [`ApplyOutcome::Stale`]. This keeps a late redelivery
//! from overwriting a newer change, including across restarts.

use super::ResolverState;
use crate::codec::{validate_name, CodecError, RrCodec};
use crate::core::{
    Change, ChangeId, ChangeType, FirewallAction, FirewallChange, RecordSetAction, RecordType,
    ZoneAction, ZoneChange,
};
use crate::firewall::{RuleAction, StoredRule};
use crate::names::is_subdomain_of;
use crate::store::StoreError;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, instrument, warn};

#[derive(Error, Debug)]
pub enum ApplyError {
    #[error("store commit failed: {0}")]
    Store(#[from] StoreError),

    #[error("invalid record data: {0}")]
    Codec(#[from] CodecError),

    #[error("'{name}' is outside zone '{zone}'")]
    OutOfZone { name: String, zone: String },

    #[error("unsupported {0}")]
    Unsupported(&'static str),

    #[error("change {0} carries no payload for its type")]
    MissingPayload(ChangeId),
}

impl ApplyError {
    /// Whether redelivering the same change could succeed.
    ///
    /// Only store failures qualify; anything wrong with the change itself
    /// will be wrong on every attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApplyError::Store(e) => !matches!(
                e,
                StoreError::Corrupt { .. } | StoreError::Serialization(_)
            ),
            _ => false,
        }
    }
}

/// What applying one change did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// The target already reflects `last_applied`, which is at least as new.
    Stale { last_applied: ChangeId },
}

pub struct ChangeApplier {
    state: Arc<ResolverState>,
    codec: Arc<dyn RrCodec>,
}

impl ChangeApplier {
    pub fn new(state: Arc<ResolverState>, codec: Arc<dyn RrCodec>) -> Self {
        Self { state, codec }
    }

    pub fn state(&self) -> &Arc<ResolverState> {
        &self.state
    }

    #[instrument(skip_all, fields(change_id = %change.id, subject = %change.subject()))]
    pub fn apply(&self, change: &Change) -> Result<ApplyOutcome, ApplyError> {
        let start = Instant::now();
        let result = match change.change_type {
            ChangeType::Zone => match &change.zone {
                Some(zone) => self.apply_zone(change.id, zone),
                None => Err(ApplyError::MissingPayload(change.id)),
            },
            ChangeType::Firewall => match &change.firewall {
                Some(firewall) => self.apply_firewall(change.id, firewall),
                None => Err(ApplyError::MissingPayload(change.id)),
            },
            ChangeType::Unspecified => Err(ApplyError::Unsupported("change type")),
        };
        metrics::histogram!("apply_duration_seconds").record(start.elapsed().as_secs_f64());
        result
    }

    fn apply_zone(&self, change_id: ChangeId, change: &ZoneChange) -> Result<ApplyOutcome, ApplyError> {
        let zone = validate_name(&change.zone_name)?;
        let store = self.state.store();
        if let Some(last_applied) = store.last_applied_to_zone(&zone)? {
            if change_id <= last_applied {
                debug!(zone = %zone, %last_applied, "Zone already reflects a newer change");
                return Ok(ApplyOutcome::Stale { last_applied });
            }
        }

        match change.action {
            ZoneAction::Create | ZoneAction::Update => {
                if change.action == ZoneAction::Update && !store.zone_exists(&zone) {
                    warn!(zone = %zone, "Update for a zone this node does not hold");
                }

                let mut txn = store.transaction(&zone);
                txn.mark_applied(change_id);
                if change.action == ZoneAction::Create {
                    txn.create_zone_marker();
                }
                for rrset_change in &change.changes {
                    let rrset = &rrset_change.record_set;
                    let name = validate_name(&rrset.name)?;
                    if !is_subdomain_of(&name, &zone) {
                        return Err(ApplyError::OutOfZone { name, zone });
                    }
                    match rrset_change.action {
                        // CREATE is an upsert here so that redelivery is harmless.
                        RecordSetAction::Create | RecordSetAction::Upsert => {
                            let records = self.codec.encode(rrset)?;
                            txn.put_record_set(&name, rrset.record_type, &records);
                        }
                        RecordSetAction::Delete => {
                            if rrset.record_type == RecordType::Unspecified {
                                return Err(ApplyError::Unsupported("record type"));
                            }
                            txn.delete_record_set(&name, rrset.record_type);
                        }
                        RecordSetAction::Unspecified => {
                            return Err(ApplyError::Unsupported("record set action"));
                        }
                    }
                }
                txn.commit()?;

                if change.action == ZoneAction::Create {
                    self.state.update_zones(|t| t.insert(&zone, zone.clone()));
                }
                debug!(zone = %zone, rrsets = change.changes.len(), "Zone change applied");
            }
            ZoneAction::Delete => {
                store.delete_zone(&zone, change_id)?;
                self.state.update_zones(|t| {
                    t.remove(&zone);
                });
                debug!(zone = %zone, "Zone deleted");
            }
            ZoneAction::Unspecified => return Err(ApplyError::Unsupported("zone action")),
        }
        Ok(ApplyOutcome::Applied)
    }

    fn apply_firewall(&self, change_id: ChangeId, change: &FirewallChange) -> Result<ApplyOutcome, ApplyError> {
        let store = self.state.store();
        let rule_id = change.rule.id;
        if let Some(last_applied) = store.last_applied_to_rule(rule_id)? {
            if change_id <= last_applied {
                debug!(rule_id, %last_applied, "Rule already reflects a newer change");
                return Ok(ApplyOutcome::Stale { last_applied });
            }
        }

        match change.action {
            FirewallAction::Upsert => {
                if change.rule.action == RuleAction::Unspecified {
                    return Err(ApplyError::Unsupported("rule action"));
                }
                for domain in &change.rule.domains {
                    validate_name(domain)?;
                }
                let stored = StoredRule::compile(change.rule.clone(), self.codec.as_ref())?;
                let previous = store.firewall_rule(rule_id)?;
                store.put_firewall_rule(&stored, change_id)?;

                self.state.update_firewall(|t| {
                    if let Some(previous) = &previous {
                        for domain in previous.rule.normalized_domains() {
                            t.remove_value(&domain, &rule_id);
                        }
                    }
                    for domain in stored.rule.normalized_domains() {
                        t.insert(&domain, rule_id);
                    }
                });
                debug!(rule_id, domains = stored.rule.domains.len(), "Firewall rule upserted");
            }
            FirewallAction::Delete => {
                if let Some(previous) = store.delete_firewall_rule(rule_id, change_id)? {
                    self.state.update_firewall(|t| {
                        for domain in previous.rule.normalized_domains() {
                            t.remove_value(&domain, &rule_id);
                        }
                    });
                    debug!(rule_id, "Firewall rule deleted");
                }
            }
            FirewallAction::Unspecified => return Err(ApplyError::Unsupported("firewall action")),
        }
        Ok(ApplyOutcome::Applied)
    }
}
