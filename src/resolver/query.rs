//! The resolver hot path: answer a query from local state only.

use super::ResolverState;
use crate::codec::WireRecord;
use crate::core::{RecordType, RuleId};
use crate::firewall::{override_answer, select_rule, RuleAction, StoredRule};
use crate::names::fqdn;
use crate::store::StoreError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::trace;

/// When firewall rules are consulted relative to the authoritative lookup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FirewallOrder {
    /// A matching rule always wins.
    #[default]
    BeforeZone,
    /// Rules apply only when the zone has no positive answer.
    AfterZone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rcode {
    NoError,
    NxDomain,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub answer: Vec<WireRecord>,
    pub authority: Vec<WireRecord>,
    pub rcode: Rcode,
    /// `false` when no local zone or rule covers the name; the caller decides
    /// whether to forward or refuse.
    pub matched: bool,
    /// The firewall rule that produced this response, if any.
    pub firewall_rule: Option<RuleId>,
}

impl Resolution {
    fn not_authoritative() -> Self {
        Self {
            answer: Vec::new(),
            authority: Vec::new(),
            rcode: Rcode::NoError,
            matched: false,
            firewall_rule: None,
        }
    }

    fn has_answer(&self) -> bool {
        self.matched && self.rcode == Rcode::NoError && !self.answer.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct QueryEngine {
    state: Arc<ResolverState>,
    order: FirewallOrder,
}

impl QueryEngine {
    pub fn new(state: Arc<ResolverState>, order: FirewallOrder) -> Self {
        Self { state, order }
    }

    pub fn resolve(&self, qname: &str, qtype: RecordType) -> Result<Resolution, StoreError> {
        let qname = fqdn(qname);

        if self.order == FirewallOrder::BeforeZone {
            if let Some(intercepted) = self.intercept(&qname, qtype)? {
                return Ok(intercepted);
            }
        }

        let resolution = self.authoritative(&qname, qtype)?;

        if self.order == FirewallOrder::AfterZone && !resolution.has_answer() {
            if let Some(intercepted) = self.intercept(&qname, qtype)? {
                return Ok(intercepted);
            }
        }

        let outcome = match (resolution.matched, resolution.rcode) {
            (false, _) => "not_authoritative",
            (true, Rcode::NxDomain) => "nxdomain",
            (true, Rcode::NoError) => "answer",
        };
        metrics::counter!("queries_total", "outcome" => outcome).increment(1);
        Ok(resolution)
    }

    fn authoritative(&self, qname: &str, qtype: RecordType) -> Result<Resolution, StoreError> {
        let zones = self.state.zones();
        let Some(zone) = zones.find_longest_match(qname) else {
            trace!(qname, "No local zone covers query");
            return Ok(Resolution::not_authoritative());
        };
        let store = self.state.store();

        if let Some(answer) = store.get_record_set(zone, qname, qtype)? {
            return Ok(Resolution {
                answer,
                authority: Vec::new(),
                rcode: Rcode::NoError,
                matched: true,
                firewall_rule: None,
            });
        }

        let authority = store
            .get_record_set(zone, zone, RecordType::Soa)?
            .unwrap_or_default();
        Ok(Resolution {
            answer: Vec::new(),
            authority,
            rcode: Rcode::NxDomain,
            matched: true,
            firewall_rule: None,
        })
    }

    fn intercept(&self, qname: &str, qtype: RecordType) -> Result<Option<Resolution>, StoreError> {
        let firewall = self.state.firewall();
        let ids = firewall.find_matching(qname);
        if ids.is_empty() {
            return Ok(None);
        }

        let store = self.state.store();
        let mut rules: Vec<StoredRule> = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(rule) = store.firewall_rule(*id)? {
                rules.push(rule);
            }
        }
        let Some(winner) = select_rule(&rules) else {
            return Ok(None);
        };

        let (answer, rcode) = match &winner.rule.action {
            RuleAction::Override { .. } => (override_answer(&winner.answer, qname, qtype), Rcode::NoError),
            RuleAction::NoData => (Vec::new(), Rcode::NoError),
            RuleAction::NxDomain => (Vec::new(), Rcode::NxDomain),
            // Never stored; the applier rejects these.
            RuleAction::Unspecified => return Ok(None),
        };
        trace!(qname, rule_id = winner.rule.id, "Query intercepted by firewall rule");
        metrics::counter!("firewall_hits_total").increment(1);
        metrics::counter!("queries_total", "outcome" => "firewall").increment(1);

        Ok(Some(Resolution {
            answer,
            authority: Vec::new(),
            rcode,
            matched: true,
            firewall_rule: Some(winner.rule.id),
        }))
    }
}
