//! Firewall rules that intercept queries before (or after) authoritative lookup.
//!
//! A rule targets one or more domains; a domain written as `*.example.com.`
//! matches every name strictly below `example.com.`. When several rules match
//! the same query, the one with the lowest `priority` wins, and equal
//! priorities are broken by the lower rule ID so the outcome never depends on
//! insertion order.

use crate::codec::{RrCodec, WireRecord};
use crate::core::{RecordType, ResourceRecordSet, RuleId};
use crate::names::fqdn;
use serde::{Deserialize, Serialize};

/// What a matching rule does to the response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "UPPERCASE")]
pub enum RuleAction {
    /// Answer with these static records (filtered to the queried type).
    Override { records: Vec<ResourceRecordSet> },
    /// Answer with an empty NOERROR response.
    NoData,
    /// Answer with NXDOMAIN.
    NxDomain,
    /// A kind this build does not know. Decodes, but is rejected when applied.
    #[serde(other)]
    Unspecified,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallRule {
    pub id: RuleId,
    pub priority: u32,
    pub domains: Vec<String>,
    pub action: RuleAction,
}

impl FirewallRule {
    /// Returns the rule's domains in normalized form.
    pub fn normalized_domains(&self) -> Vec<String> {
        self.domains.iter().map(|d| fqdn(d)).collect()
    }

    /// Validates override records through `codec`, returning the encoded
    /// override answer. Non-override rules encode to an empty list.
    pub fn encode_override(
        &self,
        codec: &dyn RrCodec,
    ) -> Result<Vec<WireRecord>, crate::codec::CodecError> {
        match &self.action {
            RuleAction::Override { records } => {
                let mut out = Vec::new();
                for rrset in records {
                    out.extend(codec.encode(rrset)?);
                }
                Ok(out)
            }
            RuleAction::NoData | RuleAction::NxDomain | RuleAction::Unspecified => Ok(Vec::new()),
        }
    }
}

impl AsRef<FirewallRule> for FirewallRule {
    fn as_ref(&self) -> &FirewallRule {
        self
    }
}

/// A rule as persisted on a resolver, with its override answer pre-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRule {
    pub rule: FirewallRule,
    #[serde(default)]
    pub answer: Vec<WireRecord>,
}

impl AsRef<FirewallRule> for StoredRule {
    fn as_ref(&self) -> &FirewallRule {
        &self.rule
    }
}

impl StoredRule {
    pub fn compile(rule: FirewallRule, codec: &dyn RrCodec) -> Result<Self, crate::codec::CodecError> {
        let answer = rule.encode_override(codec)?;
        Ok(Self { rule, answer })
    }
}

/// Picks the winning rule among all rules matching one query.
pub fn select_rule<'a, R, I>(rules: I) -> Option<&'a R>
where
    R: AsRef<FirewallRule> + 'a,
    I: IntoIterator<Item = &'a R>,
{
    rules.into_iter().min_by_key(|r| {
        let rule = r.as_ref();
        (rule.priority, rule.id)
    })
}

/// Rewrites override records for `qname`, keeping only `qtype`.
pub fn override_answer(records: &[WireRecord], qname: &str, qtype: RecordType) -> Vec<WireRecord> {
    let qname = fqdn(qname);
    records
        .iter()
        .filter(|r| r.record_type == qtype)
        .map(|r| WireRecord {
            name: qname.clone(),
            ..r.clone()
        })
        .collect()
}
