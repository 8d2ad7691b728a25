//! Key layout of the authoritative store.
//!
//! ```text
//! zone/<zone>                       zone existence marker
//! rrset/<zone>/<name>/<TYPE>        encoded record set
//! fw/rule/<id:020>                  firewall rule
//! fw/domain/<domain>/<id:020>       domain -> rule mapping
//! applied/zone/<zone>               last change applied to the zone
//! applied/rule/<id:020>             last change applied to the rule
//! ```
//!
//! All names are normalized with [`fqdn`], so every zone's record sets share
//! the `rrset/<zone>/` prefix and a zone delete is a single prefix delete.
//! Rule IDs are zero-padded so lexical key order equals numeric order.

use crate::core::{RecordType, RuleId};
use crate::names::fqdn;

pub const ZONE_PREFIX: &str = "zone/";
pub const RRSET_PREFIX: &str = "rrset/";
pub const FIREWALL_PREFIX: &str = "fw/";
pub const FIREWALL_RULE_PREFIX: &str = "fw/rule/";
pub const FIREWALL_DOMAIN_PREFIX: &str = "fw/domain/";
pub const APPLIED_PREFIX: &str = "applied/";

pub fn zone_marker(zone: &str) -> String {
    format!("{}{}", ZONE_PREFIX, fqdn(zone))
}

pub fn zone_rrsets(zone: &str) -> String {
    format!("{}{}/", RRSET_PREFIX, fqdn(zone))
}

pub fn rrset(zone: &str, name: &str, record_type: RecordType) -> String {
    format!("{}{}/{}", zone_rrsets(zone), fqdn(name), record_type.as_str())
}

pub fn firewall_rule(id: RuleId) -> String {
    format!("{}{:020}", FIREWALL_RULE_PREFIX, id)
}

pub fn firewall_domain(domain: &str, id: RuleId) -> String {
    format!("{}{}/{:020}", FIREWALL_DOMAIN_PREFIX, fqdn(domain), id)
}

pub fn applied_zone(zone: &str) -> String {
    format!("{}zone/{}", APPLIED_PREFIX, fqdn(zone))
}

pub fn applied_rule(id: RuleId) -> String {
    format!("{}rule/{:020}", APPLIED_PREFIX, id)
}

/// Extracts the zone name from a zone marker key.
pub fn parse_zone_marker(key: &str) -> Option<&str> {
    key.strip_prefix(ZONE_PREFIX).filter(|zone| !zone.is_empty())
}

/// Extracts the rule ID from a firewall rule key.
pub fn parse_firewall_rule(key: &str) -> Option<RuleId> {
    key.strip_prefix(FIREWALL_RULE_PREFIX)?.parse().ok()
}
