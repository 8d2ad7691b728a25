//! Canned zone and firewall changes.

use zonesync::core::{
    Change, FirewallAction, FirewallChange, RecordType, ResourceRecordSet,
    ResourceRecordSetChange, RuleId, ZoneAction, ZoneChange,
};
use zonesync::firewall::{FirewallRule, RuleAction};

pub const SOA: &str = "ns1.example.com. hostmaster.example.com. 1 7200 900 1209600 300";

/// `example.com.` with an SOA and `www` pointing at 192.0.2.1.
pub fn create_example_zone() -> Change {
    Change::for_zone(ZoneChange {
        zone_name: "example.com.".to_string(),
        action: ZoneAction::Create,
        changes: vec![
            ResourceRecordSetChange::create(ResourceRecordSet::new(
                "example.com.",
                RecordType::Soa,
                3600,
                [SOA],
            )),
            ResourceRecordSetChange::create(ResourceRecordSet::new(
                "www.example.com.",
                RecordType::A,
                300,
                ["192.0.2.1"],
            )),
        ],
    })
}

pub fn update_zone(zone: &str, changes: Vec<ResourceRecordSetChange>) -> Change {
    Change::for_zone(ZoneChange {
        zone_name: zone.to_string(),
        action: ZoneAction::Update,
        changes,
    })
}

pub fn delete_zone(zone: &str) -> Change {
    Change::for_zone(ZoneChange {
        zone_name: zone.to_string(),
        action: ZoneAction::Delete,
        changes: Vec::new(),
    })
}

pub fn a_record(name: &str, address: &str) -> ResourceRecordSet {
    ResourceRecordSet::new(name, RecordType::A, 300, [address])
}

pub fn upsert_rule(id: RuleId, priority: u32, domains: &[&str], action: RuleAction) -> Change {
    Change::for_firewall(FirewallChange {
        action: FirewallAction::Upsert,
        rule: FirewallRule {
            id,
            priority,
            domains: domains.iter().map(|d| d.to_string()).collect(),
            action,
        },
    })
}

pub fn delete_rule(id: RuleId) -> Change {
    Change::for_firewall(FirewallChange {
        action: FirewallAction::Delete,
        rule: FirewallRule {
            id,
            priority: 0,
            domains: Vec::new(),
            action: RuleAction::NoData,
        },
    })
}
