//! End-to-end distribution: submit, publish, apply, acknowledge.

#[path = "../helpers/mod.rs"]
mod helpers;

use anyhow::Result;
use helpers::app::TestClusterBuilder;
use helpers::duplicating_bus::DuplicatingBus;
use helpers::fixtures::{a_record, create_example_zone, delete_zone, update_zone, upsert_rule};
use std::sync::Arc;
use std::time::Duration;
use zonesync::{
    bus::MessageBus,
    core::{ChangeStatus, RecordType, ResourceRecordSetChange, TargetStatus},
    firewall::RuleAction,
    ledger::{ChangeLedger, LedgerFault},
    resolver::Rcode,
};

const SERVERS: &[&str] = &["ns1", "ns2", "ns3"];

#[tokio::test]
async fn test_zone_change_converges_on_every_resolver() -> Result<()> {
    let cluster = TestClusterBuilder::new(SERVERS).start().await?;

    let change = cluster.submit(create_example_zone()).await?;
    assert_eq!(change.status, ChangeStatus::Pending);

    let status = cluster.wait_in_sync(change.id, Duration::from_secs(5)).await?;
    assert_eq!(status.targets.len(), 3);
    assert!(status
        .targets
        .iter()
        .all(|t| t.status == TargetStatus::InSync && t.synced_at.is_some()));
    assert_eq!(cluster.ledger.outbox_len(), 0);

    for node in cluster.resolvers() {
        let res = node.query.resolve("www.example.com.", RecordType::A)?;
        assert_eq!(res.rcode, Rcode::NoError, "resolver {}", node.server_id);
        assert_eq!(res.answer[0].rdata, "192.0.2.1");
    }

    cluster.shutdown(Duration::from_secs(2)).await
}

#[tokio::test]
async fn test_changes_apply_in_submission_order() -> Result<()> {
    let cluster = TestClusterBuilder::new(SERVERS).start().await?;

    cluster.submit(create_example_zone()).await?;
    cluster
        .submit(update_zone(
            "example.com.",
            vec![ResourceRecordSetChange::upsert(a_record("www.example.com.", "192.0.2.2"))],
        ))
        .await?;
    let last = cluster
        .submit(update_zone(
            "example.com.",
            vec![ResourceRecordSetChange::create(a_record("api.example.com.", "192.0.2.10"))],
        ))
        .await?;
    cluster.wait_in_sync(last.id, Duration::from_secs(5)).await?;

    for node in cluster.resolvers() {
        let www = node.query.resolve("www.example.com.", RecordType::A)?;
        assert_eq!(www.answer.len(), 1);
        assert_eq!(www.answer[0].rdata, "192.0.2.2");
        let api = node.query.resolve("api.example.com.", RecordType::A)?;
        assert_eq!(api.answer[0].rdata, "192.0.2.10");
    }

    cluster.shutdown(Duration::from_secs(2)).await
}

#[tokio::test]
async fn test_duplicate_deliveries_are_harmless() -> Result<()> {
    let mut duplicating = None;
    let cluster = TestClusterBuilder::new(&["ns1", "ns2"])
        .with_bus_wrapper(|bus| {
            let wrapped = Arc::new(DuplicatingBus::new(bus));
            duplicating = Some(wrapped.clone());
            wrapped as Arc<dyn MessageBus>
        })
        .start()
        .await?;

    cluster.submit(create_example_zone()).await?;
    let removal = cluster
        .submit(update_zone(
            "example.com.",
            vec![ResourceRecordSetChange::delete("www.example.com.", RecordType::A)],
        ))
        .await?;
    cluster.wait_in_sync(removal.id, Duration::from_secs(5)).await?;

    // Let the trailing duplicates drain before checking state.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let bus = duplicating.expect("wrapper installed");
    assert!(bus.published() >= 8);
    for node in cluster.resolvers() {
        let res = node.query.resolve("www.example.com.", RecordType::A)?;
        assert_eq!(res.rcode, Rcode::NxDomain, "resolver {}", node.server_id);
    }

    cluster.shutdown(Duration::from_secs(2)).await
}

#[tokio::test]
async fn test_transient_apply_failure_is_redelivered() -> Result<()> {
    let cluster = TestClusterBuilder::new(SERVERS).start().await?;
    cluster.resolver("ns2").state.store().fail_next_commits(2);

    let change = cluster.submit_and_sync(create_example_zone()).await?;
    assert_eq!(change.status, ChangeStatus::InSync);

    let res = cluster
        .resolver("ns2")
        .query
        .resolve("www.example.com.", RecordType::A)?;
    assert_eq!(res.answer[0].rdata, "192.0.2.1");

    cluster.shutdown(Duration::from_secs(2)).await
}

#[tokio::test]
async fn test_retried_change_does_not_overwrite_a_newer_one() -> Result<()> {
    let cluster = TestClusterBuilder::new(SERVERS).start().await?;
    cluster.submit_and_sync(create_example_zone()).await?;

    // ns2 fails the first commit, so its copy of `older` is redelivered
    // after `newer` may already have been applied there.
    cluster.resolver("ns2").state.store().fail_next_commits(1);
    let older = cluster
        .submit(update_zone(
            "example.com.",
            vec![ResourceRecordSetChange::upsert(a_record("www.example.com.", "192.0.2.2"))],
        ))
        .await?;
    let newer = cluster
        .submit(update_zone(
            "example.com.",
            vec![ResourceRecordSetChange::upsert(a_record("www.example.com.", "192.0.2.3"))],
        ))
        .await?;
    cluster.wait_in_sync(older.id, Duration::from_secs(5)).await?;
    cluster.wait_in_sync(newer.id, Duration::from_secs(5)).await?;

    for node in cluster.resolvers() {
        let res = node.query.resolve("www.example.com.", RecordType::A)?;
        assert_eq!(res.answer.len(), 1);
        assert_eq!(res.answer[0].rdata, "192.0.2.3", "resolver {}", node.server_id);
    }

    cluster.shutdown(Duration::from_secs(2)).await
}

#[tokio::test]
async fn test_bus_outage_delays_but_does_not_lose_changes() -> Result<()> {
    let cluster = TestClusterBuilder::new(SERVERS).start().await?;
    cluster.bus.set_available(false);

    let change = cluster.submit(create_example_zone()).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let pending = cluster.ledger.pending_targets_for_change(change.id).await?;
    assert_eq!(pending.len(), 3);
    assert!(pending.iter().all(|t| t.status == TargetStatus::Pending));
    assert_eq!(cluster.ledger.outbox_len(), 3);

    cluster.bus.set_available(true);
    cluster.wait_in_sync(change.id, Duration::from_secs(5)).await?;
    assert_eq!(cluster.ledger.outbox_len(), 0);

    cluster.shutdown(Duration::from_secs(2)).await
}

#[tokio::test]
async fn test_ledger_fault_leaves_no_partial_change() -> Result<()> {
    let cluster = TestClusterBuilder::new(SERVERS).start().await?;

    cluster.ledger.inject_fault(LedgerFault::AfterOutboxRows);
    assert!(cluster.submit(create_example_zone()).await.is_err());
    assert_eq!(cluster.ledger.outbox_len(), 0);
    assert!(cluster.ledger.changes_with_pending_targets().await?.is_empty());

    // The retry goes through and nothing from the failed attempt leaks into it.
    let change = cluster.submit_and_sync(create_example_zone()).await?;
    assert_eq!(change.status, ChangeStatus::InSync);
    assert!(cluster.ledger.changes_with_pending_targets().await?.is_empty());

    cluster.shutdown(Duration::from_secs(2)).await
}

#[tokio::test]
async fn test_zone_delete_and_firewall_rule_distribution() -> Result<()> {
    let cluster = TestClusterBuilder::new(&["ns1", "ns2"]).start().await?;

    cluster.submit(create_example_zone()).await?;
    cluster
        .submit(upsert_rule(1, 10, &["*.ads.test."], RuleAction::NxDomain))
        .await?;
    let last = cluster.submit(delete_zone("example.com.")).await?;
    cluster.wait_in_sync(last.id, Duration::from_secs(5)).await?;

    for node in cluster.resolvers() {
        let gone = node.query.resolve("www.example.com.", RecordType::A)?;
        assert!(!gone.matched);
        assert!(!node.state.store().zone_exists("example.com."));

        let blocked = node.query.resolve("tracker.ads.test.", RecordType::A)?;
        assert_eq!(blocked.rcode, Rcode::NxDomain);
        assert_eq!(blocked.firewall_rule, Some(1));
    }

    cluster.shutdown(Duration::from_secs(2)).await
}
