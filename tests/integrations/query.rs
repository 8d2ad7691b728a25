//! Queries against resolvers that were populated through the pipeline.

#[path = "../helpers/mod.rs"]
mod helpers;

use anyhow::Result;
use futures::StreamExt;
use helpers::app::TestClusterBuilder;
use helpers::fixtures::{a_record, create_example_zone, delete_rule, upsert_rule};
use std::sync::Arc;
use std::time::Duration;
use zonesync::{
    core::{RecordType, ResourceRecordSet},
    firewall::RuleAction,
    resolver::{FirewallOrder, QueryEngine, Rcode, ResolverState},
    store::{AuthoritativeStore, EventType},
};

#[tokio::test]
async fn test_missing_name_is_nxdomain_with_soa_authority() -> Result<()> {
    let cluster = TestClusterBuilder::new(&["ns1"]).start().await?;
    cluster.submit_and_sync(create_example_zone()).await?;

    let res = cluster
        .resolver("ns1")
        .query
        .resolve("missing.example.com.", RecordType::A)?;
    assert!(res.matched);
    assert_eq!(res.rcode, Rcode::NxDomain);
    assert!(res.answer.is_empty());
    assert_eq!(res.authority.len(), 1);
    assert_eq!(res.authority[0].record_type, RecordType::Soa);
    assert_eq!(res.authority[0].name, "example.com.");

    cluster.shutdown(Duration::from_secs(2)).await
}

#[tokio::test]
async fn test_firewall_priority_and_rule_removal() -> Result<()> {
    let cluster = TestClusterBuilder::new(&["ns1"]).start().await?;
    cluster.submit_and_sync(create_example_zone()).await?;

    let sinkhole = RuleAction::Override {
        records: vec![a_record("www.example.com.", "198.51.100.1")],
    };
    cluster
        .submit_and_sync(upsert_rule(7, 20, &["www.example.com."], RuleAction::NxDomain))
        .await?;
    cluster
        .submit_and_sync(upsert_rule(3, 5, &["www.example.com."], sinkhole))
        .await?;

    let engine = &cluster.resolver("ns1").query;
    let res = engine.resolve("www.example.com.", RecordType::A)?;
    assert_eq!(res.firewall_rule, Some(3));
    assert_eq!(res.rcode, Rcode::NoError);
    assert_eq!(res.answer[0].rdata, "198.51.100.1");

    cluster.submit_and_sync(delete_rule(3)).await?;
    let res = engine.resolve("www.example.com.", RecordType::A)?;
    assert_eq!(res.firewall_rule, Some(7));
    assert_eq!(res.rcode, Rcode::NxDomain);

    cluster.submit_and_sync(delete_rule(7)).await?;
    let res = engine.resolve("www.example.com.", RecordType::A)?;
    assert_eq!(res.firewall_rule, None);
    assert_eq!(res.answer[0].rdata, "192.0.2.1");

    cluster.shutdown(Duration::from_secs(2)).await
}

#[tokio::test]
async fn test_after_zone_order_only_answers_outside_authoritative_data() -> Result<()> {
    let cluster = TestClusterBuilder::new(&["ns1"])
        .with_config_modifier(|c| c.resolver.firewall_order = FirewallOrder::AfterZone)
        .start()
        .await?;
    cluster.submit_and_sync(create_example_zone()).await?;
    cluster
        .submit_and_sync(upsert_rule(
            1,
            1,
            &["*.example.com."],
            RuleAction::Override {
                records: vec![ResourceRecordSet::new("*.example.com.", RecordType::A, 60, ["203.0.113.9"])],
            },
        ))
        .await?;

    let engine = &cluster.resolver("ns1").query;
    let www = engine.resolve("www.example.com.", RecordType::A)?;
    assert_eq!(www.firewall_rule, None);
    assert_eq!(www.answer[0].rdata, "192.0.2.1");

    let other = engine.resolve("other.example.com.", RecordType::A)?;
    assert_eq!(other.firewall_rule, Some(1));
    assert_eq!(other.answer[0].rdata, "203.0.113.9");
    assert_eq!(other.answer[0].name, "other.example.com.");

    cluster.shutdown(Duration::from_secs(2)).await
}

#[tokio::test]
async fn test_resolver_restart_rebuilds_state_from_snapshot() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store_path = dir.path().join("store.json");

    let first = TestClusterBuilder::new(&["ns1"])
        .with_config_modifier(|c| c.resolver.store_path = Some(store_path.clone()))
        .start()
        .await?;
    first.submit_and_sync(create_example_zone()).await?;
    first
        .submit_and_sync(upsert_rule(9, 1, &["blocked.test."], RuleAction::NoData))
        .await?;
    first.shutdown(Duration::from_secs(2)).await?;
    assert!(dir.path().join("store.ns1.json").exists());

    // Nothing is submitted to the second cluster; every answer comes from disk.
    let second = TestClusterBuilder::new(&["ns1"])
        .with_config_modifier(|c| c.resolver.store_path = Some(store_path.clone()))
        .start()
        .await?;
    let node = second.resolver("ns1");
    assert!(node.state.zones().contains("example.com."));

    let www = node.query.resolve("www.example.com.", RecordType::A)?;
    assert_eq!(www.answer[0].rdata, "192.0.2.1");
    let blocked = node.query.resolve("blocked.test.", RecordType::A)?;
    assert_eq!(blocked.firewall_rule, Some(9));
    assert_eq!(blocked.rcode, Rcode::NoError);
    assert!(blocked.answer.is_empty());

    second.shutdown(Duration::from_secs(2)).await
}

#[tokio::test]
async fn test_late_joiner_bootstraps_from_peer_subscription() -> Result<()> {
    let cluster = TestClusterBuilder::new(&["ns1"]).start().await?;
    cluster.submit_and_sync(create_example_zone()).await?;
    cluster
        .submit_and_sync(upsert_rule(4, 1, &["*.ads.test."], RuleAction::NxDomain))
        .await?;

    // Copy the peer's full state into an empty store through its subscription.
    let source = cluster.resolver("ns1").state.store().clone();
    let target = AuthoritativeStore::in_memory();
    let mut events = Box::pin(source.subscribe("").take(source.len()));
    let mut batch = target.batch();
    while let Some(event) = events.next().await {
        let event = event?;
        assert_eq!(event.event_type, EventType::Put);
        batch.put(event.key, event.value);
    }
    batch.commit()?;
    assert_eq!(target.len(), source.len());

    let state = Arc::new(ResolverState::load(Arc::new(target))?);
    let engine = QueryEngine::new(state, FirewallOrder::BeforeZone);
    let www = engine.resolve("www.example.com.", RecordType::A)?;
    assert_eq!(www.answer[0].rdata, "192.0.2.1");
    let ads = engine.resolve("pixel.ads.test.", RecordType::A)?;
    assert_eq!(ads.firewall_rule, Some(4));

    cluster.shutdown(Duration::from_secs(2)).await
}
