//! Graceful shutdown of every role.

#[path = "../helpers/mod.rs"]
mod helpers;

use anyhow::Result;
use helpers::app::TestClusterBuilder;
use helpers::fixtures::create_example_zone;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;
use zonesync::app::App;
use zonesync::config::{Config, Role};
use zonesync::core::ChangeStatus;
use zonesync::ledger::ChangeLedger;

async fn run_role_until_shutdown(role: Role) -> Result<()> {
    let mut config = Config::default();
    config.node.role = role;
    config.node.server_id = "ns1".to_string();
    config.ledger.servers = vec!["ns1".to_string()];

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let app = App::builder(config).build(shutdown_rx).await?;
    match role {
        Role::Control => {
            assert!(app.submitter().is_some());
            assert!(app.resolvers().is_empty());
        }
        Role::Resolver => {
            assert!(app.submitter().is_none());
            assert_eq!(app.resolvers().len(), 1);
        }
        Role::Standalone => {
            assert!(app.submitter().is_some());
            assert!(app.resolver("ns1").is_some());
        }
    }

    let handle = tokio::spawn(app.run());
    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown_tx.send(true)?;

    timeout(Duration::from_secs(2), handle).await???;
    Ok(())
}

#[tokio::test]
async fn test_every_role_shuts_down_promptly() -> Result<()> {
    for role in [Role::Control, Role::Resolver, Role::Standalone] {
        run_role_until_shutdown(role).await?;
    }
    Ok(())
}

#[tokio::test]
async fn test_shutdown_after_traffic() -> Result<()> {
    let cluster = TestClusterBuilder::new(&["ns1", "ns2"]).start().await?;
    cluster.submit_and_sync(create_example_zone()).await?;
    cluster.shutdown(Duration::from_secs(2)).await
}

#[tokio::test]
async fn test_pending_changes_survive_in_the_ledger_across_shutdown() -> Result<()> {
    let cluster = TestClusterBuilder::new(&["ns1"]).start().await?;
    cluster.bus.set_available(false);
    let change = cluster.submit(create_example_zone()).await?;

    let ledger = cluster.ledger.clone();
    cluster.shutdown(Duration::from_secs(2)).await?;

    // The outbox row is still there for the next poller to pick up.
    assert_eq!(ledger.outbox_len(), 1);
    let status = ledger.sync_status(change.id).await?.expect("change recorded");
    assert_eq!(status.change.status, ChangeStatus::Pending);
    Ok(())
}
