//! The Prometheus endpoint. Lives in its own binary because the recorder is
//! process-global.

#[path = "../helpers/mod.rs"]
mod helpers;

use anyhow::Result;
use helpers::app::TestClusterBuilder;
use helpers::fixtures::create_example_zone;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use zonesync::core::RecordType;

async fn scrape(addr: SocketAddr) -> Result<String> {
    let mut stream = TcpStream::connect(addr).await?;
    stream
        .write_all(b"GET /metrics HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await?;
    let mut body = String::new();
    stream.read_to_string(&mut body).await?;
    Ok(body)
}

#[tokio::test]
async fn test_metrics_endpoint_reports_pipeline_counters() -> Result<()> {
    let cluster = TestClusterBuilder::new(&["ns1"])
        .with_config_modifier(|c| c.metrics.listen_addr = Some("127.0.0.1:0".parse().unwrap()))
        .start()
        .await?;
    let addr = cluster.metrics_addr.expect("metrics enabled");

    cluster.submit_and_sync(create_example_zone()).await?;
    cluster
        .resolver("ns1")
        .query
        .resolve("www.example.com.", RecordType::A)?;

    let body = scrape(addr).await?;
    assert!(body.starts_with("HTTP/1.1 200"), "unexpected response: {}", body);
    for metric in [
        "outbox_published_total",
        "changes_applied_total",
        "acks_processed_total",
        "queries_total",
        "apply_duration_seconds",
    ] {
        assert!(body.contains(metric), "missing {} in:\n{}", metric, body);
    }

    tokio::time::timeout(Duration::from_secs(2), cluster.shutdown(Duration::from_secs(2))).await?
}
