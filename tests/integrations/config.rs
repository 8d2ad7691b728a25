//! Configuration layering: defaults, TOML file, environment and CLI.

use anyhow::Result;
use std::io::Write;
use std::path::PathBuf;
use tempfile::NamedTempFile;
use zonesync::cli::Cli;
use zonesync::config::{Config, Role};
use zonesync::resolver::FirewallOrder;

fn write_config(contents: &str) -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile()?;
    file.write_all(contents.as_bytes())?;
    Ok(file)
}

#[test]
fn test_file_values_override_defaults() -> Result<()> {
    let file = write_config(
        r#"
        log_level = "debug"

        [node]
        server_id = "ns1"
        role = "resolver"

        [resolver]
        store_path = "/var/lib/zonesync/ns1.json"
        firewall_order = "after_zone"
        "#,
    )?;

    let config = Config::from_file(file.path())?;
    assert_eq!(config.log_level, "debug");
    assert_eq!(config.node.server_id, "ns1");
    assert_eq!(config.node.role, Role::Resolver);
    assert_eq!(
        config.resolver.store_path,
        Some(PathBuf::from("/var/lib/zonesync/ns1.json"))
    );
    assert_eq!(config.resolver.firewall_order, FirewallOrder::AfterZone);

    // Untouched sections keep their defaults.
    let defaults = Config::default();
    assert_eq!(config.distributor.ack_queue, defaults.distributor.ack_queue);
    assert_eq!(config.ledger.retain_synced_seconds, defaults.ledger.retain_synced_seconds);
    Ok(())
}

#[test]
fn test_cli_arguments_override_file() -> Result<()> {
    let file = write_config(
        r#"
        [node]
        server_id = "from-file"
        role = "control"

        [ledger]
        servers = ["ns1", "ns2"]
        "#,
    )?;

    let cli = Cli {
        config: Some(file.path().to_path_buf()),
        server_id: Some("from-cli".to_string()),
        role: Some("Standalone".to_string()),
        metrics_addr: Some("127.0.0.1:9464".to_string()),
        ..Default::default()
    };
    let config = Config::load(&cli)?;
    assert_eq!(config.node.server_id, "from-cli");
    assert_eq!(config.node.role, Role::Standalone);
    assert_eq!(config.ledger.servers, vec!["ns1".to_string(), "ns2".to_string()]);
    assert_eq!(config.metrics.listen_addr, Some("127.0.0.1:9464".parse()?));
    Ok(())
}

#[test]
fn test_environment_overrides_nested_keys() -> Result<()> {
    // No other test in this binary reads this key.
    let file = write_config("[ledger]\npurge_interval_seconds = 50\n")?;
    std::env::set_var("ZONESYNC_LEDGER__PURGE_INTERVAL_SECONDS", "42");
    let result = Config::from_file(file.path());
    std::env::remove_var("ZONESYNC_LEDGER__PURGE_INTERVAL_SECONDS");

    assert_eq!(result?.ledger.purge_interval_seconds, 42);
    Ok(())
}

#[test]
fn test_missing_explicit_config_file_is_an_error() {
    let cli = Cli {
        config: Some(PathBuf::from("/definitely/not/here/zonesync.toml")),
        ..Default::default()
    };
    let err = Config::load(&cli).unwrap_err();
    assert!(err.to_string().contains("does not exist"));
}

#[test]
fn test_invalid_values_are_rejected() -> Result<()> {
    let unknown_role = write_config("[node]\nrole = \"primary\"\n")?;
    assert!(Config::from_file(unknown_role.path()).is_err());

    let zero_batch = write_config("[distributor]\nbatch_size = 0\n")?;
    let err = Config::from_file(zero_batch.path()).unwrap_err();
    assert!(err.to_string().contains("batch_size"));
    Ok(())
}
