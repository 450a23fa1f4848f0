use std::time::Duration;

use anyhow::Result;

use crate::config::*;

#[test]
fn config_deserializes_from_full_env() -> Result<()> {
    let config: Config = envy::from_iter(vec![
        ("RUST_LOG".into(), "error".into()),
        ("CLIENT_PORT".into(), "7000".into()),
        ("METRICS_PORT".into(), "7001".into()),
        ("STORAGE_DATA_PATH".into(), "/usr/local/auriga-test/data".into()),
        ("LIVENESS_INTERVAL_SECONDS".into(), "30".into()),
        ("PROBE_TIMEOUT_SECONDS".into(), "3".into()),
        ("CONNECT_TIMEOUT_SECONDS".into(), "15".into()),
        ("RECONCILE_INTERVAL_SECONDS".into(), "5".into()),
        ("NODES_SNAPSHOT_INTERVAL_SECONDS".into(), "7".into()),
        ("COLLECTIONS_SNAPSHOT_INTERVAL_SECONDS".into(), "8".into()),
        ("ADDRESS_RESOLUTION_TIMEOUT_SECONDS".into(), "12".into()),
    ])?;
    config.validate()?;

    assert!(config.rust_log == "error", "unexpected value parsed for RUST_LOG, got {}, expected {}", config.rust_log, "error");
    assert!(config.client_port == 7000, "unexpected value parsed for CLIENT_PORT, got {}, expected {}", config.client_port, 7000);
    assert!(config.metrics_port == 7001, "unexpected value parsed for METRICS_PORT, got {}, expected {}", config.metrics_port, 7001);
    assert!(
        config.storage_data_path == "/usr/local/auriga-test/data",
        "unexpected value parsed for STORAGE_DATA_PATH, got {}, expected {}",
        config.storage_data_path,
        "/usr/local/auriga-test/data"
    );
    assert_eq!(config.liveness_interval(), Duration::from_secs(30), "unexpected value parsed for LIVENESS_INTERVAL_SECONDS");
    assert_eq!(config.probe_timeout(), Duration::from_secs(3), "unexpected value parsed for PROBE_TIMEOUT_SECONDS");
    assert_eq!(config.connect_timeout(), Duration::from_secs(15), "unexpected value parsed for CONNECT_TIMEOUT_SECONDS");
    assert_eq!(config.reconcile_interval(), Duration::from_secs(5), "unexpected value parsed for RECONCILE_INTERVAL_SECONDS");
    assert_eq!(config.nodes_snapshot_interval(), Duration::from_secs(7), "unexpected value parsed for NODES_SNAPSHOT_INTERVAL_SECONDS");
    assert_eq!(
        config.collections_snapshot_interval(),
        Duration::from_secs(8),
        "unexpected value parsed for COLLECTIONS_SNAPSHOT_INTERVAL_SECONDS"
    );
    assert_eq!(
        config.address_resolution_timeout(),
        Duration::from_secs(12),
        "unexpected value parsed for ADDRESS_RESOLUTION_TIMEOUT_SECONDS"
    );

    Ok(())
}

#[test]
fn config_deserializes_from_sparse_env() -> Result<()> {
    let config: Config = envy::from_iter(vec![("CLIENT_PORT".into(), "7000".into())])?;
    config.validate()?;

    assert!(config.rust_log == "info", "unexpected default for RUST_LOG, got {}, expected {}", config.rust_log, "info");
    assert!(config.client_port == 7000, "unexpected value parsed for CLIENT_PORT, got {}, expected {}", config.client_port, 7000);
    assert!(config.metrics_port == 9090, "unexpected default for METRICS_PORT, got {}, expected {}", config.metrics_port, 9090);
    assert!(
        config.storage_data_path == DEFAULT_DATA_PATH,
        "unexpected default for STORAGE_DATA_PATH, got {}, expected {}",
        config.storage_data_path,
        DEFAULT_DATA_PATH
    );
    assert_eq!(config.liveness_interval(), Duration::from_secs(60), "unexpected default for LIVENESS_INTERVAL_SECONDS");
    assert_eq!(config.connect_timeout(), Duration::from_secs(10), "unexpected default for CONNECT_TIMEOUT_SECONDS");
    assert_eq!(config.reconcile_interval(), Duration::from_secs(20), "unexpected default for RECONCILE_INTERVAL_SECONDS");
    assert_eq!(config.nodes_snapshot_interval(), Duration::from_secs(20), "unexpected default for NODES_SNAPSHOT_INTERVAL_SECONDS");
    assert_eq!(
        config.address_resolution_timeout(),
        Duration::from_secs(60),
        "unexpected default for ADDRESS_RESOLUTION_TIMEOUT_SECONDS"
    );

    Ok(())
}

#[test]
fn config_rejects_zero_intervals() -> Result<()> {
    let config: Config = envy::from_iter(vec![("RECONCILE_INTERVAL_SECONDS".into(), "0".into())])?;

    let res = config.validate();

    assert!(res.is_err(), "expected a zero reconcile interval to be rejected");
    Ok(())
}
