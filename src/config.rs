//! Runtime configuration.

use std::time::Duration;

use anyhow::{ensure, Context, Result};
use serde::Deserialize;

/// The default path to use for data storage.
pub const DEFAULT_DATA_PATH: &str = "/usr/local/auriga/data";

/// Runtime configuration data.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// The server's logging config, which uses Rust's `env_logger` directives.
    #[serde(default = "Config::default_rust_log")]
    pub rust_log: String,
    /// The port which client HTTP traffic is to use.
    #[serde(default = "Config::default_client_port")]
    pub client_port: u16,
    /// The port on which the Prometheus scrape endpoint is served.
    #[serde(default = "Config::default_metrics_port")]
    pub metrics_port: u16,

    /// The path to the database on disk.
    #[serde(default = "Config::default_data_path")]
    pub storage_data_path: String,

    /// The number of seconds between node liveness passes.
    #[serde(default = "Config::default_liveness_interval_seconds")]
    pub liveness_interval_seconds: u64,
    /// The number of seconds a node has to answer a status probe.
    ///
    /// A node which fails to answer within this window during a liveness pass is evicted.
    #[serde(default = "Config::default_probe_timeout_seconds")]
    pub probe_timeout_seconds: u64,
    /// The number of seconds allowed for establishing a connection to a worker node.
    ///
    /// Only connection setup is bounded. Writes & copies may run for as long as the node needs.
    #[serde(default = "Config::default_connect_timeout_seconds")]
    pub connect_timeout_seconds: u64,
    /// The number of seconds between replication reconciliation passes.
    #[serde(default = "Config::default_reconcile_interval_seconds")]
    pub reconcile_interval_seconds: u64,
    /// The number of seconds between node map snapshots.
    #[serde(default = "Config::default_snapshot_interval_seconds")]
    pub nodes_snapshot_interval_seconds: u64,
    /// The number of seconds between collection map snapshots.
    #[serde(default = "Config::default_snapshot_interval_seconds")]
    pub collections_snapshot_interval_seconds: u64,
    /// The number of seconds a client is made to wait for a collection's address.
    #[serde(default = "Config::default_address_resolution_timeout_seconds")]
    pub address_resolution_timeout_seconds: u64,
}

impl Config {
    /// Create a new config instance.
    ///
    /// Currently this routine just parses the runtime environment and builds the application
    /// config from that.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Result<Self> {
        let config: Config = envy::from_env().context("error building config from env")?;
        config.validate()?;
        Ok(config)
    }

    /// Statically validate this config.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.liveness_interval_seconds > 0, "LIVENESS_INTERVAL_SECONDS must be greater than 0");
        ensure!(self.probe_timeout_seconds > 0, "PROBE_TIMEOUT_SECONDS must be greater than 0");
        ensure!(self.connect_timeout_seconds > 0, "CONNECT_TIMEOUT_SECONDS must be greater than 0");
        ensure!(self.reconcile_interval_seconds > 0, "RECONCILE_INTERVAL_SECONDS must be greater than 0");
        ensure!(self.nodes_snapshot_interval_seconds > 0, "NODES_SNAPSHOT_INTERVAL_SECONDS must be greater than 0");
        ensure!(
            self.collections_snapshot_interval_seconds > 0,
            "COLLECTIONS_SNAPSHOT_INTERVAL_SECONDS must be greater than 0"
        );
        ensure!(
            self.address_resolution_timeout_seconds > 0,
            "ADDRESS_RESOLUTION_TIMEOUT_SECONDS must be greater than 0"
        );
        Ok(())
    }

    pub fn liveness_interval(&self) -> Duration {
        Duration::from_secs(self.liveness_interval_seconds)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_seconds)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_seconds)
    }

    pub fn nodes_snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.nodes_snapshot_interval_seconds)
    }

    pub fn collections_snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.collections_snapshot_interval_seconds)
    }

    pub fn address_resolution_timeout(&self) -> Duration {
        Duration::from_secs(self.address_resolution_timeout_seconds)
    }

    fn default_rust_log() -> String {
        "info".into()
    }

    fn default_client_port() -> u16 {
        8000
    }

    fn default_metrics_port() -> u16 {
        9090
    }

    fn default_data_path() -> String {
        DEFAULT_DATA_PATH.into()
    }

    fn default_liveness_interval_seconds() -> u64 {
        60
    }

    fn default_probe_timeout_seconds() -> u64 {
        10
    }

    fn default_connect_timeout_seconds() -> u64 {
        10
    }

    fn default_reconcile_interval_seconds() -> u64 {
        20
    }

    fn default_snapshot_interval_seconds() -> u64 {
        20
    }

    fn default_address_resolution_timeout_seconds() -> u64 {
        60
    }
}

#[cfg(test)]
impl Config {
    /// Build a config for tests, rooted in a fresh temporary directory.
    ///
    /// Timers are set far in the future so that tests drive every pass explicitly.
    pub fn new_test() -> Result<(std::sync::Arc<Self>, tempfile::TempDir)> {
        let tmpdir = tempfile::tempdir_in("/tmp").context("error creating tmp dir in /tmp")?;
        Ok((
            std::sync::Arc::new(Self {
                rust_log: "error".into(),
                client_port: 8000,
                metrics_port: 9090,
                storage_data_path: tmpdir.path().to_string_lossy().to_string(),
                liveness_interval_seconds: 60 * 60,
                probe_timeout_seconds: 1,
                connect_timeout_seconds: 1,
                reconcile_interval_seconds: 60 * 60,
                nodes_snapshot_interval_seconds: 60 * 60,
                collections_snapshot_interval_seconds: 60 * 60,
                address_resolution_timeout_seconds: 5,
            }),
            tmpdir,
        ))
    }
}
