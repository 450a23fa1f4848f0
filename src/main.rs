//! The Auriga cluster coordinator.

mod app;
mod client;
mod collections;
mod config;
#[cfg(test)]
mod config_test;
mod database;
mod error;
mod events;
#[cfg(test)]
mod events_test;
#[cfg(test)]
mod fixtures;
mod models;
mod nodes;
mod server;
mod snapshot;

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::prelude::*;

use crate::app::App;
use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Arc::new(Config::new()?);

    // Setup tracing/logging system.
    tracing_subscriber::registry()
        // Filter spans based on the RUST_LOG config, which defaults to `info`.
        .with(tracing_subscriber::EnvFilter::new(&cfg.rust_log))
        // Send a copy of all spans to stdout in compact form.
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_target(true)
                .with_level(true)
                .with_ansi(true),
        )
        // Install this registry as the global tracing registry.
        .try_init()
        .context("error initializing logging/tracing system")?;

    tracing::info!(
        client_port = %cfg.client_port,
        metrics_port = %cfg.metrics_port,
        storage_data_path = %cfg.storage_data_path,
        liveness_interval_seconds = cfg.liveness_interval_seconds,
        reconcile_interval_seconds = cfg.reconcile_interval_seconds,
        "starting Auriga coordinator",
    );
    let metrics = PrometheusBuilder::new().install_recorder().context("error installing Prometheus metrics recorder")?;
    if let Err(err) = App::new(cfg, metrics).await?.spawn().await.context("error joining app task").and_then(|res| res) {
        tracing::error!(error = ?err);
    }

    // Ensure any pending output is flushed.
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();

    Ok(())
}
