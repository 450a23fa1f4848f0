//! Periodic whole-state snapshots.
//!
//! Each snapshot overwrites the previous one under a fixed key. Data changed after the last
//! snapshot is lost on crash, bounded by the snapshot interval.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use futures::stream::StreamExt;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{BroadcastStream, IntervalStream};

use crate::database::{Database, Tree};
use crate::error::ShutdownError;

/// The snapshot key of the node map.
pub const KEY_NODES: &str = "nodes";
/// The snapshot key of the collection descriptor map.
pub const KEY_COLLECTIONS: &str = "collections";

const ERR_DB_FLUSH: &str = "error flushing snapshot to disk";

/// Serialize the given value & durably write it under the given key.
#[tracing::instrument(level = "debug", skip(tree, value))]
pub async fn save_snapshot<T>(tree: &Tree, key: &'static str, value: &T) -> Result<()>
where
    T: Serialize,
{
    let data = serde_json::to_vec(value).context("error encoding snapshot")?;
    let tree = tree.clone();
    Database::spawn_blocking(move || -> Result<()> {
        tree.insert(key, data).context("error writing snapshot")?;
        tree.flush().context(ERR_DB_FLUSH)?;
        Ok(())
    })
    .await??;
    Ok(())
}

/// Load the snapshot stored under the given key, if any.
#[tracing::instrument(level = "debug", skip(tree))]
pub async fn load_snapshot<T>(tree: &Tree, key: &'static str) -> Result<Option<T>>
where
    T: DeserializeOwned + Send + 'static,
{
    let tree = tree.clone();
    Database::spawn_blocking(move || -> Result<Option<T>> {
        let data = match tree.get(key).context("error reading snapshot")? {
            Some(data) => data,
            None => return Ok(None),
        };
        let value = serde_json::from_slice(&data).with_context(|| format!("error decoding snapshot {}", key))?;
        Ok(Some(value))
    })
    .await?
}

/// Load the map stored under the given key, falling back to an empty map.
///
/// A snapshot which can not be decoded is logged and ignored, so that a corrupt snapshot never
/// prevents boot.
pub async fn load_map_or_default<V>(tree: &Tree, key: &'static str) -> Result<BTreeMap<String, V>>
where
    V: DeserializeOwned + Send + 'static,
{
    match load_snapshot::<BTreeMap<String, V>>(tree, key).await {
        Ok(Some(map)) => {
            tracing::info!(key, len = map.len(), "state recovered from snapshot");
            Ok(map)
        }
        Ok(None) => {
            tracing::info!(key, "no snapshot found, starting empty");
            Ok(BTreeMap::new())
        }
        Err(err) if err.downcast_ref::<ShutdownError>().is_some() => Err(err),
        Err(err) => {
            tracing::error!(error = ?err, key, "error loading snapshot, starting empty");
            Ok(BTreeMap::new())
        }
    }
}

/// A task which periodically snapshots a published map.
pub struct Snapshotter<V> {
    /// The DB tree snapshots are written to.
    tree: Tree,
    /// The key this snapshot is written under.
    key: &'static str,
    /// The map being snapshotted.
    source: Arc<ArcSwap<BTreeMap<String, V>>>,
    /// The interval between snapshots.
    interval: Duration,
    /// A channel used for triggering graceful shutdown.
    shutdown: BroadcastStream<()>,
}

impl<V> Snapshotter<V>
where
    V: Serialize + Send + Sync + 'static,
{
    /// Create a new instance.
    pub fn new(tree: Tree, key: &'static str, source: Arc<ArcSwap<BTreeMap<String, V>>>, interval: Duration, shutdown: broadcast::Receiver<()>) -> Self {
        Self {
            tree,
            key,
            source,
            interval,
            shutdown: BroadcastStream::new(shutdown),
        }
    }

    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) -> Result<()> {
        let start = tokio::time::Instant::now() + self.interval;
        let mut ticks = IntervalStream::new(tokio::time::interval_at(start, self.interval));
        let (tree, key, source) = (self.tree.clone(), self.key, self.source.clone());
        tracing::debug!(key, "snapshot task has started");

        loop {
            tokio::select! {
                Some(_) = ticks.next() => {
                    if let Err(err) = snapshot(&tree, key, &source).await {
                        tracing::error!(error = ?err, key, "error writing snapshot");
                    }
                }
                _ = self.shutdown.next() => break,
            }
        }

        // Write a final snapshot on the way out.
        snapshot(&tree, key, &source).await.context("error writing final snapshot")?;
        tracing::debug!(key, "snapshot task has shutdown");
        Ok(())
    }
}

/// Snapshot the current state of the given map.
async fn snapshot<V: Serialize>(tree: &Tree, key: &'static str, source: &ArcSwap<BTreeMap<String, V>>) -> Result<()> {
    let state = source.load_full();
    save_snapshot(tree, key, state.as_ref()).await
}
