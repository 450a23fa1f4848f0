use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::stream::StreamExt;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{BroadcastStream, SignalStream};
use tokio_stream::StreamMap;

use crate::client::{DynNodeClient, HttpNodeClient};
use crate::collections::{CollectionsCtl, CollectionsHandle};
use crate::config::Config;
use crate::database::Database;
use crate::events::EventBus;
use crate::models::{CollectionDescriptor, Node};
use crate::nodes::{NodesCtl, NodesHandle};
use crate::server::{spawn_prom_server, AppServer};
use crate::snapshot::{load_map_or_default, Snapshotter, KEY_COLLECTIONS, KEY_NODES};

/// The application object for when Auriga is running as a server.
pub struct App {
    /// The application's runtime config.
    _config: Arc<Config>,
    /// The application's database system.
    _db: Database,
    /// The process-wide event bus.
    events: EventBus,

    /// A handle to the node registry.
    _nodes: NodesHandle,
    /// A handle to the replication controller.
    _collections: CollectionsHandle,

    /// A channel used for triggering graceful shutdown.
    shutdown_tx: broadcast::Sender<()>,
    /// A channel used for triggering graceful shutdown.
    shutdown_rx: BroadcastStream<()>,

    /// The join handle of the node controller.
    nodes_ctl: JoinHandle<Result<()>>,
    /// The join handle of the collection controller.
    collections_ctl: JoinHandle<Result<()>>,
    /// The join handle of the node map snapshot task.
    nodes_snapshot_handle: JoinHandle<Result<()>>,
    /// The join handle of the collection map snapshot task.
    collections_snapshot_handle: JoinHandle<Result<()>>,
    /// The join handle of the client HTTP server.
    client_server: JoinHandle<()>,
    /// The join handle of the metrics server.
    metrics_server: JoinHandle<Result<()>>,
}

impl App {
    /// Create a new instance.
    pub async fn new(config: Arc<Config>, metrics: PrometheusHandle) -> Result<Self> {
        let (shutdown_tx, _) = broadcast::channel(10);

        // Initialize storage & recover state from the last snapshots.
        let db = Database::new(config.clone()).await.context("error opening database")?;
        let tree = db.get_snapshot_tree().await?;
        let nodes: BTreeMap<String, Node> = load_map_or_default(&tree, KEY_NODES).await?;
        let collections: BTreeMap<String, CollectionDescriptor> = load_map_or_default(&tree, KEY_COLLECTIONS).await?;

        let events = EventBus::new();
        let client: DynNodeClient = Arc::new(HttpNodeClient::new(&config)?);

        // Spawn various core tasks.
        let (nodes_ctl, nodes_handle) = NodesCtl::new(config.clone(), client.clone(), events.clone(), nodes, shutdown_tx.subscribe());
        let (collections_ctl, collections_handle) =
            CollectionsCtl::new(config.clone(), client, events.clone(), nodes_handle.clone(), collections, shutdown_tx.subscribe());
        let nodes_snapshot_handle = Snapshotter::new(
            tree.clone(),
            KEY_NODES,
            nodes_handle.map(),
            config.nodes_snapshot_interval(),
            shutdown_tx.subscribe(),
        )
        .spawn();
        let collections_snapshot_handle = Snapshotter::new(
            tree,
            KEY_COLLECTIONS,
            collections_handle.map(),
            config.collections_snapshot_interval(),
            shutdown_tx.subscribe(),
        )
        .spawn();

        let client_server = AppServer::new(config.clone(), nodes_handle.clone(), collections_handle.clone(), shutdown_tx.clone())
            .spawn()
            .await
            .context("error setting up client HTTP server")?;
        let metrics_server = spawn_prom_server(&config, metrics, shutdown_tx.subscribe());

        Ok(Self {
            _config: config,
            _db: db,
            events,
            nodes_ctl: nodes_ctl.spawn(),
            collections_ctl: collections_ctl.spawn(),
            _nodes: nodes_handle,
            _collections: collections_handle,
            shutdown_rx: BroadcastStream::new(shutdown_tx.subscribe()),
            shutdown_tx,
            nodes_snapshot_handle,
            collections_snapshot_handle,
            client_server,
            metrics_server,
        })
    }

    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) -> Result<()> {
        let mut signals = StreamMap::new();
        signals.insert("sigterm", SignalStream::new(signal(SignalKind::terminate()).context("error building signal stream")?));
        signals.insert("sigint", SignalStream::new(signal(SignalKind::interrupt()).context("error building signal stream")?));

        loop {
            tokio::select! {
                Some((_, sig)) = signals.next() => {
                    tracing::debug!(signal = ?sig, "signal received, beginning graceful shutdown");
                    let _ = self.shutdown_tx.send(());
                    break;
                }
                _ = self.shutdown_rx.next() => break,
            }
        }

        // Begin shutdown routine.
        tracing::debug!("Auriga is shutting down");
        if let Err(err) = self.client_server.await {
            tracing::error!(error = ?err, "error joining client HTTP server task");
        }
        if let Err(err) = self.collections_ctl.await.context("error joining collection controller handle").and_then(|res| res) {
            tracing::error!(error = ?err, "error shutting down collection controller");
        }
        if let Err(err) = self.nodes_ctl.await.context("error joining node controller handle").and_then(|res| res) {
            tracing::error!(error = ?err, "error shutting down node controller");
        }
        if let Err(err) = self.nodes_snapshot_handle.await.context("error joining node snapshot handle").and_then(|res| res) {
            tracing::error!(error = ?err, "error shutting down node snapshot task");
        }
        if let Err(err) = self
            .collections_snapshot_handle
            .await
            .context("error joining collection snapshot handle")
            .and_then(|res| res)
        {
            tracing::error!(error = ?err, "error shutting down collection snapshot task");
        }
        if let Err(err) = self.metrics_server.await.context("error joining metrics server handle").and_then(|res| res) {
            tracing::error!(error = ?err, "error shutting down metrics server");
        }
        self.events.clear();

        tracing::debug!("Auriga shutdown complete");
        Ok(())
    }
}
