//! Node registry & health monitor.
//!
//! The node controller is the single writer of the node map. Every mutation flows through its
//! request channel, and the resulting map is published for lock-free reads by any holder of a
//! `NodesHandle`. Status probes are issued from the handle, never from the controller task, so
//! that slow nodes never hold up registration traffic.
//!
//! ## Liveness
//! On each liveness interval a pass probes every registered node concurrently. Nodes which fail
//! their probe, or which do not answer within the probe timeout, are evicted. An eviction only
//! applies if the node's registration is unchanged since it was probed, so a node which
//! re-registered with a new address during the pass is left alone.


use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use arc_swap::ArcSwap;
use futures::future::join_all;
use futures::stream::StreamExt;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{BroadcastStream, IntervalStream, ReceiverStream};

use crate::client::DynNodeClient;
use crate::config::Config;
use crate::error::{AppError, AppResult, ERR_NODES_CTL_GONE};
use crate::events::{Event, EventBus};
use crate::models::{validate_name, Node, NodeUsageMetric};

/// A map of all registered nodes, keyed by name.
pub type NodesMap = Arc<ArcSwap<BTreeMap<String, Node>>>;

const METRIC_NODES_REGISTERED: &str = "auriga_nodes_registered";
const METRIC_NODE_EVICTIONS: &str = "auriga_node_evictions";

/// A controller encapsulating all mutations of the node registry.
pub struct NodesCtl {
    /// The application's runtime config.
    config: Arc<Config>,
    /// The process-wide event bus.
    events: EventBus,
    /// A handle to this controller, used by liveness passes.
    handle: NodesHandle,

    /// The registered nodes, owned by this controller.
    nodes: BTreeMap<String, Node>,
    /// The published view of `nodes`.
    nodes_map: NodesMap,

    /// A channel of inbound requests.
    requests_rx: ReceiverStream<NodesCtlMsg>,
    /// A channel used for triggering graceful shutdown.
    shutdown_rx: BroadcastStream<()>,
    /// The currently running liveness pass, if any.
    liveness_task: Option<JoinHandle<()>>,
}

impl NodesCtl {
    /// Create a new instance, seeded with the given nodes.
    pub fn new(
        config: Arc<Config>, client: DynNodeClient, events: EventBus, nodes: BTreeMap<String, Node>, shutdown: broadcast::Receiver<()>,
    ) -> (Self, NodesHandle) {
        metrics::describe_gauge!(METRIC_NODES_REGISTERED, metrics::Unit::Count, "the number of registered nodes");
        metrics::describe_counter!(METRIC_NODE_EVICTIONS, metrics::Unit::Count, "the number of nodes evicted for failing a liveness probe");
        metrics::gauge!(METRIC_NODES_REGISTERED).set(nodes.len() as f64);

        let (tx, rx) = mpsc::channel(1000);
        let nodes_map: NodesMap = Arc::new(ArcSwap::from_pointee(nodes.clone()));
        let handle = NodesHandle {
            tx,
            nodes: nodes_map.clone(),
            client,
            config: config.clone(),
        };
        (
            Self {
                config,
                events,
                handle: handle.clone(),
                nodes,
                nodes_map,
                requests_rx: ReceiverStream::new(rx),
                shutdown_rx: BroadcastStream::new(shutdown),
                liveness_task: None,
            },
            handle,
        )
    }

    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) -> Result<()> {
        let interval = self.config.liveness_interval();
        let mut liveness = IntervalStream::new(tokio::time::interval_at(tokio::time::Instant::now() + interval, interval));
        tracing::debug!(nodes = self.nodes.len(), "node controller has started");

        loop {
            tokio::select! {
                Some(msg) = self.requests_rx.next() => self.handle_msg(msg),
                Some(_) = liveness.next() => self.spawn_liveness_pass(),
                _ = self.shutdown_rx.next() => break,
            }
        }

        if let Some(task) = self.liveness_task.take() {
            task.abort();
        }
        tracing::debug!("node controller has shutdown");
        Ok(())
    }

    fn handle_msg(&mut self, msg: NodesCtlMsg) {
        match msg {
            NodesCtlMsg::Register { node, tx } => {
                let _ = tx.send(self.handle_register(node));
            }
            NodesCtlMsg::Update { node, tx } => {
                let _ = tx.send(self.handle_update(node));
            }
            NodesCtlMsg::Forget { name, tx } => {
                let _ = tx.send(self.handle_forget(&name));
            }
            NodesCtlMsg::Evict { dead, tx } => {
                let _ = tx.send(self.handle_evict(dead));
            }
        }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    fn handle_register(&mut self, node: Node) -> AppResult<()> {
        if self.nodes.contains_key(&node.name) {
            return Err(AppError::NodeAlreadyRegistered(node.name));
        }
        let name = node.name.clone();
        tracing::info!(node = %name, address = %node.address, "node registered");
        self.nodes.insert(name.clone(), node);
        self.publish();
        self.events.publish(&Event::NodeAdded(name));
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    fn handle_update(&mut self, node: Node) -> AppResult<()> {
        let stored = self.nodes.get_mut(&node.name).ok_or_else(|| AppError::UnknownNode(node.name.clone()))?;
        tracing::info!(node = %node.name, old = %stored.address, new = %node.address, "node address updated");
        stored.address = node.address;
        self.publish();
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    fn handle_forget(&mut self, name: &str) -> AppResult<()> {
        if self.nodes.remove(name).is_none() {
            return Err(AppError::UnknownNode(name.into()));
        }
        tracing::info!(node = %name, "node removed");
        self.publish();
        self.events.publish(&Event::NodeRemoved(name.into()));
        Ok(())
    }

    /// Evict the given dead nodes, skipping any whose registration changed since the probe.
    fn handle_evict(&mut self, dead: Vec<Node>) -> Vec<String> {
        let mut evicted = vec![];
        for node in dead {
            if self.nodes.get(&node.name) != Some(&node) {
                tracing::debug!(node = %node.name, "node registration changed during liveness pass, skipping eviction");
                continue;
            }
            self.nodes.remove(&node.name);
            tracing::warn!(node = %node.name, address = %node.address, "evicting node which failed its liveness probe");
            metrics::counter!(METRIC_NODE_EVICTIONS).increment(1);
            evicted.push(node.name);
        }
        if !evicted.is_empty() {
            self.publish();
            for name in evicted.iter() {
                self.events.publish(&Event::NodeRemoved(name.clone()));
            }
        }
        evicted
    }

    /// Begin a liveness pass, unless the previous one is still running.
    fn spawn_liveness_pass(&mut self) {
        if self.liveness_task.as_ref().map(|task| !task.is_finished()).unwrap_or(false) {
            tracing::debug!("previous liveness pass is still running, skipping");
            return;
        }
        let handle = self.handle.clone();
        self.liveness_task = Some(tokio::spawn(async move {
            let evicted = handle.check_liveness().await;
            tracing::debug!(evicted = evicted.len(), "liveness pass finished");
        }));
    }

    fn publish(&self) {
        self.nodes_map.store(Arc::new(self.nodes.clone()));
        metrics::gauge!(METRIC_NODES_REGISTERED).set(self.nodes.len() as f64);
    }
}

/// A message bound for the node controller.
pub enum NodesCtlMsg {
    Register { node: Node, tx: oneshot::Sender<AppResult<()>> },
    Update { node: Node, tx: oneshot::Sender<AppResult<()>> },
    Forget { name: String, tx: oneshot::Sender<AppResult<()>> },
    Evict { dead: Vec<Node>, tx: oneshot::Sender<Vec<String>> },
}

/// A handle to the node registry.
#[derive(Clone)]
pub struct NodesHandle {
    tx: mpsc::Sender<NodesCtlMsg>,
    nodes: NodesMap,
    client: DynNodeClient,
    config: Arc<Config>,
}

impl NodesHandle {
    /// Register a new node.
    pub async fn register(&self, name: String, address: String) -> AppResult<()> {
        validate_name(&name)?;
        validate_address(&address)?;
        let node = Node::new(name, address);
        self.request(|tx| NodesCtlMsg::Register { node, tx }).await
    }

    /// Update the address of a registered node.
    pub async fn update(&self, name: String, address: String) -> AppResult<()> {
        validate_address(&address)?;
        let node = Node::new(name, address);
        self.request(|tx| NodesCtlMsg::Update { node, tx }).await
    }

    /// Remove a registered node.
    pub async fn forget(&self, name: String) -> AppResult<()> {
        self.request(|tx| NodesCtlMsg::Forget { name, tx }).await
    }

    /// All registered nodes, ordered by name.
    pub fn list(&self) -> Vec<Node> {
        self.nodes.load().values().cloned().collect()
    }

    /// Get the registration of the named node.
    pub fn get(&self, name: &str) -> Option<Node> {
        self.nodes.load().get(name).cloned()
    }

    /// The published node map.
    pub fn map(&self) -> NodesMap {
        self.nodes.clone()
    }

    /// Fetch the current usage of the named node.
    pub async fn get_usage(&self, name: &str) -> AppResult<NodeUsageMetric> {
        let node = self.get(name).ok_or_else(|| AppError::UnknownNode(name.into()))?;
        self.probe(&node).await
    }

    /// Select the least loaded empty node, ignoring the named nodes.
    ///
    /// Every candidate is probed concurrently. Nodes which fail their probe are skipped. Ties on
    /// load are broken by name.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn get_free_node(&self, excluding: &BTreeSet<String>) -> AppResult<NodeUsageMetric> {
        let nodes = self.nodes.load_full();
        let probes = nodes.values().filter(|node| !excluding.contains(&node.name)).map(|node| self.probe(node));
        join_all(probes)
            .await
            .into_iter()
            .filter_map(|res| match res {
                Ok(metric) => Some(metric),
                Err(err) => {
                    tracing::debug!(error = %err, "skipping node which failed its probe");
                    None
                }
            })
            .filter(|metric| metric.is_empty())
            .min_by(|a, b| a.load.total_cmp(&b.load).then_with(|| a.name.cmp(&b.name)))
            .ok_or(AppError::NoFreeNode)
    }

    /// Probe every registered node, evicting those which are dead.
    ///
    /// Returns the names of the evicted nodes.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn check_liveness(&self) -> Vec<String> {
        let nodes = self.nodes.load_full();
        let probes = nodes.values().map(|node| async move { (node, self.probe(node).await) });
        let dead: Vec<Node> = join_all(probes)
            .await
            .into_iter()
            .filter_map(|(node, res)| match res {
                Ok(_) => None,
                Err(err) => {
                    tracing::warn!(error = %err, node = %node.name, "node failed liveness probe");
                    Some(node.clone())
                }
            })
            .collect();
        if dead.is_empty() {
            return vec![];
        }

        let (tx, rx) = oneshot::channel();
        if self.tx.send(NodesCtlMsg::Evict { dead, tx }).await.is_err() {
            tracing::error!("{}", ERR_NODES_CTL_GONE);
            return vec![];
        }
        rx.await.unwrap_or_default()
    }

    /// Probe the status of the given node, bounded by the probe timeout.
    async fn probe(&self, node: &Node) -> AppResult<NodeUsageMetric> {
        match tokio::time::timeout(self.config.probe_timeout(), self.client.status(&node.address)).await {
            Ok(Ok(status)) => Ok(NodeUsageMetric::from_status(node, status)),
            Ok(Err(err)) => Err(AppError::ProbeFailed {
                node: node.name.clone(),
                reason: format!("{:#}", err),
            }),
            Err(_) => Err(AppError::ProbeTimeout(node.name.clone())),
        }
    }

    async fn request<T>(&self, f: impl FnOnce(oneshot::Sender<AppResult<T>>) -> NodesCtlMsg) -> AppResult<T> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(f(tx)).await.map_err(|_| AppError::Ise(anyhow!(ERR_NODES_CTL_GONE)))?;
        rx.await.map_err(|_| AppError::Ise(anyhow!(ERR_NODES_CTL_GONE)))?
    }
}

fn validate_address(address: &str) -> AppResult<()> {
    if address.trim().is_empty() {
        return Err(AppError::InvalidInput("node address must not be empty".into()));
    }
    Ok(())
}
