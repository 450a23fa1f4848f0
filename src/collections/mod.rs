//! Replication controller.
//!
//! The collection controller is the single writer of the collection descriptor map. Remote calls
//! to worker nodes are made from the `CollectionsHandle`, and their outcomes are folded back into
//! the descriptors through the controller's request channel, one message at a time.
//!
//! ## Copies
//! A copy of a collection onto a new node is guarded by a `CopyPermit`. The permit is created by
//! the controller in the same step which sets the descriptor's `blocked` flag, so at most one copy
//! per collection is ever in flight. The permit always clears the flag: explicitly when the copy
//! finishes, or from its `Drop` impl when the copying task is cancelled.
//!
//! Every permit carries an id which the controller records against the collection name. A finish
//! or abort is only applied while its id is still the one on record, so a copy outliving its
//! collection (deleted & recreated under the same name) never touches the new descriptor.
//!
//! ## Consistency
//! Document writes are not serialized against each other, nor against an in-flight copy. A fan-out
//! write which fails on one replica does not undo the writes which succeeded on the others, and
//! sibling calls of a failed fan-out run to completion.


use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use arc_swap::ArcSwap;
use bytes::Bytes;
use futures::future::join_all;
use futures::stream::StreamExt;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{BroadcastStream, IntervalStream, ReceiverStream, UnboundedReceiverStream};

use crate::client::DynNodeClient;
use crate::config::Config;
use crate::error::{AppError, AppResult, ERR_COLLECTIONS_CTL_GONE};
use crate::events::{EventBus, EventKind, SubscriptionId};
use crate::models::{base_url, validate_document, validate_name, validate_replication, CollectionDescriptor, CopyRequest};
use crate::nodes::{NodesHandle, NodesMap};

/// A map of all collection descriptors, keyed by name.
pub type CollectionsMap = Arc<ArcSwap<BTreeMap<String, CollectionDescriptor>>>;

/// The replication level used for collections created by a write without an explicit level.
pub const DEFAULT_REPLICATION: u32 = 1;

const METRIC_COLLECTIONS: &str = "auriga_collections";
const METRIC_COLLECTIONS_UNDER_REPLICATED: &str = "auriga_collections_under_replicated";
const METRIC_COPIES: &str = "auriga_collection_copies";

/// A controller encapsulating all mutations of the collection descriptors.
pub struct CollectionsCtl {
    /// The application's runtime config.
    config: Arc<Config>,
    /// The process-wide event bus.
    events: EventBus,
    /// The subscription forwarding node removals to this controller.
    subscription: SubscriptionId,
    /// A handle to this controller, used by reconciliation passes.
    handle: CollectionsHandle,
    /// The published node map, used to vet replicas reported by finished copies.
    nodes: NodesMap,

    /// The collection descriptors, owned by this controller.
    collections: BTreeMap<String, CollectionDescriptor>,
    /// The published view of `collections`.
    collections_map: CollectionsMap,
    /// The id of the copy permit currently held for each blocked collection.
    copies: BTreeMap<String, u64>,
    /// The id to assign to the next copy permit.
    next_copy_id: u64,

    /// A channel of inbound requests.
    requests_tx: mpsc::Sender<CollectionsCtlMsg>,
    /// A channel of inbound requests.
    requests_rx: ReceiverStream<CollectionsCtlMsg>,
    /// A channel of internal notifications, which take priority over requests.
    internal_tx: mpsc::UnboundedSender<InternalMsg>,
    /// A channel of internal notifications, which take priority over requests.
    internal_rx: UnboundedReceiverStream<InternalMsg>,
    /// A channel used for triggering graceful shutdown.
    shutdown_rx: BroadcastStream<()>,
    /// The currently running reconciliation pass, if any.
    reconcile_task: Option<JoinHandle<()>>,
}

impl CollectionsCtl {
    /// Create a new instance, seeded with the given descriptors.
    ///
    /// Any seeded descriptor marked as blocked is unblocked, as no copy survives a restart.
    pub fn new(
        config: Arc<Config>, client: DynNodeClient, events: EventBus, nodes: NodesHandle, mut collections: BTreeMap<String, CollectionDescriptor>,
        shutdown: broadcast::Receiver<()>,
    ) -> (Self, CollectionsHandle) {
        metrics::describe_gauge!(METRIC_COLLECTIONS, metrics::Unit::Count, "the number of known collections");
        metrics::describe_gauge!(
            METRIC_COLLECTIONS_UNDER_REPLICATED,
            metrics::Unit::Count,
            "the number of collections with fewer replicas than desired"
        );
        metrics::describe_counter!(METRIC_COPIES, metrics::Unit::Count, "the number of collection copies by outcome");

        for descriptor in collections.values_mut().filter(|descriptor| descriptor.blocked) {
            tracing::warn!(collection = %descriptor.name, "clearing stale copy block");
            descriptor.blocked = false;
        }

        let (requests_tx, requests_rx) = mpsc::channel(1000);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let collections_map: CollectionsMap = Arc::new(ArcSwap::from_pointee(collections.clone()));
        let node_removed_tx = internal_tx.clone();
        let subscription = events.subscribe(EventKind::NodeRemoved, move |event| {
            node_removed_tx
                .send(InternalMsg::NodeRemoved(event.node().to_string()))
                .map_err(|_| anyhow!(ERR_COLLECTIONS_CTL_GONE))
        });
        let nodes_map = nodes.map();
        let handle = CollectionsHandle {
            tx: requests_tx.clone(),
            collections: collections_map.clone(),
            nodes,
            client,
            config: config.clone(),
        };
        let ctl = Self {
            config,
            events,
            subscription,
            handle: handle.clone(),
            nodes: nodes_map,
            collections,
            collections_map,
            copies: BTreeMap::new(),
            next_copy_id: 0,
            requests_tx,
            requests_rx: ReceiverStream::new(requests_rx),
            internal_tx,
            internal_rx: UnboundedReceiverStream::new(internal_rx),
            shutdown_rx: BroadcastStream::new(shutdown),
            reconcile_task: None,
        };
        ctl.publish();
        (ctl, handle)
    }

    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) -> Result<()> {
        let interval = self.config.reconcile_interval();
        let mut reconcile = IntervalStream::new(tokio::time::interval_at(tokio::time::Instant::now() + interval, interval));
        tracing::debug!(collections = self.collections.len(), "collection controller has started");

        loop {
            tokio::select! {
                biased;
                Some(msg) = self.internal_rx.next() => self.handle_internal_msg(msg),
                Some(msg) = self.requests_rx.next() => self.handle_msg(msg),
                Some(_) = reconcile.next() => self.spawn_reconcile_pass(),
                _ = self.shutdown_rx.next() => break,
            }
        }

        self.events.unsubscribe(EventKind::NodeRemoved, self.subscription);
        if let Some(task) = self.reconcile_task.take() {
            task.abort();
        }
        tracing::debug!("collection controller has shutdown");
        Ok(())
    }

    fn handle_internal_msg(&mut self, msg: InternalMsg) {
        match msg {
            InternalMsg::NodeRemoved(node) => self.handle_node_removed(&node),
            InternalMsg::CopyAborted { name, target, id } => {
                if !self.release_copy(&name, id) {
                    tracing::debug!(collection = %name, node = %target, "abandoned copy is stale, ignoring");
                    return;
                }
                if let Some(descriptor) = self.collections.get_mut(&name) {
                    tracing::warn!(collection = %name, node = %target, "copy abandoned, unblocking collection");
                    descriptor.blocked = false;
                    self.publish();
                }
            }
        }
    }

    fn handle_msg(&mut self, msg: CollectionsCtlMsg) {
        match msg {
            CollectionsCtlMsg::Create { name, replication, tx } => {
                let _ = tx.send(self.handle_create(name, replication));
            }
            CollectionsCtlMsg::Ensure { name, replication, tx } => {
                let _ = tx.send(Ok(self.handle_ensure(name, replication)));
            }
            CollectionsCtlMsg::RecordReplica { name, node, tx } => {
                let _ = tx.send(self.handle_record_replica(&name, node));
            }
            CollectionsCtlMsg::Locate { name, tx } => {
                let _ = tx.send(self.handle_locate(&name));
            }
            CollectionsCtlMsg::Remove { name, tx } => {
                let _ = tx.send(self.handle_remove(&name));
            }
            CollectionsCtlMsg::AcquireCopy { name, target, tx } => {
                // If the requester is gone, the returned permit is dropped here, unblocking the collection.
                let _ = tx.send(self.handle_acquire_copy(name, target));
            }
            CollectionsCtlMsg::FinishCopy { name, target, id, success, tx } => {
                self.handle_finish_copy(&name, &target, id, success);
                let _ = tx.send(Ok(()));
            }
        }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    fn handle_create(&mut self, name: String, replication: u32) -> AppResult<CollectionDescriptor> {
        if self.collections.contains_key(&name) {
            return Err(AppError::CollectionAlreadyExists(name));
        }
        Ok(self.insert_collection(name, replication))
    }

    /// Get the named descriptor, creating it if needed.
    fn handle_ensure(&mut self, name: String, replication: u32) -> CollectionDescriptor {
        match self.collections.get(&name) {
            Some(descriptor) => descriptor.clone(),
            None => self.insert_collection(name, replication),
        }
    }

    fn insert_collection(&mut self, name: String, replication: u32) -> CollectionDescriptor {
        let descriptor = CollectionDescriptor::new(name.clone(), replication);
        tracing::info!(collection = %name, replication, "collection created");
        self.collections.insert(name, descriptor.clone());
        self.publish();
        descriptor
    }

    fn handle_record_replica(&mut self, name: &str, node: String) -> AppResult<()> {
        let descriptor = self.collections.get_mut(name).ok_or_else(|| AppError::UnknownCollection(name.into()))?;
        if descriptor.add_node(&node) {
            tracing::info!(collection = %name, %node, level = descriptor.current_replication_level(), "replica recorded");
            self.publish();
        }
        Ok(())
    }

    fn handle_locate(&self, name: &str) -> AppResult<BTreeSet<String>> {
        let descriptor = self.collections.get(name).ok_or_else(|| AppError::UnknownCollection(name.into()))?;
        if descriptor.blocked {
            return Err(AppError::CollectionBlocked(name.into()));
        }
        Ok(descriptor.containing_nodes_names.clone())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    fn handle_remove(&mut self, name: &str) -> AppResult<CollectionDescriptor> {
        let descriptor = self.collections.remove(name).ok_or_else(|| AppError::UnknownCollection(name.into()))?;
        if self.copies.remove(name).is_some() {
            tracing::debug!(collection = %name, "collection removed with a copy in flight");
        }
        tracing::info!(collection = %name, "collection removed");
        self.publish();
        Ok(descriptor)
    }

    /// Atomically check & set the copy block of a collection, returning a permit & the copy source.
    #[tracing::instrument(level = "debug", skip(self))]
    fn handle_acquire_copy(&mut self, name: String, target: String) -> AppResult<(CopyPermit, String)> {
        let descriptor = self.collections.get_mut(&name).ok_or_else(|| AppError::UnknownCollection(name.clone()))?;
        if descriptor.blocked {
            return Err(AppError::CollectionBlocked(name));
        }
        if descriptor.containing_nodes_names.contains(&target) {
            return Err(AppError::InvalidInput(format!("node `{}` already holds collection `{}`", target, name)));
        }
        let source = match descriptor.containing_nodes_names.iter().next() {
            Some(source) => source.clone(),
            None => {
                return Err(AppError::CollectionAllocationFailure {
                    collection: name,
                    node: target,
                    reason: "collection has no replica to copy from".into(),
                })
            }
        };
        descriptor.blocked = true;
        let id = self.next_copy_id;
        self.next_copy_id += 1;
        self.copies.insert(name.clone(), id);
        self.publish();
        let permit = CopyPermit {
            name,
            target,
            id,
            requests_tx: self.requests_tx.clone(),
            internal_tx: self.internal_tx.clone(),
            finished: false,
        };
        Ok((permit, source))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    fn handle_finish_copy(&mut self, name: &str, target: &str, id: u64, success: bool) {
        if !self.release_copy(name, id) {
            tracing::warn!(collection = %name, node = %target, "copy finished after its collection was removed, ignoring");
            return;
        }
        let descriptor = match self.collections.get_mut(name) {
            Some(descriptor) => descriptor,
            None => {
                tracing::debug!(collection = %name, "collection removed during copy");
                return;
            }
        };
        descriptor.blocked = false;
        if success {
            if self.nodes.load().contains_key(target) {
                descriptor.add_node(target);
                tracing::info!(collection = %name, node = %target, level = descriptor.current_replication_level(), "collection copied to node");
            } else {
                tracing::warn!(collection = %name, node = %target, "copy target was removed during copy, replica not recorded");
            }
        }
        self.publish();
    }

    /// Release the record of the given copy, returning false if the copy is no longer current.
    fn release_copy(&mut self, name: &str, id: u64) -> bool {
        if self.copies.get(name) != Some(&id) {
            return false;
        }
        self.copies.remove(name);
        true
    }

    /// Drop the removed node from every descriptor holding it.
    #[tracing::instrument(level = "debug", skip(self))]
    fn handle_node_removed(&mut self, node: &str) {
        let mut affected = 0;
        for descriptor in self.collections.values_mut() {
            if descriptor.remove_node(node) {
                affected += 1;
                tracing::info!(
                    collection = %descriptor.name,
                    %node,
                    level = descriptor.current_replication_level(),
                    target = descriptor.target_replication_level,
                    fully_replicated = descriptor.is_fully_replicated(),
                    "replica lost with removed node"
                );
            }
        }
        if affected > 0 {
            self.publish();
        }
    }

    /// Begin a reconciliation pass, unless the previous one is still running.
    fn spawn_reconcile_pass(&mut self) {
        if self.reconcile_task.as_ref().map(|task| !task.is_finished()).unwrap_or(false) {
            tracing::debug!("previous reconciliation pass is still running, skipping");
            return;
        }
        let handle = self.handle.clone();
        self.reconcile_task = Some(tokio::spawn(async move {
            let results = handle.reconcile().await;
            tracing::debug!(collections = results.len(), "reconciliation pass finished");
        }));
    }

    fn publish(&self) {
        self.collections_map.store(Arc::new(self.collections.clone()));
        let under_replicated = self
            .collections
            .values()
            .filter(|descriptor| descriptor.current_replication_level() < descriptor.target_replication_level)
            .count();
        metrics::gauge!(METRIC_COLLECTIONS).set(self.collections.len() as f64);
        metrics::gauge!(METRIC_COLLECTIONS_UNDER_REPLICATED).set(under_replicated as f64);
    }
}

/// A message bound for the collection controller.
pub enum CollectionsCtlMsg {
    Create {
        name: String,
        replication: u32,
        tx: oneshot::Sender<AppResult<CollectionDescriptor>>,
    },
    Ensure {
        name: String,
        replication: u32,
        tx: oneshot::Sender<AppResult<CollectionDescriptor>>,
    },
    RecordReplica {
        name: String,
        node: String,
        tx: oneshot::Sender<AppResult<()>>,
    },
    Locate {
        name: String,
        tx: oneshot::Sender<AppResult<BTreeSet<String>>>,
    },
    Remove {
        name: String,
        tx: oneshot::Sender<AppResult<CollectionDescriptor>>,
    },
    AcquireCopy {
        name: String,
        target: String,
        tx: oneshot::Sender<AppResult<(CopyPermit, String)>>,
    },
    FinishCopy {
        name: String,
        target: String,
        id: u64,
        success: bool,
        tx: oneshot::Sender<AppResult<()>>,
    },
}

/// Notifications produced within the process rather than by callers.
enum InternalMsg {
    NodeRemoved(String),
    CopyAborted { name: String, target: String, id: u64 },
}

/// Exclusive permission to copy a collection onto a node.
///
/// Dropping an unfinished permit unblocks the collection without recording a replica.
pub struct CopyPermit {
    name: String,
    target: String,
    id: u64,
    requests_tx: mpsc::Sender<CollectionsCtlMsg>,
    internal_tx: mpsc::UnboundedSender<InternalMsg>,
    finished: bool,
}

impl CopyPermit {
    /// Release the permit, recording the target as a replica if the copy succeeded.
    async fn finish(mut self, success: bool) -> AppResult<()> {
        let (tx, rx) = oneshot::channel();
        let msg = CollectionsCtlMsg::FinishCopy {
            name: self.name.clone(),
            target: self.target.clone(),
            id: self.id,
            success,
            tx,
        };
        self.requests_tx
            .send(msg)
            .await
            .map_err(|_| AppError::Ise(anyhow!(ERR_COLLECTIONS_CTL_GONE)))?;
        self.finished = true;
        rx.await.map_err(|_| AppError::Ise(anyhow!(ERR_COLLECTIONS_CTL_GONE)))?
    }
}

impl Drop for CopyPermit {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.internal_tx.send(InternalMsg::CopyAborted {
                name: self.name.clone(),
                target: self.target.clone(),
                id: self.id,
            });
        }
    }
}

/// A handle to the replication controller.
#[derive(Clone)]
pub struct CollectionsHandle {
    tx: mpsc::Sender<CollectionsCtlMsg>,
    collections: CollectionsMap,
    nodes: NodesHandle,
    client: DynNodeClient,
    config: Arc<Config>,
}

impl CollectionsHandle {
    /// Create a new collection, failing if it already exists.
    pub async fn create(&self, name: String, replication: u32) -> AppResult<CollectionDescriptor> {
        validate_name(&name)?;
        validate_replication(replication)?;
        self.request(|tx| CollectionsCtlMsg::Create { name, replication, tx }).await
    }

    /// All collection descriptors, ordered by name.
    pub fn list(&self) -> Vec<CollectionDescriptor> {
        self.collections.load().values().cloned().collect()
    }

    /// Get the descriptor of the named collection.
    pub fn describe(&self, name: &str) -> AppResult<CollectionDescriptor> {
        self.collections
            .load()
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::UnknownCollection(name.into()))
    }

    /// The published collection map.
    pub fn map(&self) -> CollectionsMap {
        self.collections.clone()
    }

    /// Write a document to a collection, creating the collection if needed.
    ///
    /// The first write of a collection is placed on a free node. Every later write fans out to
    /// all replicas, and fails if any replica rejects it.
    #[tracing::instrument(level = "debug", skip(self, document))]
    pub async fn put_document(&self, name: String, document: Bytes, replication: Option<u32>) -> AppResult<()> {
        validate_name(&name)?;
        validate_document(&document)?;
        let replication = replication.unwrap_or(DEFAULT_REPLICATION);
        validate_replication(replication)?;

        let descriptor = self
            .request(|tx| CollectionsCtlMsg::Ensure {
                name: name.clone(),
                replication,
                tx,
            })
            .await?;
        if descriptor.containing_nodes_names.is_empty() {
            let target = self.nodes.get_free_node(&BTreeSet::new()).await?;
            return self.write_to_node(&name, &target.name, &target.address, document).await;
        }

        let writes = descriptor.containing_nodes_names.iter().map(|node| {
            let document = document.clone();
            let name = name.as_str();
            async move {
                match self.nodes.get(node) {
                    Some(registered) => self.write_to_node(name, node, &registered.address, document).await,
                    None => {
                        tracing::warn!(collection = %name, %node, "replica is on a node which is no longer registered");
                        Err(AppError::DocumentAllocationFailure {
                            collection: name.into(),
                            node: node.clone(),
                        })
                    }
                }
            }
        });
        join_all(writes).await.into_iter().collect::<AppResult<Vec<()>>>()?;
        Ok(())
    }

    /// Resolve the location of the least loaded replica of a collection.
    ///
    /// This waits at most for the configured address resolution timeout.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn get_collection_address(&self, name: &str) -> AppResult<String> {
        match tokio::time::timeout(self.config.address_resolution_timeout(), self.resolve_address(name)).await {
            Ok(res) => res,
            Err(_) => Err(AppError::Timeout(format!("resolving the address of collection `{}`", name))),
        }
    }

    async fn resolve_address(&self, name: &str) -> AppResult<String> {
        let nodes = self.request(|tx| CollectionsCtlMsg::Locate { name: name.into(), tx }).await?;
        let probes = nodes.iter().map(|node| self.nodes.get_usage(node));
        join_all(probes)
            .await
            .into_iter()
            .filter_map(|res| match res {
                Ok(metric) => Some(metric),
                Err(err) => {
                    tracing::debug!(error = %err, collection = %name, "skipping replica which could not be probed");
                    None
                }
            })
            .min_by(|a, b| a.load.total_cmp(&b.load).then_with(|| a.name.cmp(&b.name)))
            .map(|metric| format!("{}/collections/{}", base_url(&metric.address), name))
            .ok_or_else(|| AppError::UnknownCollection(name.into()))
    }

    /// Delete a collection from all of its replicas, returning the nodes whose delete failed.
    ///
    /// The descriptor is removed regardless of the outcome on individual nodes.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn delete_collection(&self, name: &str) -> AppResult<Vec<String>> {
        let descriptor = self.describe(name)?;
        let deletes = descriptor.containing_nodes_names.iter().map(|node| async move {
            let res = match self.nodes.get(node) {
                Some(registered) => self.client.delete_collection(&registered.address, name).await,
                None => Err(anyhow!("node is no longer registered")),
            };
            (node, res)
        });
        let failed: Vec<String> = join_all(deletes)
            .await
            .into_iter()
            .filter_map(|(node, res)| match res {
                Ok(()) => None,
                Err(err) => {
                    tracing::warn!(error = ?err, collection = %name, %node, "error deleting collection from node");
                    Some(node.clone())
                }
            })
            .collect();
        self.request(|tx| CollectionsCtlMsg::Remove { name: name.into(), tx }).await?;
        Ok(failed)
    }

    /// Copy a collection onto the named node from one of its existing replicas.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn copy_collection_to_node(&self, name: &str, target: &str) -> AppResult<()> {
        let target_node = self.nodes.get(target).ok_or_else(|| AppError::UnknownNode(target.into()))?;
        let (permit, source) = self
            .request(|tx| CollectionsCtlMsg::AcquireCopy {
                name: name.into(),
                target: target.into(),
                tx,
            })
            .await?;

        let res = match self.nodes.get(&source) {
            Some(source_node) => {
                let request = CopyRequest {
                    collection_name: name.into(),
                    origin_address: base_url(&source_node.address),
                };
                self.client.copy_collection(&target_node.address, &request).await
            }
            None => Err(anyhow!("copy source node `{}` is no longer registered", source)),
        };
        let outcome = if res.is_ok() { "success" } else { "failure" };
        metrics::counter!(METRIC_COPIES, "outcome" => outcome).increment(1);
        permit.finish(res.is_ok()).await?;
        res.map_err(|err| AppError::CollectionAllocationFailure {
            collection: name.into(),
            node: target.into(),
            reason: format!("{:#}", err),
        })
    }

    /// Repair under-replicated collections, copying each onto one new free node.
    ///
    /// Returns the outcome per collection considered. Failures are logged, never raised.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn reconcile(&self) -> Vec<(String, AppResult<String>)> {
        let candidates: Vec<CollectionDescriptor> = self
            .collections
            .load()
            .values()
            .filter(|descriptor| descriptor.needs_replica() && !descriptor.blocked)
            .cloned()
            .collect();
        let passes = candidates.into_iter().map(|descriptor| async move {
            let res = self.reconcile_collection(&descriptor).await;
            (descriptor.name, res)
        });
        let results = join_all(passes).await;
        for (name, res) in results.iter() {
            match res {
                Ok(node) => tracing::info!(collection = %name, %node, "collection replica added"),
                Err(AppError::NoFreeNode) => tracing::debug!(collection = %name, "no free node to replicate collection onto, will retry"),
                Err(err) => tracing::warn!(error = %err, collection = %name, "error replicating collection, will retry"),
            }
        }
        results
    }

    async fn reconcile_collection(&self, descriptor: &CollectionDescriptor) -> AppResult<String> {
        let target = self.nodes.get_free_node(&descriptor.containing_nodes_names).await?;
        self.copy_collection_to_node(&descriptor.name, &target.name).await?;
        Ok(target.name)
    }

    /// Write a document to a single node, recording the node as a replica on success.
    async fn write_to_node(&self, name: &str, node: &str, address: &str, document: Bytes) -> AppResult<()> {
        if let Err(err) = self.client.put_document(address, name, document).await {
            tracing::warn!(error = ?err, collection = %name, %node, "node rejected document");
            return Err(AppError::DocumentAllocationFailure {
                collection: name.into(),
                node: node.into(),
            });
        }
        self.request(|tx| CollectionsCtlMsg::RecordReplica {
            name: name.into(),
            node: node.into(),
            tx,
        })
        .await
    }

    async fn request<T>(&self, f: impl FnOnce(oneshot::Sender<AppResult<T>>) -> CollectionsCtlMsg) -> AppResult<T> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(f(tx)).await.map_err(|_| AppError::Ise(anyhow!(ERR_COLLECTIONS_CTL_GONE)))?;
        rx.await.map_err(|_| AppError::Ise(anyhow!(ERR_COLLECTIONS_CTL_GONE)))?
    }
}
