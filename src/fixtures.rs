//! Test fixtures.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Notify;

use crate::client::NodeClient;
use crate::models::{CopyRequest, NodeStatus};

/// The simulated state of a worker node.
#[derive(Clone, Debug, Default)]
pub struct FakeNode {
    pub name: String,
    pub load: f64,
    pub collections: BTreeSet<String>,
    /// When true, every call to this node fails.
    pub down: bool,
    pub fail_puts: bool,
    pub fail_deletes: bool,
    pub fail_copies: bool,
}

/// A call made against a fake node.
#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    Put { address: String, collection: String },
    Delete { address: String, collection: String },
    Copy { address: String, request: CopyRequest },
}

/// A `NodeClient` simulating a set of worker nodes, keyed by address.
#[derive(Default)]
pub struct FakeNodeClient {
    nodes: Mutex<HashMap<String, FakeNode>>,
    calls: Mutex<Vec<Call>>,
    /// When set, copies wait for this gate to be notified before completing.
    copy_gate: Mutex<Option<Arc<Notify>>>,
    /// Notified each time a copy begins.
    pub copy_started: Notify,
}

impl FakeNodeClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Add a simulated node at the given address.
    pub fn add_node(&self, name: &str, address: &str, load: f64) {
        let node = FakeNode {
            name: name.into(),
            load,
            ..Default::default()
        };
        self.nodes.lock().expect("fake nodes lock poisoned").insert(address.into(), node);
    }

    /// Mutate the simulated node at the given address.
    pub fn with_node<F: FnOnce(&mut FakeNode)>(&self, address: &str, f: F) {
        let mut nodes = self.nodes.lock().expect("fake nodes lock poisoned");
        if let Some(node) = nodes.get_mut(address) {
            f(node);
        }
    }

    /// Make all subsequent copies wait on the returned gate.
    pub fn gate_copies(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.copy_gate.lock().expect("fake gate lock poisoned") = Some(gate.clone());
        gate
    }

    /// All calls made so far.
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("fake calls lock poisoned").clone()
    }

    /// All copy calls made so far.
    pub fn copies(&self) -> Vec<(String, CopyRequest)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Copy { address, request } => Some((address, request)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().expect("fake calls lock poisoned").push(call);
    }

    fn node(&self, address: &str) -> Result<FakeNode> {
        let nodes = self.nodes.lock().expect("fake nodes lock poisoned");
        let node = nodes.get(address).cloned().with_context(|| format!("connection refused: {}", address))?;
        if node.down {
            bail!("connection refused: {}", address);
        }
        Ok(node)
    }
}

#[async_trait]
impl NodeClient for FakeNodeClient {
    async fn status(&self, address: &str) -> Result<NodeStatus> {
        let node = self.node(address)?;
        Ok(NodeStatus {
            name: node.name,
            load: node.load,
            collections: node.collections,
        })
    }

    async fn put_document(&self, address: &str, collection: &str, _document: Bytes) -> Result<()> {
        self.record(Call::Put {
            address: address.into(),
            collection: collection.into(),
        });
        if self.node(address)?.fail_puts {
            bail!("node answered document write with status 500");
        }
        self.with_node(address, |node| {
            node.collections.insert(collection.into());
        });
        Ok(())
    }

    async fn delete_collection(&self, address: &str, collection: &str) -> Result<()> {
        self.record(Call::Delete {
            address: address.into(),
            collection: collection.into(),
        });
        if self.node(address)?.fail_deletes {
            bail!("node answered collection delete with status 500");
        }
        self.with_node(address, |node| {
            node.collections.remove(collection);
        });
        Ok(())
    }

    async fn copy_collection(&self, address: &str, request: &CopyRequest) -> Result<()> {
        self.record(Call::Copy {
            address: address.into(),
            request: request.clone(),
        });
        self.copy_started.notify_one();
        let gate = self.copy_gate.lock().expect("fake gate lock poisoned").clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.node(address)?.fail_copies {
            bail!("node answered copy request with status 500");
        }
        self.with_node(address, |node| {
            node.collections.insert(request.collection_name.clone());
        });
        Ok(())
    }
}

/// Wait for the given condition to become true, failing after a few seconds.
pub async fn eventually<F: Fn() -> bool>(msg: &str, f: F) -> Result<()> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !f() {
        if tokio::time::Instant::now() > deadline {
            bail!("timeout waiting for condition: {}", msg);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}
