use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// A registered worker node.
///
/// This is also the body of a node registration or address update.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Node {
    /// The unique name of the node.
    pub name: String,
    /// The network address of the node, either `host:port` or a full URL.
    pub address: String,
}

impl Node {
    /// Create a new instance.
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }
}

/// The payload returned by a worker node's `GET /status` endpoint.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct NodeStatus {
    pub name: String,
    pub load: f64,
    #[serde(default)]
    pub collections: BTreeSet<String>,
}

/// A point-in-time usage snapshot of a node.
///
/// These are never stored, they are fetched from the node on demand.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct NodeUsageMetric {
    /// The registered name of the node.
    pub name: String,
    /// The registered address of the node.
    pub address: String,
    /// The load of the node, lower means more available.
    pub load: f64,
    /// The names of all collections currently hosted by the node.
    pub collections: BTreeSet<String>,
}

impl NodeUsageMetric {
    /// Build a metric from a node's registration & its reported status.
    pub fn from_status(node: &Node, status: NodeStatus) -> Self {
        if status.name != node.name {
            tracing::warn!(node = %node.name, reported = %status.name, "node reported a name which differs from its registration");
        }
        Self {
            name: node.name.clone(),
            address: node.address.clone(),
            load: status.load,
            collections: status.collections,
        }
    }

    /// Check if this node hosts zero collections, making it eligible for new placements.
    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }
}
