use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// The controller's bookkeeping record for a collection's desired & actual replica set.
///
/// The current replication level is always derived from the set of containing nodes. It is only
/// materialized in the serialized form, where it is ignored on the way back in.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "DescriptorRecord", from = "DescriptorRecord")]
pub struct CollectionDescriptor {
    /// The unique name of the collection.
    pub name: String,
    /// The desired number of replicas, always at least 1.
    pub target_replication_level: u32,
    /// The names of all nodes currently holding a replica.
    pub containing_nodes_names: BTreeSet<String>,
    /// True while a copy of this collection is in flight.
    pub blocked: bool,
}

impl CollectionDescriptor {
    /// Create a new instance with no replicas.
    pub fn new(name: impl Into<String>, target_replication_level: u32) -> Self {
        Self {
            name: name.into(),
            target_replication_level,
            containing_nodes_names: Default::default(),
            blocked: false,
        }
    }

    /// The number of replicas actually achieved.
    pub fn current_replication_level(&self) -> u32 {
        self.containing_nodes_names.len() as u32
    }

    pub fn is_fully_replicated(&self) -> bool {
        self.current_replication_level() == self.target_replication_level
    }

    /// Check if this collection has fewer replicas than desired, while having at least one
    /// replica from which a copy could be made.
    pub fn needs_replica(&self) -> bool {
        let current = self.current_replication_level();
        current > 0 && current < self.target_replication_level
    }

    /// Record a replica on the given node, returning `true` if it was not already recorded.
    pub fn add_node(&mut self, node: &str) -> bool {
        self.containing_nodes_names.insert(node.to_string())
    }

    /// Forget the replica on the given node, returning `true` if it was recorded.
    pub fn remove_node(&mut self, node: &str) -> bool {
        self.containing_nodes_names.remove(node)
    }
}

/// The persisted & wire layout of a descriptor.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescriptorRecord {
    name: String,
    target_replication_level: u32,
    #[serde(default)]
    current_replication_level: u32,
    #[serde(default)]
    containing_nodes_names: BTreeSet<String>,
    #[serde(default)]
    blocked: bool,
}

impl From<CollectionDescriptor> for DescriptorRecord {
    fn from(src: CollectionDescriptor) -> Self {
        Self {
            current_replication_level: src.current_replication_level(),
            name: src.name,
            target_replication_level: src.target_replication_level,
            containing_nodes_names: src.containing_nodes_names,
            blocked: src.blocked,
        }
    }
}

impl From<DescriptorRecord> for CollectionDescriptor {
    fn from(src: DescriptorRecord) -> Self {
        if src.current_replication_level as usize != src.containing_nodes_names.len() {
            tracing::warn!(
                collection = %src.name,
                recorded = src.current_replication_level,
                derived = src.containing_nodes_names.len(),
                "recorded replication level disagrees with containing nodes, using derived value"
            );
        }
        Self {
            name: src.name,
            target_replication_level: src.target_replication_level,
            containing_nodes_names: src.containing_nodes_names,
            blocked: src.blocked,
        }
    }
}

/// The payload sent to a worker node's `POST /collections/{name}/copy` endpoint.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CopyRequest {
    /// The name of the collection to copy.
    pub collection_name: String,
    /// The base address of the node from which the collection is to be copied.
    pub origin_address: String,
}
