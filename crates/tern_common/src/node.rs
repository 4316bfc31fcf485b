//! Node directory consumed from the catalog.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::types::{NodeGroupId, NodeId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub node_id: NodeId,
    pub group_id: NodeGroupId,
    pub host: String,
    pub port: u16,
    pub is_active: bool,
}

impl NodeDescriptor {
    pub fn new(node_id: NodeId, group_id: NodeGroupId, host: impl Into<String>, port: u16) -> Self {
        Self {
            node_id,
            group_id,
            host: host.into(),
            port,
            is_active: true,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Catalog view of the cluster as seen from the current process.
pub trait NodeRegistry: Send + Sync {
    /// Group of the current process. `NodeGroupId::COORDINATOR` on the coordinator.
    fn local_group_id(&self) -> NodeGroupId;

    /// Active nodes ordered by node id.
    fn list_active_nodes(&self) -> Vec<NodeDescriptor>;

    fn lookup_node(&self, node_id: NodeId) -> Option<NodeDescriptor>;

    fn is_coordinator(&self) -> bool {
        self.local_group_id().is_coordinator()
    }
}

/// In-memory registry, populated by the embedder (or tests) from catalog rows.
pub struct StaticNodeRegistry {
    local_group_id: NodeGroupId,
    nodes: RwLock<BTreeMap<NodeId, NodeDescriptor>>,
}

impl StaticNodeRegistry {
    pub fn new(local_group_id: NodeGroupId) -> Self {
        Self {
            local_group_id,
            nodes: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn with_nodes(local_group_id: NodeGroupId, nodes: impl IntoIterator<Item = NodeDescriptor>) -> Self {
        let registry = Self::new(local_group_id);
        for node in nodes {
            registry.upsert(node);
        }
        registry
    }

    pub fn upsert(&self, node: NodeDescriptor) {
        self.nodes.write().insert(node.node_id, node);
    }

    pub fn deactivate(&self, node_id: NodeId) -> bool {
        match self.nodes.write().get_mut(&node_id) {
            Some(node) => {
                node.is_active = false;
                true
            }
            None => false,
        }
    }
}

impl NodeRegistry for StaticNodeRegistry {
    fn local_group_id(&self) -> NodeGroupId {
        self.local_group_id
    }

    fn list_active_nodes(&self) -> Vec<NodeDescriptor> {
        self.nodes
            .read()
            .values()
            .filter(|n| n.is_active)
            .cloned()
            .collect()
    }

    fn lookup_node(&self, node_id: NodeId) -> Option<NodeDescriptor> {
        self.nodes.read().get(&node_id).cloned()
    }
}

/// Resolve node ids to active node descriptors, keeping the order of `ids`.
///
/// Ids that do not name an active node are skipped: a node removed or
/// disabled after planning simply no longer receives data.
pub fn resolve_nodes<'a, I>(registry: &dyn NodeRegistry, ids: I) -> Vec<NodeDescriptor>
where
    I: IntoIterator<Item = &'a NodeId>,
{
    let active = registry.list_active_nodes();
    let mut resolved = Vec::new();
    for id in ids {
        match active.iter().find(|n| n.node_id == *id) {
            Some(node) => resolved.push(node.clone()),
            None => tracing::warn!(node_id = id.0, "skipping inactive or unknown node"),
        }
    }
    resolved
}
