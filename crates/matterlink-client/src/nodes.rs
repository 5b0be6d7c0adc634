//! Node cache kept current from push events.

use matterlink_core::MatterNode;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default)]
pub(crate) struct NodeCache {
    nodes: RwLock<BTreeMap<u64, Arc<MatterNode>>>,
}

impl NodeCache {
    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<u64, Arc<MatterNode>>> {
        self.nodes.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<u64, Arc<MatterNode>>> {
        self.nodes.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn replace_all(&self, nodes: impl IntoIterator<Item = MatterNode>) {
        let fresh = nodes
            .into_iter()
            .map(|node| (node.node_id, Arc::new(node)))
            .collect();
        *self.write() = fresh;
    }

    pub fn upsert(&self, node: MatterNode) {
        self.write().insert(node.node_id, Arc::new(node));
    }

    pub fn remove(&self, node_id: u64) -> bool {
        self.write().remove(&node_id).is_some()
    }

    /// Swap in a copy of the node with one attribute changed.
    /// Returns false if the node is not cached.
    pub fn update_attribute(&self, node_id: u64, path: &str, value: Value) -> bool {
        let mut nodes = self.write();
        let Some(node) = nodes.get(&node_id) else {
            return false;
        };
        let updated = Arc::new(node.with_attribute(path, value));
        nodes.insert(node_id, updated);
        true
    }

    pub fn get(&self, node_id: u64) -> Option<Arc<MatterNode>> {
        self.read().get(&node_id).cloned()
    }

    /// All cached nodes, ordered by node id.
    pub fn snapshot(&self) -> Vec<Arc<MatterNode>> {
        self.read().values().cloned().collect()
    }
}
