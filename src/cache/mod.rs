//! Cache store
//!
//! Single keyed map of cache nodes. Construction is pure; dispatching a
//! classified path to the matching node variant happens in the overlay; this
//! store only enforces the one-node-per-key invariant and handles prefix
//! eviction for reload requests.

pub mod load;
pub mod node;

use crate::path::key_under;
use node::CacheNode;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
pub struct CacheStore {
    nodes: RwLock<HashMap<String, Arc<CacheNode>>>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Arc<CacheNode>> {
        self.nodes.read().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.nodes.read().contains_key(key)
    }

    /// Return the node for `key`, constructing it with `build` on first
    /// access. Construction never loads anything.
    pub fn get_or_insert_with<E>(
        &self,
        key: &str,
        build: impl FnOnce() -> Result<CacheNode, E>,
    ) -> Result<Arc<CacheNode>, E> {
        if let Some(existing) = self.get(key) {
            return Ok(existing);
        }
        let built = Arc::new(build()?);
        let mut nodes = self.nodes.write();
        // A concurrent caller may have inserted between the read and here.
        Ok(nodes.entry(key.to_string()).or_insert(built).clone())
    }

    pub fn insert(&self, node: Arc<CacheNode>) {
        self.nodes.write().insert(node.key.clone(), node);
    }

    pub fn remove(&self, key: &str) -> Option<Arc<CacheNode>> {
        self.nodes.write().remove(key)
    }

    /// Drop every node whose key equals `prefix` or lives underneath it.
    /// Backs the external reload signal.
    pub fn evict_prefix(&self, prefix: &str) {
        self.nodes
            .write()
            .retain(|key, _| !key_under(key, prefix));
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.nodes.read().keys().cloned().collect()
    }
}
