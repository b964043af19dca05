//! Bounded in-memory shadows of the persistent store.
//!
//! Entries are shared handles. A handle is only given out when the cache
//! holds the sole reference, so two callers never share a live provider.

use crate::store::HierarchyCache;
use lru::LruCache;
use navtree_types::{CombinedHierarchyLevelIdentifier, NodeId, NodeRef};
use std::any::Any;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::trace;

/// Type-erased provider handle
pub type QuickProvider = Arc<dyn Any + Send + Sync>;

pub(crate) struct QuickCaches {
    providers: LruCache<CombinedHierarchyLevelIdentifier, QuickProvider>,
    nodes: LruCache<NodeId, NodeRef>,
}

/// Outcome of a quick cache lookup
#[derive(Debug)]
pub(crate) enum Lookup<T> {
    Hit(T),
    /// Present but held elsewhere
    Busy,
    Miss,
}

fn take_unshared<K, V>(cache: &mut LruCache<K, Arc<V>>, key: &K) -> Lookup<Arc<V>>
where
    K: std::hash::Hash + Eq,
    V: ?Sized,
{
    match cache.get(key) {
        None => Lookup::Miss,
        Some(entry) if Arc::strong_count(entry) != 1 => Lookup::Busy,
        Some(entry) => Lookup::Hit(Arc::clone(entry)),
    }
}

fn capacity(size: usize) -> NonZeroUsize {
    NonZeroUsize::new(size).unwrap_or(NonZeroUsize::MIN)
}

impl QuickCaches {
    pub(crate) fn new(provider_capacity: usize, node_capacity: usize) -> Self {
        Self {
            providers: LruCache::new(capacity(provider_capacity)),
            nodes: LruCache::new(capacity(node_capacity)),
        }
    }

    pub(crate) fn provider(
        &mut self,
        key: &CombinedHierarchyLevelIdentifier,
    ) -> Lookup<QuickProvider> {
        take_unshared(&mut self.providers, key)
    }

    pub(crate) fn put_provider(&mut self, key: CombinedHierarchyLevelIdentifier, provider: QuickProvider) {
        self.providers.put(key, provider);
    }

    pub(crate) fn remove_provider(&mut self, key: &CombinedHierarchyLevelIdentifier) {
        self.providers.pop(key);
    }

    pub(crate) fn remove_connection(&mut self, connection_id: &str) {
        let keys: Vec<_> = self
            .providers
            .iter()
            .filter(|(key, _)| key.connection_id == connection_id)
            .map(|(key, _)| key.clone())
            .collect();
        for key in keys {
            self.providers.pop(&key);
        }
        // Nodes do not record their connection
        self.nodes.clear();
    }

    pub(crate) fn node(&mut self, id: NodeId) -> Lookup<NodeRef> {
        take_unshared(&mut self.nodes, &id)
    }

    pub(crate) fn put_node(&mut self, node: NodeRef) {
        if let Some(id) = node.id {
            self.nodes.put(id, node);
        }
    }

    pub(crate) fn remove_node(&mut self, id: NodeId) {
        self.nodes.pop(&id);
    }

    pub(crate) fn clear_providers(&mut self) {
        self.providers.clear();
    }

    pub(crate) fn clear(&mut self) {
        self.providers.clear();
        self.nodes.clear();
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.providers.is_empty() && self.nodes.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> (usize, usize) {
        (self.providers.len(), self.nodes.len())
    }
}

impl HierarchyCache {
    /// Provider memoized for a combined level, if nobody else is using it
    pub fn quick_provider(&self, key: &CombinedHierarchyLevelIdentifier) -> Option<QuickProvider> {
        let lookup = self.quick.lock().provider(key);
        match lookup {
            Lookup::Hit(provider) => {
                self.metrics.record_provider(true);
                Some(provider)
            }
            Lookup::Busy => {
                self.metrics.record_busy_skip();
                None
            }
            Lookup::Miss => {
                self.metrics.record_provider(false);
                None
            }
        }
    }

    /// Memoize a provider for a combined level, evicting the oldest entry when full
    pub fn cache_quick_provider(&self, key: CombinedHierarchyLevelIdentifier, provider: QuickProvider) {
        trace!(physical_parent = ?key.physical_parent, "quick provider cached");
        self.quick.lock().put_provider(key, provider);
    }

    pub fn remove_quick_provider(&self, key: &CombinedHierarchyLevelIdentifier) {
        self.quick.lock().remove_provider(key);
    }

    /// True when neither quick cache holds anything
    pub fn quick_caches_empty(&self) -> bool {
        self.quick.lock().is_empty()
    }

    pub(crate) fn quick_node(&self, id: NodeId) -> Option<NodeRef> {
        let lookup = self.quick.lock().node(id);
        match lookup {
            Lookup::Hit(node) => {
                self.metrics.record_node(true);
                Some(node)
            }
            Lookup::Busy => {
                self.metrics.record_busy_skip();
                None
            }
            Lookup::Miss => {
                self.metrics.record_node(false);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use navtree_types::{NavNode, NodeKey, NodeType};

    fn node(id: u64) -> NodeRef {
        let key = NodeKey::create(NodeType::Instances, "s", "c", None, &[id.to_string()], vec![]);
        let mut node = NavNode::new(key, format!("n{}", id));
        node.id = Some(NodeId(id));
        Arc::new(node)
    }

    #[test]
    fn test_busy_entries_are_not_handed_out() {
        let mut quick = QuickCaches::new(4, 4);
        quick.put_node(node(1));

        let Lookup::Hit(first) = quick.node(NodeId(1)) else {
            panic!("expected a hit");
        };
        assert!(matches!(quick.node(NodeId(1)), Lookup::Busy));
        drop(first);
        assert!(matches!(quick.node(NodeId(1)), Lookup::Hit(_)));
        assert!(matches!(quick.node(NodeId(2)), Lookup::Miss));
    }

    #[test]
    fn test_oldest_entries_are_evicted() {
        let mut quick = QuickCaches::new(2, 2);
        quick.put_node(node(1));
        quick.put_node(node(2));
        quick.put_node(node(3));
        assert!(matches!(quick.node(NodeId(1)), Lookup::Miss));
        assert_eq!(quick.len(), (0, 2));
    }

    #[test]
    fn test_remove_connection_only_drops_its_providers() {
        let mut quick = QuickCaches::new(4, 4);
        let a = CombinedHierarchyLevelIdentifier::new("a", "r", "en", None);
        let b = CombinedHierarchyLevelIdentifier::new("b", "r", "en", None);
        quick.put_provider(a.clone(), Arc::new(1u32));
        quick.put_provider(b.clone(), Arc::new(2u32));
        quick.remove_connection("a");
        assert!(matches!(quick.provider(&a), Lookup::Miss));
        assert!(matches!(quick.provider(&b), Lookup::Hit(_)));
    }
}
