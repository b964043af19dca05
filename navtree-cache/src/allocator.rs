//! Sequential index allocation for data sources.

use crate::store::HierarchyCache;
use navtree_types::{IndexPath, NodeId};
use parking_lot::Mutex;
use tracing::trace;

/// Hands out index paths to the data sources of one branch.
///
/// Paths are the virtual parent's own order path followed by a sequential
/// ordinal, so a child level sorts in place of its (invisible) parent. The
/// prefix is read from the store on first use. Allocation is deterministic:
/// re-creating the same providers yields the same paths and therefore finds
/// the same cached data sources.
#[derive(Debug)]
pub struct IndexAllocator {
    virtual_parent: Option<NodeId>,
    state: Mutex<AllocatorState>,
}

#[derive(Debug, Default)]
struct AllocatorState {
    prefix: Option<IndexPath>,
    next: u64,
}

impl IndexAllocator {
    /// Allocator for the level under `virtual_parent` (the root when `None`)
    pub fn for_virtual_parent(virtual_parent: Option<NodeId>) -> Self {
        Self {
            virtual_parent,
            state: Mutex::new(AllocatorState::default()),
        }
    }

    /// Allocator whose paths all start with `prefix`
    pub fn with_prefix(prefix: IndexPath) -> Self {
        Self {
            virtual_parent: None,
            state: Mutex::new(AllocatorState {
                prefix: Some(prefix),
                next: 0,
            }),
        }
    }

    pub fn virtual_parent(&self) -> Option<NodeId> {
        self.virtual_parent
    }

    /// Next path in sequence
    pub fn allocate(&self, cache: &HierarchyCache) -> IndexPath {
        let mut state = self.state.lock();
        let prefix = self.seeded_prefix(&mut state, cache);
        let path = prefix.child(state.next);
        state.next += 1;
        trace!(index = %path, "data source index allocated");
        path
    }

    /// Common prefix of all allocated paths
    pub fn prefix(&self, cache: &HierarchyCache) -> IndexPath {
        let mut state = self.state.lock();
        self.seeded_prefix(&mut state, cache)
    }

    /// Number of paths handed out so far
    pub fn allocated(&self) -> u64 {
        self.state.lock().next
    }

    fn seeded_prefix(&self, state: &mut AllocatorState, cache: &HierarchyCache) -> IndexPath {
        if let Some(prefix) = &state.prefix {
            return prefix.clone();
        }
        let prefix = match self.virtual_parent {
            None => IndexPath::root(),
            Some(parent) => cache.node_index(parent).unwrap_or_else(|| {
                tracing::warn!(%parent, "virtual parent has no cached index");
                IndexPath::root()
            }),
        };
        state.prefix = Some(prefix.clone());
        prefix
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_allocation_is_sequential() {
        let cache = HierarchyCache::in_memory().unwrap();
        let allocator = IndexAllocator::for_virtual_parent(None);
        assert_eq!(allocator.allocate(&cache), IndexPath::single(0));
        assert_eq!(allocator.allocate(&cache), IndexPath::single(1));
        assert_eq!(allocator.allocated(), 2);
    }

    #[test]
    fn test_prefixed_allocation() {
        let cache = HierarchyCache::in_memory().unwrap();
        let allocator = IndexAllocator::with_prefix(IndexPath::new(vec![2, 5]));
        assert_eq!(allocator.allocate(&cache), IndexPath::new(vec![2, 5, 0]));
        assert_eq!(allocator.prefix(&cache), IndexPath::new(vec![2, 5]));
    }
}
