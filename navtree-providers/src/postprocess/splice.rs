//! Inserting nodes into a sequence by their cached order.

use navtree_cache::HierarchyCache;
use navtree_types::{IndexPath, NodeRef};

/// Merge `extra` into `base`, both ordered by index.
///
/// Each extra item lands before the first base item with a greater index.
/// Base items without an index keep their place; extra items without one
/// go last.
pub fn insert_by_index<T>(base: Vec<(Option<IndexPath>, T)>, mut extra: Vec<(Option<IndexPath>, T)>) -> Vec<T> {
    extra.sort_by(|(a, _), (b, _)| match (a, b) {
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
    let mut extra = extra.into_iter().peekable();
    let mut merged = Vec::new();
    for (index, item) in base {
        if let Some(index) = &index {
            while let Some(value) = extra.next_if(|(extra_index, _)| extra_index.as_ref().is_some_and(|e| e < index)) {
                merged.push(value.1);
            }
        }
        merged.push(item);
    }
    merged.extend(extra.map(|(_, item)| item));
    merged
}

/// [`insert_by_index`] over cached nodes, indexed by their order in the cache
pub fn splice_nodes(cache: &HierarchyCache, base: Vec<NodeRef>, extra: Vec<NodeRef>) -> Vec<NodeRef> {
    let indexed = |nodes: Vec<NodeRef>| -> Vec<(Option<IndexPath>, NodeRef)> {
        nodes
            .into_iter()
            .map(|node| (node.id.and_then(|id| cache.node_index(id)), node))
            .collect()
    };
    insert_by_index(indexed(base), indexed(extra))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(segments: &[u64], item: &'static str) -> (Option<IndexPath>, &'static str) {
        (Some(IndexPath::new(segments.to_vec())), item)
    }

    #[test]
    fn test_insert_by_index() {
        let base = vec![at(&[0], "a"), at(&[2], "c"), at(&[4], "e")];
        let extra = vec![at(&[3], "d"), at(&[1, 5], "b"), (None, "z")];
        assert_eq!(insert_by_index(base, extra), ["a", "b", "c", "d", "e", "z"]);
    }

    #[test]
    fn test_unindexed_base_items_keep_their_place() {
        let base = vec![(None, "x"), at(&[5], "y")];
        let extra = vec![at(&[1], "a"), at(&[9], "b")];
        assert_eq!(insert_by_index(base, extra), ["x", "a", "y", "b"]);
    }

    #[test]
    fn test_equal_index_goes_after_base() {
        let base = vec![at(&[1], "base")];
        let extra = vec![at(&[1], "extra")];
        assert_eq!(insert_by_index(base, extra), ["base", "extra"]);
    }
}
