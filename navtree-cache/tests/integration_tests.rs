//! Integration tests for the hierarchy cache

use navtree_cache::{
    CacheChange, CacheConfig, ConnectionInfo, HierarchyCache, IndexAllocator, NodeParts,
    NodesScope,
};
use navtree_types::*;

fn combined(parent: Option<NodeId>) -> CombinedHierarchyLevelIdentifier {
    CombinedHierarchyLevelIdentifier::new("c1", "r1", "en", parent)
}

fn level(cache: &HierarchyCache, physical: Option<NodeId>, virtual_parent: Option<NodeId>) -> HierarchyLevelIdentifier {
    cache
        .ensure_hierarchy_level(&HierarchyLevelIdentifier::new(combined(physical), virtual_parent))
        .unwrap()
}

fn data_source(cache: &HierarchyCache, level: &HierarchyLevelIdentifier, index: IndexPath) -> DataSourceInfo {
    let info = DataSourceInfo::new(DataSourceIdentifier::new(level.id.unwrap(), index));
    cache.ensure_data_source(&info, &RulesetVariables::new()).unwrap()
}

fn node(label: &str) -> NavNode {
    let key = NodeKey::create(NodeType::Instances, "spec", "c1", None, &[label.to_string()], vec![]);
    NavNode::new(key, label)
}

fn cache_node(cache: &HierarchyCache, ds: &DataSourceInfo, label: &str, index: u64) -> NodeRef {
    cache
        .cache_node(ds.id().unwrap(), &node(label), &IndexPath::single(index), NodeVisibility::Visible)
        .unwrap()
}

fn labels(nodes: &[NodeRef]) -> Vec<String> {
    nodes.iter().map(|n| n.label.clone()).collect()
}

fn all() -> PageOptions {
    PageOptions::default()
}

#[test]
fn test_order_follows_insertion() {
    let cache = HierarchyCache::in_memory().unwrap();
    let level = level(&cache, None, None);
    let ds = data_source(&cache, &level, IndexPath::single(0));

    let names: Vec<String> = (0..25).map(|i| format!("n{}", i)).collect();
    for (i, name) in names.iter().enumerate() {
        cache_node(&cache, &ds, name, i as u64);
    }

    let loaded = cache.load_nodes(&NodesScope::DataSource(ds.id().unwrap()), &RulesetVariables::new(), all());
    assert_eq!(labels(&loaded), names);

    let page = cache.load_nodes(
        &NodesScope::HierarchyLevel(level.id.unwrap()),
        &RulesetVariables::new(),
        PageOptions::new(10, Some(3)),
    );
    assert_eq!(labels(&page), vec!["n10", "n11", "n12"]);
}

#[test]
fn test_lookups_are_idempotent() {
    let cache = HierarchyCache::in_memory().unwrap();
    let first = level(&cache, None, None);
    let second = level(&cache, None, None);
    assert_eq!(first.id, second.id);
    assert_eq!(cache.find_hierarchy_level(&combined(None), None), Some(first.clone()));

    let ds1 = data_source(&cache, &first, IndexPath::single(0));
    let ds2 = data_source(&cache, &first, IndexPath::single(0));
    assert_eq!(ds1.id(), ds2.id());
    assert_eq!(cache.stats().store.data_sources, 1);
    assert_eq!(cache.stats().store.hierarchy_levels, 1);
}

#[test]
fn test_combined_level_initialization() {
    let cache = HierarchyCache::in_memory().unwrap();
    let vars = RulesetVariables::new();
    let root = level(&cache, None, None);
    assert!(!cache.is_combined_level_initialized(&combined(None), &vars));

    let ds = data_source(&cache, &root, IndexPath::single(0));
    assert!(!cache.is_combined_level_initialized(&combined(None), &vars));
    cache.finalize_initialization(ds.id().unwrap()).unwrap();
    cache.finalize_initialization(ds.id().unwrap()).unwrap();
    assert!(cache.is_combined_level_initialized(&combined(None), &vars));
    assert!(cache.is_level_initialized(root.id.unwrap(), &vars));

    data_source(&cache, &root, IndexPath::single(1));
    assert!(!cache.is_combined_level_initialized(&combined(None), &vars));
    assert!(!cache.is_level_initialized(root.id.unwrap(), &vars));
}

#[test]
fn test_initialized_flag_never_resets() {
    let cache = HierarchyCache::in_memory().unwrap();
    let root = level(&cache, None, None);
    let ds = data_source(&cache, &root, IndexPath::single(0));
    cache.finalize_initialization(ds.id().unwrap()).unwrap();

    let mut info = cache.get_data_source(ds.id().unwrap()).unwrap();
    info.is_initialized = false;
    info.has_nodes = Some(true);
    cache.update_data_source(&info, DataSourceParts::ALL).unwrap();
    assert!(cache.is_data_source_initialized(ds.id().unwrap()));
}

#[test]
fn test_no_nodes_finalizes_data_source() {
    let cache = HierarchyCache::in_memory().unwrap();
    let root = level(&cache, None, None);
    let mut ds = data_source(&cache, &root, IndexPath::single(0));
    ds.has_nodes = Some(false);
    cache.update_data_source(&ds, DataSourceParts::HAS_NODES).unwrap();

    let stored = cache.get_data_source(ds.id().unwrap()).unwrap();
    assert!(stored.is_initialized);
    assert_eq!(stored.has_nodes, Some(false));
}

#[test]
fn test_data_source_parts_round_trip() {
    let cache = HierarchyCache::in_memory().unwrap();
    let root = level(&cache, None, None);
    let mut ds = data_source(&cache, &root, IndexPath::single(0));
    ds.related_classes.insert(ClassId(7), true);
    ds.specification_hash = "abc".into();
    ds.node_types = "instances".into();
    ds.direct_nodes_count = Some(3);
    ds.custom_json = serde_json::json!({"page_counts": [1000, 500]});
    cache.update_data_source(&ds, DataSourceParts::ALL).unwrap();

    let stored = cache.get_data_source(ds.id().unwrap()).unwrap();
    assert_eq!(stored.related_classes.get(&ClassId(7)), Some(&true));
    assert_eq!(stored.specification_hash, "abc");
    assert_eq!(stored.direct_nodes_count, Some(3));
    assert_eq!(stored.custom_json["page_counts"][1], 500);
}

#[test]
fn test_variables_select_matching_data_source() {
    let cache = HierarchyCache::in_memory().unwrap();
    let root = level(&cache, None, None);
    let on = RulesetVariables::new().with("show", true);
    let off = RulesetVariables::new().with("show", false);

    let info = DataSourceInfo::new(DataSourceIdentifier::new(root.id.unwrap(), IndexPath::single(0)))
        .with_variables(on.clone());
    let created = cache.ensure_data_source(&info, &on).unwrap();
    cache_node(&cache, &created, "a", 0);

    assert!(cache.find_data_source(root.id.unwrap(), &IndexPath::single(0), &on).is_some());
    assert!(cache.find_data_source(root.id.unwrap(), &IndexPath::single(0), &off).is_none());
    assert_eq!(cache.count_nodes(&NodesScope::CombinedLevel(combined(None)), &on), 1);
    assert_eq!(cache.count_nodes(&NodesScope::CombinedLevel(combined(None)), &off), 0);

    let other = cache
        .ensure_data_source(&info.clone().with_variables(off.clone()), &off)
        .unwrap();
    assert_ne!(other.id(), created.id());
}

#[test]
fn test_virtual_then_physical_restores_parents() {
    let cache = HierarchyCache::in_memory().unwrap();
    let root = level(&cache, None, None);
    let root_ds = data_source(&cache, &root, IndexPath::single(0));
    let parent = cache_node(&cache, &root_ds, "parent", 0);
    let parent_id = parent.id.unwrap();

    // parent -> child level with a virtual node whose own children also show under parent
    let child_level = level(&cache, Some(parent_id), Some(parent_id));
    let child_ds = data_source(&cache, &child_level, IndexPath::new(vec![0, 0, 0]));
    let middle = cache_node(&cache, &child_ds, "middle", 0);
    let middle_id = middle.id.unwrap();
    cache.make_virtual(middle_id).unwrap();
    let grand_level = level(&cache, Some(parent_id), Some(middle_id));
    let grand_ds = data_source(&cache, &grand_level, IndexPath::new(vec![0, 0, 0, 0, 0]));
    let leaf = cache_node(&cache, &grand_ds, "leaf", 0);
    assert_eq!(leaf.physical_parent, Some(parent_id));

    cache.make_virtual(parent_id).unwrap();
    assert_eq!(cache.physical_parent_id(leaf.id.unwrap()), None);
    assert_eq!(cache.physical_parent_id(middle_id), None);
    let root_nodes = cache.load_nodes(&NodesScope::CombinedLevel(combined(None)), &RulesetVariables::new(), all());
    assert_eq!(labels(&root_nodes), vec!["leaf"]);

    cache.make_physical(parent_id).unwrap();
    assert_eq!(cache.physical_parent_id(leaf.id.unwrap()), Some(parent_id));
    assert_eq!(cache.physical_parent_id(middle_id), Some(parent_id));
    assert_eq!(cache.node_visibility(parent_id), Some(NodeVisibility::Visible));
}

#[test]
fn test_child_level_sorts_in_place_of_virtual_parent() {
    let cache = HierarchyCache::in_memory().unwrap();
    let root = level(&cache, None, None);
    let ds = data_source(&cache, &root, IndexPath::single(0));
    cache_node(&cache, &ds, "a", 0);
    let hidden = cache_node(&cache, &ds, "b", 1);
    cache_node(&cache, &ds, "c", 2);
    let hidden_id = hidden.id.unwrap();
    cache.make_virtual(hidden_id).unwrap();

    let child_level = level(&cache, None, Some(hidden_id));
    let allocator = IndexAllocator::for_virtual_parent(Some(hidden_id));
    let child_ds = data_source(&cache, &child_level, allocator.allocate(&cache));
    cache_node(&cache, &child_ds, "b1", 0);
    cache_node(&cache, &child_ds, "b2", 1);

    let nodes = cache.load_nodes(&NodesScope::CombinedLevel(combined(None)), &RulesetVariables::new(), all());
    assert_eq!(labels(&nodes), vec!["a", "b1", "b2", "c"]);
}

#[test]
fn test_savepoint_cancel_restores_state() {
    let cache = HierarchyCache::in_memory().unwrap();
    let root = level(&cache, None, None);
    let index = IndexPath::single(0);
    {
        let savepoint = cache.savepoint().unwrap();
        let ds = data_source(&cache, &root, index.clone());
        let cached = cache_node(&cache, &ds, "temp", 0);
        assert!(cache.get_node(cached.id.unwrap()).is_some());
        assert!(!cache.quick_caches_empty());
        savepoint.cancel().unwrap();
    }
    assert!(cache
        .find_data_source(root.id.unwrap(), &index, &RulesetVariables::new())
        .is_none());
    assert!(cache.quick_caches_empty());
    assert_eq!(cache.stats().savepoint_rollbacks, 1);
}

#[test]
fn test_removal_marker_then_sweep() {
    let cache = HierarchyCache::in_memory().unwrap();
    let root = level(&cache, None, None);
    let ds = data_source(&cache, &root, IndexPath::single(0));
    cache_node(&cache, &ds, "old", 0);

    let token = cache.create_removal_marker(&combined(None)).unwrap();
    assert!(cache.find_hierarchy_level(&combined(None), None).is_none());
    let marked = combined(None).with_removal_id(Some(token));
    assert_eq!(cache.count_nodes(&NodesScope::CombinedLevel(marked), &RulesetVariables::new()), 1);

    let fresh = level(&cache, None, None);
    assert_ne!(fresh.id, root.id);
    let fresh_ds = data_source(&cache, &fresh, IndexPath::single(0));
    cache_node(&cache, &fresh_ds, "new", 0);

    assert_eq!(cache.remove(token).unwrap(), 1);
    let nodes = cache.load_nodes(&NodesScope::CombinedLevel(combined(None)), &RulesetVariables::new(), all());
    assert_eq!(labels(&nodes), vec!["new"]);
}

#[test]
fn test_update_node_payload_and_identity() {
    let cache = HierarchyCache::in_memory().unwrap();
    let root = level(&cache, None, None);
    let ds = data_source(&cache, &root, IndexPath::single(0));
    let cached = cache_node(&cache, &ds, "before", 0);
    let id = cached.id.unwrap();

    let mut changed = (*cached).clone();
    changed.label = "after".into();
    changed.has_children = Some(false);
    cache.update_node(id, &changed, NodeParts::PAYLOAD).unwrap();
    let loaded = cache.get_node(id).unwrap();
    assert_eq!(loaded.label, "after");
    assert_eq!(loaded.has_children, Some(false));

    changed.id = Some(NodeId(9_000));
    cache.update_node(id, &changed, NodeParts::ALL).unwrap();
    assert!(cache.get_node(id).is_none());
    assert_eq!(cache.get_node(NodeId(9_000)).unwrap().label, "after");
    assert_eq!(cache.node_index(NodeId(9_000)), Some(IndexPath::new(vec![0, 0])));
}

#[test]
fn test_find_node_by_key_path() {
    let cache = HierarchyCache::in_memory().unwrap();
    let root = level(&cache, None, None);
    let ds = data_source(&cache, &root, IndexPath::single(0));
    let cached = cache_node(&cache, &ds, "target", 0);

    let found = cache
        .find_node_by_key_path("c1", "r1", "en", &cached.key.hash_path)
        .unwrap();
    assert_eq!(found.id, cached.id);
    assert!(cache.find_node_by_key_path("c2", "r1", "en", &cached.key.hash_path).is_none());
}

#[test]
fn test_hidden_subtrees_excluded_from_filters() {
    let cache = HierarchyCache::in_memory().unwrap();
    let root = level(&cache, None, None);
    let ds = data_source(&cache, &root, IndexPath::single(0));
    let shown = cache_node(&cache, &ds, "Pump 1", 0);
    let hidden = cache_node(&cache, &ds, "Pump 2", 1);
    cache.make_hidden(hidden.id.unwrap()).unwrap();

    let under_hidden = level(&cache, hidden.id, hidden.id);
    let under_ds = data_source(&cache, &under_hidden, IndexPath::new(vec![0, 1, 0]));
    cache_node(&cache, &under_ds, "Pump 3", 0);

    let filtered = cache.load_nodes(
        &NodesScope::LabelFiltered {
            connection_id: "c1".into(),
            ruleset_id: "r1".into(),
            text: "Pump".into(),
        },
        &RulesetVariables::new(),
        all(),
    );
    assert_eq!(labels(&filtered), vec!["Pump 1"]);

    // the shown node has no child level yet, the hidden subtree is excluded
    let undetermined = cache.load_nodes(
        &NodesScope::UndeterminedChildren {
            connection_id: "c1".into(),
            ruleset_id: "r1".into(),
        },
        &RulesetVariables::new(),
        all(),
    );
    assert_eq!(undetermined.iter().map(|n| n.id).collect::<Vec<_>>(), vec![shown.id]);
}

#[test]
fn test_undetermined_children_requires_initialized_child_level() {
    let cache = HierarchyCache::in_memory().unwrap();
    let scope = NodesScope::UndeterminedChildren {
        connection_id: "c1".into(),
        ruleset_id: "r1".into(),
    };
    let vars = RulesetVariables::new();
    let root = level(&cache, None, None);
    let ds = data_source(&cache, &root, IndexPath::single(0));
    let parent = cache_node(&cache, &ds, "parent", 0);
    assert_eq!(cache.count_nodes(&scope, &vars), 1);

    let child_level = level(&cache, parent.id, parent.id);
    let child_ds = data_source(&cache, &child_level, IndexPath::new(vec![0, 0, 0]));
    assert_eq!(cache.count_nodes(&scope, &vars), 1);

    cache.finalize_initialization(child_ds.id().unwrap()).unwrap();
    assert_eq!(cache.count_nodes(&scope, &vars), 0);
}

#[test]
fn test_variable_change_invalidates() {
    let cache = HierarchyCache::in_memory().unwrap();
    let root = level(&cache, None, None);
    let vars = RulesetVariables::new().with("mode", "a");
    let info = DataSourceInfo::new(DataSourceIdentifier::new(root.id.unwrap(), IndexPath::single(0)))
        .with_variables(vars.clone());
    let ds = cache.ensure_data_source(&info, &vars).unwrap();
    cache_node(&cache, &ds, "x", 0);
    let untouched = data_source(&cache, &root, IndexPath::single(1));

    let affected = cache
        .invalidate(&CacheChange::VariablesChanged {
            ruleset_id: "r1".into(),
            variable_ids: vec!["mode".into()],
        })
        .unwrap();
    assert_eq!(affected, vec![combined(None)]);
    assert!(cache.get_data_source(ds.id().unwrap()).is_none());
    assert!(cache.get_data_source(untouched.id().unwrap()).is_some());
    assert_eq!(cache.node_count(), 0);
}

#[test]
fn test_instance_change_invalidates_by_class() {
    let cache = HierarchyCache::in_memory().unwrap();
    let root = level(&cache, None, None);
    let ds = data_source(&cache, &root, IndexPath::single(0));
    let mut n = node("instance");
    n.key.instance_keys = vec![InstanceKey::new(42, 1)];
    cache
        .cache_node(ds.id().unwrap(), &n, &IndexPath::single(0), NodeVisibility::Visible)
        .unwrap();

    let unrelated = cache
        .invalidate(&CacheChange::InstancesChanged {
            connection_id: "c1".into(),
            class_ids: vec![ClassId(7)],
        })
        .unwrap();
    assert!(unrelated.is_empty());

    let affected = cache
        .invalidate(&CacheChange::InstancesChanged {
            connection_id: "c1".into(),
            class_ids: vec![ClassId(42)],
        })
        .unwrap();
    assert_eq!(affected.len(), 1);
    assert_eq!(cache.node_count(), 0);
}

#[test]
fn test_stale_connection_is_dropped() {
    let cache = HierarchyCache::in_memory().unwrap();
    let info = ConnectionInfo::new("c1", "guid", "/data/a.db", 100);
    assert!(!cache.on_connection_opened(&info).unwrap());
    let root = level(&cache, None, None);
    data_source(&cache, &root, IndexPath::single(0));

    assert!(!cache.on_connection_opened(&info).unwrap());
    assert_eq!(cache.stats().store.hierarchy_levels, 1);

    let modified = ConnectionInfo::new("c1", "guid", "/data/a.db", 200);
    assert!(cache.on_connection_opened(&modified).unwrap());
    assert_eq!(cache.stats().store.hierarchy_levels, 0);
    assert_eq!(cache.stats().store.connections, 1);
}

#[test]
fn test_ruleset_hash_change_drops_levels() {
    let cache = HierarchyCache::in_memory().unwrap();
    assert!(!cache.on_ruleset_used("r1", "h1").unwrap());
    level(&cache, None, None);
    assert!(!cache.on_ruleset_used("r1", "h1").unwrap());
    assert!(cache.on_ruleset_used("r1", "h2").unwrap());
    assert_eq!(cache.stats().store.hierarchy_levels, 0);
}

#[test]
fn test_compaction_evicts_oldest_connection() {
    let dir = tempfile::tempdir().unwrap();
    let cache = HierarchyCache::open(CacheConfig::in_directory(dir.path())).unwrap();
    cache
        .on_connection_opened(&ConnectionInfo::new("old", "g1", "/a", 1))
        .unwrap();
    std::thread::sleep(std::time::Duration::from_millis(5));
    cache
        .on_connection_opened(&ConnectionInfo::new("new", "g2", "/b", 1))
        .unwrap();

    for connection in ["old", "new"] {
        let combined = CombinedHierarchyLevelIdentifier::new(connection, "r1", "en", None);
        let level = cache
            .ensure_hierarchy_level(&HierarchyLevelIdentifier::new(combined, None))
            .unwrap();
        let ds = data_source(&cache, &level, IndexPath::single(0));
        for i in 0..200 {
            let mut n = node(&format!("{}-{}", connection, i));
            n.description = "x".repeat(200);
            cache
                .cache_node(ds.id().unwrap(), &n, &IndexPath::single(i), NodeVisibility::Visible)
                .unwrap();
        }
    }

    let before = cache.size_bytes();
    let report = cache.compact_to(before - 1).unwrap();
    assert_eq!(report.evicted_connections.first().map(String::as_str), Some("old"));
    assert!(report.size_after < before);
    assert!(cache.list_levels(Some("old")).is_empty());
}

fn combined_for(connection: &str) -> CombinedHierarchyLevelIdentifier {
    CombinedHierarchyLevelIdentifier::new(connection, "r1", "en", None)
}

#[test]
fn test_concurrent_savepoints_keep_their_own_writes() {
    use std::sync::{Arc, Barrier};
    use std::thread;

    let cache = Arc::new(HierarchyCache::in_memory().unwrap());
    let workers = 6;
    let start = Arc::new(Barrier::new(workers));
    let handles: Vec<_> = (0..workers)
        .map(|worker| {
            let cache = Arc::clone(&cache);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                let connection = format!("c{worker}");
                start.wait();
                let outer = cache.savepoint().unwrap();
                let level = cache
                    .ensure_hierarchy_level(&HierarchyLevelIdentifier::new(combined_for(&connection), None))
                    .unwrap();
                let ds = data_source(&cache, &level, IndexPath::single(0));
                let inner = cache.savepoint().unwrap();
                for (index, label) in ["a", "b", "c"].iter().enumerate() {
                    cache_node(&cache, &ds, label, index as u64);
                }
                inner.commit().unwrap();
                cache.finalize_initialization(ds.id().unwrap()).unwrap();
                if worker % 2 == 0 {
                    outer.commit().unwrap();
                } else {
                    outer.cancel().unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(cache.savepoint_depth(), 0);
    for worker in 0..workers {
        let combined = combined_for(&format!("c{worker}"));
        let nodes = cache.load_nodes(&NodesScope::CombinedLevel(combined.clone()), &RulesetVariables::new(), all());
        if worker % 2 == 0 {
            assert_eq!(labels(&nodes), vec!["a", "b", "c"]);
            assert!(cache.is_combined_level_initialized(&combined, &RulesetVariables::new()));
        } else {
            assert!(nodes.is_empty());
            assert!(cache.find_hierarchy_level(&combined, None).is_none());
        }
    }
}

#[test]
fn test_level_building_on_many_threads_is_idempotent() {
    use std::sync::Barrier;
    use std::thread;

    let cache = HierarchyCache::in_memory().unwrap();
    let start = Barrier::new(4);
    let levels: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                scope.spawn(|| {
                    start.wait();
                    let level = level(&cache, None, None);
                    data_source(&cache, &level, IndexPath::single(0))
                })
            })
            .collect();
        handles.into_iter().map(|handle| handle.join().unwrap()).collect()
    });

    assert!(levels.windows(2).all(|pair| pair[0].id() == pair[1].id()));
    assert_eq!(cache.hierarchy_levels(&combined(None)).len(), 1);
}
