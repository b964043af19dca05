//! Benchmarks for node caching and replay

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use navtree_cache::{HierarchyCache, NodesScope};
use navtree_types::*;

fn setup() -> (HierarchyCache, CombinedHierarchyLevelIdentifier, DataSourceId) {
    let cache = HierarchyCache::in_memory().unwrap();
    let combined = CombinedHierarchyLevelIdentifier::new("bench", "rules", "en", None);
    let level = cache
        .ensure_hierarchy_level(&HierarchyLevelIdentifier::new(combined.clone(), None))
        .unwrap();
    let info = DataSourceInfo::new(DataSourceIdentifier::new(level.id.unwrap(), IndexPath::single(0)));
    let ds = cache
        .ensure_data_source(&info, &RulesetVariables::new())
        .unwrap();
    (cache, combined, ds.id().unwrap())
}

fn make_node(i: u64) -> NavNode {
    let key = NodeKey::create(
        NodeType::Instances,
        "spec",
        "bench",
        None,
        &[],
        vec![InstanceKey::new(1, i)],
    );
    NavNode::new(key, format!("Node {}", i))
}

fn bench_cache_node(c: &mut Criterion) {
    let (cache, _, ds) = setup();
    let mut i = 0u64;

    c.bench_function("cache_node", |b| {
        b.iter(|| {
            let node = make_node(i);
            let cached = cache
                .cache_node(ds, &node, &IndexPath::single(i), NodeVisibility::Visible)
                .unwrap();
            i += 1;
            black_box(cached);
        })
    });
}

fn bench_load_level(c: &mut Criterion) {
    let (cache, combined, ds) = setup();
    {
        let _savepoint = cache.savepoint().unwrap();
        for i in 0..1000 {
            cache
                .cache_node(ds, &make_node(i), &IndexPath::single(i), NodeVisibility::Visible)
                .unwrap();
        }
    }
    let scope = NodesScope::CombinedLevel(combined);
    let variables = RulesetVariables::new();

    c.bench_function("load_level_page_50", |b| {
        b.iter(|| {
            let nodes = cache.load_nodes(&scope, &variables, PageOptions::new(black_box(500), Some(50)));
            black_box(nodes);
        })
    });

    c.bench_function("count_level", |b| {
        b.iter(|| black_box(cache.count_nodes(&scope, &variables)))
    });
}

criterion_group!(benches, bench_cache_node, bench_load_level);
criterion_main!(benches);
