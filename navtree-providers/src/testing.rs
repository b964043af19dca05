//! In-memory collaborators for unit tests.

use crate::collaborators::{
    HierarchyFactory, NodeQuery, NodeRows, QueryExecutor, RulesEvaluator, Specification,
};
use crate::context::{ProviderContext, ProviderServices};
use crate::error::Result;
use crate::postprocess::PostProcessor;
use crate::provider::NodesProvider;
use navtree_cache::HierarchyCache;
use navtree_types::{
    DataSourceIdentifier, DataSourceInfo, InstanceKey, NavNode, NodeKey, NodeRef, NodeType,
    NodeVisibility, RulesetVariables,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1000);

pub fn keyed_node(label: &str, instance: u64) -> NavNode {
    let key = NodeKey::create(
        NodeType::Instances,
        "test",
        "c1",
        None,
        &[],
        vec![InstanceKey::new(1u64, instance)],
    );
    NavNode::new(key, label)
}

/// Uncached node with a unique key
pub fn node(label: &str) -> NodeRef {
    Arc::new(keyed_node(label, NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed)))
}

pub fn labels(nodes: &[NodeRef]) -> Vec<String> {
    nodes.iter().map(|node| node.label.clone()).collect()
}

/// Cache `node` in a data source of its own in the context's level
pub fn cached_node(context: &ProviderContext, mut node: NavNode) -> NodeRef {
    let level = context.ensure_hierarchy_level().unwrap().id.unwrap();
    let info = DataSourceInfo::new(DataSourceIdentifier::new(level, context.allocate_index()));
    let data_source = context.cache().ensure_data_source(&info, context.variables()).unwrap();
    node.extended.virtual_parent_ids = context.virtual_parent_id().into_iter().collect();
    context
        .cache()
        .cache_node(
            data_source.id().unwrap(),
            &node,
            &navtree_types::IndexPath::single(0),
            NodeVisibility::Visible,
        )
        .unwrap()
}

/// Serves registered rows per statement and counts reads
#[derive(Debug, Default)]
pub struct MockExecutor {
    rows: Mutex<HashMap<String, Vec<NavNode>>>,
    reads: AtomicUsize,
}

impl MockExecutor {
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl QueryExecutor for MockExecutor {
    fn row_identifiers(&self, query: &NodeQuery, _context: &ProviderContext) -> Result<Vec<String>> {
        let rows = self.rows.lock();
        Ok(rows
            .get(&query.statement)
            .map(|nodes| nodes.iter().map(|node| node.key.hash().to_string()).collect())
            .unwrap_or_default())
    }

    fn read_nodes<'a>(&'a self, query: &'a NodeQuery, _context: &'a ProviderContext) -> Result<NodeRows<'a>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let nodes = self.rows.lock().get(&query.statement).cloned().unwrap_or_default();
        let (offset, limit) = query
            .window
            .map(|window| (window.offset, window.limit))
            .unwrap_or((0, usize::MAX));
        Ok(Box::new(nodes.into_iter().skip(offset).take(limit).map(Ok)))
    }
}

/// Hide expressions of the form `ThisNode.Label = "text"`
#[derive(Debug, Default)]
pub struct MockRules;

impl RulesEvaluator for MockRules {
    fn evaluate_hide_expression(&self, expression: &str, node: &NavNode, _context: &ProviderContext) -> Result<bool> {
        Ok(expression
            .strip_prefix("ThisNode.Label = ")
            .map(|label| label.trim_matches('"') == node.label)
            .unwrap_or(false))
    }
}

/// Levels keyed by the label of their virtual parent
#[derive(Debug, Default)]
pub struct MockFactory {
    levels: Mutex<HashMap<Option<String>, Vec<NodeQuery>>>,
    post_processors: Mutex<Vec<PostProcessor>>,
}

impl MockFactory {
    pub fn set_post_processors(&self, processors: Vec<PostProcessor>) {
        *self.post_processors.lock() = processors;
    }
}

impl HierarchyFactory for MockFactory {
    fn create_providers(&self, context: &Arc<ProviderContext>) -> Result<Vec<NodesProvider>> {
        let parent = context.virtual_parent().map(|parent| parent.label.clone());
        let queries = self.levels.lock().get(&parent).cloned().unwrap_or_default();
        Ok(queries
            .into_iter()
            .map(|query| NodesProvider::query(Arc::clone(context), query))
            .collect())
    }

    fn post_processors(&self, _context: &ProviderContext) -> Vec<PostProcessor> {
        self.post_processors.lock().clone()
    }
}

#[derive(Debug)]
pub struct TestSetup {
    pub cache: Arc<HierarchyCache>,
    pub executor: Arc<MockExecutor>,
    pub factory: Arc<MockFactory>,
}

impl TestSetup {
    pub fn new() -> Self {
        Self {
            cache: Arc::new(HierarchyCache::in_memory().unwrap()),
            executor: Arc::new(MockExecutor::default()),
            factory: Arc::new(MockFactory::default()),
        }
    }

    pub fn services(&self) -> ProviderServices {
        ProviderServices {
            cache: Arc::clone(&self.cache),
            executor: Arc::clone(&self.executor) as Arc<dyn QueryExecutor>,
            rules: Arc::new(MockRules),
            factory: Arc::clone(&self.factory) as Arc<dyn HierarchyFactory>,
        }
    }

    pub fn root_context(&self) -> Arc<ProviderContext> {
        Arc::new(ProviderContext::root(self.services(), "c1", "r1", "en", RulesetVariables::new()))
    }

    /// Register rows labelled `rows` under a fresh statement of `specification`
    pub fn add_statement(&self, specification: Specification, rows: &[&str]) -> NodeQuery {
        let specification = Arc::new(specification);
        let statement = format!("q{}", NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed));
        let nodes = rows
            .iter()
            .map(|label| {
                let key = NodeKey::create(
                    specification.node_type.clone(),
                    specification.hash.clone(),
                    "c1",
                    None,
                    &[label.to_string()],
                    vec![InstanceKey::new(1u64, NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed))],
                );
                NavNode::new(key, *label)
            })
            .collect();
        self.executor.rows.lock().insert(statement.clone(), nodes);
        NodeQuery::new(specification, statement)
    }

    /// Register a query of `specification` under the node labelled
    /// `parent` (the root when `None`) returning nodes labelled `rows`
    pub fn add_query(&self, parent: Option<&str>, specification: Specification, rows: &[&str]) {
        let query = self.add_statement(specification, rows);
        self.factory
            .levels
            .lock()
            .entry(parent.map(str::to_string))
            .or_default()
            .push(query);
    }

    /// [`TestSetup::add_query`] with a plain instances specification
    pub fn add_rows(&self, parent: Option<&str>, rows: &[&str]) {
        let hash = format!("spec-{}", parent.unwrap_or("root"));
        self.add_query(parent, Specification::new(hash, NodeType::Instances), rows);
    }
}
