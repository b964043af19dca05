//! Query-backed providers.
//!
//! A query provider owns one data source. On first access it either replays
//! the data source from the cache (when it is initialized) or runs the query,
//! caches every produced node and decides per node whether it is shown,
//! replaced by its children or hidden. Large results of queries whose nodes
//! can't be hidden are split into pages, each with its own partial data
//! source, so that only the requested page gets materialized.
//!
//! Counts and the has-nodes flag are answered without materializing where
//! the specification guarantees that every row ends up as a visible node.

use crate::collaborators::{NodeQuery, RowWindow, Specification};
use crate::context::ProviderContext;
use crate::decision;
use crate::error::{ProviderError, Result};
use crate::provider::{CountInfo, Lazy, NodesProvider, ProviderKind};
use navtree_cache::{IndexAllocator, NodesScope};
use navtree_types::{
    DataSourceId, DataSourceIdentifier, DataSourceInfo, DataSourceParts, IndexPath, NavNode, NodeRef,
    NodeVisibility, PageOptions,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Minimum number of rows in one page of a split query
pub const PAGE_SIZE: usize = 1000;

const PAGE_COUNTS_KEY: &str = "page_counts";

/// What a query provider materializes
#[derive(Debug)]
pub struct QuerySource {
    query: NodeQuery,
    index: IndexPath,
    parent: Option<DataSourceId>,
}

impl QuerySource {
    pub(crate) fn new(query: NodeQuery, index: IndexPath, parent: Option<DataSourceId>) -> Self {
        Self { query, index, parent }
    }

    pub fn query(&self) -> &NodeQuery {
        &self.query
    }

    /// Index of the data source the nodes are cached in
    pub fn index(&self) -> &IndexPath {
        &self.index
    }

    fn specification(&self) -> &Specification {
        &self.query.specification
    }
}

/// Rows and distinct nodes of one page
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCount {
    pub total: usize,
    pub unique: usize,
}

/// Result rows of a query grouped into pages
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeCounts {
    pub pages: Vec<PageCount>,
}

impl NodeCounts {
    /// Group rows into pages of at least `page_size` rows. Consecutive rows
    /// with equal identifiers are one node and never end up in different
    /// pages.
    pub fn from_row_identifiers(identifiers: &[String], page_size: usize) -> Self {
        let mut pages = Vec::new();
        let mut current = PageCount::default();
        let mut previous: Option<&str> = None;
        for identifier in identifiers {
            if previous != Some(identifier.as_str()) {
                if current.total >= page_size {
                    pages.push(current);
                    current = PageCount::default();
                }
                current.unique += 1;
            }
            current.total += 1;
            previous = Some(identifier);
        }
        if current.total > 0 {
            pages.push(current);
        }
        Self { pages }
    }

    pub fn total_rows(&self) -> usize {
        self.pages.iter().map(|page| page.total).sum()
    }

    /// Number of distinct nodes
    pub fn unique(&self) -> usize {
        self.pages.iter().map(|page| page.unique).sum()
    }

    /// Counts persisted in a data source's custom JSON
    pub fn from_custom_json(custom: &Value) -> Option<Self> {
        let pages = custom.get(PAGE_COUNTS_KEY)?;
        serde_json::from_value(pages.clone()).ok().map(|pages| Self { pages })
    }

    pub fn write_custom_json(&self, custom: &mut Value) {
        if !custom.is_object() {
            *custom = Value::Object(serde_json::Map::new());
        }
        if let Value::Object(map) = custom {
            map.insert(
                PAGE_COUNTS_KEY.to_string(),
                serde_json::to_value(&self.pages).unwrap_or(Value::Null),
            );
        }
    }
}

/// Data source record a specification's nodes are cached in
pub(crate) fn data_source_template(
    context: &ProviderContext,
    specification: &Specification,
    level: DataSourceIdentifier,
    parent: Option<DataSourceId>,
) -> DataSourceInfo {
    let variables = context
        .variables()
        .snapshot(specification.used_variables.iter().map(String::as_str));
    let mut info = DataSourceInfo::new(level)
        .with_variables(variables)
        .with_specification(specification.hash.clone(), specification.node_type.as_str());
    info.filter = specification.filter.clone();
    info.related_classes = specification.related_classes.clone();
    info.parent_id = parent;
    info.is_partial = parent.is_some();
    info
}

/// The cached data source at `index` of the context's level
pub(crate) fn find_data_source(context: &ProviderContext, index: &IndexPath) -> Option<DataSourceInfo> {
    let level = context.find_hierarchy_level()?.id?;
    context.cache().find_data_source(level, index, context.variables())
}

/// The cached data source at `index` of the context's level, created (with
/// its level) when missing
pub(crate) fn ensure_data_source(
    context: &ProviderContext,
    specification: &Specification,
    index: &IndexPath,
    parent: Option<DataSourceId>,
) -> Result<DataSourceInfo> {
    let level = context
        .ensure_hierarchy_level()?
        .id
        .ok_or_else(|| ProviderError::invariant("ensured hierarchy level has no id"))?;
    let template = data_source_template(
        context,
        specification,
        DataSourceIdentifier::new(level, index.clone()),
        parent,
    );
    Ok(context.cache().ensure_data_source(&template, context.variables())?)
}

pub(crate) fn data_source_id(info: &DataSourceInfo) -> Result<DataSourceId> {
    info.id()
        .ok_or_else(|| ProviderError::invariant(format!("data source {} has no id", info.identifier.index)))
}

/// Run `f` inside a savepoint that is rolled back when `f` fails
pub(crate) fn in_savepoint<T>(context: &ProviderContext, f: impl FnOnce() -> Result<T>) -> Result<T> {
    let savepoint = context.cache().savepoint()?;
    match f() {
        Ok(value) => {
            savepoint.commit()?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback) = savepoint.cancel() {
                warn!(error = %rollback, "rolling back materialization failed");
            }
            debug!(canceled = err.is_canceled(), "materialization rolled back");
            Err(err)
        }
    }
}

/// Fill in what the engine knows about a freshly produced node
pub(crate) fn prepare_node(context: &ProviderContext, specification: &Specification, node: &mut NavNode) {
    node.id = None;
    node.physical_parent = context.physical_parent();
    node.extended.ruleset_id = context.ruleset_id().to_string();
    node.extended.virtual_parent_ids = context.virtual_parent_id().into_iter().collect();
    node.extended.is_node_initialized = false;
    specification.apply_to(&mut node.extended);
}

/// Cache `rows` as the visible direct nodes of `data_source`, polling for
/// cancellation before each row
pub(crate) fn cache_direct_nodes(
    context: &ProviderContext,
    data_source: &mut DataSourceInfo,
    specification: &Specification,
    rows: impl Iterator<Item = Result<NavNode>>,
) -> Result<Vec<NodeRef>> {
    let id = data_source_id(data_source)?;
    let mut cached = Vec::new();
    for (position, row) in rows.enumerate() {
        context.check_canceled()?;
        let mut node = row?;
        prepare_node(context, specification, &mut node);
        cached.push(context.cache().cache_node(
            id,
            &node,
            &IndexPath::single(position as u64),
            NodeVisibility::Visible,
        )?);
    }
    data_source.direct_nodes_count = Some(cached.len());
    let mut parts = DataSourceParts::DIRECT_NODES_COUNT;
    if cached.is_empty() {
        data_source.has_nodes = Some(false);
        parts |= DataSourceParts::HAS_NODES;
    }
    context.cache().update_data_source(data_source, parts)?;
    trace!(%id, nodes = cached.len(), "direct nodes cached");
    Ok(cached)
}

/// Decide every node of a data source, then finalize it
pub(crate) fn finish_data_source(
    provider: &NodesProvider,
    data_source: &DataSourceInfo,
    nodes: Vec<NodeRef>,
) -> Result<Arc<NodesProvider>> {
    let context = provider.context();
    let providers = decision::node_providers(context, nodes)?;
    let id = data_source_id(data_source)?;
    context.cache().finalize_initialization(id)?;
    debug!(%id, index = %data_source.identifier.index, "data source initialized");
    Ok(Arc::new(NodesProvider::from_shared(Arc::clone(context), providers)))
}

/// Inner provider of the cached nodes of an initialized data source
pub(crate) fn replay_data_source(
    provider: &NodesProvider,
    data_source: &DataSourceInfo,
) -> Result<Arc<NodesProvider>> {
    let context = provider.context();
    let id = data_source_id(data_source)?;
    let nodes = context
        .cache()
        .load_nodes(&NodesScope::DataSource(id), context.variables(), PageOptions::default());
    trace!(%id, nodes = nodes.len(), "replaying data source");
    let providers = decision::node_providers(context, nodes)?;
    Ok(Arc::new(NodesProvider::from_shared(Arc::clone(context), providers)))
}

/// Whether decisions may hide some of the specification's nodes here
pub(crate) fn may_hide(context: &ProviderContext, specification: &Specification) -> bool {
    specification.may_hide() || decision::has_same_specification_ancestor(context, specification)
}

/// Whether decisions may hide all of the specification's nodes here
pub(crate) fn may_hide_all(context: &ProviderContext, specification: &Specification) -> bool {
    specification.may_hide_all() || decision::has_same_specification_ancestor(context, specification)
}

pub(crate) fn initialize(provider: &NodesProvider, source: &QuerySource) -> Result<Arc<NodesProvider>> {
    let context = provider.context();
    context.check_canceled()?;
    in_savepoint(context, || match find_data_source(context, &source.index) {
        Some(data_source) if data_source.is_initialized => replay(provider, source, &data_source),
        _ => materialize(provider, source),
    })
}

fn replay(provider: &NodesProvider, source: &QuerySource, data_source: &DataSourceInfo) -> Result<Arc<NodesProvider>> {
    let id = data_source_id(data_source)?;
    if let Some(counts) = NodeCounts::from_custom_json(&data_source.custom_json) {
        if !provider.context().cache().child_data_sources(id).is_empty() {
            return create_pages(provider, source, data_source, &counts);
        }
    }
    replay_data_source(provider, data_source)
}

fn materialize(provider: &NodesProvider, source: &QuerySource) -> Result<Arc<NodesProvider>> {
    let context = provider.context();
    let specification = source.specification();
    let mut data_source = ensure_data_source(context, specification, &source.index, source.parent)?;
    if let Some(counts) = paging_counts(provider, source, &mut data_source)? {
        return create_pages(provider, source, &data_source, &counts);
    }
    debug!(index = %source.index, specification = %specification.hash, "running query");
    let rows = context.executor().read_nodes(&source.query, context)?;
    let nodes = cache_direct_nodes(context, &mut data_source, specification, rows)?;
    finish_data_source(provider, &data_source, nodes)
}

/// Page counts when the query should be split into pages
fn paging_counts(
    provider: &NodesProvider,
    source: &QuerySource,
    data_source: &mut DataSourceInfo,
) -> Result<Option<NodeCounts>> {
    let context = provider.context();
    if source.query.window.is_some()
        || !context.page().has_size()
        || context.flags().full_load_required
        || may_hide(context, source.specification())
    {
        return Ok(None);
    }
    let counts = node_counts(context, source, data_source)?;
    Ok((counts.unique() > PAGE_SIZE).then_some(counts))
}

/// Page counts of the query, from the data source when known
fn node_counts(context: &ProviderContext, source: &QuerySource, data_source: &mut DataSourceInfo) -> Result<NodeCounts> {
    if data_source.total_nodes_count.is_some() {
        if let Some(counts) = NodeCounts::from_custom_json(&data_source.custom_json) {
            return Ok(counts);
        }
    }
    let identifiers = context.executor().row_identifiers(&source.query, context)?;
    context.check_canceled()?;
    let counts = NodeCounts::from_row_identifiers(&identifiers, PAGE_SIZE);
    data_source.total_nodes_count = Some(counts.unique());
    data_source.has_nodes = Some(counts.unique() > 0);
    counts.write_custom_json(&mut data_source.custom_json);
    context.cache().update_data_source(
        data_source,
        DataSourceParts::TOTAL_NODES_COUNT | DataSourceParts::HAS_NODES | DataSourceParts::CUSTOM_JSON,
    )?;
    trace!(rows = counts.total_rows(), nodes = counts.unique(), "query rows counted");
    Ok(counts)
}

/// Replace the query by one windowed query per page. Every page gets a
/// partial data source right away so the level only counts as initialized
/// once all pages are.
fn create_pages(
    provider: &NodesProvider,
    source: &QuerySource,
    data_source: &DataSourceInfo,
    counts: &NodeCounts,
) -> Result<Arc<NodesProvider>> {
    let context = provider.context();
    let parent = data_source_id(data_source)?;
    let allocator = Arc::new(IndexAllocator::with_prefix(data_source.identifier.index.clone()));
    let page_context = Arc::new(context.for_same_level().with_allocator(allocator));

    let mut offset = 0;
    let mut pages = Vec::with_capacity(counts.pages.len());
    for page in &counts.pages {
        context.check_canceled()?;
        let query = source.query.windowed(RowWindow {
            offset,
            limit: page.total,
        });
        let index = page_context.allocate_index();
        ensure_data_source(&page_context, source.specification(), &index, Some(parent))?;
        let page_source = QuerySource::new(query, index, Some(parent));
        let page_provider = NodesProvider::new(Arc::clone(&page_context), ProviderKind::Query(Lazy::new(page_source)))
            .with_known(Some(page.unique), Some(page.unique > 0));
        pages.push(Arc::new(page_provider));
        offset += page.total;
    }
    context.cache().finalize_initialization(parent)?;
    debug!(%parent, pages = pages.len(), "query split into pages");
    Ok(Arc::new(NodesProvider::from_shared(Arc::clone(context), pages)))
}

pub(crate) fn count(provider: &NodesProvider, lazy: &Lazy<QuerySource>) -> Result<CountInfo> {
    if let Some(inner) = lazy.get() {
        return inner.count_info();
    }
    let context = provider.context();
    let source = lazy.source();
    if let Some(total) = find_data_source(context, &source.index).and_then(|ds| ds.total_nodes_count) {
        return Ok(CountInfo::accurate(total));
    }
    if source.query.window.is_some()
        || context.flags().full_load_required
        || may_hide(context, source.specification())
    {
        let info = provider.materialized()?.count_info()?;
        if info.accurate {
            if let Some(mut data_source) = find_data_source(context, &source.index) {
                data_source.total_nodes_count = Some(info.count);
                context
                    .cache()
                    .update_data_source(&data_source, DataSourceParts::TOTAL_NODES_COUNT)?;
            }
        }
        return Ok(info);
    }
    let mut data_source = ensure_data_source(context, source.specification(), &source.index, source.parent)?;
    Ok(CountInfo::accurate(node_counts(context, source, &mut data_source)?.unique()))
}

pub(crate) fn has_nodes(provider: &NodesProvider, lazy: &Lazy<QuerySource>) -> Result<bool> {
    if let Some(inner) = lazy.get() {
        return inner.has_nodes();
    }
    let context = provider.context();
    let source = lazy.source();
    if let Some(has_nodes) = find_data_source(context, &source.index).and_then(|ds| ds.has_nodes) {
        return Ok(has_nodes);
    }
    if source.query.window.is_none()
        && !context.flags().full_load_required
        && !may_hide_all(context, source.specification())
    {
        let has_rows = context.executor().has_rows(&source.query, context)?;
        let mut data_source = ensure_data_source(context, source.specification(), &source.index, source.parent)?;
        data_source.has_nodes = Some(has_rows);
        context.cache().update_data_source(&data_source, DataSourceParts::HAS_NODES)?;
        return Ok(has_rows);
    }
    provider.materialized()?.has_nodes()
}

/// Create the data source of a provider that is not materialized yet
pub(crate) fn reserve(provider: &NodesProvider, lazy: &Lazy<QuerySource>) -> Result<()> {
    if lazy.get().is_some() {
        return Ok(());
    }
    let source = lazy.source();
    ensure_data_source(provider.context(), source.specification(), &source.index, source.parent)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_page_counts_group_equal_rows() {
        let counts = NodeCounts::from_row_identifiers(&ids(&["a", "a", "b", "c", "c", "c", "d"]), 2);
        assert_eq!(
            counts.pages,
            vec![
                PageCount { total: 2, unique: 1 },
                PageCount { total: 4, unique: 2 },
                PageCount { total: 1, unique: 1 },
            ]
        );
        assert_eq!(counts.total_rows(), 7);
        assert_eq!(counts.unique(), 4);
    }

    #[test]
    fn test_page_counts_of_large_result() {
        let rows: Vec<String> = (0..2500).map(|i| i.to_string()).collect();
        let counts = NodeCounts::from_row_identifiers(&rows, PAGE_SIZE);
        let totals: Vec<_> = counts.pages.iter().map(|page| page.total).collect();
        assert_eq!(totals, [1000, 1000, 500]);
        assert_eq!(counts.unique(), 2500);
        assert!(NodeCounts::from_row_identifiers(&[], PAGE_SIZE).pages.is_empty());
    }

    #[test]
    fn test_custom_json_keeps_other_keys() {
        let counts = NodeCounts {
            pages: vec![PageCount { total: 3, unique: 2 }],
        };
        let mut custom = json!({"other": 1});
        counts.write_custom_json(&mut custom);
        assert_eq!(custom["other"], 1);
        assert_eq!(NodeCounts::from_custom_json(&custom), Some(counts.clone()));

        let mut empty = Value::Null;
        counts.write_custom_json(&mut empty);
        assert_eq!(NodeCounts::from_custom_json(&empty), Some(counts));
        assert_eq!(NodeCounts::from_custom_json(&json!({})), None);
    }
}
