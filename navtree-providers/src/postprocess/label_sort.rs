//! Label-sorted merge of a level's data sources.
//!
//! Nodes of one specification may be spread over several adjacent data
//! sources, for example when the nodes of a virtual parent's child level
//! stand in for the parent. Adjacent data sources whose nodes are mergeable
//! are grouped and each group is sorted by label as a whole. Nodes cached by
//! other post-processors, in data sources without a specification, join the
//! group of the specification they came from or are spliced back in by
//! their cached order.

use super::splice::splice_nodes;
use crate::context::ProviderContext;
use crate::error::Result;
use crate::provider::NodesProvider;
use navtree_cache::NodesScope;
use navtree_types::{DataSourceInfo, NodeRef, NodeType, PageOptions};
use std::sync::Arc;
use tracing::trace;

/// Whether two node types may share one sorted group
fn types_mergeable(a: &str, b: &str) -> bool {
    let instances = NodeType::Instances.as_str();
    let labels = NodeType::DisplayLabelGrouping.as_str();
    a == b || (a == instances && b == labels) || (a == labels && b == instances)
}

/// Adjacent data sources with the same merge key are sorted together
#[derive(Debug)]
struct DataSourcesMergeKey<'a> {
    specification_hash: &'a str,
    node_types: &'a str,
    partial: bool,
    label_sorted: bool,
}

impl<'a> DataSourcesMergeKey<'a> {
    fn of(context: &ProviderContext, data_source: &'a DataSourceInfo) -> Self {
        Self {
            specification_hash: &data_source.specification_hash,
            node_types: &data_source.node_types,
            partial: data_source.is_partial,
            label_sorted: context
                .rules()
                .is_label_sorted(&data_source.specification_hash, context),
        }
    }

    fn merges_with(&self, other: &Self) -> bool {
        !self.partial
            && !other.partial
            && self.label_sorted
            && other.label_sorted
            && self.specification_hash == other.specification_hash
            && types_mergeable(self.node_types, other.node_types)
    }
}

#[derive(Debug)]
struct Group<'a> {
    key: DataSourcesMergeKey<'a>,
    nodes: Vec<NodeRef>,
}

impl Group<'_> {
    fn sortable(&self) -> bool {
        !self.key.partial && self.key.label_sorted
    }
}

pub(super) fn process(
    context: &Arc<ProviderContext>,
    base: &Arc<NodesProvider>,
) -> Result<Option<Arc<NodesProvider>>> {
    base.initialize()?;
    let cache = context.cache();
    let data_sources = cache.combined_data_sources(&context.combined_identifier(), context.variables());
    if data_sources.is_empty() {
        return Ok(None);
    }

    let mut groups: Vec<Group<'_>> = Vec::new();
    let mut unspecified: Vec<NodeRef> = Vec::new();
    for data_source in &data_sources {
        context.check_canceled()?;
        let Some(id) = data_source.id() else {
            continue;
        };
        let nodes = cache.load_nodes(
            &NodesScope::VisibleInDataSource(id),
            context.variables(),
            PageOptions::default(),
        );
        if nodes.is_empty() {
            continue;
        }
        if data_source.specification_hash.is_empty() {
            unspecified.extend(nodes);
            continue;
        }
        let key = DataSourcesMergeKey::of(context, data_source);
        match groups.last_mut() {
            Some(group) if group.key.merges_with(&key) => group.nodes.extend(nodes),
            _ => groups.push(Group { key, nodes }),
        }
    }

    let mut leftovers = Vec::new();
    for node in unspecified {
        let specification = node.key.specification_identifier.as_str();
        match groups
            .iter_mut()
            .find(|group| group.sortable() && group.key.specification_hash == specification)
        {
            Some(group) => group.nodes.push(node),
            None => leftovers.push(node),
        }
    }

    let rules = context.rules();
    let mut sorted = Vec::new();
    for mut group in groups {
        if group.sortable() {
            group.nodes.sort_by(|a, b| rules.compare_labels(&a.label, &b.label));
        }
        trace!(
            specification = group.key.specification_hash,
            nodes = group.nodes.len(),
            sorted = group.sortable(),
            "label sort group"
        );
        sorted.extend(group.nodes);
    }
    let nodes = splice_nodes(cache, sorted, leftovers);
    Ok(Some(Arc::new(NodesProvider::from_nodes(Arc::clone(context), nodes))))
}
