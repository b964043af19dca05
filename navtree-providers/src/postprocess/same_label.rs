use crate::collaborators::Specification;
use crate::context::ProviderContext;
use crate::error::Result;
use crate::provider::NodesProvider;
use crate::query::{data_source_id, ensure_data_source, find_data_source, in_savepoint};
use navtree_cache::NodesScope;
use navtree_types::{ClassId, DataSourceParts, IndexPath, NavNode, NodeKey, NodeRef, NodeType, NodeVisibility};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

fn is_suitable(context: &ProviderContext, node: &NavNode, grouped_classes: &[ClassId]) -> bool {
    node.id.is_some()
        && node.key.is_instances()
        && (grouped_classes.is_empty()
            || node.key.instance_keys.iter().any(|key| {
                grouped_classes
                    .iter()
                    .any(|&class| context.rules().is_class_of(key.class_id, class))
            }))
}

/// One node standing for every node of `group`
fn merge(context: &ProviderContext, group: &[NodeRef]) -> NavNode {
    let first = &group[0];
    let mut merged = NavNode::clone(first);
    merged.id = None;
    merged.has_children = None;
    merged.extended.is_node_initialized = true;
    merged.extended.merged_node_ids = group.iter().filter_map(|node| node.id).collect();

    let mut instance_keys = Vec::new();
    let mut virtual_parents = Vec::new();
    for node in group {
        for key in &node.key.instance_keys {
            if !instance_keys.contains(key) {
                instance_keys.push(*key);
            }
        }
        for parent in &node.extended.virtual_parent_ids {
            if !virtual_parents.contains(parent) {
                virtual_parents.push(*parent);
            }
        }
    }
    merged.extended.virtual_parent_ids = virtual_parents;

    let parent_key = context.virtual_parent().map(|parent| &parent.key);
    merged.key = NodeKey::create(
        NodeType::Instances,
        first.key.specification_identifier.clone(),
        context.connection_id(),
        parent_key,
        &[],
        instance_keys,
    );
    merged
}

/// Instance nodes sharing a label are merged into one node that stands for
/// all of them; the merged originals are hidden
pub(super) fn process(
    context: &Arc<ProviderContext>,
    base: &Arc<NodesProvider>,
    grouped_classes: &[ClassId],
) -> Result<Option<Arc<NodesProvider>>> {
    let prefix = context.index_prefix();
    if let Some(merged) = find_data_source(context, &prefix) {
        if merged.is_initialized {
            trace!(index = %prefix, "same-label merge already cached");
            let scope = NodesScope::CombinedLevel(context.combined_identifier());
            return Ok(Some(Arc::new(NodesProvider::cached(Arc::clone(context), scope))));
        }
    }

    let nodes = base.all_nodes()?;
    if nodes.len() < 2 {
        return Ok(None);
    }

    let mut groups: Vec<Vec<NodeRef>> = Vec::new();
    let mut by_label: HashMap<&str, usize> = HashMap::new();
    for node in &nodes {
        if !is_suitable(context, node, grouped_classes) {
            continue;
        }
        match by_label.get(node.label.as_str()) {
            Some(&group) => groups[group].push(Arc::clone(node)),
            None => {
                by_label.insert(node.label.as_str(), groups.len());
                groups.push(vec![Arc::clone(node)]);
            }
        }
    }
    groups.retain(|group| group.len() > 1);
    if groups.is_empty() {
        return Ok(None);
    }

    let cache = context.cache();
    let replacements = in_savepoint(context, || {
        let unspecified = Specification::new(String::new(), NodeType::Instances);
        let mut data_source = ensure_data_source(context, &unspecified, &prefix, None)?;
        let id = data_source_id(&data_source)?;

        let mut replacements: HashMap<_, NodeRef> = HashMap::new();
        for (position, group) in groups.iter().enumerate() {
            context.check_canceled()?;
            let first = group[0].id;
            let local_index = first
                .and_then(|id| cache.node_index(id))
                .and_then(|index| index.strip_prefix(&prefix))
                .unwrap_or_else(|| IndexPath::single(position as u64));
            let merged = cache.cache_node(id, &merge(context, group), &local_index, NodeVisibility::Visible)?;
            for node in group {
                if let Some(original) = node.id {
                    cache.make_hidden(original)?;
                }
            }
            if let Some(first) = first {
                replacements.insert(first, merged);
            }
        }

        data_source.direct_nodes_count = Some(groups.len());
        data_source.total_nodes_count = Some(groups.len());
        data_source.has_nodes = Some(true);
        cache.update_data_source(
            &data_source,
            DataSourceParts::DIRECT_NODES_COUNT | DataSourceParts::TOTAL_NODES_COUNT | DataSourceParts::HAS_NODES,
        )?;
        cache.finalize_initialization(id)?;
        Ok(replacements)
    })?;
    debug!(merged = replacements.len(), "merged nodes with equal labels");

    let merged_away: Vec<_> = groups
        .iter()
        .flat_map(|group| group[1..].iter().filter_map(|node| node.id))
        .collect();
    let result = nodes
        .into_iter()
        .filter(|node| node.id.map_or(true, |id| !merged_away.contains(&id)))
        .map(|node| match node.id.and_then(|id| replacements.get(&id)) {
            Some(merged) => Arc::clone(merged),
            None => node,
        })
        .collect();
    Ok(Some(Arc::new(NodesProvider::from_nodes(Arc::clone(context), result))))
}
