use crate::context::ProviderContext;
use crate::error::Result;
use crate::hierarchy;
use crate::provider::NodesProvider;
use navtree_types::NodeType;
use std::sync::Arc;
use tracing::debug;

/// A level made of a single display-label grouping node shows the grouped
/// nodes instead
pub(super) fn process(
    context: &Arc<ProviderContext>,
    base: &Arc<NodesProvider>,
) -> Result<Option<Arc<NodesProvider>>> {
    let counted = base.count_up_to(2)?;
    if !counted.accurate || counted.count != 1 {
        return Ok(None);
    }
    let Some(node) = base.get_node(0)? else {
        return Ok(None);
    };
    let Some(id) = node.id else {
        return Ok(None);
    };
    if node.key.node_type != NodeType::DisplayLabelGrouping {
        return Ok(None);
    }

    debug!(%id, label = %node.label, "replacing lone label grouping node by its children");
    context.cache().make_virtual(id)?;
    let children = hierarchy::child_level_provider(context, &node)?;
    children.reserve_data_sources()?;
    Ok(Some(Arc::new(children)))
}
