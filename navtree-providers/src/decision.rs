//! Per-node visibility decisions.
//!
//! Every node a query or custom provider produces is decided once: shown as
//! is, replaced by its children (the node turns virtual), or hidden together
//! with its subtree. The outcome is persisted, so replaying a data source
//! maps nodes straight to providers by their cached visibility.
//!
//! Knowing whether a node has children may mean building and counting its
//! child level, so that is only asked when a flag on the node needs it.

use crate::collaborators::Specification;
use crate::context::ProviderContext;
use crate::error::{ProviderError, Result};
use crate::hierarchy;
use crate::provider::NodesProvider;
use navtree_cache::NodeParts;
use navtree_types::{ChildrenHint, NavNode, NodeRef, NodeType, NodeVisibility};
use std::sync::Arc;
use tracing::{debug, trace};

/// Outcome of deciding one node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeDecision {
    ReturnAsIs,
    ReturnChildrenInstead,
    Hidden,
}

/// Logical ancestors of a context's level, nearest first
pub(crate) struct Ancestors<'a> {
    context: &'a ProviderContext,
    next: Option<NodeRef>,
}

impl<'a> Ancestors<'a> {
    pub(crate) fn of(context: &'a ProviderContext) -> Self {
        Self {
            context,
            next: context.virtual_parent().cloned(),
        }
    }
}

impl Iterator for Ancestors<'_> {
    type Item = NodeRef;

    fn next(&mut self) -> Option<NodeRef> {
        let current = self.next.take()?;
        self.next = current
            .virtual_parent()
            .and_then(|parent| self.context.cache().get_node(parent));
        Some(current)
    }
}

/// Whether an ancestor was produced by the same specification as the
/// nodes of `specification` would be
pub(crate) fn has_same_specification_ancestor(context: &ProviderContext, specification: &Specification) -> bool {
    Ancestors::of(context).any(|ancestor| {
        ancestor.key.specification_identifier == specification.hash
            && ancestor.key.node_type == specification.node_type
    })
}

fn is_similar(node: &NavNode, ancestor: &NavNode) -> bool {
    if node.key.hash() != ancestor.key.hash() {
        return false;
    }
    if node.key.is_grouping() && ancestor.key.is_grouping() {
        return node.key.grouped_instances_count == ancestor.key.grouped_instances_count
            && node.key.instance_keys == ancestor.key.instance_keys;
    }
    true
}

fn similar_in_chain(context: &ProviderContext, node: &NavNode, ancestor: &NavNode, suppress: &mut u32) -> bool {
    if is_similar(node, ancestor) {
        if *suppress == 0 {
            return true;
        }
        *suppress -= 1;
    }
    ancestor.extended.virtual_parent_ids.iter().any(|id| match context.cache().get_node(*id) {
        Some(grandparent) => similar_in_chain(context, node, &grandparent, suppress),
        None => {
            debug!(%id, "virtual parent of an ancestor is not cached");
            false
        }
    })
}

/// Whether a structurally identical node already appears among the node's
/// ancestors, which would make the hierarchy infinite
pub fn has_similar_ancestor(context: &ProviderContext, node: &NavNode) -> bool {
    let Some(parent) = context.virtual_parent() else {
        return false;
    };
    let mut suppress = node.extended.allowed_similar_ancestors;
    similar_in_chain(context, node, parent, &mut suppress)
}

/// Whether the context's virtual parent itself repeats one of its ancestors
pub fn parent_repeats_ancestor(context: &ProviderContext) -> bool {
    let Some(parent) = context.virtual_parent() else {
        return false;
    };
    let Some(grandparent) = parent.virtual_parent().and_then(|id| context.cache().get_node(id)) else {
        return false;
    };
    let mut suppress = parent.extended.allowed_similar_ancestors;
    similar_in_chain(context, parent, &grandparent, &mut suppress)
}

fn needs_children_determined(node: &NavNode) -> bool {
    node.extended.hide_if_no_children
        || node
            .extended
            .hide_expression
            .as_deref()
            .is_some_and(|expression| expression.contains(".HasChildren"))
}

/// Whether the node has children, building its child level if the hint
/// doesn't say
fn determine_children(context: &ProviderContext, node: &NodeRef) -> Result<bool> {
    match node.extended.children_hint {
        ChildrenHint::Always => Ok(true),
        ChildrenHint::Never => Ok(false),
        ChildrenHint::Unknown => hierarchy::child_level_provider(context, node)?.has_nodes(),
    }
}

/// Whether the node should be replaced by its children. Fills in
/// `has_children` when finding out was necessary.
fn should_return_children(context: &ProviderContext, node: &mut NavNode) -> Result<bool> {
    let extended = &node.extended;
    if extended.hide_nodes_in_hierarchy {
        trace!("node hidden in hierarchy");
        return Ok(true);
    }
    if extended.hide_if_grouping_value_not_specified
        && node.key.node_type == NodeType::PropertyGrouping
        && !extended.property_values.is_empty()
        && extended.grouping_value_unspecified()
    {
        trace!("node groups an unspecified value");
        return Ok(true);
    }
    if node.has_children == Some(false) {
        return Ok(false);
    }

    let mut has_children = node.has_children;
    match extended.children_hint {
        ChildrenHint::Always => has_children = Some(true),
        ChildrenHint::Never if !node.key.is_grouping() => has_children = Some(false),
        _ => {}
    }

    if extended.hide_if_only_one_child {
        let probe = Arc::new(NavNode::clone(node));
        let children = hierarchy::child_level_provider(context, &probe)?.count_up_to(2)?;
        has_children = Some(children.count > 0);
        if children.count == 1 {
            node.has_children = has_children;
            trace!("node has a single child");
            return Ok(true);
        }
    }

    if has_children.is_none() && needs_children_determined(node) {
        let probe = Arc::new(NavNode::clone(node));
        has_children = Some(determine_children(context, &probe)?);
    }
    if has_children.is_some() {
        node.has_children = has_children;
    }

    if node.extended.hide_if_no_children && has_children == Some(false) {
        trace!("node has no children");
        return Ok(true);
    }
    if let Some(expression) = node.extended.hide_expression.as_deref() {
        if context.rules().evaluate_hide_expression(expression, node, context)? {
            trace!(expression, "hide expression holds");
            return Ok(true);
        }
    }
    Ok(false)
}

/// Decide the node, filling in whatever had to be found out on the way
pub fn decide(context: &ProviderContext, node: &mut NavNode) -> Result<NodeDecision> {
    if has_similar_ancestor(context, node) {
        return Ok(NodeDecision::Hidden);
    }
    if should_return_children(context, node)? {
        return Ok(NodeDecision::ReturnChildrenInstead);
    }
    Ok(NodeDecision::ReturnAsIs)
}

/// Provider standing in for a cached node: the node itself, its children,
/// or nothing
pub fn provider_for_node(context: &Arc<ProviderContext>, node: NodeRef) -> Result<NodesProvider> {
    context.check_canceled()?;
    let id = node
        .id
        .ok_or_else(|| ProviderError::invariant(format!("deciding uncached node '{}'", node.label)))?;
    let cache = context.cache();

    if node.extended.is_node_initialized {
        return match cache.node_visibility(id) {
            Some(NodeVisibility::Virtual) => hierarchy::child_level_provider(context, &node),
            Some(NodeVisibility::Hidden) => Ok(NodesProvider::empty(Arc::clone(context))),
            _ => Ok(NodesProvider::single(Arc::clone(context), node)),
        };
    }

    let mut decided = NavNode::clone(&node);
    decided.extended.is_node_initialized = true;
    let decision = decide(context, &mut decided)?;
    cache.update_node(id, &decided, NodeParts::PAYLOAD)?;
    let decided = Arc::new(decided);
    trace!(%id, label = %decided.label, ?decision, "node decided");

    match decision {
        NodeDecision::ReturnAsIs => Ok(NodesProvider::single(Arc::clone(context), decided)),
        NodeDecision::ReturnChildrenInstead => {
            cache.make_virtual(id)?;
            let children = hierarchy::child_level_provider(context, &decided)?;
            children.reserve_data_sources()?;
            Ok(children)
        }
        NodeDecision::Hidden => {
            cache.make_hidden(id)?;
            Ok(NodesProvider::empty(Arc::clone(context)))
        }
    }
}

/// Providers for a data source's nodes, in order
pub(crate) fn node_providers(context: &Arc<ProviderContext>, nodes: Vec<NodeRef>) -> Result<Vec<Arc<NodesProvider>>> {
    nodes
        .into_iter()
        .map(|node| provider_for_node(context, node).map(Arc::new))
        .collect()
}
