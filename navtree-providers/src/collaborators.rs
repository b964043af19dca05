//! Interfaces of the collaborators the engine consumes.
//!
//! Query construction, query execution and rule evaluation all live outside
//! this crate. The engine only sees the opaque [`NodeQuery`] a factory hands
//! it and asks the collaborators below to run it and to answer rule questions
//! about the nodes it produces.

use crate::context::ProviderContext;
use crate::error::Result;
use crate::label;
use crate::postprocess::PostProcessor;
use crate::provider::NodesProvider;
use navtree_types::{ChildrenHint, ClassId, DataSourceFilter, NavNode, NodeExtendedData, NodeType};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

/// The rule a set of nodes was produced by.
///
/// `hash` identifies the rule. It is written into each produced node's key
/// as the specification identifier and into the data source the nodes are
/// cached in.
#[derive(Debug, Clone, PartialEq)]
pub struct Specification {
    pub hash: String,
    pub node_type: NodeType,
    pub hide_nodes_in_hierarchy: bool,
    pub hide_if_no_children: bool,
    pub hide_if_only_one_child: bool,
    pub hide_if_grouping_value_not_specified: bool,
    pub hide_expression: Option<String>,
    pub children_hint: ChildrenHint,
    pub allowed_similar_ancestors: u32,
    pub filter: DataSourceFilter,
    /// Classes whose instance changes make the produced nodes stale, with
    /// their polymorphic flag
    pub related_classes: BTreeMap<ClassId, bool>,
    /// Ruleset variables the produced nodes depend on
    pub used_variables: Vec<String>,
}

impl Specification {
    pub fn new(hash: impl Into<String>, node_type: NodeType) -> Self {
        Self {
            hash: hash.into(),
            node_type,
            hide_nodes_in_hierarchy: false,
            hide_if_no_children: false,
            hide_if_only_one_child: false,
            hide_if_grouping_value_not_specified: false,
            hide_expression: None,
            children_hint: ChildrenHint::Unknown,
            allowed_similar_ancestors: 0,
            filter: DataSourceFilter::default(),
            related_classes: BTreeMap::new(),
            used_variables: Vec::new(),
        }
    }

    /// Copy the presentation flags onto a produced node
    pub fn apply_to(&self, extended: &mut NodeExtendedData) {
        extended.hide_nodes_in_hierarchy = self.hide_nodes_in_hierarchy;
        extended.hide_if_no_children = self.hide_if_no_children;
        extended.hide_if_only_one_child = self.hide_if_only_one_child;
        extended.hide_if_grouping_value_not_specified = self.hide_if_grouping_value_not_specified;
        extended.hide_expression = self.hide_expression.clone();
        extended.children_hint = self.children_hint;
        extended.allowed_similar_ancestors = self.allowed_similar_ancestors;
    }

    /// Whether decisions may leave none of the produced nodes visible
    pub fn may_hide_all(&self) -> bool {
        self.hide_nodes_in_hierarchy || self.hide_if_no_children || self.hide_expression.is_some()
    }

    /// Whether decisions may hide any of the produced nodes
    pub fn may_hide(&self) -> bool {
        self.may_hide_all()
            || (self.hide_if_grouping_value_not_specified && self.node_type == NodeType::PropertyGrouping)
            || self.hide_if_only_one_child
    }
}

/// A window of result rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RowWindow {
    pub offset: usize,
    pub limit: usize,
}

/// An executable query plus the rule that produced it
#[derive(Debug, Clone)]
pub struct NodeQuery {
    pub specification: Arc<Specification>,
    /// Opaque statement understood by the [`QueryExecutor`]
    pub statement: String,
    /// Restricts execution to part of the result (set on page queries)
    pub window: Option<RowWindow>,
}

impl NodeQuery {
    pub fn new(specification: Arc<Specification>, statement: impl Into<String>) -> Self {
        Self {
            specification,
            statement: statement.into(),
            window: None,
        }
    }

    pub fn windowed(&self, window: RowWindow) -> Self {
        Self {
            window: Some(window),
            ..self.clone()
        }
    }
}

/// A node defined statically by a rule instead of by a query
#[derive(Debug, Clone)]
pub struct CustomSpecification {
    pub specification: Arc<Specification>,
    pub node: NavNode,
}

/// Rows produced by a query, one node per item
pub type NodeRows<'a> = Box<dyn Iterator<Item = Result<NavNode>> + 'a>;

/// Runs [`NodeQuery`]s against the underlying data store
pub trait QueryExecutor: Send + Sync {
    /// Identifier of every result row in result order, ignoring the
    /// query's window. Consecutive rows with equal identifiers make up one
    /// node.
    fn row_identifiers(&self, query: &NodeQuery, context: &ProviderContext) -> Result<Vec<String>>;

    /// Nodes for the rows inside the query's window, in result order.
    ///
    /// Produced nodes carry their key and label; the engine fills in
    /// parents and presentation flags.
    fn read_nodes<'a>(&'a self, query: &'a NodeQuery, context: &'a ProviderContext) -> Result<NodeRows<'a>>;

    /// Whether the query returns anything at all
    fn has_rows(&self, query: &NodeQuery, context: &ProviderContext) -> Result<bool> {
        Ok(!self.row_identifiers(query, context)?.is_empty())
    }
}

/// Answers rule questions about produced nodes
pub trait RulesEvaluator: Send + Sync {
    /// Whether `expression` holds for `node`, which then gets replaced by its children
    fn evaluate_hide_expression(&self, expression: &str, node: &NavNode, context: &ProviderContext) -> Result<bool>;

    /// Whether nodes of the specification are meant to be ordered by label
    fn is_label_sorted(&self, _specification_hash: &str, _context: &ProviderContext) -> bool {
        true
    }

    fn compare_labels(&self, a: &str, b: &str) -> Ordering {
        label::compare_labels(a, b)
    }

    /// Whether instances of `class` count as instances of `base`
    fn is_class_of(&self, class: ClassId, base: ClassId) -> bool {
        class == base
    }
}

/// Builds the providers of one hierarchy level
pub trait HierarchyFactory: Send + Sync {
    /// One provider per rule producing nodes for the level described by
    /// `context`, in rule order. Providers must be created in the same order
    /// every time so that they find their cached data sources again.
    fn create_providers(&self, context: &Arc<ProviderContext>) -> Result<Vec<NodesProvider>>;

    /// Post-processors applied to every requested level
    fn post_processors(&self, _context: &ProviderContext) -> Vec<PostProcessor> {
        Vec::new()
    }
}
