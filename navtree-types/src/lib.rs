//! Shared types for navtree
//!
//! This crate provides the identity and data model used by the hierarchy
//! cache and the node providers: numeric ids, ordinal index paths, hierarchy
//! level and data source identities, nodes with their structural keys, and
//! ruleset variable snapshots.

pub mod datasource;
pub mod identity;
pub mod ids;
pub mod index;
pub mod node;
pub mod page;
pub mod variables;

pub use datasource::{DataSourceFilter, DataSourceInfo, DataSourceParts, RelationshipFilter};
pub use identity::{CombinedHierarchyLevelIdentifier, DataSourceIdentifier, HierarchyLevelIdentifier};
pub use ids::{ClassId, DataSourceId, HierarchyLevelId, InstanceId, NodeId, RemovalId};
pub use index::IndexPath;
pub use node::{
    ChildrenHint, InstanceKey, NavNode, NodeExtendedData, NodeKey, NodeRef, NodeType, NodeVisibility,
};
pub use page::PageOptions;
pub use variables::RulesetVariables;
