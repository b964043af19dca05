//! Navtree Hierarchy Cache
//!
//! This crate provides the persistent, mutation-aware memoization layer of
//! navtree. Everything the node providers compute (hierarchy levels, data
//! sources, nodes and their visibility) is stored in an embedded SQLite
//! database so that later requests replay instead of recompute.
//!
//! # Architecture
//!
//! ```text
//! HierarchyLevels ─┬─ DataSources ─┬─ Nodes ─┬─ NodeKeys
//!                  │               │         ├─ NodeInstances
//!                  │               │         └─ NodesOrder (derived by trigger)
//!                  │               ├─ DataSourceClasses
//!                  │               └─ DataSourceVariables
//!                  ├─ Connections
//!                  └─ Rulesets
//! ```
//!
//! - **Identity**: levels are unique per virtual parent, connection, ruleset,
//!   locale and removal marker; data sources are addressed by an index path
//!   that also orders their nodes.
//! - **Variables**: each data source keeps a snapshot of the ruleset
//!   variables it was computed with; lookups only match snapshots that agree
//!   with the live variables.
//! - **Savepoints**: providers wrap materialization in a [`Savepoint`];
//!   canceling it rolls back the store and clears the quick caches. An open
//!   savepoint keeps the store locked for other threads.
//! - **Quick caches**: small LRU shadows of hot providers and nodes.
//! - **Invalidation and compaction** keep the store fresh and bounded.
//!
//! # Example
//!
//! ```rust,ignore
//! use navtree_cache::{HierarchyCache, NodesScope};
//! use navtree_types::*;
//!
//! let cache = HierarchyCache::in_memory()?;
//! let combined = CombinedHierarchyLevelIdentifier::new("c1", "r1", "en", None);
//! let level = cache.ensure_hierarchy_level(&HierarchyLevelIdentifier::new(combined.clone(), None))?;
//! let nodes = cache.load_nodes(
//!     &NodesScope::CombinedLevel(combined),
//!     &RulesetVariables::new(),
//!     PageOptions::default(),
//! );
//! ```

#![warn(missing_debug_implementations)]

pub mod allocator;
pub mod compaction;
pub mod config;
pub mod connections;
pub mod datasources;
pub mod error;
pub mod invalidation;
pub mod levels;
pub mod metrics;
pub mod nodes;
pub mod quick;
pub mod removal;
pub mod savepoint;
pub mod schema;
pub mod scopes;
pub mod store;
pub mod visibility;

pub use allocator::IndexAllocator;
pub use compaction::CompactionReport;
pub use config::{CacheConfig, CacheLocation, ConfigError};
pub use connections::ConnectionInfo;
pub use error::{CacheError, Result};
pub use invalidation::CacheChange;
pub use levels::LevelSummary;
pub use metrics::{CacheMetrics, CacheStats, StoreStats};
pub use nodes::NodeParts;
pub use quick::QuickProvider;
pub use savepoint::Savepoint;
pub use scopes::NodesScope;
pub use store::HierarchyCache;
