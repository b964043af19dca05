//! Navtree Node Providers
//!
//! This crate composes the nodes of a navigation hierarchy level lazily. A
//! level is a tree of [`NodesProvider`]s: the leaves run queries or produce
//! custom nodes, inner providers concatenate, replay cached results or
//! post-process. Nothing is computed until a count, a node or an iteration
//! step asks for it, and everything computed is written to the
//! [`HierarchyCache`](navtree_cache::HierarchyCache) so that later requests
//! replay it.
//!
//! # Architecture
//!
//! ```text
//! level_provider ─┬─ quick provider (reused when free)
//!                 ├─ Cached(CombinedLevel)          (level fully cached)
//!                 └─ Multi ─┬─ Query ─ decide per node ─┬─ Single
//!                           │                           ├─ child level (virtual)
//!                           │                           └─ Empty (hidden)
//!                           └─ Custom ─ ...
//!      └─ post-processors: label grouping, same-label merge, label sort
//! ```
//!
//! - **Collaborators**: query execution, rule evaluation and provider
//!   creation sit behind the traits in [`collaborators`].
//! - **Decisions**: each produced node is shown, replaced by its children
//!   or hidden, exactly once; see [`decision`].
//! - **Paging**: large queries whose nodes can't be hidden are split into
//!   pages so only the requested page runs.
//! - **Cancellation**: every step polls the context's
//!   [`CancellationToken`]; a canceled materialization is rolled back.
//!
//! # Example
//!
//! ```rust,ignore
//! use navtree_providers::{level_provider, ProviderContext, ProviderServices};
//! use navtree_types::{PageOptions, RulesetVariables};
//!
//! let context = ProviderContext::root(services, "c1", "r1", "en", RulesetVariables::new())
//!     .with_page(PageOptions::new(0, Some(50)));
//! let provider = level_provider(context)?;
//! let total = provider.count()?;
//! let first_page = provider.nodes(PageOptions::new(0, Some(50)))?;
//! ```

#![warn(missing_debug_implementations)]

pub mod cancel;
pub mod collaborators;
pub mod context;
pub mod custom;
pub mod decision;
pub mod error;
pub mod hierarchy;
pub mod iter;
pub mod label;
pub mod postprocess;
pub mod provider;
pub mod query;

#[cfg(test)]
mod testing;

pub use cancel::CancellationToken;
pub use collaborators::{
    CustomSpecification, HierarchyFactory, NodeQuery, NodeRows, QueryExecutor, RowWindow, RulesEvaluator,
    Specification,
};
pub use context::{OptimizationFlags, ProviderContext, ProviderServices};
pub use decision::NodeDecision;
pub use error::{ProviderError, Result};
pub use hierarchy::{child_level_provider, level_provider};
pub use iter::NodesIter;
pub use postprocess::{PostProcessing, PostProcessor};
pub use provider::{CountInfo, InitializationStrategy, NodesProvider, ProviderKind};
pub use query::{NodeCounts, PageCount, PAGE_SIZE};
