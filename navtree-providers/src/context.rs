//! Parameters shared by the providers of one hierarchy level.

use crate::cancel::CancellationToken;
use crate::collaborators::{HierarchyFactory, QueryExecutor, RulesEvaluator};
use crate::error::Result;
use navtree_cache::{HierarchyCache, IndexAllocator};
use navtree_types::{
    CombinedHierarchyLevelIdentifier, HierarchyLevelIdentifier, IndexPath, NodeId, NodeRef,
    NodeVisibility, PageOptions, RemovalId, RulesetVariables,
};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// The cache and the collaborators every provider talks to
#[derive(Clone)]
pub struct ProviderServices {
    pub cache: Arc<HierarchyCache>,
    pub executor: Arc<dyn QueryExecutor>,
    pub rules: Arc<dyn RulesEvaluator>,
    pub factory: Arc<dyn HierarchyFactory>,
}

impl fmt::Debug for ProviderServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderServices")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

/// Switches that trade laziness for completeness
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptimizationFlags {
    /// Every node must be materialized, so query paging is off
    pub full_load_required: bool,
    pub post_processing_disabled: bool,
}

/// Everything a provider needs to know about the level it produces.
///
/// Contexts are immutable once shared. Child levels get a fresh context
/// from [`ProviderContext::for_child_level`]; providers of the same level
/// share one context, and through it one index allocator.
///
/// The cancellation token sits in a slot shared by every context derived
/// from this one, so a provider tree reused by a later request can be
/// handed that request's token.
#[derive(Debug, Clone)]
pub struct ProviderContext {
    services: ProviderServices,
    connection_id: String,
    ruleset_id: String,
    locale: String,
    variables: RulesetVariables,
    physical_parent: Option<NodeId>,
    virtual_parent: Option<NodeRef>,
    removal_id: Option<RemovalId>,
    page: PageOptions,
    flags: OptimizationFlags,
    cancellation: Arc<Mutex<CancellationToken>>,
    allocator: Arc<IndexAllocator>,
}

impl ProviderContext {
    /// Context of the root level
    pub fn root(
        services: ProviderServices,
        connection_id: impl Into<String>,
        ruleset_id: impl Into<String>,
        locale: impl Into<String>,
        variables: RulesetVariables,
    ) -> Self {
        Self {
            services,
            connection_id: connection_id.into(),
            ruleset_id: ruleset_id.into(),
            locale: locale.into(),
            variables,
            physical_parent: None,
            virtual_parent: None,
            removal_id: None,
            page: PageOptions::default(),
            flags: OptimizationFlags::default(),
            cancellation: Arc::new(Mutex::new(CancellationToken::new())),
            allocator: Arc::new(IndexAllocator::for_virtual_parent(None)),
        }
    }

    /// Context of the level below `parent`.
    ///
    /// The physical parent is `parent` itself unless it is virtual, in which
    /// case its own physical parent is inherited.
    pub fn for_child_level(&self, parent: &NodeRef) -> Self {
        let physical_parent = match parent.id {
            Some(id) if self.cache().node_visibility(id) != Some(NodeVisibility::Virtual) => Some(id),
            _ => parent.physical_parent,
        };
        Self {
            physical_parent,
            virtual_parent: Some(Arc::clone(parent)),
            page: PageOptions::default(),
            allocator: Arc::new(IndexAllocator::for_virtual_parent(parent.id)),
            ..self.clone()
        }
    }

    /// Context for more providers of this level, sharing its allocator
    pub fn for_same_level(&self) -> Self {
        Self {
            page: PageOptions::default(),
            ..self.clone()
        }
    }

    pub fn with_page(mut self, page: PageOptions) -> Self {
        self.page = page;
        self
    }

    pub fn with_flags(mut self, flags: OptimizationFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Detach from the current cancellation slot and poll `cancellation`
    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = Arc::new(Mutex::new(cancellation));
        self
    }

    pub fn with_removal_id(mut self, removal_id: Option<RemovalId>) -> Self {
        self.removal_id = removal_id;
        self
    }

    pub(crate) fn with_allocator(mut self, allocator: Arc<IndexAllocator>) -> Self {
        self.allocator = allocator;
        self
    }

    pub fn services(&self) -> &ProviderServices {
        &self.services
    }

    pub fn cache(&self) -> &HierarchyCache {
        &self.services.cache
    }

    pub fn executor(&self) -> &dyn QueryExecutor {
        self.services.executor.as_ref()
    }

    pub fn rules(&self) -> &dyn RulesEvaluator {
        self.services.rules.as_ref()
    }

    pub fn factory(&self) -> &dyn HierarchyFactory {
        self.services.factory.as_ref()
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn ruleset_id(&self) -> &str {
        &self.ruleset_id
    }

    pub fn locale(&self) -> &str {
        &self.locale
    }

    pub fn variables(&self) -> &RulesetVariables {
        &self.variables
    }

    pub fn physical_parent(&self) -> Option<NodeId> {
        self.physical_parent
    }

    pub fn virtual_parent(&self) -> Option<&NodeRef> {
        self.virtual_parent.as_ref()
    }

    pub fn virtual_parent_id(&self) -> Option<NodeId> {
        self.virtual_parent.as_ref().and_then(|parent| parent.id)
    }

    pub fn page(&self) -> PageOptions {
        self.page
    }

    pub fn flags(&self) -> OptimizationFlags {
        self.flags
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancellation.lock().clone()
    }

    pub fn check_canceled(&self) -> Result<()> {
        self.cancellation.lock().check()
    }

    /// Make this context and everything derived from it poll `cancellation`
    pub(crate) fn rebind_cancellation(&self, cancellation: CancellationToken) {
        *self.cancellation.lock() = cancellation;
    }

    pub fn combined_identifier(&self) -> CombinedHierarchyLevelIdentifier {
        CombinedHierarchyLevelIdentifier::new(
            self.connection_id.as_str(),
            self.ruleset_id.as_str(),
            self.locale.as_str(),
            self.physical_parent,
        )
        .with_removal_id(self.removal_id)
    }

    pub fn hierarchy_level_identifier(&self) -> HierarchyLevelIdentifier {
        HierarchyLevelIdentifier::new(self.combined_identifier(), self.virtual_parent_id())
    }

    /// The cached level of this context, if it exists
    pub fn find_hierarchy_level(&self) -> Option<HierarchyLevelIdentifier> {
        self.cache()
            .find_hierarchy_level(&self.combined_identifier(), self.virtual_parent_id())
    }

    /// The cached level of this context, created when missing
    pub fn ensure_hierarchy_level(&self) -> Result<HierarchyLevelIdentifier> {
        Ok(self.cache().ensure_hierarchy_level(&self.hierarchy_level_identifier())?)
    }

    /// Next data source index of this level
    pub fn allocate_index(&self) -> IndexPath {
        self.allocator.allocate(self.cache())
    }

    /// The index every data source of this level starts with
    pub fn index_prefix(&self) -> IndexPath {
        self.allocator.prefix(self.cache())
    }
}
