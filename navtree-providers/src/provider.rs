//! The provider tree.
//!
//! A [`NodesProvider`] produces the ordered nodes of (part of) one hierarchy
//! level. Providers are a closed set of variants, see [`ProviderKind`].
//! Variants that have to compute something (run a query, evaluate rules,
//! post-process) are lazy: they build an inner provider on first access and
//! answer every later question from it.

use crate::collaborators::{CustomSpecification, NodeQuery};
use crate::context::ProviderContext;
use crate::custom::{self, CustomSource};
use crate::error::{ProviderError, Result};
use crate::iter::NodesIter;
use crate::postprocess::PostProcessing;
use crate::query::{self, QuerySource};
use navtree_cache::NodesScope;
use navtree_types::{NodeRef, PageOptions};
use parking_lot::Mutex;
use std::fmt;
use std::ops::Add;
use std::sync::Arc;
use tracing::trace;

/// A node count that may have stopped early
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountInfo {
    pub count: usize,
    /// False when counting stopped at a limit
    pub accurate: bool,
}

impl CountInfo {
    pub fn accurate(count: usize) -> Self {
        Self { count, accurate: true }
    }

    pub fn at_least(count: usize) -> Self {
        Self { count, accurate: false }
    }
}

impl Add for CountInfo {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            count: self.count + rhs.count,
            accurate: self.accurate && rhs.accurate,
        }
    }
}

/// How a provider gets ready to produce nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitializationStrategy {
    /// Nothing to compute, or computed transparently on access
    Automatic,
    /// Producing nodes resolves other nodes first; see [`NodesProvider::initialize`]
    Manual,
}

/// A provider computed on first access
pub struct Lazy<S> {
    source: S,
    inner: Mutex<Option<Arc<NodesProvider>>>,
}

impl<S> Lazy<S> {
    pub(crate) fn new(source: S) -> Self {
        Self {
            source,
            inner: Mutex::new(None),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// The inner provider, if already computed
    pub fn get(&self) -> Option<Arc<NodesProvider>> {
        self.inner.lock().clone()
    }

    /// The inner provider, computing it on first call. A failed computation
    /// leaves nothing behind and is retried by the next call.
    pub(crate) fn get_or_init(
        &self,
        init: impl FnOnce(&S) -> Result<Arc<NodesProvider>>,
    ) -> Result<Arc<NodesProvider>> {
        if let Some(inner) = self.get() {
            return Ok(inner);
        }
        let built = init(&self.source)?;
        Ok(Arc::clone(self.inner.lock().get_or_insert(built)))
    }
}

impl<S: fmt::Debug> fmt::Debug for Lazy<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lazy")
            .field("source", &self.source)
            .field("initialized", &self.inner.lock().is_some())
            .finish()
    }
}

/// The provider variants
#[derive(Debug)]
pub enum ProviderKind {
    Empty,
    /// One already resolved node
    Single(NodeRef),
    /// Concatenation of child providers
    Multi(Vec<Arc<NodesProvider>>),
    /// Nodes of a query, with per-node visibility decisions
    Query(Lazy<QuerySource>),
    /// One node defined by a rule
    Custom(Lazy<CustomSource>),
    /// Replay of cached nodes
    Cached(NodesScope),
    /// Another provider reshaped by a post-processor
    PostProcessed(Lazy<PostProcessing>),
}

#[derive(Debug, Default, Clone, Copy)]
struct Memo {
    count: Option<usize>,
    has_nodes: Option<bool>,
}

/// Lazily computed, ordered nodes of one hierarchy level
pub struct NodesProvider {
    context: Arc<ProviderContext>,
    kind: ProviderKind,
    memo: Mutex<Memo>,
}

impl fmt::Debug for NodesProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodesProvider")
            .field("kind", &self.kind)
            .field("memo", &*self.memo.lock())
            .finish_non_exhaustive()
    }
}

/// One step of iteration: either nodes, or providers to descend into
#[derive(Debug)]
pub(crate) enum Expansion {
    Nodes(Vec<NodeRef>),
    Providers(Vec<Arc<NodesProvider>>),
}

impl NodesProvider {
    pub(crate) fn new(context: Arc<ProviderContext>, kind: ProviderKind) -> Self {
        Self {
            context,
            kind,
            memo: Mutex::new(Memo::default()),
        }
    }

    pub fn empty(context: Arc<ProviderContext>) -> Self {
        Self::new(context, ProviderKind::Empty)
    }

    pub fn single(context: Arc<ProviderContext>, node: NodeRef) -> Self {
        Self::new(context, ProviderKind::Single(node))
    }

    pub fn multi(context: Arc<ProviderContext>, providers: Vec<NodesProvider>) -> Self {
        Self::from_shared(context, providers.into_iter().map(Arc::new).collect())
    }

    pub fn from_shared(context: Arc<ProviderContext>, providers: Vec<Arc<NodesProvider>>) -> Self {
        Self::new(context, ProviderKind::Multi(providers))
    }

    /// Provider returning exactly `nodes`
    pub fn from_nodes(context: Arc<ProviderContext>, nodes: Vec<NodeRef>) -> Self {
        let singles = nodes
            .into_iter()
            .map(|node| Arc::new(Self::single(Arc::clone(&context), node)))
            .collect();
        Self::from_shared(context, singles)
    }

    pub fn cached(context: Arc<ProviderContext>, scope: NodesScope) -> Self {
        Self::new(context, ProviderKind::Cached(scope))
    }

    /// Provider for the nodes of `query`. Takes the next data source index
    /// of the context's level.
    pub fn query(context: Arc<ProviderContext>, query: NodeQuery) -> Self {
        let index = context.allocate_index();
        let source = QuerySource::new(query, index, None);
        Self::new(context, ProviderKind::Query(Lazy::new(source)))
    }

    /// Provider for the node of `specification`. Takes the next data source
    /// index of the context's level.
    pub fn custom(context: Arc<ProviderContext>, specification: CustomSpecification) -> Self {
        let index = context.allocate_index();
        let source = CustomSource::new(specification, index);
        Self::new(context, ProviderKind::Custom(Lazy::new(source)))
    }

    pub(crate) fn post_processed(context: Arc<ProviderContext>, processing: PostProcessing) -> Self {
        Self::new(context, ProviderKind::PostProcessed(Lazy::new(processing)))
    }

    /// Seed the memoized answers
    pub(crate) fn with_known(self, count: Option<usize>, has_nodes: Option<bool>) -> Self {
        {
            let mut memo = self.memo.lock();
            memo.count = count;
            memo.has_nodes = has_nodes.or(count.map(|count| count > 0));
        }
        self
    }

    pub fn context(&self) -> &Arc<ProviderContext> {
        &self.context
    }

    pub fn kind(&self) -> &ProviderKind {
        &self.kind
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            ProviderKind::Empty => "empty",
            ProviderKind::Single(_) => "single",
            ProviderKind::Multi(_) => "multi",
            ProviderKind::Query(_) => "query",
            ProviderKind::Custom(_) => "custom",
            ProviderKind::Cached(_) => "cached",
            ProviderKind::PostProcessed(_) => "post-processed",
        }
    }

    pub fn initialization_strategy(&self) -> InitializationStrategy {
        match self.kind {
            ProviderKind::Query(_) | ProviderKind::Custom(_) | ProviderKind::PostProcessed(_) => {
                InitializationStrategy::Manual
            }
            _ => InitializationStrategy::Automatic,
        }
    }

    /// Compute this provider and everything below it
    pub fn initialize(&self) -> Result<()> {
        self.context.check_canceled()?;
        match &self.kind {
            ProviderKind::Multi(children) => children.iter().try_for_each(|child| child.initialize()),
            ProviderKind::Empty | ProviderKind::Single(_) | ProviderKind::Cached(_) => Ok(()),
            _ => self.materialized()?.initialize(),
        }
    }

    /// Create the data sources of the lazy providers in this tree without
    /// materializing them, so their level is not taken for initialized
    pub fn reserve_data_sources(&self) -> Result<()> {
        match &self.kind {
            ProviderKind::Multi(children) => children.iter().try_for_each(|child| child.reserve_data_sources()),
            ProviderKind::Query(lazy) => query::reserve(self, lazy),
            ProviderKind::Custom(lazy) => custom::reserve(self, lazy),
            ProviderKind::PostProcessed(lazy) => lazy.source().base().reserve_data_sources(),
            ProviderKind::Empty | ProviderKind::Single(_) | ProviderKind::Cached(_) => Ok(()),
        }
    }

    /// The computed inner provider of a lazy variant
    pub(crate) fn materialized(&self) -> Result<Arc<NodesProvider>> {
        match &self.kind {
            ProviderKind::Query(lazy) => lazy.get_or_init(|source| query::initialize(self, source)),
            ProviderKind::Custom(lazy) => lazy.get_or_init(|source| custom::initialize(self, source)),
            ProviderKind::PostProcessed(lazy) => lazy.get_or_init(|processing| processing.run(self)),
            _ => Err(ProviderError::invariant(format!(
                "{} provider has nothing to materialize",
                self.kind_name()
            ))),
        }
    }

    /// The inner provider of a lazy variant, if already computed
    pub(crate) fn materialized_if_ready(&self) -> Option<Arc<NodesProvider>> {
        match &self.kind {
            ProviderKind::Query(lazy) => lazy.get(),
            ProviderKind::Custom(lazy) => lazy.get(),
            ProviderKind::PostProcessed(lazy) => lazy.get(),
            _ => None,
        }
    }

    fn remember(&self, info: CountInfo) {
        if info.accurate {
            let mut memo = self.memo.lock();
            memo.count = Some(info.count);
            memo.has_nodes = Some(info.count > 0);
        }
    }

    pub(crate) fn known_count(&self) -> Option<usize> {
        self.memo.lock().count
    }

    /// Total number of nodes, memoized once accurate
    pub fn count_info(&self) -> Result<CountInfo> {
        if let Some(count) = self.known_count() {
            return Ok(CountInfo::accurate(count));
        }
        self.context.check_canceled()?;
        let info = match &self.kind {
            ProviderKind::Empty => CountInfo::accurate(0),
            ProviderKind::Single(_) => CountInfo::accurate(1),
            ProviderKind::Multi(children) => {
                let mut total = CountInfo::accurate(0);
                for child in children {
                    total = total + child.count_info()?;
                }
                total
            }
            ProviderKind::Cached(scope) => {
                CountInfo::accurate(self.context.cache().count_nodes(scope, self.context.variables()))
            }
            ProviderKind::Query(lazy) => query::count(self, lazy)?,
            ProviderKind::Custom(lazy) => custom::count(self, lazy)?,
            ProviderKind::PostProcessed(_) => self.materialized()?.count_info()?,
        };
        self.remember(info);
        trace!(kind = self.kind_name(), count = info.count, accurate = info.accurate, "nodes counted");
        Ok(info)
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self.count_info()?.count)
    }

    /// Count nodes, stopping once `limit` is reached
    pub fn count_up_to(&self, limit: usize) -> Result<CountInfo> {
        if let Some(count) = self.known_count() {
            return Ok(CountInfo::accurate(count));
        }
        match &self.kind {
            ProviderKind::Multi(children) => {
                let mut total = CountInfo::accurate(0);
                for (i, child) in children.iter().enumerate() {
                    total = total + child.count_up_to(limit.saturating_sub(total.count))?;
                    if total.count >= limit && i + 1 < children.len() {
                        return Ok(CountInfo::at_least(total.count));
                    }
                }
                self.remember(total);
                Ok(total)
            }
            _ => match self.materialized_if_ready() {
                Some(inner) => inner.count_up_to(limit),
                None => self.count_info(),
            },
        }
    }

    /// Whether the provider produces any node at all
    pub fn has_nodes(&self) -> Result<bool> {
        {
            let memo = self.memo.lock();
            if let Some(has_nodes) = memo.has_nodes {
                return Ok(has_nodes);
            }
            if let Some(count) = memo.count {
                return Ok(count > 0);
            }
        }
        self.context.check_canceled()?;
        let has_nodes = match &self.kind {
            ProviderKind::Empty => false,
            ProviderKind::Single(_) => true,
            ProviderKind::Multi(children) => {
                let mut any = false;
                for child in children {
                    if child.has_nodes()? {
                        any = true;
                        break;
                    }
                }
                any
            }
            ProviderKind::Cached(scope) => !self
                .context
                .cache()
                .load_nodes(scope, self.context.variables(), PageOptions::new(0, Some(1)))
                .is_empty(),
            ProviderKind::Query(lazy) => query::has_nodes(self, lazy)?,
            ProviderKind::Custom(lazy) => custom::has_nodes(self, lazy)?,
            ProviderKind::PostProcessed(_) => self.materialized()?.has_nodes()?,
        };
        self.memo.lock().has_nodes = Some(has_nodes);
        Ok(has_nodes)
    }

    /// The node at `index`, without producing the nodes before it where
    /// counts allow skipping them
    pub fn get_node(&self, index: usize) -> Result<Option<NodeRef>> {
        self.context.check_canceled()?;
        match &self.kind {
            ProviderKind::Empty => Ok(None),
            ProviderKind::Single(node) => Ok((index == 0).then(|| Arc::clone(node))),
            ProviderKind::Multi(children) => {
                let mut index = index;
                for child in children {
                    // a count short of `index + 1` is accurate
                    let counted = child.count_up_to(index + 1)?;
                    if index < counted.count {
                        return child.get_node(index);
                    }
                    index -= counted.count;
                }
                Ok(None)
            }
            ProviderKind::Cached(scope) => Ok(self
                .context
                .cache()
                .load_nodes(scope, self.context.variables(), PageOptions::new(index, Some(1)))
                .into_iter()
                .next()),
            _ => self.materialized()?.get_node(index),
        }
    }

    /// Nodes or sub-providers of the first step of iteration.
    ///
    /// `skip` is honored only when nodes are returned directly; callers
    /// pass a skip smaller than this provider's count.
    pub(crate) fn expand(&self, skip: usize) -> Result<Expansion> {
        self.context.check_canceled()?;
        Ok(match &self.kind {
            ProviderKind::Empty => Expansion::Nodes(Vec::new()),
            ProviderKind::Single(node) if skip == 0 => Expansion::Nodes(vec![Arc::clone(node)]),
            ProviderKind::Single(_) => Expansion::Nodes(Vec::new()),
            ProviderKind::Multi(children) => Expansion::Providers(children.clone()),
            ProviderKind::Cached(scope) => Expansion::Nodes(self.context.cache().load_nodes(
                scope,
                self.context.variables(),
                PageOptions::from_start(skip),
            )),
            _ => Expansion::Providers(vec![self.materialized()?]),
        })
    }

    /// Double-ended iterator over all nodes
    pub fn iter(self: &Arc<Self>) -> NodesIter {
        NodesIter::new(Arc::clone(self))
    }

    /// The nodes selected by `page`
    pub fn nodes(self: &Arc<Self>, page: PageOptions) -> Result<Vec<NodeRef>> {
        if page.is_empty_page() {
            return Ok(Vec::new());
        }
        if let ProviderKind::Cached(scope) = &self.kind {
            return Ok(self.context.cache().load_nodes(scope, self.context.variables(), page));
        }
        let mut iter = self.iter();
        iter.skip_nodes(page.start)?;
        match page.size {
            Some(size) => iter.take(size).collect(),
            None => iter.collect(),
        }
    }

    pub fn all_nodes(self: &Arc<Self>) -> Result<Vec<NodeRef>> {
        self.nodes(PageOptions::default())
    }
}
