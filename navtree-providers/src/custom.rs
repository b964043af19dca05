//! Providers of rule-defined nodes.

use crate::collaborators::{CustomSpecification, Specification};
use crate::error::Result;
use crate::provider::{CountInfo, Lazy, NodesProvider};
use crate::query::{
    cache_direct_nodes, ensure_data_source, find_data_source, finish_data_source, in_savepoint, may_hide,
    may_hide_all, replay_data_source,
};
use navtree_types::IndexPath;
use std::iter;
use std::sync::Arc;
use tracing::debug;

/// What a custom provider materializes
#[derive(Debug)]
pub struct CustomSource {
    specification: CustomSpecification,
    index: IndexPath,
}

impl CustomSource {
    pub(crate) fn new(specification: CustomSpecification, index: IndexPath) -> Self {
        Self { specification, index }
    }

    pub fn index(&self) -> &IndexPath {
        &self.index
    }

    fn rule(&self) -> &Specification {
        &self.specification.specification
    }
}

pub(crate) fn initialize(provider: &NodesProvider, source: &CustomSource) -> Result<Arc<NodesProvider>> {
    let context = provider.context();
    context.check_canceled()?;
    in_savepoint(context, || match find_data_source(context, &source.index) {
        Some(data_source) if data_source.is_initialized => replay_data_source(provider, &data_source),
        _ => {
            let rule = source.rule();
            let mut data_source = ensure_data_source(context, rule, &source.index, None)?;
            debug!(index = %source.index, specification = %rule.hash, "creating custom node");
            let row = iter::once(Ok(source.specification.node.clone()));
            let nodes = cache_direct_nodes(context, &mut data_source, rule, row)?;
            finish_data_source(provider, &data_source, nodes)
        }
    })
}

pub(crate) fn count(provider: &NodesProvider, lazy: &Lazy<CustomSource>) -> Result<CountInfo> {
    if let Some(inner) = lazy.get() {
        return inner.count_info();
    }
    if !may_hide(provider.context(), lazy.source().rule()) {
        return Ok(CountInfo::accurate(1));
    }
    provider.materialized()?.count_info()
}

pub(crate) fn has_nodes(provider: &NodesProvider, lazy: &Lazy<CustomSource>) -> Result<bool> {
    if let Some(inner) = lazy.get() {
        return inner.has_nodes();
    }
    if !may_hide_all(provider.context(), lazy.source().rule()) {
        return Ok(true);
    }
    provider.materialized()?.has_nodes()
}

pub(crate) fn reserve(provider: &NodesProvider, lazy: &Lazy<CustomSource>) -> Result<()> {
    if lazy.get().is_some() {
        return Ok(());
    }
    let source = lazy.source();
    ensure_data_source(provider.context(), source.rule(), &source.index, None)?;
    Ok(())
}
