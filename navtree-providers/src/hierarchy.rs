//! Entry points for building hierarchy levels.
//!
//! [`level_provider`] answers a request for the nodes under one physical
//! parent. It reuses a memoized provider when one is free, replays the
//! combined level from the cache when it is fully initialized and asks the
//! [`HierarchyFactory`](crate::collaborators::HierarchyFactory) for fresh
//! providers otherwise. [`child_level_provider`] does the same for the
//! single level below one node and is what virtual nodes expand to.

use crate::context::ProviderContext;
use crate::decision;
use crate::error::Result;
use crate::postprocess::PostProcessor;
use crate::provider::NodesProvider;
use navtree_cache::{NodesScope, QuickProvider};
use navtree_types::{ChildrenHint, NodeRef, PageOptions};
use std::sync::Arc;
use tracing::{debug, trace};

/// What is known about the node's children without looking at them
fn known_children(parent: &NodeRef) -> Option<bool> {
    parent.has_children.or(match parent.extended.children_hint {
        ChildrenHint::Always => Some(true),
        ChildrenHint::Never if !parent.key.is_grouping() => Some(false),
        _ => None,
    })
}

/// Provider for the nodes of the level directly below `parent`
pub fn child_level_provider(context: &ProviderContext, parent: &NodeRef) -> Result<NodesProvider> {
    context.check_canceled()?;
    let context = Arc::new(context.for_child_level(parent));
    let cache = context.cache();

    let cached_level = context
        .find_hierarchy_level()
        .and_then(|level| level.id)
        .filter(|&level| cache.is_level_initialized(level, context.variables()));

    let provider = match cached_level {
        Some(level) if cache.has_virtual_nodes(level) => {
            trace!(%level, "replaying level with virtual nodes");
            let nodes = cache.load_nodes(
                &NodesScope::HierarchyLevel(level),
                context.variables(),
                PageOptions::default(),
            );
            let providers = decision::node_providers(&context, nodes)?;
            NodesProvider::from_shared(Arc::clone(&context), providers)
        }
        Some(level) => {
            trace!(%level, "replaying level");
            NodesProvider::cached(Arc::clone(&context), NodesScope::HierarchyLevel(level))
        }
        None => {
            let providers = context.factory().create_providers(&context)?;
            NodesProvider::multi(Arc::clone(&context), providers)
        }
    };

    if context.flags().full_load_required {
        return Ok(provider);
    }
    Ok(match known_children(parent) {
        Some(has_children) => provider.with_known(None, Some(has_children)),
        None => provider,
    })
}

/// A memoized provider for the level of `context`, now polling the
/// request's own cancellation token
fn reuse_quick_provider(context: &ProviderContext) -> Option<Arc<NodesProvider>> {
    let quick: QuickProvider = context.cache().quick_provider(&context.combined_identifier())?;
    let provider = quick.downcast::<NodesProvider>().ok()?;
    let built_with = provider.context();
    if built_with.variables() != context.variables() {
        trace!("quick provider built with other variables");
        return None;
    }
    if built_with.flags() != context.flags() {
        trace!("quick provider built with other flags");
        return None;
    }
    built_with.rebind_cancellation(context.cancellation());
    Some(provider)
}

/// Provider for the nodes of the level described by `context`.
///
/// The returned provider covers the whole level; callers pick their page
/// with [`NodesProvider::nodes`].
pub fn level_provider(context: ProviderContext) -> Result<Arc<NodesProvider>> {
    context.check_canceled()?;
    let context = Arc::new(context);

    if decision::parent_repeats_ancestor(&context) {
        debug!("parent repeats an ancestor, level is empty");
        return Ok(Arc::new(NodesProvider::empty(context)));
    }

    if let Some(provider) = reuse_quick_provider(&context) {
        trace!("reusing quick provider");
        return Ok(provider);
    }

    let combined = context.combined_identifier();
    let base = if context.cache().is_combined_level_initialized(&combined, context.variables()) {
        trace!(physical_parent = ?combined.physical_parent, "replaying combined level");
        NodesProvider::cached(Arc::clone(&context), NodesScope::CombinedLevel(combined.clone()))
    } else {
        let providers = context.factory().create_providers(&context)?;
        NodesProvider::multi(Arc::clone(&context), providers)
    };

    let processors = context.factory().post_processors(&context);
    let provider = PostProcessor::apply_all(Arc::new(base), &processors);
    context
        .cache()
        .cache_quick_provider(combined, Arc::clone(&provider) as QuickProvider);
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationToken;
    use crate::context::OptimizationFlags;
    use crate::testing::{labels, TestSetup};

    #[test]
    fn test_level_is_replayed_once_initialized() {
        let setup = TestSetup::new();
        setup.add_rows(None, &["b", "a"]);

        let first = level_provider(setup.root_context().for_same_level()).unwrap();
        assert_eq!(labels(&first.all_nodes().unwrap()), ["b", "a"]);
        assert_eq!(setup.executor.reads(), 1);
        drop(first);

        let context = setup.root_context();
        assert!(context
            .cache()
            .is_combined_level_initialized(&context.combined_identifier(), context.variables()));
        context.cache().remove_quick_provider(&context.combined_identifier());

        let second = level_provider(context.for_same_level()).unwrap();
        assert_eq!(second.kind_name(), "cached");
        assert_eq!(labels(&second.all_nodes().unwrap()), ["b", "a"]);
        assert_eq!(setup.executor.reads(), 1);
    }

    #[test]
    fn test_quick_provider_is_reused_only_when_free() {
        let setup = TestSetup::new();
        setup.add_rows(None, &["a"]);
        let held = level_provider(setup.root_context().for_same_level()).unwrap();
        let other = level_provider(setup.root_context().for_same_level()).unwrap();
        assert!(!Arc::ptr_eq(&held, &other), "a provider in use is not handed out twice");
        drop(other);
        drop(held);
        let again = level_provider(setup.root_context().for_same_level()).unwrap();
        assert_eq!(labels(&again.all_nodes().unwrap()), ["a"]);
    }

    #[test]
    fn test_reused_provider_polls_the_new_request_token() {
        let setup = TestSetup::new();
        setup.add_rows(None, &["a", "b"]);
        let first_token = CancellationToken::new();
        let first =
            level_provider(setup.root_context().for_same_level().with_cancellation(first_token.clone())).unwrap();
        assert_eq!(first.count().unwrap(), 2);
        let built = Arc::as_ptr(&first);
        first_token.cancel();
        drop(first);

        let second_token = CancellationToken::new();
        let second =
            level_provider(setup.root_context().for_same_level().with_cancellation(second_token.clone())).unwrap();
        assert_eq!(Arc::as_ptr(&second), built);
        assert_eq!(labels(&second.all_nodes().unwrap()), ["a", "b"]);

        second_token.cancel();
        assert!(second.get_node(0).unwrap_err().is_canceled());
    }

    #[test]
    fn test_quick_provider_with_other_flags_is_not_reused() {
        let setup = TestSetup::new();
        setup.add_rows(None, &["a"]);
        let first = level_provider(setup.root_context().for_same_level()).unwrap();
        let built = Arc::as_ptr(&first);
        drop(first);

        let flags = OptimizationFlags {
            full_load_required: true,
            ..Default::default()
        };
        let second = level_provider(setup.root_context().for_same_level().with_flags(flags)).unwrap();
        assert_ne!(Arc::as_ptr(&second), built);
        assert!(second.context().flags().full_load_required);
        assert_eq!(labels(&second.all_nodes().unwrap()), ["a"]);
    }

    #[test]
    fn test_known_children_follow_hint() {
        let setup = TestSetup::new();
        let root = setup.root_context();
        let mut parent = crate::testing::keyed_node("p", 1);
        parent.extended.children_hint = ChildrenHint::Never;
        let parent = crate::testing::cached_node(&root, parent);
        let children = child_level_provider(&root, &parent).unwrap();
        assert!(!children.has_nodes().unwrap());
        assert_eq!(setup.executor.reads(), 0);
    }
}
