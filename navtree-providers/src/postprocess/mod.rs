//! Post-processing of produced levels.
//!
//! A post-processor wraps a provider and, on first access, turns its nodes
//! into a different sequence: merged, re-ordered or replaced by children.
//! Processing is lazy like every other provider and falls back to the
//! wrapped provider when there is nothing to do.

mod grouping;
mod label_sort;
mod same_label;
pub mod splice;

use crate::context::ProviderContext;
use crate::error::Result;
use crate::provider::NodesProvider;
use navtree_types::ClassId;
use std::sync::Arc;
use tracing::trace;

/// A transformation applied to a whole level
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostProcessor {
    /// Replace a lone display-label grouping node by its children
    DisplayLabelGrouping,
    /// Merge instance nodes of `grouped_classes` that share a label; every
    /// class when empty
    SameLabelMerge { grouped_classes: Vec<ClassId> },
    /// Sort the nodes of label-sorted specifications across data sources
    LabelSort,
}

impl PostProcessor {
    pub fn name(&self) -> &'static str {
        match self {
            PostProcessor::DisplayLabelGrouping => "display-label-grouping",
            PostProcessor::SameLabelMerge { .. } => "same-label-merge",
            PostProcessor::LabelSort => "label-sort",
        }
    }

    /// Wrap `base` in a provider applying this post-processor
    pub fn apply(&self, base: Arc<NodesProvider>) -> Arc<NodesProvider> {
        let context = Arc::clone(base.context());
        let processing = PostProcessing {
            base,
            processor: self.clone(),
        };
        Arc::new(NodesProvider::post_processed(context, processing))
    }

    /// Wrap `base` in every post-processor, first one innermost
    pub fn apply_all(base: Arc<NodesProvider>, processors: &[PostProcessor]) -> Arc<NodesProvider> {
        processors
            .iter()
            .fold(base, |provider, processor| processor.apply(provider))
    }
}

/// A post-processor bound to the provider it processes
#[derive(Debug)]
pub struct PostProcessing {
    base: Arc<NodesProvider>,
    processor: PostProcessor,
}

impl PostProcessing {
    pub fn base(&self) -> &Arc<NodesProvider> {
        &self.base
    }

    pub fn processor(&self) -> &PostProcessor {
        &self.processor
    }

    pub(crate) fn run(&self, provider: &NodesProvider) -> Result<Arc<NodesProvider>> {
        let context: &Arc<ProviderContext> = provider.context();
        if context.flags().post_processing_disabled {
            return Ok(Arc::clone(&self.base));
        }
        context.check_canceled()?;
        let processed = match &self.processor {
            PostProcessor::DisplayLabelGrouping => grouping::process(context, &self.base)?,
            PostProcessor::SameLabelMerge { grouped_classes } => {
                same_label::process(context, &self.base, grouped_classes)?
            }
            PostProcessor::LabelSort => label_sort::process(context, &self.base)?,
        };
        trace!(
            processor = self.processor.name(),
            changed = processed.is_some(),
            "post-processing done"
        );
        Ok(processed.unwrap_or_else(|| Arc::clone(&self.base)))
    }
}
