//! Caller-driven cancellation.

use crate::error::{ProviderError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag polled by long-running materialization.
///
/// Clones observe the same flag, so a caller keeps one clone and hands the
/// other to the request.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Canceled)` once [`CancellationToken::cancel`] was called
    pub fn check(&self) -> Result<()> {
        if self.is_canceled() {
            return Err(ProviderError::Canceled);
        }
        Ok(())
    }
}
