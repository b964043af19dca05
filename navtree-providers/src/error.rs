//! Error types for node providers.

use navtree_cache::CacheError;
use thiserror::Error;

/// Errors raised while producing nodes
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// The query collaborator failed
    #[error("Query error: {0}")]
    Query(String),

    /// The request was canceled by its caller
    #[error("Request canceled")]
    Canceled,

    #[error("Invariant violated: {0}")]
    Invariant(String),
}

impl ProviderError {
    pub fn query(message: impl Into<String>) -> Self {
        ProviderError::Query(message.into())
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::error!("{}", message);
        ProviderError::Invariant(message)
    }

    /// Cancellation is a normal way for a request to end
    pub fn is_canceled(&self) -> bool {
        matches!(self, ProviderError::Canceled)
    }
}

/// Result type for provider operations
pub type Result<T> = std::result::Result<T, ProviderError>;
