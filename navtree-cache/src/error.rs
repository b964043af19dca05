//! Error types for the hierarchy cache.

use thiserror::Error;

/// Errors raised by cache mutations
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// An identity that must exist was not found, or a persisted row is malformed
    #[error("Invariant violated: {0}")]
    Invariant(String),
}

impl CacheError {
    pub fn invariant(message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::error!("{}", message);
        CacheError::Invariant(message)
    }
}

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// Log a failed read and fall back to `default`
pub(crate) fn or_log<T>(result: Result<T>, what: &str, default: T) -> T {
    match result {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!(error = %err, "{} failed", what);
            default
        }
    }
}
