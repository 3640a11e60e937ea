//! Error types for the indexing run.

use thiserror::Error;

/// Errors raised while building or persisting index records.
///
/// Most of these are recorded in the run's error list and indexing carries
/// on; only a store failure under the fail-fast policy is propagated out of
/// [`RunContext::store_in_index`](crate::context::RunContext::store_in_index).
#[derive(Error, Debug)]
pub enum IndexError {
    /// A record is missing a required field
    #[error("Validation error: {0}")]
    Validation(String),

    /// Folder, file or extractor problem for a single item
    #[error("Source error: {0}")]
    Source(String),

    /// Job cannot be dispatched
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Persistence statement failed
    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),

    /// Registry value could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for IndexError {
    fn from(err: serde_json::Error) -> Self {
        IndexError::Serialization(err.to_string())
    }
}
