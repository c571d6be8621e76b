//! Error taxonomy for bucket operations

use thiserror::Error;

/// Errors returned by `Bucket` implementations
///
/// `NotFound` is the only non-transient variant: it is an expected outcome
/// for first-run index loads and missing versions. Everything else may be
/// retried by the caller; object keys embed the journal sequence number, so
/// a retried put overwrites with identical content.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object not found: {key}")]
    NotFound { key: String },

    #[error("{op} {key} timed out after {elapsed_ms}ms")]
    Timeout {
        op: &'static str,
        key: String,
        elapsed_ms: u64,
    },

    #[error("I/O error on {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether a retry with backoff can reasonably succeed
    pub fn is_transient(&self) -> bool {
        !matches!(self, StoreError::NotFound { .. })
    }
}
