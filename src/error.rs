//! Errors surfaced by the trust engine to its callers.

use thiserror::Error;

use crate::device::ValidationError;
use crate::events::LogError;
use crate::store::StoreError;

/// Failure of a request-scoped engine operation.
///
/// Enrichment failures never appear here; they are recovered inside the
/// engine and recorded as an `EnrichmentOutcome`.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed or missing device fields.
    #[error("invalid request: {0}")]
    Validation(#[from] ValidationError),

    /// Unknown device id.
    #[error("device not found: {0}")]
    NotFound(String),

    /// Device store failed after the retry budget was spent.
    #[error("device store unavailable: {0}")]
    StoreUnavailable(String),

    /// Security event log failed after the retry budget was spent.
    #[error("security event log unavailable: {0}")]
    LogUnavailable(String),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => EngineError::NotFound(id),
            other => EngineError::StoreUnavailable(other.to_string()),
        }
    }
}

impl From<LogError> for EngineError {
    fn from(err: LogError) -> Self {
        EngineError::LogUnavailable(err.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
