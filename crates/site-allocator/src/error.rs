//! Allocation errors

use allocation_store::{ResourceKind, Scope, StoreError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned by allocation and release
///
/// Every variant aborts the enclosing allocation transaction; none leaves a
/// partial assignment behind.
#[derive(Debug, Error)]
pub enum AllocationError {
    /// No active range for a scope/resource; needs administrator action
    #[error("No {resource} range configured for {scope}")]
    ConfigurationMissing { scope: Scope, resource: ResourceKind },

    /// Every value in the configured range is held; needs a wider range
    #[error("{resource} range exhausted for {scope}")]
    ResourceExhausted { scope: Scope, resource: ResourceKind },

    /// Lost a race with a concurrent allocation (retryable)
    #[error("Concurrent allocation conflict: {0}")]
    ConcurrentConflict(String),

    /// Malformed input (blank site name, unknown region, ...)
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Assignment or region not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Backend failure
    #[error("Store error: {0}")]
    Store(StoreError),
}

/// Error category reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    ConfigurationMissing,
    ResourceExhausted,
    ConcurrentConflict,
    ValidationError,
    NotFound,
    StoreFailure,
}

impl AllocationError {
    /// Category of this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            AllocationError::ConfigurationMissing { .. } => ErrorKind::ConfigurationMissing,
            AllocationError::ResourceExhausted { .. } => ErrorKind::ResourceExhausted,
            AllocationError::ConcurrentConflict(_) => ErrorKind::ConcurrentConflict,
            AllocationError::Validation(_) => ErrorKind::ValidationError,
            AllocationError::NotFound(_) => ErrorKind::NotFound,
            AllocationError::Store(_) => ErrorKind::StoreFailure,
        }
    }

    /// Whether the same request may succeed if retried
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, AllocationError::ConcurrentConflict(_))
    }
}

impl From<StoreError> for AllocationError {
    fn from(err: StoreError) -> Self {
        if err.is_retryable() {
            return AllocationError::ConcurrentConflict(err.to_string());
        }
        match err {
            StoreError::NotFound(msg) => AllocationError::NotFound(msg),
            other => AllocationError::Store(other),
        }
    }
}
