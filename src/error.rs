//! Adapter error type

use crate::backend::BackendError;
use crate::cache::StoreError;

/// Failures surfaced by [`crate::CachedAdapter`]
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The backend failed; passed through unchanged
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The metadata store failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Local staging could not be set up
    #[error("Local staging failed: {0}")]
    Staging(#[from] std::io::Error),
}

impl CacheError {
    /// Whether the backend confirmed the object does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::Backend(e) if e.is_not_found())
    }

    /// The underlying backend error, if any
    pub fn backend(&self) -> Option<&BackendError> {
        match self {
            CacheError::Backend(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
