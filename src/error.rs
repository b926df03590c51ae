//! Error types for cache operations.

use thiserror::Error;

/// Error raised by the storage backend.
///
/// Storage errors are never propagated to the pipeline caller. The executor
/// handles them locally: a failed lookup degrades to a cache miss, a failed
/// update degrades to returning the origin response uncached, and a failed
/// invalidation is best-effort.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend could not be reached or refused the operation.
    #[error("cache storage unavailable: {0}")]
    Unavailable(String),

    /// Internal backend error, state or computation error.
    #[error(transparent)]
    Internal(Box<dyn std::error::Error + Send + Sync>),
}

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// A fatal protocol violation in an incoming request.
///
/// Requests carrying one of these are answered by the cache itself, without
/// contacting the origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestViolation {
    /// The request carries a body but declares neither `Content-Length`
    /// nor `Transfer-Encoding`.
    BodyWithoutLength,
    /// A weak entity tag validator was used on a PUT or DELETE request.
    WeakEtagOnUnsafeMethod,
}
