//! Service error types.

use thiserror::Error;

use crate::cache::CacheError;
use crate::queue::QueueError;

/// Errors surfaced by [`CacheService`](super::CacheService).
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Opening or maintaining the cache failed
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// The request queue rejected an operation
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}
