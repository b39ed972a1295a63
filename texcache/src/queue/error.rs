//! Work queue errors.

use thiserror::Error;

use super::handle::RequestHandle;

/// Errors returned by queue operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// Submission rejected because `shutdown()` has started.
    #[error("queue is shutting down")]
    ShuttingDown,

    /// The handle does not refer to a live request.
    #[error("unknown or expired request handle {0}")]
    UnknownHandle(RequestHandle),
}
