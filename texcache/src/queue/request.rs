//! Request payload contract for the work queue.
//!
//! The queue owns no domain knowledge: callers supply a type implementing
//! [`Work`], and the queue decides when and where `run()` is called.

use std::sync::atomic::{AtomicBool, Ordering};

use bitflags::bitflags;

use super::handle::{RequestHandle, RequestStatus};

bitflags! {
    /// Per-request behaviour flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RequestFlags: u32 {
        /// Registry entry is removed as soon as the request finishes.
        const AUTO_COMPLETE = 1 << 0;
        /// Cooperative cancel requested.
        const ABORT = 1 << 1;
        /// May be handed to the secondary pool when it reports `Pending`.
        const ASYNC = 1 << 2;
        /// Failed runs are re-enqueued at a demoted priority.
        const RETRY = 1 << 3;
    }
}

/// What a single `run()` step produced.
#[derive(Debug)]
pub enum Outcome<T> {
    /// Finished successfully.
    Complete(T),
    /// Finished unsuccessfully. The output carries the failure details;
    /// with [`RequestFlags::RETRY`] the queue may run the request again.
    Failed(T),
    /// Not finished yet; run again later.
    Pending,
}

/// Read-only view handed to a running request.
#[derive(Debug)]
pub struct WorkContext<'a> {
    pub(crate) handle: RequestHandle,
    pub(crate) attempt: u32,
    pub(crate) abort: &'a AtomicBool,
    pub(crate) quitting: &'a AtomicBool,
}

impl WorkContext<'_> {
    /// Handle of the request being run.
    pub fn handle(&self) -> RequestHandle {
        self.handle
    }

    /// Zero-based count of previous runs that ended in a retry.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Returns true once the caller or the queue asked this request to stop.
    ///
    /// Long-running work should check this between atomic steps.
    pub fn is_aborted(&self) -> bool {
        self.abort.load(Ordering::Relaxed) || self.quitting.load(Ordering::Relaxed)
    }
}

/// A unit of cancellable, resumable work.
pub trait Work: Send + 'static {
    /// Result handed back to the caller.
    type Output: Send + 'static;

    /// Short name for logging.
    fn name(&self) -> &str {
        "request"
    }

    /// Performs one step of the work. Runs outside every queue lock.
    fn run(&mut self, cx: &WorkContext<'_>) -> Outcome<Self::Output>;
}

/// Terminal state of a request as observed by the caller.
#[derive(Debug)]
pub struct Completion<T> {
    /// `Complete` or `Aborted`.
    pub status: RequestStatus,
    /// Aborted by the stale-request sweep rather than by the caller.
    pub timed_out: bool,
    /// Output of a completed request; `None` for aborted ones.
    pub output: Option<T>,
}

impl<T> Completion<T> {
    /// Returns true if the request ran to completion.
    pub fn is_complete(&self) -> bool {
        self.status == RequestStatus::Complete
    }
}
