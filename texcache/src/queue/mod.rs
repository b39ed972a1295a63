//! Prioritised, cancellable work queue.
//!
//! The queue runs caller-defined [`Work`] on a pool of OS threads, or on the
//! caller's own thread when configured with zero workers. It knows nothing
//! about the cache; the cache layer plugs in through [`Work`] in
//! [`crate::worker`].
//!
//! # Lifecycle
//!
//! ```text
//! submit() ──► Queued ──claim──► InProgress ──► Complete | Aborted ──reap──► (gone)
//!                │                    │
//!                └──abort()──► Aborted └──Failed + RETRY──► Queued (priority - 1)
//! ```
//!
//! # Example
//!
//! ```
//! use texcache::queue::{Outcome, PriorityWorkQueue, QueueConfig, RequestFlags, Work, WorkContext};
//!
//! struct Double(u32);
//!
//! impl Work for Double {
//!     type Output = u32;
//!     fn run(&mut self, _cx: &WorkContext<'_>) -> Outcome<u32> {
//!         Outcome::Complete(self.0 * 2)
//!     }
//! }
//!
//! let queue = PriorityWorkQueue::new(QueueConfig::cooperative("doc"));
//! let handle = queue.submit(Double(21), 1, RequestFlags::empty()).unwrap();
//! let done = queue.wait_for_result(handle, true).unwrap();
//! assert_eq!(done.output, Some(42));
//! ```

mod config;
mod engine;
mod error;
mod handle;
mod registry;
mod request;
mod watchdog;

pub use config::{
    QueueConfig, DEFAULT_ASYNC_THREADS, DEFAULT_MAX_RETRIES, DEFAULT_SHUTDOWN_TIMEOUT,
    DEFAULT_STALE_REQUEST_TIMEOUT, DEFAULT_WATCHDOG_INTERVAL, DEFAULT_WORKER_THREADS,
};
pub use engine::{PriorityWorkQueue, QueueStats};
pub use error::QueueError;
pub use handle::{RequestHandle, RequestStatus};
pub use registry::{Lookup, RequestRegistry};
pub use request::{Completion, Outcome, RequestFlags, Work, WorkContext};
pub use watchdog::{SweepStale, StaleRequestWatchdog};
