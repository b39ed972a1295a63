//! Work queue configuration.

use std::time::Duration;

/// Default number of worker threads.
pub const DEFAULT_WORKER_THREADS: usize = 2;

/// Default number of secondary (async hand-off) threads.
pub const DEFAULT_ASYNC_THREADS: usize = 1;

/// Default time `shutdown()` waits for workers to drain.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Default wall-clock ceiling before an in-flight request is considered leaked.
pub const DEFAULT_STALE_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Default interval between stale-request sweeps.
pub const DEFAULT_WATCHDOG_INTERVAL: Duration = Duration::from_secs(10);

/// Default number of demoted re-runs for a request flagged `RETRY`.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Configuration for a [`PriorityWorkQueue`](super::PriorityWorkQueue).
#[derive(Clone, Debug)]
pub struct QueueConfig {
    /// Thread name prefix and log label.
    pub name: String,
    /// Number of OS worker threads. Zero selects cooperative mode, where
    /// requests run on the caller's thread inside `pump()` and
    /// `wait_for_result()`.
    pub worker_threads: usize,
    /// Size of the secondary pool for `ASYNC` requests. Zero disables it.
    pub async_threads: usize,
    /// How long `shutdown()` waits before force-aborting leftovers.
    pub shutdown_timeout: Duration,
    /// In-flight age after which the watchdog force-aborts a request.
    pub stale_request_timeout: Duration,
    /// Interval between watchdog sweeps.
    pub watchdog_interval: Duration,
    /// Maximum demoted re-runs for failed `RETRY` requests.
    pub max_retries: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: "texcache-queue".to_string(),
            worker_threads: DEFAULT_WORKER_THREADS,
            async_threads: DEFAULT_ASYNC_THREADS,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            stale_request_timeout: DEFAULT_STALE_REQUEST_TIMEOUT,
            watchdog_interval: DEFAULT_WATCHDOG_INTERVAL,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl QueueConfig {
    /// Creates a configuration with the given name and defaults otherwise.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Cooperative, non-threaded configuration.
    pub fn cooperative(name: impl Into<String>) -> Self {
        Self::new(name).with_worker_threads(0).with_async_threads(0)
    }

    /// Sets the number of worker threads.
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    /// Sets the secondary pool size.
    pub fn with_async_threads(mut self, threads: usize) -> Self {
        self.async_threads = threads;
        self
    }

    /// Sets the shutdown drain timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Sets the stale-request ceiling.
    pub fn with_stale_request_timeout(mut self, timeout: Duration) -> Self {
        self.stale_request_timeout = timeout;
        self
    }

    /// Sets the retry budget.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Returns true when requests run on the caller's thread.
    pub fn is_cooperative(&self) -> bool {
        self.worker_threads == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = QueueConfig::default();
        assert_eq!(config.worker_threads, DEFAULT_WORKER_THREADS);
        assert_eq!(config.async_threads, DEFAULT_ASYNC_THREADS);
        assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
        assert!(!config.is_cooperative());
    }

    #[test]
    fn test_cooperative_config() {
        let config = QueueConfig::cooperative("test");
        assert_eq!(config.name, "test");
        assert!(config.is_cooperative());
        assert_eq!(config.async_threads, 0);
    }

    #[test]
    fn test_builder() {
        let config = QueueConfig::new("q")
            .with_worker_threads(8)
            .with_shutdown_timeout(Duration::from_millis(50))
            .with_stale_request_timeout(Duration::from_secs(1))
            .with_max_retries(0);
        assert_eq!(config.worker_threads, 8);
        assert_eq!(config.shutdown_timeout, Duration::from_millis(50));
        assert_eq!(config.stale_request_timeout, Duration::from_secs(1));
        assert_eq!(config.max_retries, 0);
    }
}
