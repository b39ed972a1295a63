//! Background cache maintenance.
//!
//! The daemon runs as a tokio task and, on every tick:
//! 1. Runs one time-sliced body deletion pass
//! 2. Flushes deferred index time stamps when any are buffered
//! 3. Purges cold entries if the cache is over its byte ceiling
//!
//! # Example
//!
//! ```ignore
//! use texcache::cache::MaintenanceDaemon;
//!
//! let daemon = MaintenanceDaemon::new(Arc::clone(&cache));
//! tokio::spawn(daemon.run(shutdown_token));
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::texture_cache::TextureCache;

/// Default interval between maintenance ticks.
pub const DEFAULT_MAINTENANCE_INTERVAL: Duration = Duration::from_millis(250);

/// What one maintenance tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub deleted: usize,
    pub flushed: usize,
    pub purged: usize,
}

/// Periodic deletion, flush, and purge driver for a [`TextureCache`].
pub struct MaintenanceDaemon {
    /// Cache being maintained.
    cache: Arc<TextureCache>,

    /// Time between ticks.
    interval: Duration,
}

impl MaintenanceDaemon {
    pub fn new(cache: Arc<TextureCache>) -> Self {
        Self {
            cache,
            interval: DEFAULT_MAINTENANCE_INTERVAL,
        }
    }

    /// Set the tick interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Runs one maintenance step synchronously.
    pub fn tick(&self) -> TickReport {
        maintain(&self.cache)
    }

    /// Runs until shutdown is signalled, then flushes once more.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_ms = self.interval.as_millis() as u64,
            "Cache maintenance daemon starting"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // Skip the first immediate tick
        interval.tick().await;

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Cache maintenance daemon shutting down");
                    break;
                }

                _ = interval.tick() => {
                    let cache = Arc::clone(&self.cache);
                    if let Err(e) = tokio::task::spawn_blocking(move || maintain(&cache)).await {
                        warn!(error = %e, "Maintenance tick panicked");
                    }
                }
            }
        }

        if self.cache.is_read_only() {
            return;
        }
        let cache = Arc::clone(&self.cache);
        match tokio::task::spawn_blocking(move || cache.flush()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(error = %e, "Failed to flush deferred index records at shutdown"),
            Err(e) => warn!(error = %e, "Shutdown flush panicked"),
        }
    }
}

/// One maintenance step. Blocks on file I/O and the index lock.
fn maintain(cache: &TextureCache) -> TickReport {
    let mut report = TickReport::default();
    if cache.is_read_only() {
        return report;
    }

    report.deleted = cache.run_deletion_slice().removed;

    if cache.index().deferred_len() > 0 {
        match cache.flush() {
            Ok(flushed) => report.flushed = flushed,
            Err(e) => warn!(error = %e, "Failed to flush deferred index records"),
        }
    }

    match cache.purge() {
        Ok(purged) => report.purged = purged,
        Err(e) => warn!(error = %e, "Background purge failed"),
    }

    if report != TickReport::default() {
        debug!(
            deleted = report.deleted,
            flushed = report.flushed,
            purged = report.purged,
            "Cache maintenance tick"
        );
    }
    report
}

/// Maintenance loop with the given interval, for `tokio::spawn`.
pub async fn run_maintenance_daemon(
    cache: Arc<TextureCache>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    MaintenanceDaemon::new(cache)
        .with_interval(interval)
        .run(shutdown)
        .await
}
