//! Stale-request watchdog.
//!
//! Workers stamp each claimed request with its start time. The watchdog
//! periodically sweeps for requests that have been in flight longer than a
//! generous ceiling and forces them to `Aborted`, so a responder that was
//! never finalised cannot pin a registry entry forever.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::config::{DEFAULT_STALE_REQUEST_TIMEOUT, DEFAULT_WATCHDOG_INTERVAL};

/// Something that can force-abort requests older than a ceiling.
pub trait SweepStale: Send + Sync {
    /// Forces stale in-flight requests to `Aborted`; returns how many.
    fn sweep_stale(&self, ceiling: Duration) -> usize;
}

/// Periodic stale-request sweeper.
pub struct StaleRequestWatchdog {
    target: Arc<dyn SweepStale>,
    ceiling: Duration,
    interval: Duration,
}

impl StaleRequestWatchdog {
    /// Creates a watchdog with default ceiling and interval.
    pub fn new(target: Arc<dyn SweepStale>) -> Self {
        Self {
            target,
            ceiling: DEFAULT_STALE_REQUEST_TIMEOUT,
            interval: DEFAULT_WATCHDOG_INTERVAL,
        }
    }

    /// Sets the in-flight age ceiling.
    pub fn with_ceiling(mut self, ceiling: Duration) -> Self {
        self.ceiling = ceiling;
        self
    }

    /// Sets the sweep interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Runs one sweep immediately.
    pub fn sweep(&self) -> usize {
        let forced = self.target.sweep_stale(self.ceiling);
        if forced > 0 {
            warn!(
                forced,
                ceiling_secs = self.ceiling.as_secs(),
                "Stale request watchdog forced requests to abort"
            );
        } else {
            debug!("Stale request watchdog: no stale requests");
        }
        forced
    }

    /// Sweeps on an interval until cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    self.sweep();
                }
            }
        }
        debug!("Stale request watchdog stopped");
    }
}
