//! Time-related utility functions.
//!
//! The cache stores coarse wall-clock timestamps (whole seconds since the
//! Unix epoch) in its index records, while in-flight request tracking uses
//! monotonic `Instant`s. This module holds the conversions between the two.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Current wall-clock time as whole seconds since the Unix epoch.
///
/// Clocks set before 1970 collapse to zero rather than failing.
pub fn now_secs() -> i64 {
    system_time_to_secs(SystemTime::now())
}

/// Convert a `SystemTime` to whole seconds since the Unix epoch.
///
/// # Example
///
/// ```
/// use std::time::{Duration, UNIX_EPOCH};
/// use texcache::time::system_time_to_secs;
///
/// let t = UNIX_EPOCH + Duration::from_secs(90);
/// assert_eq!(system_time_to_secs(t), 90);
/// ```
pub fn system_time_to_secs(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().min(i64::MAX as u64) as i64)
        .unwrap_or(0)
}

/// Time elapsed since `start`, saturating at zero for instants in the future.
pub fn elapsed_since(start: Instant, now: Instant) -> Duration {
    now.saturating_duration_since(start)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_secs_is_after_2020() {
        // 2020-01-01T00:00:00Z
        assert!(now_secs() > 1_577_836_800);
    }

    #[test]
    fn system_time_before_epoch_is_zero() {
        let before = UNIX_EPOCH - Duration::from_secs(10);
        assert_eq!(system_time_to_secs(before), 0);
    }

    #[test]
    fn elapsed_since_future_instant_is_zero() {
        let now = Instant::now();
        let later = now + Duration::from_secs(5);
        assert_eq!(elapsed_since(later, now), Duration::ZERO);
        assert_eq!(elapsed_since(now, later), Duration::from_secs(5));
    }
}
