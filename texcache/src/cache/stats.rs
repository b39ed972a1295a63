//! Cache statistics tracking and reporting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Cache statistics for monitoring and debugging.
#[derive(Debug, Clone)]
pub struct CacheStats {
    // Request metrics
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub write_failures: u64,
    pub fast_hits: u64,

    // Maintenance metrics
    pub evictions: u64,
    pub resets: u64,
    pub pending_deletions: usize,

    // Occupancy
    pub total_bytes: u64,
    pub live_entries: usize,
    pub max_entries: u32,
    pub max_bytes: u64,

    // Timing
    pub created_at: Instant,
}

impl Default for CacheStats {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStats {
    /// Create an empty statistics snapshot.
    pub fn new() -> Self {
        Self {
            hits: 0,
            misses: 0,
            writes: 0,
            write_failures: 0,
            fast_hits: 0,
            evictions: 0,
            resets: 0,
            pending_deletions: 0,
            total_bytes: 0,
            live_entries: 0,
            max_entries: 0,
            max_bytes: 0,
            created_at: Instant::now(),
        }
    }

    /// Calculate hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Fraction of the byte ceiling in use (0.0 to 1.0+).
    pub fn byte_usage(&self) -> f64 {
        if self.max_bytes == 0 {
            0.0
        } else {
            self.total_bytes as f64 / self.max_bytes as f64
        }
    }

    /// Fraction of index slots in use.
    pub fn entry_usage(&self) -> f64 {
        if self.max_entries == 0 {
            0.0
        } else {
            self.live_entries as f64 / f64::from(self.max_entries)
        }
    }

    /// Time since the counters started.
    pub fn uptime(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Format statistics as a human-readable report.
    pub fn format(&self) -> String {
        format!(
            r#"Texture Cache Statistics

OCCUPANCY
  Entries:     {} / {} ({:.1}%)
  Size:        {:.2} MB / {:.2} MB ({:.1}%)

REQUESTS
  Hits:        {}
  Misses:      {}
  Hit Rate:    {:.1}%
  Fast Hits:   {}
  Writes:      {}
  Failures:    {}

MAINTENANCE
  Evictions:   {}
  Pending:     {}
  Resets:      {}
  Uptime:      {}s
"#,
            self.live_entries,
            self.max_entries,
            self.entry_usage() * 100.0,
            self.total_bytes as f64 / (1024.0 * 1024.0),
            self.max_bytes as f64 / (1024.0 * 1024.0),
            self.byte_usage() * 100.0,
            self.hits,
            self.misses,
            self.hit_rate() * 100.0,
            self.fast_hits,
            self.writes,
            self.write_failures,
            self.evictions,
            self.pending_deletions,
            self.resets,
            self.uptime().as_secs(),
        )
    }
}

/// Lock-free counters updated on the request path.
#[derive(Debug)]
pub(crate) struct StatsCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    write_failures: AtomicU64,
    fast_hits: AtomicU64,
    evictions: AtomicU64,
    created_at: Instant,
}

impl Default for StatsCounters {
    fn default() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
            fast_hits: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            created_at: Instant::now(),
        }
    }
}

impl StatsCounters {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write_failure(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fast_hit(&self) {
        self.fast_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evictions(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    /// Copies the counters into a snapshot; occupancy is filled by the caller.
    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            fast_hits: self.fast_hits.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            created_at: self.created_at,
            ..CacheStats::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_default() {
        let stats = CacheStats::default();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.evictions, 0);
    }

    #[test]
    fn test_hit_rate_no_requests() {
        assert_eq!(CacheStats::new().hit_rate(), 0.0);
    }

    #[test]
    fn test_hit_rate_mixed() {
        let mut stats = CacheStats::new();
        stats.hits = 75;
        stats.misses = 25;
        assert_eq!(stats.hit_rate(), 0.75);
    }

    #[test]
    fn test_usage_ratios() {
        let mut stats = CacheStats::new();
        assert_eq!(stats.byte_usage(), 0.0);

        stats.max_bytes = 1000;
        stats.total_bytes = 800;
        stats.max_entries = 4;
        stats.live_entries = 1;
        assert_eq!(stats.byte_usage(), 0.8);
        assert_eq!(stats.entry_usage(), 0.25);
    }

    #[test]
    fn test_counters_snapshot() {
        let counters = StatsCounters::default();
        counters.record_hit();
        counters.record_hit();
        counters.record_miss();
        counters.record_write();
        counters.record_write_failure();
        counters.record_fast_hit();
        counters.record_evictions(3);

        let stats = counters.snapshot();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.writes, 1);
        assert_eq!(stats.write_failures, 1);
        assert_eq!(stats.fast_hits, 1);
        assert_eq!(stats.evictions, 3);
    }

    #[test]
    fn test_format_contains_sections() {
        let mut stats = CacheStats::new();
        stats.hits = 9;
        stats.misses = 1;
        let report = stats.format();
        assert!(report.contains("OCCUPANCY"));
        assert!(report.contains("Hit Rate:    90.0%"));
    }
}
