//! Approximate-LRU eviction with time-sliced body deletion.
//!
//! Eviction happens in two phases:
//!
//! 1. **Selection** ([`EvictionPolicy::plan`]): walk a coldest-first
//!    snapshot of the index until the projected total drops to the purge
//!    target. The caller frees the selected index records immediately, so
//!    byte accounting is exact from that point on.
//! 2. **Deletion** ([`EvictionPolicy::run_slice`]): body files of the freed
//!    entries sit on a pending list and are removed a few milliseconds at a
//!    time. Each id is re-checked against the index right before its file
//!    is deleted; if it was re-cached in the meantime the deletion is
//!    skipped.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::body::BodyStore;
use super::id::ContentId;
use super::index::{CacheIndex, IndexEntry};
use super::types::CacheConfig;

/// Outcome of one deletion slice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SliceReport {
    /// Entries whose body is now gone (already-missing files count).
    pub removed: usize,
    /// Entries skipped because the id was re-cached.
    pub skipped: usize,
    /// Deletions that failed and were dropped.
    pub failed: usize,
    /// Entries still pending after the slice.
    pub remaining: usize,
}

impl SliceReport {
    /// Returns true if the slice touched the disk.
    pub fn did_io(&self) -> bool {
        self.removed > 0 || self.failed > 0
    }
}

/// Byte-budget policy plus the pending-deletion list.
pub struct EvictionPolicy {
    max_bytes: u64,
    target_bytes: u64,
    slice: Duration,
    pending: Mutex<VecDeque<IndexEntry>>,
    removed_total: AtomicU64,
}

impl EvictionPolicy {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            max_bytes: config.max_bytes,
            target_bytes: config.purge_target_bytes(),
            slice: config.deletion_slice,
            pending: Mutex::new(VecDeque::new()),
            removed_total: AtomicU64::new(0),
        }
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    pub fn target_bytes(&self) -> u64 {
        self.target_bytes
    }

    /// Returns true if adding `incoming` bytes would exceed the ceiling.
    pub fn needs_purge(&self, total: u64, incoming: u64) -> bool {
        total.saturating_add(incoming) > self.max_bytes
    }

    /// Selects entries to evict, coldest first.
    ///
    /// Stops once the projected total is at or below the purge target and
    /// still leaves room for `incoming` under the ceiling. `exclude` is never
    /// selected (the id being written). Returns an empty plan when no purge
    /// is needed; may fall short if the snapshot runs out.
    pub fn plan(
        &self,
        coldest: &[IndexEntry],
        total: u64,
        incoming: u64,
        exclude: Option<&ContentId>,
    ) -> Vec<IndexEntry> {
        if !self.needs_purge(total, incoming) {
            return Vec::new();
        }

        let mut projected = total;
        let mut selected = Vec::new();
        for entry in coldest {
            if projected <= self.target_bytes && projected.saturating_add(incoming) <= self.max_bytes {
                break;
            }
            if Some(&entry.id) == exclude {
                continue;
            }
            projected = projected.saturating_sub(entry.body_size);
            selected.push(*entry);
        }

        if projected.saturating_add(incoming) > self.max_bytes {
            warn!(
                projected,
                incoming,
                max_bytes = self.max_bytes,
                "Eviction could not free enough space"
            );
        }
        selected
    }

    /// Queues freed entries for body deletion.
    pub fn schedule(&self, entries: impl IntoIterator<Item = IndexEntry>) {
        let mut pending = self.pending.lock();
        let before = pending.len();
        pending.extend(entries);
        let added = pending.len() - before;
        if added > 0 {
            debug!(added, pending = pending.len(), "Scheduled body deletions");
        }
    }

    /// Entries waiting for deletion.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Total body files removed since creation.
    pub fn removed_total(&self) -> u64 {
        self.removed_total.load(Ordering::Relaxed)
    }

    /// Drops every pending deletion (after a full cache clear).
    pub fn clear_pending(&self) {
        self.pending.lock().clear();
    }

    /// Runs one deletion slice with the configured budget.
    pub fn run_slice(&self, index: &CacheIndex, bodies: &BodyStore) -> SliceReport {
        self.run_slice_for(index, bodies, self.slice)
    }

    /// Removes pending body files until `budget` is spent.
    ///
    /// At least one entry is processed per call when any are pending. An
    /// empty pending list performs no I/O.
    pub fn run_slice_for(
        &self,
        index: &CacheIndex,
        bodies: &BodyStore,
        budget: Duration,
    ) -> SliceReport {
        let start = Instant::now();
        let mut report = SliceReport::default();

        loop {
            let Some(entry) = self.pending.lock().pop_front() else {
                break;
            };

            match index.if_absent(&entry.id, || bodies.remove(&entry.id)) {
                None => report.skipped += 1,
                Some(Ok(_)) => report.removed += 1,
                Some(Err(e)) => {
                    warn!(id = %entry.id, error = %e, "Failed to delete evicted body");
                    report.failed += 1;
                }
            }

            if start.elapsed() >= budget {
                break;
            }
        }

        report.remaining = self.pending_len();
        self.removed_total
            .fetch_add(report.removed as u64, Ordering::Relaxed);
        if report.removed + report.skipped + report.failed > 0 {
            debug!(
                removed = report.removed,
                skipped = report.skipped,
                failed = report.failed,
                remaining = report.remaining,
                elapsed_us = start.elapsed().as_micros() as u64,
                "Deletion slice finished"
            );
        }
        report
    }
}
