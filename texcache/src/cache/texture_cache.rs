//! Disk-backed texture cache.
//!
//! Ties the slot index to the three kinds of storage it addresses:
//!
//! ```text
//! index.header   id → slot, sizes, last access
//! header.data    first `header_data_size` bytes of each item, by slot
//! bodies/        remaining bytes, one file per id
//! fastcache.bin  downsampled preview, by slot
//! ```
//!
//! An item's stored bytes are its header block followed by its body file.
//! Items that fit in the header block have no body file at all.

use std::fs;

use tracing::{debug, info, warn};

use super::body::BodyStore;
use super::eviction::{EvictionPolicy, SliceReport};
use super::fast::{FastThumbnailCache, Thumbnail};
use super::header_data::HeaderData;
use super::id::ContentId;
use super::index::{CacheIndex, IndexEntry, ResetHook};
use super::path::{fast_cache_path, header_data_path};
use super::stats::{CacheStats, StatsCounters};
use super::types::{CacheConfig, CacheError};
use crate::time::now_secs;

/// Number of rotating slices the startup validation is split into.
pub const VALIDATION_SLICES: u32 = 32;

/// Bytes returned by [`TextureCache::read`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedRead {
    pub data: Vec<u8>,
    /// Full logical size of the item, which may exceed what is stored.
    pub declared_size: i32,
    /// Total bytes stored (header block plus body).
    pub stored_size: u64,
}

/// Result of a successful [`TextureCache::write`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    pub slot: u32,
    pub bytes_written: usize,
    pub body_size: u64,
    /// Entries freed to make room for this write.
    pub evicted: usize,
}

/// Outcome of a consistency check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Committed entries examined.
    pub checked: usize,
    /// Entries freed because their body file was missing or the wrong size.
    pub mismatched: usize,
    /// Unindexed body files scheduled for deletion.
    pub orphans: usize,
}

/// Which entries a validation pass covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationScope {
    /// Every entry and every body file.
    Full,
    /// Entries whose slot falls in this rotating slice.
    Slice(u32),
}

impl ValidationScope {
    /// The slice for the current second.
    pub fn rotating() -> Self {
        ValidationScope::Slice((now_secs().rem_euclid(i64::from(VALIDATION_SLICES))) as u32)
    }

    fn covers_slot(&self, slot: u32) -> bool {
        match self {
            ValidationScope::Full => true,
            ValidationScope::Slice(slice) => slot % VALIDATION_SLICES == *slice,
        }
    }

    fn covers_id(&self, id: &ContentId) -> bool {
        match self {
            ValidationScope::Full => true,
            ValidationScope::Slice(slice) => {
                u32::from(id.as_bytes()[0]) % VALIDATION_SLICES == *slice
            }
        }
    }
}

/// Bounded on-disk cache of opaque texture bytes keyed by [`ContentId`].
pub struct TextureCache {
    config: CacheConfig,
    index: CacheIndex,
    bodies: BodyStore,
    header_data: HeaderData,
    fast: FastThumbnailCache,
    eviction: EvictionPolicy,
    counters: StatsCounters,
}

/// Builds the hook that wipes slot-addressed files after an index reset.
fn reset_hook(bodies: BodyStore, header_data: HeaderData, fast: FastThumbnailCache) -> ResetHook {
    Box::new(move || {
        if let Err(e) = bodies.clear() {
            warn!(error = %e, "Failed to delete body files after reset");
        }
        if let Err(e) = header_data.clear() {
            warn!(error = %e, "Failed to delete header data after reset");
        }
        if let Err(e) = fast.clear() {
            warn!(error = %e, "Failed to delete fast cache after reset");
        }
    })
}

impl TextureCache {
    /// Opens the cache and runs the startup sequence.
    ///
    /// Load and integrity check, shrink to `max_entries`, optional rotating
    /// validation, then purge to the byte budget. Read-only caches skip
    /// everything after the load.
    pub fn open(config: CacheConfig) -> Result<Self, CacheError> {
        config.validate()?;
        if !config.read_only {
            fs::create_dir_all(&config.cache_dir)?;
        }

        let bodies = BodyStore::new(&config.cache_dir);
        let header_data = HeaderData::new(
            header_data_path(&config.cache_dir),
            config.header_data_size,
        );
        let fast = FastThumbnailCache::new(fast_cache_path(&config.cache_dir));
        let hook = reset_hook(bodies.clone(), header_data.clone(), fast.clone());
        let index = CacheIndex::open(&config, Some(hook))?;

        let cache = Self {
            eviction: EvictionPolicy::new(&config),
            counters: StatsCounters::default(),
            config,
            index,
            bodies,
            header_data,
            fast,
        };
        if !cache.config.read_only {
            cache.startup()?;
        }

        info!(
            dir = %cache.config.cache_dir.display(),
            entries = cache.index.len(),
            bytes = cache.index.total_bytes(),
            max_bytes = cache.config.max_bytes,
            read_only = cache.config.read_only,
            "Texture cache opened"
        );
        Ok(cache)
    }

    fn startup(&self) -> Result<(), CacheError> {
        let max_entries = self.config.max_entries;
        if self.index.entry_count() > max_entries {
            let purged = self.index.shrink_to_fit(&mut |from, to| {
                self.header_data.move_slot(from, to)?;
                self.fast.move_slot(from, to)
            })?;
            self.header_data.truncate(max_entries)?;
            self.counters.record_evictions(purged.len() as u64);
            self.eviction.schedule(purged);
        }
        self.fast.resize(max_entries)?;

        if self.config.validate_on_startup {
            self.validate(ValidationScope::rotating())?;
        }
        self.purge()?;
        Ok(())
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn index(&self) -> &CacheIndex {
        &self.index
    }

    pub fn is_read_only(&self) -> bool {
        self.config.read_only
    }

    /// Returns true if a committed entry exists for `id`.
    pub fn contains(&self, id: &ContentId) -> Result<bool, CacheError> {
        Ok(self.index.lookup(id)?.is_some())
    }

    /// Reads up to `max_len` bytes of an item starting at `offset`.
    ///
    /// Returns `None` on a miss. An entry whose body file has gone missing
    /// is freed and reported as a miss.
    pub fn read(
        &self,
        id: &ContentId,
        offset: u64,
        max_len: usize,
    ) -> Result<Option<CachedRead>, CacheError> {
        let Some((slot, record)) = self.index.lookup(id)? else {
            self.counters.record_miss();
            return Ok(None);
        };

        let head = self.header_data.read(slot)?;
        let head_len = head.len() as u64;
        let body_size = record.body_size.max(0) as u64;
        let stored_size = head_len + body_size;

        if offset >= stored_size {
            self.counters.record_hit();
            return Ok(Some(CachedRead {
                data: Vec::new(),
                declared_size: record.declared_size,
                stored_size,
            }));
        }

        let end = offset.saturating_add(max_len as u64).min(stored_size);
        let mut data = Vec::with_capacity(end.saturating_sub(offset) as usize);
        if offset < head_len {
            data.extend_from_slice(&head[offset as usize..end.min(head_len) as usize]);
        }
        if end > head_len {
            let body_offset = offset.max(head_len) - head_len;
            let want = (end - head_len - body_offset) as usize;
            let body = self.bodies.read(id, body_offset, want)?;
            if body.len() < want {
                warn!(
                    id = %id,
                    slot,
                    expected = want,
                    got = body.len(),
                    "Body file missing or short; dropping entry"
                );
                if !self.config.read_only {
                    if let Some(entry) = self.index.free_if_current(slot, &record)? {
                        self.eviction.schedule([entry]);
                    }
                }
                self.counters.record_miss();
                return Ok(None);
            }
            data.extend_from_slice(&body);
        }

        self.counters.record_hit();
        Ok(Some(CachedRead {
            data,
            declared_size: record.declared_size,
            stored_size,
        }))
    }

    /// Stores `data` at `offset` of an item.
    ///
    /// Offset zero replaces the item. A non-zero offset must equal the
    /// currently stored length and appends. The write purges cold entries
    /// first if it would exceed the byte ceiling.
    pub fn write(
        &self,
        id: &ContentId,
        data: &[u8],
        offset: u64,
        declared_size: i32,
    ) -> Result<WriteOutcome, CacheError> {
        if self.config.read_only {
            return Err(CacheError::ReadOnly);
        }
        let result = self.write_inner(id, data, offset, declared_size);
        match &result {
            Ok(_) => self.counters.record_write(),
            Err(e) => {
                debug!(id = %id, error = %e, "Cache write failed");
                self.counters.record_write_failure();
            }
        }
        result
    }

    fn write_inner(
        &self,
        id: &ContentId,
        data: &[u8],
        offset: u64,
        declared_size: i32,
    ) -> Result<WriteOutcome, CacheError> {
        let block = self.header_data.block_size() as u64;

        let current = self.index.lookup(id)?;
        let (mut head, current_body) = match (offset, current) {
            (0, Some((_, record))) => (Vec::new(), record.body_size.max(0) as u64),
            (0, None) => (Vec::new(), 0),
            (_, Some((slot, record))) => {
                let head = self.header_data.read(slot)?;
                let body = record.body_size.max(0) as u64;
                let stored = head.len() as u64 + body;
                if offset != stored {
                    return Err(CacheError::InvalidOffset {
                        id: *id,
                        offset,
                        stored,
                    });
                }
                (head, body)
            }
            (_, None) => {
                return Err(CacheError::InvalidOffset {
                    id: *id,
                    offset,
                    stored: 0,
                })
            }
        };

        // Split the incoming bytes between the header block and the body.
        let head_room = block.saturating_sub(offset) as usize;
        let (head_part, body_part) = data.split_at(head_room.min(data.len()));
        head.extend_from_slice(head_part);
        let body_offset = if offset == 0 { 0 } else { offset.saturating_sub(block) };
        let body_size = if body_part.is_empty() {
            if offset == 0 { 0 } else { current_body }
        } else {
            body_offset + body_part.len() as u64
        };

        if body_size > self.config.max_bytes {
            return Err(CacheError::EntryTooLarge {
                id: *id,
                size: body_size,
                limit: self.config.max_bytes,
            });
        }

        let incoming = body_size.saturating_sub(current_body);
        let mut evicted = self.purge_for(incoming, Some(id))?;

        let allocation = self.index.allocate(id)?;
        if let Some(entry) = allocation.evicted {
            evicted += 1;
            self.counters.record_evictions(1);
            self.eviction.schedule([entry]);
        }
        if !allocation.existing {
            self.fast.clear_slot(allocation.slot)?;
        }

        self.header_data.write(allocation.slot, &head)?;
        if !body_part.is_empty() {
            self.bodies.write(id, body_part, body_offset)?;
        } else if offset == 0 && current_body > 0 {
            self.bodies.remove(id)?;
        }
        let stored = head.len() as u64 + body_size;
        let declared_size = declared_size.max(i32::try_from(stored).unwrap_or(i32::MAX));
        self.index
            .commit(allocation.slot, id, declared_size, body_size)?;

        Ok(WriteOutcome {
            slot: allocation.slot,
            bytes_written: data.len(),
            body_size,
            evicted,
        })
    }

    /// Frees an item and deletes its body. Returns false if it was not cached.
    pub fn remove(&self, id: &ContentId) -> Result<bool, CacheError> {
        let Some(entry) = self.index.free(id)? else {
            return Ok(false);
        };
        self.fast.clear_slot(entry.slot)?;
        if let Some(result) = self.index.if_absent(id, || self.bodies.remove(id)) {
            result?;
        }
        debug!(id = %id, slot = entry.slot, "Removed cache entry");
        Ok(true)
    }

    /// Reads the preview stored for a cached item.
    pub fn read_fast(&self, id: &ContentId) -> Result<Option<Thumbnail>, CacheError> {
        let Some((slot, _)) = self.index.lookup(id)? else {
            return Ok(None);
        };
        let thumb = self.fast.read(slot)?;
        if thumb.is_some() {
            self.counters.record_fast_hit();
        }
        Ok(thumb)
    }

    /// Stores a preview for a cached item. Returns the stored discard level,
    /// or `None` if the pixels were malformed.
    pub fn write_fast(
        &self,
        id: &ContentId,
        pixels: &[u8],
        width: u32,
        height: u32,
        channels: u8,
        discard_level: i32,
    ) -> Result<Option<i32>, CacheError> {
        if self.config.read_only {
            return Err(CacheError::ReadOnly);
        }
        let Some((slot, _)) = self.index.lookup(id)? else {
            return Err(CacheError::NotFound(*id));
        };
        self.fast
            .write(slot, pixels, width, height, channels, discard_level)
    }

    /// Evicts cold entries until the byte total is back under the target.
    ///
    /// Returns the number of entries freed. Body files are deleted later
    /// by [`run_deletion_slice`](Self::run_deletion_slice).
    pub fn purge(&self) -> Result<usize, CacheError> {
        if self.config.read_only {
            return Ok(0);
        }
        self.purge_for(0, None)
    }

    fn purge_for(&self, incoming: u64, exclude: Option<&ContentId>) -> Result<usize, CacheError> {
        let total = self.index.total_bytes();
        if !self.eviction.needs_purge(total, incoming) {
            return Ok(0);
        }
        let plan = self
            .eviction
            .plan(&self.index.coldest_entries(), total, incoming, exclude);
        if plan.is_empty() {
            return Ok(0);
        }

        let freed = self.index.free_entries(&plan)?;
        let count = freed.len();
        info!(
            evicted = count,
            before = total,
            after = self.index.total_bytes(),
            incoming,
            "Purged cold cache entries"
        );
        self.counters.record_evictions(count as u64);
        self.eviction.schedule(freed);
        Ok(count)
    }

    /// Deletes pending body files for one time slice.
    pub fn run_deletion_slice(&self) -> SliceReport {
        self.eviction.run_slice(&self.index, &self.bodies)
    }

    /// Runs deletion slices until nothing is pending.
    pub fn drain_deletions(&self) -> usize {
        let mut removed = 0;
        while self.eviction.pending_len() > 0 {
            removed += self.run_deletion_slice().removed;
        }
        removed
    }

    /// Body deletions still pending.
    pub fn pending_deletions(&self) -> usize {
        self.eviction.pending_len()
    }

    /// Checks entries against their body files.
    ///
    /// Entries whose body file is missing or has the wrong size are freed.
    /// Body files with no index entry are scheduled for deletion.
    pub fn validate(&self, scope: ValidationScope) -> Result<ValidationReport, CacheError> {
        let mut report = ValidationReport::default();
        let mut broken = Vec::new();

        for entry in self.index.coldest_entries() {
            if !scope.covers_slot(entry.slot) {
                continue;
            }
            report.checked += 1;
            let on_disk = self.bodies.size(&entry.id).unwrap_or(0);
            if on_disk != entry.body_size {
                debug!(
                    id = %entry.id,
                    slot = entry.slot,
                    indexed = entry.body_size,
                    on_disk,
                    "Body size mismatch"
                );
                broken.push(entry);
            }
        }

        let orphans: Vec<IndexEntry> = self
            .bodies
            .scan()?
            .into_iter()
            .filter(|(id, _)| scope.covers_id(id) && !self.index.contains(id))
            .map(|(id, size)| IndexEntry {
                id,
                slot: u32::MAX,
                declared_size: -1,
                body_size: size,
                last_access: 0,
            })
            .collect();
        report.orphans = orphans.len();
        if !self.config.read_only {
            self.eviction.schedule(orphans);
        }

        if !broken.is_empty() && !self.config.read_only {
            let freed = self.index.free_entries(&broken)?;
            report.mismatched = freed.len();
            self.eviction.schedule(freed);
        }

        if report.mismatched > 0 || report.orphans > 0 {
            warn!(
                checked = report.checked,
                mismatched = report.mismatched,
                orphans = report.orphans,
                "Cache validation found inconsistencies"
            );
        } else {
            debug!(checked = report.checked, "Cache validation passed");
        }
        Ok(report)
    }

    /// Writes deferred time stamps to disk.
    pub fn flush(&self) -> Result<usize, CacheError> {
        self.index.flush_deferred()
    }

    /// Empties the whole cache.
    pub fn clear(&self) -> Result<(), CacheError> {
        self.eviction.clear_pending();
        self.index.clear()?;
        if !self.config.read_only {
            self.fast.resize(self.config.max_entries)?;
        }
        Ok(())
    }

    /// Current statistics.
    pub fn stats(&self) -> CacheStats {
        let mut stats = self.counters.snapshot();
        stats.resets = self.index.resets();
        stats.pending_deletions = self.eviction.pending_len();
        stats.total_bytes = self.index.total_bytes();
        stats.live_entries = self.index.len();
        stats.max_entries = self.config.max_entries;
        stats.max_bytes = self.config.max_bytes;
        stats
    }
}

impl Drop for TextureCache {
    fn drop(&mut self) {
        if self.config.read_only {
            return;
        }
        if let Err(e) = self.index.flush_deferred() {
            warn!(error = %e, "Failed to flush deferred index records on close");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const KB: usize = 1024;

    fn config(dir: &TempDir) -> CacheConfig {
        CacheConfig::new(dir.path())
            .with_max_entries(16)
            .with_header_data_size(8)
            .with_validate_on_startup(false)
    }

    #[test]
    fn test_round_trip_header_resident() {
        let dir = TempDir::new().unwrap();
        let cache = TextureCache::open(config(&dir)).unwrap();
        let id = ContentId::new_v4();

        let outcome = cache.write(&id, b"tiny", 0, 4).unwrap();
        assert_eq!(outcome.body_size, 0);
        assert!(!cache.bodies.exists(&id));

        let read = cache.read(&id, 0, 64).unwrap().unwrap();
        assert_eq!(read.data, b"tiny");
        assert_eq!(read.declared_size, 4);
    }

    #[test]
    fn test_round_trip_with_body_and_window() {
        let dir = TempDir::new().unwrap();
        let cache = TextureCache::open(config(&dir)).unwrap();
        let id = ContentId::new_v4();
        let data: Vec<u8> = (0..100u8).collect();

        let outcome = cache.write(&id, &data, 0, 400).unwrap();
        assert_eq!(outcome.body_size, 92);

        let read = cache.read(&id, 0, 1000).unwrap().unwrap();
        assert_eq!(read.data, data);
        assert_eq!(read.declared_size, 400);
        assert_eq!(read.stored_size, 100);

        // Window straddling the header block and the body.
        let read = cache.read(&id, 5, 10).unwrap().unwrap();
        assert_eq!(read.data, &data[5..15]);

        let read = cache.read(&id, 90, 50).unwrap().unwrap();
        assert_eq!(read.data, &data[90..]);
    }

    #[test]
    fn test_append_write() {
        let dir = TempDir::new().unwrap();
        let cache = TextureCache::open(config(&dir)).unwrap();
        let id = ContentId::new_v4();

        cache.write(&id, b"abcde", 0, 20).unwrap();
        cache.write(&id, b"fghij", 5, 20).unwrap();
        cache.write(&id, b"klmno", 10, 20).unwrap();

        let read = cache.read(&id, 0, 64).unwrap().unwrap();
        assert_eq!(read.data, b"abcdefghijklmno");
        assert_eq!(cache.index().total_bytes(), 7);

        let err = cache.write(&id, b"x", 3, 20).unwrap_err();
        assert!(matches!(err, CacheError::InvalidOffset { stored: 15, .. }));
    }

    #[test]
    fn test_rewrite_shrinks_to_header() {
        let dir = TempDir::new().unwrap();
        let cache = TextureCache::open(config(&dir)).unwrap();
        let id = ContentId::new_v4();

        cache.write(&id, &[1u8; 50], 0, 50).unwrap();
        assert!(cache.bodies.exists(&id));
        cache.write(&id, b"ab", 0, 2).unwrap();
        assert!(!cache.bodies.exists(&id));
        assert_eq!(cache.read(&id, 0, 64).unwrap().unwrap().data, b"ab");
        assert_eq!(cache.index().total_bytes(), 0);
    }

    #[test]
    fn test_miss_and_remove() {
        let dir = TempDir::new().unwrap();
        let cache = TextureCache::open(config(&dir)).unwrap();
        let id = ContentId::new_v4();

        assert!(cache.read(&id, 0, 8).unwrap().is_none());
        cache.write(&id, &[9u8; 40], 0, 40).unwrap();
        assert!(cache.remove(&id).unwrap());
        assert!(!cache.remove(&id).unwrap());
        assert!(cache.read(&id, 0, 8).unwrap().is_none());
        assert!(!cache.bodies.exists(&id));

        let stats = cache.stats();
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.writes, 1);
    }

    #[test]
    fn test_missing_body_reads_as_miss() {
        let dir = TempDir::new().unwrap();
        let cache = TextureCache::open(config(&dir)).unwrap();
        let id = ContentId::new_v4();
        cache.write(&id, &[3u8; 40], 0, 40).unwrap();

        fs::remove_file(cache.bodies.path(&id)).unwrap();
        assert!(cache.read(&id, 0, 64).unwrap().is_none());
        assert!(!cache.index().contains(&id));
    }

    #[test]
    fn test_read_past_end_is_empty() {
        let dir = TempDir::new().unwrap();
        let cache = TextureCache::open(config(&dir)).unwrap();
        let id = ContentId::new_v4();
        cache.write(&id, &[4u8; 100], 0, 400).unwrap();

        for offset in [100, 200, u64::MAX] {
            let read = cache.read(&id, offset, 10).unwrap().unwrap();
            assert!(read.data.is_empty());
            assert_eq!(read.stored_size, 100);
            assert_eq!(read.declared_size, 400);
        }

        let small = ContentId::new_v4();
        cache.write(&small, b"tiny", 0, 4).unwrap();
        assert!(cache.read(&small, 6, 10).unwrap().unwrap().data.is_empty());
        assert!(cache.index().contains(&id));
    }

    #[test]
    fn test_failed_body_rewrite_hides_entry() {
        let dir = TempDir::new().unwrap();
        let cache = TextureCache::open(config(&dir)).unwrap();
        let id = ContentId::new_v4();
        cache.write(&id, &[1u8; 40], 0, 40).unwrap();

        // A directory where the body file belongs makes the body write fail.
        let path = cache.bodies.path(&id);
        fs::remove_file(&path).unwrap();
        fs::create_dir(&path).unwrap();

        let err = cache.write(&id, &[2u8; 60], 0, 60).unwrap_err();
        assert!(matches!(err, CacheError::BodyIo { .. }));
        assert!(cache.read(&id, 0, 128).unwrap().is_none());
        // The slot stays allocated for a retry.
        assert!(cache.index().contains(&id));
        assert_eq!(cache.index().total_bytes(), 0);

        fs::remove_dir(&path).unwrap();
        cache.write(&id, &[2u8; 60], 0, 60).unwrap();
        assert_eq!(cache.read(&id, 0, 128).unwrap().unwrap().data, vec![2u8; 60]);
        assert_eq!(cache.index().total_bytes(), 52);
    }

    #[test]
    fn test_write_fast_rejects_overflowing_dimensions() {
        let dir = TempDir::new().unwrap();
        let cache = TextureCache::open(config(&dir)).unwrap();
        let id = ContentId::new_v4();
        cache.write(&id, b"data", 0, 4).unwrap();

        let stored = cache
            .write_fast(&id, &[0u8; 4], u32::MAX, u32::MAX, 4, 0)
            .unwrap();
        assert_eq!(stored, None);
        assert!(cache.read_fast(&id).unwrap().is_none());
    }

    #[test]
    fn test_write_purges_coldest() {
        let dir = TempDir::new().unwrap();
        let config = CacheConfig::new(dir.path())
            .with_max_entries(16)
            .with_header_data_size(KB)
            .with_max_bytes(9 * KB as u64)
            .with_validate_on_startup(false);
        let cache = TextureCache::open(config).unwrap();
        let (a, b, c) = (ContentId::new_v4(), ContentId::new_v4(), ContentId::new_v4());

        for id in [&a, &b] {
            cache.write(id, &vec![1u8; 5 * KB], 0, (5 * KB) as i32).unwrap();
        }
        let outcome = cache.write(&c, &vec![2u8; 5 * KB], 0, (5 * KB) as i32).unwrap();
        assert_eq!(outcome.evicted, 1);

        assert!(cache.read(&a, 0, 1).unwrap().is_none());
        assert!(cache.read(&b, 0, 1).unwrap().is_some());
        assert!(cache.read(&c, 0, 1).unwrap().is_some());
        assert_eq!(cache.index().total_bytes(), 8 * KB as u64);
        assert_eq!(cache.pending_deletions(), 1);

        assert_eq!(cache.drain_deletions(), 1);
        assert!(!cache.bodies.exists(&a));
        assert!(!cache.run_deletion_slice().did_io());
    }

    #[test]
    fn test_entry_too_large() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir).with_max_bytes(64);
        let cache = TextureCache::open(config).unwrap();
        let id = ContentId::new_v4();

        let err = cache.write(&id, &[0u8; 100], 0, 100).unwrap_err();
        assert!(matches!(err, CacheError::EntryTooLarge { .. }));
        assert_eq!(cache.stats().write_failures, 1);
    }

    #[test]
    fn test_fast_preview() {
        let dir = TempDir::new().unwrap();
        let cache = TextureCache::open(config(&dir)).unwrap();
        let id = ContentId::new_v4();

        assert!(matches!(
            cache.write_fast(&id, &[0u8; 4], 1, 1, 4, 0),
            Err(CacheError::NotFound(_))
        ));

        cache.write(&id, b"data", 0, 4).unwrap();
        assert!(cache.read_fast(&id).unwrap().is_none());
        assert_eq!(cache.write_fast(&id, &[5u8; 12], 2, 2, 3, 0).unwrap(), Some(0));

        let thumb = cache.read_fast(&id).unwrap().unwrap();
        assert_eq!((thumb.width, thumb.height, thumb.channels), (2, 2, 3));
        assert_eq!(thumb.pixels, vec![5u8; 12]);
    }

    #[test]
    fn test_validate_frees_mismatch_and_finds_orphans() {
        let dir = TempDir::new().unwrap();
        let cache = TextureCache::open(config(&dir)).unwrap();
        let good = ContentId::new_v4();
        let bad = ContentId::new_v4();
        let orphan = ContentId::new_v4();

        cache.write(&good, &[1u8; 30], 0, 30).unwrap();
        cache.write(&bad, &[1u8; 30], 0, 30).unwrap();
        cache.bodies.write(&bad, b"short", 0).unwrap();
        cache.bodies.write(&orphan, b"stray", 0).unwrap();

        let report = cache.validate(ValidationScope::Full).unwrap();
        assert_eq!(report.checked, 2);
        assert_eq!(report.mismatched, 1);
        assert_eq!(report.orphans, 1);
        assert!(cache.index().contains(&good));
        assert!(!cache.index().contains(&bad));

        cache.drain_deletions();
        assert!(!cache.bodies.exists(&orphan));
        assert!(!cache.bodies.exists(&bad));
    }

    #[test]
    fn test_reopen_preserves_entries() {
        let dir = TempDir::new().unwrap();
        let id = ContentId::new_v4();
        {
            let cache = TextureCache::open(config(&dir)).unwrap();
            cache.write(&id, &[4u8; 20], 0, 20).unwrap();
        }
        let cache = TextureCache::open(config(&dir).with_validate_on_startup(true)).unwrap();
        assert_eq!(cache.read(&id, 0, 64).unwrap().unwrap().data, vec![4u8; 20]);
    }

    #[test]
    fn test_shrink_on_reopen_moves_side_files() {
        let dir = TempDir::new().unwrap();
        let ids: Vec<ContentId> = (0..4).map(|_| ContentId::new_v4()).collect();
        {
            let cache = TextureCache::open(config(&dir)).unwrap();
            for (i, id) in ids.iter().enumerate() {
                cache.write(id, &[i as u8; 4], 0, 4).unwrap();
            }
            cache.remove(&ids[0]).unwrap();
        }

        let cache = TextureCache::open(config(&dir).with_max_entries(3)).unwrap();
        assert_eq!(cache.index().entry_count(), 3);
        for (i, id) in ids.iter().enumerate().skip(1) {
            let read = cache.read(id, 0, 8).unwrap().unwrap();
            assert_eq!(read.data, vec![i as u8; 4]);
        }
    }

    #[test]
    fn test_clear() {
        let dir = TempDir::new().unwrap();
        let cache = TextureCache::open(config(&dir)).unwrap();
        let id = ContentId::new_v4();
        cache.write(&id, &[1u8; 30], 0, 30).unwrap();

        cache.clear().unwrap();
        assert!(cache.index().is_empty());
        assert!(!cache.bodies.exists(&id));
        assert!(cache.read(&id, 0, 8).unwrap().is_none());
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let dir = TempDir::new().unwrap();
        let id = ContentId::new_v4();
        {
            let cache = TextureCache::open(config(&dir)).unwrap();
            cache.write(&id, b"abc", 0, 3).unwrap();
        }
        let cache = TextureCache::open(config(&dir).with_read_only(true)).unwrap();
        assert_eq!(cache.read(&id, 0, 8).unwrap().unwrap().data, b"abc");
        assert!(matches!(
            cache.write(&id, b"x", 0, 1),
            Err(CacheError::ReadOnly)
        ));
        assert_eq!(cache.purge().unwrap(), 0);
    }
}
