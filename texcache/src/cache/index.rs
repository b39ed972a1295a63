//! Content id → slot index backed by `index.header`.
//!
//! The whole record table is mirrored in memory and guarded by one
//! read/write lock. Lookups take an upgradable read lock and only escalate
//! when they must touch shared state (LRU tracking or a time stamp).
//! Allocation, commit and eviction take the write lock.
//!
//! # Deferred time stamps
//!
//! `last_access` is only refreshed once live entries exceed the configured
//! occupancy threshold. Refreshed records go to a write-ahead buffer keyed
//! by slot and reach the file on [`CacheIndex::flush_deferred`], or inline
//! once the buffer grows past [`DEFERRED_FLUSH_THRESHOLD`].
//!
//! # Corruption
//!
//! A short header read, a record whose body is larger than its declared
//! size, a duplicate id, or a record that names a different id than the
//! in-memory table all reset the entire cache. Partial recovery is never
//! attempted.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use tracing::{debug, info, warn};

use super::id::ContentId;
use super::path::index_path;
use super::record::{record_offset, HeaderFile, HeaderInfo, IndexRecord};
use super::types::{CacheConfig, CacheError};
use crate::time::now_secs;

/// Deferred records are flushed inline once this many are buffered.
pub const DEFERRED_FLUSH_THRESHOLD: usize = 128;

/// Size of the approximate-LRU candidate snapshot.
pub const LRU_SNAPSHOT_SIZE: usize = 64;

/// Callback run (under the index lock) after the cache has been reset.
pub type ResetHook = Box<dyn Fn() + Send + Sync>;

/// A committed entry as seen by eviction and maintenance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub id: ContentId,
    pub slot: u32,
    pub declared_size: i32,
    pub body_size: u64,
    pub last_access: i64,
}

impl IndexEntry {
    fn from_record(slot: u32, record: &IndexRecord) -> Self {
        Self {
            id: record.id,
            slot,
            declared_size: record.declared_size,
            body_size: record.body_size.max(0) as u64,
            last_access: record.last_access,
        }
    }
}

/// Result of [`CacheIndex::allocate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub slot: u32,
    /// The id already owned this slot.
    pub existing: bool,
    /// Entry evicted to make room; its body must be deleted by the caller.
    pub evicted: Option<IndexEntry>,
}

#[derive(Debug, Clone, Copy)]
struct LruCandidate {
    id: ContentId,
    slot: u32,
}

struct IndexState {
    /// Physical slots in the file, free ones included.
    entry_count: u32,
    /// Mirror of every record, indexed by slot.
    slots: Vec<IndexRecord>,
    by_id: HashMap<ContentId, u32>,
    free: BTreeSet<u32>,
    lru: VecDeque<LruCandidate>,
    total_bytes: u64,
    /// Write-ahead buffer of records stamped but not yet persisted.
    deferred: BTreeMap<u32, IndexRecord>,
}

impl IndexState {
    fn empty() -> Self {
        Self {
            entry_count: 0,
            slots: Vec::new(),
            by_id: HashMap::new(),
            free: BTreeSet::new(),
            lru: VecDeque::new(),
            total_bytes: 0,
            deferred: BTreeMap::new(),
        }
    }

    /// Builds state from loaded records, or explains why they are unusable.
    ///
    /// Uncommitted placeholders left by an interrupted write are returned
    /// as slots to clear.
    fn from_records(records: Vec<IndexRecord>) -> Result<(Self, Vec<u32>), String> {
        let mut state = Self::empty();
        let mut stale = Vec::new();
        state.entry_count = records.len() as u32;

        for (slot, record) in records.iter().enumerate() {
            let slot = slot as u32;
            if record.is_free() {
                state.free.insert(slot);
                continue;
            }
            if !record.is_consistent() {
                return Err(format!(
                    "record {} has body size {} larger than declared size {}",
                    slot, record.body_size, record.declared_size
                ));
            }
            if !record.is_committed() {
                stale.push(slot);
                state.free.insert(slot);
                continue;
            }
            if state.by_id.insert(record.id, slot).is_some() {
                return Err(format!("duplicate id {} at record {}", record.id, slot));
            }
            state.total_bytes += record.body_size as u64;
        }

        state.slots = records;
        for slot in &stale {
            state.slots[*slot as usize] = IndexRecord::EMPTY;
        }
        Ok((state, stale))
    }

    fn live(&self) -> usize {
        self.by_id.len()
    }

    /// Committed entries sorted coldest first; ties go to the lower slot.
    fn coldest(&self) -> Vec<IndexEntry> {
        let mut entries: Vec<IndexEntry> = self
            .by_id
            .values()
            .filter_map(|&slot| {
                let record = &self.slots[slot as usize];
                record
                    .is_committed()
                    .then(|| IndexEntry::from_record(slot, record))
            })
            .collect();
        entries.sort_by_key(|e| (e.last_access, e.slot));
        entries
    }

    fn refresh_lru(&mut self) {
        self.lru = self
            .coldest()
            .into_iter()
            .take(LRU_SNAPSHOT_SIZE)
            .map(|e| LruCandidate {
                id: e.id,
                slot: e.slot,
            })
            .collect();
    }
}

/// Fixed-record cache index.
pub struct CacheIndex {
    header: HeaderFile,
    max_entries: u32,
    read_only: bool,
    timestamp_threshold: f64,
    state: RwLock<IndexState>,
    on_reset: Option<ResetHook>,
    resets: AtomicU64,
}

impl CacheIndex {
    /// Loads the index, resetting the cache if the header is unusable.
    pub fn open(config: &CacheConfig, on_reset: Option<ResetHook>) -> Result<Self, CacheError> {
        config.validate()?;
        let header = HeaderFile::new(index_path(&config.cache_dir));

        let index = Self {
            header,
            max_entries: config.max_entries,
            read_only: config.read_only,
            timestamp_threshold: config.timestamp_threshold,
            state: RwLock::new(IndexState::empty()),
            on_reset,
            resets: AtomicU64::new(0),
        };

        let loaded = match index.header.load() {
            Ok(loaded) => loaded,
            Err(CacheError::HeaderCorrupted(reason)) => {
                index.reset_locked(&mut index.state.write(), &reason);
                return Ok(index);
            }
            Err(e) => return Err(e),
        };

        let Some(loaded) = loaded else {
            if !index.read_only {
                index.header.reset()?;
            }
            debug!(path = %index.header.path().display(), "Created empty cache index");
            return Ok(index);
        };

        match IndexState::from_records(loaded.records) {
            Ok((state, stale)) => {
                if !index.read_only && !stale.is_empty() {
                    let cleared: BTreeMap<u32, IndexRecord> = stale
                        .iter()
                        .map(|&slot| (slot, IndexRecord::EMPTY))
                        .collect();
                    index.header.write_records(&cleared)?;
                    debug!(count = stale.len(), "Cleared uncommitted index records");
                }
                info!(
                    entries = state.live(),
                    slots = state.entry_count,
                    bytes = state.total_bytes,
                    "Cache index loaded"
                );
                *index.state.write() = state;
            }
            Err(reason) => index.reset_locked(&mut index.state.write(), &reason),
        }
        Ok(index)
    }

    /// Finds a committed entry.
    ///
    /// Drops the id from the LRU candidate snapshot and, when the cache is
    /// over the occupancy threshold, stamps `last_access` in the deferred
    /// buffer. Detected corruption resets the cache and reads as a miss.
    pub fn lookup(&self, id: &ContentId) -> Result<Option<(u32, IndexRecord)>, CacheError> {
        let state = self.state.upgradable_read();
        let Some(&slot) = state.by_id.get(id) else {
            return Ok(None);
        };

        let mut record = match self.read_checked(&state, slot) {
            Ok(record) => record,
            Err(CacheError::HeaderCorrupted(reason)) => {
                self.reset_locked(&mut RwLockUpgradableReadGuard::upgrade(state), &reason);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        if record.id != *id || !record.is_consistent() {
            let reason = format!("record {} does not match id {}", slot, id);
            self.reset_locked(&mut RwLockUpgradableReadGuard::upgrade(state), &reason);
            return Ok(None);
        }
        if !record.is_committed() {
            return Ok(None);
        }

        let stamp = !self.read_only && self.over_timestamp_threshold(&state);
        let tracked = state.lru.iter().any(|c| c.slot == slot);
        if !stamp && !tracked {
            return Ok(Some((slot, record)));
        }

        let mut state = RwLockUpgradableReadGuard::upgrade(state);
        state.lru.retain(|c| c.slot != slot);
        if stamp {
            record.last_access = now_secs();
            state.slots[slot as usize] = record;
            state.deferred.insert(slot, record);
            if state.deferred.len() >= DEFERRED_FLUSH_THRESHOLD {
                self.flush_locked(&mut state)?;
            }
        }
        Ok(Some((slot, record)))
    }

    /// Returns true if the id has a slot, committed or not.
    pub fn contains(&self, id: &ContentId) -> bool {
        self.state.read().by_id.contains_key(id)
    }

    /// Finds or allocates a slot for `id`.
    ///
    /// Tries, in order: appending a slot while below `max_entries`, reusing
    /// the lowest free slot, evicting the coldest LRU candidate. Fails with
    /// [`CacheError::AllocationExhausted`] if none applies.
    pub fn allocate(&self, id: &ContentId) -> Result<Allocation, CacheError> {
        if self.read_only {
            return Err(CacheError::ReadOnly);
        }
        let mut state = self.state.write();
        self.ensure_intact(&mut state)?;

        if let Some(&slot) = state.by_id.get(id) {
            // Hide the entry until the rewrite commits.
            let current = state.slots[slot as usize];
            let placeholder = IndexRecord::placeholder(*id, now_secs());
            self.header.write_record(slot, &placeholder)?;
            state.total_bytes = state
                .total_bytes
                .saturating_sub(current.body_size.max(0) as u64);
            state.slots[slot as usize] = placeholder;
            state.lru.retain(|c| c.slot != slot);
            state.deferred.remove(&slot);
            return Ok(Allocation {
                slot,
                existing: true,
                evicted: None,
            });
        }

        let append = state.entry_count < self.max_entries;
        let mut evicted = None;
        let slot = if append {
            state.entry_count
        } else if let Some(&slot) = state.free.first() {
            slot
        } else if let Some(victim) = self.take_lru_victim(&mut state, id) {
            let freed = self.free_locked(&mut state, victim)?;
            debug!(evicted = %freed.id, slot = freed.slot, "Evicted coldest entry for allocation");
            evicted = Some(freed);
            freed.slot
        } else {
            return Err(CacheError::AllocationExhausted {
                max_entries: self.max_entries,
            });
        };

        let placeholder = IndexRecord::placeholder(*id, now_secs());
        self.header.write_record(slot, &placeholder)?;
        if append {
            self.header
                .write_info(&HeaderInfo::current(state.entry_count + 1))?;
            state.entry_count += 1;
            state.slots.push(placeholder);
        } else {
            state.free.remove(&slot);
            state.slots[slot as usize] = placeholder;
        }
        state.by_id.insert(*id, slot);
        state.deferred.remove(&slot);

        Ok(Allocation {
            slot,
            existing: false,
            evicted,
        })
    }

    /// Writes the final record for an allocated slot.
    ///
    /// `declared_size` is raised to `body_size` if smaller. `last_access`
    /// is refreshed only above the occupancy threshold.
    pub fn commit(
        &self,
        slot: u32,
        id: &ContentId,
        declared_size: i32,
        body_size: u64,
    ) -> Result<IndexRecord, CacheError> {
        if self.read_only {
            return Err(CacheError::ReadOnly);
        }
        let body_size = i32::try_from(body_size).map_err(|_| CacheError::EntryTooLarge {
            id: *id,
            size: body_size,
            limit: i32::MAX as u64,
        })?;

        let mut state = self.state.write();
        let current = match state.slots.get(slot as usize) {
            Some(record) if record.id == *id => *record,
            _ => return Err(CacheError::NotFound(*id)),
        };

        let last_access = if self.over_timestamp_threshold(&state) {
            now_secs()
        } else {
            current.last_access
        };
        let record = IndexRecord {
            id: *id,
            declared_size: declared_size.max(body_size),
            body_size,
            last_access,
        };
        self.header.write_record(slot, &record)?;

        state.total_bytes =
            state.total_bytes.saturating_sub(current.body_size.max(0) as u64) + body_size as u64;
        state.slots[slot as usize] = record;
        state.deferred.remove(&slot);
        Ok(record)
    }

    /// Frees an id's slot. Returns the freed entry so the caller can delete
    /// its body.
    pub fn free(&self, id: &ContentId) -> Result<Option<IndexEntry>, CacheError> {
        if self.read_only {
            return Err(CacheError::ReadOnly);
        }
        let mut state = self.state.write();
        match state.by_id.get(id) {
            Some(&slot) => self.free_locked(&mut state, slot).map(Some),
            None => Ok(None),
        }
    }

    /// Frees `slot` only if it still holds exactly `expected`.
    ///
    /// Returns `None` when the entry was rewritten or freed since
    /// `expected` was read.
    pub fn free_if_current(
        &self,
        slot: u32,
        expected: &IndexRecord,
    ) -> Result<Option<IndexEntry>, CacheError> {
        if self.read_only {
            return Err(CacheError::ReadOnly);
        }
        let mut state = self.state.write();
        let unchanged = state.by_id.get(&expected.id) == Some(&slot)
            && state.slots.get(slot as usize) == Some(expected)
            && expected.is_committed();
        if !unchanged {
            return Ok(None);
        }
        self.free_locked(&mut state, slot).map(Some)
    }

    /// Frees each entry whose slot still holds the same id.
    ///
    /// Entries re-cached into another slot since the snapshot are skipped.
    pub fn free_entries(&self, entries: &[IndexEntry]) -> Result<Vec<IndexEntry>, CacheError> {
        if self.read_only {
            return Err(CacheError::ReadOnly);
        }
        let mut state = self.state.write();
        let mut freed = Vec::with_capacity(entries.len());
        for entry in entries {
            if state.by_id.get(&entry.id) == Some(&entry.slot) {
                freed.push(self.free_locked(&mut state, entry.slot)?);
            }
        }
        Ok(freed)
    }

    /// Runs `f` under the read lock if `id` has no slot.
    ///
    /// Writers cannot re-cache the id while `f` runs, which makes
    /// check-then-delete of a body file safe.
    pub fn if_absent<R>(&self, id: &ContentId, f: impl FnOnce() -> R) -> Option<R> {
        let state = self.state.read();
        if state.by_id.contains_key(id) {
            return None;
        }
        Some(f())
    }

    /// Committed entries sorted coldest first.
    pub fn coldest_entries(&self) -> Vec<IndexEntry> {
        self.state.read().coldest()
    }

    /// Writes buffered time stamps to the header file.
    pub fn flush_deferred(&self) -> Result<usize, CacheError> {
        let mut state = self.state.write();
        self.flush_locked(&mut state)
    }

    /// Shrinks the table to `max_entries`.
    ///
    /// Purges the coldest entries beyond the limit, moves live records from
    /// slots past the limit into free slots below it (calling `relocate`
    /// for each move so slot-addressed side files follow), and rewrites a
    /// compacted header. Returns the purged entries.
    pub fn shrink_to_fit(
        &self,
        relocate: &mut dyn FnMut(u32, u32) -> Result<(), CacheError>,
    ) -> Result<Vec<IndexEntry>, CacheError> {
        let mut state = self.state.write();
        let max = self.max_entries;
        if self.read_only || state.entry_count <= max {
            return Ok(Vec::new());
        }

        let mut purged = Vec::new();
        let live = state.live();
        if live > max as usize {
            let excess = live - max as usize;
            for entry in state.coldest().into_iter().take(excess) {
                purged.push(self.free_locked(&mut state, entry.slot)?);
            }
        }

        let high: Vec<u32> = (max..state.entry_count)
            .filter(|&slot| !state.slots[slot as usize].is_free())
            .collect();
        for from in high {
            let Some(to) = state.free.iter().copied().find(|&slot| slot < max) else {
                break;
            };
            relocate(from, to)?;
            let record = state.slots[from as usize];
            state.slots[to as usize] = record;
            state.slots[from as usize] = IndexRecord::EMPTY;
            state.by_id.insert(record.id, to);
            state.free.remove(&to);
            state.free.insert(from);
        }

        state.slots.truncate(max as usize);
        state.entry_count = max;
        state.free.retain(|&slot| slot < max);
        state.lru.clear();
        state.deferred.clear();
        self.header.rewrite(&state.slots)?;

        info!(
            max_entries = max,
            purged = purged.len(),
            live = state.live(),
            "Cache index compacted"
        );
        Ok(purged)
    }

    /// Resets the cache because its header can no longer be trusted.
    pub fn invalidate(&self, reason: &str) {
        let mut state = self.state.write();
        self.reset_locked(&mut state, reason);
    }

    /// Empties the index and every slot-addressed file.
    pub fn clear(&self) -> Result<(), CacheError> {
        if self.read_only {
            return Err(CacheError::ReadOnly);
        }
        let mut state = self.state.write();
        self.header.reset()?;
        *state = IndexState::empty();
        if let Some(hook) = &self.on_reset {
            hook();
        }
        info!("Cache cleared");
        Ok(())
    }

    /// Live (allocated) entries.
    pub fn len(&self) -> usize {
        self.state.read().live()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Physical slots in the header file.
    pub fn entry_count(&self) -> u32 {
        self.state.read().entry_count
    }

    pub fn max_entries(&self) -> u32 {
        self.max_entries
    }

    /// Sum of body sizes over live entries.
    pub fn total_bytes(&self) -> u64 {
        self.state.read().total_bytes
    }

    pub fn free_slots(&self) -> usize {
        self.state.read().free.len()
    }

    /// Records waiting in the write-ahead buffer.
    pub fn deferred_len(&self) -> usize {
        self.state.read().deferred.len()
    }

    /// Number of whole-cache resets since open.
    pub fn resets(&self) -> u64 {
        self.resets.load(Ordering::Relaxed)
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn over_timestamp_threshold(&self, state: &IndexState) -> bool {
        state.live() as f64 > self.timestamp_threshold * f64::from(self.max_entries)
    }

    /// Reads a record, preferring the deferred buffer, after checking the
    /// file still covers every slot.
    fn read_checked(&self, state: &IndexState, slot: u32) -> Result<IndexRecord, CacheError> {
        let expected = record_offset(state.entry_count);
        let len = self.header.file_len()?;
        if len < expected {
            return Err(CacheError::HeaderCorrupted(format!(
                "header is {} bytes, expected at least {}",
                len, expected
            )));
        }
        match state.deferred.get(&slot) {
            Some(record) => Ok(*record),
            None => self.header.read_record(slot),
        }
    }

    fn ensure_intact(&self, state: &mut IndexState) -> Result<(), CacheError> {
        let expected = record_offset(state.entry_count);
        let len = self.header.file_len()?;
        if len < expected {
            let reason = format!("header is {} bytes, expected at least {}", len, expected);
            self.reset_locked(state, &reason);
        }
        Ok(())
    }

    fn take_lru_victim(&self, state: &mut IndexState, exclude: &ContentId) -> Option<u32> {
        for refreshed in [false, true] {
            if refreshed || state.lru.is_empty() {
                state.refresh_lru();
            }
            while let Some(candidate) = state.lru.pop_front() {
                let record = &state.slots[candidate.slot as usize];
                if record.id == candidate.id && record.is_committed() && candidate.id != *exclude {
                    return Some(candidate.slot);
                }
            }
        }
        None
    }

    fn free_locked(&self, state: &mut IndexState, slot: u32) -> Result<IndexEntry, CacheError> {
        let record = state.slots[slot as usize];
        self.header.write_record(slot, &IndexRecord::EMPTY)?;

        state.by_id.remove(&record.id);
        state.slots[slot as usize] = IndexRecord::EMPTY;
        state.free.insert(slot);
        state.lru.retain(|c| c.slot != slot);
        state.deferred.remove(&slot);
        let entry = IndexEntry::from_record(slot, &record);
        state.total_bytes = state.total_bytes.saturating_sub(entry.body_size);
        Ok(entry)
    }

    fn flush_locked(&self, state: &mut IndexState) -> Result<usize, CacheError> {
        if state.deferred.is_empty() || self.read_only {
            return Ok(0);
        }
        self.header.write_records(&state.deferred)?;
        let count = state.deferred.len();
        state.deferred.clear();
        debug!(count, "Flushed deferred index records");
        Ok(count)
    }

    fn reset_locked(&self, state: &mut IndexState, reason: &str) {
        warn!(
            reason,
            entries = state.live(),
            bytes = state.total_bytes,
            "Cache header corrupted; resetting cache"
        );
        *state = IndexState::empty();
        self.resets.fetch_add(1, Ordering::Relaxed);
        if self.read_only {
            return;
        }
        if let Err(e) = self.header.reset() {
            warn!(error = %e, "Failed to rewrite empty cache header");
        }
        if let Some(hook) = &self.on_reset {
            hook();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn config(dir: &TempDir, max_entries: u32) -> CacheConfig {
        CacheConfig::new(dir.path()).with_max_entries(max_entries)
    }

    fn insert(index: &CacheIndex, body: u64) -> (ContentId, u32) {
        let id = ContentId::new_v4();
        let alloc = index.allocate(&id).unwrap();
        index.commit(alloc.slot, &id, body as i32, body).unwrap();
        (id, alloc.slot)
    }

    #[test]
    fn test_allocate_commit_lookup() {
        let dir = TempDir::new().unwrap();
        let index = CacheIndex::open(&config(&dir, 8), None).unwrap();
        let id = ContentId::new_v4();

        let alloc = index.allocate(&id).unwrap();
        assert_eq!(alloc.slot, 0);
        assert!(!alloc.existing);
        // Uncommitted entries are never surfaced.
        assert_eq!(index.lookup(&id).unwrap(), None);

        index.commit(alloc.slot, &id, 500, 300).unwrap();
        let (slot, record) = index.lookup(&id).unwrap().unwrap();
        assert_eq!(slot, 0);
        assert_eq!(record.declared_size, 500);
        assert_eq!(record.body_size, 300);
        assert_eq!(index.total_bytes(), 300);

        assert!(index.allocate(&id).unwrap().existing);
    }

    #[test]
    fn test_reallocate_hides_entry_until_commit() {
        let dir = TempDir::new().unwrap();
        let index = CacheIndex::open(&config(&dir, 8), None).unwrap();
        let (id, slot) = insert(&index, 100);

        let alloc = index.allocate(&id).unwrap();
        assert!(alloc.existing);
        assert_eq!(alloc.slot, slot);
        assert_eq!(index.lookup(&id).unwrap(), None);
        assert!(index.contains(&id));
        assert_eq!(index.total_bytes(), 0);

        index.commit(slot, &id, 60, 60).unwrap();
        assert_eq!(index.lookup(&id).unwrap().unwrap().1.body_size, 60);
        assert_eq!(index.total_bytes(), 60);
    }

    #[test]
    fn test_free_if_current_skips_rewritten_entry() {
        let dir = TempDir::new().unwrap();
        let index = CacheIndex::open(&config(&dir, 8), None).unwrap();
        let (id, slot) = insert(&index, 100);
        let (_, seen) = index.lookup(&id).unwrap().unwrap();

        // A rewrite starts after the record was read.
        index.allocate(&id).unwrap();
        assert_eq!(index.free_if_current(slot, &seen).unwrap(), None);
        assert!(index.contains(&id));

        index.commit(slot, &id, 50, 50).unwrap();
        let (_, fresh) = index.lookup(&id).unwrap().unwrap();
        let freed = index.free_if_current(slot, &fresh).unwrap().unwrap();
        assert_eq!(freed.id, id);
        assert!(!index.contains(&id));
        assert_eq!(index.total_bytes(), 0);
    }

    #[test]
    fn test_reopen_restores_entries() {
        let dir = TempDir::new().unwrap();
        let (id, slot) = {
            let index = CacheIndex::open(&config(&dir, 8), None).unwrap();
            insert(&index, 42)
        };
        let index = CacheIndex::open(&config(&dir, 8), None).unwrap();
        assert_eq!(index.lookup(&id).unwrap().unwrap().0, slot);
        assert_eq!(index.total_bytes(), 42);
    }

    #[test]
    fn test_free_list_reused_lowest_first() {
        let dir = TempDir::new().unwrap();
        let index = CacheIndex::open(&config(&dir, 3), None).unwrap();
        let (a, _) = insert(&index, 1);
        let (_b, _) = insert(&index, 1);
        let (c, _) = insert(&index, 1);

        index.free(&c).unwrap();
        index.free(&a).unwrap();
        assert_eq!(index.free_slots(), 2);

        let next = index.allocate(&ContentId::new_v4()).unwrap();
        assert_eq!(next.slot, 0);
        assert!(next.evicted.is_none());
    }

    #[test]
    fn test_full_table_evicts_coldest() {
        let dir = TempDir::new().unwrap();
        let index = CacheIndex::open(&config(&dir, 2), None).unwrap();
        let (a, _) = insert(&index, 10);
        let (b, _) = insert(&index, 20);

        let c = ContentId::new_v4();
        let alloc = index.allocate(&c).unwrap();
        let evicted = alloc.evicted.unwrap();
        assert_eq!(evicted.id, a);
        assert_eq!(alloc.slot, evicted.slot);
        assert!(!index.contains(&a));
        assert!(index.contains(&b));
        assert_eq!(index.total_bytes(), 20);
    }

    #[test]
    fn test_lookup_removes_lru_candidate() {
        let dir = TempDir::new().unwrap();
        let index = CacheIndex::open(&config(&dir, 3).with_timestamp_threshold(1.0), None)
            .unwrap();
        let (a, _) = insert(&index, 10);
        let (b, _) = insert(&index, 10);
        let (c, _) = insert(&index, 10);

        // Builds the snapshot [a, b, c] and takes a.
        let first = index.allocate(&ContentId::new_v4()).unwrap();
        assert_eq!(first.evicted.map(|e| e.id), Some(a));

        // b is colder than c but an active lookup drops it from the snapshot.
        assert!(index.lookup(&b).unwrap().is_some());
        let second = index.allocate(&ContentId::new_v4()).unwrap();
        assert_eq!(second.evicted.map(|e| e.id), Some(c));
        assert!(index.contains(&b));
    }

    #[test]
    fn test_exhausted_when_only_uncommitted_entries() {
        let dir = TempDir::new().unwrap();
        let index = CacheIndex::open(&config(&dir, 1), None).unwrap();
        index.allocate(&ContentId::new_v4()).unwrap();
        assert!(matches!(
            index.allocate(&ContentId::new_v4()),
            Err(CacheError::AllocationExhausted { max_entries: 1 })
        ));
    }

    #[test]
    fn test_timestamps_deferred_above_threshold() {
        let dir = TempDir::new().unwrap();
        let index = CacheIndex::open(&config(&dir, 4), None).unwrap();
        let (a, _) = insert(&index, 1);
        let _ = insert(&index, 1);
        let _ = insert(&index, 1);

        // 3 of 4 is not above 75%.
        index.lookup(&a).unwrap();
        assert_eq!(index.deferred_len(), 0);

        let _ = insert(&index, 1);
        index.lookup(&a).unwrap();
        assert_eq!(index.deferred_len(), 1);

        assert_eq!(index.flush_deferred().unwrap(), 1);
        assert_eq!(index.deferred_len(), 0);
        assert_eq!(index.flush_deferred().unwrap(), 0);
    }

    #[test]
    fn test_truncated_header_resets_on_lookup() {
        let dir = TempDir::new().unwrap();
        let resets = Arc::new(AtomicUsize::new(0));
        let hook_count = Arc::clone(&resets);
        let index = CacheIndex::open(
            &config(&dir, 8),
            Some(Box::new(move || {
                hook_count.fetch_add(1, Ordering::SeqCst);
            })),
        )
        .unwrap();
        let (a, _) = insert(&index, 5);
        let _ = insert(&index, 5);

        let path = index_path(dir.path());
        let len = std::fs::metadata(&path).unwrap().len();
        OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_len(len - 16)
            .unwrap();

        assert_eq!(index.lookup(&a).unwrap(), None);
        assert_eq!(index.entry_count(), 0);
        assert_eq!(index.len(), 0);
        assert_eq!(index.resets(), 1);
        assert_eq!(resets.load(Ordering::SeqCst), 1);

        let reloaded = HeaderFile::new(path).load().unwrap().unwrap();
        assert_eq!(reloaded.info.entry_count, 0);
    }

    #[test]
    fn test_truncated_header_resets_on_allocate() {
        let dir = TempDir::new().unwrap();
        let index = CacheIndex::open(&config(&dir, 8), None).unwrap();
        let _ = insert(&index, 5);
        let path = index_path(dir.path());
        OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_len(20)
            .unwrap();

        let alloc = index.allocate(&ContentId::new_v4()).unwrap();
        assert_eq!(alloc.slot, 0);
        assert_eq!(index.len(), 1);
        assert_eq!(index.resets(), 1);
    }

    #[test]
    fn test_inconsistent_record_resets_on_open() {
        let dir = TempDir::new().unwrap();
        let header = HeaderFile::new(index_path(dir.path()));
        let bad = IndexRecord {
            id: ContentId::new_v4(),
            declared_size: 10,
            body_size: 11,
            last_access: 0,
        };
        header.rewrite(&[bad]).unwrap();

        let index = CacheIndex::open(&config(&dir, 8), None).unwrap();
        assert_eq!(index.len(), 0);
        assert_eq!(index.entry_count(), 0);
        assert_eq!(index.resets(), 1);
    }

    #[test]
    fn test_duplicate_id_resets_on_open() {
        let dir = TempDir::new().unwrap();
        let header = HeaderFile::new(index_path(dir.path()));
        let id = ContentId::new_v4();
        let record = IndexRecord {
            id,
            declared_size: 1,
            body_size: 1,
            last_access: 0,
        };
        header.rewrite(&[record, record]).unwrap();

        let index = CacheIndex::open(&config(&dir, 8), None).unwrap();
        assert!(!index.contains(&id));
        assert_eq!(index.resets(), 1);
    }

    #[test]
    fn test_uncommitted_records_freed_on_open() {
        let dir = TempDir::new().unwrap();
        let header = HeaderFile::new(index_path(dir.path()));
        let placeholder = IndexRecord::placeholder(ContentId::new_v4(), 0);
        header.rewrite(&[placeholder]).unwrap();

        let index = CacheIndex::open(&config(&dir, 8), None).unwrap();
        assert_eq!(index.len(), 0);
        assert_eq!(index.free_slots(), 1);
        assert_eq!(header.read_record(0).unwrap(), IndexRecord::EMPTY);
    }

    #[test]
    fn test_shrink_purges_coldest_and_compacts() {
        let dir = TempDir::new().unwrap();
        let ids: Vec<ContentId> = {
            let index = CacheIndex::open(&config(&dir, 6), None).unwrap();
            (0..6).map(|i| insert(&index, i + 1).0).collect()
        };
        // Make slot 4 the coldest by rewriting its time stamp.
        let header = HeaderFile::new(index_path(dir.path()));
        let mut cold = header.read_record(4).unwrap();
        cold.last_access = 1;
        header.write_record(4, &cold).unwrap();
        let mut free_slot = header.read_record(1).unwrap();
        free_slot.last_access = 2;
        header.write_record(1, &free_slot).unwrap();

        let index = CacheIndex::open(&config(&dir, 4), None).unwrap();
        let mut moves = Vec::new();
        let purged = index
            .shrink_to_fit(&mut |from, to| {
                moves.push((from, to));
                Ok(())
            })
            .unwrap();

        let purged_ids: Vec<ContentId> = purged.iter().map(|e| e.id).collect();
        assert_eq!(purged_ids, vec![ids[4], ids[1]]);
        assert_eq!(moves, vec![(5, 1)]);
        assert_eq!(index.entry_count(), 4);
        assert_eq!(index.len(), 4);
        assert_eq!(index.lookup(&ids[5]).unwrap().unwrap().0, 1);

        let reloaded = header.load().unwrap().unwrap();
        assert_eq!(reloaded.info.entry_count, 4);
    }

    #[test]
    fn test_read_only_rejects_mutation() {
        let dir = TempDir::new().unwrap();
        let (id, _) = {
            let index = CacheIndex::open(&config(&dir, 8), None).unwrap();
            insert(&index, 3)
        };
        let index = CacheIndex::open(&config(&dir, 8).with_read_only(true), None).unwrap();
        assert!(index.lookup(&id).unwrap().is_some());
        assert!(matches!(
            index.allocate(&ContentId::new_v4()),
            Err(CacheError::ReadOnly)
        ));
        assert!(matches!(index.free(&id), Err(CacheError::ReadOnly)));
    }

    #[test]
    fn test_coldest_entries_ordering() {
        let dir = TempDir::new().unwrap();
        let index = CacheIndex::open(&config(&dir, 8), None).unwrap();
        let (a, _) = insert(&index, 1);
        let (b, _) = insert(&index, 1);
        let (c, _) = insert(&index, 1);
        let order: Vec<ContentId> = index.coldest_entries().iter().map(|e| e.id).collect();
        // Same-second stamps fall back to slot order.
        assert_eq!(order, vec![a, b, c]);
    }
}
