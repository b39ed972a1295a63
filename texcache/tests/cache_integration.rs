//! Integration tests for the disk texture cache and the service around it.
//!
//! These tests verify:
//! - LRU eviction under a byte ceiling
//! - Recovery from a truncated index file
//! - Persistence across reopen
//! - The byte ceiling holding across arbitrary write sequences
//! - Concurrent request traffic through a threaded service

use std::fs::OpenOptions;
use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use tempfile::TempDir;
use texcache::cache::{
    index_path, CacheConfig, ContentId, ErrorCode, TextureCache, ValidationScope,
};
use texcache::queue::{QueueConfig, RequestFlags};
use texcache::service::{CacheService, ServiceConfig};
use texcache::worker::CacheRequest;

const KB: usize = 1024;

fn config(dir: &TempDir) -> CacheConfig {
    CacheConfig::new(dir.path())
        .with_max_entries(64)
        .with_header_data_size(0)
        .with_validate_on_startup(false)
}

// =============================================================================
// Eviction
// =============================================================================

#[test]
fn test_third_item_evicts_coldest_under_byte_ceiling() {
    let dir = TempDir::new().unwrap();
    let cache = TextureCache::open(config(&dir).with_max_bytes(9 * KB as u64)).unwrap();
    let (a, b, c) = (
        ContentId::new_v4(),
        ContentId::new_v4(),
        ContentId::new_v4(),
    );

    cache.write(&a, &vec![0xA; 4 * KB], 0, (4 * KB) as i32).unwrap();
    cache.write(&b, &vec![0xB; 4 * KB], 0, (4 * KB) as i32).unwrap();
    let outcome = cache
        .write(&c, &vec![0xC; 4 * KB], 0, (4 * KB) as i32)
        .unwrap();

    assert_eq!(outcome.evicted, 1);
    assert!(!cache.contains(&a).unwrap());
    // A's slot went back on the free list.
    assert_eq!(cache.index().free_slots(), 1);
    assert!(cache.contains(&b).unwrap());
    assert!(cache.contains(&c).unwrap());
    assert_eq!(cache.index().total_bytes(), 8 * KB as u64);
    assert!(cache.index().total_bytes() <= cache.config().max_bytes);

    cache.drain_deletions();
    let stats = cache.stats();
    assert_eq!(stats.evictions, 1);
    assert_eq!(stats.pending_deletions, 0);
}

#[test]
fn test_reopen_with_smaller_ceiling_purges_to_target() {
    let dir = TempDir::new().unwrap();
    {
        let cache = TextureCache::open(config(&dir)).unwrap();
        for _ in 0..10 {
            cache
                .write(&ContentId::new_v4(), &vec![1; 2 * KB], 0, (2 * KB) as i32)
                .unwrap();
        }
        assert_eq!(cache.index().total_bytes(), 20 * KB as u64);
    }

    let cache = TextureCache::open(config(&dir).with_max_bytes(10 * KB as u64)).unwrap();
    // Purge target is 80% of the ceiling.
    assert!(cache.index().total_bytes() <= 8 * KB as u64);
    assert_eq!(cache.index().len(), 4);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_total_bytes_stay_under_ceiling(
        writes in prop::collection::vec((0usize..12, 0usize..6 * KB), 1..30)
    ) {
        let dir = TempDir::new().unwrap();
        let max_bytes = 16 * KB as u64;
        let cache = TextureCache::open(config(&dir).with_max_bytes(max_bytes)).unwrap();
        let ids: Vec<ContentId> = (0..12).map(|_| ContentId::new_v4()).collect();

        for (which, len) in writes {
            cache.write(&ids[which], &vec![3; len], 0, len as i32).unwrap();
            let total = cache.index().total_bytes();
            prop_assert!(total as f64 <= max_bytes as f64 * 1.05);
            prop_assert!(cache.contains(&ids[which]).unwrap());
        }
    }
}

// =============================================================================
// Corruption and persistence
// =============================================================================

#[test]
fn test_truncated_index_reopens_empty() {
    let dir = TempDir::new().unwrap();
    let ids: Vec<ContentId> = (0..3).map(|_| ContentId::new_v4()).collect();
    {
        let cache = TextureCache::open(config(&dir)).unwrap();
        for id in &ids {
            cache.write(id, &vec![7; KB], 0, KB as i32).unwrap();
        }
    }

    let path = index_path(dir.path());
    let len = std::fs::metadata(&path).unwrap().len();
    OpenOptions::new()
        .write(true)
        .open(&path)
        .unwrap()
        .set_len(len - 10)
        .unwrap();

    let cache = TextureCache::open(config(&dir)).unwrap();
    assert_eq!(cache.index().entry_count(), 0);
    assert_eq!(cache.stats().resets, 1);
    for id in &ids {
        assert!(cache.read(id, 0, KB).unwrap().is_none());
    }

    // The reset cache is fully usable.
    cache.write(&ids[0], b"fresh", 0, 5).unwrap();
    assert_eq!(cache.read(&ids[0], 0, 16).unwrap().unwrap().data, b"fresh");
}

#[test]
fn test_entries_survive_reopen_and_validate_clean() {
    let dir = TempDir::new().unwrap();
    let id = ContentId::new_v4();
    let payload: Vec<u8> = (0..3000u32).map(|i| (i % 199) as u8).collect();
    {
        let cache = TextureCache::open(config(&dir).with_header_data_size(512)).unwrap();
        cache.write(&id, &payload, 0, 6000).unwrap();
    }

    let cache = TextureCache::open(config(&dir).with_header_data_size(512)).unwrap();
    let read = cache.read(&id, 0, 10_000).unwrap().unwrap();
    assert_eq!(read.data, payload);
    assert_eq!(read.declared_size, 6000);

    let report = cache.validate(ValidationScope::Full).unwrap();
    assert_eq!(report.checked, 1);
    assert_eq!(report.mismatched, 0);
    assert_eq!(report.orphans, 0);
}

// =============================================================================
// Service
// =============================================================================

#[test]
fn test_threaded_service_round_trips_many_items() {
    let dir = TempDir::new().unwrap();
    let service_config = ServiceConfig::new(config(&dir))
        .with_queue(QueueConfig::new("it").with_worker_threads(3));
    let service = Arc::new(CacheService::start(service_config).unwrap());

    let items: Vec<(ContentId, Vec<u8>)> = (0..24u8)
        .map(|i| (ContentId::new_v4(), vec![i; 512 + i as usize * 37]))
        .collect();

    let writes: Vec<_> = items
        .iter()
        .map(|(id, data)| {
            service
                .write(*id, data.clone(), data.len() as i32, 10)
                .unwrap()
        })
        .collect();
    for handle in writes {
        assert!(service.wait(handle).success);
    }

    let readers: Vec<_> = items
        .chunks(8)
        .map(|chunk| {
            let service = Arc::clone(&service);
            let chunk = chunk.to_vec();
            std::thread::spawn(move || {
                for (id, data) in chunk {
                    let handle = service.read(id, 0, 1 << 20, 5).unwrap();
                    let result = service.wait(handle);
                    assert!(result.success);
                    assert_eq!(result.data, data);
                }
            })
        })
        .collect();
    for reader in readers {
        reader.join().unwrap();
    }

    let stats = service.stats();
    assert_eq!(stats.cache.live_entries, 24);
    assert_eq!(stats.cache.hits, 24);
    assert_eq!(stats.queue.completed, 48);
    service.shutdown();
}

#[test]
fn test_read_beyond_stored_bytes_succeeds_empty() {
    let dir = TempDir::new().unwrap();
    let service_config = ServiceConfig::new(config(&dir))
        .with_queue(QueueConfig::new("tail").with_worker_threads(1));
    let service = CacheService::start(service_config).unwrap();
    let id = ContentId::new_v4();

    // Only a prefix of the declared 4 KB is stored.
    let handle = service.write(id, vec![8; 100], 4096, 1).unwrap();
    assert!(service.wait(handle).success);

    let handle = service.read(id, 200, 10, 1).unwrap();
    let result = service.wait(handle);
    assert!(result.success);
    assert!(result.data.is_empty());
    assert_eq!(result.bytes_transferred, 0);
    assert_eq!(result.declared_size, 4096);
    service.shutdown();
}

#[test]
fn test_stale_request_reports_timeout() {
    let dir = TempDir::new().unwrap();
    let queue = QueueConfig::new("stale")
        .with_worker_threads(1)
        .with_stale_request_timeout(Duration::from_millis(1));
    let service = CacheService::start(ServiceConfig::new(config(&dir)).with_queue(queue)).unwrap();

    // A large chunked write keeps the request in flight across runs.
    let id = ContentId::new_v4();
    let request = CacheRequest::write(id, vec![5; 8 * 1024 * 1024], 8 * 1024 * 1024);
    let handle = service.submit(request, 1, RequestFlags::empty()).unwrap();

    let mut forced = 0;
    for _ in 0..200 {
        forced += service.queue().sweep_stale(Duration::from_millis(1));
        if forced > 0 || service.poll(handle).is_terminal() {
            break;
        }
        std::thread::sleep(Duration::from_millis(1));
    }

    let result = service.wait(handle);
    if forced > 0 {
        assert!(!result.success);
        assert_eq!(result.error, Some(ErrorCode::StaleRequestTimeout));
    } else {
        assert!(result.success);
    }
}
