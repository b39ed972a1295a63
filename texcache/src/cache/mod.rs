//! Disk-backed texture cache.
//!
//! Fixed-record slot index with approximate-LRU eviction, sharded body
//! files, per-slot header blocks, and a slot-indexed thumbnail file for
//! instant low-fidelity previews.

mod body;
mod daemon;
mod eviction;
mod fast;
mod header_data;
mod id;
mod index;
mod path;
mod record;
mod stats;
mod texture_cache;
mod types;

pub use body::BodyStore;
pub use daemon::{run_maintenance_daemon, MaintenanceDaemon, TickReport, DEFAULT_MAINTENANCE_INTERVAL};
pub use eviction::{EvictionPolicy, SliceReport};
pub use fast::{downsample_to_fit, FastThumbnailCache, Thumbnail, FAST_PAYLOAD_CAP, FAST_RECORD_SIZE};
pub use header_data::HeaderData;
pub use id::ContentId;
pub use index::{
    Allocation, CacheIndex, IndexEntry, ResetHook, DEFERRED_FLUSH_THRESHOLD, LRU_SNAPSHOT_SIZE,
};
pub use record::{
    record_offset, HeaderFile, HeaderInfo, IndexRecord, LoadedHeader, ADDRESS_WIDTH,
    FORMAT_VERSION, HEADER_INFO_SIZE, RECORD_SIZE,
};
pub use stats::CacheStats;
pub use texture_cache::{
    CachedRead, TextureCache, ValidationReport, ValidationScope, WriteOutcome, VALIDATION_SLICES,
};
pub use types::{
    default_cache_dir, CacheConfig, CacheError, ErrorCode, DEFAULT_DELETION_SLICE,
    DEFAULT_HEADER_DATA_SIZE, DEFAULT_MAX_BYTES, DEFAULT_MAX_ENTRIES, DEFAULT_PURGE_TARGET_RATIO,
    DEFAULT_TIMESTAMP_THRESHOLD,
};

// Re-export path utilities for convenience
pub use path::{
    bodies_dir, body_path, fast_cache_path, header_data_path, index_path, parse_body_filename,
    shard_directory, BODIES_DIR, BODY_EXTENSION, FAST_CACHE_FILE, HEADER_DATA_FILE, INDEX_FILE,
};
