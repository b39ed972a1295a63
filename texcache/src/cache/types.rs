//! Core types for the cache system.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use super::id::ContentId;

/// Default maximum number of index slots.
pub const DEFAULT_MAX_ENTRIES: u32 = 65_536;

/// Default body byte ceiling (2 GB).
pub const DEFAULT_MAX_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// Default bytes of each item kept in `header.data`.
pub const DEFAULT_HEADER_DATA_SIZE: usize = 1024;

/// Default occupancy above which lookups start time-stamping entries.
pub const DEFAULT_TIMESTAMP_THRESHOLD: f64 = 0.75;

/// Default fraction of the byte ceiling a purge shrinks the cache to.
pub const DEFAULT_PURGE_TARGET_RATIO: f64 = 0.80;

/// Default wall-clock budget of one deletion pass.
pub const DEFAULT_DELETION_SLICE: Duration = Duration::from_millis(5);

/// Cache-related errors.
#[derive(Debug, Error)]
pub enum CacheError {
    /// I/O error on the index or auxiliary files
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No slot could be appended, reused or evicted
    #[error("No cache slot available (max_entries={max_entries})")]
    AllocationExhausted { max_entries: u32 },

    /// The header file failed validation; the cache has been reset
    #[error("Cache header corrupted: {0}")]
    HeaderCorrupted(String),

    /// Reading or writing a body file failed
    #[error("Body I/O error for {id}: {source}")]
    BodyIo {
        id: ContentId,
        #[source]
        source: std::io::Error,
    },

    /// Mutation attempted on a read-only cache
    #[error("Cache is read-only")]
    ReadOnly,

    /// A single item is larger than the whole byte budget
    #[error("Entry {id} of {size} bytes exceeds cache limit of {limit} bytes")]
    EntryTooLarge { id: ContentId, size: u64, limit: u64 },

    /// The id is not cached
    #[error("Entry {0} not found")]
    NotFound(ContentId),

    /// A partial write did not start at zero or at the end of stored data
    #[error("Write to {id} at offset {offset} does not continue stored length {stored}")]
    InvalidOffset { id: ContentId, offset: u64, stored: u64 },

    /// Invalid cache configuration
    #[error("Invalid cache configuration: {0}")]
    InvalidConfig(String),
}

impl CacheError {
    /// Diagnostic code reported to request callers.
    pub fn code(&self) -> ErrorCode {
        match self {
            CacheError::Io(_) | CacheError::BodyIo { .. } => ErrorCode::BodyIo,
            CacheError::AllocationExhausted { .. } | CacheError::EntryTooLarge { .. } => {
                ErrorCode::AllocationExhausted
            }
            CacheError::HeaderCorrupted(_) => ErrorCode::HeaderCorrupted,
            CacheError::ReadOnly => ErrorCode::ReadOnly,
            CacheError::NotFound(_)
            | CacheError::InvalidOffset { .. }
            | CacheError::InvalidConfig(_) => ErrorCode::NotFound,
        }
    }
}

/// Optional diagnostic attached to a failed request result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotFound,
    AllocationExhausted,
    BodyIo,
    HeaderCorrupted,
    ReadOnly,
    StaleRequestTimeout,
    Aborted,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::NotFound => "not-found",
            ErrorCode::AllocationExhausted => "allocation-exhausted",
            ErrorCode::BodyIo => "body-io",
            ErrorCode::HeaderCorrupted => "header-corrupted",
            ErrorCode::ReadOnly => "read-only",
            ErrorCode::StaleRequestTimeout => "stale-request-timeout",
            ErrorCode::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Disk cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Cache directory root
    pub cache_dir: PathBuf,
    /// Maximum number of index slots
    pub max_entries: u32,
    /// Maximum total body bytes
    pub max_bytes: u64,
    /// Disables all mutation (second process sharing the directory)
    pub read_only: bool,
    /// Spot-check a rotating 1/32 slice of entries at startup
    pub validate_on_startup: bool,
    /// Bytes of each item stored in `header.data`
    pub header_data_size: usize,
    /// Occupancy ratio above which lookups refresh `last_access`
    pub timestamp_threshold: f64,
    /// Fraction of `max_bytes` a purge shrinks to
    pub purge_target_ratio: f64,
    /// Budget of one time-sliced deletion pass
    pub deletion_slice: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            max_entries: DEFAULT_MAX_ENTRIES,
            max_bytes: DEFAULT_MAX_BYTES,
            read_only: false,
            validate_on_startup: true,
            header_data_size: DEFAULT_HEADER_DATA_SIZE,
            timestamp_threshold: DEFAULT_TIMESTAMP_THRESHOLD,
            purge_target_ratio: DEFAULT_PURGE_TARGET_RATIO,
            deletion_slice: DEFAULT_DELETION_SLICE,
        }
    }
}

/// `<platform cache dir>/texcache`, or `./texcache` when unknown.
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("texcache")
}

impl CacheConfig {
    /// Create a configuration rooted at `cache_dir`.
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            ..Self::default()
        }
    }

    /// Set the slot limit.
    pub fn with_max_entries(mut self, max_entries: u32) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Set the body byte ceiling.
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Enable or disable read-only mode.
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Enable or disable the startup validation slice.
    pub fn with_validate_on_startup(mut self, validate: bool) -> Self {
        self.validate_on_startup = validate;
        self
    }

    /// Set the per-slot header data size.
    pub fn with_header_data_size(mut self, size: usize) -> Self {
        self.header_data_size = size;
        self
    }

    /// Set the time-stamping occupancy threshold.
    pub fn with_timestamp_threshold(mut self, ratio: f64) -> Self {
        self.timestamp_threshold = ratio;
        self
    }

    /// Set the purge target ratio.
    pub fn with_purge_target_ratio(mut self, ratio: f64) -> Self {
        self.purge_target_ratio = ratio;
        self
    }

    /// Set the deletion pass budget.
    pub fn with_deletion_slice(mut self, slice: Duration) -> Self {
        self.deletion_slice = slice;
        self
    }

    /// Byte total a purge shrinks to.
    pub fn purge_target_bytes(&self) -> u64 {
        (self.max_bytes as f64 * self.purge_target_ratio) as u64
    }

    /// Check the configuration for values the cache cannot work with.
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.max_entries == 0 {
            return Err(CacheError::InvalidConfig(
                "max_entries must be greater than zero".to_string(),
            ));
        }
        if self.max_bytes == 0 {
            return Err(CacheError::InvalidConfig(
                "max_bytes must be greater than zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.timestamp_threshold) {
            return Err(CacheError::InvalidConfig(format!(
                "timestamp_threshold {} is outside 0.0..=1.0",
                self.timestamp_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.purge_target_ratio) {
            return Err(CacheError::InvalidConfig(format!(
                "purge_target_ratio {} is outside 0.0..=1.0",
                self.purge_target_ratio
            )));
        }
        if self.header_data_size > i32::MAX as usize {
            return Err(CacheError::InvalidConfig(
                "header_data_size is too large".to_string(),
            ));
        }
        Ok(())
    }
}
