//! Settings structs for all configuration sections.
//!
//! Each struct represents one `[section]` of the INI config file.
//! These are pure data types with no parsing or serialization logic.

use std::path::PathBuf;

/// Complete application configuration loaded from config.ini.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigFile {
    /// Cache settings
    pub cache: CacheSettings,
    /// Request queue settings
    pub queue: QueueSettings,
    /// Logging settings
    pub logging: LoggingSettings,
}

/// Disk cache configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheSettings {
    /// Cache directory (holds the index, header data, fast cache and bodies)
    pub directory: PathBuf,
    /// Maximum number of index slots
    pub max_entries: u32,
    /// Maximum total body bytes
    pub max_size: u64,
    /// Open the cache without mutating it
    pub read_only: bool,
    /// Run the rotating consistency check at startup
    pub validate_on_startup: bool,
}

/// Request queue configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueSettings {
    /// Worker threads (0 = cooperative mode)
    pub worker_threads: usize,
    /// Secondary pool size for async requests
    pub async_threads: usize,
    /// Seconds shutdown waits for in-flight requests
    pub shutdown_timeout_secs: u64,
    /// Seconds after which an in-flight request is considered stale
    pub stale_request_secs: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggingSettings {
    /// Log file path
    pub file: PathBuf,
}
