//! Default values and constants for all configuration settings.
//!
//! Contains the `DEFAULT_*` constants and the `ConfigFile::default()`
//! implementation. Cache and queue defaults come from the library so the
//! config file and the builders never disagree.

use super::settings::*;
use crate::cache::{default_cache_dir, DEFAULT_MAX_BYTES, DEFAULT_MAX_ENTRIES};
use crate::queue::{
    DEFAULT_ASYNC_THREADS, DEFAULT_SHUTDOWN_TIMEOUT, DEFAULT_STALE_REQUEST_TIMEOUT,
    DEFAULT_WORKER_THREADS,
};

/// Default log file name inside the config directory.
pub const DEFAULT_LOG_FILE: &str = "texcache.log";

/// Config file name inside the config directory.
pub const CONFIG_FILE_NAME: &str = "config.ini";

impl Default for ConfigFile {
    fn default() -> Self {
        let config_dir = super::file::config_directory();

        Self {
            cache: CacheSettings {
                directory: default_cache_dir(),
                max_entries: DEFAULT_MAX_ENTRIES,
                max_size: DEFAULT_MAX_BYTES,
                read_only: false,
                validate_on_startup: true,
            },
            queue: QueueSettings {
                worker_threads: DEFAULT_WORKER_THREADS,
                async_threads: DEFAULT_ASYNC_THREADS,
                shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT.as_secs(),
                stale_request_secs: DEFAULT_STALE_REQUEST_TIMEOUT.as_secs(),
            },
            logging: LoggingSettings {
                file: config_dir.join(DEFAULT_LOG_FILE),
            },
        }
    }
}
