//! INI serialization logic for converting `ConfigFile` → INI string.
//!
//! This module contains the `to_config_string()` function that produces
//! the commented INI representation written to `config.ini`.

use std::path::Path;

use super::settings::ConfigFile;
use super::size::format_size;

/// Convert a `ConfigFile` to a commented INI string for saving.
pub(super) fn to_config_string(config: &ConfigFile) -> String {
    format!(
        r#"[cache]
; Cache directory (index, header data, thumbnails and body files)
directory = {}
; Maximum number of cached items (index slots)
max_entries = {}
; Maximum total size of body files (e.g., 2GB, 512MB)
; Purges shrink the cache to 80% of this value
max_size = {}
; Open without mutating anything (for a second process sharing the directory)
read_only = {}
; Spot-check a rotating 1/32 slice of entries at startup
validate_on_startup = {}

[queue]
; Worker threads (0 = cooperative mode, requests run on the caller's thread)
worker_threads = {}
; Secondary pool for requests that hand themselves off
async_threads = {}
; Seconds shutdown waits for in-flight requests before aborting them
shutdown_timeout_secs = {}
; Seconds after which an in-flight request is force-aborted as stale
stale_request_secs = {}

[logging]
; Log file path (cleared at the start of each session)
file = {}
"#,
        path_to_string(&config.cache.directory),
        config.cache.max_entries,
        format_size(config.cache.max_size),
        config.cache.read_only,
        config.cache.validate_on_startup,
        config.queue.worker_threads,
        config.queue.async_threads,
        config.queue.shutdown_timeout_secs,
        config.queue.stale_request_secs,
        path_to_string(&config.logging.file),
    )
}

/// Convert path to string, using ~ for home directory.
fn path_to_string(path: &Path) -> String {
    if let Some(home) = dirs::home_dir() {
        if let Ok(stripped) = path.strip_prefix(&home) {
            return format!("~/{}", stripped.display());
        }
    }
    path.display().to_string()
}
