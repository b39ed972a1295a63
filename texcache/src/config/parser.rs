//! INI parsing logic for converting `Ini` → `ConfigFile`.
//!
//! This module contains the `parse_ini()` function and its helpers.
//! It is the single place where INI key names are mapped to struct fields.

use ini::Ini;
use std::path::PathBuf;
use std::str::FromStr;

use super::file::ConfigFileError;
use super::settings::ConfigFile;
use super::size::parse_size;

/// Parse an `Ini` object into a `ConfigFile`.
///
/// Starts from `ConfigFile::default()` and overlays any values found in the INI.
/// Unknown sections and keys are ignored.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    // [cache] section
    if let Some(section) = ini.section(Some("cache")) {
        if let Some(v) = section.get("directory") {
            let v = v.trim();
            if !v.is_empty() {
                config.cache.directory = expand_tilde(v);
            }
        }
        if let Some(v) = section.get("max_entries") {
            let entries: u32 = parse_number("cache", "max_entries", v)?;
            if entries == 0 {
                return Err(invalid("cache", "max_entries", v, "must be greater than zero"));
            }
            config.cache.max_entries = entries;
        }
        if let Some(v) = section.get("max_size") {
            let size = parse_size(v).map_err(|_| {
                invalid(
                    "cache",
                    "max_size",
                    v,
                    "expected format like '2GB', '500MB', or '1024KB'",
                )
            })?;
            if size == 0 {
                return Err(invalid("cache", "max_size", v, "must be greater than zero"));
            }
            config.cache.max_size = size;
        }
        if let Some(v) = section.get("read_only") {
            config.cache.read_only = parse_bool(v);
        }
        if let Some(v) = section.get("validate_on_startup") {
            config.cache.validate_on_startup = parse_bool(v);
        }
    }

    // [queue] section
    if let Some(section) = ini.section(Some("queue")) {
        if let Some(v) = section.get("worker_threads") {
            config.queue.worker_threads = parse_number("queue", "worker_threads", v)?;
        }
        if let Some(v) = section.get("async_threads") {
            config.queue.async_threads = parse_number("queue", "async_threads", v)?;
        }
        if let Some(v) = section.get("shutdown_timeout_secs") {
            config.queue.shutdown_timeout_secs =
                parse_number("queue", "shutdown_timeout_secs", v)?;
        }
        if let Some(v) = section.get("stale_request_secs") {
            let secs: u64 = parse_number("queue", "stale_request_secs", v)?;
            if secs == 0 {
                return Err(invalid(
                    "queue",
                    "stale_request_secs",
                    v,
                    "must be a positive integer (seconds)",
                ));
            }
            config.queue.stale_request_secs = secs;
        }
    }

    // [logging] section
    if let Some(section) = ini.section(Some("logging")) {
        if let Some(v) = section.get("file") {
            let v = v.trim();
            if !v.is_empty() {
                config.logging.file = expand_tilde(v);
            }
        }
    }

    Ok(config)
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_number<T: FromStr>(section: &str, key: &str, value: &str) -> Result<T, ConfigFileError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(section, key, value, "must be a non-negative integer"))
}

/// Parse a boolean value from a config string.
/// Accepts: true/false, yes/no, 1/0, on/off (case-insensitive)
pub(super) fn parse_bool(value: &str) -> bool {
    let v = value.trim().to_lowercase();
    v == "true" || v == "1" || v == "yes" || v == "on"
}

/// Expand ~ to home directory in paths.
pub(super) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}
