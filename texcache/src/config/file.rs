//! Configuration file handling for ~/.texcache/config.ini.
//!
//! Loads and saves user configuration with sensible defaults.
//! Settings structs live in [`super::settings`], constants in [`super::defaults`],
//! parsing in [`super::parser`], and serialization in [`super::writer`].

use ini::Ini;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use super::defaults::CONFIG_FILE_NAME;
use super::settings::ConfigFile;
use crate::cache::CacheConfig;
use crate::queue::QueueConfig;

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] ini::Error),

    /// Failed to write config file
    #[error("Failed to write config file: {0}")]
    WriteError(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },

    /// Failed to create config directory
    #[error("Failed to create config directory: {0}")]
    DirectoryError(std::io::Error),
}

impl ConfigFile {
    /// Load configuration from the default path (~/.texcache/config.ini).
    ///
    /// Returns defaults when the file doesn't exist.
    pub fn load() -> Result<Self, ConfigFileError> {
        let path = config_file_path();
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    ///
    /// If the file doesn't exist, returns defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigFileError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let ini = Ini::load_from_file(path)?;
        super::parser::parse_ini(&ini)
    }

    /// Save configuration to the default path (~/.texcache/config.ini).
    pub fn save(&self) -> Result<(), ConfigFileError> {
        let path = config_file_path();
        self.save_to(&path)
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigFileError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigFileError::DirectoryError)?;
        }

        std::fs::write(path, self.to_ini_string())
            .map_err(|e| ConfigFileError::WriteError(e.to_string()))
    }

    /// Commented INI text as written by [`save_to`](Self::save_to).
    pub fn to_ini_string(&self) -> String {
        super::writer::to_config_string(self)
    }

    /// Create a default config file at `path` if none exists.
    ///
    /// Returns `true` when a file was written.
    pub fn ensure_exists_at(path: &Path) -> Result<bool, ConfigFileError> {
        if path.exists() {
            return Ok(false);
        }
        Self::default().save_to(path)?;
        Ok(true)
    }

    /// Library cache configuration for the `[cache]` section.
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::new(&self.cache.directory)
            .with_max_entries(self.cache.max_entries)
            .with_max_bytes(self.cache.max_size)
            .with_read_only(self.cache.read_only)
            .with_validate_on_startup(self.cache.validate_on_startup)
    }

    /// Library queue configuration for the `[queue]` section.
    pub fn queue_config(&self, name: &str) -> QueueConfig {
        QueueConfig::new(name)
            .with_worker_threads(self.queue.worker_threads)
            .with_async_threads(self.queue.async_threads)
            .with_shutdown_timeout(Duration::from_secs(self.queue.shutdown_timeout_secs))
            .with_stale_request_timeout(Duration::from_secs(self.queue.stale_request_secs))
    }
}

/// Get the path to the config directory (~/.texcache).
pub fn config_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".texcache")
}

/// Get the path to the config file (~/.texcache/config.ini).
pub fn config_file_path() -> PathBuf {
    config_directory().join(CONFIG_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{DEFAULT_MAX_BYTES, DEFAULT_MAX_ENTRIES};
    use crate::queue::DEFAULT_WORKER_THREADS;

    #[test]
    fn test_default_config() {
        let config = ConfigFile::default();

        assert_eq!(config.cache.max_entries, DEFAULT_MAX_ENTRIES);
        assert_eq!(config.cache.max_size, DEFAULT_MAX_BYTES);
        assert!(!config.cache.read_only);
        assert!(config.cache.validate_on_startup);
        assert_eq!(config.queue.worker_threads, DEFAULT_WORKER_THREADS);
        assert!(config.logging.file.ends_with("texcache.log"));
    }

    #[test]
    fn test_load_nonexistent_returns_defaults() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nonexistent.ini");

        let config = ConfigFile::load_from(&config_path).unwrap();
        assert_eq!(config, ConfigFile::default());
    }

    #[test]
    fn test_ensure_exists_at_writes_once() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.ini");

        assert!(ConfigFile::ensure_exists_at(&config_path).unwrap());
        assert!(config_path.exists());
        assert!(!ConfigFile::ensure_exists_at(&config_path).unwrap());
    }

    #[test]
    fn test_library_configs() {
        let mut config = ConfigFile::default();
        config.cache.directory = PathBuf::from("/tmp/tc");
        config.cache.max_entries = 10;
        config.cache.max_size = 9 * 1024;
        config.cache.read_only = true;
        config.queue.worker_threads = 0;
        config.queue.stale_request_secs = 30;

        let cache = config.cache_config();
        assert_eq!(cache.cache_dir, PathBuf::from("/tmp/tc"));
        assert_eq!(cache.max_entries, 10);
        assert_eq!(cache.max_bytes, 9 * 1024);
        assert!(cache.read_only);

        let queue = config.queue_config("test");
        assert_eq!(queue.name, "test");
        assert!(queue.is_cooperative());
        assert_eq!(queue.stale_request_timeout, Duration::from_secs(30));
    }
}
