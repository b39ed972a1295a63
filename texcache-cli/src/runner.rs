//! CLI runner for common setup and operations.
//!
//! Encapsulates config loading, logging initialization, and cache/service
//! creation to reduce duplication across command handlers.

use std::path::{Path, PathBuf};

use tracing::info;
use texcache::cache::{CacheConfig, TextureCache};
use texcache::config::{config_file_path, ConfigFile, DEFAULT_LOG_FILE};
use texcache::logging::{init_logging, LoggingGuard};
use texcache::queue::QueueConfig;
use texcache::service::{CacheService, ServiceConfig, QUEUE_NAME};

use crate::error::CliError;

/// Options shared by every command.
#[derive(Debug, Clone, Default)]
pub struct GlobalOptions {
    /// Config file path; defaults to ~/.texcache/config.ini
    pub config: Option<PathBuf>,
    /// Overrides `[cache] directory`
    pub cache_dir: Option<PathBuf>,
    /// Mirror log output to stdout
    pub verbose: bool,
}

/// Runner that manages CLI lifecycle and common operations.
pub struct CliRunner {
    /// Logging guard - keeps logging active while runner exists
    _logging_guard: Option<LoggingGuard>,
    /// Loaded configuration file
    config: ConfigFile,
    /// Where the configuration was loaded from
    config_path: PathBuf,
}

impl CliRunner {
    /// Load the config and initialize file logging.
    pub fn new(options: &GlobalOptions) -> Result<Self, CliError> {
        let mut runner = Self::without_logging(options)?;

        let log_path = &runner.config.logging.file;
        let log_dir = log_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let log_file = log_path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| DEFAULT_LOG_FILE.to_string());

        let guard = init_logging(&log_dir, &log_file, options.verbose)
            .map_err(|e| CliError::LoggingInit(e.to_string()))?;
        runner._logging_guard = Some(guard);
        Ok(runner)
    }

    /// Load the config without touching the global subscriber.
    pub fn without_logging(options: &GlobalOptions) -> Result<Self, CliError> {
        let config_path = options.config.clone().unwrap_or_else(config_file_path);
        let mut config = ConfigFile::load_from(&config_path)?;
        if let Some(dir) = &options.cache_dir {
            config.cache.directory = dir.clone();
        }

        Ok(Self {
            _logging_guard: None,
            config,
            config_path,
        })
    }

    /// Get the loaded configuration.
    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    /// Path the configuration was loaded from.
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Log startup information for a command.
    pub fn log_startup(&self, command: &str) {
        info!("texcache v{}", texcache::VERSION);
        info!(
            command,
            config = %self.config_path.display(),
            cache_dir = %self.config.cache.directory.display(),
            "texcache CLI"
        );
    }

    /// Cache configuration for maintenance commands.
    ///
    /// Startup validation is left to the command so its report can be shown.
    pub fn cache_config(&self) -> CacheConfig {
        self.config.cache_config().with_validate_on_startup(false)
    }

    /// Open the cache directly.
    pub fn open_cache(&self) -> Result<TextureCache, CliError> {
        Ok(TextureCache::open(self.cache_config())?)
    }

    /// Open the cache without mutating it.
    pub fn open_cache_read_only(&self) -> Result<TextureCache, CliError> {
        Ok(TextureCache::open(self.cache_config().with_read_only(true))?)
    }

    /// Start a cooperative service; requests run on the calling thread.
    pub fn start_service(&self) -> Result<CacheService, CliError> {
        let config = ServiceConfig::new(self.cache_config())
            .with_queue(QueueConfig::cooperative(QUEUE_NAME));
        Ok(CacheService::start(config)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_cache_dir_override() {
        let temp = TempDir::new().unwrap();
        let options = GlobalOptions {
            config: Some(temp.path().join("missing.ini")),
            cache_dir: Some(temp.path().join("cache")),
            verbose: false,
        };

        let runner = CliRunner::without_logging(&options).unwrap();
        assert_eq!(runner.config().cache.directory, temp.path().join("cache"));
        assert_eq!(runner.config_path(), temp.path().join("missing.ini"));
        assert!(!runner.cache_config().validate_on_startup);
    }

    #[test]
    fn test_invalid_config_is_reported() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.ini");
        std::fs::write(&path, "[cache]\nmax_size = huge\n").unwrap();

        let options = GlobalOptions {
            config: Some(path),
            ..GlobalOptions::default()
        };
        let err = CliRunner::without_logging(&options).err().unwrap();
        assert!(matches!(err, CliError::Config(_)));
    }
}
