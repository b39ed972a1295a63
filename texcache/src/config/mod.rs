//! INI-backed application configuration.
//!
//! `config.ini` carries three sections:
//!
//! - `[cache]`: directory, slot and byte limits, read-only and validation flags
//! - `[queue]`: worker pool sizes and request timeouts
//! - `[logging]`: log file location
//!
//! # Example
//!
//! ```
//! use texcache::config::ConfigFile;
//!
//! let config = ConfigFile::default();
//! let cache_config = config.cache_config();
//! assert_eq!(cache_config.max_entries, config.cache.max_entries);
//! ```

mod defaults;
mod file;
mod parser;
mod settings;
mod size;
mod writer;

pub use defaults::{CONFIG_FILE_NAME, DEFAULT_LOG_FILE};
pub use file::{config_directory, config_file_path, ConfigFileError};
pub use settings::{CacheSettings, ConfigFile, LoggingSettings, QueueSettings};
pub use size::{format_size, parse_size, Size, SizeParseError};
