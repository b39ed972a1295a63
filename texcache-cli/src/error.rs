//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and appropriate exit codes.

use std::fmt;
use std::path::PathBuf;
use std::process;
use texcache::cache::{CacheError, ContentId, ErrorCode};
use texcache::config::ConfigFileError;
use texcache::service::ServiceError;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Configuration error
    Config(ConfigFileError),
    /// Failed to open or operate on the cache
    Cache(CacheError),
    /// Failed to start the service or submit a request
    Service(ServiceError),
    /// A queued request finished unsuccessfully
    Request { id: ContentId, code: ErrorCode },
    /// Failed to read or write a local file
    File { path: PathBuf, error: std::io::Error },
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        match self {
            CliError::Cache(CacheError::ReadOnly) => {
                eprintln!();
                eprintln!("The cache is configured read-only. Set 'read_only = false'");
                eprintln!("in the [cache] section of the config file to modify it.");
            }
            CliError::Request {
                code: ErrorCode::NotFound,
                ..
            } => process::exit(2),
            _ => {}
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Config(e) => write!(f, "Configuration error: {}", e),
            CliError::Cache(e) => write!(f, "Cache error: {}", e),
            CliError::Service(e) => write!(f, "Service error: {}", e),
            CliError::Request { id, code } => write!(f, "Request for {} failed: {}", id, code),
            CliError::File { path, error } => {
                write!(f, "Failed to access '{}': {}", path.display(), error)
            }
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Config(e) => Some(e),
            CliError::Cache(e) => Some(e),
            CliError::Service(e) => Some(e),
            CliError::File { error, .. } => Some(error),
            _ => None,
        }
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::Config(e)
    }
}

impl From<CacheError> for CliError {
    fn from(e: CacheError) -> Self {
        CliError::Cache(e)
    }
}

impl From<ServiceError> for CliError {
    fn from(e: ServiceError) -> Self {
        CliError::Service(e)
    }
}
