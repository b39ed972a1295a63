//! texcache - prioritised work queue and disk-backed texture cache.
//!
//! The crate has two halves that meet in [`worker`]:
//!
//! - [`queue`]: a generic priority work queue with generation-checked
//!   handles, cooperative cancellation, demoted retries, a secondary pool
//!   for long-running requests and a stale-request watchdog.
//! - [`cache`]: a fixed-record slot index with approximate-LRU eviction,
//!   per-slot header blocks, sharded body files and a thumbnail cache.
//!
//! [`service::CacheService`] owns both and their background tasks.
//!
//! # Example
//!
//! ```ignore
//! use texcache::config::ConfigFile;
//! use texcache::service::{CacheService, ServiceConfig};
//!
//! let file = ConfigFile::load()?;
//! let service = CacheService::start(ServiceConfig::from(&file))?;
//!
//! let handle = service.read(id, 0, 64 * 1024, 100)?;
//! let result = service.wait(handle);
//! ```

pub mod cache;
pub mod config;
pub mod logging;
pub mod queue;
pub mod service;
pub mod time;
pub mod worker;

/// Version of the texcache library and CLI.
///
/// This is synchronized across all components in the workspace.
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
