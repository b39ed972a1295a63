//! Explicit service context.
//!
//! [`CacheService`] owns the texture cache, the request queue and their
//! background tasks. Callers hold it (or an `Arc` of it) instead of reaching
//! for process-wide singletons, and its lifetime bounds every component.
//!
//! # Example
//!
//! ```
//! use texcache::cache::{CacheConfig, ContentId};
//! use texcache::queue::QueueConfig;
//! use texcache::service::{CacheService, ServiceConfig};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let config = ServiceConfig::new(CacheConfig::new(dir.path()))
//!     .with_queue(QueueConfig::cooperative("doc"));
//! let service = CacheService::start(config).unwrap();
//!
//! let id = ContentId::new_v4();
//! let handle = service.write(id, b"texture".to_vec(), 7, 10).unwrap();
//! assert!(service.wait(handle).success);
//!
//! let handle = service.read(id, 0, 64, 10).unwrap();
//! assert_eq!(service.wait(handle).data, b"texture");
//! service.shutdown();
//! ```

mod config;
mod error;
mod facade;

pub use config::{ServiceConfig, QUEUE_NAME};
pub use error::ServiceError;
pub use facade::{CacheService, ServiceStats};
