//! Service configuration types.

use std::time::Duration;

use crate::cache::{CacheConfig, DEFAULT_MAINTENANCE_INTERVAL};
use crate::config::ConfigFile;
use crate::queue::QueueConfig;

/// Name given to the service's request queue.
pub const QUEUE_NAME: &str = "texcache";

/// Everything needed to start a [`CacheService`](super::CacheService).
///
/// # Example
///
/// ```
/// use texcache::cache::CacheConfig;
/// use texcache::queue::QueueConfig;
/// use texcache::service::ServiceConfig;
///
/// let config = ServiceConfig::new(CacheConfig::new("/tmp/texcache"))
///     .with_queue(QueueConfig::cooperative("texcache"));
/// assert!(config.queue.is_cooperative());
/// ```
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Disk cache configuration
    pub cache: CacheConfig,
    /// Request queue configuration
    pub queue: QueueConfig,
    /// Interval between background maintenance ticks
    pub maintenance_interval: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl ServiceConfig {
    pub fn new(cache: CacheConfig) -> Self {
        Self {
            cache,
            queue: QueueConfig::new(QUEUE_NAME),
            maintenance_interval: DEFAULT_MAINTENANCE_INTERVAL,
        }
    }

    /// Replace the queue configuration.
    pub fn with_queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    /// Set the maintenance tick interval.
    pub fn with_maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval = interval;
        self
    }
}

impl From<&ConfigFile> for ServiceConfig {
    fn from(file: &ConfigFile) -> Self {
        Self::new(file.cache_config()).with_queue(file.queue_config(QUEUE_NAME))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_file() {
        let mut file = ConfigFile::default();
        file.cache.max_entries = 77;
        file.queue.worker_threads = 0;

        let config = ServiceConfig::from(&file);
        assert_eq!(config.cache.max_entries, 77);
        assert!(config.queue.is_cooperative());
        assert_eq!(config.queue.name, QUEUE_NAME);
        assert_eq!(config.maintenance_interval, DEFAULT_MAINTENANCE_INTERVAL);
    }
}
