//! Cache service implementation.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::ServiceConfig;
use super::error::ServiceError;
use crate::cache::{CacheStats, ContentId, ErrorCode, MaintenanceDaemon, TextureCache, Thumbnail};
use crate::queue::{
    PriorityWorkQueue, QueueStats, RequestFlags, RequestHandle, RequestStatus,
    StaleRequestWatchdog, SweepStale,
};
use crate::worker::{CacheJob, CacheRequest, RequestResult};

/// Combined cache and queue counters.
#[derive(Debug, Clone)]
pub struct ServiceStats {
    pub cache: CacheStats,
    pub queue: QueueStats,
}

/// Owner of the cache, the request queue and their background tasks.
///
/// Startup (index load, shrink, validation, purge) finishes inside
/// [`start`](Self::start), before the first request can be submitted.
pub struct CacheService {
    config: ServiceConfig,
    cache: Arc<TextureCache>,
    queue: Arc<PriorityWorkQueue<CacheJob>>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CacheService {
    /// Opens the cache and starts the queue.
    ///
    /// When called inside a tokio runtime the maintenance daemon and the
    /// stale-request watchdog are spawned on it. Without a runtime the
    /// caller drives maintenance through [`maintain`](Self::maintain).
    pub fn start(config: ServiceConfig) -> Result<Self, ServiceError> {
        let cache = Arc::new(TextureCache::open(config.cache.clone())?);
        let queue = Arc::new(PriorityWorkQueue::new(config.queue.clone()));
        let shutdown = CancellationToken::new();

        let mut tasks = Vec::new();
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            if !cache.is_read_only() {
                let daemon = MaintenanceDaemon::new(Arc::clone(&cache))
                    .with_interval(config.maintenance_interval);
                tasks.push(runtime.spawn(daemon.run(shutdown.clone())));
            }

            let target: Arc<dyn SweepStale> = queue.clone();
            let watchdog = StaleRequestWatchdog::new(target)
                .with_ceiling(config.queue.stale_request_timeout)
                .with_interval(config.queue.watchdog_interval);
            tasks.push(runtime.spawn(watchdog.run(shutdown.clone())));
        } else {
            debug!("No tokio runtime; background maintenance disabled");
        }

        info!(
            cache_dir = %config.cache.cache_dir.display(),
            entries = cache.index().entry_count(),
            background_tasks = tasks.len(),
            "Cache service started"
        );

        Ok(Self {
            config,
            cache,
            queue,
            shutdown,
            tasks: Mutex::new(tasks),
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<TextureCache> {
        &self.cache
    }

    pub fn queue(&self) -> &Arc<PriorityWorkQueue<CacheJob>> {
        &self.queue
    }

    /// Submits a request against this service's cache.
    pub fn submit(
        &self,
        request: CacheRequest,
        priority: u32,
        flags: RequestFlags,
    ) -> Result<RequestHandle, ServiceError> {
        let job = CacheJob::new(Arc::clone(&self.cache), request);
        Ok(self.queue.submit(job, priority, flags)?)
    }

    /// Submits a read of up to `max_len` bytes starting at `offset`.
    pub fn read(
        &self,
        id: ContentId,
        offset: u64,
        max_len: usize,
        priority: u32,
    ) -> Result<RequestHandle, ServiceError> {
        self.submit(
            CacheRequest::read(id, offset, max_len),
            priority,
            RequestFlags::empty(),
        )
    }

    /// Submits a write of a complete item.
    pub fn write(
        &self,
        id: ContentId,
        data: Vec<u8>,
        declared_size: i32,
        priority: u32,
    ) -> Result<RequestHandle, ServiceError> {
        self.submit(
            CacheRequest::write(id, data, declared_size),
            priority,
            RequestFlags::empty(),
        )
    }

    pub fn poll(&self, handle: RequestHandle) -> RequestStatus {
        self.queue.poll_status(handle)
    }

    pub fn abort(&self, handle: RequestHandle, auto_reap: bool) -> bool {
        self.queue.abort(handle, auto_reap)
    }

    pub fn reprioritize(&self, handle: RequestHandle, priority: u32) -> bool {
        self.queue.reprioritize(handle, priority)
    }

    /// Takes a finished request's result without blocking and reaps it.
    ///
    /// `None` while the request is still active or if the handle is unknown.
    pub fn try_result(&self, handle: RequestHandle) -> Option<RequestResult> {
        self.queue
            .complete(handle, true)
            .map(RequestResult::from_completion)
    }

    /// Blocks until the request finishes and reaps it.
    ///
    /// An unknown or expired handle reports `Aborted`.
    pub fn wait(&self, handle: RequestHandle) -> RequestResult {
        self.queue
            .wait_for_result(handle, true)
            .map(RequestResult::from_completion)
            .unwrap_or_else(|| RequestResult::failed(ErrorCode::Aborted))
    }

    /// Reads the low-fidelity preview for an item, bypassing the queue.
    pub fn preview(&self, id: &ContentId) -> Result<Option<Thumbnail>, ServiceError> {
        Ok(self.cache.read_fast(id)?)
    }

    /// Runs one maintenance tick on the calling thread.
    pub fn maintain(&self) {
        MaintenanceDaemon::new(Arc::clone(&self.cache)).tick();
        self.queue.sweep_stale(self.config.queue.stale_request_timeout);
    }

    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            cache: self.cache.stats(),
            queue: self.queue.stats(),
        }
    }

    /// Stops background tasks and the queue, then flushes the index.
    ///
    /// Idempotent. Background tasks observe cancellation on their next
    /// poll; use [`close`](Self::close) to wait for them.
    pub fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        self.queue.shutdown();
        if !self.cache.is_read_only() {
            if let Err(e) = self.cache.flush() {
                warn!(error = %e, "Failed to flush cache index at shutdown");
            }
        }
        info!("Cache service stopped");
    }

    /// Shuts down and waits for background tasks to exit.
    pub async fn close(&self) {
        self.shutdown();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }
    }
}

impl Drop for CacheService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::queue::QueueConfig;
    use crate::worker::{FormatHint, Preview};
    use std::time::Duration;
    use tempfile::TempDir;

    fn cooperative(dir: &TempDir) -> CacheService {
        let config = ServiceConfig::new(
            CacheConfig::new(dir.path())
                .with_max_entries(64)
                .with_validate_on_startup(false),
        )
        .with_queue(QueueConfig::cooperative("test"));
        CacheService::start(config).unwrap()
    }

    #[test]
    fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let service = cooperative(&dir);
        let id = ContentId::new_v4();
        let mut data = vec![0xFF, 0xD8, 0xFF];
        data.extend(std::iter::repeat(7u8).take(3000));

        let handle = service.write(id, data.clone(), 3003, 5).unwrap();
        let written = service.wait(handle);
        assert!(written.success);
        assert_eq!(written.bytes_transferred, data.len());

        let handle = service.read(id, 0, 4096, 5).unwrap();
        let read = service.wait(handle);
        assert!(read.success);
        assert_eq!(read.data, data);
        assert_eq!(read.declared_size, 3003);
        assert_eq!(read.format_hint, FormatHint::Jpeg);
        assert_eq!(service.poll(handle), RequestStatus::Expired);
    }

    #[test]
    fn test_read_miss_reports_not_found() {
        let dir = TempDir::new().unwrap();
        let service = cooperative(&dir);

        let handle = service.read(ContentId::new_v4(), 0, 16, 1).unwrap();
        let result = service.wait(handle);
        assert!(!result.success);
        assert_eq!(result.error, Some(ErrorCode::NotFound));
    }

    #[test]
    fn test_abort_before_run() {
        let dir = TempDir::new().unwrap();
        let service = cooperative(&dir);

        let handle = service.read(ContentId::new_v4(), 0, 16, 1).unwrap();
        assert!(service.abort(handle, false));
        assert_eq!(service.poll(handle), RequestStatus::Aborted);
        let result = service.try_result(handle).unwrap();
        assert_eq!(result.error, Some(ErrorCode::Aborted));
    }

    #[test]
    fn test_wait_unknown_handle() {
        let dir = TempDir::new().unwrap();
        let service = cooperative(&dir);
        let handle = service.read(ContentId::new_v4(), 0, 1, 1).unwrap();
        service.wait(handle);

        // Already reaped
        assert_eq!(service.wait(handle).error, Some(ErrorCode::Aborted));
    }

    #[test]
    fn test_preview_through_write_request() {
        let dir = TempDir::new().unwrap();
        let service = cooperative(&dir);
        let id = ContentId::new_v4();
        let preview = Preview {
            pixels: vec![128; 16 * 16 * 3],
            width: 16,
            height: 16,
            channels: 3,
            discard_level: 2,
        };
        let request = CacheRequest::write(id, vec![1; 100], 100).with_preview(preview);
        let handle = service.submit(request, 1, RequestFlags::empty()).unwrap();
        assert!(service.wait(handle).success);

        let thumb = service.preview(&id).unwrap().unwrap();
        assert_eq!((thumb.width, thumb.height, thumb.channels), (16, 16, 3));
    }

    #[test]
    fn test_submit_after_shutdown() {
        let dir = TempDir::new().unwrap();
        let service = cooperative(&dir);
        service.shutdown();
        service.shutdown();

        let err = service.read(ContentId::new_v4(), 0, 1, 1).unwrap_err();
        assert!(matches!(err, ServiceError::Queue(_)));
    }

    #[test]
    fn test_stats() {
        let dir = TempDir::new().unwrap();
        let service = cooperative(&dir);
        let handle = service.write(ContentId::new_v4(), vec![3; 10], 10, 1).unwrap();
        service.wait(handle);
        service.maintain();

        let stats = service.stats();
        assert_eq!(stats.cache.live_entries, 1);
        assert_eq!(stats.queue.submitted, 1);
        assert_eq!(stats.queue.completed, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_background_tasks_stop_on_close() {
        let dir = TempDir::new().unwrap();
        let config = ServiceConfig::new(
            CacheConfig::new(dir.path()).with_validate_on_startup(false),
        )
        .with_queue(QueueConfig::new("bg").with_worker_threads(1))
        .with_maintenance_interval(Duration::from_millis(10));
        let service = CacheService::start(config).unwrap();
        assert_eq!(service.tasks.lock().len(), 2);

        let closed = tokio::time::timeout(Duration::from_secs(10), service.close()).await;
        assert!(closed.is_ok());
        assert!(service.tasks.lock().is_empty());
    }
}
