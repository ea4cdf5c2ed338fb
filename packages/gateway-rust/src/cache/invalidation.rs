//! Cache invalidation after successful mutations, and periodic expiry sweeps.
//!
//! Invalidations are queued to a [`BackgroundWorker`](crate::service::worker::BackgroundWorker)
//! running an [`InvalidationRunnable`]. They never block or fail the request
//! that triggered them and are not affected by its cancellation.

use anyhow::Context as _;
use async_trait::async_trait;

use super::DeviceCache;
use crate::service::worker::{BackgroundRunnable, WorkerError, WorkerHandle};

/// Work item for the invalidation worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidationTask {
    /// Name of the command that succeeded, for logs and metrics.
    pub operation: &'static str,
    /// Device whose entry must go; `None` for creations.
    pub device_id: Option<String>,
}

// ---------------------------------------------------------------------------
// CacheInvalidator
// ---------------------------------------------------------------------------

/// Cloneable handle used by command handlers to request invalidation.
#[derive(Debug, Clone)]
pub struct CacheInvalidator {
    worker: WorkerHandle<InvalidationTask>,
}

impl CacheInvalidator {
    #[must_use]
    pub fn new(worker: WorkerHandle<InvalidationTask>) -> Self {
        Self { worker }
    }

    /// Queues invalidation of `device_id` (if any) and of every list page.
    ///
    /// Never blocks. A full or stopped queue drops the request with a warning;
    /// the affected entries then age out through their TTL.
    pub fn dispatch(&self, operation: &'static str, device_id: Option<&str>) {
        let task = InvalidationTask {
            operation,
            device_id: device_id.map(str::to_string),
        };
        match self.worker.try_submit(task) {
            Ok(()) => {
                metrics::counter!("gateway_cache_invalidations_total", "outcome" => "queued")
                    .increment(1);
            }
            Err(err) => {
                let outcome = match err {
                    WorkerError::Full => "dropped_full",
                    WorkerError::Closed | WorkerError::NotRunning => "dropped_stopped",
                };
                metrics::counter!("gateway_cache_invalidations_total", "outcome" => outcome)
                    .increment(1);
                tracing::warn!(
                    operation,
                    device_id,
                    error = %err,
                    "cache invalidation not queued"
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// InvalidationRunnable
// ---------------------------------------------------------------------------

/// Worker body: applies invalidations and purges expired entries on tick.
pub struct InvalidationRunnable {
    cache: DeviceCache,
}

impl InvalidationRunnable {
    #[must_use]
    pub fn new(cache: DeviceCache) -> Self {
        Self { cache }
    }

    async fn apply(&self, task: &InvalidationTask) -> anyhow::Result<u64> {
        if let Some(id) = &task.device_id {
            self.cache
                .invalidate_device(id)
                .await
                .with_context(|| format!("invalidating device {id}"))?;
        }
        self.cache
            .invalidate_lists()
            .await
            .context("invalidating device lists")
    }
}

#[async_trait]
impl BackgroundRunnable for InvalidationRunnable {
    type Task = InvalidationTask;

    async fn run(&mut self, task: InvalidationTask) {
        match self.apply(&task).await {
            Ok(lists) => {
                metrics::counter!("gateway_cache_invalidations_total", "outcome" => "applied")
                    .increment(1);
                tracing::debug!(
                    operation = task.operation,
                    device_id = task.device_id.as_deref(),
                    lists,
                    "cache invalidated"
                );
            }
            Err(err) => {
                let chain = format!("{err:#}");
                metrics::counter!("gateway_cache_invalidations_total", "outcome" => "failed")
                    .increment(1);
                tracing::warn!(
                    operation = task.operation,
                    device_id = task.device_id.as_deref(),
                    error = %chain,
                    "cache invalidation failed"
                );
            }
        }
    }

    async fn on_tick(&mut self) {
        match self.cache.purge_expired().await {
            Ok(0) => {}
            Ok(purged) => tracing::debug!(purged, "purged expired cache entries"),
            Err(err) => tracing::warn!(error = %err, "expired cache entry purge failed"),
        }
    }

    async fn shutdown(&mut self) {
        tracing::debug!("cache invalidation worker stopped");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
