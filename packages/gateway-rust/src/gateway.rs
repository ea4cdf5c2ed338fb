//! Assembly of the device pipelines from configuration.
//!
//! [`Gateway::start`] builds, once at startup, everything a request needs:
//! the circuit breaker, the inventory client, the optional device cache with
//! its invalidation worker, and one fully decorated handler per operation.

use std::sync::Arc;

use inventory_core::{
    CheckHealth, CreateDevice, DeleteDevice, GetDevice, ListDevices, Operation, PatchDevice,
    RequestContext, UpdateDevice,
};

use crate::breaker::CircuitBreaker;
use crate::cache::{CacheInvalidator, CacheStore, DeviceCache, InvalidationRunnable, QueryCache};
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::rpc::{DeviceTransport, InventoryClient};
use crate::service::domain::DeviceHandlers;
use crate::service::handler::{Handler, SharedHandler};
use crate::service::middleware::{build_cached_pipeline, build_handler_pipeline};
use crate::service::worker::BackgroundWorker;

/// One fully decorated handler per device operation.
#[derive(Clone)]
pub struct DevicePipelines {
    pub create: SharedHandler<CreateDevice>,
    pub get: SharedHandler<GetDevice>,
    pub list: SharedHandler<ListDevices>,
    pub update: SharedHandler<UpdateDevice>,
    pub patch: SharedHandler<PatchDevice>,
    pub delete: SharedHandler<DeleteDevice>,
    pub health: SharedHandler<CheckHealth>,
}

/// Selects the pipeline for one operation type.
pub trait PipelineFor<Op: Operation> {
    fn pipeline(&self) -> &SharedHandler<Op>;
}

macro_rules! pipeline_for {
    ($op:ty, $field:ident) => {
        impl PipelineFor<$op> for DevicePipelines {
            fn pipeline(&self) -> &SharedHandler<$op> {
                &self.$field
            }
        }
    };
}

pipeline_for!(CreateDevice, create);
pipeline_for!(GetDevice, get);
pipeline_for!(ListDevices, list);
pipeline_for!(UpdateDevice, update);
pipeline_for!(PatchDevice, patch);
pipeline_for!(DeleteDevice, delete);
pipeline_for!(CheckHealth, health);

/// The assembled request-handling core.
pub struct Gateway {
    pipelines: DevicePipelines,
    breaker: Option<Arc<CircuitBreaker>>,
    cache: Option<DeviceCache>,
    worker: Option<BackgroundWorker<InvalidationRunnable>>,
}

impl Gateway {
    /// Builds the gateway. `store` is `None` to run without a cache.
    ///
    /// Must be called from within a tokio runtime when a cache is attached,
    /// since the invalidation worker is spawned here.
    pub fn start<T>(
        config: GatewayConfig,
        transport: Arc<T>,
        store: Option<Arc<dyn CacheStore>>,
    ) -> Self
    where
        T: DeviceTransport + ?Sized,
    {
        let breaker = CircuitBreaker::from_config(config.breaker.clone()).map(Arc::new);
        let client = InventoryClient::new(transport, breaker.clone(), config.rpc.clone());

        let cache = store
            .filter(|_| config.cache.enabled)
            .map(|store| DeviceCache::new(store, config.cache_key_prefix.clone()));
        let worker = cache.as_ref().map(|cache| {
            BackgroundWorker::start(
                InvalidationRunnable::new(cache.clone()),
                config.maintenance_interval,
                config.invalidation_queue_capacity,
            )
        });
        let invalidator = worker
            .as_ref()
            .and_then(BackgroundWorker::handle)
            .map(CacheInvalidator::new);

        let handlers = DeviceHandlers::new(client, invalidator);
        let get_cache = cache
            .clone()
            .map(|c| Arc::new(c) as Arc<dyn QueryCache<GetDevice>>);
        let list_cache = cache
            .clone()
            .map(|c| Arc::new(c) as Arc<dyn QueryCache<ListDevices>>);

        let pipelines = DevicePipelines {
            create: build_handler_pipeline(handlers.clone()),
            get: build_cached_pipeline(handlers.clone(), get_cache, &config.cache),
            list: build_cached_pipeline(handlers.clone(), list_cache, &config.cache),
            update: build_handler_pipeline(handlers.clone()),
            patch: build_handler_pipeline(handlers.clone()),
            delete: build_handler_pipeline(handlers.clone()),
            health: build_handler_pipeline(handlers),
        };

        tracing::info!(
            breaker = breaker.is_some(),
            cache = cache.is_some(),
            call_timeout_ms =
                u64::try_from(config.rpc.call_timeout.as_millis()).unwrap_or(u64::MAX),
            max_retries = config.rpc.retry.max_retries,
            "gateway started"
        );

        Self {
            pipelines,
            breaker,
            cache,
            worker,
        }
    }

    /// Runs `op` through its pipeline.
    ///
    /// # Errors
    ///
    /// Returns the domain error produced by the pipeline.
    pub async fn handle<Op>(
        &self,
        ctx: &RequestContext,
        op: Op,
    ) -> Result<Op::Output, GatewayError>
    where
        Op: Operation,
        DevicePipelines: PipelineFor<Op>,
    {
        <DevicePipelines as PipelineFor<Op>>::pipeline(&self.pipelines)
            .handle(ctx, op)
            .await
    }

    #[must_use]
    pub fn pipelines(&self) -> &DevicePipelines {
        &self.pipelines
    }

    /// The circuit breaker, when enabled. Useful for health reporting.
    #[must_use]
    pub fn breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.breaker.as_ref()
    }

    /// The device cache, when attached and enabled.
    #[must_use]
    pub fn cache(&self) -> Option<&DeviceCache> {
        self.cache.as_ref()
    }

    /// Stops the invalidation worker after it has applied queued invalidations.
    /// Pipelines keep serving; later invalidations are dropped with a warning.
    pub async fn stop(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.stop().await;
            tracing::info!("gateway stopped");
        }
    }
}
