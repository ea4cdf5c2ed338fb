//! Typed client for the remote inventory service.
//!
//! Every call runs, outermost first, through the circuit breaker, the deadline
//! interceptor, the three identifier propagators, the retry interceptor, and
//! finally the [`DeviceTransport`]. Transport statuses are translated into
//! [`GatewayError`] before they leave the client.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use inventory_core::{
    CheckHealth, CreateDevice, DeleteDevice, Device, DevicePage, GetDevice, HealthReport,
    ListDevices, PatchDevice, RequestContext, UpdateDevice,
};
use tonic::{Request, Response, Status};
use tower::{service_fn, ServiceBuilder, ServiceExt};

use super::deadline::DeadlineLayer;
use super::propagate::{PropagateLayer, PropagatedField};
use super::request::RpcRequest;
use super::retry::RetryLayer;
use super::status::map_result;
use super::transport::{methods, DeviceTransport};
use crate::breaker::{guarded, CircuitBreaker};
use crate::config::{RetryConfig, RpcClientConfig};
use crate::error::GatewayError;

type TransportFuture<R> = Pin<Box<dyn Future<Output = Result<Response<R>, Status>> + Send>>;

/// Client for the remote inventory service with resilience built in.
pub struct InventoryClient<T: ?Sized> {
    transport: Arc<T>,
    breaker: Option<Arc<CircuitBreaker>>,
    config: Arc<RpcClientConfig>,
    retry: RetryLayer,
    no_retry: RetryLayer,
}

impl<T: ?Sized> Clone for InventoryClient<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            breaker: self.breaker.clone(),
            config: Arc::clone(&self.config),
            retry: self.retry.clone(),
            no_retry: self.no_retry.clone(),
        }
    }
}

impl<T: DeviceTransport + ?Sized> InventoryClient<T> {
    /// Creates a client. `breaker` is `None` when circuit breaking is disabled.
    #[must_use]
    pub fn new(
        transport: Arc<T>,
        breaker: Option<Arc<CircuitBreaker>>,
        config: RpcClientConfig,
    ) -> Self {
        let retry = RetryLayer::new(config.retry.clone());
        Self {
            transport,
            breaker,
            config: Arc::new(config),
            retry,
            no_retry: RetryLayer::new(RetryConfig::disabled()),
        }
    }

    /// The breaker guarding this client, if enabled.
    #[must_use]
    pub fn breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.breaker.as_ref()
    }

    /// Creates a device. Retried only when the context carries an
    /// idempotency key, since the remote side cannot otherwise deduplicate.
    ///
    /// # Errors
    ///
    /// Returns the mapped domain error, or a breaker rejection.
    pub async fn create_device(
        &self,
        ctx: &RequestContext,
        op: CreateDevice,
    ) -> Result<Device, GatewayError> {
        let retry = if ctx.idempotency_key.is_some() {
            &self.retry
        } else {
            &self.no_retry
        };
        self.call(
            methods::CREATE_DEVICE,
            ctx,
            op,
            retry,
            |t: Arc<T>, req| -> TransportFuture<Device> {
                Box::pin(async move { t.create_device(req).await })
            },
        )
        .await
    }

    /// # Errors
    ///
    /// Returns the mapped domain error, or a breaker rejection.
    pub async fn get_device(
        &self,
        ctx: &RequestContext,
        op: GetDevice,
    ) -> Result<Device, GatewayError> {
        self.call(
            methods::GET_DEVICE,
            ctx,
            op,
            &self.retry,
            |t: Arc<T>, req| -> TransportFuture<Device> {
                Box::pin(async move { t.get_device(req).await })
            },
        )
        .await
    }

    /// # Errors
    ///
    /// Returns the mapped domain error, or a breaker rejection.
    pub async fn list_devices(
        &self,
        ctx: &RequestContext,
        op: ListDevices,
    ) -> Result<DevicePage, GatewayError> {
        self.call(
            methods::LIST_DEVICES,
            ctx,
            op,
            &self.retry,
            |t: Arc<T>, req| -> TransportFuture<DevicePage> {
                Box::pin(async move { t.list_devices(req).await })
            },
        )
        .await
    }

    /// # Errors
    ///
    /// Returns the mapped domain error, or a breaker rejection.
    pub async fn update_device(
        &self,
        ctx: &RequestContext,
        op: UpdateDevice,
    ) -> Result<Device, GatewayError> {
        self.call(
            methods::UPDATE_DEVICE,
            ctx,
            op,
            &self.retry,
            |t: Arc<T>, req| -> TransportFuture<Device> {
                Box::pin(async move { t.update_device(req).await })
            },
        )
        .await
    }

    /// # Errors
    ///
    /// Returns the mapped domain error, or a breaker rejection.
    pub async fn patch_device(
        &self,
        ctx: &RequestContext,
        op: PatchDevice,
    ) -> Result<Device, GatewayError> {
        self.call(
            methods::PATCH_DEVICE,
            ctx,
            op,
            &self.retry,
            |t: Arc<T>, req| -> TransportFuture<Device> {
                Box::pin(async move { t.patch_device(req).await })
            },
        )
        .await
    }

    /// # Errors
    ///
    /// Returns the mapped domain error, or a breaker rejection.
    pub async fn delete_device(
        &self,
        ctx: &RequestContext,
        op: DeleteDevice,
    ) -> Result<bool, GatewayError> {
        self.call(
            methods::DELETE_DEVICE,
            ctx,
            op,
            &self.retry,
            |t: Arc<T>, req| -> TransportFuture<bool> {
                Box::pin(async move { t.delete_device(req).await })
            },
        )
        .await
    }

    /// # Errors
    ///
    /// Returns the mapped domain error, or a breaker rejection.
    pub async fn check_health(&self, ctx: &RequestContext) -> Result<HealthReport, GatewayError> {
        self.call(
            methods::CHECK_HEALTH,
            ctx,
            CheckHealth,
            &self.retry,
            |t: Arc<T>, req| -> TransportFuture<HealthReport> {
                Box::pin(async move { t.check_health(req).await })
            },
        )
        .await
    }

    async fn call<M, R, F>(
        &self,
        method: &'static str,
        ctx: &RequestContext,
        message: M,
        retry: &RetryLayer,
        send: F,
    ) -> Result<R, GatewayError>
    where
        M: Clone + Send + Sync + 'static,
        R: Send + 'static,
        F: Fn(Arc<T>, Request<M>) -> TransportFuture<R> + Clone + Send + 'static,
    {
        let transport = Arc::clone(&self.transport);
        let base = service_fn(move |req: RpcRequest<M>| {
            send(Arc::clone(&transport), req.into_tonic())
        });

        let svc = ServiceBuilder::new()
            .layer(DeadlineLayer::new(self.config.call_timeout))
            .layer(PropagateLayer::new(PropagatedField::CorrelationId))
            .layer(PropagateLayer::new(PropagatedField::RequestId))
            .layer(PropagateLayer::new(PropagatedField::IdempotencyKey))
            .layer(retry.clone())
            .service(base);

        let request = RpcRequest::new(method, ctx.clone(), message);
        guarded(
            self.breaker.as_deref(),
            || async move { map_result(svc.oneshot(request).await.map(Response::into_inner)) },
            GatewayError::breaker_class,
        )
        .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use inventory_core::DeviceState;
    use parking_lot::Mutex;
    use tonic::metadata::MetadataMap;

    use super::*;
    use crate::breaker::CircuitState;
    use crate::config::{BackoffConfig, CircuitBreakerConfig};

    /// Transport that fails every call with a fixed status, or succeeds when
    /// no status is configured. Records call count and the last metadata.
    #[derive(Default)]
    struct ScriptedTransport {
        failure: Mutex<Option<Status>>,
        calls: AtomicU32,
        last_metadata: Mutex<Option<MetadataMap>>,
    }

    impl ScriptedTransport {
        fn failing(status: Status) -> Self {
            Self {
                failure: Mutex::new(Some(status)),
                ..Self::default()
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }

        fn respond<M, R>(&self, request: &Request<M>, value: R) -> Result<Response<R>, Status> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_metadata.lock() = Some(request.metadata().clone());
            match self.failure.lock().clone() {
                Some(status) => Err(status),
                None => Ok(Response::new(value)),
            }
        }
    }

    fn device(id: &str) -> Device {
        Device {
            id: id.to_string(),
            name: "probe".to_string(),
            brand: "acme".to_string(),
            state: DeviceState::Available,
            created_at_ms: 1,
        }
    }

    #[async_trait]
    impl DeviceTransport for ScriptedTransport {
        async fn create_device(
            &self,
            request: Request<CreateDevice>,
        ) -> Result<Response<Device>, Status> {
            self.respond(&request, device("new"))
        }

        async fn get_device(&self, request: Request<GetDevice>) -> Result<Response<Device>, Status> {
            let id = request.get_ref().id.clone();
            self.respond(&request, device(&id))
        }

        async fn list_devices(
            &self,
            request: Request<ListDevices>,
        ) -> Result<Response<DevicePage>, Status> {
            self.respond(
                &request,
                DevicePage {
                    devices: vec![],
                    total: 0,
                    page: 1,
                    page_size: 20,
                },
            )
        }

        async fn update_device(
            &self,
            request: Request<UpdateDevice>,
        ) -> Result<Response<Device>, Status> {
            let id = request.get_ref().id.clone();
            self.respond(&request, device(&id))
        }

        async fn patch_device(
            &self,
            request: Request<PatchDevice>,
        ) -> Result<Response<Device>, Status> {
            let id = request.get_ref().id.clone();
            self.respond(&request, device(&id))
        }

        async fn delete_device(
            &self,
            request: Request<DeleteDevice>,
        ) -> Result<Response<bool>, Status> {
            self.respond(&request, true)
        }

        async fn check_health(
            &self,
            request: Request<CheckHealth>,
        ) -> Result<Response<HealthReport>, Status> {
            self.respond(
                &request,
                HealthReport {
                    serving: true,
                    version: None,
                },
            )
        }
    }

    fn rpc_config(max_retries: u32) -> RpcClientConfig {
        RpcClientConfig {
            call_timeout: Duration::from_secs(1),
            retry: RetryConfig {
                max_retries,
                backoff: BackoffConfig {
                    base_delay: Duration::from_millis(1),
                    multiplier: 1.0,
                    jitter: 0.0,
                    max_delay: Duration::from_millis(1),
                },
            },
        }
    }

    fn breaker(threshold: u32) -> Arc<CircuitBreaker> {
        Arc::new(CircuitBreaker::new(CircuitBreakerConfig {
            name: "test".to_string(),
            enabled: true,
            max_requests: 1,
            interval: Duration::from_secs(60),
            timeout: Duration::from_secs(30),
            failure_threshold: threshold,
        }))
    }

    fn create_op() -> CreateDevice {
        CreateDevice {
            name: "probe".to_string(),
            brand: "acme".to_string(),
            state: DeviceState::Available,
        }
    }

    #[tokio::test]
    async fn success_returns_message_and_propagates_identifiers() {
        let transport = Arc::new(ScriptedTransport::default());
        let client = InventoryClient::new(transport.clone(), None, rpc_config(0));
        let ctx = RequestContext::new()
            .with_request_id("req-9")
            .with_correlation_id("corr-9");

        let found = client
            .get_device(&ctx, GetDevice { id: "d-1".to_string() })
            .await
            .unwrap();
        assert_eq!(found.id, "d-1");

        let metadata = transport.last_metadata.lock().clone().unwrap();
        assert_eq!(metadata.get("x-request-id").unwrap().to_str().unwrap(), "req-9");
        assert_eq!(metadata.get("x-correlation-id").unwrap().to_str().unwrap(), "corr-9");
        assert!(metadata.get("x-idempotency-key").is_none());
        assert!(metadata.get("grpc-timeout").is_some());
    }

    #[tokio::test]
    async fn not_found_is_mapped_and_not_retried() {
        let transport = Arc::new(ScriptedTransport::failing(Status::not_found("no such device")));
        let client = InventoryClient::new(transport.clone(), None, rpc_config(3));

        let err = client
            .get_device(&RequestContext::new(), GetDevice { id: "x".to_string() })
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::NotFound));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn unavailable_is_retried_then_mapped() {
        let transport = Arc::new(ScriptedTransport::failing(Status::unavailable("down")));
        let client = InventoryClient::new(transport.clone(), None, rpc_config(2));

        let err = client
            .list_devices(&RequestContext::new(), ListDevices::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Unavailable));
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn create_without_idempotency_key_is_not_retried() {
        let transport = Arc::new(ScriptedTransport::failing(Status::unavailable("down")));
        let client = InventoryClient::new(transport.clone(), None, rpc_config(3));

        let err = client
            .create_device(&RequestContext::new(), create_op())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Unavailable));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn create_with_idempotency_key_is_retried_and_forwards_key() {
        let transport = Arc::new(ScriptedTransport::failing(Status::unavailable("down")));
        let client = InventoryClient::new(transport.clone(), None, rpc_config(3));
        let ctx = RequestContext::new().with_idempotency_key("idem-1");

        let _ = client.create_device(&ctx, create_op()).await;
        assert_eq!(transport.calls(), 4);
        let metadata = transport.last_metadata.lock().clone().unwrap();
        assert_eq!(metadata.get("x-idempotency-key").unwrap().to_str().unwrap(), "idem-1");
    }

    #[tokio::test]
    async fn dependency_failures_open_the_breaker() {
        let transport = Arc::new(ScriptedTransport::failing(Status::unavailable("down")));
        let breaker = breaker(2);
        let client = InventoryClient::new(transport.clone(), Some(breaker.clone()), rpc_config(0));
        let ctx = RequestContext::new();

        for _ in 0..2 {
            let _ = client.delete_device(&ctx, DeleteDevice { id: "d".to_string() }).await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        let err = client
            .delete_device(&ctx, DeleteDevice { id: "d".to_string() })
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::CircuitOpen));
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn caller_mistakes_do_not_open_the_breaker() {
        let transport = Arc::new(ScriptedTransport::failing(Status::invalid_argument(
            "name is required",
        )));
        let breaker = breaker(1);
        let client = InventoryClient::new(transport.clone(), Some(breaker.clone()), rpc_config(0));

        for _ in 0..3 {
            let err = client
                .update_device(
                    &RequestContext::new(),
                    UpdateDevice {
                        id: "d".to_string(),
                        name: String::new(),
                        brand: "acme".to_string(),
                        state: DeviceState::InUse,
                    },
                )
                .await
                .unwrap_err();
            assert!(matches!(err, GatewayError::ValidationFailed(_)));
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn cancelled_caller_gets_cancelled_status() {
        let transport = Arc::new(ScriptedTransport::default());
        let client = InventoryClient::new(transport.clone(), Some(breaker(1)), rpc_config(0));
        let ctx = RequestContext::new();
        ctx.cancellation().cancel();

        let err = client.check_health(&ctx).await.unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Rpc(ref status) if status.code() == tonic::Code::Cancelled
        ));
        assert_eq!(client.breaker().unwrap().state(), CircuitState::Closed);
    }

    fn fast_recovering_breaker(threshold: u32) -> Arc<CircuitBreaker> {
        Arc::new(CircuitBreaker::new(CircuitBreakerConfig {
            name: "test".to_string(),
            enabled: true,
            max_requests: 1,
            interval: Duration::from_secs(60),
            timeout: Duration::from_secs(1),
            failure_threshold: threshold,
        }))
    }

    fn cancelled_ctx() -> RequestContext {
        let ctx = RequestContext::new();
        ctx.cancellation().cancel();
        ctx
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_half_open_call_does_not_close_the_breaker() {
        let transport = Arc::new(ScriptedTransport::failing(Status::unavailable("down")));
        let breaker = fast_recovering_breaker(1);
        let client = InventoryClient::new(transport.clone(), Some(breaker.clone()), rpc_config(0));
        let get = || GetDevice { id: "d".to_string() };

        let _ = client.get_device(&RequestContext::new(), get()).await;
        assert_eq!(breaker.state(), CircuitState::Open);
        tokio::time::advance(Duration::from_millis(1_100)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        let err = client.get_device(&cancelled_ctx(), get()).await.unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Rpc(ref status) if status.code() == tonic::Code::Cancelled
        ));
        assert_eq!(transport.calls(), 1);
        assert_ne!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_call_does_not_reset_failure_streak() {
        let transport = Arc::new(ScriptedTransport::failing(Status::unavailable("down")));
        let breaker = fast_recovering_breaker(2);
        let client = InventoryClient::new(transport.clone(), Some(breaker.clone()), rpc_config(0));
        let get = || GetDevice { id: "d".to_string() };

        let _ = client.get_device(&RequestContext::new(), get()).await;
        let _ = client.get_device(&cancelled_ctx(), get()).await;
        assert_eq!(breaker.counts().total_successes, 0);
        let _ = client.get_device(&RequestContext::new(), get()).await;

        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn permission_denied_does_not_open_the_breaker() {
        let transport = Arc::new(ScriptedTransport::failing(Status::permission_denied("no")));
        let breaker = breaker(1);
        let client = InventoryClient::new(transport.clone(), Some(breaker.clone()), rpc_config(0));

        for _ in 0..3 {
            let err = client.check_health(&RequestContext::new()).await.unwrap_err();
            assert!(matches!(err, GatewayError::Rpc(_)));
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(transport.calls(), 3);
    }
}
