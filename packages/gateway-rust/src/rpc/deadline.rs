//! Deadline interceptor for outbound calls.
//!
//! Derives a deadline scoped to one call from the configured timeout, bounded
//! by the inbound request's own deadline, and fails the call with
//! `DEADLINE_EXCEEDED` when it passes. The call is also abandoned with
//! `CANCELLED` as soon as the inbound request is cancelled.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::time::Instant;
use tonic::Status;
use tower::{Layer, Service};

use super::request::RpcRequest;

// ---------------------------------------------------------------------------
// DeadlineLayer
// ---------------------------------------------------------------------------

/// Tower layer that bounds each outbound call by a per-call timeout.
///
/// A zero timeout adds no call deadline; the inbound deadline and
/// cancellation still apply.
#[derive(Debug, Clone, Copy)]
pub struct DeadlineLayer {
    timeout: Duration,
}

impl DeadlineLayer {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl<S> Layer<S> for DeadlineLayer {
    type Service = DeadlineService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        DeadlineService {
            inner,
            timeout: self.timeout,
        }
    }
}

// ---------------------------------------------------------------------------
// DeadlineService
// ---------------------------------------------------------------------------

/// Service wrapper enforcing the call deadline and inbound cancellation.
#[derive(Debug, Clone)]
pub struct DeadlineService<S> {
    inner: S,
    timeout: Duration,
}

impl<S, M, R> Service<RpcRequest<M>> for DeadlineService<S>
where
    S: Service<RpcRequest<M>, Response = R, Error = Status> + Send,
    S::Future: Send + 'static,
    R: Send + 'static,
{
    type Response = R;
    type Error = Status;
    type Future = Pin<Box<dyn Future<Output = Result<R, Status>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: RpcRequest<M>) -> Self::Future {
        let method = req.method;
        if !self.timeout.is_zero() {
            req.deadline = Some(Instant::now() + self.timeout);
        }
        let deadline = req.effective_deadline();
        let cancellation = req.ctx.cancellation().clone();

        let fut = self.inner.call(req);
        Box::pin(async move {
            let bounded = async move {
                match deadline {
                    Some(deadline) => match tokio::time::timeout_at(deadline, fut).await {
                        Ok(result) => result,
                        Err(_elapsed) => {
                            tracing::debug!(method, "outbound call deadline exceeded");
                            Err(Status::deadline_exceeded(format!(
                                "{method}: deadline exceeded"
                            )))
                        }
                    },
                    None => fut.await,
                }
            };

            tokio::select! {
                biased;
                () = cancellation.cancelled() => {
                    tracing::debug!(method, "outbound call cancelled by caller");
                    Err(Status::cancelled(format!("{method}: request cancelled")))
                }
                result = bounded => result,
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use inventory_core::RequestContext;
    use tonic::Code;
    use tower::ServiceExt;

    use super::*;

    /// Service that takes a configurable delay before responding and reports
    /// the deadline it observed.
    #[derive(Clone)]
    struct SlowService {
        delay: Duration,
    }

    impl Service<RpcRequest<()>> for SlowService {
        type Response = Option<Instant>;
        type Error = Status;
        type Future = Pin<Box<dyn Future<Output = Result<Option<Instant>, Status>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: RpcRequest<()>) -> Self::Future {
            let delay = self.delay;
            Box::pin(async move {
                tokio::time::sleep(delay).await;
                Ok(req.deadline)
            })
        }
    }

    fn request(ctx: RequestContext) -> RpcRequest<()> {
        RpcRequest::new("test.Slow", ctx, ())
    }

    #[tokio::test(start_paused = true)]
    async fn completes_within_timeout() {
        let svc = DeadlineLayer::new(Duration::from_secs(1)).layer(SlowService {
            delay: Duration::from_millis(10),
        });
        let start = Instant::now();
        let observed = svc.oneshot(request(RequestContext::new())).await.unwrap();
        assert_eq!(observed, Some(start + Duration::from_secs(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn exceeds_timeout_returns_deadline_exceeded() {
        let svc = DeadlineLayer::new(Duration::from_millis(50)).layer(SlowService {
            delay: Duration::from_millis(200),
        });
        let err = svc.oneshot(request(RequestContext::new())).await.unwrap_err();
        assert_eq!(err.code(), Code::DeadlineExceeded);
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_deadline_bounds_call_deadline() {
        let svc = DeadlineLayer::new(Duration::from_secs(10)).layer(SlowService {
            delay: Duration::from_millis(200),
        });
        let ctx = RequestContext::new().with_timeout(Duration::from_millis(50));
        let err = svc.oneshot(request(ctx)).await.unwrap_err();
        assert_eq!(err.code(), Code::DeadlineExceeded);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_timeout_adds_no_deadline() {
        let svc = DeadlineLayer::new(Duration::ZERO).layer(SlowService {
            delay: Duration::from_millis(10),
        });
        let observed = svc.oneshot(request(RequestContext::new())).await.unwrap();
        assert_eq!(observed, None);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_aborts_call() {
        let svc = DeadlineLayer::new(Duration::from_secs(10)).layer(SlowService {
            delay: Duration::from_secs(5),
        });
        let ctx = RequestContext::new();
        let token = ctx.cancellation().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });
        let err = svc.oneshot(request(ctx)).await.unwrap_err();
        assert_eq!(err.code(), Code::Cancelled);
    }
}
