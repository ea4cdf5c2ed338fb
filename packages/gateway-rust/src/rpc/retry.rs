//! Retry interceptor with exponential backoff and jitter.
//!
//! Retries only transient failures as classified by
//! [`is_retryable`](super::status::is_retryable). Permanent failures are
//! returned at once without consuming the retry budget. The loop stops as soon
//! as the inbound request is cancelled or its deadline has passed.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use rand::Rng;
use tonic::Status;
use tower::{Layer, Service, ServiceExt};

use super::request::RpcRequest;
use super::status::is_retryable;
use crate::config::{BackoffConfig, RetryConfig};

/// Delay before retry number `retry` (0 for the first retry).
///
/// Computed as `base_delay * multiplier^retry`, capped at `max_delay`, then
/// scaled by a random factor in `1 ± jitter` and capped again.
#[must_use]
pub fn backoff_delay(backoff: &BackoffConfig, retry: u32) -> Duration {
    let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
    let max = backoff.max_delay.as_secs_f64();
    let delay = (backoff.base_delay.as_secs_f64() * backoff.multiplier.powi(exponent)).min(max);

    let jitter = backoff.jitter.clamp(0.0, 1.0);
    let jittered = if jitter > 0.0 {
        delay * (1.0 + rand::rng().random_range(-jitter..=jitter))
    } else {
        delay
    };

    Duration::try_from_secs_f64(jittered.clamp(0.0, max)).unwrap_or(backoff.max_delay)
}

// ---------------------------------------------------------------------------
// RetryLayer
// ---------------------------------------------------------------------------

/// Tower layer that retries transient failures of the wrapped call.
#[derive(Debug, Clone)]
pub struct RetryLayer {
    config: Arc<RetryConfig>,
}

impl RetryLayer {
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

impl<S> Layer<S> for RetryLayer {
    type Service = RetryService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RetryService {
            inner,
            config: Arc::clone(&self.config),
        }
    }
}

// ---------------------------------------------------------------------------
// RetryService
// ---------------------------------------------------------------------------

/// Service wrapper implementing the retry loop. Attempts at most
/// `max_retries + 1` calls.
#[derive(Debug, Clone)]
pub struct RetryService<S> {
    inner: S,
    config: Arc<RetryConfig>,
}

impl<S, M, R> Service<RpcRequest<M>> for RetryService<S>
where
    S: Service<RpcRequest<M>, Response = R, Error = Status> + Clone + Send + 'static,
    S::Future: Send,
    M: Clone + Send + Sync + 'static,
    R: Send + 'static,
{
    type Response = R;
    type Error = Status;
    type Future = Pin<Box<dyn Future<Output = Result<R, Status>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: RpcRequest<M>) -> Self::Future {
        // Consume the instance that was poll_ready'd, leaving a clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let config = Arc::clone(&self.config);

        Box::pin(async move {
            let method = req.method;
            let mut attempt: u32 = 0;

            loop {
                if req.is_abandoned() {
                    return Err(abandoned_status(&req));
                }
                attempt += 1;

                let result = inner.ready().await?.call(req.clone()).await;
                let status = match result {
                    Ok(response) => {
                        if attempt > 1 {
                            tracing::info!(method, attempt, "outbound call succeeded after retries");
                        }
                        return Ok(response);
                    }
                    Err(status) => status,
                };

                if !is_retryable(&status) {
                    tracing::debug!(
                        method,
                        attempt,
                        code = ?status.code(),
                        "permanent failure; not retrying"
                    );
                    return Err(status);
                }
                if attempt > config.max_retries {
                    if config.max_retries > 0 {
                        tracing::warn!(
                            method,
                            attempt,
                            code = ?status.code(),
                            "outbound call giving up after retries"
                        );
                    }
                    return Err(status);
                }

                let delay = backoff_delay(&config.backoff, attempt - 1);
                metrics::counter!("gateway_rpc_retries_total", "method" => method).increment(1);
                tracing::debug!(
                    method,
                    attempt,
                    code = ?status.code(),
                    backoff_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "retrying outbound call after backoff"
                );

                tokio::select! {
                    () = req.ctx.cancellation().cancelled() => {
                        return Err(abandoned_status(&req));
                    }
                    () = tokio::time::sleep(delay) => {}
                }
            }
        })
    }
}

fn abandoned_status<M>(req: &RpcRequest<M>) -> Status {
    if req.ctx.is_cancelled() {
        Status::cancelled(format!("{}: request cancelled", req.method))
    } else {
        Status::deadline_exceeded(format!("{}: deadline exceeded", req.method))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use inventory_core::RequestContext;
    use tonic::Code;
    use tower::service_fn;

    use super::*;

    fn fast_config(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            backoff: BackoffConfig {
                base_delay: Duration::from_millis(1),
                multiplier: 2.0,
                jitter: 0.0,
                max_delay: Duration::from_millis(10),
            },
        }
    }

    /// Fails with `code` for the first `failures` attempts, then succeeds.
    fn flaky(
        calls: Arc<AtomicU32>,
        failures: u32,
        code: Code,
    ) -> impl Service<RpcRequest<()>, Response = u32, Error = Status, Future = impl Send> + Clone
    {
        service_fn(move |_req: RpcRequest<()>| {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n <= failures {
                    Err(Status::new(code, "flaky"))
                } else {
                    Ok(n)
                }
            }
        })
    }

    fn request() -> RpcRequest<()> {
        RpcRequest::new("test.Flaky", RequestContext::new(), ())
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let svc = RetryLayer::new(fast_config(3)).layer(flaky(calls.clone(), 2, Code::Unavailable));

        let attempt = svc.oneshot(request()).await.unwrap();
        assert_eq!(attempt, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unavailable_is_attempted_max_retries_plus_one_times() {
        let calls = Arc::new(AtomicU32::new(0));
        let svc =
            RetryLayer::new(fast_config(2)).layer(flaky(calls.clone(), u32::MAX, Code::Unavailable));

        let err = svc.oneshot(request()).await.unwrap_err();
        assert_eq!(err.code(), Code::Unavailable);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_failure_is_attempted_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let svc =
            RetryLayer::new(fast_config(5)).layer(flaky(calls.clone(), u32::MAX, Code::NotFound));

        let err = svc.oneshot(request()).await.unwrap_err();
        assert_eq!(err.code(), Code::NotFound);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_retries_is_pass_through() {
        let calls = Arc::new(AtomicU32::new(0));
        let svc =
            RetryLayer::new(fast_config(0)).layer(flaky(calls.clone(), u32::MAX, Code::Aborted));

        let err = svc.oneshot(request()).await.unwrap_err();
        assert_eq!(err.code(), Code::Aborted);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_context_aborts_before_first_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let svc = RetryLayer::new(fast_config(3)).layer(flaky(calls.clone(), 0, Code::Ok));

        let ctx = RequestContext::new().with_timeout(Duration::from_millis(5));
        tokio::time::advance(Duration::from_millis(10)).await;

        let err = svc
            .oneshot(RpcRequest::new("test.Flaky", ctx, ()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::DeadlineExceeded);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_backoff_stops_retrying() {
        let calls = Arc::new(AtomicU32::new(0));
        let config = RetryConfig {
            max_retries: 5,
            backoff: BackoffConfig {
                base_delay: Duration::from_secs(10),
                multiplier: 1.0,
                jitter: 0.0,
                max_delay: Duration::from_secs(10),
            },
        };
        let svc = RetryLayer::new(config).layer(flaky(calls.clone(), u32::MAX, Code::Unavailable));

        let ctx = RequestContext::new();
        let token = ctx.cancellation().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            token.cancel();
        });

        let err = svc
            .oneshot(RpcRequest::new("test.Flaky", ctx, ()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let backoff = BackoffConfig {
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
            jitter: 0.0,
            max_delay: Duration::from_millis(500),
        };
        assert_eq!(backoff_delay(&backoff, 0), Duration::from_millis(100));
        assert_eq!(backoff_delay(&backoff, 1), Duration::from_millis(200));
        assert_eq!(backoff_delay(&backoff, 2), Duration::from_millis(400));
        assert_eq!(backoff_delay(&backoff, 3), Duration::from_millis(500));
        assert_eq!(backoff_delay(&backoff, 60), Duration::from_millis(500));
    }

    #[test]
    fn jitter_stays_within_fraction_and_cap() {
        let backoff = BackoffConfig {
            base_delay: Duration::from_millis(100),
            multiplier: 1.0,
            jitter: 0.25,
            max_delay: Duration::from_millis(110),
        };
        for _ in 0..200 {
            let delay = backoff_delay(&backoff, 0);
            assert!(delay >= Duration::from_millis(75), "{delay:?}");
            assert!(delay <= Duration::from_millis(110), "{delay:?}");
        }
    }
}
