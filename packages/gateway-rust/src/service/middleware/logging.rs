//! Logging decorator: one structured event per completed operation.

use async_trait::async_trait;
use inventory_core::{Operation, RequestContext};
use tokio::time::Instant;
use tower::Layer;

use crate::error::GatewayError;
use crate::service::handler::Handler;

// ---------------------------------------------------------------------------
// LoggingLayer
// ---------------------------------------------------------------------------

/// Layer producing [`Logging`] handlers.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingLayer;

impl<H> Layer<H> for LoggingLayer {
    type Service = Logging<H>;

    fn layer(&self, inner: H) -> Self::Service {
        Logging { inner }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Handler wrapper that logs the outcome, duration, identifiers, and cache
/// status of each operation.
///
/// Successes log at `info`. Caller mistakes (not found, conflict, validation)
/// log at `info` too; dependency failures and breaker rejections at `warn`.
#[derive(Debug, Clone)]
pub struct Logging<H> {
    inner: H,
}

#[async_trait]
impl<Op, H> Handler<Op> for Logging<H>
where
    Op: Operation,
    H: Handler<Op>,
{
    async fn handle(&self, ctx: &RequestContext, op: Op) -> Result<Op::Output, GatewayError> {
        let start = Instant::now();
        let result = self.inner.handle(ctx, op).await;
        let elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        let cache_status = ctx.cache_status().as_str();

        match &result {
            Ok(_) => tracing::info!(
                operation = Op::NAME,
                kind = Op::KIND.as_str(),
                request_id = %ctx.request_id,
                correlation_id = ctx.correlation_id.as_deref(),
                cache_status,
                elapsed_ms,
                "operation complete"
            ),
            Err(err) if is_caller_error(err) => tracing::info!(
                operation = Op::NAME,
                kind = Op::KIND.as_str(),
                request_id = %ctx.request_id,
                correlation_id = ctx.correlation_id.as_deref(),
                cache_status,
                elapsed_ms,
                error_kind = err.kind(),
                error = %err,
                "operation rejected"
            ),
            Err(err) => tracing::warn!(
                operation = Op::NAME,
                kind = Op::KIND.as_str(),
                request_id = %ctx.request_id,
                correlation_id = ctx.correlation_id.as_deref(),
                cache_status,
                elapsed_ms,
                error_kind = err.kind(),
                error = %err,
                "operation failed"
            ),
        }
        result
    }
}

fn is_caller_error(err: &GatewayError) -> bool {
    matches!(
        err,
        GatewayError::NotFound | GatewayError::Conflict { .. } | GatewayError::ValidationFailed(_)
    )
}

#[cfg(test)]
mod tests {
    use inventory_core::GetDevice;

    use super::*;
    use crate::service::handler::handler_fn;

    #[tokio::test]
    async fn passes_errors_through_unchanged() {
        let handler = LoggingLayer.layer(handler_fn(|_ctx: RequestContext, _op: GetDevice| async {
            Err(GatewayError::Conflict {
                reason: "cannot update".to_string(),
            })
        }));

        let err = handler
            .handle(&RequestContext::new(), GetDevice { id: "d".to_string() })
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Conflict { ref reason } if reason == "cannot update"));
    }

    #[test]
    fn caller_errors_are_distinguished() {
        assert!(is_caller_error(&GatewayError::NotFound));
        assert!(!is_caller_error(&GatewayError::Unavailable));
        assert!(!is_caller_error(&GatewayError::CircuitOpen));
    }
}
