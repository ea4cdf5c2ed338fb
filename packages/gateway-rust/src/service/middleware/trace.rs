//! Tracing decorator: runs the wrapped handler inside an operation span.

use async_trait::async_trait;
use inventory_core::{Operation, RequestContext};
use tower::Layer;
use tracing::{info_span, Instrument};

use crate::error::GatewayError;
use crate::service::handler::Handler;

/// Layer producing [`Traced`] handlers.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLayer;

impl<H> Layer<H> for TracingLayer {
    type Service = Traced<H>;

    fn layer(&self, inner: H) -> Self::Service {
        Traced { inner }
    }
}

/// Handler wrapper that opens an `operation` span carrying the request
/// identifiers, and records outcome and cache status on it when done.
#[derive(Debug, Clone)]
pub struct Traced<H> {
    inner: H,
}

#[async_trait]
impl<Op, H> Handler<Op> for Traced<H>
where
    Op: Operation,
    H: Handler<Op>,
{
    async fn handle(&self, ctx: &RequestContext, op: Op) -> Result<Op::Output, GatewayError> {
        let span = info_span!(
            "operation",
            operation = Op::NAME,
            kind = Op::KIND.as_str(),
            request_id = %ctx.request_id,
            correlation_id = ctx.correlation_id.as_deref(),
            cache_status = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let result = self.inner.handle(ctx, op).instrument(span.clone()).await;

        span.record("cache_status", ctx.cache_status().as_str());
        span.record(
            "outcome",
            match &result {
                Ok(_) => "ok",
                Err(err) => err.kind(),
            },
        );
        result
    }
}
