//! Metrics decorator for operations.
//!
//! Records a completion counter and a duration histogram through the
//! `metrics` facade. Without an installed recorder both are no-ops.

use async_trait::async_trait;
use inventory_core::{Operation, RequestContext};
use tokio::time::Instant;
use tower::Layer;

use crate::error::GatewayError;
use crate::service::handler::Handler;

/// Counter of completed operations, labelled by operation, kind, outcome, and
/// cache status.
pub const OPERATIONS_TOTAL: &str = "gateway_operations_total";

/// Histogram of operation duration in seconds, labelled by operation and kind.
pub const OPERATION_DURATION_SECONDS: &str = "gateway_operation_duration_seconds";

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

/// Tower layer that instruments operations with timing and counting.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsLayer;

impl<H> Layer<H> for MetricsLayer {
    type Service = Metrics<H>;

    fn layer(&self, inner: H) -> Self::Service {
        Metrics { inner }
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Handler wrapper that records operation duration and outcome.
#[derive(Debug, Clone)]
pub struct Metrics<H> {
    inner: H,
}

#[async_trait]
impl<Op, H> Handler<Op> for Metrics<H>
where
    Op: Operation,
    H: Handler<Op>,
{
    async fn handle(&self, ctx: &RequestContext, op: Op) -> Result<Op::Output, GatewayError> {
        let start = Instant::now();
        let result = self.inner.handle(ctx, op).await;
        let elapsed = start.elapsed();

        let outcome = match &result {
            Ok(_) => "ok",
            Err(err) => err.kind(),
        };

        metrics::counter!(
            OPERATIONS_TOTAL,
            "operation" => Op::NAME,
            "kind" => Op::KIND.as_str(),
            "outcome" => outcome,
            "cache_status" => ctx.cache_status().as_str()
        )
        .increment(1);
        metrics::histogram!(
            OPERATION_DURATION_SECONDS,
            "operation" => Op::NAME,
            "kind" => Op::KIND.as_str()
        )
        .record(elapsed.as_secs_f64());

        result
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
