//! Pipeline composition: combines the decorators into a single handler stack.

use std::sync::Arc;

use inventory_core::Operation;
use tower::ServiceBuilder;

use super::caching::CachingLayer;
use super::logging::LoggingLayer;
use super::metrics::MetricsLayer;
use super::trace::TracingLayer;
use crate::cache::QueryCache;
use crate::config::CacheConfig;
use crate::service::handler::{Handler, SharedHandler};

/// Build the pipeline for a command or uncached query.
///
/// Layer order (outermost to innermost):
/// 1. `LoggingLayer` -- one event per completed operation
/// 2. `MetricsLayer` -- count and time the operation
/// 3. `TracingLayer` -- operation span around the handler
#[must_use]
pub fn build_handler_pipeline<Op, H>(base: H) -> SharedHandler<Op>
where
    Op: Operation,
    H: Handler<Op> + 'static,
{
    Arc::new(
        ServiceBuilder::new()
            .layer(LoggingLayer)
            .layer(MetricsLayer)
            .layer(TracingLayer)
            .service(base),
    )
}

/// Build the pipeline for a cached query.
///
/// Same as [`build_handler_pipeline`] with `CachingLayer` directly above the
/// base handler, so cache hits are still logged, counted, and traced.
#[must_use]
pub fn build_cached_pipeline<Op, H>(
    base: H,
    cache: Option<Arc<dyn QueryCache<Op>>>,
    config: &CacheConfig,
) -> SharedHandler<Op>
where
    Op: Operation + Clone,
    Op::Output: Clone,
    H: Handler<Op> + 'static,
{
    Arc::new(
        ServiceBuilder::new()
            .layer(LoggingLayer)
            .layer(MetricsLayer)
            .layer(TracingLayer)
            .layer(CachingLayer::new(cache, config.clone()))
            .service(base),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
