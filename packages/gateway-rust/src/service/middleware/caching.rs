//! Read-through caching decorator for query handlers.
//!
//! Per request: at most one synchronous cache read, and on a miss at most one
//! asynchronous write-back on a detached task. The outcome is published as the
//! request's [`CacheStatus`]. Cache failures are logged and never fail the
//! request.

use std::sync::Arc;

use async_trait::async_trait;
use inventory_core::{CacheStatus, Operation, RequestContext};
use tower::Layer;
use tracing::{debug_span, Instrument};

use crate::cache::QueryCache;
use crate::config::CacheConfig;
use crate::error::GatewayError;
use crate::service::handler::Handler;

// ---------------------------------------------------------------------------
// CachingLayer
// ---------------------------------------------------------------------------

/// Layer producing [`Caching`] handlers for query `Op`.
///
/// An absent cache behaves exactly like a disabled one.
pub struct CachingLayer<Op: Operation> {
    cache: Option<Arc<dyn QueryCache<Op>>>,
    config: CacheConfig,
}

impl<Op: Operation> CachingLayer<Op> {
    #[must_use]
    pub fn new(cache: Option<Arc<dyn QueryCache<Op>>>, config: CacheConfig) -> Self {
        Self { cache, config }
    }
}

impl<Op: Operation> Clone for CachingLayer<Op> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            config: self.config.clone(),
        }
    }
}

impl<Op: Operation, H> Layer<H> for CachingLayer<Op> {
    type Service = Caching<H, Op>;

    fn layer(&self, inner: H) -> Self::Service {
        let cache = if self.config.enabled {
            self.cache.clone()
        } else {
            None
        };
        Caching {
            inner,
            cache,
            config: self.config.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Caching
// ---------------------------------------------------------------------------

/// Handler wrapper implementing read-through caching with async write-back.
pub struct Caching<H, Op: Operation> {
    inner: H,
    /// `None` when caching is disabled or no cache is attached.
    cache: Option<Arc<dyn QueryCache<Op>>>,
    config: CacheConfig,
}

#[async_trait]
impl<H, Op> Handler<Op> for Caching<H, Op>
where
    Op: Operation + Clone,
    Op::Output: Clone,
    H: Handler<Op>,
{
    async fn handle(&self, ctx: &RequestContext, op: Op) -> Result<Op::Output, GatewayError> {
        let Some(cache) = &self.cache else {
            ctx.set_cache_status(CacheStatus::Bypass);
            return self.inner.handle(ctx, op).await;
        };

        let lookup_failed = match cache.get(ctx, &op).await {
            Ok(result) => {
                let key = result.key.clone();
                if let Some(value) = result.into_hit() {
                    ctx.set_cache_status(CacheStatus::Hit);
                    record_lookup(Op::NAME, "hit");
                    tracing::debug!(operation = Op::NAME, key = %key, "cache hit");
                    return Ok(value);
                }
                record_lookup(Op::NAME, "miss");
                tracing::debug!(operation = Op::NAME, key = %key, "cache miss");
                false
            }
            Err(err) => {
                record_lookup(Op::NAME, "error");
                tracing::warn!(
                    operation = Op::NAME,
                    error = %err,
                    "cache lookup failed; falling back to origin"
                );
                true
            }
        };

        match self.inner.handle(ctx, op.clone()).await {
            Ok(value) => {
                ctx.set_cache_status(CacheStatus::Miss);
                spawn_write_back(
                    Arc::clone(cache),
                    ctx.detached(),
                    op,
                    value.clone(),
                    &self.config,
                );
                Ok(value)
            }
            Err(err) => {
                ctx.set_cache_status(if lookup_failed {
                    CacheStatus::Error
                } else {
                    CacheStatus::Miss
                });
                Err(err)
            }
        }
    }
}

/// Populates the cache on a task of its own. The request never waits for it,
/// and its cancellation does not reach it.
fn spawn_write_back<Op>(
    cache: Arc<dyn QueryCache<Op>>,
    ctx: RequestContext,
    op: Op,
    value: Op::Output,
    config: &CacheConfig,
) where
    Op: Operation,
{
    let ttl = config.ttl;
    let span = debug_span!(
        "cache_write_back",
        operation = Op::NAME,
        request_id = %ctx.request_id,
    );
    tokio::spawn(
        async move {
            match cache.set(&ctx, &op, &value, ttl).await {
                Ok(()) => {
                    metrics::counter!(
                        "gateway_cache_writes_total",
                        "operation" => Op::NAME,
                        "outcome" => "ok"
                    )
                    .increment(1);
                    tracing::debug!("cache populated");
                }
                Err(err) => {
                    metrics::counter!(
                        "gateway_cache_writes_total",
                        "operation" => Op::NAME,
                        "outcome" => "error"
                    )
                    .increment(1);
                    tracing::warn!(error = %err, "cache write-back failed");
                }
            }
        }
        .instrument(span),
    );
}

fn record_lookup(operation: &'static str, result: &'static str) {
    metrics::counter!("gateway_cache_lookups_total", "operation" => operation, "result" => result)
        .increment(1);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
