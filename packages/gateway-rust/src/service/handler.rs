//! Handler abstraction shared by base handlers and decorators.
//!
//! A [`Handler<Op>`] executes one operation type. Decorators wrap a handler
//! and implement `Handler<Op>` themselves, so a decorated pipeline has exactly
//! the capability of its base handler.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use inventory_core::{Operation, RequestContext};

use crate::error::GatewayError;

/// Executes operations of type `Op`.
#[async_trait]
pub trait Handler<Op: Operation>: Send + Sync {
    async fn handle(&self, ctx: &RequestContext, op: Op) -> Result<Op::Output, GatewayError>;
}

/// Type-erased, shareable handler as returned by the pipeline builders.
pub type SharedHandler<Op> = Arc<dyn Handler<Op>>;

#[async_trait]
impl<Op: Operation, H: Handler<Op> + ?Sized> Handler<Op> for Arc<H> {
    async fn handle(&self, ctx: &RequestContext, op: Op) -> Result<Op::Output, GatewayError> {
        (**self).handle(ctx, op).await
    }
}

#[async_trait]
impl<Op: Operation, H: Handler<Op> + ?Sized> Handler<Op> for Box<H> {
    async fn handle(&self, ctx: &RequestContext, op: Op) -> Result<Op::Output, GatewayError> {
        (**self).handle(ctx, op).await
    }
}

// ---------------------------------------------------------------------------
// HandlerFn
// ---------------------------------------------------------------------------

/// Handler built from an async closure. See [`handler_fn`].
pub struct HandlerFn<F, Op> {
    f: F,
    _op: PhantomData<fn(Op)>,
}

/// Wraps an async closure taking an owned context and the operation.
pub fn handler_fn<Op, F, Fut>(f: F) -> HandlerFn<F, Op>
where
    Op: Operation,
    F: Fn(RequestContext, Op) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Op::Output, GatewayError>> + Send,
{
    HandlerFn {
        f,
        _op: PhantomData,
    }
}

#[async_trait]
impl<Op, F, Fut> Handler<Op> for HandlerFn<F, Op>
where
    Op: Operation,
    F: Fn(RequestContext, Op) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Op::Output, GatewayError>> + Send,
{
    async fn handle(&self, ctx: &RequestContext, op: Op) -> Result<Op::Output, GatewayError> {
        (self.f)(ctx.clone(), op).await
    }
}
