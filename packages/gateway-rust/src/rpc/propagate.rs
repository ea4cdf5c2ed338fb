//! Identifier propagation interceptors.
//!
//! Each [`PropagateLayer`] copies one identifier from the inbound
//! [`RequestContext`](inventory_core::RequestContext) into the outbound call's
//! metadata. Values are truncated to [`MAX_PROPAGATED_LEN`] characters to
//! bound header size. A value that is not valid ASCII header text is
//! forwarded percent-encoded.

use std::task::{Context, Poll};

use inventory_core::RequestContext;
use tonic::metadata::{Ascii, MetadataValue};
use tower::{Layer, Service};

use super::request::RpcRequest;

/// Longest identifier forwarded, in characters.
pub const MAX_PROPAGATED_LEN: usize = 128;

/// Identifier carried from the inbound scope to outbound metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropagatedField {
    CorrelationId,
    RequestId,
    IdempotencyKey,
}

impl PropagatedField {
    /// Outbound metadata key.
    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            Self::CorrelationId => "x-correlation-id",
            Self::RequestId => "x-request-id",
            Self::IdempotencyKey => "x-idempotency-key",
        }
    }

    fn value(self, ctx: &RequestContext) -> Option<&str> {
        match self {
            Self::CorrelationId => ctx.correlation_id.as_deref(),
            Self::RequestId => Some(ctx.request_id.as_str()),
            Self::IdempotencyKey => ctx.idempotency_key.as_deref(),
        }
        .filter(|value| !value.is_empty())
    }
}

/// Header-safe form of `value`: unchanged when it is already valid header
/// text, percent-encoded otherwise.
fn header_value(value: &str) -> Option<MetadataValue<Ascii>> {
    MetadataValue::try_from(value)
        .or_else(|_| MetadataValue::try_from(urlencoding::encode(value).as_ref()))
        .ok()
}

/// Cuts `value` to at most `max_chars` characters on a character boundary.
#[must_use]
pub fn truncate_chars(value: &str, max_chars: usize) -> &str {
    match value.char_indices().nth(max_chars) {
        Some((idx, _)) => &value[..idx],
        None => value,
    }
}

// ---------------------------------------------------------------------------
// PropagateLayer
// ---------------------------------------------------------------------------

/// Tower layer forwarding one inbound identifier as outbound metadata.
#[derive(Debug, Clone, Copy)]
pub struct PropagateLayer {
    field: PropagatedField,
}

impl PropagateLayer {
    #[must_use]
    pub fn new(field: PropagatedField) -> Self {
        Self { field }
    }
}

impl<S> Layer<S> for PropagateLayer {
    type Service = PropagateService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        PropagateService {
            inner,
            field: self.field,
        }
    }
}

// ---------------------------------------------------------------------------
// PropagateService
// ---------------------------------------------------------------------------

/// Service wrapper that writes one identifier into outbound metadata.
#[derive(Debug, Clone)]
pub struct PropagateService<S> {
    inner: S,
    field: PropagatedField,
}

impl<S, M> Service<RpcRequest<M>> for PropagateService<S>
where
    S: Service<RpcRequest<M>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: RpcRequest<M>) -> Self::Future {
        if let Some(raw) = self.field.value(&req.ctx) {
            let truncated = truncate_chars(raw, MAX_PROPAGATED_LEN);
            match header_value(truncated) {
                Some(value) => {
                    req.metadata.insert(self.field.key(), value);
                }
                None => tracing::debug!(
                    key = self.field.key(),
                    method = req.method,
                    "identifier could not be encoded as header text; not propagated"
                ),
            }
        }
        self.inner.call(req)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
