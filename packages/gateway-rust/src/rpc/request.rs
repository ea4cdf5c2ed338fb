//! Outbound call envelope passed through the interceptor chain.

use std::time::Duration;

use inventory_core::RequestContext;
use tokio::time::Instant;
use tonic::metadata::MetadataMap;

/// One outbound call on its way through the interceptor chain.
///
/// Interceptors read the inbound [`RequestContext`] and write outbound
/// metadata and the call-scoped deadline. The transport receives the result
/// as a `tonic::Request` via [`RpcRequest::into_tonic`].
#[derive(Debug, Clone)]
pub struct RpcRequest<M> {
    /// Fully qualified method name, for logs and metrics (e.g. `"inventory.GetDevice"`).
    pub method: &'static str,
    /// Context of the inbound request this call serves.
    pub ctx: RequestContext,
    /// Outbound metadata (headers).
    pub metadata: MetadataMap,
    /// Deadline scoped to this call. Set by the deadline interceptor.
    pub deadline: Option<Instant>,
    pub message: M,
}

impl<M> RpcRequest<M> {
    #[must_use]
    pub fn new(method: &'static str, ctx: RequestContext, message: M) -> Self {
        Self {
            method,
            ctx,
            metadata: MetadataMap::new(),
            deadline: None,
            message,
        }
    }

    /// The earliest of the call deadline and the inbound request deadline.
    #[must_use]
    pub fn effective_deadline(&self) -> Option<Instant> {
        match (self.deadline, self.ctx.deadline) {
            (Some(call), Some(inbound)) => Some(call.min(inbound)),
            (call, inbound) => call.or(inbound),
        }
    }

    /// Whether the caller has gone away or the deadline has already passed.
    #[must_use]
    pub fn is_abandoned(&self) -> bool {
        self.ctx.is_cancelled()
            || self
                .effective_deadline()
                .is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Converts into the transport request, carrying metadata and the
    /// remaining time as the `grpc-timeout`.
    #[must_use]
    pub fn into_tonic(self) -> tonic::Request<M> {
        let remaining = self
            .effective_deadline()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()));
        let mut request = tonic::Request::new(self.message);
        *request.metadata_mut() = self.metadata;
        if let Some(remaining) = remaining {
            request.set_timeout(remaining.max(Duration::from_millis(1)));
        }
        request
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn effective_deadline_is_the_earliest() {
        let ctx = RequestContext::new().with_timeout(Duration::from_secs(2));
        let mut req = RpcRequest::new("test.Method", ctx, ());
        assert_eq!(req.effective_deadline(), req.ctx.deadline);

        let sooner = Instant::now() + Duration::from_millis(500);
        req.deadline = Some(sooner);
        assert_eq!(req.effective_deadline(), Some(sooner));
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_when_cancelled_or_expired() {
        let req = RpcRequest::new("test.Method", RequestContext::new(), ());
        assert!(!req.is_abandoned());
        req.ctx.cancellation().cancel();
        assert!(req.is_abandoned());

        let ctx = RequestContext::new().with_timeout(Duration::from_millis(10));
        let req = RpcRequest::new("test.Method", ctx, ());
        tokio::time::advance(Duration::from_millis(20)).await;
        assert!(req.is_abandoned());
    }

    #[test]
    fn into_tonic_keeps_metadata() {
        let mut req = RpcRequest::new("test.Method", RequestContext::new(), 7_u32);
        req.metadata.insert("x-request-id", "abc".parse().unwrap());
        let tonic_req = req.into_tonic();
        let value = tonic_req.metadata().get("x-request-id").unwrap();
        assert_eq!(value.to_str().unwrap(), "abc");
        assert_eq!(*tonic_req.get_ref(), 7);
    }
}
