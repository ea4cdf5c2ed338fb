use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Outcome of the caching layer for one request.
///
/// Set by the caching decorator and read by outer layers (logging, metrics,
/// response headers) through the request context rather than the return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheStatus {
    /// Served from cache; the origin was not called.
    Hit,
    /// Not cached; served by the origin.
    Miss,
    /// Caching disabled or not attached for this request.
    Bypass,
    /// Served from an entry past its freshness window.
    Stale,
    /// The cache lookup failed and the origin failed as well.
    Error,
}

impl CacheStatus {
    /// Upper-case wire form, suitable for an `X-Cache-Status` header.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "HIT",
            Self::Miss => "MISS",
            Self::Bypass => "BYPASS",
            Self::Stale => "STALE",
            Self::Error => "ERROR",
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            Self::Hit => 1,
            Self::Miss => 2,
            Self::Bypass => 3,
            Self::Stale => 4,
            Self::Error => 5,
        }
    }

    fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Self::Hit),
            2 => Some(Self::Miss),
            3 => Some(Self::Bypass),
            4 => Some(Self::Stale),
            5 => Some(Self::Error),
            _ => None,
        }
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-request context threaded through every handler and outbound call.
///
/// Carries caller identifiers for propagation, the inbound deadline and
/// cancellation scope, and the request-scoped cache status slot. Clones share
/// the same cancellation token and cache status slot; use
/// [`RequestContext::detached`] for work that must outlive the request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Identifier of this inbound request. Generated when not supplied.
    pub request_id: String,
    /// Identifier correlating this request with upstream activity.
    pub correlation_id: Option<String>,
    /// Caller-supplied key making a mutation safe to replay.
    pub idempotency_key: Option<String>,
    /// Absolute point after which the inbound request is abandoned.
    pub deadline: Option<Instant>,
    cancellation: CancellationToken,
    cache_status: Arc<AtomicU8>,
}

impl RequestContext {
    /// Creates a context with a fresh UUID v4 request ID and no deadline.
    #[must_use]
    pub fn new() -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            correlation_id: None,
            idempotency_key: None,
            deadline: None,
            cancellation: CancellationToken::new(),
            cache_status: Arc::new(AtomicU8::new(0)),
        }
    }

    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    #[must_use]
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Sets an absolute deadline for the inbound request.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Sets the deadline to `timeout` from now.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Binds the context to an externally owned cancellation token, typically
    /// one cancelled when the client disconnects.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Cancellation scope of the inbound request.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Returns `true` once the deadline, if any, has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Time left before the deadline. `None` when no deadline is set.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Cache outcome recorded for this request, `Bypass` when none was recorded.
    #[must_use]
    pub fn cache_status(&self) -> CacheStatus {
        CacheStatus::from_u8(self.cache_status.load(Ordering::Acquire))
            .unwrap_or(CacheStatus::Bypass)
    }

    /// Records the cache outcome for this request. Visible to every clone.
    pub fn set_cache_status(&self, status: CacheStatus) {
        self.cache_status.store(status.to_u8(), Ordering::Release);
    }

    /// Derives a context for background work that must survive the request.
    ///
    /// Identifiers are kept for log correlation. The result has no deadline,
    /// a fresh cancellation token that nothing else holds, and its own cache
    /// status slot.
    #[must_use]
    pub fn detached(&self) -> Self {
        Self {
            request_id: self.request_id.clone(),
            correlation_id: self.correlation_id.clone(),
            idempotency_key: self.idempotency_key.clone(),
            deadline: None,
            cancellation: CancellationToken::new(),
            cache_status: Arc::new(AtomicU8::new(0)),
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}
