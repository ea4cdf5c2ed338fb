//! Read-through cache capability for query results.
//!
//! Two levels:
//! - [`CacheStore`]: opaque key/value backend holding serialized entries with
//!   a TTL. [`MemoryCacheStore`] is the in-process implementation.
//! - [`QueryCache`]: typed view keyed by query value. [`DeviceCache`] maps the
//!   device queries onto a store and owns key layout and invalidation.

pub mod device;
pub mod invalidation;
pub mod memory;

use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use inventory_core::{Operation, RequestContext};

pub use device::DeviceCache;
pub use invalidation::{CacheInvalidator, InvalidationRunnable, InvalidationTask};
pub use memory::MemoryCacheStore;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures raised by cache backends. Never surfaced to callers of the
/// pipeline; the caching decorator logs them and falls through to the origin.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
    #[error("cache entry serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid cache key pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

// ---------------------------------------------------------------------------
// CacheStore
// ---------------------------------------------------------------------------

/// A live entry read back from a [`CacheStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    /// Serialized value as written.
    pub value: String,
    /// Time left before the entry expires. `None` never expires.
    pub remaining_ttl: Option<Duration>,
    /// Wall-clock time of the `set` that wrote the entry.
    pub cached_at: SystemTime,
}

/// Opaque key/value backend with per-entry TTL.
///
/// Implementations must never return expired entries from `get`.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Returns the live entry for `key`, or `None` on a miss.
    async fn get(&self, key: &str) -> Result<Option<StoredEntry>, CacheError>;

    /// Stores `value` under `key`. A zero `ttl` never expires.
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    /// Removes `key`. Returns whether an entry was present.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Removes every key matching a glob `pattern` (`*` matches any run of
    /// characters, `?` exactly one). Returns the number of removed keys.
    async fn delete_pattern(&self, pattern: &str) -> Result<u64, CacheError>;

    /// Drops entries whose TTL has elapsed. Returns the number dropped.
    async fn purge_expired(&self) -> Result<u64, CacheError>;
}

// ---------------------------------------------------------------------------
// QueryCache
// ---------------------------------------------------------------------------

/// Outcome of a typed cache lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheResult<T> {
    /// The cached value on a hit.
    pub data: Option<T>,
    /// Whether the lookup found a live entry.
    pub hit: bool,
    /// Fully qualified key that was looked up.
    pub key: String,
    /// Time left before the entry expires, on a hit.
    pub ttl: Option<Duration>,
    /// When the entry was written, on a hit.
    pub cached_at: Option<SystemTime>,
}

impl<T> CacheResult<T> {
    #[must_use]
    pub fn hit(key: String, data: T, ttl: Option<Duration>, cached_at: SystemTime) -> Self {
        Self {
            data: Some(data),
            hit: true,
            key,
            ttl,
            cached_at: Some(cached_at),
        }
    }

    #[must_use]
    pub fn miss(key: String) -> Self {
        Self {
            data: None,
            hit: false,
            key,
            ttl: None,
            cached_at: None,
        }
    }

    /// The cached value, only when this is a true hit.
    #[must_use]
    pub fn into_hit(self) -> Option<T> {
        if self.hit {
            self.data
        } else {
            None
        }
    }
}

/// Typed cache for the results of query `Q`.
#[async_trait]
pub trait QueryCache<Q: Operation>: Send + Sync {
    /// Looks up the cached result of `query`.
    async fn get(
        &self,
        ctx: &RequestContext,
        query: &Q,
    ) -> Result<CacheResult<Q::Output>, CacheError>;

    /// Stores `value` as the result of `query` for `ttl`.
    async fn set(
        &self,
        ctx: &RequestContext,
        query: &Q,
        value: &Q::Output,
        ttl: Duration,
    ) -> Result<(), CacheError>;
}
