//! Gateway configuration.
//!
//! [`GatewayConfig`] is the validated, immutable form built once at startup.
//! [`GatewaySettings`] is the flat, millisecond-based shape a configuration
//! loader deserializes into; convert with `GatewayConfig::from`.

use std::time::Duration;

use serde::Deserialize;

/// Read-through caching policy for query handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// When `false`, cached pipelines bypass the cache entirely.
    pub enabled: bool,
    /// Lifetime of entries written back after a miss.
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(60),
        }
    }
}

/// Circuit breaker settings for one remote dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Name used in logs and the state gauge.
    pub name: String,
    /// When `false`, no breaker is constructed and calls pass straight through.
    pub enabled: bool,
    /// Probes admitted while half-open, and consecutive successes needed to close.
    pub max_requests: u32,
    /// Period after which closed-state counters reset. Zero never resets.
    pub interval: Duration,
    /// Time spent open before probing.
    pub timeout: Duration,
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
}

impl CircuitBreakerConfig {
    /// Returns the config with `max_requests == 0` raised to 1.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if self.max_requests == 0 {
            self.max_requests = 1;
        }
        self
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            name: "inventory-service".to_string(),
            enabled: true,
            max_requests: 1,
            interval: Duration::from_secs(60),
            timeout: Duration::from_secs(30),
            failure_threshold: 5,
        }
    }
}

/// Exponential backoff between retry attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Growth factor applied per retry.
    pub multiplier: f64,
    /// Fraction of the delay randomly added or subtracted, in `0.0..=1.0`.
    pub jitter: f64,
    /// Upper bound for any single delay, jitter included.
    pub max_delay: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            multiplier: 1.6,
            jitter: 0.2,
            max_delay: Duration::from_secs(5),
        }
    }
}

/// Retry policy for outbound calls.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt. Zero disables retrying.
    pub max_retries: u32,
    pub backoff: BackoffConfig,
}

impl RetryConfig {
    /// A policy that never retries.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            backoff: BackoffConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Outbound RPC client settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcClientConfig {
    /// Per-call deadline. Zero leaves only the inbound request's deadline.
    pub call_timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for RpcClientConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(5),
            retry: RetryConfig::default(),
        }
    }
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    pub cache: CacheConfig,
    pub breaker: CircuitBreakerConfig,
    pub rpc: RpcClientConfig,
    /// Prefix prepended to every cache key owned by the gateway.
    pub cache_key_prefix: String,
    /// Interval between expired-entry sweeps of the cache store.
    pub maintenance_interval: Duration,
    /// Capacity of the invalidation queue. Invalidations beyond it are dropped.
    pub invalidation_queue_capacity: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            breaker: CircuitBreakerConfig::default(),
            rpc: RpcClientConfig::default(),
            cache_key_prefix: "inventory:".to_string(),
            maintenance_interval: Duration::from_secs(60),
            invalidation_queue_capacity: 256,
        }
    }
}

// ---------------------------------------------------------------------------
// Deserializable settings
// ---------------------------------------------------------------------------

/// Flat configuration shape with durations in milliseconds.
///
/// Every field is optional in the source document; missing fields take the
/// values of [`GatewayConfig::default`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    pub cache_enabled: bool,
    pub cache_ttl_ms: u64,
    pub cache_key_prefix: String,
    pub breaker_name: String,
    pub breaker_enabled: bool,
    pub breaker_max_requests: u32,
    pub breaker_interval_ms: u64,
    pub breaker_timeout_ms: u64,
    pub breaker_failure_threshold: u32,
    pub rpc_timeout_ms: u64,
    pub retry_max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_multiplier: f64,
    pub retry_jitter: f64,
    pub retry_max_delay_ms: u64,
    pub maintenance_interval_ms: u64,
    pub invalidation_queue_capacity: usize,
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl Default for GatewaySettings {
    fn default() -> Self {
        let config = GatewayConfig::default();
        Self {
            cache_enabled: config.cache.enabled,
            cache_ttl_ms: millis(config.cache.ttl),
            cache_key_prefix: config.cache_key_prefix,
            breaker_name: config.breaker.name,
            breaker_enabled: config.breaker.enabled,
            breaker_max_requests: config.breaker.max_requests,
            breaker_interval_ms: millis(config.breaker.interval),
            breaker_timeout_ms: millis(config.breaker.timeout),
            breaker_failure_threshold: config.breaker.failure_threshold,
            rpc_timeout_ms: millis(config.rpc.call_timeout),
            retry_max_retries: config.rpc.retry.max_retries,
            retry_base_delay_ms: millis(config.rpc.retry.backoff.base_delay),
            retry_multiplier: config.rpc.retry.backoff.multiplier,
            retry_jitter: config.rpc.retry.backoff.jitter,
            retry_max_delay_ms: millis(config.rpc.retry.backoff.max_delay),
            maintenance_interval_ms: millis(config.maintenance_interval),
            invalidation_queue_capacity: config.invalidation_queue_capacity,
        }
    }
}

impl From<GatewaySettings> for GatewayConfig {
    fn from(s: GatewaySettings) -> Self {
        Self {
            cache: CacheConfig {
                enabled: s.cache_enabled,
                ttl: Duration::from_millis(s.cache_ttl_ms),
            },
            breaker: CircuitBreakerConfig {
                name: s.breaker_name,
                enabled: s.breaker_enabled,
                max_requests: s.breaker_max_requests,
                interval: Duration::from_millis(s.breaker_interval_ms),
                timeout: Duration::from_millis(s.breaker_timeout_ms),
                failure_threshold: s.breaker_failure_threshold,
            }
            .normalized(),
            rpc: RpcClientConfig {
                call_timeout: Duration::from_millis(s.rpc_timeout_ms),
                retry: RetryConfig {
                    max_retries: s.retry_max_retries,
                    backoff: BackoffConfig {
                        base_delay: Duration::from_millis(s.retry_base_delay_ms),
                        multiplier: s.retry_multiplier,
                        jitter: s.retry_jitter.clamp(0.0, 1.0),
                        max_delay: Duration::from_millis(s.retry_max_delay_ms),
                    },
                },
            },
            cache_key_prefix: s.cache_key_prefix,
            maintenance_interval: Duration::from_millis(s.maintenance_interval_ms.max(1)),
            invalidation_queue_capacity: s.invalidation_queue_capacity.max(1),
        }
    }
}
