//! Inventory Gateway — request-handling core in front of the remote device
//! inventory service.
//!
//! Every operation runs through a decorated handler pipeline (logging,
//! metrics, tracing, and for queries read-through caching) down to a base
//! handler that calls the remote service through a circuit breaker and an
//! interceptor chain (deadline, identifier propagation, retry).

pub mod breaker;
pub mod cache;
pub mod config;
pub mod error;
pub mod gateway;
pub mod observability;
pub mod rpc;
pub mod service;

pub use breaker::{CircuitBreaker, CircuitState, Counts, ErrorClass};
pub use cache::{CacheError, CacheStore, DeviceCache, MemoryCacheStore, QueryCache};
pub use config::{
    BackoffConfig, CacheConfig, CircuitBreakerConfig, GatewayConfig, GatewaySettings,
    RetryConfig, RpcClientConfig,
};
pub use error::{BreakerError, FieldViolation, GatewayError};
pub use gateway::{DevicePipelines, Gateway, PipelineFor};
pub use rpc::{DeviceTransport, InventoryClient};
pub use service::{Handler, SharedHandler};
