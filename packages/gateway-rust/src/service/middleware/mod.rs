//! Handler decorators for the operation pipeline.
//!
//! - [`logging`]: One structured event per completed operation
//! - [`metrics`]: Operation timing and counting via the `metrics` facade
//! - [`trace`]: Operation span with request identifiers
//! - [`caching`]: Read-through cache with async write-back for queries
//! - [`pipeline`]: Composes the decorators into a single handler stack

pub mod caching;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod trace;

pub use caching::{Caching, CachingLayer};
pub use logging::{Logging, LoggingLayer};
pub use metrics::{Metrics, MetricsLayer};
pub use pipeline::{build_cached_pipeline, build_handler_pipeline};
pub use trace::{Traced, TracingLayer};
