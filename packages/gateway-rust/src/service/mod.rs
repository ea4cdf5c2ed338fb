//! Operation handling framework.
//!
//! 1. **Handlers** (`handler`): the `Handler<Op>` trait shared by base
//!    handlers and decorators
//! 2. **Middleware** (`middleware`): decorators (logging, metrics, tracing,
//!    caching) and the pipeline builders
//! 3. **Domain handlers** (`domain`): base handlers calling the inventory service
//! 4. **Background workers** (`worker`): invalidation and cache maintenance

pub mod domain;
pub mod handler;
pub mod middleware;
pub mod worker;

// Re-export key types for convenient access.
pub use domain::DeviceHandlers;
pub use handler::{handler_fn, Handler, HandlerFn, SharedHandler};
pub use middleware::{build_cached_pipeline, build_handler_pipeline};
pub use worker::{BackgroundRunnable, BackgroundWorker, WorkerError, WorkerHandle};
