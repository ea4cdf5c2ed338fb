//! Outbound RPC plumbing: the interceptor chain, status mapping, and the
//! typed inventory client built on top of them.

pub mod client;
pub mod deadline;
pub mod propagate;
pub mod request;
pub mod retry;
pub mod status;
pub mod transport;

pub use client::InventoryClient;
pub use deadline::{DeadlineLayer, DeadlineService};
pub use propagate::{PropagateLayer, PropagateService, PropagatedField, MAX_PROPAGATED_LEN};
pub use request::RpcRequest;
pub use retry::{backoff_delay, RetryLayer, RetryService};
pub use status::{is_retryable, map_result, map_status};
pub use transport::{methods, DeviceTransport};
