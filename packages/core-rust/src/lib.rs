//! Inventory Core — device model, typed commands and queries, and the
//! request-scoped context shared by every gateway layer.

pub mod context;
pub mod operation;
pub mod types;

pub use context::{CacheStatus, RequestContext};
pub use operation::{
    CheckHealth, CreateDevice, DeleteDevice, GetDevice, ListDevices, Mutation, Operation,
    OperationKind, PatchDevice, UpdateDevice,
};
pub use types::{Device, DevicePage, DeviceState, HealthReport};
