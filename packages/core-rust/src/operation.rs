//! Typed commands and queries accepted by the gateway pipeline.
//!
//! Every operation is an immutable value implementing [`Operation`], which
//! fixes its output type and a stable name used for logging, metrics, and
//! span naming. Commands additionally implement [`Mutation`] so the write path
//! knows which cached entity they make stale.

use serde::{Deserialize, Serialize};

use crate::types::{Device, DevicePage, DeviceState, HealthReport};

/// Whether an operation reads or mutates remote state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Command,
    Query,
}

impl OperationKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Query => "query",
        }
    }
}

/// A closed, immutable request value with a fixed output type.
pub trait Operation: Send + Sync + 'static {
    /// Value produced on success.
    type Output: Send + Sync + 'static;

    /// Stable snake-case name (e.g. `"get_device"`).
    const NAME: &'static str;

    /// Command or query.
    const KIND: OperationKind;
}

/// A command whose success invalidates cached reads.
pub trait Mutation: Operation {
    /// Identifier of the single entity made stale by this command, if any.
    ///
    /// List entries are always stale after a mutation, so this only names the
    /// per-entity entry. Creates return `None`.
    fn affected_id(&self) -> Option<&str>;
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Register a new device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateDevice {
    pub name: String,
    pub brand: String,
    pub state: DeviceState,
}

/// Replace every mutable field of an existing device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateDevice {
    pub id: String,
    pub name: String,
    pub brand: String,
    pub state: DeviceState,
}

/// Change a subset of a device's fields. `None` leaves the field untouched.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PatchDevice {
    pub id: String,
    pub name: Option<String>,
    pub brand: Option<String>,
    pub state: Option<DeviceState>,
}

/// Remove a device. Outputs `true` when the remote service confirmed deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteDevice {
    pub id: String,
}

impl Operation for CreateDevice {
    type Output = Device;
    const NAME: &'static str = "create_device";
    const KIND: OperationKind = OperationKind::Command;
}

impl Operation for UpdateDevice {
    type Output = Device;
    const NAME: &'static str = "update_device";
    const KIND: OperationKind = OperationKind::Command;
}

impl Operation for PatchDevice {
    type Output = Device;
    const NAME: &'static str = "patch_device";
    const KIND: OperationKind = OperationKind::Command;
}

impl Operation for DeleteDevice {
    type Output = bool;
    const NAME: &'static str = "delete_device";
    const KIND: OperationKind = OperationKind::Command;
}

impl Mutation for CreateDevice {
    fn affected_id(&self) -> Option<&str> {
        None
    }
}

impl Mutation for UpdateDevice {
    fn affected_id(&self) -> Option<&str> {
        Some(&self.id)
    }
}

impl Mutation for PatchDevice {
    fn affected_id(&self) -> Option<&str> {
        Some(&self.id)
    }
}

impl Mutation for DeleteDevice {
    fn affected_id(&self) -> Option<&str> {
        Some(&self.id)
    }
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Fetch a single device by identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GetDevice {
    pub id: String,
}

/// List devices, optionally filtered by brand and state. Pages are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListDevices {
    pub brand: Option<String>,
    pub state: Option<DeviceState>,
    pub page: u32,
    pub page_size: u32,
}

impl Default for ListDevices {
    fn default() -> Self {
        Self {
            brand: None,
            state: None,
            page: 1,
            page_size: 20,
        }
    }
}

/// Probe the remote inventory service's health. Never cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CheckHealth;

impl Operation for GetDevice {
    type Output = Device;
    const NAME: &'static str = "get_device";
    const KIND: OperationKind = OperationKind::Query;
}

impl Operation for ListDevices {
    type Output = DevicePage;
    const NAME: &'static str = "list_devices";
    const KIND: OperationKind = OperationKind::Query;
}

impl Operation for CheckHealth {
    type Output = HealthReport;
    const NAME: &'static str = "check_health";
    const KIND: OperationKind = OperationKind::Query;
}
