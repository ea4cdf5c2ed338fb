use serde::{Deserialize, Serialize};

/// Lifecycle state of a device as reported by the inventory service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceState {
    /// Free to be assigned.
    Available,
    /// Assigned and in use. The remote service refuses some mutations in this state.
    InUse,
    /// Retired or disabled.
    Inactive,
}

impl DeviceState {
    /// Stable lowercase name, used in cache keys and log fields.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::InUse => "in-use",
            Self::Inactive => "inactive",
        }
    }
}

/// A device record owned by the remote inventory service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Service-assigned identifier.
    pub id: String,
    /// Human-readable device name.
    pub name: String,
    /// Manufacturer brand.
    pub brand: String,
    /// Current lifecycle state.
    pub state: DeviceState,
    /// Creation time in milliseconds since the Unix epoch.
    pub created_at_ms: u64,
}

/// One page of a device listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevicePage {
    pub devices: Vec<Device>,
    /// Total number of devices matching the filter, across all pages.
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

/// Health of the remote inventory service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    /// `true` when the remote service reports itself as serving.
    pub serving: bool,
    /// Version string reported by the remote service, if any.
    pub version: Option<String>,
}
