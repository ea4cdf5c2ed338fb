//! Remote inventory service capability.

use async_trait::async_trait;
use inventory_core::{
    CheckHealth, CreateDevice, DeleteDevice, Device, DevicePage, GetDevice, HealthReport,
    ListDevices, PatchDevice, UpdateDevice,
};
use tonic::{Request, Response, Status};

/// Fully qualified method names, used for logs, metrics, and error messages.
pub mod methods {
    pub const CREATE_DEVICE: &str = "inventory.DeviceService/CreateDevice";
    pub const GET_DEVICE: &str = "inventory.DeviceService/GetDevice";
    pub const LIST_DEVICES: &str = "inventory.DeviceService/ListDevices";
    pub const UPDATE_DEVICE: &str = "inventory.DeviceService/UpdateDevice";
    pub const PATCH_DEVICE: &str = "inventory.DeviceService/PatchDevice";
    pub const DELETE_DEVICE: &str = "inventory.DeviceService/DeleteDevice";
    pub const CHECK_HEALTH: &str = "grpc.health.v1.Health/Check";
}

/// One typed call per remote operation, shaped like a generated tonic client.
///
/// Implementations send the request's metadata and `grpc-timeout` as given;
/// deadlines, identifier propagation, and retries are applied before the
/// request reaches the transport.
#[async_trait]
pub trait DeviceTransport: Send + Sync + 'static {
    async fn create_device(&self, request: Request<CreateDevice>)
        -> Result<Response<Device>, Status>;

    async fn get_device(&self, request: Request<GetDevice>) -> Result<Response<Device>, Status>;

    async fn list_devices(
        &self,
        request: Request<ListDevices>,
    ) -> Result<Response<DevicePage>, Status>;

    async fn update_device(&self, request: Request<UpdateDevice>)
        -> Result<Response<Device>, Status>;

    async fn patch_device(&self, request: Request<PatchDevice>) -> Result<Response<Device>, Status>;

    /// Returns `true` when a device was deleted.
    async fn delete_device(&self, request: Request<DeleteDevice>) -> Result<Response<bool>, Status>;

    async fn check_health(
        &self,
        request: Request<CheckHealth>,
    ) -> Result<Response<HealthReport>, Status>;
}
