//! Base handlers for device operations.
//!
//! Queries delegate straight to the inventory client. Commands delegate and,
//! on success, hand cache invalidation to the background worker before
//! returning.

use async_trait::async_trait;
use inventory_core::{
    CheckHealth, CreateDevice, DeleteDevice, GetDevice, ListDevices, Mutation, Operation,
    PatchDevice, RequestContext, UpdateDevice,
};

use crate::cache::CacheInvalidator;
use crate::error::GatewayError;
use crate::rpc::{DeviceTransport, InventoryClient};
use crate::service::handler::Handler;

/// Base handler for every device operation.
pub struct DeviceHandlers<T: ?Sized> {
    client: InventoryClient<T>,
    invalidator: Option<CacheInvalidator>,
}

impl<T: ?Sized> Clone for DeviceHandlers<T> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            invalidator: self.invalidator.clone(),
        }
    }
}

impl<T: DeviceTransport + ?Sized> DeviceHandlers<T> {
    /// `invalidator` is `None` when no cache is attached.
    #[must_use]
    pub fn new(client: InventoryClient<T>, invalidator: Option<CacheInvalidator>) -> Self {
        Self {
            client,
            invalidator,
        }
    }

    fn invalidate(&self, operation: &'static str, device_id: Option<&str>) {
        if let Some(invalidator) = &self.invalidator {
            invalidator.dispatch(operation, device_id);
        }
    }
}

// ---------------------------------------------------------------------------
// Handler impls
// ---------------------------------------------------------------------------

/// Query handler delegating to the client method of the same name.
macro_rules! query_handler {
    ($op:ty, $method:ident) => {
        #[async_trait]
        impl<T: DeviceTransport + ?Sized> Handler<$op> for DeviceHandlers<T> {
            async fn handle(
                &self,
                ctx: &RequestContext,
                op: $op,
            ) -> Result<<$op as Operation>::Output, GatewayError> {
                self.client.$method(ctx, op).await
            }
        }
    };
}

/// Command handler delegating to the client and invalidating on success.
macro_rules! command_handler {
    ($op:ty, $method:ident) => {
        #[async_trait]
        impl<T: DeviceTransport + ?Sized> Handler<$op> for DeviceHandlers<T> {
            async fn handle(
                &self,
                ctx: &RequestContext,
                op: $op,
            ) -> Result<<$op as Operation>::Output, GatewayError> {
                let affected = op.affected_id().map(str::to_string);
                let output = self.client.$method(ctx, op).await?;
                self.invalidate(<$op as Operation>::NAME, affected.as_deref());
                Ok(output)
            }
        }
    };
}

query_handler!(GetDevice, get_device);
query_handler!(ListDevices, list_devices);

command_handler!(CreateDevice, create_device);
command_handler!(UpdateDevice, update_device);
command_handler!(PatchDevice, patch_device);
command_handler!(DeleteDevice, delete_device);

#[async_trait]
impl<T: DeviceTransport + ?Sized> Handler<CheckHealth> for DeviceHandlers<T> {
    async fn handle(
        &self,
        ctx: &RequestContext,
        _op: CheckHealth,
    ) -> Result<<CheckHealth as Operation>::Output, GatewayError> {
        self.client.check_health(ctx).await
    }
}
