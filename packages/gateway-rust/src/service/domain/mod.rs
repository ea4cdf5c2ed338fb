//! Domain handlers backing the pipelines.

pub mod devices;

pub use devices::DeviceHandlers;
