pub mod config;
pub mod descriptor_store;

pub use config::{DeviceDescriptor, FleetConfig, ScheduleConfig};
