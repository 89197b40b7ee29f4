//! Fronius SunSpec bridge
//!
//! Polls Fronius inverters and smart meters through a DataManager's
//! Modbus/TCP gateway, decodes the SunSpec blocks and forwards the values to
//! MQTT and InfluxDB.

pub mod config;
pub mod device;
pub mod health;
pub mod identify;
pub mod modbus;
pub mod publish;
pub mod runtime;
pub mod scheduler;
pub mod service;

pub use config::AppConfig;
pub use device::{DeviceDescriptor, DeviceFilter};
pub use service::{Bridge, Sinks};
