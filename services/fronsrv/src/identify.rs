//! Device discovery
//!
//! Reads the SunSpec common block of a unit, then the id of the model that
//! follows it. The model id register is read on a fresh socket: on a reused
//! one the DataManager often returns bytes left over from the common block
//! (`0x5365`, "Se").

use std::sync::Arc;
use std::time::Duration;

use sunspec::model::{is_discovery_model, DeviceType, MODEL_STORAGE};
use sunspec::{decode_common, InverterType, RegisterMap, COMMON_BLOCK_LEN};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::device::{DeviceDescriptor, DeviceFilter};
use crate::modbus::GatewayConnection;

/// Settle time after a reset before reading a model id
pub const MODEL_ID_SETTLE: Duration = Duration::from_millis(300);
/// Pause before the storage model probe
pub const STORAGE_PROBE_DELAY: Duration = Duration::from_millis(100);
/// Pause between two devices during discovery
pub const DISCOVERY_PAUSE: Duration = Duration::from_millis(500);
/// Reads of the model id register before giving up
pub const MODEL_ID_ATTEMPTS: u32 = 3;

/// Devices found by [`DeviceIdentifier::discover`]
#[derive(Debug, Clone, Default)]
pub struct Discovered {
    pub inverters: Vec<DeviceDescriptor>,
    pub meters: Vec<DeviceDescriptor>,
}

impl Discovered {
    pub fn is_empty(&self) -> bool {
        self.inverters.is_empty() && self.meters.is_empty()
    }
}

pub struct DeviceIdentifier {
    connection: Arc<GatewayConnection>,
    map: Arc<RegisterMap>,
}

impl DeviceIdentifier {
    pub fn new(connection: Arc<GatewayConnection>, map: Arc<RegisterMap>) -> Self {
        Self { connection, map }
    }

    /// Identify one unit
    ///
    /// `None` when the unit does not answer or is not SunSpec. A unit whose
    /// model id cannot be read is still returned, without type or model id.
    pub async fn identify(&self, unit_id: u8) -> Option<DeviceDescriptor> {
        let block = self.map.common;
        let regs = self
            .connection
            .read_registers(block.address, block.length, unit_id)
            .await?;
        if regs.len() < COMMON_BLOCK_LEN {
            debug!("Unit {}: common block too short ({} registers)", unit_id, regs.len());
            return None;
        }
        let common = match decode_common(&regs) {
            Ok(common) => common,
            Err(e) => {
                debug!("Unit {}: not a SunSpec device: {}", unit_id, e);
                return None;
            },
        };

        let mut device = DeviceDescriptor {
            unit_id,
            manufacturer: common.manufacturer,
            model: common.model,
            version: common.version,
            serial_number: common.serial_number,
            ..Default::default()
        };

        self.connection.reset().await;
        sleep(MODEL_ID_SETTLE).await;

        let model_id = self.read_model_id(unit_id).await;
        if let Some(id) = model_id {
            device.model_id = Some(id);
            device.device_type = DeviceType::from_model_id(id);
            if device.device_type == Some(DeviceType::Inverter) {
                device.inverter_type = InverterType::detect(&device.model);
            }
        }

        info!(
            "Device {}: {} {} model_id={:?} (SN: {})",
            unit_id, device.manufacturer, device.model, device.model_id, device.serial_number
        );
        Some(device)
    }

    /// Model id register, retried while it holds residue
    async fn read_model_id(&self, unit_id: u8) -> Option<u16> {
        let block = self.map.model_id;
        for attempt in 1..=MODEL_ID_ATTEMPTS {
            if let Some(value) = self
                .connection
                .read_registers(block.address, 1, unit_id)
                .await
                .and_then(|regs| regs.first().copied())
            {
                if is_discovery_model(value) {
                    return Some(value);
                }
                debug!(
                    "Device {}: invalid model_id {} (0x{:04X}), retry {}/{}",
                    unit_id, value, value, attempt, MODEL_ID_ATTEMPTS
                );
                self.connection.reset().await;
                sleep(MODEL_ID_SETTLE).await;
            }
        }
        None
    }

    /// Whether the inverter exposes the storage model
    pub async fn probe_storage(&self, unit_id: u8) -> bool {
        sleep(STORAGE_PROBE_DELAY).await;
        let block = self.map.storage_header;
        let found = self
            .connection
            .read_registers(block.address, block.length, unit_id)
            .await
            .is_some_and(|regs| regs.len() >= 2 && regs[0] == MODEL_STORAGE);
        if found {
            info!("Device {}: storage support detected (model {})", unit_id, MODEL_STORAGE);
        }
        found
    }

    /// Identify every configured unit admitted by `filter`
    ///
    /// Units keep the role they were configured with; a unit that does not
    /// answer is left out.
    pub async fn discover(&self, inverters: &[u8], meters: &[u8], filter: DeviceFilter) -> Discovered {
        let mut found = Discovered::default();
        info!("Discovering devices...");

        if filter.includes(DeviceType::Inverter) {
            for &unit_id in inverters {
                match self.identify(unit_id).await {
                    Some(mut device) => {
                        if device.device_type == Some(DeviceType::Inverter) {
                            device.has_storage = self.probe_storage(unit_id).await;
                        } else if let Some(other) = device.device_type {
                            warn!("Unit {} configured as inverter identifies as {}", unit_id, other);
                        }
                        found.inverters.push(device);
                    },
                    None => warn!("No inverter at ID {}", unit_id),
                }
                sleep(DISCOVERY_PAUSE).await;
            }
        }

        if filter.includes(DeviceType::Meter) {
            for &unit_id in meters {
                match self.identify(unit_id).await {
                    Some(device) => {
                        if let Some(other) = device.device_type.filter(|t| *t != DeviceType::Meter) {
                            warn!("Unit {} configured as meter identifies as {}", unit_id, other);
                        }
                        found.meters.push(device);
                    },
                    None => warn!("No meter at ID {}", unit_id),
                }
                sleep(DISCOVERY_PAUSE).await;
            }
        }

        let storage = found.inverters.iter().filter(|d| d.has_storage).count();
        info!(
            "Found: {} inverter(s), {} meter(s), {} with storage",
            found.inverters.len(),
            found.meters.len(),
            storage
        );
        found
    }
}
