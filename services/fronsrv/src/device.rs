//! Discovered device identity

use serde::Serialize;
use sunspec::model::DeviceType;
use sunspec::InverterType;

use crate::publish::DeviceIdentity;

/// Which device kinds to discover and poll
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum DeviceFilter {
    #[default]
    All,
    Inverter,
    Meter,
}

impl DeviceFilter {
    pub fn includes(self, device_type: DeviceType) -> bool {
        match self {
            Self::All => true,
            Self::Inverter => device_type == DeviceType::Inverter,
            Self::Meter => device_type == DeviceType::Meter,
        }
    }
}

/// Identity of one unit behind the gateway
///
/// `device_type` and `model_id` stay `None` when the model register could
/// not be read during discovery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceDescriptor {
    pub unit_id: u8,
    pub device_type: Option<DeviceType>,
    pub manufacturer: String,
    pub model: String,
    pub version: String,
    pub model_id: Option<u16>,
    pub serial_number: String,
    pub inverter_type: InverterType,
    pub has_storage: bool,
}

impl DeviceDescriptor {
    /// Model id to decode with, falling back to the default of `device_type`
    pub fn effective_model_id(&self, device_type: DeviceType) -> u16 {
        self.model_id.unwrap_or_else(|| device_type.default_model_id())
    }

    pub fn is_identified(&self) -> bool {
        self.device_type.is_some()
    }

    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity {
            unit_id: self.unit_id,
            manufacturer: self.manufacturer.clone(),
            model: self.model.clone(),
            serial_number: self.serial_number.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_model_id() {
        let mut d = DeviceDescriptor {
            unit_id: 1,
            ..Default::default()
        };
        assert_eq!(d.effective_model_id(DeviceType::Inverter), 103);
        assert_eq!(d.effective_model_id(DeviceType::Meter), 203);
        d.model_id = Some(113);
        assert_eq!(d.effective_model_id(DeviceType::Inverter), 113);
    }

    #[test]
    fn test_filter() {
        assert!(DeviceFilter::All.includes(DeviceType::Meter));
        assert!(DeviceFilter::Inverter.includes(DeviceType::Inverter));
        assert!(!DeviceFilter::Inverter.includes(DeviceType::Meter));
        assert!(!DeviceFilter::Meter.includes(DeviceType::Inverter));
    }
}
