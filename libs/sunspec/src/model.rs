//! SunSpec model identifiers and device kinds

use serde::{Deserialize, Serialize};
use std::fmt;

/// "SunS" at the start of the common block
pub const SUNSPEC_MARKER: u32 = 0x5375_6E53;

/// Immediate controls
pub const MODEL_CONTROLS: u16 = 123;
/// Basic storage controls
pub const MODEL_STORAGE: u16 = 124;
/// Multiple MPPT inverter extension
pub const MODEL_MPPT: u16 = 160;

/// Model id assumed when an inverter could not be identified
pub const DEFAULT_INVERTER_MODEL: u16 = 103;
/// Model id assumed when a meter could not be identified
pub const DEFAULT_METER_MODEL: u16 = 203;

/// Inverter models with integer + scale factor encoding
pub fn is_int_inverter_model(id: u16) -> bool {
    matches!(id, 101..=103)
}

/// Inverter models with float32 encoding
pub fn is_float_inverter_model(id: u16) -> bool {
    matches!(id, 111..=113)
}

pub fn is_meter_model(id: u16) -> bool {
    matches!(id, 201..=204)
}

/// Values accepted when identifying a device for the first time
pub fn is_discovery_model(id: u16) -> bool {
    is_int_inverter_model(id) || is_meter_model(id)
}

/// Values accepted when re-checking an already known device
pub fn is_known_model(id: u16) -> bool {
    is_int_inverter_model(id) || is_float_inverter_model(id) || is_meter_model(id)
}

/// Kind of device behind a unit id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Inverter,
    Meter,
}

impl DeviceType {
    pub fn from_model_id(id: u16) -> Option<Self> {
        if is_int_inverter_model(id) || is_float_inverter_model(id) {
            Some(Self::Inverter)
        } else if is_meter_model(id) {
            Some(Self::Meter)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inverter => "inverter",
            Self::Meter => "meter",
        }
    }

    pub fn default_model_id(&self) -> u16 {
        match self {
            Self::Inverter => DEFAULT_INVERTER_MODEL,
            Self::Meter => DEFAULT_METER_MODEL,
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
