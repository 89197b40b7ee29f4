//! Register map
//!
//! Start addresses and lengths of every block the bridge reads, in one-based
//! ("40072") notation. The built-in map matches Fronius DataManager firmware;
//! a JSON override can be loaded once at startup.

use crate::error::{DecodeError, DecodeResult};
use crate::model::{is_float_inverter_model, DeviceType};
use serde::{Deserialize, Serialize};

/// One contiguous register read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub address: u16,
    pub length: u16,
}

impl Block {
    pub const fn new(address: u16, length: u16) -> Self {
        Self { address, length }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegisterMap {
    /// Common model (marker, manufacturer, model, version, serial)
    pub common: Block,
    /// Id register of the first model after the common block
    pub model_id: Block,
    /// Inverter 101-103 body
    pub inverter: Block,
    /// Inverter 111-113 body
    pub inverter_float: Block,
    /// Meter 201-204 body
    pub meter: Block,
    /// Model 123 including its header
    pub controls: Block,
    /// Model 160 including its header
    pub mppt: Block,
    /// Header of model 124
    pub storage_header: Block,
    /// Body of model 124
    pub storage: Block,
}

impl Default for RegisterMap {
    fn default() -> Self {
        Self {
            common: Block::new(40001, 69),
            model_id: Block::new(40070, 1),
            inverter: Block::new(40072, 50),
            inverter_float: Block::new(40072, 60),
            meter: Block::new(40072, 53),
            controls: Block::new(40228, 26),
            mppt: Block::new(40254, 48),
            storage_header: Block::new(40341, 2),
            storage: Block::new(40343, 24),
        }
    }
}

impl RegisterMap {
    /// Parse a JSON override; fields left out keep their defaults
    pub fn from_json(text: &str) -> DecodeResult<Self> {
        let map: Self =
            serde_json::from_str(text).map_err(|e| DecodeError::InvalidMap(e.to_string()))?;
        map.validate()?;
        Ok(map)
    }

    /// Every block must be non-empty, one-based and fit a single read
    pub fn validate(&self) -> DecodeResult<()> {
        let blocks = [
            ("common", self.common),
            ("model_id", self.model_id),
            ("inverter", self.inverter),
            ("inverter_float", self.inverter_float),
            ("meter", self.meter),
            ("controls", self.controls),
            ("mppt", self.mppt),
            ("storage_header", self.storage_header),
            ("storage", self.storage),
        ];
        for (name, block) in blocks {
            if block.address == 0 {
                return Err(DecodeError::InvalidMap(format!(
                    "{name}: address must be one-based"
                )));
            }
            if block.length == 0 || block.length > 125 {
                return Err(DecodeError::InvalidMap(format!(
                    "{name}: length {} outside 1..=125",
                    block.length
                )));
            }
        }
        Ok(())
    }

    /// Measurement block for a device of the given kind and model
    pub fn measurement_block(&self, device_type: DeviceType, model_id: u16) -> Block {
        match device_type {
            DeviceType::Inverter if is_float_inverter_model(model_id) => self.inverter_float,
            DeviceType::Inverter => self.inverter,
            DeviceType::Meter => self.meter,
        }
    }
}
