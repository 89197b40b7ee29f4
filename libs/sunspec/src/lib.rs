//! SunSpec register decoding
//!
//! Pure functions that turn raw holding-register arrays read from a Fronius
//! DataManager into typed records. Nothing here performs I/O or keeps state;
//! the polling service owns the connection and hands blocks in.
//!
//! Conventions shared by every decoder:
//! - addresses in [`RegisterMap`] are one-based (`40072`)
//! - a point whose raw value is the type's "not implemented" sentinel
//!   decodes to `None`
//! - value = `raw * 10^sf`, with `sf` read as a signed register from the same
//!   block

pub mod common_block;
pub mod controls;
pub mod error;
pub mod events;
pub mod inverter;
pub mod map;
pub mod meter;
pub mod model;
pub mod mppt;
pub mod scale;
pub mod status;
pub mod storage;
pub mod strings;

pub use common_block::{decode_common, CommonBlock, COMMON_BLOCK_LEN};
pub use controls::{decode_controls, ImmediateControls};
pub use error::{DecodeError, DecodeResult};
pub use events::{decode_events, EventRecord, InverterFamily, InverterType};
pub use inverter::{decode_inverter, InverterMeasurement};
pub use map::{Block, RegisterMap};
pub use meter::{decode_meter, MeterMeasurement};
pub use model::DeviceType;
pub use mppt::{decode_mppt, MpptModule, MpptReading};
pub use status::{decode_status, is_active, ChargeStatus, StatusInfo};
pub use storage::{decode_storage, StorageReading};
