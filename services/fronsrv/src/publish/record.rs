//! Records handed from the scheduler to the sinks

use std::fmt;

use serde::Serialize;
use sunspec::{
    EventRecord, ImmediateControls, InverterMeasurement, MeterMeasurement, MpptReading,
    StatusInfo, StorageReading,
};

/// Identity strings carried with every record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceIdentity {
    pub unit_id: u8,
    pub manufacturer: String,
    pub model: String,
    pub serial_number: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InverterRecord {
    pub identity: DeviceIdentity,
    pub model_id: u16,
    pub measurement: InverterMeasurement,
    pub status: StatusInfo,
    pub is_active: bool,
    pub events: Vec<EventRecord>,
    pub mppt: Option<MpptReading>,
    pub controls: Option<ImmediateControls>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeterRecord {
    pub identity: DeviceIdentity,
    pub model_id: u16,
    pub measurement: MeterMeasurement,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageRecord {
    pub identity: DeviceIdentity,
    pub reading: StorageReading,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Inverter,
    Meter,
    Storage,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inverter => "inverter",
            Self::Meter => "meter",
            Self::Storage => "storage",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PublishRecord {
    Inverter(InverterRecord),
    Meter(MeterRecord),
    Storage(StorageRecord),
}

impl PublishRecord {
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Inverter(_) => RecordKind::Inverter,
            Self::Meter(_) => RecordKind::Meter,
            Self::Storage(_) => RecordKind::Storage,
        }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        match self {
            Self::Inverter(r) => &r.identity,
            Self::Meter(r) => &r.identity,
            Self::Storage(r) => &r.identity,
        }
    }
}
