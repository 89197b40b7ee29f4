//! Device runtime tracking and connection retry

pub mod reconnect;
pub mod state;

pub use reconnect::{ReconnectError, ReconnectHelper, ReconnectPolicy};
pub use state::{
    backoff_delay, AggregateSnapshot, AggregateStatus, DeviceKey, DeviceRuntimeSnapshot,
    DeviceRuntimeState, DeviceStatus, FailureOutcome, RuntimeRegistry, RuntimeSnapshot,
    VerifyOutcome,
};
