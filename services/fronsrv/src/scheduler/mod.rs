//! Polling scheduler

pub mod night;
pub mod poller;
pub mod probe;

pub use night::{is_night_hour, is_night_time};
pub use poller::{PollingScheduler, SchedulerSettings, SchedulerStatus};
pub use probe::{AlwaysReachable, HostProbe, PingProbe};
