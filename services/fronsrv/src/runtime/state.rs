//! Per-device runtime bookkeeping
//!
//! One entry per `(device type, unit id)`, created on the first poll attempt
//! and kept for the life of the process. The lock is never held across I/O.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use sunspec::model::{is_known_model, DeviceType};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Consecutive errors that take a device offline
pub const OFFLINE_THRESHOLD: u32 = 3;
/// Consecutive errors that trigger a model id re-check
pub const VERIFY_ON_ERRORS: u32 = 5;
/// Spacing of periodic model id re-checks
pub const VERIFY_INTERVAL: Duration = Duration::from_secs(3600);

const BACKOFF_BASE_SECS: u64 = 10;
const BACKOFF_MAX_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DeviceKey {
    pub device_type: DeviceType,
    pub unit_id: u8,
}

impl DeviceKey {
    pub fn new(device_type: DeviceType, unit_id: u8) -> Self {
        Self {
            device_type,
            unit_id,
        }
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.device_type, self.unit_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    #[default]
    Offline,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateStatus {
    Online,
    Partial,
    Offline,
}

impl AggregateStatus {
    pub fn from_counts(online: usize, total: usize) -> Self {
        if total == 0 || online == 0 {
            Self::Offline
        } else if online == total {
            Self::Online
        } else {
            Self::Partial
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Partial => "partial",
            Self::Offline => "offline",
        }
    }
}

/// Backoff applied after `consecutive_errors` failures in a row
pub fn backoff_delay(consecutive_errors: u32) -> Duration {
    if consecutive_errors < OFFLINE_THRESHOLD {
        return Duration::ZERO;
    }
    let extra = (consecutive_errors - OFFLINE_THRESHOLD).min(6);
    Duration::from_secs((BACKOFF_BASE_SECS << extra).min(BACKOFF_MAX_SECS))
}

#[derive(Debug, Clone, Default)]
pub struct DeviceRuntimeState {
    pub status: DeviceStatus,
    pub last_seen: Option<DateTime<Utc>>,
    pub read_errors: u64,
    pub consecutive_errors: u32,
    pub model_id: Option<u16>,
    /// Last re-check that returned a valid model id
    pub model_id_verified_at: Option<DateTime<Utc>>,
    /// Last re-check attempt, valid or not
    pub model_id_checked_at: Option<Instant>,
    pub backoff_until: Option<Instant>,
}

/// Result of [`RuntimeRegistry::record_failure`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureOutcome {
    pub consecutive_errors: u32,
    /// The device just crossed the offline threshold
    pub went_offline: bool,
    pub backoff: Duration,
    pub verify_model: bool,
}

/// Result of applying a model id re-read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// No answer from the device
    NoResponse,
    /// Value outside the known model set; stored id kept
    Invalid(u16),
    Confirmed(u16),
    Changed { old: Option<u16>, new: u16 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceRuntimeSnapshot {
    pub device_type: DeviceType,
    pub unit_id: u8,
    pub status: DeviceStatus,
    pub last_seen: Option<DateTime<Utc>>,
    pub read_errors: u64,
    pub consecutive_errors: u32,
    pub model_id: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AggregateSnapshot {
    pub online: usize,
    pub total: usize,
    pub status: AggregateStatus,
}

impl AggregateSnapshot {
    fn from_counts(online: usize, total: usize) -> Self {
        Self {
            online,
            total,
            status: AggregateStatus::from_counts(online, total),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuntimeSnapshot {
    pub inverter: AggregateSnapshot,
    pub meter: AggregateSnapshot,
    /// Ordered by device type, then unit id
    pub devices: Vec<DeviceRuntimeSnapshot>,
}

impl RuntimeSnapshot {
    pub fn aggregate(&self, device_type: DeviceType) -> AggregateSnapshot {
        match device_type {
            DeviceType::Inverter => self.inverter,
            DeviceType::Meter => self.meter,
        }
    }
}

#[derive(Debug)]
pub struct RuntimeRegistry {
    states: Mutex<HashMap<DeviceKey, DeviceRuntimeState>>,
    verify_interval: Duration,
}

impl Default for RuntimeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeRegistry {
    pub fn new() -> Self {
        Self::with_verify_interval(VERIFY_INTERVAL)
    }

    pub fn with_verify_interval(verify_interval: Duration) -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            verify_interval,
        }
    }

    fn entry(
        states: &mut HashMap<DeviceKey, DeviceRuntimeState>,
        key: DeviceKey,
        model_id: Option<u16>,
    ) -> &mut DeviceRuntimeState {
        states.entry(key).or_insert_with(|| {
            debug!("{}: initializing runtime state with model_id={:?}", key, model_id);
            DeviceRuntimeState {
                model_id,
                ..Default::default()
            }
        })
    }

    /// Mark a successful poll; returns whether a periodic model check is due
    ///
    /// The first success only stamps the check time.
    pub fn record_success(&self, key: DeviceKey, model_id: Option<u16>) -> bool {
        let now = Instant::now();
        let mut states = self.states.lock();
        let state = Self::entry(&mut states, key, model_id);
        state.status = DeviceStatus::Online;
        state.last_seen = Some(Utc::now());
        state.consecutive_errors = 0;
        state.backoff_until = None;

        match state.model_id_checked_at {
            None => {
                state.model_id_checked_at = Some(now);
                false
            },
            Some(checked) => now.duration_since(checked) >= self.verify_interval,
        }
    }

    pub fn record_failure(&self, key: DeviceKey, model_id: Option<u16>) -> FailureOutcome {
        let mut states = self.states.lock();
        let state = Self::entry(&mut states, key, model_id);
        state.read_errors += 1;
        state.consecutive_errors += 1;

        // Only a success resets the streak, so every outage passes through the threshold
        let went_offline = state.consecutive_errors == OFFLINE_THRESHOLD;
        let mut backoff = Duration::ZERO;
        if state.consecutive_errors >= OFFLINE_THRESHOLD {
            state.status = DeviceStatus::Offline;
            backoff = backoff_delay(state.consecutive_errors);
            if !backoff.is_zero() {
                state.backoff_until = Some(Instant::now() + backoff);
            }
        }

        FailureOutcome {
            consecutive_errors: state.consecutive_errors,
            went_offline,
            backoff,
            verify_model: state.consecutive_errors >= VERIFY_ON_ERRORS,
        }
    }

    pub fn in_backoff(&self, key: DeviceKey) -> bool {
        self.states
            .lock()
            .get(&key)
            .and_then(|s| s.backoff_until)
            .is_some_and(|until| Instant::now() < until)
    }

    /// Fold a model id re-read into the state
    pub fn apply_verification(&self, key: DeviceKey, observed: Option<u16>) -> VerifyOutcome {
        let mut states = self.states.lock();
        let state = Self::entry(&mut states, key, None);
        state.model_id_checked_at = Some(Instant::now());

        let Some(new) = observed else {
            return VerifyOutcome::NoResponse;
        };
        if !is_known_model(new) {
            return VerifyOutcome::Invalid(new);
        }

        let old = state.model_id;
        state.model_id = Some(new);
        state.model_id_verified_at = Some(Utc::now());
        match old {
            Some(old) if old == new => VerifyOutcome::Confirmed(new),
            None => VerifyOutcome::Confirmed(new),
            Some(_) => VerifyOutcome::Changed { old, new },
        }
    }

    pub fn get(&self, key: DeviceKey) -> Option<DeviceRuntimeState> {
        self.states.lock().get(&key).cloned()
    }

    pub fn snapshot(&self) -> RuntimeSnapshot {
        let states = self.states.lock();
        let mut devices: Vec<DeviceRuntimeSnapshot> = states
            .iter()
            .map(|(key, s)| DeviceRuntimeSnapshot {
                device_type: key.device_type,
                unit_id: key.unit_id,
                status: s.status,
                last_seen: s.last_seen,
                read_errors: s.read_errors,
                consecutive_errors: s.consecutive_errors,
                model_id: s.model_id,
            })
            .collect();
        drop(states);
        devices.sort_by_key(|d| (d.device_type, d.unit_id));

        let count = |device_type: DeviceType| {
            let of_type = devices.iter().filter(|d| d.device_type == device_type);
            let total = of_type.clone().count();
            let online = of_type.filter(|d| d.status == DeviceStatus::Online).count();
            AggregateSnapshot::from_counts(online, total)
        };

        RuntimeSnapshot {
            inverter: count(DeviceType::Inverter),
            meter: count(DeviceType::Meter),
            devices,
        }
    }
}

/// Log line for a failure outcome, shared by the poll paths
pub(crate) fn log_failure(key: DeviceKey, outcome: &FailureOutcome) {
    if outcome.went_offline {
        warn!(
            "{}: marked offline after {} consecutive errors",
            key, outcome.consecutive_errors
        );
    }
    if !outcome.backoff.is_zero() {
        debug!(
            "{}: backoff {}s after {} errors",
            key,
            outcome.backoff.as_secs(),
            outcome.consecutive_errors
        );
    }
}
