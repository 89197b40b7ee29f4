//! Continuous polling loop
//!
//! One task owns the gateway session and walks the discovered devices in a
//! fixed order, inverters first. The loop has two modes: ACTIVE polls every
//! `poll_delay`, SLEEP every `night_poll_interval`. Sleep is entered after
//! `failures_for_sleep` empty cycles (or at once when the host stops
//! answering pings at night) and left on the first cycle that publishes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use sunspec::model::DeviceType;
use sunspec::{
    decode_controls, decode_events, decode_inverter, decode_meter, decode_mppt, decode_status,
    decode_storage, is_active, Block, DecodeResult, ImmediateControls, MpptReading, RegisterMap,
};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::night;
use super::probe::HostProbe;
use crate::config::{DevicesConfig, ModbusConfig};
use crate::device::DeviceDescriptor;
use crate::identify::{Discovered, MODEL_ID_SETTLE};
use crate::modbus::GatewayConnection;
use crate::publish::{InverterRecord, MeterRecord, PublishRecord, PublishSink, StorageRecord};
use crate::runtime::state::log_failure;
use crate::runtime::{DeviceKey, RuntimeRegistry, RuntimeSnapshot, VerifyOutcome};

/// Attempts at the measurement block per poll
pub const MAIN_READ_ATTEMPTS: u32 = 3;
pub const MAIN_RETRY_DELAY: Duration = Duration::from_millis(500);
/// Settle time after the reset that precedes the MPPT read
pub const MPPT_SETTLE: Duration = Duration::from_millis(300);
/// Settle time after the reset that precedes the controls read
pub const CONTROLS_SETTLE: Duration = Duration::from_millis(500);
/// Attempts at the MPPT and controls blocks
pub const SECONDARY_READ_ATTEMPTS: u32 = 3;
pub const SECONDARY_RETRY_DELAY: Duration = Duration::from_secs(1);
/// Minimum spacing of controls reads per inverter
pub const CONTROLS_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub host: String,
    pub poll_delay: Duration,
    pub read_delay: Duration,
    pub night_mode_enabled: bool,
    pub night_start_hour: u32,
    pub night_end_hour: u32,
    pub night_poll_interval: Duration,
    pub ping_check_enabled: bool,
    pub failures_for_sleep: u32,
}

impl SchedulerSettings {
    pub fn from_config(modbus: &ModbusConfig, devices: &DevicesConfig) -> Self {
        Self {
            host: modbus.host.clone(),
            poll_delay: devices.poll_delay(),
            read_delay: devices.read_delay(),
            night_mode_enabled: modbus.night_mode_enabled,
            night_start_hour: modbus.night_start_hour,
            night_end_hour: modbus.night_end_hour,
            night_poll_interval: modbus.night_poll_interval(),
            ping_check_enabled: modbus.ping_check_enabled,
            failures_for_sleep: modbus.consecutive_failures_for_sleep.max(1),
        }
    }
}

/// Loop state for health reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerStatus {
    pub in_sleep_mode: bool,
    pub consecutive_failures: u32,
    pub last_successful_poll: Option<DateTime<Utc>>,
    pub is_night_time: bool,
    pub connected: bool,
}

#[derive(Debug, Default)]
struct CycleState {
    in_sleep_mode: bool,
    sleep_started: Option<Instant>,
    consecutive_failures: u32,
    last_successful_poll: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollOutcome {
    Published,
    Failed,
    /// Device under backoff, nothing read
    Skipped,
}

struct Inner {
    settings: SchedulerSettings,
    connection: Arc<GatewayConnection>,
    map: Arc<RegisterMap>,
    inverters: Mutex<Vec<DeviceDescriptor>>,
    meters: Mutex<Vec<DeviceDescriptor>>,
    sink: Arc<dyn PublishSink>,
    probe: Arc<dyn HostProbe>,
    runtime: RuntimeRegistry,
    cycle: Mutex<CycleState>,
    controls_read_at: Mutex<HashMap<u8, Instant>>,
}

pub struct PollingScheduler {
    inner: Arc<Inner>,
    token: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PollingScheduler {
    pub fn new(
        settings: SchedulerSettings,
        connection: Arc<GatewayConnection>,
        map: Arc<RegisterMap>,
        devices: Discovered,
        sink: Arc<dyn PublishSink>,
        probe: Arc<dyn HostProbe>,
    ) -> Self {
        Self::with_registry(
            settings,
            connection,
            map,
            devices,
            sink,
            probe,
            RuntimeRegistry::new(),
        )
    }

    pub fn with_registry(
        settings: SchedulerSettings,
        connection: Arc<GatewayConnection>,
        map: Arc<RegisterMap>,
        devices: Discovered,
        sink: Arc<dyn PublishSink>,
        probe: Arc<dyn HostProbe>,
        runtime: RuntimeRegistry,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings,
                connection,
                map,
                inverters: Mutex::new(devices.inverters),
                meters: Mutex::new(devices.meters),
                sink,
                probe,
                runtime,
                cycle: Mutex::new(CycleState::default()),
                controls_read_at: Mutex::new(HashMap::new()),
            }),
            token: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Spawn the polling task; a second call while running is ignored
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.is_some() {
            warn!("Poller already started");
            return;
        }
        let inner = Arc::clone(&self.inner);
        let token = self.token.clone();
        *task = Some(tokio::spawn(async move { inner.run(token).await }));
    }

    pub fn stop(&self) {
        if !self.token.is_cancelled() {
            info!("Stopping poller");
            self.token.cancel();
        }
    }

    pub async fn join(&self) {
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Polling task failed: {}", e);
            }
        }
    }

    /// Run a single cycle in the caller's task; returns the wait before the next one
    pub async fn run_cycle(&self) -> Duration {
        self.inner.run_cycle(&self.token).await
    }

    pub fn status(&self) -> SchedulerStatus {
        self.inner.status()
    }

    pub fn runtime_snapshot(&self) -> RuntimeSnapshot {
        self.inner.runtime.snapshot()
    }

    pub fn runtime(&self) -> &RuntimeRegistry {
        &self.inner.runtime
    }

    pub fn devices(&self, device_type: DeviceType) -> Vec<DeviceDescriptor> {
        self.inner.devices(device_type).lock().clone()
    }

    pub fn connection(&self) -> &Arc<GatewayConnection> {
        &self.inner.connection
    }
}

impl Drop for PollingScheduler {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Sleep unless cancelled first; returns true on cancellation
async fn wait_or_cancel(token: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        () = sleep(duration) => false,
        () = token.cancelled() => true,
    }
}

impl Inner {
    async fn run(self: Arc<Self>, token: CancellationToken) {
        let unit_ids = |list: &Mutex<Vec<DeviceDescriptor>>| -> Vec<u8> {
            list.lock().iter().map(|d| d.unit_id).collect()
        };
        info!(
            "Poller started for inverters {:?}, meters {:?}",
            unit_ids(&self.inverters),
            unit_ids(&self.meters)
        );
        info!("Poller: {:?} delay between devices", self.settings.poll_delay);
        if self.settings.night_mode_enabled {
            info!(
                "Night mode enabled ({}:00-{}:00)",
                self.settings.night_start_hour, self.settings.night_end_hour
            );
        }

        loop {
            let wait = self.run_cycle(&token).await;
            if token.is_cancelled() || wait_or_cancel(&token, wait).await {
                break;
            }
        }

        self.connection.disconnect().await;
        info!("Poller stopped");
    }

    async fn run_cycle(&self, token: &CancellationToken) -> Duration {
        let threshold = self.settings.failures_for_sleep;

        if self.settings.ping_check_enabled
            && !self.probe.is_reachable(&self.settings.host).await
        {
            if self.is_night_time() {
                self.enter_sleep("DataManager not responding (night time)");
            } else {
                let failures = self.count_failure();
                if failures >= threshold {
                    self.enter_sleep(&format!("DataManager not responding ({failures} failures)"));
                }
            }
            return self.poll_interval();
        }

        if !self.connection.is_connected() && !self.connection.connect().await {
            let failures = self.count_failure();
            if failures >= threshold {
                self.enter_sleep(&format!("Modbus connection failed ({failures} failures)"));
            }
            return self.poll_interval();
        }

        let (attempted, published) = self.poll_devices(token).await;

        if published > 0 {
            self.cycle_succeeded();
        } else if attempted > 0 {
            let failures = self.count_failure();
            debug!("Poll cycle failed ({} consecutive)", failures);
            if failures >= threshold {
                if self.is_night_time() {
                    self.enter_sleep("No data received (night time)");
                } else {
                    self.enter_sleep(&format!("No data after {failures} attempts"));
                }
            }
        }

        self.poll_interval()
    }

    /// Returns (devices attempted, devices published)
    async fn poll_devices(&self, token: &CancellationToken) -> (usize, usize) {
        let inverters = self.inverters.lock().clone();
        let meters = self.meters.lock().clone();
        let mut attempted = 0;
        let mut published = 0;

        let sweep = inverters
            .iter()
            .map(|d| (DeviceType::Inverter, d))
            .chain(meters.iter().map(|d| (DeviceType::Meter, d)));

        for (device_type, device) in sweep {
            if token.is_cancelled() {
                break;
            }
            let outcome = match device_type {
                DeviceType::Inverter => self.poll_inverter(device).await,
                DeviceType::Meter => self.poll_meter(device).await,
            };
            match outcome {
                PollOutcome::Published => {
                    attempted += 1;
                    published += 1;
                },
                PollOutcome::Failed => attempted += 1,
                // Not counted, but the gateway still gets its pause
                PollOutcome::Skipped => {},
            }
            if wait_or_cancel(token, self.settings.poll_delay).await {
                break;
            }
        }

        (attempted, published)
    }

    async fn poll_inverter(&self, device: &DeviceDescriptor) -> PollOutcome {
        let unit_id = device.unit_id;
        let key = DeviceKey::new(DeviceType::Inverter, unit_id);
        if self.runtime.in_backoff(key) {
            debug!("{}: in backoff, skipping", key);
            return PollOutcome::Skipped;
        }

        let model_id = device.effective_model_id(DeviceType::Inverter);
        let block = self.map.measurement_block(DeviceType::Inverter, model_id);
        let Some(measurement) = self
            .read_decoded(block, unit_id, MAIN_READ_ATTEMPTS, MAIN_RETRY_DELAY, "main", |regs| {
                decode_inverter(regs, model_id)
            })
            .await
        else {
            warn!(
                "Inverter {}: main register read failed after {} attempts",
                unit_id, MAIN_READ_ATTEMPTS
            );
            self.connection.reset().await;
            self.mark_failure(key, device).await;
            return PollOutcome::Failed;
        };

        let status = decode_status(measurement.status_code.unwrap_or(0));
        let events = decode_events(
            measurement.event_flags,
            &measurement.vendor_event_flags,
            device.inverter_type.family(),
        );

        self.connection.reset().await;
        sleep(MPPT_SETTLE).await;
        let mppt = self.read_mppt(unit_id).await;
        let controls = self.read_controls_if_due(unit_id).await;

        if device.has_storage {
            sleep(self.settings.read_delay).await;
            self.poll_storage(device).await;
        }

        debug!("Inverter {}: published (W={:?})", unit_id, measurement.ac_power);
        self.sink.emit(
            unit_id,
            &PublishRecord::Inverter(InverterRecord {
                identity: device.identity(),
                model_id,
                is_active: is_active(status.code),
                status,
                events,
                mppt,
                controls,
                measurement,
            }),
        );
        self.mark_success(key, device).await;
        PollOutcome::Published
    }

    async fn poll_meter(&self, device: &DeviceDescriptor) -> PollOutcome {
        let unit_id = device.unit_id;
        let key = DeviceKey::new(DeviceType::Meter, unit_id);
        if self.runtime.in_backoff(key) {
            debug!("{}: in backoff, skipping", key);
            return PollOutcome::Skipped;
        }

        let model_id = device.effective_model_id(DeviceType::Meter);
        let block = self.map.measurement_block(DeviceType::Meter, model_id);
        let Some(measurement) = self
            .read_decoded(block, unit_id, MAIN_READ_ATTEMPTS, MAIN_RETRY_DELAY, "main", decode_meter)
            .await
        else {
            warn!("Meter {}: read failed after {} attempts", unit_id, MAIN_READ_ATTEMPTS);
            self.mark_failure(key, device).await;
            return PollOutcome::Failed;
        };

        debug!("Meter {}: published (W={:?})", unit_id, measurement.power_total);
        self.sink.emit(
            unit_id,
            &PublishRecord::Meter(MeterRecord {
                identity: device.identity(),
                model_id,
                measurement,
            }),
        );
        self.mark_success(key, device).await;
        PollOutcome::Published
    }

    async fn poll_storage(&self, device: &DeviceDescriptor) {
        let block = self.map.storage;
        let reading = self
            .connection
            .read_registers(block.address, block.length, device.unit_id)
            .await
            .map(|regs| decode_storage(&regs));
        match reading {
            Some(Ok(reading)) => self.sink.emit(
                device.unit_id,
                &PublishRecord::Storage(StorageRecord {
                    identity: device.identity(),
                    reading,
                }),
            ),
            Some(Err(e)) => debug!("Inverter {}: storage block rejected: {}", device.unit_id, e),
            None => debug!("Inverter {}: storage read failed", device.unit_id),
        }
    }

    async fn read_mppt(&self, unit_id: u8) -> Option<MpptReading> {
        let reading = self
            .read_decoded(
                self.map.mppt,
                unit_id,
                SECONDARY_READ_ATTEMPTS,
                SECONDARY_RETRY_DELAY,
                "MPPT",
                decode_mppt,
            )
            .await;
        match &reading {
            Some(Some(r)) => {
                for m in &r.modules {
                    debug!(
                        "Inverter {} MPPT{}: V={:?} I={:?} P={:?}",
                        unit_id, m.id, m.dc_voltage, m.dc_current, m.dc_power
                    );
                }
            },
            Some(None) => debug!("Inverter {}: no MPPT input in use", unit_id),
            None => warn!(
                "Inverter {}: MPPT read failed after {} attempts",
                unit_id, SECONDARY_READ_ATTEMPTS
            ),
        }
        reading.flatten()
    }

    async fn read_controls_if_due(&self, unit_id: u8) -> Option<ImmediateControls> {
        let due = self
            .controls_read_at
            .lock()
            .get(&unit_id)
            .map_or(true, |at| at.elapsed() >= CONTROLS_INTERVAL);
        if !due {
            return None;
        }

        self.connection.reset().await;
        sleep(CONTROLS_SETTLE).await;
        let controls = self
            .read_decoded(
                self.map.controls,
                unit_id,
                SECONDARY_READ_ATTEMPTS,
                SECONDARY_RETRY_DELAY,
                "controls",
                decode_controls,
            )
            .await;
        match &controls {
            Some(c) => {
                self.controls_read_at.lock().insert(unit_id, Instant::now());
                debug!(
                    "Inverter {}: controls Conn={} WMaxLim={:?}% PF={:?}",
                    unit_id, c.connected, c.power_limit_pct, c.power_factor
                );
            },
            None => warn!(
                "Inverter {}: controls read failed after {} attempts",
                unit_id, SECONDARY_READ_ATTEMPTS
            ),
        }
        controls
    }

    /// Read `block` and decode it, retrying short, failed or rejected reads
    async fn read_decoded<T, F>(
        &self,
        block: Block,
        unit_id: u8,
        attempts: u32,
        delay: Duration,
        what: &str,
        decode: F,
    ) -> Option<T>
    where
        F: Fn(&[u16]) -> DecodeResult<T> + Send + Sync,
        T: Send,
    {
        for attempt in 1..=attempts {
            match self
                .connection
                .read_registers(block.address, block.length, unit_id)
                .await
            {
                Some(regs) => match decode(&regs) {
                    Ok(value) => return Some(value),
                    Err(e) => debug!(
                        "Unit {}: {} block rejected: {}, retry {}/{}",
                        unit_id, what, e, attempt, attempts
                    ),
                },
                None => debug!(
                    "Unit {}: {} read failed, retry {}/{}",
                    unit_id, what, attempt, attempts
                ),
            }
            if attempt < attempts {
                sleep(delay).await;
            }
        }
        None
    }

    async fn mark_success(&self, key: DeviceKey, device: &DeviceDescriptor) {
        if self.runtime.record_success(key, device.model_id) {
            self.verify_model_id(key).await;
        }
    }

    async fn mark_failure(&self, key: DeviceKey, device: &DeviceDescriptor) {
        let outcome = self.runtime.record_failure(key, device.model_id);
        log_failure(key, &outcome);
        if outcome.verify_model {
            self.verify_model_id(key).await;
        }
    }

    /// Re-read the model id on a fresh socket and fold it into the state
    async fn verify_model_id(&self, key: DeviceKey) {
        self.connection.reset().await;
        sleep(MODEL_ID_SETTLE).await;
        let observed = self
            .connection
            .read_registers(self.map.model_id.address, 1, key.unit_id)
            .await
            .and_then(|regs| regs.first().copied());

        match self.runtime.apply_verification(key, observed) {
            VerifyOutcome::NoResponse => debug!("{}: model_id re-check got no response", key),
            VerifyOutcome::Invalid(value) => debug!(
                "{}: model_id re-check returned {} (0x{:04X}), keeping stored value",
                key, value, value
            ),
            VerifyOutcome::Confirmed(id) => debug!("{}: model_id {} confirmed", key, id),
            VerifyOutcome::Changed { old, new } => {
                warn!("{}: model_id changed {:?} -> {}", key, old, new);
                let mut devices = self.devices(key.device_type).lock();
                if let Some(device) = devices.iter_mut().find(|d| d.unit_id == key.unit_id) {
                    device.model_id = Some(new);
                }
            },
        }
    }

    fn devices(&self, device_type: DeviceType) -> &Mutex<Vec<DeviceDescriptor>> {
        match device_type {
            DeviceType::Inverter => &self.inverters,
            DeviceType::Meter => &self.meters,
        }
    }

    fn is_night_time(&self) -> bool {
        self.settings.night_mode_enabled
            && night::is_night_time(self.settings.night_start_hour, self.settings.night_end_hour)
    }

    fn count_failure(&self) -> u32 {
        let mut cycle = self.cycle.lock();
        cycle.consecutive_failures += 1;
        cycle.consecutive_failures
    }

    fn cycle_succeeded(&self) {
        let mut cycle = self.cycle.lock();
        cycle.consecutive_failures = 0;
        cycle.last_successful_poll = Some(Utc::now());
        if cycle.in_sleep_mode {
            let slept = cycle.sleep_started.map(|s| s.elapsed()).unwrap_or_default();
            info!("Exiting sleep mode after {}s", slept.as_secs());
            cycle.in_sleep_mode = false;
            cycle.sleep_started = None;
        }
    }

    fn enter_sleep(&self, reason: &str) {
        let mut cycle = self.cycle.lock();
        if cycle.in_sleep_mode {
            return;
        }
        cycle.in_sleep_mode = true;
        cycle.sleep_started = Some(Instant::now());
        info!("Entering sleep mode - {}", reason);
        info!(
            "Will poll every {}s",
            self.settings.night_poll_interval.as_secs()
        );
    }

    fn poll_interval(&self) -> Duration {
        if self.cycle.lock().in_sleep_mode {
            self.settings.night_poll_interval
        } else {
            self.settings.poll_delay
        }
    }

    fn status(&self) -> SchedulerStatus {
        let cycle = self.cycle.lock();
        SchedulerStatus {
            in_sleep_mode: cycle.in_sleep_mode,
            consecutive_failures: cycle.consecutive_failures,
            last_successful_poll: cycle.last_successful_poll,
            is_night_time: self.is_night_time(),
            connected: self.connection.is_connected(),
        }
    }
}
