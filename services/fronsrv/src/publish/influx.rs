//! InfluxDB v2 writer
//!
//! Points are gated per device (minimum spacing plus optional change
//! detection), rendered to line protocol and queued. A background task
//! batches the queue into `/api/v2/write`; a failed batch is counted and
//! dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use errors::{BridgeError, BridgeResult};
use parking_lot::Mutex;
use reqwest::Client;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::fields::{present, INVERTER_FIELDS, METER_FIELDS};
use super::line_protocol::{FieldValue, LineProtocolBuilder};
use super::{InverterRecord, MeterRecord, PublishRecord, PublishSink};
use crate::config::{InfluxConfig, PublishMode};

pub const INVERTER_MEASUREMENT: &str = "fronius_inverter";
pub const METER_MEASUREMENT: &str = "fronius_meter";

const QUEUE_CAPACITY: usize = 1000;
const MAX_BATCH: usize = 100;
const FLUSH_INTERVAL: Duration = Duration::from_secs(1);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Default)]
pub struct InfluxStats {
    pub writes_total: AtomicU64,
    pub writes_failed: AtomicU64,
    pub skipped: AtomicU64,
}

/// Per-device rate limit and change detection
#[derive(Debug)]
pub struct WriteGate {
    interval: Duration,
    mode: PublishMode,
    last: HashMap<String, (Instant, Vec<(String, f64)>)>,
}

impl WriteGate {
    pub fn new(interval: Duration, mode: PublishMode) -> Self {
        Self {
            interval,
            mode,
            last: HashMap::new(),
        }
    }

    /// Whether a point for `key` with these numeric values should be written at `now`
    pub fn admit(&mut self, key: &str, numeric: Vec<(String, f64)>, now: Instant) -> bool {
        if let Some((written_at, previous)) = self.last.get(key) {
            if now.duration_since(*written_at) < self.interval {
                return false;
            }
            if self.mode == PublishMode::Changed {
                let changed = numeric.iter().any(|(name, value)| {
                    previous
                        .iter()
                        .find(|(old, _)| old == name)
                        .map_or(true, |(_, old)| old != value)
                });
                if !changed {
                    return false;
                }
            }
        }
        self.last.insert(key.to_string(), (now, numeric));
        true
    }
}

fn numeric_fields(builder_fields: &[(String, FieldValue)]) -> Vec<(String, f64)> {
    builder_fields
        .iter()
        .filter_map(|(name, value)| {
            let v = match value {
                FieldValue::Float(v) => *v,
                FieldValue::Integer(v) => *v as f64,
                FieldValue::UnsignedInteger(v) => *v as f64,
                FieldValue::Boolean(v) => f64::from(u8::from(*v)),
                FieldValue::String(_) => return None,
            };
            Some((name.clone(), v))
        })
        .collect()
}

/// Tags and fields of an inverter point
pub fn inverter_point(unit_id: u8, record: &InverterRecord) -> Vec<(String, FieldValue)> {
    let mut fields: Vec<(String, FieldValue)> = present(INVERTER_FIELDS, &record.measurement)
        .map(|(f, v)| (f.name.to_string(), FieldValue::Float(v)))
        .collect();

    fields.push(("status_code".into(), i64::from(record.status.code).into()));
    fields.push(("status_alarm".into(), record.status.alarm.into()));
    fields.push(("event_count".into(), (record.events.len() as i64).into()));
    if !record.events.is_empty() {
        match serde_json::to_string(&record.events) {
            Ok(json) => fields.push(("events_json".into(), json.into())),
            Err(e) => debug!("Inverter {}: events not serializable: {}", unit_id, e),
        }
    }

    if let Some(mppt) = &record.mppt {
        fields.push(("mppt_num_modules".into(), i64::from(mppt.num_modules).into()));
        for module in &mppt.modules {
            let n = module.id;
            for (suffix, value) in [
                ("current", module.dc_current),
                ("voltage", module.dc_voltage),
                ("power", module.dc_power),
                ("energy", module.dc_energy),
            ] {
                if let Some(v) = value {
                    fields.push((format!("string{n}_{suffix}"), v.into()));
                }
            }
        }
    }
    fields
}

pub fn meter_point(record: &MeterRecord) -> Vec<(String, FieldValue)> {
    present(METER_FIELDS, &record.measurement)
        .map(|(f, v)| (f.name.to_string(), FieldValue::Float(v)))
        .collect()
}

/// Fields of the point for `record`; storage records are not written
pub fn point_fields(unit_id: u8, record: &PublishRecord) -> Option<Vec<(String, FieldValue)>> {
    match record {
        PublishRecord::Inverter(r) => Some(inverter_point(unit_id, r)),
        PublishRecord::Meter(r) => Some(meter_point(r)),
        PublishRecord::Storage(_) => None,
    }
}

/// Render one point; `None` when nothing is left to write
pub fn render(
    unit_id: u8,
    record: &PublishRecord,
    fields: Vec<(String, FieldValue)>,
    timestamp_ns: Option<i64>,
) -> Option<String> {
    let (measurement, device_type, status) = match record {
        PublishRecord::Inverter(r) => (INVERTER_MEASUREMENT, "inverter", Some(r.status.name)),
        PublishRecord::Meter(_) => (METER_MEASUREMENT, "meter", None),
        PublishRecord::Storage(_) => return None,
    };

    let identity = record.identity();
    let mut builder = LineProtocolBuilder::new(measurement)
        .tag("device_id", unit_id.to_string())
        .tag("device_type", device_type)
        .tag("model", identity.model.as_str())
        .tag("serial_number", identity.serial_number.as_str());
    if let Some(status) = status {
        builder = builder.tag("status", status);
    }
    for (name, value) in fields {
        builder = builder.field(name, value);
    }
    if !builder.has_fields() {
        return None;
    }
    if let Some(ts) = timestamp_ns {
        builder = builder.timestamp(ts);
    }
    Some(builder.build())
}

#[derive(Debug, Clone)]
struct WriteTarget {
    url: String,
    token: String,
    org: String,
    bucket: String,
}

pub struct InfluxWriter {
    gate: Mutex<WriteGate>,
    queue: Mutex<Option<mpsc::Sender<String>>>,
    flusher: Mutex<Option<JoinHandle<()>>>,
    stats: Arc<InfluxStats>,
}

impl InfluxWriter {
    /// Build the client and spawn the flush task; needs a tokio runtime
    pub fn new(config: &InfluxConfig, mode: PublishMode) -> BridgeResult<Self> {
        if config.token.is_empty() || config.org.is_empty() {
            return Err(BridgeError::invalid_config("influxdb", "token and org are required"));
        }
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let target = WriteTarget {
            url: format!("{}/api/v2/write", config.url.trim_end_matches('/')),
            token: config.token.clone(),
            org: config.org.clone(),
            bucket: config.bucket.clone(),
        };

        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let stats = Arc::new(InfluxStats::default());
        let flusher = tokio::spawn(run_flusher(client, target, rx, Arc::clone(&stats)));

        info!(
            "InfluxDB writer for {} (bucket {}, interval {}s, mode {:?})",
            config.url, config.bucket, config.write_interval_secs, mode
        );
        Ok(Self {
            gate: Mutex::new(WriteGate::new(config.write_interval(), mode)),
            queue: Mutex::new(Some(tx)),
            flusher: Mutex::new(Some(flusher)),
            stats,
        })
    }

    pub fn stats(&self) -> &InfluxStats {
        &self.stats
    }
}

#[async_trait]
impl PublishSink for InfluxWriter {
    fn name(&self) -> &'static str {
        "influxdb"
    }

    fn emit(&self, unit_id: u8, record: &PublishRecord) {
        let Some(fields) = point_fields(unit_id, record) else {
            return;
        };
        let key = format!("{}_{}", record.kind(), unit_id);
        if !self.gate.lock().admit(&key, numeric_fields(&fields), Instant::now()) {
            self.stats.skipped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let Some(line) = render(unit_id, record, fields, Utc::now().timestamp_nanos_opt()) else {
            return;
        };
        let queue = self.queue.lock();
        let Some(tx) = queue.as_ref() else {
            return;
        };
        if tx.try_send(line).is_err() {
            self.stats.writes_failed.fetch_add(1, Ordering::Relaxed);
            warn!("InfluxDB queue full, point for {} dropped", key);
        }
    }

    async fn close(&self) {
        // Dropping the sender lets the flusher drain and exit
        drop(self.queue.lock().take());
        let flusher = self.flusher.lock().take();
        if let Some(handle) = flusher {
            if let Err(e) = handle.await {
                error!("InfluxDB flush task failed: {}", e);
            }
        }
        info!(
            "InfluxDB stats: {} writes, {} failures",
            self.stats.writes_total.load(Ordering::Relaxed),
            self.stats.writes_failed.load(Ordering::Relaxed)
        );
    }
}

async fn run_flusher(
    client: Client,
    target: WriteTarget,
    mut rx: mpsc::Receiver<String>,
    stats: Arc<InfluxStats>,
) {
    let mut batch: Vec<String> = Vec::with_capacity(MAX_BATCH);
    let mut ticker = tokio::time::interval(FLUSH_INTERVAL);
    loop {
        tokio::select! {
            line = rx.recv() => match line {
                Some(line) => {
                    batch.push(line);
                    if batch.len() >= MAX_BATCH {
                        flush(&client, &target, &mut batch, &stats).await;
                    }
                },
                None => {
                    flush(&client, &target, &mut batch, &stats).await;
                    break;
                },
            },
            _ = ticker.tick() => {
                if !batch.is_empty() {
                    flush(&client, &target, &mut batch, &stats).await;
                }
            },
        }
    }
    debug!("InfluxDB flush task stopped");
}

async fn flush(
    client: &Client,
    target: &WriteTarget,
    batch: &mut Vec<String>,
    stats: &InfluxStats,
) {
    if batch.is_empty() {
        return;
    }
    let count = batch.len() as u64;
    let body = batch.join("\n");
    batch.clear();

    match write_lines(client, target, body).await {
        Ok(()) => {
            stats.writes_total.fetch_add(count, Ordering::Relaxed);
            debug!("Wrote {} points to InfluxDB", count);
        },
        Err(e) => {
            stats.writes_failed.fetch_add(count, Ordering::Relaxed);
            error!("InfluxDB write of {} points failed: {}", count, e);
        },
    }
}

async fn write_lines(client: &Client, target: &WriteTarget, body: String) -> BridgeResult<()> {
    let response = client
        .post(&target.url)
        .query(&[
            ("org", target.org.as_str()),
            ("bucket", target.bucket.as_str()),
            ("precision", "ns"),
        ])
        .header("Authorization", format!("Token {}", target.token))
        .header("Content-Type", "text/plain; charset=utf-8")
        .body(body)
        .send()
        .await?;

    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        let text = response.text().await.unwrap_or_default();
        Err(BridgeError::publish("influxdb", format!("{status}: {text}")))
    }
}
