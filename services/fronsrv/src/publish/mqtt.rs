//! MQTT publisher
//!
//! Every value goes to its own topic, `{prefix}/{type}/{unit}/{SunSpec name}`.
//! A background task drives the rumqttc event loop; [`PublishSink::emit`]
//! only queues with `try_publish`, so a slow broker never stalls polling.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use errors::{BridgeError, BridgeResult};
use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, LastWill, MqttOptions, Packet, QoS};
use sunspec::model::DeviceType;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::discovery::discovery_messages;
use super::fields::{present, INVERTER_FIELDS, METER_FIELDS, STORAGE_FIELDS};
use super::{InverterRecord, MeterRecord, PublishRecord, PublishSink, StorageRecord};
use crate::config::{MqttConfig, PublishMode};
use crate::health::format_uptime;
use crate::identify::Discovered;
use crate::runtime::RuntimeSnapshot;

/// Room for a full set of discovery configs queued on connect
const REQUEST_CAPACITY: usize = 1024;
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const OFFLINE_GRACE: Duration = Duration::from_millis(500);

/// One outgoing publish
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub topic: String,
    pub payload: String,
    /// `None` uses the configured retain flag
    pub retain: Option<bool>,
    /// Bypasses change suppression
    pub always: bool,
}

impl Message {
    fn value(topic: String, payload: impl Into<String>) -> Self {
        Self {
            topic,
            payload: payload.into(),
            retain: None,
            always: false,
        }
    }
}

/// Round to three decimals; integral values render without a fraction
pub fn format_float(value: f64) -> String {
    let rounded = (value * 1000.0).round() / 1000.0;
    // avoid "-0"
    let rounded = if rounded == 0.0 { 0.0 } else { rounded };
    format!("{rounded}")
}

fn format_bool(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

/// All messages for one record, in publish order
pub fn record_messages(prefix: &str, unit_id: u8, record: &PublishRecord) -> Vec<Message> {
    let base = format!("{}/{}/{}", prefix, record.kind(), unit_id);
    let mut out = Vec::new();
    match record {
        PublishRecord::Inverter(r) => inverter_messages(&base, r, &mut out),
        PublishRecord::Meter(r) => meter_messages(&base, r, &mut out),
        PublishRecord::Storage(r) => storage_messages(&base, r, &mut out),
    }
    out
}

fn push_identity(base: &str, leaf: &str, value: &str, out: &mut Vec<Message>) {
    if !value.is_empty() {
        out.push(Message::value(format!("{base}/{leaf}"), value));
    }
}

fn inverter_messages(base: &str, r: &InverterRecord, out: &mut Vec<Message>) {
    for (field, value) in present(INVERTER_FIELDS, &r.measurement) {
        out.push(Message::value(format!("{base}/{}", field.sunspec), format_float(value)));
    }
    if let Some(vendor) = r.measurement.status_vendor {
        out.push(Message::value(format!("{base}/StVnd"), vendor.to_string()));
    }

    out.push(Message::value(format!("{base}/status"), r.status.description));
    out.push(Message::value(format!("{base}/St"), r.status.code.to_string()));
    out.push(Message::value(format!("{base}/alarm"), format_bool(r.status.alarm)));
    out.push(Message::value(format!("{base}/active"), format_bool(r.is_active)));

    let events_topic = format!("{base}/events");
    if r.events.is_empty() {
        out.push(Message::value(events_topic, "[]"));
    } else {
        match serde_json::to_string(&r.events) {
            Ok(json) => out.push(Message {
                topic: events_topic,
                payload: json,
                retain: Some(false),
                always: true,
            }),
            Err(e) => debug!("{}: events not serializable: {}", base, e),
        }
    }

    push_identity(base, "model", &r.identity.model, out);
    push_identity(base, "manufacturer", &r.identity.manufacturer, out);
    push_identity(base, "serial_number", &r.identity.serial_number, out);

    if let Some(mppt) = &r.mppt {
        out.push(Message::value(
            format!("{base}/mppt/num_modules"),
            mppt.num_modules.to_string(),
        ));
        for module in &mppt.modules {
            let n = module.id;
            for (leaf, value) in [
                ("DCA", module.dc_current),
                ("DCV", module.dc_voltage),
                ("DCW", module.dc_power),
                ("DCWH", module.dc_energy),
                ("Tmp", module.temperature),
            ] {
                if let Some(v) = value {
                    out.push(Message::value(format!("{base}/mppt/{n}/{leaf}"), format_float(v)));
                }
            }
        }
    }

    if let Some(c) = &r.controls {
        let controls = format!("{base}/controls");
        out.push(Message::value(format!("{controls}/connected"), format_bool(c.connected)));
        if let Some(pct) = c.power_limit_pct {
            out.push(Message::value(format!("{controls}/power_limit_pct"), format_float(pct)));
        }
        out.push(Message::value(
            format!("{controls}/power_limit_enabled"),
            format_bool(c.power_limit_enabled),
        ));
        if let Some(pf) = c.power_factor {
            out.push(Message::value(format!("{controls}/power_factor"), format_float(pf)));
        }
        out.push(Message::value(
            format!("{controls}/power_factor_enabled"),
            format_bool(c.power_factor_enabled),
        ));
        out.push(Message::value(
            format!("{controls}/var_enabled"),
            format_bool(c.var_mode.is_some_and(|m| m != 0)),
        ));
    }
}

fn meter_messages(base: &str, r: &MeterRecord, out: &mut Vec<Message>) {
    for (field, value) in present(METER_FIELDS, &r.measurement) {
        out.push(Message::value(format!("{base}/{}", field.sunspec), format_float(value)));
    }
    push_identity(base, "model", &r.identity.model, out);
    push_identity(base, "serial_number", &r.identity.serial_number, out);
}

fn storage_messages(base: &str, r: &StorageRecord, out: &mut Vec<Message>) {
    let s = &r.reading;
    for (field, value) in present(STORAGE_FIELDS, s) {
        out.push(Message::value(format!("{base}/{}", field.sunspec), format_float(value)));
    }
    if let Some(status) = &s.charge_status {
        out.push(Message::value(format!("{base}/status"), status.name));
        out.push(Message::value(format!("{base}/status_description"), status.description));
    }
    if let Some(source) = s.grid_charging {
        out.push(Message::value(format!("{base}/grid_charging"), source));
    }
    out.push(Message::value(
        format!("{base}/charge_limit_active"),
        format_bool(s.charge_limit_active),
    ));
    out.push(Message::value(
        format!("{base}/discharge_limit_active"),
        format_bool(s.discharge_limit_active),
    ));
}

/// Aggregate and per-device runtime topics
pub fn runtime_messages(prefix: &str, snapshot: &RuntimeSnapshot, uptime: Duration) -> Vec<Message> {
    let mut out = Vec::new();
    for (device_type, aggregate) in [("inverter", &snapshot.inverter), ("meter", &snapshot.meter)] {
        if aggregate.total > 0 {
            out.push(Message {
                topic: format!("{prefix}/{device_type}/status"),
                payload: aggregate.status.as_str().to_string(),
                retain: Some(true),
                always: true,
            });
        }
    }

    let uptime = format_uptime(uptime);
    for device in &snapshot.devices {
        let base = format!("{}/{}/{}/runtime", prefix, device.device_type, device.unit_id);
        let mut leaves = vec![
            ("status", device.status.as_str().to_string()),
            ("read_errors", device.read_errors.to_string()),
            ("uptime", uptime.clone()),
        ];
        if let Some(seen) = device.last_seen {
            leaves.push(("last_seen", seen.to_rfc3339()));
        }
        if let Some(model_id) = device.model_id {
            leaves.push(("model_id", model_id.to_string()));
        }
        for (leaf, payload) in leaves {
            out.push(Message {
                topic: format!("{base}/{leaf}"),
                payload,
                retain: Some(true),
                always: false,
            });
        }
    }
    out
}

fn qos_from(level: u8) -> QoS {
    match level {
        1 => QoS::AtLeastOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtMostOnce,
    }
}

#[derive(Debug, Default)]
pub struct MqttStats {
    pub published: AtomicU64,
    pub skipped: AtomicU64,
    pub failed: AtomicU64,
}

/// Last payload per topic, for change suppression
#[derive(Debug, Default)]
struct ChangeCache {
    last: HashMap<String, String>,
}

impl ChangeCache {
    fn unchanged(&self, msg: &Message) -> bool {
        self.last.get(&msg.topic).is_some_and(|p| *p == msg.payload)
    }

    fn remember(&mut self, msg: &Message) {
        self.last.insert(msg.topic.clone(), msg.payload.clone());
    }
}

pub struct MqttPublisher {
    client: AsyncClient,
    prefix: String,
    status_topic: String,
    qos: QoS,
    retain: bool,
    mode: PublishMode,
    connected: Arc<AtomicBool>,
    cache: Mutex<ChangeCache>,
    stats: MqttStats,
    event_loop: Mutex<Option<JoinHandle<()>>>,
    /// `None` when Home Assistant discovery is off
    discovery_prefix: Option<String>,
    /// Configs replayed on every broker (re)connect
    discovery: Arc<Mutex<Vec<Message>>>,
}

impl MqttPublisher {
    /// Create the client and spawn its event loop; needs a tokio runtime
    pub fn new(config: &MqttConfig, mode: PublishMode) -> BridgeResult<Self> {
        if config.broker.is_empty() {
            return Err(BridgeError::invalid_config("mqtt.broker", "must not be empty"));
        }
        let prefix = config.topic_prefix.trim_end_matches('/').to_string();
        let status_topic = format!("{prefix}/status");

        let mut options = MqttOptions::new(&config.client_id, &config.broker, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));
        options.set_clean_session(true);
        if let Some(username) = &config.username {
            options.set_credentials(username, config.password.as_deref().unwrap_or_default());
        }
        options.set_last_will(LastWill::new(&status_topic, "offline", QoS::AtLeastOnce, true));

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let connected = Arc::new(AtomicBool::new(false));

        let discovery: Arc<Mutex<Vec<Message>>> = Arc::default();
        let loop_discovery = Arc::clone(&discovery);
        let loop_client = client.clone();
        let loop_connected = Arc::clone(&connected);
        let loop_status = status_topic.clone();
        let broker = format!("{}:{}", config.broker, config.port);
        let handle = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("Connected to MQTT broker {}", broker);
                        loop_connected.store(true, Ordering::SeqCst);
                        if let Err(e) =
                            loop_client.try_publish(&loop_status, QoS::AtLeastOnce, true, "online")
                        {
                            warn!("MQTT online status not queued: {}", e);
                        }
                        let configs = loop_discovery.lock().clone();
                        for msg in configs {
                            if let Err(e) = loop_client.try_publish(
                                msg.topic.as_str(),
                                QoS::AtLeastOnce,
                                true,
                                msg.payload,
                            ) {
                                debug!("Discovery config {} not queued: {}", msg.topic, e);
                            }
                        }
                    },
                    Ok(notification) => debug!("MQTT event: {:?}", notification),
                    Err(e) => {
                        if loop_connected.swap(false, Ordering::SeqCst) {
                            warn!("MQTT connection to {} lost: {}", broker, e);
                        } else {
                            debug!("MQTT connect to {} failed: {}", broker, e);
                        }
                        tokio::time::sleep(RECONNECT_DELAY).await;
                    },
                }
            }
        });

        info!(
            "MQTT publisher for {}:{} (prefix {}, qos {}, retain {}, mode {:?})",
            config.broker, config.port, prefix, config.qos, config.retain, mode
        );
        Ok(Self {
            client,
            prefix,
            status_topic,
            qos: qos_from(config.qos),
            retain: config.retain,
            mode,
            connected,
            cache: Mutex::new(ChangeCache::default()),
            stats: MqttStats::default(),
            event_loop: Mutex::new(Some(handle)),
            discovery_prefix: config
                .ha_discovery
                .then(|| config.ha_discovery_prefix.trim_matches('/').to_string()),
            discovery,
        })
    }

    /// Queue Home Assistant discovery configs for `devices`
    ///
    /// The configs are kept and replayed after every reconnect, so a broker
    /// restart does not lose them. Returns the number of configs.
    pub fn publish_discovery(&self, devices: &Discovered) -> usize {
        let Some(discovery_prefix) = &self.discovery_prefix else {
            return 0;
        };
        let configs: Vec<Message> = devices
            .inverters
            .iter()
            .map(|d| (DeviceType::Inverter, d))
            .chain(devices.meters.iter().map(|d| (DeviceType::Meter, d)))
            .flat_map(|(device_type, d)| {
                discovery_messages(discovery_prefix, &self.prefix, device_type, d)
            })
            .collect();
        let count = configs.len();
        *self.discovery.lock() = configs.clone();

        if self.is_connected() {
            for msg in configs {
                self.publish(msg);
            }
        }
        info!("Home Assistant discovery: {} configs under {}/", count, discovery_prefix);
        count
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> &MqttStats {
        &self.stats
    }

    fn publish(&self, msg: Message) {
        let suppress = !msg.always && self.mode == PublishMode::Changed;
        if suppress && self.cache.lock().unchanged(&msg) {
            self.stats.skipped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let retain = msg.retain.unwrap_or(self.retain);
        match self
            .client
            .try_publish(msg.topic.as_str(), self.qos, retain, msg.payload.clone())
        {
            Ok(()) => {
                self.stats.published.fetch_add(1, Ordering::Relaxed);
                if suppress {
                    self.cache.lock().remember(&msg);
                }
            },
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                debug!("MQTT publish to {} not queued: {}", msg.topic, e);
            },
        }
    }
}

#[async_trait]
impl PublishSink for MqttPublisher {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    fn emit(&self, unit_id: u8, record: &PublishRecord) {
        if !self.is_connected() {
            debug!("MQTT not connected, {} {} not published", record.kind(), unit_id);
            return;
        }
        for msg in record_messages(&self.prefix, unit_id, record) {
            self.publish(msg);
        }
    }

    fn publish_runtime(&self, snapshot: &RuntimeSnapshot, uptime: Duration) {
        if !self.is_connected() {
            return;
        }
        for msg in runtime_messages(&self.prefix, snapshot, uptime) {
            self.publish(msg);
        }
    }

    async fn close(&self) {
        if self.is_connected() {
            if let Err(e) = self
                .client
                .try_publish(self.status_topic.as_str(), QoS::AtLeastOnce, true, "offline")
            {
                warn!("MQTT offline status not queued: {}", e);
            }
            tokio::time::sleep(OFFLINE_GRACE).await;
            if let Err(e) = self.client.disconnect().await {
                error!("MQTT disconnect failed: {}", e);
            }
            // let the event loop flush the disconnect
            tokio::time::sleep(OFFLINE_GRACE).await;
        }
        self.connected.store(false, Ordering::SeqCst);
        if let Some(handle) = self.event_loop.lock().take() {
            handle.abort();
        }
        info!(
            "MQTT stats: {} published, {} unchanged skipped, {} failed",
            self.stats.published.load(Ordering::Relaxed),
            self.stats.skipped.load(Ordering::Relaxed),
            self.stats.failed.load(Ordering::Relaxed)
        );
    }
}
