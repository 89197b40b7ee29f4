//! Home Assistant MQTT discovery
//!
//! One retained config per entity under
//! `{discovery_prefix}/{component}/fronius_{type}_{unit}/{object}/config`,
//! where `component` is `sensor` or `binary_sensor`. State topics point at
//! the leaves [`record_messages`](super::mqtt::record_messages) and
//! [`runtime_messages`](super::mqtt::runtime_messages) publish.

use serde::Serialize;
use sunspec::model::DeviceType;
use tracing::debug;

use super::mqtt::Message;
use crate::device::DeviceDescriptor;

pub const DEFAULT_DISCOVERY_PREFIX: &str = "homeassistant";

/// Inputs the decoder can report per inverter
const MPPT_INPUTS: u16 = 2;

const ORIGIN: &str = "fronsrv";
const SW_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Numeric or text entity: (leaf, name, unit, device_class, state_class, icon)
type SensorDef = (
    &'static str,
    &'static str,
    Option<&'static str>,
    Option<&'static str>,
    Option<&'static str>,
    Option<&'static str>,
);

/// On/off entity: (leaf, name, device_class, icon)
type BinaryDef = (&'static str, &'static str, Option<&'static str>, Option<&'static str>);

const M: Option<&str> = Some("measurement");
const TOTAL: Option<&str> = Some("total_increasing");

static INVERTER_SENSORS: &[SensorDef] = &[
    ("W", "AC Power", Some("W"), Some("power"), M, None),
    ("VA", "Apparent Power", Some("VA"), Some("apparent_power"), M, None),
    ("VAr", "Reactive Power", Some("var"), Some("reactive_power"), M, None),
    ("PF", "Power Factor", None, Some("power_factor"), M, None),
    ("Hz", "Frequency", Some("Hz"), Some("frequency"), M, None),
    ("WH", "Lifetime Energy", Some("Wh"), Some("energy"), TOTAL, None),
    ("A", "AC Current", Some("A"), Some("current"), M, None),
    ("AphA", "AC Current Phase A", Some("A"), Some("current"), M, None),
    ("AphB", "AC Current Phase B", Some("A"), Some("current"), M, None),
    ("AphC", "AC Current Phase C", Some("A"), Some("current"), M, None),
    ("PhVphA", "Voltage Phase A", Some("V"), Some("voltage"), M, None),
    ("PhVphB", "Voltage Phase B", Some("V"), Some("voltage"), M, None),
    ("PhVphC", "Voltage Phase C", Some("V"), Some("voltage"), M, None),
    ("PPVphAB", "Voltage AB", Some("V"), Some("voltage"), M, None),
    ("PPVphBC", "Voltage BC", Some("V"), Some("voltage"), M, None),
    ("PPVphCA", "Voltage CA", Some("V"), Some("voltage"), M, None),
    ("DCA", "DC Current", Some("A"), Some("current"), M, None),
    ("DCV", "DC Voltage", Some("V"), Some("voltage"), M, None),
    ("DCW", "DC Power", Some("W"), Some("power"), M, None),
    ("TmpCab", "Cabinet Temperature", Some("°C"), Some("temperature"), M, None),
    ("TmpSnk", "Heatsink Temperature", Some("°C"), Some("temperature"), M, None),
    ("TmpTrns", "Transformer Temperature", Some("°C"), Some("temperature"), M, None),
    ("TmpOt", "Other Temperature", Some("°C"), Some("temperature"), M, None),
    ("St", "Status Code", None, None, None, Some("mdi:information-outline")),
    ("status", "Status", None, None, None, Some("mdi:solar-power")),
    ("controls/power_limit_pct", "Power Limit", Some("%"), None, M, Some("mdi:speedometer")),
    ("controls/power_factor", "Power Factor Setpoint", None, Some("power_factor"), M, None),
];

static INVERTER_BINARY_SENSORS: &[BinaryDef] = &[
    ("active", "Active", Some("running"), Some("mdi:power")),
    ("alarm", "Alarm", Some("problem"), None),
    ("controls/connected", "Connected", Some("connectivity"), Some("mdi:connection")),
    ("controls/power_limit_enabled", "Power Limit Enabled", None, Some("mdi:toggle-switch")),
    ("controls/power_factor_enabled", "PF Control Enabled", None, Some("mdi:toggle-switch")),
    ("controls/var_enabled", "VAR Control Enabled", None, Some("mdi:toggle-switch")),
];

/// Per MPPT input: (leaf, name suffix, unit, device_class, state_class)
static MPPT_SENSORS: &[(&str, &str, &str, &str, Option<&str>)] = &[
    ("DCA", "Current", "A", "current", M),
    ("DCV", "Voltage", "V", "voltage", M),
    ("DCW", "Power", "W", "power", M),
    ("DCWH", "Energy", "Wh", "energy", TOTAL),
    ("Tmp", "Temperature", "°C", "temperature", M),
];

static METER_SENSORS: &[SensorDef] = &[
    ("W", "Power", Some("W"), Some("power"), M, None),
    ("WphA", "Power Phase A", Some("W"), Some("power"), M, None),
    ("WphB", "Power Phase B", Some("W"), Some("power"), M, None),
    ("WphC", "Power Phase C", Some("W"), Some("power"), M, None),
    ("VA", "Apparent Power", Some("VA"), Some("apparent_power"), M, None),
    ("VAphA", "Apparent Power Phase A", Some("VA"), Some("apparent_power"), M, None),
    ("VAphB", "Apparent Power Phase B", Some("VA"), Some("apparent_power"), M, None),
    ("VAphC", "Apparent Power Phase C", Some("VA"), Some("apparent_power"), M, None),
    ("VAR", "Reactive Power", Some("var"), Some("reactive_power"), M, None),
    ("VARphA", "Reactive Power Phase A", Some("var"), Some("reactive_power"), M, None),
    ("VARphB", "Reactive Power Phase B", Some("var"), Some("reactive_power"), M, None),
    ("VARphC", "Reactive Power Phase C", Some("var"), Some("reactive_power"), M, None),
    ("PF", "Power Factor", None, Some("power_factor"), M, None),
    ("PFphA", "Power Factor Phase A", None, Some("power_factor"), M, None),
    ("PFphB", "Power Factor Phase B", None, Some("power_factor"), M, None),
    ("PFphC", "Power Factor Phase C", None, Some("power_factor"), M, None),
    ("A", "Current", Some("A"), Some("current"), M, None),
    ("AphA", "Current Phase A", Some("A"), Some("current"), M, None),
    ("AphB", "Current Phase B", Some("A"), Some("current"), M, None),
    ("AphC", "Current Phase C", Some("A"), Some("current"), M, None),
    ("PhV", "Voltage LN Average", Some("V"), Some("voltage"), M, None),
    ("PhVphA", "Voltage AN", Some("V"), Some("voltage"), M, None),
    ("PhVphB", "Voltage BN", Some("V"), Some("voltage"), M, None),
    ("PhVphC", "Voltage CN", Some("V"), Some("voltage"), M, None),
    ("PPV", "Voltage LL Average", Some("V"), Some("voltage"), M, None),
    ("PPVphAB", "Voltage AB", Some("V"), Some("voltage"), M, None),
    ("PPVphBC", "Voltage BC", Some("V"), Some("voltage"), M, None),
    ("PPVphCA", "Voltage CA", Some("V"), Some("voltage"), M, None),
    ("Hz", "Frequency", Some("Hz"), Some("frequency"), M, None),
    ("TotWhExp", "Energy Exported", Some("Wh"), Some("energy"), TOTAL, None),
    ("TotWhExpPhA", "Energy Exported Phase A", Some("Wh"), Some("energy"), TOTAL, None),
    ("TotWhExpPhB", "Energy Exported Phase B", Some("Wh"), Some("energy"), TOTAL, None),
    ("TotWhExpPhC", "Energy Exported Phase C", Some("Wh"), Some("energy"), TOTAL, None),
    ("TotWhImp", "Energy Imported", Some("Wh"), Some("energy"), TOTAL, None),
    ("TotWhImpPhA", "Energy Imported Phase A", Some("Wh"), Some("energy"), TOTAL, None),
    ("TotWhImpPhB", "Energy Imported Phase B", Some("Wh"), Some("energy"), TOTAL, None),
    ("TotWhImpPhC", "Energy Imported Phase C", Some("Wh"), Some("energy"), TOTAL, None),
];

static STORAGE_SENSORS: &[SensorDef] = &[
    ("ChaState", "State of Charge", Some("%"), Some("battery"), M, None),
    ("InBatV", "Battery Voltage", Some("V"), Some("voltage"), M, None),
    ("WChaMax", "Max Charge Power", Some("W"), Some("power"), M, None),
    ("status", "Charge Status", None, None, None, Some("mdi:battery-charging")),
];

static STORAGE_BINARY_SENSORS: &[BinaryDef] = &[
    ("charge_limit_active", "Charge Limit Active", None, Some("mdi:battery-lock")),
    ("discharge_limit_active", "Discharge Limit Active", None, Some("mdi:battery-lock")),
];

/// Diagnostic entities fed by the runtime report
static RUNTIME_SENSORS: &[SensorDef] = &[
    ("runtime/status", "Runtime Status", None, None, None, Some("mdi:heart-pulse")),
    ("runtime/last_seen", "Last Seen", None, Some("timestamp"), None, Some("mdi:clock-outline")),
    ("runtime/read_errors", "Read Errors", None, None, None, Some("mdi:alert-circle")),
    ("runtime/uptime", "Uptime", None, None, None, Some("mdi:timer-outline")),
    ("runtime/model_id", "Model ID", None, None, None, Some("mdi:identifier")),
];

#[derive(Debug, Clone, Serialize)]
struct HaDevice {
    identifiers: Vec<String>,
    name: String,
    manufacturer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    serial_number: Option<String>,
    sw_version: String,
}

#[derive(Debug, Clone, Serialize)]
struct HaOrigin {
    name: &'static str,
    sw_version: &'static str,
}

#[derive(Debug, Serialize)]
struct EntityConfig<'a> {
    name: String,
    unique_id: String,
    state_topic: String,
    availability_topic: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    unit_of_measurement: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    device_class: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    state_class: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    icon: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    entity_category: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload_on: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload_off: Option<&'static str>,
    device: &'a HaDevice,
    origin: &'a HaOrigin,
}

/// Builds the config messages for one device group (inverter, meter or storage)
struct Group<'a> {
    discovery_prefix: &'a str,
    state_base: String,
    /// `fronius_{type}_{unit}`, the node id and unique id stem
    node: String,
    availability_topic: &'a str,
    device: HaDevice,
    origin: HaOrigin,
}

impl<'a> Group<'a> {
    fn new(
        discovery_prefix: &'a str,
        topic_prefix: &str,
        availability_topic: &'a str,
        kind: &str,
        device: &DeviceDescriptor,
    ) -> Self {
        let node = format!("fronius_{}_{}", kind, device.unit_id);
        let label = match kind {
            "inverter" => "Inverter",
            "meter" => "Smart Meter",
            _ => "Storage",
        };
        let mut name = format!("Fronius {} {}", label, device.unit_id);
        if !device.serial_number.is_empty() {
            name = format!("{} ({})", name, device.serial_number);
        }
        let manufacturer = if device.manufacturer.is_empty() {
            "Fronius".to_string()
        } else {
            device.manufacturer.clone()
        };
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());

        Self {
            discovery_prefix,
            state_base: format!("{}/{}/{}", topic_prefix, kind, device.unit_id),
            availability_topic,
            device: HaDevice {
                identifiers: vec![node.clone()],
                name,
                manufacturer,
                model: non_empty(&device.model),
                serial_number: non_empty(&device.serial_number),
                sw_version: format!("{ORIGIN} {SW_VERSION}"),
            },
            node,
            origin: HaOrigin {
                name: ORIGIN,
                sw_version: SW_VERSION,
            },
        }
    }

    fn object_id(leaf: &str) -> String {
        leaf.to_lowercase().replace('/', "_")
    }

    fn message(&self, component: &str, leaf: &str, config: &EntityConfig<'_>) -> Option<Message> {
        let topic = format!(
            "{}/{}/{}/{}/config",
            self.discovery_prefix,
            component,
            self.node,
            Self::object_id(leaf)
        );
        match serde_json::to_string(config) {
            Ok(payload) => Some(Message {
                topic,
                payload,
                retain: Some(true),
                always: true,
            }),
            Err(e) => {
                debug!("{}: discovery config not serializable: {}", topic, e);
                None
            },
        }
    }

    fn entity(&self, leaf: &str, name: String) -> EntityConfig<'_> {
        EntityConfig {
            name,
            unique_id: format!("{}_{}", self.node, Self::object_id(leaf)),
            state_topic: format!("{}/{}", self.state_base, leaf),
            availability_topic: self.availability_topic,
            unit_of_measurement: None,
            device_class: None,
            state_class: None,
            icon: None,
            entity_category: None,
            payload_on: None,
            payload_off: None,
            device: &self.device,
            origin: &self.origin,
        }
    }

    fn sensors(&self, defs: &[SensorDef], category: Option<&'static str>, out: &mut Vec<Message>) {
        for &(leaf, name, unit, device_class, state_class, icon) in defs {
            let config = EntityConfig {
                unit_of_measurement: unit,
                device_class,
                state_class,
                icon,
                entity_category: category,
                ..self.entity(leaf, name.to_string())
            };
            out.extend(self.message("sensor", leaf, &config));
        }
    }

    fn binary_sensors(&self, defs: &[BinaryDef], out: &mut Vec<Message>) {
        for &(leaf, name, device_class, icon) in defs {
            let config = EntityConfig {
                device_class,
                icon,
                payload_on: Some("true"),
                payload_off: Some("false"),
                ..self.entity(leaf, name.to_string())
            };
            out.extend(self.message("binary_sensor", leaf, &config));
        }
    }

    fn mppt_sensors(&self, out: &mut Vec<Message>) {
        for input in 1..=MPPT_INPUTS {
            for &(suffix, name, unit, device_class, state_class) in MPPT_SENSORS {
                let leaf = format!("mppt/{input}/{suffix}");
                let config = EntityConfig {
                    unit_of_measurement: Some(unit),
                    device_class: Some(device_class),
                    state_class,
                    ..self.entity(&leaf, format!("String {input} {name}"))
                };
                out.extend(self.message("sensor", &leaf, &config));
            }
        }
    }
}

/// Discovery configs for every entity of one discovered device
///
/// Inverters with storage also get a storage device.
pub fn discovery_messages(
    discovery_prefix: &str,
    topic_prefix: &str,
    device_type: DeviceType,
    device: &DeviceDescriptor,
) -> Vec<Message> {
    let availability = format!("{topic_prefix}/status");
    let mut out = Vec::new();
    match device_type {
        DeviceType::Inverter => {
            let group = Group::new(discovery_prefix, topic_prefix, &availability, "inverter", device);
            group.sensors(INVERTER_SENSORS, None, &mut out);
            group.binary_sensors(INVERTER_BINARY_SENSORS, &mut out);
            group.mppt_sensors(&mut out);
            group.sensors(RUNTIME_SENSORS, Some("diagnostic"), &mut out);
            if device.has_storage {
                let storage =
                    Group::new(discovery_prefix, topic_prefix, &availability, "storage", device);
                storage.sensors(STORAGE_SENSORS, None, &mut out);
                storage.binary_sensors(STORAGE_BINARY_SENSORS, &mut out);
            }
        },
        DeviceType::Meter => {
            let group = Group::new(discovery_prefix, topic_prefix, &availability, "meter", device);
            group.sensors(METER_SENSORS, None, &mut out);
            group.sensors(RUNTIME_SENSORS, Some("diagnostic"), &mut out);
        },
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn inverter(has_storage: bool) -> DeviceDescriptor {
        DeviceDescriptor {
            unit_id: 1,
            device_type: Some(DeviceType::Inverter),
            manufacturer: "Fronius".into(),
            model: "Symo 10.0-3-M".into(),
            model_id: Some(103),
            serial_number: "34119102".into(),
            has_storage,
            ..Default::default()
        }
    }

    fn config(messages: &[Message], topic: &str) -> Value {
        let msg = messages
            .iter()
            .find(|m| m.topic == topic)
            .unwrap_or_else(|| panic!("no message on {topic}"));
        serde_json::from_str(&msg.payload).unwrap()
    }

    #[test]
    fn test_inverter_power_sensor() {
        let messages = discovery_messages("homeassistant", "fronius", DeviceType::Inverter, &inverter(false));
        let w = config(&messages, "homeassistant/sensor/fronius_inverter_1/w/config");

        assert_eq!(w["name"], "AC Power");
        assert_eq!(w["unique_id"], "fronius_inverter_1_w");
        assert_eq!(w["state_topic"], "fronius/inverter/1/W");
        assert_eq!(w["availability_topic"], "fronius/status");
        assert_eq!(w["unit_of_measurement"], "W");
        assert_eq!(w["device_class"], "power");
        assert_eq!(w["state_class"], "measurement");
        assert!(w.get("icon").is_none());
        assert!(w.get("payload_on").is_none());

        let device = &w["device"];
        assert_eq!(device["identifiers"][0], "fronius_inverter_1");
        assert_eq!(device["name"], "Fronius Inverter 1 (34119102)");
        assert_eq!(device["manufacturer"], "Fronius");
        assert_eq!(device["model"], "Symo 10.0-3-M");
        assert_eq!(w["origin"]["name"], "fronsrv");
    }

    #[test]
    fn test_every_config_is_retained_and_forced() {
        let messages = discovery_messages("homeassistant", "fronius", DeviceType::Inverter, &inverter(true));
        assert!(messages.iter().all(|m| m.retain == Some(true) && m.always));
        assert!(messages.iter().all(|m| m.topic.ends_with("/config")));
    }

    #[test]
    fn test_binary_sensor_payloads_match_published_booleans() {
        let messages = discovery_messages("homeassistant", "fronius", DeviceType::Inverter, &inverter(false));
        let active = config(&messages, "homeassistant/binary_sensor/fronius_inverter_1/active/config");
        assert_eq!(active["state_topic"], "fronius/inverter/1/active");
        assert_eq!(active["payload_on"], "true");
        assert_eq!(active["payload_off"], "false");
        assert_eq!(active["device_class"], "running");

        let connected = config(
            &messages,
            "homeassistant/binary_sensor/fronius_inverter_1/controls_connected/config",
        );
        assert_eq!(connected["state_topic"], "fronius/inverter/1/controls/connected");
        assert_eq!(connected["unique_id"], "fronius_inverter_1_controls_connected");
    }

    #[test]
    fn test_mppt_and_runtime_entities() {
        let messages = discovery_messages("homeassistant", "fronius", DeviceType::Inverter, &inverter(false));
        let dcv = config(&messages, "homeassistant/sensor/fronius_inverter_1/mppt_2_dcv/config");
        assert_eq!(dcv["name"], "String 2 Voltage");
        assert_eq!(dcv["state_topic"], "fronius/inverter/1/mppt/2/DCV");
        assert_eq!(dcv["unit_of_measurement"], "V");

        let errors = config(&messages, "homeassistant/sensor/fronius_inverter_1/runtime_read_errors/config");
        assert_eq!(errors["entity_category"], "diagnostic");
        assert_eq!(errors["state_topic"], "fronius/inverter/1/runtime/read_errors");
    }

    #[test]
    fn test_storage_device_only_with_storage() {
        let without = discovery_messages("homeassistant", "fronius", DeviceType::Inverter, &inverter(false));
        assert!(without.iter().all(|m| !m.topic.contains("fronius_storage_1")));

        let with = discovery_messages("homeassistant", "fronius", DeviceType::Inverter, &inverter(true));
        let soc = config(&with, "homeassistant/sensor/fronius_storage_1/chastate/config");
        assert_eq!(soc["state_topic"], "fronius/storage/1/ChaState");
        assert_eq!(soc["device_class"], "battery");
        assert_eq!(soc["device"]["identifiers"][0], "fronius_storage_1");
        assert_eq!(soc["device"]["name"], "Fronius Storage 1 (34119102)");
    }

    #[test]
    fn test_meter_configs() {
        let meter = DeviceDescriptor {
            unit_id: 240,
            device_type: Some(DeviceType::Meter),
            model: "Smart Meter TS 65A-3".into(),
            ..Default::default()
        };
        let messages = discovery_messages("ha", "home/pv", DeviceType::Meter, &meter);
        assert_eq!(messages.len(), METER_SENSORS.len() + RUNTIME_SENSORS.len());

        let exported = config(&messages, "ha/sensor/fronius_meter_240/totwhexp/config");
        assert_eq!(exported["state_topic"], "home/pv/meter/240/TotWhExp");
        assert_eq!(exported["state_class"], "total_increasing");
        assert_eq!(exported["availability_topic"], "home/pv/status");
        // no serial: plain name, manufacturer falls back
        assert_eq!(exported["device"]["name"], "Fronius Smart Meter 240");
        assert_eq!(exported["device"]["manufacturer"], "Fronius");
        assert!(exported["device"].get("serial_number").is_none());
        assert!(messages.iter().all(|m| !m.topic.contains("binary_sensor")));
    }
}
