//! Service configuration
//!
//! YAML file merged with `FRONSRV_` environment variables, nested keys split
//! on `__` (`FRONSRV_MODBUS__HOST=10.0.0.5`). Every field has a default except
//! the gateway host.

use std::path::{Path, PathBuf};
use std::time::Duration;

use errors::{config_error, BridgeError, BridgeResult};
use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::publish::discovery::DEFAULT_DISCOVERY_PREFIX;

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "FRONSRV_CONFIG";

/// Looked up in order when no path is given
pub const DEFAULT_CONFIG_PATHS: [&str; 3] = [
    "/app/config/fronsrv.yaml",
    "config/fronsrv.yaml",
    "./fronsrv.yaml",
];

/// Highest valid Modbus unit id
const MAX_UNIT_ID: u8 = 247;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishMode {
    /// Only values that differ from the last published one
    #[default]
    Changed,
    /// Every value on every poll
    All,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub log_level: String,
    pub log_file: Option<PathBuf>,
    pub publish_mode: PublishMode,
    pub health_file: PathBuf,
    pub pid_file: Option<PathBuf>,
    /// JSON register map override
    pub register_map: Option<PathBuf>,
    /// Health file and runtime topics refresh period
    pub runtime_interval_secs: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_file: None,
            publish_mode: PublishMode::Changed,
            health_file: PathBuf::from("/tmp/fronius_health"),
            pid_file: None,
            register_map: None,
            runtime_interval_secs: 30,
        }
    }
}

impl GeneralConfig {
    pub fn runtime_interval(&self) -> Duration {
        Duration::from_secs(self.runtime_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModbusConfig {
    pub host: String,
    pub port: u16,
    pub timeout_secs: f64,
    pub retry_attempts: u32,
    pub retry_delay_secs: f64,
    pub night_mode_enabled: bool,
    pub night_start_hour: u32,
    pub night_end_hour: u32,
    pub night_poll_interval_secs: u64,
    pub ping_check_enabled: bool,
    pub consecutive_failures_for_sleep: u32,
    /// Startup connection budget
    pub connect_attempts: u32,
    pub connect_initial_delay_secs: u64,
    pub connect_max_delay_secs: u64,
}

impl Default for ModbusConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 502,
            timeout_secs: 3.0,
            retry_attempts: 2,
            retry_delay_secs: 0.1,
            night_mode_enabled: true,
            night_start_hour: 21,
            night_end_hour: 6,
            night_poll_interval_secs: 300,
            ping_check_enabled: true,
            consecutive_failures_for_sleep: 3,
            connect_attempts: 10,
            connect_initial_delay_secs: 2,
            connect_max_delay_secs: 60,
        }
    }
}

impl ModbusConfig {
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_secs.max(0.0))
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs_f64(self.retry_delay_secs.max(0.0))
    }

    pub fn night_poll_interval(&self) -> Duration {
        Duration::from_secs(self.night_poll_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DevicesConfig {
    pub inverters: Vec<u8>,
    pub meters: Vec<u8>,
    /// Pause between devices and between cycles
    pub poll_delay_secs: f64,
    /// Pause before the storage block of an inverter
    pub read_delay_ms: u64,
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Self {
            inverters: vec![1],
            meters: vec![240],
            poll_delay_secs: 1.0,
            read_delay_ms: 200,
        }
    }
}

impl DevicesConfig {
    pub fn poll_delay(&self) -> Duration {
        Duration::from_secs_f64(self.poll_delay_secs.max(0.0))
    }

    pub fn read_delay(&self) -> Duration {
        Duration::from_millis(self.read_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub enabled: bool,
    pub broker: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: String,
    pub topic_prefix: String,
    pub retain: bool,
    pub qos: u8,
    pub keep_alive_secs: u64,
    /// Publish Home Assistant discovery configs after device discovery
    pub ha_discovery: bool,
    pub ha_discovery_prefix: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            broker: "localhost".to_string(),
            port: 1883,
            username: None,
            password: None,
            client_id: "fronsrv".to_string(),
            topic_prefix: "fronius".to_string(),
            retain: true,
            qos: 0,
            keep_alive_secs: 60,
            ha_discovery: true,
            ha_discovery_prefix: DEFAULT_DISCOVERY_PREFIX.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InfluxConfig {
    pub enabled: bool,
    pub url: String,
    pub token: String,
    pub org: String,
    pub bucket: String,
    /// Minimum spacing of two points of the same device
    pub write_interval_secs: u64,
    /// Falls back to `general.publish_mode`
    pub publish_mode: Option<PublishMode>,
}

impl Default for InfluxConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "http://localhost:8086".to_string(),
            token: String::new(),
            org: String::new(),
            bucket: "fronius".to_string(),
            write_interval_secs: 5,
            publish_mode: None,
        }
    }
}

impl InfluxConfig {
    pub fn write_interval(&self) -> Duration {
        Duration::from_secs(self.write_interval_secs)
    }
}

/// Complete configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub general: GeneralConfig,
    pub modbus: ModbusConfig,
    pub devices: DevicesConfig,
    pub mqtt: MqttConfig,
    pub influxdb: InfluxConfig,
}

impl AppConfig {
    /// Load from `path` (or the first default path that exists) plus environment
    pub fn load(path: Option<&Path>) -> BridgeResult<Self> {
        let path = resolve_path(path);
        let mut figment = Figment::new();
        match &path {
            Some(p) => {
                info!("Loading configuration from {}", p.display());
                figment = figment.merge(Yaml::file(p));
            },
            None => debug!("No configuration file found, using defaults and environment"),
        }
        let config = Self::extract(figment)?;
        config.validate()?;
        Ok(config)
    }

    fn extract(figment: Figment) -> BridgeResult<Self> {
        figment
            .merge(Env::prefixed("FRONSRV_").split("__").ignore(&["config"]))
            .extract()
            .map_err(|e| config_error!("Failed to load configuration: {}", e))
    }

    pub fn validate(&self) -> BridgeResult<()> {
        if self.modbus.host.trim().is_empty() {
            return Err(BridgeError::invalid_config("modbus.host", "must be set"));
        }
        for (field, hour) in [
            ("modbus.night_start_hour", self.modbus.night_start_hour),
            ("modbus.night_end_hour", self.modbus.night_end_hour),
        ] {
            if hour > 23 {
                return Err(BridgeError::invalid_config(field, format!("{hour} outside 0-23")));
            }
        }
        if self.modbus.retry_attempts == 0 {
            return Err(BridgeError::invalid_config("modbus.retry_attempts", "must be at least 1"));
        }
        if self.modbus.consecutive_failures_for_sleep == 0 {
            return Err(BridgeError::invalid_config(
                "modbus.consecutive_failures_for_sleep",
                "must be at least 1",
            ));
        }
        if !self.modbus.timeout_secs.is_finite() || self.modbus.timeout_secs <= 0.0 {
            return Err(BridgeError::invalid_config("modbus.timeout_secs", "must be positive"));
        }
        if self.devices.inverters.is_empty() && self.devices.meters.is_empty() {
            return Err(BridgeError::invalid_config("devices", "no inverters or meters configured"));
        }
        for (field, ids) in [
            ("devices.inverters", &self.devices.inverters),
            ("devices.meters", &self.devices.meters),
        ] {
            if let Some(bad) = ids.iter().find(|id| **id == 0 || **id > MAX_UNIT_ID) {
                return Err(BridgeError::invalid_config(
                    field,
                    format!("unit id {bad} outside 1-{MAX_UNIT_ID}"),
                ));
            }
        }
        if self.mqtt.enabled && self.mqtt.qos > 2 {
            return Err(BridgeError::invalid_config("mqtt.qos", "must be 0, 1 or 2"));
        }
        if self.mqtt.enabled
            && self.mqtt.ha_discovery
            && self.mqtt.ha_discovery_prefix.trim_matches('/').is_empty()
        {
            return Err(BridgeError::invalid_config(
                "mqtt.ha_discovery_prefix",
                "must not be empty when ha_discovery is on",
            ));
        }
        if self.influxdb.enabled && (self.influxdb.token.is_empty() || self.influxdb.org.is_empty()) {
            return Err(BridgeError::invalid_config(
                "influxdb",
                "token and org are required when enabled",
            ));
        }
        Ok(())
    }

    /// Publish mode used by the InfluxDB sink
    pub fn influx_publish_mode(&self) -> PublishMode {
        self.influxdb.publish_mode.unwrap_or(self.general.publish_mode)
    }
}

/// CLI path, then `FRONSRV_CONFIG`, then the first default path that exists
fn resolve_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = explicit {
        return Some(p.to_path_buf());
    }
    if let Ok(p) = std::env::var(CONFIG_ENV) {
        if !p.is_empty() {
            return Some(PathBuf::from(p));
        }
    }
    DEFAULT_CONFIG_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.modbus.port, 502);
        assert_eq!(config.modbus.retry_attempts, 2);
        assert_eq!(config.modbus.night_start_hour, 21);
        assert_eq!(config.devices.inverters, vec![1]);
        assert_eq!(config.devices.meters, vec![240]);
        assert_eq!(config.general.publish_mode, PublishMode::Changed);
        assert!(!config.influxdb.enabled);
        // Host has no default
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_and_env_merge() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "fronsrv.yaml",
                r#"
modbus:
  host: 192.168.1.50
  night_start_hour: 22
devices:
  inverters: [1, 2]
  meters: []
general:
  publish_mode: all
"#,
            )?;
            jail.set_env("FRONSRV_MODBUS__PORT", "1502");
            jail.set_env("FRONSRV_MQTT__TOPIC_PREFIX", "pv");

            let config = AppConfig::load(Some(Path::new("fronsrv.yaml")))
                .map_err(|e| e.to_string())?;
            assert_eq!(config.modbus.host, "192.168.1.50");
            assert_eq!(config.modbus.port, 1502);
            assert_eq!(config.modbus.night_start_hour, 22);
            assert_eq!(config.modbus.night_end_hour, 6);
            assert_eq!(config.devices.inverters, vec![1, 2]);
            assert!(config.devices.meters.is_empty());
            assert_eq!(config.mqtt.topic_prefix, "pv");
            assert_eq!(config.general.publish_mode, PublishMode::All);
            assert_eq!(config.influx_publish_mode(), PublishMode::All);
            Ok(())
        });
    }

    #[test]
    fn test_env_only() {
        Jail::expect_with(|jail| {
            jail.set_env("FRONSRV_MODBUS__HOST", "fronius.local");
            let config = AppConfig::load(None).map_err(|e| e.to_string())?;
            assert_eq!(config.modbus.endpoint(), "fronius.local:502");
            Ok(())
        });
    }

    fn valid() -> AppConfig {
        let mut config = AppConfig::default();
        config.modbus.host = "10.0.0.5".to_string();
        config
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(valid().validate().is_ok());

        let mut c = valid();
        c.modbus.night_end_hour = 24;
        assert!(c.validate().is_err());

        let mut c = valid();
        c.devices.meters = vec![0];
        assert!(c.validate().is_err());

        let mut c = valid();
        c.devices.inverters.clear();
        c.devices.meters.clear();
        assert!(c.validate().is_err());

        let mut c = valid();
        c.mqtt.qos = 3;
        assert!(c.validate().is_err());

        let mut c = valid();
        c.mqtt.ha_discovery_prefix = "/".to_string();
        assert!(c.validate().is_err());
        c.mqtt.ha_discovery = false;
        assert!(c.validate().is_ok());

        let mut c = valid();
        c.influxdb.enabled = true;
        assert!(c.validate().is_err());
        c.influxdb.token = "t".to_string();
        c.influxdb.org = "home".to_string();
        assert!(c.validate().is_ok());
    }
}
