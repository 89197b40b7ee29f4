//! Health file for container probes
//!
//! The service rewrites a small `key:value` text file every runtime interval;
//! `fronsrv-healthcheck` reads it back and turns it into an exit code.
//!
//! ```text
//! 1760000000
//! healthy
//! mqtt:connected
//! modbus:true
//! sleep_mode:false
//! night_time:false
//! uptime:4d 12h 35m
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use errors::BridgeResult;
use thiserror::Error;

use crate::scheduler::SchedulerStatus;

/// Maximum file age while polling normally
pub const MAX_AGE_SECS: i64 = 120;
/// Maximum file age in sleep mode, where the loop wakes rarely
pub const MAX_AGE_SLEEP_SECS: i64 = 600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Sleep,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Sleep => "sleep",
            Self::Unhealthy => "unhealthy",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MqttState {
    Connected,
    Disconnected,
    Disabled,
}

impl MqttState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Disabled => "disabled",
        }
    }
}

/// `4d 12h 35m`; days only when non-zero, hours when non-zero or after days
pub fn format_uptime(uptime: Duration) -> String {
    let total = uptime.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3600;
    let minutes = (total % 3600) / 60;

    let mut parts = Vec::with_capacity(3);
    if days > 0 {
        parts.push(format!("{days}d"));
    }
    if hours > 0 || days > 0 {
        parts.push(format!("{hours}h"));
    }
    parts.push(format!("{minutes}m"));
    parts.join(" ")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    pub timestamp: i64,
    pub status: HealthStatus,
    pub mqtt: MqttState,
    pub modbus: bool,
    pub sleep_mode: bool,
    pub night_time: bool,
    pub uptime: Duration,
}

impl HealthReport {
    pub fn new(
        modbus: bool,
        sleep_mode: bool,
        night_time: bool,
        mqtt: MqttState,
        uptime: Duration,
    ) -> Self {
        let status = if sleep_mode {
            HealthStatus::Sleep
        } else if modbus {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };
        Self {
            timestamp: Utc::now().timestamp(),
            status,
            mqtt,
            modbus,
            sleep_mode,
            night_time,
            uptime,
        }
    }

    pub fn from_scheduler(status: &SchedulerStatus, mqtt: MqttState, uptime: Duration) -> Self {
        Self::new(
            status.connected,
            status.in_sleep_mode,
            status.is_night_time,
            mqtt,
            uptime,
        )
    }

    pub fn render(&self) -> String {
        format!(
            "{}\n{}\nmqtt:{}\nmodbus:{}\nsleep_mode:{}\nnight_time:{}\nuptime:{}\n",
            self.timestamp,
            self.status,
            self.mqtt.as_str(),
            self.modbus,
            self.sleep_mode,
            self.night_time,
            format_uptime(self.uptime)
        )
    }

    /// Write through a temp file and rename, so readers never see a partial file
    pub fn write(&self, path: &Path) -> BridgeResult<()> {
        let tmp = temp_path(path);
        std::fs::write(&tmp, self.render())?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HealthCheckError {
    #[error("health file {path} not readable: {reason}")]
    Unreadable { path: String, reason: String },

    #[error("health file is incomplete")]
    Incomplete,

    #[error("invalid timestamp {0:?}")]
    InvalidTimestamp(String),

    #[error("health file is stale ({age}s old, limit {limit}s)")]
    Stale { age: i64, limit: i64 },

    #[error("status is {0}")]
    Status(String),

    #[error("MQTT disconnected")]
    MqttDisconnected,

    #[error("Modbus disconnected")]
    ModbusDisconnected,
}

/// Judge health file contents at unix time `now`
pub fn check_health(text: &str, now: i64) -> Result<(), HealthCheckError> {
    let lines: Vec<&str> = text.lines().map(str::trim).collect();
    if lines.len() < 2 {
        return Err(HealthCheckError::Incomplete);
    }
    let timestamp: i64 = lines[0]
        .parse()
        .map_err(|_| HealthCheckError::InvalidTimestamp(lines[0].to_string()))?;

    let value = |key: &str| {
        lines[2..].iter().find_map(|line| {
            line.split_once(':')
                .filter(|(k, _)| *k == key)
                .map(|(_, v)| v.trim())
        })
    };
    let sleep_mode = value("sleep_mode") == Some("true");

    let limit = if sleep_mode {
        MAX_AGE_SLEEP_SECS
    } else {
        MAX_AGE_SECS
    };
    let age = now - timestamp;
    if age > limit {
        return Err(HealthCheckError::Stale { age, limit });
    }

    let status = lines[1];
    if status != HealthStatus::Healthy.as_str() && status != HealthStatus::Sleep.as_str() {
        return Err(HealthCheckError::Status(status.to_string()));
    }
    if value("mqtt") == Some(MqttState::Disconnected.as_str()) {
        return Err(HealthCheckError::MqttDisconnected);
    }
    if !sleep_mode && value("modbus") == Some("false") {
        return Err(HealthCheckError::ModbusDisconnected);
    }
    Ok(())
}

pub fn check_health_file(path: &Path, now: i64) -> Result<(), HealthCheckError> {
    let text = std::fs::read_to_string(path).map_err(|e| HealthCheckError::Unreadable {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    check_health(&text, now)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(modbus: bool, sleep_mode: bool, mqtt: MqttState) -> HealthReport {
        HealthReport {
            timestamp: 1_000,
            ..HealthReport::new(modbus, sleep_mode, false, mqtt, Duration::from_secs(3600))
        }
    }

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(Duration::from_secs(59)), "0m");
        assert_eq!(format_uptime(Duration::from_secs(35 * 60)), "35m");
        assert_eq!(format_uptime(Duration::from_secs(2 * 3600 + 60)), "2h 1m");
        assert_eq!(
            format_uptime(Duration::from_secs(4 * 86_400 + 12 * 3600 + 35 * 60)),
            "4d 12h 35m"
        );
        assert_eq!(format_uptime(Duration::from_secs(86_400 + 120)), "1d 0h 2m");
    }

    #[test]
    fn test_status_derivation() {
        assert_eq!(report(true, false, MqttState::Connected).status, HealthStatus::Healthy);
        assert_eq!(report(false, true, MqttState::Connected).status, HealthStatus::Sleep);
        assert_eq!(report(false, false, MqttState::Disabled).status, HealthStatus::Unhealthy);
    }

    #[test]
    fn test_render() {
        let text = report(true, false, MqttState::Connected).render();
        assert_eq!(
            text,
            "1000\nhealthy\nmqtt:connected\nmodbus:true\nsleep_mode:false\nnight_time:false\nuptime:1h 0m\n"
        );
        assert_eq!(check_health(&text, 1_050), Ok(()));
    }

    #[test]
    fn test_check_rules() {
        let healthy = report(true, false, MqttState::Connected).render();
        assert_eq!(
            check_health(&healthy, 1_121),
            Err(HealthCheckError::Stale { age: 121, limit: 120 })
        );

        let sleeping = report(false, true, MqttState::Disabled).render();
        assert_eq!(check_health(&sleeping, 1_500), Ok(()));
        assert!(matches!(
            check_health(&sleeping, 1_601),
            Err(HealthCheckError::Stale { limit: 600, .. })
        ));

        let no_mqtt = report(true, false, MqttState::Disconnected).render();
        assert_eq!(check_health(&no_mqtt, 1_000), Err(HealthCheckError::MqttDisconnected));

        let unhealthy = report(false, false, MqttState::Disabled).render();
        assert_eq!(
            check_health(&unhealthy, 1_000),
            Err(HealthCheckError::Status("unhealthy".into()))
        );

        let modbus_down = "1000\nhealthy\nmqtt:disabled\nmodbus:false\nsleep_mode:false\n";
        assert_eq!(
            check_health(modbus_down, 1_000),
            Err(HealthCheckError::ModbusDisconnected)
        );

        assert_eq!(check_health("1000\n", 1_000), Err(HealthCheckError::Incomplete));
        assert!(matches!(
            check_health("soon\nhealthy\n", 1_000),
            Err(HealthCheckError::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn test_write_is_atomic_and_readable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fronius_health");
        let r = report(true, false, MqttState::Connected);
        r.write(&path).unwrap();

        assert!(!dir.path().join("fronius_health.tmp").exists());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), r.render());
        assert_eq!(check_health_file(&path, 1_010), Ok(()));

        let missing = check_health_file(&dir.path().join("absent"), 1_010);
        assert!(matches!(missing, Err(HealthCheckError::Unreadable { .. })));
    }
}
