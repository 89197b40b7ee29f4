//! Service lifecycle
//!
//! Connect, discover, poll until cancelled, then shut down in order:
//! scheduler first, sinks second, health file last.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use errors::{BridgeError, BridgeResult};
use sunspec::RegisterMap;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::device::DeviceFilter;
use crate::health::{HealthReport, MqttState};
use crate::identify::DeviceIdentifier;
use crate::modbus::{GatewayConnection, RegisterTransport, TcpTransport};
use crate::publish::{InfluxWriter, LogSink, MqttPublisher, PublishSink, SinkSet};
use crate::runtime::{ReconnectError, ReconnectHelper, ReconnectPolicy};
use crate::scheduler::{HostProbe, PingProbe, PollingScheduler, SchedulerSettings};

/// Register map from `path`, or the built-in one
pub fn load_register_map(path: Option<&Path>) -> BridgeResult<RegisterMap> {
    let Some(path) = path else {
        return Ok(RegisterMap::default());
    };
    let text = std::fs::read_to_string(path).map_err(|e| {
        BridgeError::invalid_config("general.register_map", format!("{}: {}", path.display(), e))
    })?;
    let map = RegisterMap::from_json(&text)?;
    info!("Register map loaded from {}", path.display());
    Ok(map)
}

/// Configured sinks plus a handle on the MQTT one for health reporting
pub struct Sinks {
    pub set: Arc<SinkSet>,
    pub mqtt: Option<Arc<MqttPublisher>>,
}

impl Sinks {
    /// MQTT and InfluxDB when enabled; the log sink when neither is
    pub fn from_config(config: &AppConfig) -> BridgeResult<Self> {
        let mut set = SinkSet::new();
        let mut mqtt = None;

        if config.mqtt.enabled {
            let publisher = Arc::new(MqttPublisher::new(&config.mqtt, config.general.publish_mode)?);
            set.push(Arc::clone(&publisher) as Arc<dyn PublishSink>);
            mqtt = Some(publisher);
        }
        if config.influxdb.enabled {
            let writer = InfluxWriter::new(&config.influxdb, config.influx_publish_mode())?;
            set.push(Arc::new(writer));
        }
        if set.is_empty() {
            info!("No publisher enabled, records go to the debug log");
            set.push(Arc::new(LogSink));
        }
        info!("Publishing to {}", set.names().join(", "));

        Ok(Self {
            set: Arc::new(set),
            mqtt,
        })
    }

    /// Only the log sink
    pub fn log_only() -> Self {
        let mut set = SinkSet::new();
        set.push(Arc::new(LogSink));
        Self {
            set: Arc::new(set),
            mqtt: None,
        }
    }

    pub fn mqtt_state(&self) -> MqttState {
        match &self.mqtt {
            Some(m) if m.is_connected() => MqttState::Connected,
            Some(_) => MqttState::Disconnected,
            None => MqttState::Disabled,
        }
    }
}

pub struct Bridge {
    config: AppConfig,
    filter: DeviceFilter,
    connection: Arc<GatewayConnection>,
    map: Arc<RegisterMap>,
    sinks: Sinks,
    probe: Arc<dyn HostProbe>,
    started: Instant,
}

impl Bridge {
    /// Production wiring: Modbus/TCP transport, ping probe, configured sinks
    pub fn new(config: AppConfig, filter: DeviceFilter) -> BridgeResult<Self> {
        let map = load_register_map(config.general.register_map.as_deref())?;
        let transport = TcpTransport::new(
            config.modbus.host.clone(),
            config.modbus.port,
            config.modbus.timeout(),
        );
        let sinks = Sinks::from_config(&config)?;
        Ok(Self::with_parts(
            config,
            filter,
            Box::new(transport),
            map,
            sinks,
            Arc::new(PingProbe::default()),
        ))
    }

    pub fn with_parts(
        config: AppConfig,
        filter: DeviceFilter,
        transport: Box<dyn RegisterTransport>,
        map: RegisterMap,
        sinks: Sinks,
        probe: Arc<dyn HostProbe>,
    ) -> Self {
        let connection = Arc::new(GatewayConnection::new(
            config.modbus.endpoint(),
            transport,
            config.modbus.retry_attempts,
            config.modbus.retry_delay(),
        ));
        Self {
            config,
            filter,
            connection,
            map: Arc::new(map),
            sinks,
            probe,
            started: Instant::now(),
        }
    }

    pub fn connection(&self) -> &Arc<GatewayConnection> {
        &self.connection
    }

    /// Run until `token` is cancelled
    ///
    /// Fails when the gateway cannot be reached within the startup budget or
    /// no device answers discovery.
    pub async fn run(self, token: CancellationToken) -> BridgeResult<()> {
        let endpoint = self.config.modbus.endpoint();
        let policy = ReconnectPolicy::from_config(
            self.config.modbus.connect_attempts,
            self.config.modbus.connect_initial_delay_secs,
            self.config.modbus.connect_max_delay_secs,
        );
        let mut reconnect = ReconnectHelper::new(policy);
        let connection = Arc::clone(&self.connection);
        let connected = reconnect
            .run(&endpoint, &token, || {
                let connection = Arc::clone(&connection);
                async move { connection.connect().await }
            })
            .await;
        match connected {
            Ok(_) => {},
            Err(ReconnectError::Cancelled) => {
                info!("Shutdown requested before the gateway answered");
                self.sinks.set.close().await;
                return Ok(());
            },
            Err(e @ ReconnectError::MaxAttemptsExceeded(_)) => {
                error!("Could not connect to {}: {}", endpoint, e);
                self.sinks.set.close().await;
                return Err(BridgeError::ConnectionFailed {
                    endpoint,
                    reason: e.to_string(),
                });
            },
        }

        let identifier = DeviceIdentifier::new(Arc::clone(&self.connection), Arc::clone(&self.map));
        let discovered = identifier
            .discover(&self.config.devices.inverters, &self.config.devices.meters, self.filter)
            .await;
        if discovered.is_empty() {
            error!("No devices found on {}", endpoint);
            self.connection.disconnect().await;
            self.sinks.set.close().await;
            return Err(BridgeError::NoDevices);
        }
        info!(
            "Polling {} inverter(s) and {} meter(s)",
            discovered.inverters.len(),
            discovered.meters.len()
        );
        if let Some(mqtt) = &self.sinks.mqtt {
            mqtt.publish_discovery(&discovered);
        }

        let scheduler = PollingScheduler::new(
            SchedulerSettings::from_config(&self.config.modbus, &self.config.devices),
            Arc::clone(&self.connection),
            Arc::clone(&self.map),
            discovered,
            Arc::clone(&self.sinks.set) as Arc<dyn PublishSink>,
            Arc::clone(&self.probe),
        );
        scheduler.start();

        let health_file = self.config.general.health_file.clone();
        let mut ticker = tokio::time::interval(self.config.general.runtime_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = ticker.tick() => {
                    self.report(&scheduler, &health_file);
                },
            }
        }

        info!("Shutting down");
        scheduler.stop();
        scheduler.join().await;
        self.sinks.set.close().await;
        self.report(&scheduler, &health_file);
        self.connection.disconnect().await;

        let stats = self.connection.stats();
        let attempts = reconnect.stats();
        info!(
            "Modbus stats: {} successful reads, {} failed reads, {} startup connection attempts",
            stats.successful_reads, stats.failed_reads, attempts.total_attempts
        );
        Ok(())
    }

    fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Health file plus runtime topics
    fn report(&self, scheduler: &PollingScheduler, health_file: &Path) {
        let uptime = self.uptime();
        let status = scheduler.status();
        let health = HealthReport::from_scheduler(&status, self.sinks.mqtt_state(), uptime);
        if let Err(e) = health.write(health_file) {
            warn!("Health file {} not written: {}", health_file.display(), e);
        }
        self.sinks.set.publish_runtime(&scheduler.runtime_snapshot(), uptime);
    }
}
