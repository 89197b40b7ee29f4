//! Publish sinks
//!
//! The scheduler calls [`PublishSink::emit`] from its polling task, so an
//! implementation must hand the record off without waiting on the network.
//! Delivery failures stay inside the sink.

pub mod discovery;
pub mod fields;
pub mod influx;
pub mod line_protocol;
pub mod mqtt;
pub mod record;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::runtime::RuntimeSnapshot;

pub use influx::InfluxWriter;
pub use mqtt::MqttPublisher;
pub use record::{
    DeviceIdentity, InverterRecord, MeterRecord, PublishRecord, RecordKind, StorageRecord,
};

#[async_trait]
pub trait PublishSink: Send + Sync {
    fn name(&self) -> &'static str;

    /// Hand one decoded record to the sink
    fn emit(&self, unit_id: u8, record: &PublishRecord);

    /// Diagnostic runtime report, published every runtime interval
    fn publish_runtime(&self, _snapshot: &RuntimeSnapshot, _uptime: Duration) {}

    /// Flush and release resources
    async fn close(&self) {}
}

/// Debug-logs every record; used when no other sink is configured
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl PublishSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    fn emit(&self, unit_id: u8, record: &PublishRecord) {
        match record {
            PublishRecord::Inverter(r) => debug!(
                "inverter {}: W={:?} St={} ({}) events={}",
                unit_id,
                r.measurement.ac_power,
                r.status.code,
                r.status.name,
                r.events.len()
            ),
            PublishRecord::Meter(r) => debug!(
                "meter {}: W={:?} Hz={:?}",
                unit_id, r.measurement.power_total, r.measurement.frequency
            ),
            PublishRecord::Storage(r) => debug!(
                "storage {}: SoC={:?}% status={:?}",
                unit_id,
                r.reading.charge_state_pct,
                r.reading.charge_status.map(|s| s.name)
            ),
        }
    }

    fn publish_runtime(&self, snapshot: &RuntimeSnapshot, _uptime: Duration) {
        debug!(
            "runtime: inverters {}/{} {}, meters {}/{} {}",
            snapshot.inverter.online,
            snapshot.inverter.total,
            snapshot.inverter.status.as_str(),
            snapshot.meter.online,
            snapshot.meter.total,
            snapshot.meter.status.as_str()
        );
    }
}

/// Forwards every call to each configured sink in order
#[derive(Default, Clone)]
pub struct SinkSet {
    sinks: Vec<Arc<dyn PublishSink>>,
}

impl SinkSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sink: Arc<dyn PublishSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.sinks.iter().map(|s| s.name()).collect()
    }
}

#[async_trait]
impl PublishSink for SinkSet {
    fn name(&self) -> &'static str {
        "fanout"
    }

    fn emit(&self, unit_id: u8, record: &PublishRecord) {
        for sink in &self.sinks {
            sink.emit(unit_id, record);
        }
    }

    fn publish_runtime(&self, snapshot: &RuntimeSnapshot, uptime: Duration) {
        for sink in &self.sinks {
            sink.publish_runtime(snapshot, uptime);
        }
    }

    async fn close(&self) {
        for sink in &self.sinks {
            sink.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use sunspec::MeterMeasurement;

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<(u8, RecordKind)>>,
        closed: Mutex<bool>,
    }

    #[async_trait]
    impl PublishSink for Recording {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn emit(&self, unit_id: u8, record: &PublishRecord) {
            self.seen.lock().push((unit_id, record.kind()));
        }

        async fn close(&self) {
            *self.closed.lock() = true;
        }
    }

    fn meter_record() -> PublishRecord {
        PublishRecord::Meter(MeterRecord {
            identity: DeviceIdentity {
                unit_id: 240,
                ..Default::default()
            },
            model_id: 203,
            measurement: MeterMeasurement::default(),
        })
    }

    #[tokio::test]
    async fn test_fanout_reaches_every_sink() {
        let a = Arc::new(Recording::default());
        let b = Arc::new(Recording::default());
        let mut set = SinkSet::new();
        set.push(a.clone());
        set.push(b.clone());
        set.push(Arc::new(LogSink));
        assert_eq!(set.names(), vec!["recording", "recording", "log"]);

        set.emit(240, &meter_record());
        set.close().await;

        assert_eq!(*a.seen.lock(), vec![(240, RecordKind::Meter)]);
        assert_eq!(*b.seen.lock(), vec![(240, RecordKind::Meter)]);
        assert!(*a.closed.lock() && *b.closed.lock());
    }

    #[test]
    fn test_record_kind_serializes_as_tag() {
        let record = meter_record();
        let json = serde_json::to_value(&record).expect("serializes");
        assert_eq!(json["kind"], "meter");
        assert_eq!(record.identity().unit_id, 240);
    }
}
