//! Bridge lifecycle with an in-memory gateway

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::Recorder;
use errors::BridgeError;
use fronsrv::publish::{PublishSink, RecordKind, SinkSet};
use fronsrv::scheduler::AlwaysReachable;
use fronsrv::{AppConfig, Bridge, DeviceFilter, Sinks};
use sunspec::RegisterMap;
use tokio_util::sync::CancellationToken;

fn config(health_file: &std::path::Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.modbus.host = "gateway".into();
    config.modbus.connect_attempts = 3;
    config.mqtt.enabled = false;
    config.general.health_file = health_file.to_path_buf();
    config
}

fn bridge(config: AppConfig, gateway: &common::Gateway, recorder: Arc<Recorder>) -> Bridge {
    let mut set = SinkSet::new();
    set.push(recorder as Arc<dyn PublishSink>);
    let sinks = Sinks {
        set: Arc::new(set),
        mqtt: None,
    };
    Bridge::with_parts(
        config,
        DeviceFilter::All,
        gateway.transport(),
        RegisterMap::default(),
        sinks,
        Arc::new(AlwaysReachable),
    )
}

#[tokio::test(start_paused = true)]
async fn test_runs_until_cancelled() {
    let dir = tempfile::tempdir().unwrap();
    let health = dir.path().join("fronius_health");
    let gateway = common::fronius_site();
    let recorder = Arc::new(Recorder::default());

    let token = CancellationToken::new();
    let task = tokio::spawn(bridge(config(&health), &gateway, recorder.clone()).run(token.clone()));

    tokio::time::sleep(Duration::from_secs(90)).await;
    assert!(recorder.count(RecordKind::Inverter) > 0);
    assert!(recorder.count(RecordKind::Meter) > 0);

    let text = std::fs::read_to_string(&health).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 7);
    assert!(lines[0].parse::<i64>().is_ok());
    assert!(lines.contains(&"mqtt:disabled"));
    assert!(lines.contains(&"sleep_mode:false"));

    token.cancel();
    task.await.unwrap().unwrap();
    assert!(health.exists());
}

#[tokio::test(start_paused = true)]
async fn test_no_devices_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = common::Gateway::new();
    let bridge = bridge(
        config(&dir.path().join("health")),
        &gateway,
        Arc::new(Recorder::default()),
    );

    let result = bridge.run(CancellationToken::new()).await;
    assert!(matches!(result, Err(BridgeError::NoDevices)));
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_gateway_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = common::fronius_site();
    gateway.set_refuse_connect(true);
    let bridge = bridge(
        config(&dir.path().join("health")),
        &gateway,
        Arc::new(Recorder::default()),
    );

    let result = bridge.run(CancellationToken::new()).await;
    assert!(matches!(result, Err(BridgeError::ConnectionFailed { .. })));
    assert_eq!(gateway.connects(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_startup_is_clean() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = common::fronius_site();
    gateway.set_refuse_connect(true);
    let bridge = bridge(
        config(&dir.path().join("health")),
        &gateway,
        Arc::new(Recorder::default()),
    );

    let token = CancellationToken::new();
    token.cancel();
    assert!(bridge.run(token).await.is_ok());
}
