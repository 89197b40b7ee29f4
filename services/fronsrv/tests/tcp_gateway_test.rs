//! Modbus/TCP transport against the gateway simulator

mod common;

use std::sync::Arc;
use std::time::Duration;

use fronsrv::identify::DeviceIdentifier;
use fronsrv::modbus::{GatewayConnection, TcpTransport};
use fronsrv::DeviceFilter;
use sunspec::model::DeviceType;
use sunspec::{decode_common, RegisterMap};

async fn connect(gateway: &common::Gateway, timeout: Duration) -> Arc<GatewayConnection> {
    let (addr, _server) = common::serve_tcp(gateway.clone()).await;
    let transport = TcpTransport::new(addr.ip().to_string(), addr.port(), timeout);
    Arc::new(GatewayConnection::new(
        addr.to_string(),
        Box::new(transport),
        2,
        Duration::from_millis(50),
    ))
}

#[tokio::test]
async fn test_reads_over_tcp() {
    let gateway = common::fronius_site();
    let connection = connect(&gateway, Duration::from_secs(1)).await;
    assert!(connection.connect().await);

    let regs = connection
        .read_registers(40001, 69, 1)
        .await
        .expect("common block");
    let common = decode_common(&regs).expect("SunSpec marker");
    assert_eq!(common.manufacturer, "Fronius");
    assert_eq!(common.model, "Symo 10.0-3-M");

    // Unknown unit: exception 0x0B, no data
    assert!(connection.read_registers(40001, 69, 9).await.is_none());

    assert_eq!(connection.read_registers(40070, 1, 240).await, Some(vec![203]));
    let stats = connection.stats();
    assert_eq!(stats.successful_reads, 2);
    assert_eq!(stats.failed_reads, 1);
}

#[tokio::test]
async fn test_silent_gateway_times_out() {
    let gateway = common::fronius_site();
    let connection = connect(&gateway, Duration::from_millis(200)).await;
    assert!(connection.connect().await);
    gateway.set_failing(true);

    assert!(connection.read_registers(40072, 50, 1).await.is_none());
    assert!(!connection.is_connected());
    assert_eq!(connection.stats().failed_reads, 1);

    gateway.set_failing(false);
    assert!(connection.read_registers(40072, 50, 1).await.is_some());
}

#[tokio::test]
async fn test_discovery_over_tcp() {
    let gateway = common::fronius_site();
    let connection = connect(&gateway, Duration::from_secs(1)).await;
    let identifier = DeviceIdentifier::new(connection, Arc::new(RegisterMap::default()));

    let found = identifier.discover(&[1], &[240], DeviceFilter::All).await;
    assert_eq!(found.inverters[0].device_type, Some(DeviceType::Inverter));
    assert_eq!(found.inverters[0].model_id, Some(103));
    assert_eq!(found.meters[0].device_type, Some(DeviceType::Meter));
}
