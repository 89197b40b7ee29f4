//! Shared fixtures for fronsrv integration tests
//!
//! [`Gateway`] is an in-memory DataManager: sparse per-unit register banks
//! plus switches that make reads or connects fail. It can be plugged in as a
//! [`RegisterTransport`] directly or served over Modbus/TCP by [`serve_tcp`].

#![allow(dead_code)]

use std::collections::HashMap;
use std::future::{self, Future};
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use errors::{BridgeError, BridgeResult};
use fronsrv::modbus::{RegisterTransport, FC_READ_HOLDING_REGISTERS};
use fronsrv::publish::{PublishRecord, PublishSink, RecordKind};
use parking_lot::Mutex;
use sunspec::strings::encode_string;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_modbus::prelude::*;
use tokio_modbus::server::tcp::{accept_tcp_connection, Server};
use tokio_modbus::server::Service;

/// Unused register value
pub const NOT_IMPLEMENTED: u16 = 0xFFFF;

#[derive(Debug, Default)]
struct GatewayState {
    /// unit -> one-based address -> value
    units: HashMap<u8, HashMap<u16, u16>>,
    fail_reads: bool,
    refuse_connect: bool,
    reads: u64,
    /// (unit, one-based start address) -> reads
    reads_at: HashMap<(u8, u16), u64>,
    connects: u64,
}

#[derive(Debug, Clone, Default)]
pub struct Gateway {
    state: Arc<Mutex<GatewayState>>,
}

impl Gateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write `values` starting at one-based `address`
    pub fn set_block(&self, unit_id: u8, address: u16, values: &[u16]) {
        let mut state = self.state.lock();
        let bank = state.units.entry(unit_id).or_default();
        for (offset, value) in values.iter().enumerate() {
            bank.insert(address + offset as u16, *value);
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.state.lock().fail_reads = failing;
    }

    pub fn set_refuse_connect(&self, refuse: bool) {
        self.state.lock().refuse_connect = refuse;
    }

    pub fn reads(&self) -> u64 {
        self.state.lock().reads
    }

    /// Reads of `unit_id` that started at one-based `address`
    pub fn reads_at(&self, unit_id: u8, address: u16) -> u64 {
        self.state
            .lock()
            .reads_at
            .get(&(unit_id, address))
            .copied()
            .unwrap_or(0)
    }

    pub fn connects(&self) -> u64 {
        self.state.lock().connects
    }

    pub fn transport(&self) -> Box<dyn RegisterTransport> {
        Box::new(BankTransport {
            gateway: self.clone(),
            open: false,
        })
    }

    fn connect(&self) -> BridgeResult<()> {
        let mut state = self.state.lock();
        state.connects += 1;
        if state.refuse_connect {
            return Err(BridgeError::ConnectionFailed {
                endpoint: "gateway".into(),
                reason: "connection refused".into(),
            });
        }
        Ok(())
    }

    /// Registers at zero-based wire `address`; unknown units answer with
    /// exception 0x0B (gateway target failed to respond)
    fn read(&self, unit_id: u8, address: u16, count: u16) -> BridgeResult<Vec<u16>> {
        let mut state = self.state.lock();
        state.reads += 1;
        *state.reads_at.entry((unit_id, address + 1)).or_default() += 1;
        if state.fail_reads {
            return Err(BridgeError::Timeout("gateway".into()));
        }
        let Some(bank) = state.units.get(&unit_id) else {
            return Err(BridgeError::ModbusException {
                function: FC_READ_HOLDING_REGISTERS,
                code: 0x0B,
            });
        };
        let first = address + 1;
        Ok((first..first + count)
            .map(|a| bank.get(&a).copied().unwrap_or(NOT_IMPLEMENTED))
            .collect())
    }
}

struct BankTransport {
    gateway: Gateway,
    open: bool,
}

#[async_trait]
impl RegisterTransport for BankTransport {
    async fn connect(&mut self) -> BridgeResult<()> {
        self.open = false;
        self.gateway.connect()?;
        self.open = true;
        Ok(())
    }

    async fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn read_holding_registers(
        &mut self,
        unit_id: u8,
        address: u16,
        count: u16,
    ) -> BridgeResult<Vec<u16>> {
        if !self.open {
            return Err(BridgeError::NotConnected("gateway".into()));
        }
        self.gateway.read(unit_id, address, count)
    }
}

/// Request handler that answers from a [`Gateway`]
#[derive(Clone)]
struct GatewayService {
    gateway: Gateway,
}

impl Service for GatewayService {
    type Request = SlaveRequest<'static>;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = Pin<Box<dyn Future<Output = Result<Response, ExceptionCode>> + Send>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        let SlaveRequest { slave, request } = req;
        let Request::ReadHoldingRegisters(address, count) = request else {
            return Box::pin(future::ready(Err(ExceptionCode::IllegalFunction)));
        };
        match self.gateway.read(slave, address, count) {
            Ok(regs) => Box::pin(future::ready(Ok(Response::ReadHoldingRegisters(regs)))),
            Err(BridgeError::ModbusException { code, .. }) => {
                Box::pin(future::ready(Err(ExceptionCode::Custom(code))))
            },
            // A silent gateway: let the client time out
            Err(_) => Box::pin(future::pending()),
        }
    }
}

/// Serve `gateway` over Modbus/TCP on an ephemeral localhost port
pub async fn serve_tcp(gateway: Gateway) -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Server::new(listener);
    let handle = tokio::spawn(async move {
        let service = GatewayService { gateway };
        let new_service = |_socket_addr| Ok(Some(service.clone()));
        let on_connected = |stream, socket_addr| async move {
            accept_tcp_connection(stream, socket_addr, new_service)
        };
        let on_process_error = |err| eprintln!("gateway simulator: {err}");
        let _ = server.serve(&on_connected, on_process_error).await;
    });
    (addr, handle)
}

/// Marker plus common model, 69 registers
pub fn common_block(manufacturer: &str, model: &str, serial: &str) -> Vec<u16> {
    let mut regs = vec![0x5375, 0x6E53, 1, 65];
    regs.extend(encode_string(manufacturer, 16));
    regs.extend(encode_string(model, 16));
    regs.extend(encode_string("", 8));
    regs.extend(encode_string("1.28.7-1", 8));
    regs.extend(encode_string(serial, 16));
    regs.push(1);
    regs
}

/// Model 103 body (50 registers) with `watts` AC power, 50.01 Hz, state MPPT
pub fn inverter_block(watts: u16) -> Vec<u16> {
    let mut r = vec![0u16; 50];
    r[12] = watts;
    r[14] = 5001;
    r[15] = (-2i16) as u16;
    r[36] = 4;
    r
}

/// Model 203 body (53 registers) with `watts` total power
pub fn meter_block(watts: i16) -> Vec<u16> {
    let mut r = vec![0u16; 53];
    r[14] = 5000;
    r[15] = (-2i16) as u16;
    r[16] = watts as u16;
    r
}

/// Model 160 read (48 registers): two inputs, 612.3 V / 8.12 A and 598 V / 3.01 A
pub fn mppt_block() -> Vec<u16> {
    let mut r = vec![0u16; 48];
    r[0] = 160;
    r[1] = 48;
    r[2] = (-2i16) as u16; // DCA_SF
    r[3] = (-1i16) as u16; // DCV_SF
    r[8] = 2;
    for (base, id, amps, volts, watts) in [(10, 1, 812, 6123, 4972), (30, 2, 301, 5980, 1800)] {
        r[base] = id;
        r[base + 9] = amps;
        r[base + 10] = volts;
        r[base + 11] = watts;
        r[base + 16] = 38;
    }
    r
}

/// Model 123 read (26 registers): connected, 100 % limit off, PF 0.95
pub fn controls_block() -> Vec<u16> {
    let mut r = vec![0u16; 26];
    r[0] = 123;
    r[1] = 24;
    r[4] = 1;
    r[5] = 10000;
    r[10] = 95;
    r[23] = (-2i16) as u16;
    r[24] = (-2i16) as u16;
    r[25] = (-2i16) as u16;
    r
}

/// Model 124 body (24 registers): 87.5 % charged at 51.2 V, charging from PV
pub fn storage_block() -> Vec<u16> {
    let mut r = vec![0u16; 24];
    r[0] = 5000; // WChaMax
    r[6] = 875; // ChaState
    r[8] = 512; // InBatV
    r[9] = 4; // ChaSt
    r[20] = (-1i16) as u16; // ChaState_SF
    r[22] = (-1i16) as u16; // InBatV_SF
    r
}

/// Gateway with a Symo inverter on unit 1 and a smart meter on unit 240
///
/// The storage body is mapped but its model header at 40341 is not; see
/// [`with_storage`].
pub fn fronius_site() -> Gateway {
    let gateway = Gateway::new();
    gateway.set_block(1, 40001, &common_block("Fronius", "Symo 10.0-3-M", "34119102"));
    gateway.set_block(1, 40070, &[103]);
    gateway.set_block(1, 40072, &inverter_block(5200));
    gateway.set_block(1, 40228, &controls_block());
    gateway.set_block(1, 40254, &mppt_block());
    gateway.set_block(1, 40343, &storage_block());
    gateway.set_block(240, 40001, &common_block("Fronius", "Smart Meter TS 65A-3", "SM240"));
    gateway.set_block(240, 40070, &[203]);
    gateway.set_block(240, 40072, &meter_block(-2800));
    gateway
}

/// Expose the storage model header on unit 1
pub fn with_storage(gateway: &Gateway) {
    gateway.set_block(1, 40341, &[124, 24]);
}

/// Sink that keeps every record it is handed
#[derive(Default)]
pub struct Recorder {
    records: Mutex<Vec<(u8, PublishRecord)>>,
}

impl Recorder {
    pub fn records(&self) -> Vec<(u8, PublishRecord)> {
        self.records.lock().clone()
    }

    pub fn count(&self, kind: RecordKind) -> usize {
        self.records
            .lock()
            .iter()
            .filter(|(_, r)| r.kind() == kind)
            .count()
    }
}

#[async_trait]
impl PublishSink for Recorder {
    fn name(&self) -> &'static str {
        "recorder"
    }

    fn emit(&self, unit_id: u8, record: &PublishRecord) {
        self.records.lock().push((unit_id, record.clone()));
    }
}
