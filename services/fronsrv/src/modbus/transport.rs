//! Register transport
//!
//! [`RegisterTransport`] is the seam between the connection logic and the
//! wire. [`TcpTransport`] speaks Modbus/TCP through tokio-modbus; tests plug
//! in scripted banks.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use errors::{protocol_error, BridgeError, BridgeResult};
use tokio::net::lookup_host;
use tokio::time::timeout;
use tokio_modbus::client::{tcp, Context};
use tokio_modbus::prelude::*;
use tracing::{debug, trace};

/// Read Holding Registers
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;

/// Largest quantity a single 0x03 request may ask for
pub const MAX_READ_REGISTERS: u16 = 125;

/// One session to a register-mapped device
#[async_trait]
pub trait RegisterTransport: Send {
    /// Open a fresh session, replacing any existing one
    async fn connect(&mut self) -> BridgeResult<()>;

    /// Drop the session; a no-op when closed
    async fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Function 0x03 at a zero-based wire address
    async fn read_holding_registers(
        &mut self,
        unit_id: u8,
        address: u16,
        count: u16,
    ) -> BridgeResult<Vec<u16>>;
}

/// Modbus/TCP client holding one tokio-modbus context
pub struct TcpTransport {
    host: String,
    port: u16,
    timeout: Duration,
    ctx: Option<Context>,
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("endpoint", &self.endpoint())
            .field("timeout", &self.timeout)
            .field("open", &self.ctx.is_some())
            .finish()
    }
}

impl TcpTransport {
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
            ctx: None,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn resolve(
        &self,
    ) -> impl std::future::Future<Output = BridgeResult<SocketAddr>> + Send + 'static {
        let endpoint = self.endpoint();
        let io_timeout = self.timeout;
        async move {
            let mut addrs = match timeout(io_timeout, lookup_host(endpoint.clone())).await {
                Ok(Ok(addrs)) => addrs,
                Ok(Err(e)) => {
                    return Err(BridgeError::ConnectionFailed {
                        endpoint,
                        reason: e.to_string(),
                    })
                },
                Err(_) => return Err(BridgeError::Timeout(endpoint)),
            };
            addrs.next().ok_or_else(|| BridgeError::ConnectionFailed {
                endpoint,
                reason: "host resolved to no addresses".into(),
            })
        }
    }
}

/// Wire value of a Modbus exception
fn exception_code(code: ExceptionCode) -> u8 {
    match code {
        ExceptionCode::IllegalFunction => 0x01,
        ExceptionCode::IllegalDataAddress => 0x02,
        ExceptionCode::IllegalDataValue => 0x03,
        ExceptionCode::ServerDeviceFailure => 0x04,
        ExceptionCode::Acknowledge => 0x05,
        ExceptionCode::ServerDeviceBusy => 0x06,
        ExceptionCode::MemoryParityError => 0x08,
        ExceptionCode::GatewayPathUnavailable => 0x0A,
        ExceptionCode::GatewayTargetDevice => 0x0B,
        ExceptionCode::Custom(code) => code,
        #[allow(unreachable_patterns)]
        _ => 0xFF,
    }
}

fn transport_error(err: tokio_modbus::Error) -> BridgeError {
    match err {
        tokio_modbus::Error::Transport(e) => BridgeError::Io(e),
        other => protocol_error!("{}", other),
    }
}

#[async_trait]
impl RegisterTransport for TcpTransport {
    async fn connect(&mut self) -> BridgeResult<()> {
        self.close().await;
        let endpoint = self.endpoint();
        debug!("TCP connecting: {}", endpoint);

        let addr = self.resolve().await?;
        match timeout(self.timeout, tcp::connect_slave(addr, Slave(1))).await {
            Ok(Ok(ctx)) => {
                debug!("TCP connected: {} ({})", endpoint, addr);
                self.ctx = Some(ctx);
                Ok(())
            },
            Ok(Err(e)) => Err(BridgeError::ConnectionFailed {
                endpoint,
                reason: e.to_string(),
            }),
            Err(_) => Err(BridgeError::Timeout(endpoint)),
        }
    }

    async fn close(&mut self) {
        if let Some(mut ctx) = self.ctx.take() {
            if let Err(e) = ctx.disconnect().await {
                trace!("TCP disconnect: {}", e);
            }
        }
    }

    fn is_open(&self) -> bool {
        self.ctx.is_some()
    }

    async fn read_holding_registers(
        &mut self,
        unit_id: u8,
        address: u16,
        count: u16,
    ) -> BridgeResult<Vec<u16>> {
        if count == 0 || count > MAX_READ_REGISTERS {
            return Err(protocol_error!(
                "register count {} outside 1-{}",
                count,
                MAX_READ_REGISTERS
            ));
        }
        let endpoint = self.endpoint();
        let io_timeout = self.timeout;
        let ctx = self
            .ctx
            .as_mut()
            .ok_or_else(|| BridgeError::NotConnected(endpoint.clone()))?;

        ctx.set_slave(Slave(unit_id));
        trace!("TX unit={} addr={} count={}", unit_id, address, count);
        let result = match timeout(io_timeout, ctx.read_holding_registers(address, count)).await {
            Ok(Ok(Ok(regs))) if regs.len() == usize::from(count) => Ok(regs),
            Ok(Ok(Ok(regs))) => Err(protocol_error!(
                "asked for {} registers, got {}",
                count,
                regs.len()
            )),
            Ok(Ok(Err(code))) => Err(BridgeError::ModbusException {
                function: FC_READ_HOLDING_REGISTERS,
                code: exception_code(code),
            }),
            Ok(Err(e)) => Err(transport_error(e)),
            Err(_) => Err(BridgeError::Timeout(endpoint)),
        };

        if let Err(e) = &result {
            if e.invalidates_session() {
                // A late answer would be matched against the next request
                debug!("Dropping session to {} after {}", self.endpoint(), e);
                self.ctx = None;
            }
        }
        result
    }
}
