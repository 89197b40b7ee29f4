//! Modbus/TCP access to the DataManager

pub mod connection;
pub mod transport;

pub use connection::{ConnectionStats, GatewayConnection};
pub use transport::{
    RegisterTransport, TcpTransport, FC_READ_HOLDING_REGISTERS, MAX_READ_REGISTERS,
};
