//! Unified error handling for the fronsrv workspace
//!
//! Every crate returns [`BridgeError`] at its public boundary. The decoder
//! crate keeps its own narrow error type and converts into this one.

use thiserror::Error;

// ============================================================================
// BridgeError - Main error type
// ============================================================================

/// Main error type for the bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    // ======================================
    // Configuration Errors
    // ======================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    // ======================================
    // Protocol & Communication Errors
    // ======================================
    #[error("Connection failed: {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    #[error("Not connected: {0}")]
    NotConnected(String),

    #[error("Timeout waiting for response from {0}")]
    Timeout(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Modbus exception: function 0x{function:02X}, code 0x{code:02X}")]
    ModbusException { function: u8, code: u8 },

    #[error("Decode error: {0}")]
    Decode(String),

    // ======================================
    // Device Errors
    // ======================================
    #[error("No devices discovered")]
    NoDevices,

    // ======================================
    // Publish Errors
    // ======================================
    #[error("Publish error: {sink}: {message}")]
    Publish { sink: String, message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // ======================================
    // File & I/O Errors
    // ======================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Another instance is running (pid {pid}, pid file {path})")]
    AlreadyRunning { pid: u32, path: String },

    // ======================================
    // Catch-all for other errors
    // ======================================
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using BridgeError
pub type BridgeResult<T> = Result<T, BridgeError>;

impl BridgeError {
    /// Check if this error is a transport fault worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_)
                | Self::ConnectionFailed { .. }
                | Self::NotConnected(_)
                | Self::Io(_)
        )
    }

    /// Whether the socket that produced this error can no longer be trusted
    ///
    /// A Modbus exception is a well-formed answer from the peer; everything
    /// else on the read path leaves the stream in an unknown position.
    pub fn invalidates_session(&self) -> bool {
        !matches!(self, Self::ModbusException { .. })
    }

    /// Stable machine-readable code, used in logs
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::InvalidConfig { .. } => "INVALID_CONFIG",
            Self::ConnectionFailed { .. } => "CONNECTION_FAILED",
            Self::NotConnected(_) => "NOT_CONNECTED",
            Self::Timeout(_) => "TIMEOUT",
            Self::Protocol(_) => "PROTOCOL_ERROR",
            Self::ModbusException { .. } => "MODBUS_EXCEPTION",
            Self::Decode(_) => "DECODE_ERROR",
            Self::NoDevices => "NO_DEVICES",
            Self::Publish { .. } => "PUBLISH_ERROR",
            Self::HttpClient(_) => "HTTP_CLIENT_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::AlreadyRunning { .. } => "ALREADY_RUNNING",
            Self::Other(_) => "UNKNOWN_ERROR",
        }
    }

    /// Shorthand for [`BridgeError::InvalidConfig`]
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for [`BridgeError::Publish`]
    pub fn publish(sink: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Publish {
            sink: sink.into(),
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

// Helper macros for creating errors
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::BridgeError::Configuration($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::BridgeError::Configuration(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! protocol_error {
    ($msg:expr) => {
        $crate::BridgeError::Protocol($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::BridgeError::Protocol(format!($fmt, $($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        assert!(BridgeError::Timeout("gw".into()).is_retryable());
        assert!(BridgeError::NotConnected("gw".into()).is_retryable());
        assert!(!BridgeError::Protocol("bad length".into()).is_retryable());
        assert!(!BridgeError::NoDevices.is_retryable());
    }

    #[test]
    fn test_exception_keeps_session() {
        let exception = BridgeError::ModbusException {
            function: 0x83,
            code: 0x02,
        };
        assert!(!exception.invalidates_session());
        assert!(BridgeError::Timeout("gw".into()).invalidates_session());
        assert_eq!(
            exception.to_string(),
            "Modbus exception: function 0x83, code 0x02"
        );
    }

    #[test]
    fn test_macros() {
        let err = config_error!("modbus.host is {}", "empty");
        assert!(matches!(err, BridgeError::Configuration(ref m) if m == "modbus.host is empty"));
        assert_eq!(err.error_code(), "CONFIGURATION_ERROR");

        let err = protocol_error!("length {}", 0);
        assert_eq!(err.to_string(), "Protocol error: length 0");
    }

    #[test]
    fn test_invalid_config_helper() {
        let err = BridgeError::invalid_config("modbus.port", "must not be 0");
        assert_eq!(
            err.to_string(),
            "Invalid configuration: modbus.port: must not be 0"
        );
    }
}
