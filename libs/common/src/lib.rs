//! Shared process plumbing for the fronsrv binaries
//!
//! - logging bootstrap (console + optional rolling file)
//! - shutdown signal handling
//! - single-instance PID file guard

pub mod instance;
pub mod logging;
pub mod shutdown;

pub use instance::PidGuard;
pub use logging::{LogConfig, LogGuard};
