//! Shared gateway connection
//!
//! The DataManager serves every inverter and meter behind one TCP session
//! and gets confused by interleaved requests, so all reads go through one
//! async mutex. Two firmware quirks are handled here:
//! - switching unit ids on a live socket returns the previous unit's data,
//!   so a unit change forces a reconnect
//! - a read that yields nothing is retried on a fresh socket

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::transport::RegisterTransport;

/// Settle time after closing the socket for a unit change
pub const UNIT_SWITCH_PAUSE: Duration = Duration::from_millis(100);
/// Pause after a failed reconnect inside the retry loop
pub const RECONNECT_PAUSE: Duration = Duration::from_millis(100);

/// Cumulative read counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    pub successful_reads: u64,
    pub failed_reads: u64,
}

struct Session {
    transport: Box<dyn RegisterTransport>,
    /// Unit of the last successful read
    last_unit_id: Option<u8>,
}

pub struct GatewayConnection {
    endpoint: String,
    session: Mutex<Session>,
    connected: AtomicBool,
    retry_attempts: u32,
    retry_delay: Duration,
    successful_reads: AtomicU64,
    failed_reads: AtomicU64,
}

impl std::fmt::Debug for GatewayConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConnection")
            .field("endpoint", &self.endpoint)
            .field("connected", &self.is_connected())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl GatewayConnection {
    pub fn new(
        endpoint: impl Into<String>,
        transport: Box<dyn RegisterTransport>,
        retry_attempts: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            session: Mutex::new(Session {
                transport,
                last_unit_id: None,
            }),
            connected: AtomicBool::new(false),
            retry_attempts: retry_attempts.max(1),
            retry_delay,
            successful_reads: AtomicU64::new(0),
            failed_reads: AtomicU64::new(0),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Open the session if needed; returns whether it is usable
    pub async fn connect(&self) -> bool {
        let mut session = self.session.lock().await;
        if session.transport.is_open() {
            self.connected.store(true, Ordering::Relaxed);
            return true;
        }
        match session.transport.connect().await {
            Ok(()) => {
                info!("Connected to {}", self.endpoint);
                self.connected.store(true, Ordering::Relaxed);
                true
            },
            Err(e) => {
                warn!("Connection to {} failed: {}", self.endpoint, e);
                self.connected.store(false, Ordering::Relaxed);
                false
            },
        }
    }

    /// Close the socket so the next read starts on a fresh one
    ///
    /// The gateway keeps residual response bytes per session; reads that must
    /// not see them (model ids, secondary blocks) call this first.
    pub async fn reset(&self) {
        let mut session = self.session.lock().await;
        session.transport.close().await;
        session.last_unit_id = None;
        self.connected.store(false, Ordering::Relaxed);
        debug!("Connection to {} reset", self.endpoint);
    }

    pub async fn disconnect(&self) {
        let mut session = self.session.lock().await;
        if session.transport.is_open() {
            session.transport.close().await;
            info!("Disconnected from {}", self.endpoint);
        }
        session.last_unit_id = None;
        self.connected.store(false, Ordering::Relaxed);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            successful_reads: self.successful_reads.load(Ordering::Relaxed),
            failed_reads: self.failed_reads.load(Ordering::Relaxed),
        }
    }

    /// Read `count` holding registers at one-based `address`
    ///
    /// Never fails loudly: exhausting the retry budget counts a failed read
    /// and returns `None`.
    pub async fn read_registers(&self, address: u16, count: u16, unit_id: u8) -> Option<Vec<u16>> {
        let Some(wire_address) = address.checked_sub(1) else {
            warn!("Register address {} is not one-based", address);
            self.failed_reads.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        let mut session = self.session.lock().await;

        if session.last_unit_id.is_some_and(|last| last != unit_id) {
            debug!(
                "Unit change {:?} -> {}, reconnecting",
                session.last_unit_id, unit_id
            );
            session.transport.close().await;
            self.connected.store(false, Ordering::Relaxed);
            sleep(UNIT_SWITCH_PAUSE).await;
        }

        for attempt in 1..=self.retry_attempts {
            if !session.transport.is_open() {
                if let Err(e) = session.transport.connect().await {
                    debug!(
                        "Reconnect for unit {} failed (attempt {}/{}): {}",
                        unit_id, attempt, self.retry_attempts, e
                    );
                    self.connected.store(false, Ordering::Relaxed);
                    sleep(RECONNECT_PAUSE).await;
                    continue;
                }
                self.connected.store(true, Ordering::Relaxed);
            }

            match session
                .transport
                .read_holding_registers(unit_id, wire_address, count)
                .await
            {
                Ok(regs) if !regs.is_empty() => {
                    session.last_unit_id = Some(unit_id);
                    self.successful_reads.fetch_add(1, Ordering::Relaxed);
                    return Some(regs);
                },
                Ok(_) => {
                    debug!(
                        "Empty response for {}x{} unit {} (attempt {}/{})",
                        address, count, unit_id, attempt, self.retry_attempts
                    );
                },
                Err(e) => {
                    debug!(
                        "Read {}x{} unit {} failed (attempt {}/{}): {}",
                        address, count, unit_id, attempt, self.retry_attempts, e
                    );
                    if e.invalidates_session() {
                        session.transport.close().await;
                        self.connected.store(false, Ordering::Relaxed);
                    }
                },
            }

            if attempt < self.retry_attempts {
                sleep(self.retry_delay).await;
            }
        }

        self.failed_reads.fetch_add(1, Ordering::Relaxed);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use errors::{BridgeError, BridgeResult};
    use std::sync::Arc;

    #[derive(Default)]
    struct Log {
        connects: u32,
        closes: u32,
        reads: Vec<(u8, u16, u16)>,
    }

    /// Fails the first `fail_reads` reads, then answers with the address
    struct FlakyTransport {
        open: bool,
        fail_reads: u32,
        log: Arc<parking_lot::Mutex<Log>>,
    }

    #[async_trait]
    impl RegisterTransport for FlakyTransport {
        async fn connect(&mut self) -> BridgeResult<()> {
            self.log.lock().connects += 1;
            self.open = true;
            Ok(())
        }

        async fn close(&mut self) {
            if self.open {
                self.log.lock().closes += 1;
            }
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
            self.log.lock().reads.push((unit_id, address, count));
            if self.fail_reads > 0 {
                self.fail_reads -= 1;
                return Err(BridgeError::Timeout("sim".into()));
            }
            Ok(vec![address; usize::from(count)])
        }
    }

    fn connection(fail_reads: u32) -> (GatewayConnection, Arc<parking_lot::Mutex<Log>>) {
        let log = Arc::new(parking_lot::Mutex::new(Log::default()));
        let transport = FlakyTransport {
            open: false,
            fail_reads,
            log: Arc::clone(&log),
        };
        (
            GatewayConnection::new("sim:502", Box::new(transport), 2, Duration::from_millis(100)),
            log,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_based_addressing() {
        let (conn, log) = connection(0);
        let regs = conn.read_registers(40072, 3, 1).await.expect("read");
        assert_eq!(regs, vec![40071; 3]);
        assert_eq!(log.lock().reads, vec![(1, 40071, 3)]);
        assert_eq!(conn.stats().successful_reads, 1);
        assert!(conn.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_then_success() {
        let (conn, log) = connection(1);
        assert!(conn.read_registers(40001, 2, 1).await.is_some());
        let log = log.lock();
        assert_eq!(log.reads.len(), 2);
        // timeout closed the socket, second attempt reconnected
        assert_eq!(log.connects, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_none() {
        let (conn, _log) = connection(5);
        assert!(conn.read_registers(40001, 2, 1).await.is_none());
        assert_eq!(
            conn.stats(),
            ConnectionStats {
                successful_reads: 0,
                failed_reads: 1
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unit_change_forces_reconnect() {
        let (conn, log) = connection(0);
        assert!(conn.read_registers(40072, 1, 1).await.is_some());
        assert!(conn.read_registers(40072, 1, 1).await.is_some());
        assert_eq!(log.lock().connects, 1);

        assert!(conn.read_registers(40072, 1, 240).await.is_some());
        let log = log.lock();
        assert_eq!(log.connects, 2);
        assert_eq!(log.closes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_closes_socket() {
        let (conn, log) = connection(0);
        assert!(conn.connect().await);
        conn.reset().await;
        assert!(!conn.is_connected());
        assert!(conn.read_registers(40070, 1, 1).await.is_some());
        assert_eq!(log.lock().connects, 2);
    }

    #[tokio::test]
    async fn test_zero_address_rejected() {
        let (conn, log) = connection(0);
        assert!(conn.read_registers(0, 1, 1).await.is_none());
        assert!(log.lock().reads.is_empty());
        assert_eq!(conn.stats().failed_reads, 1);
    }
}
