//! Host reachability pre-check

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

pub const PING_TIMEOUT: Duration = Duration::from_secs(2);

#[async_trait]
pub trait HostProbe: Send + Sync {
    async fn is_reachable(&self, host: &str) -> bool;
}

/// One ICMP echo through the system `ping` binary
#[derive(Debug, Clone)]
pub struct PingProbe {
    timeout: Duration,
}

impl Default for PingProbe {
    fn default() -> Self {
        Self {
            timeout: PING_TIMEOUT,
        }
    }
}

impl PingProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

/// Arguments for a single echo; the wait flag takes ms on Windows and macOS
fn ping_args(host: &str, timeout: Duration) -> Vec<String> {
    let secs = timeout.as_secs().max(1);
    let millis = secs * 1000;
    let mut args: Vec<String> = if cfg!(windows) {
        vec!["-n".into(), "1".into(), "-w".into(), millis.to_string()]
    } else if cfg!(target_os = "macos") {
        vec!["-c".into(), "1".into(), "-W".into(), millis.to_string()]
    } else {
        vec!["-c".into(), "1".into(), "-W".into(), secs.to_string()]
    };
    args.push(host.to_string());
    args
}

#[async_trait]
impl HostProbe for PingProbe {
    async fn is_reachable(&self, host: &str) -> bool {
        let mut command = Command::new("ping");
        command
            .args(ping_args(host, self.timeout))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let limit = self.timeout + Duration::from_secs(1);
        match tokio::time::timeout(limit, command.status()).await {
            Ok(Ok(status)) => status.success(),
            Ok(Err(e)) => {
                debug!("Ping check failed for {}: {}", host, e);
                false
            },
            Err(_) => {
                debug!("Ping to {} timed out", host);
                false
            },
        }
    }
}

/// Treats every host as reachable; used when the pre-check is disabled
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysReachable;

#[async_trait]
impl HostProbe for AlwaysReachable {
    async fn is_reachable(&self, _host: &str) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(target_os = "linux")]
    #[test]
    fn test_linux_args_use_seconds() {
        assert_eq!(
            ping_args("192.168.1.10", Duration::from_secs(2)),
            vec!["-c", "1", "-W", "2", "192.168.1.10"]
        );
    }

    #[test]
    fn test_host_is_last() {
        let args = ping_args("datamanager", PING_TIMEOUT);
        assert_eq!(args.last().map(String::as_str), Some("datamanager"));
    }

    #[tokio::test]
    async fn test_always_reachable() {
        assert!(AlwaysReachable.is_reachable("nowhere").await);
    }
}
