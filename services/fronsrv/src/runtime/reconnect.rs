//! Startup connection retry with exponential backoff and jitter

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ReconnectError {
    #[error("Maximum connection attempts ({0}) exceeded")]
    MaxAttemptsExceeded(u32),

    #[error("Connection attempts cancelled")]
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// 0 means unlimited
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// ±25 % on every delay
    pub jitter: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl ReconnectPolicy {
    pub fn from_config(max_attempts: u32, initial_delay_secs: u64, max_delay_secs: u64) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_secs(initial_delay_secs),
            max_delay: Duration::from_secs(max_delay_secs),
            ..Self::default()
        }
    }

    /// Delay before attempt `attempt + 1`, for `attempt >= 1`
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let mut delay = self
            .initial_delay
            .mul_f64(self.backoff_multiplier.powi(exponent))
            .min(self.max_delay);

        if self.jitter {
            let range = delay.as_millis() as f64 * 0.25;
            if range > 0.0 {
                let jitter = rand::thread_rng().gen_range(-range..range);
                delay = Duration::from_millis((delay.as_millis() as f64 + jitter).max(0.0) as u64);
            }
        }
        delay
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectStats {
    pub total_attempts: u64,
    pub failed_attempts: u64,
}

#[derive(Debug)]
pub struct ReconnectHelper {
    policy: ReconnectPolicy,
    stats: ReconnectStats,
}

impl ReconnectHelper {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            stats: ReconnectStats::default(),
        }
    }

    pub fn stats(&self) -> ReconnectStats {
        self.stats
    }

    /// Call `connect_fn` until it reports success, the budget runs out or
    /// `token` is cancelled; returns the number of attempts used
    pub async fn run<F, Fut>(
        &mut self,
        what: &str,
        token: &CancellationToken,
        mut connect_fn: F,
    ) -> Result<u32, ReconnectError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let limit = if self.policy.max_attempts == 0 {
            "∞".to_string()
        } else {
            self.policy.max_attempts.to_string()
        };

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.stats.total_attempts += 1;
            let started = Instant::now();

            if connect_fn().await {
                if attempt > 1 {
                    info!(
                        "{} connected after {:?} (attempt {}/{})",
                        what,
                        started.elapsed(),
                        attempt,
                        limit
                    );
                }
                return Ok(attempt);
            }
            self.stats.failed_attempts += 1;

            if self.policy.max_attempts > 0 && attempt >= self.policy.max_attempts {
                warn!("{}: all {} connection attempts failed", what, attempt);
                return Err(ReconnectError::MaxAttemptsExceeded(attempt));
            }

            let delay = self.policy.delay_after(attempt);
            info!(
                "{} connection attempt {}/{} failed, retrying in {:?}",
                what, attempt, limit, delay
            );
            tokio::select! {
                () = tokio::time::sleep(delay) => {},
                () = token.cancelled() => return Err(ReconnectError::Cancelled),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tracing_test::traced_test;

    fn policy(max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn test_exponential_backoff() {
        let p = policy(10);
        let delays: Vec<u64> = (1..=7).map(|n| p.delay_after(n).as_secs()).collect();
        assert_eq!(delays, vec![2, 4, 8, 16, 32, 60, 60]);
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let p = ReconnectPolicy {
            jitter: true,
            ..policy(10)
        };
        for _ in 0..50 {
            let d = p.delay_after(3).as_millis();
            assert!((6000..=10000).contains(&d), "{d}");
        }
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_succeeds_on_third_attempt() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let mut helper = ReconnectHelper::new(policy(10));
        let token = CancellationToken::new();
        let attempts = helper
            .run("gateway", &token, || async move {
                calls.fetch_add(1, Ordering::SeqCst) >= 2
            })
            .await;
        assert_eq!(attempts, Ok(3));
        assert_eq!(helper.stats().failed_attempts, 2);
        assert!(logs_contain("gateway connected after"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhausted() {
        let mut helper = ReconnectHelper::new(policy(3));
        let token = CancellationToken::new();
        let result = helper.run("gateway", &token, || async { false }).await;
        assert_eq!(result, Err(ReconnectError::MaxAttemptsExceeded(3)));
        assert_eq!(helper.stats().total_attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_while_waiting() {
        let mut helper = ReconnectHelper::new(policy(0));
        let token = CancellationToken::new();
        token.cancel();
        let result = helper.run("gateway", &token, || async { false }).await;
        assert_eq!(result, Err(ReconnectError::Cancelled));
    }
}
