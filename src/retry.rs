// src/retry.rs

use std::{fmt::Display, future::Future, time::Duration};
use tokio::time::sleep;
use tracing::{error, warn};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// How many times to invoke an operation and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total invocations, including the first. `0` behaves like `1`.
    pub max_attempts: u32,
    /// Delay before the first retry; doubled on every further retry.
    /// `Duration::ZERO` retries immediately.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// Retry without sleeping between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay after failed attempt number `attempt` (1-based): `backoff * 2^(attempt-1)`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let multiplier = 2_u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff.saturating_mul(multiplier)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, Duration::from_millis(500))
    }
}

/// Run `op` until it succeeds or `policy.max_attempts` invocations have failed.
/// The closure receives the 1-based attempt number. On exhaustion the error of
/// the last attempt is returned as is.
pub async fn retry<T, E, F, Fut>(policy: RetryPolicy, what: &str, mut op: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let attempts = policy.attempts();
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < attempts => {
                let delay = policy.delay_after(attempt);
                warn!(
                    what,
                    attempt,
                    max_attempts = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retrying"
                );
                if !delay.is_zero() {
                    sleep(delay).await;
                }
                attempt += 1;
            }
            Err(e) => {
                error!(what, attempts, error = %e, "exhausted retries");
                return Err(e);
            }
        }
    }
}

/// Blocking counterpart of [`retry`] for filesystem work off the async runtime.
pub fn retry_blocking<T, E, F>(policy: RetryPolicy, what: &str, mut op: F) -> Result<T, E>
where
    F: FnMut(u32) -> Result<T, E>,
    E: Display,
{
    let attempts = policy.attempts();
    let mut attempt = 1;
    loop {
        match op(attempt) {
            Ok(v) => return Ok(v),
            Err(e) if attempt < attempts => {
                let delay = policy.delay_after(attempt);
                warn!(what, attempt, max_attempts = attempts, error = %e, "retrying");
                if !delay.is_zero() {
                    std::thread::sleep(delay);
                }
                attempt += 1;
            }
            Err(e) => {
                error!(what, attempts, error = %e, "exhausted retries");
                return Err(e);
            }
        }
    }
}
