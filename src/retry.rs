//! Retry policy for collaborator requests.
//!
//! A `RetryPolicy` drives an async operation up to a fixed number of
//! attempts, pausing between attempts with either a fixed delay or an
//! exponential backoff capped at a maximum.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Maximum share of the computed delay added as random jitter (25%).
const JITTER_DIVISOR: u64 = 4;

/// How the pause between two attempts grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay before every retry
    Fixed,

    /// Delay doubles with every retry, up to `max_delay`
    Exponential { max_delay: Duration },
}

/// Retry policy: attempt budget plus delay schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    backoff: Backoff,
    jitter: bool,
}

/// Returned when every attempt failed.
#[derive(Debug)]
pub struct RetryError<E> {
    /// Number of attempts made
    pub attempts: u32,

    /// Error of the final attempt
    pub last_error: E,
}

impl<E: std::fmt::Display> std::fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "All {} attempts failed. Last error: {}",
            self.attempts, self.last_error
        )
    }
}

impl<E: std::fmt::Debug + std::fmt::Display> std::error::Error for RetryError<E> {}

impl RetryPolicy {
    /// Retry with the same `delay` between attempts.
    ///
    /// `max_attempts` counts the first try; it is raised to 1 if zero.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: delay,
            backoff: Backoff::Fixed,
            jitter: false,
        }
    }

    /// Retry with `base_delay * 2^(retry - 1)`, capped at `max_delay`.
    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            backoff: Backoff::Exponential { max_delay },
            jitter: false,
        }
    }

    /// Add up to 25% random jitter to every delay.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// Delay before retry number `retry` (1 for the pause after the first failure).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let base_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);

        let (delay_ms, cap_ms) = match self.backoff {
            Backoff::Fixed => (base_ms, u64::MAX),
            Backoff::Exponential { max_delay } => {
                let exponent = retry.saturating_sub(1).min(20);
                let cap = u64::try_from(max_delay.as_millis()).unwrap_or(u64::MAX);
                (base_ms.saturating_mul(1 << exponent), cap)
            }
        };

        let jitter_ms = if self.jitter {
            rand::random::<u64>() % (delay_ms / JITTER_DIVISOR + 1)
        } else {
            0
        };

        Duration::from_millis(delay_ms.saturating_add(jitter_ms).min(cap_ms))
    }

    /// Run `op` until it succeeds or the attempt budget is spent.
    ///
    /// `op` receives the 1-based attempt number. Every error is retried;
    /// `operation` names the request in log output.
    pub async fn run<T, E, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 1;

        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        operation = operation,
                        error = %e,
                        attempt = attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Attempt failed, will retry"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(RetryError {
                        attempts: attempt,
                        last_error: e,
                    });
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    /// Three attempts, two seconds apart.
    fn default() -> Self {
        Self::fixed(3, Duration::from_secs(2))
    }
}
