//! Bounded exponential backoff shared by the fetcher and the sink writer.
//!
//! # Retry Strategy
//!
//! The delay before attempt `n + 1` follows:
//! ```text
//! delay = min(base_delay * 2^(n-1), max_delay) + random_jitter(0..=jitter)
//! ```
//! A server-provided `Retry-After` hint replaces the computed delay (still
//! capped at `max_delay`). Only errors that report themselves as
//! [`Retryable`] are retried; everything else is returned on first failure.

use rand::{Rng, rng};
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{error, warn};

use crate::config::RetryConfig;

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    fn is_retryable(&self) -> bool;

    /// Delay requested by the remote side, if any.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay after the first failure (doubles with each attempt).
    pub base_delay: Duration,
    /// Cap on the computed delay.
    pub max_delay: Duration,
    /// Upper bound of the random jitter added to every delay.
    pub jitter: Duration,
}

impl Backoff {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            jitter: Duration::from_millis(250),
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Backoff that never sleeps, for tests.
    #[cfg(test)]
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, Duration::ZERO).with_jitter(Duration::ZERO)
    }

    /// Delay after `attempt` failed attempts (1-based), without jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << shift)
            .min(self.max_delay)
    }

    fn random_jitter(&self) -> Duration {
        let max_ms = self.jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rng().random_range(0..=max_ms))
    }
}

impl From<&RetryConfig> for Backoff {
    fn from(config: &RetryConfig) -> Self {
        Backoff::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
        .with_jitter(Duration::from_millis(config.jitter_ms))
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// attempt budget is spent.
pub async fn with_backoff<T, E, F, Fut>(backoff: &Backoff, operation: &str, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + fmt::Display,
{
    let total_t0 = Instant::now();
    let mut attempt = 0u32;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                attempt += 1;
                let total_dt = total_t0.elapsed();

                if !e.is_retryable() {
                    return Err(e);
                }
                if attempt >= backoff.max_attempts {
                    error!(
                        operation,
                        attempt,
                        max = backoff.max_attempts,
                        elapsed_ms_total = total_dt.as_millis() as u64,
                        error = %e,
                        "Retries exhausted"
                    );
                    return Err(e);
                }

                let delay = match e.retry_after() {
                    Some(hint) => hint.min(backoff.max_delay),
                    None => backoff.delay_for(attempt),
                } + backoff.random_jitter();

                warn!(
                    operation,
                    attempt,
                    max = backoff.max_attempts,
                    elapsed_ms_total = total_dt.as_millis() as u64,
                    ?delay,
                    error = %e,
                    "Attempt failed; backing off"
                );
                sleep(delay).await;
            }
        }
    }
}
