//! Retry policy and a reusable retry helper
//!
//! The policy only computes delays; `retry` drives an operation through it,
//! racing every backoff sleep against the shutdown signal.

use crate::config::CheckerConfig;
use crate::shutdown::ShutdownSignal;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Exponential backoff settings for one HTTP call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total tries, including the first
    pub max_attempts: u32,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_initial: Duration::from_millis(500),
            backoff_max: Duration::from_secs(10),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &CheckerConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff_initial: Duration::from_millis(config.backoff_initial_ms),
            backoff_max: Duration::from_millis(config.backoff_max_ms),
            jitter: config.jitter,
        }
    }

    /// Un-jittered delay after failed attempt `attempt` (1-based)
    ///
    /// `initial * 2^(attempt-1)`, capped at `backoff_max`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.backoff_initial
            .checked_mul(factor)
            .unwrap_or(self.backoff_max)
            .min(self.backoff_max)
    }

    /// Delay actually slept after failed attempt `attempt`
    ///
    /// With jitter: half the backoff plus a uniform draw below one backoff.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.backoff(attempt);
        if !self.jitter || base.is_zero() {
            return base;
        }

        let base_ms = base.as_millis() as u64;
        let spread = rand::random_range(0..base_ms.max(1));
        Duration::from_millis(base_ms / 2 + spread)
    }
}

/// Classification of one attempt's result
#[derive(Debug)]
pub enum Attempt<T, E> {
    Done(T),
    /// Transient failure; try again if attempts remain
    Retry(E),
    /// Permanent failure; stop immediately
    Fail(E),
}

/// Why `retry` gave up
#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("gave up after {attempts} attempts: {source}")]
    Exhausted { attempts: u32, source: E },

    #[error("{0}")]
    Aborted(E),

    #[error("cancelled during backoff")]
    Cancelled,
}

/// Runs `op` until it succeeds, fails permanently, or attempts run out
///
/// `op` receives the 1-based attempt number.
///
/// # Arguments
///
/// * `policy` - Attempt limit and backoff between attempts
/// * `shutdown` - When set, a shutdown during backoff ends the loop
/// * `op` - One attempt, reporting `Done`, `Retry` or `Fail`
///
/// # Returns
///
/// * `Ok(T)` - An attempt finished with `Done`
/// * `Err(RetryError)` - `Exhausted` with the last retryable error,
///   `Aborted` on `Fail`, or `Cancelled` on shutdown
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    shutdown: Option<&ShutdownSignal>,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Attempt<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Attempt::Done(value) => return Ok(value),
            Attempt::Fail(error) => return Err(RetryError::Aborted(error)),
            Attempt::Retry(error) if attempt >= max_attempts => {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    source: error,
                })
            }
            Attempt::Retry(_) => {}
        }

        let delay = policy.delay(attempt);
        tracing::debug!("attempt {} failed, retrying in {:?}", attempt, delay);

        match shutdown {
            Some(signal) => {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = signal.cancelled() => return Err(RetryError::Cancelled),
                }
            }
            None => tokio::time::sleep(delay).await,
        }

        attempt += 1;
    }
}
