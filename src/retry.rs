// SPDX-License-Identifier: MIT

//! Reusable bounded retry policy.
//!
//! The original services each carried their own ad hoc retry loops for
//! broker connects; this is the single parameterized replacement. The
//! startup policy (10 attempts, 3s fixed delay) lives in [`Config`].
//!
//! [`Config`]: crate::config::Config

use std::future::Future;
use std::time::Duration;

use rand::Rng;

/// Delay growth between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay before every attempt.
    Fixed,
    /// Delay doubles each attempt, capped at `max_delay`.
    Exponential { max_delay: Duration },
}

/// A bounded retry policy: at most `max_attempts` tries, with a configurable
/// delay schedule and optional jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
    backoff: Backoff,
    jitter: bool,
}

impl RetryPolicy {
    /// Fixed-delay policy.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
            backoff: Backoff::Fixed,
            jitter: false,
        }
    }

    /// Exponential backoff policy starting at `initial_delay`.
    pub fn exponential(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay: initial_delay,
            backoff: Backoff::Exponential { max_delay },
            jitter: false,
        }
    }

    /// Randomize each delay by ±20% to avoid thundering-herd reconnects.
    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    /// Delay to sleep after a failed attempt (1-based), before jitter.
    fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential { max_delay } => {
                let exp = attempt.saturating_sub(1).min(31);
                let scaled = self.delay.saturating_mul(2u32.saturating_pow(exp));
                scaled.min(max_delay)
            }
        }
    }

    fn sleep_duration(&self, attempt: u32) -> Duration {
        let base = self.delay_after(attempt);
        if self.jitter {
            let factor = rand::thread_rng().gen_range(0.8..1.2);
            base.mul_f64(factor)
        } else {
            base
        }
    }

    /// Run `op` until it succeeds or the attempt budget is exhausted.
    ///
    /// Returns the last error when every attempt fails.
    pub async fn run<T, E, F, Fut>(&self, what: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(what, attempt, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if attempt >= self.max_attempts => {
                    tracing::error!(
                        what,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %err,
                        "Giving up after max attempts"
                    );
                    return Err(err);
                }
                Err(err) => {
                    let delay = self.sleep_duration(attempt);
                    tracing::warn!(
                        what,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
