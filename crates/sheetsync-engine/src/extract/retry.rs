//! Retry with backoff as a plain function over an explicit policy

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

/// Delay growth between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `base * attempt`
    Linear,
    /// `base * 2^(attempt - 1)`
    Exponential,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff: Backoff,
    pub max_delay: Duration,
    /// Upper bound of the random extra delay, as a fraction of the delay
    pub jitter: f64,
}

impl RetryPolicy {
    /// Extraction policy: `base * attempt`, no jitter
    pub fn linear(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff: Backoff::Linear,
            max_delay: Duration::from_secs(60),
            jitter: 0.0,
        }
    }

    pub fn exponential(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff: Backoff::Exponential,
            max_delay: Duration::from_secs(60),
            jitter: 0.1,
        }
    }

    /// Single attempt, never sleeps
    pub fn none() -> Self {
        Self::linear(1, Duration::ZERO)
    }

    /// Delay after failed attempt number `attempt` (1-based), jitter excluded
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let delay = match self.backoff {
            Backoff::Linear => self.base_delay.saturating_mul(attempt),
            Backoff::Exponential => {
                let factor = 2u32.saturating_pow(attempt - 1);
                self.base_delay.saturating_mul(factor)
            }
        };
        delay.min(self.max_delay)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }
        let extra = rand::thread_rng().gen_range(0.0..=self.jitter);
        delay + delay.mul_f64(extra)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::linear(3, Duration::from_secs(5))
    }
}

/// Run `op` until it succeeds, fails with an error `is_retryable` rejects,
/// or the attempt ceiling is reached. The last error is returned as-is.
///
/// `op` receives the 1-based attempt number.
pub async fn retry<T, E, Op, Fut, P>(policy: &RetryPolicy, is_retryable: P, mut op: Op) -> Result<T, E>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts && is_retryable(&e) => {
                let delay = policy.jittered(policy.delay_for(attempt));
                warn!(
                    "Attempt {}/{} failed: {}. Retrying in {:.1}s",
                    attempt,
                    max_attempts,
                    e,
                    delay.as_secs_f64()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            },
            Err(e) => {
                if attempt > 1 {
                    error!("Giving up after {} attempts: {}", attempt, e);
                }
                return Err(e);
            },
        }
    }
}
