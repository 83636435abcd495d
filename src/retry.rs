//! Centralised retry policy.
//!
//! One policy object, consumed by every external caller with its own
//! error classifier. Exponential backoff with jitter, bounded attempts.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the computed delay randomised away (0.0..1.0).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            ..Self::default()
        }
    }

    /// Delay before the given retry (attempt is 1-based; attempt 1 already failed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
            .min(self.max_delay);
        if self.jitter <= 0.0 {
            return exp;
        }
        let jitter_span = exp.as_millis() as f64 * self.jitter;
        let offset = rand::thread_rng().gen_range(0.0..=jitter_span);
        Duration::from_millis((exp.as_millis() as f64 - offset).max(0.0) as u64)
    }

    /// Run `op` until it succeeds, the classifier says the error is final,
    /// or attempts run out.
    pub async fn run<T, E, F, Fut, C>(&self, what: &str, mut op: F, classify: C) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if attempt < self.max_attempts && classify(&e) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        what,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retryable failure, backing off"
                    );
                    sleep(delay).await;
                }
                Err(e) => {
                    debug!(what, attempt, error = %e, "giving up");
                    return Err(e);
                }
            }
        }
    }
}
