//! Bounded retry with exponential backoff for remote store calls

use crate::config::RetryConfig;
use crate::error::StoreError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Outcome of a single attempt that did not succeed
#[derive(Debug)]
pub enum AttemptError {
    /// Worth retrying (timeouts, connection failures, 5xx)
    Transient(String),
    /// Retrying will not help
    Permanent(StoreError),
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    /// Single attempt, no backoff
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before attempt `attempt + 1`: doubling from `base_delay`, capped,
    /// with up to 50% jitter added.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(16));
        let capped = exp.min(self.max_delay);
        let jitter_ms = capped.as_millis() as u64 / 2;
        if jitter_ms == 0 {
            return capped;
        }
        capped + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    pub async fn run<T, F, Fut>(&self, op_name: &str, mut op: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AttemptError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(AttemptError::Permanent(err)) => return Err(err),
                Err(AttemptError::Transient(reason)) => {
                    if attempt >= self.max_attempts {
                        return Err(StoreError::Unavailable(format!(
                            "{} failed after {} attempts: {}",
                            op_name, attempt, reason
                        )));
                    }
                    let delay = self.delay_for(attempt);
                    warn!(
                        op = %op_name,
                        attempt = attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %reason,
                        "Transient store failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
