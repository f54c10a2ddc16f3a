use crate::config::RetryConfig;
use crate::error::TierError;
use std::time::{Duration, Instant};
use tracing::debug;

/// Bounded retry with exponential backoff for external tier calls.
///
/// A call that succeeds after its deadline is counted as a timeout, so a
/// slow service cannot stall a batch indefinitely.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: f64,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        RetryPolicy {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            multiplier: config.backoff_multiplier,
        }
    }

    /// No retries and no waiting.
    pub fn none() -> Self {
        RetryPolicy {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// Backoff before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = self.multiplier.powi(retry.saturating_sub(1) as i32);
        self.initial_backoff.mul_f64(factor.max(0.0))
    }

    pub fn run<T>(
        &self,
        timeout: Duration,
        mut call: impl FnMut(Duration) -> Result<T, TierError>,
    ) -> Result<T, TierError> {
        let mut last = TierError::Unavailable("no attempt made".into());
        for attempt in 1..=self.max_attempts.max(1) {
            let started = Instant::now();
            match call(timeout) {
                Ok(value) if started.elapsed() <= timeout => return Ok(value),
                Ok(_) => last = TierError::Timeout(timeout),
                Err(e) => last = e,
            }
            if attempt < self.max_attempts {
                let wait = self.backoff(attempt);
                debug!(attempt, error = %last, wait_ms = wait.as_millis() as u64, "retrying external call");
                std::thread::sleep(wait);
            }
        }
        Err(last)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
