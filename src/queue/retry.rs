//! Retry classification and backoff.
//!
//! Two layers share this module. The inner layer lives inside one queue
//! attempt: transient scorer failures are retried in place with capped
//! exponential backoff and jitter. The outer layer is the queue itself:
//! a failed attempt consumes one of the item's retries, and the advisory
//! requeue delay here is logged so operators can see the intended pacing
//! (actual re-pick timing is the poll cadence).

use std::time::Duration;

use rand::Rng;

use crate::scorer::ScoreError;

/// Advisory pacing between queue-level attempts: one minute doubling per
/// retry, capped at half an hour.
const REQUEUE_BASE: Duration = Duration::from_secs(60);
const REQUEUE_MAX: Duration = Duration::from_secs(30 * 60);

/// In-attempt retry policy for scoring calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first call; 3 means up to 4 calls per attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Additive jitter fraction: 0.15 stretches a delay by up to 15%.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: 0.15,
        }
    }
}

impl RetryPolicy {
    /// Whether this failure class is worth calling again for.
    ///
    /// Total over the taxonomy: a new variant must be placed here
    /// explicitly before the crate compiles again.
    pub fn should_retry(&self, error: &ScoreError) -> bool {
        match error {
            ScoreError::Overloaded
            | ScoreError::RateLimited { .. }
            | ScoreError::Server { .. }
            | ScoreError::Network(_) => true,
            ScoreError::Client { .. } | ScoreError::Invalid(_) => false,
        }
    }

    /// Deterministic capped exponential: base × multiplier^attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.multiplier.powi(attempt.min(16) as i32);
        let scaled = self.base_delay.as_millis() as f64 * exp;
        let capped = scaled.min(self.max_delay.as_millis() as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    /// Backoff with jitter, so synchronized workers spread out.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.backoff(attempt);
        if self.jitter <= 0.0 {
            return base;
        }
        let stretch = rand::thread_rng().gen_range(0.0..=self.jitter);
        base.mul_f64(1.0 + stretch)
    }

    /// Delay before the next call, honoring a rate limiter's own hint when
    /// it gives one. The hint is still capped; a hostile or confused
    /// Retry-After cannot park a worker for an hour.
    pub fn delay_for(&self, error: &ScoreError, attempt: u32) -> Duration {
        if let ScoreError::RateLimited {
            retry_after: Some(hint),
        } = error
        {
            return (*hint).min(self.max_delay);
        }
        self.delay(attempt)
    }
}

/// Advisory delay before a failed item should be attempted again.
pub fn requeue_delay(retry_count: u32) -> Duration {
    if retry_count <= 1 {
        return REQUEUE_BASE;
    }
    let exp = 2f64.powi((retry_count - 1).min(16) as i32);
    let scaled = REQUEUE_BASE.as_secs() as f64 * exp;
    Duration::from_secs((scaled as u64).min(REQUEUE_MAX.as_secs()))
}
