//! Bounded poll-until-true primitive.
//!
//! Every conditional wait in the crate goes through [`RetryWaiter::wait_for`]:
//! the attempt bound and interval live in a [`RetryPolicy`] built at the call
//! site, and each wait is logged on entry, per attempt, and on timeout.

use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, trace};

/// How often and how long to poll a condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
    pub description: String,
}

impl RetryPolicy {
    /// `max_attempts` is clamped to at least one evaluation.
    pub fn new(description: impl Into<String>, max_attempts: u32, interval_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            interval: Duration::from_millis(interval_ms),
            description: description.into(),
        }
    }
}

/// Configuration for escalating delays between whole-operation retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base_delay_ms: u64,
}

impl Backoff {
    /// delay = base_delay_ms * 2^(attempt - 1)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }
}

pub struct RetryWaiter;

impl RetryWaiter {
    /// Evaluates `condition` up to `policy.max_attempts` times, sleeping
    /// `policy.interval` between evaluations (never after the last one).
    ///
    /// Returns `Ok(true)` on the first true evaluation and `Ok(false)` once the
    /// attempts are exhausted. An `Err` from the condition means it could not
    /// be evaluated at all and is returned to the caller untouched.
    pub async fn wait_for<E, F>(policy: &RetryPolicy, mut condition: F) -> Result<bool, E>
    where
        F: AsyncFnMut() -> Result<bool, E>,
    {
        debug!(
            wait = %policy.description,
            max_attempts = policy.max_attempts,
            interval_ms = policy.interval.as_millis() as u64,
            "Waiting for condition"
        );
        for attempt in 1..=policy.max_attempts {
            if condition().await? {
                debug!(wait = %policy.description, attempt, "Condition met");
                return Ok(true);
            }
            trace!(wait = %policy.description, attempt, "Condition not met");
            if attempt < policy.max_attempts {
                sleep(policy.interval).await;
            }
        }
        info!(
            wait = %policy.description,
            attempts = policy.max_attempts,
            "Wait timed out"
        );
        Ok(false)
    }
}
