//! Retry policy for batch-level failures.
//!
//! Only failures that affect a whole batch (see
//! [`MailError::is_batch_fatal`](crate::MailError::is_batch_fatal)) are
//! retried. A recipient the provider rejected is failed immediately and never
//! retried.

use std::time::Duration;

/// Default number of retries after the first failed attempt.
pub const MAX_RETRIES: u32 = 3;

/// Default backoff table, indexed by retry number.
pub const DEFAULT_BACKOFF: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(5),
    Duration::from_secs(15),
];

/// Reason recorded on recipients of a job that ran out of retries.
pub const MAX_RETRIES_EXCEEDED: &str = "max retries exceeded";

/// What to do with a job after a batch-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Run the job again after `delay`; `retry_count` is its new retry count.
    Retry { retry_count: u32, delay: Duration },
    /// Give up: fail every remaining recipient.
    Exhausted,
}

/// Maximum retries and backoff delays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Delay before retry N is `backoff[N - 1]`; the last entry is reused for
    /// retries past the end of the table.
    pub backoff: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            backoff: DEFAULT_BACKOFF.to_vec(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Vec<Duration>) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let idx = (retry.max(1) - 1) as usize;
        self.backoff
            .get(idx)
            .or_else(|| self.backoff.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    /// Decide the fate of a job that has already been retried `retry_count` times.
    pub fn decide(&self, retry_count: u32) -> RetryDecision {
        let next = retry_count + 1;
        if next > self.max_retries {
            RetryDecision::Exhausted
        } else {
            RetryDecision::Retry {
                retry_count: next,
                delay: self.delay_for(next),
            }
        }
    }
}
