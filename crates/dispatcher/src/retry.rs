use std::time::Duration;

use chrono::{DateTime, Utc};
use outbox::FailureDisposition;

/// Capped exponential backoff with a retry budget.
///
/// After the `n`th failed attempt the event waits
/// `min(base_delay * 2^(n-1), max_delay)`; once `n` reaches `max_retries`
/// it is dead-lettered instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(3600),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt after `failures` failed attempts.
    pub fn delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1);
        let factor = 2u32.checked_pow(exponent).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Decides what happens to an event that just failed with `retry_count`
    /// failures recorded before this attempt.
    pub fn on_failure(
        &self,
        retry_count: u32,
        error: String,
        now: DateTime<Utc>,
    ) -> FailureDisposition {
        let failures = retry_count.saturating_add(1);
        if failures >= self.max_retries {
            return FailureDisposition::DeadLetter { error };
        }
        let delay = chrono::Duration::from_std(self.delay(failures))
            .unwrap_or(chrono::Duration::MAX);
        FailureDisposition::Retry {
            error,
            next_run_at: now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }
}
