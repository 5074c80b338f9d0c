use std::time::Duration;

use crate::RetryPolicy;

/// Settings for dispatcher workers and the lease reaper.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Number of concurrent worker loops.
    pub workers: usize,

    /// Sleep between polls when no event is eligible.
    pub poll_interval: Duration,

    /// How long a claim stays valid before the reaper may reclaim it.
    pub lease: Duration,

    /// Upper bound on a single handler invocation.
    pub handler_timeout: Duration,

    /// How often the reaper looks for expired leases.
    pub reaper_interval: Duration,

    pub retry: RetryPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            poll_interval: Duration::from_secs(1),
            lease: Duration::from_secs(120),
            handler_timeout: Duration::from_secs(30),
            reaper_interval: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

impl DispatcherConfig {
    /// Lease length as a chrono duration, saturating on overflow.
    pub fn lease_duration(&self) -> chrono::Duration {
        to_chrono(self.lease)
    }
}

/// Settings for the retention janitor.
#[derive(Debug, Clone)]
pub struct JanitorConfig {
    /// COMPLETED events older than this are deleted.
    pub retention: Duration,

    /// Rows deleted per statement.
    pub batch_size: u32,

    /// How often the janitor runs.
    pub interval: Duration,

    /// Window over which event counts are reported.
    pub stats_window: Duration,
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(30 * 24 * 3600),
            batch_size: 500,
            interval: Duration::from_secs(3600),
            stats_window: Duration::from_secs(24 * 3600),
        }
    }
}

pub(crate) fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}
