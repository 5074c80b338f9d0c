use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::{EventCount, EventId, EventQuery, OutboxEvent, Result, StatsQuery};

/// What to do with an event whose processing attempt failed.
///
/// Either way the store increments `retry_count` by exactly one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Return the event to PENDING, eligible again at `next_run_at`.
    Retry {
        error: String,
        next_run_at: DateTime<Utc>,
    },

    /// Move the event to DEAD_LETTER.
    DeadLetter { error: String },
}

/// Result of a lease reaper pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapSummary {
    /// Events returned to PENDING.
    pub requeued: u64,

    /// Events whose expired lease exhausted their retries.
    pub dead_lettered: u64,
}

impl ReapSummary {
    /// Total number of leases reclaimed.
    pub fn total(&self) -> u64 {
        self.requeued + self.dead_lettered
    }
}

/// Dispatcher-facing operations on the outbox.
///
/// Appending an event together with a state change is not part of this
/// trait: it has to happen on the caller's transaction, see
/// [`PostgresOutboxStore::append`](crate::PostgresOutboxStore::append) and
/// [`OutboxTable::append`](crate::OutboxTable::append).
///
/// Bookkeeping after a claim (`complete`, `fail`) is only accepted from the
/// holder of the current lease token. Terminal rows are never modified.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Appends a standalone event in its own transaction.
    ///
    /// For producers that have no surrounding unit of work.
    async fn publish(&self, event: OutboxEvent) -> Result<()>;

    /// Claims the oldest eligible PENDING event.
    ///
    /// The event moves to PROCESSING with a fresh lease token valid for
    /// `lease`. Concurrent callers never receive the same event.
    async fn claim_next(&self, now: DateTime<Utc>, lease: Duration)
    -> Result<Option<OutboxEvent>>;

    /// Marks a claimed event COMPLETED.
    async fn complete(&self, event_id: EventId, lease_token: Uuid) -> Result<OutboxEvent>;

    /// Records a failed attempt on a claimed event.
    async fn fail(
        &self,
        event_id: EventId,
        lease_token: Uuid,
        disposition: FailureDisposition,
    ) -> Result<OutboxEvent>;

    /// Reclaims PROCESSING events whose lease expired before `now`.
    ///
    /// An expired lease counts as a failed attempt: `retry_count` is
    /// incremented and the event is dead-lettered once it reaches
    /// `max_retries`, otherwise it becomes eligible immediately.
    async fn reap_expired(&self, now: DateTime<Utc>, max_retries: u32) -> Result<ReapSummary>;

    /// Deletes up to `batch_size` COMPLETED events created before `older_than`.
    ///
    /// Returns the number of deleted rows.
    async fn purge_completed(&self, older_than: DateTime<Utc>, batch_size: u32) -> Result<u64>;

    /// Counts events grouped by type and status.
    async fn count_events(&self, query: StatsQuery) -> Result<Vec<EventCount>>;

    /// Retrieves a single event.
    async fn get_event(&self, event_id: EventId) -> Result<Option<OutboxEvent>>;

    /// Retrieves events matching a query, oldest first.
    async fn query_events(&self, query: EventQuery) -> Result<Vec<OutboxEvent>>;
}
