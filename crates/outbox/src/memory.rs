use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::{
    EventCount, EventId, EventQuery, EventStatus, OutboxError, OutboxEvent, Result, StatsQuery,
    store::{FailureDisposition, OutboxStore, ReapSummary},
};

const LEASE_EXPIRED: &str = "lease expired";

/// The rows of an in-memory outbox.
///
/// Holding the table's guard is the in-memory equivalent of holding an open
/// transaction: a caller that also owns other state can validate everything
/// first and then append, and nothing else observes the intermediate state.
#[derive(Debug, Default)]
pub struct OutboxTable {
    events: Vec<OutboxEvent>,
}

impl OutboxTable {
    /// Appends an event on the caller's guard. Has no locking of its own.
    pub fn append(&mut self, event: OutboxEvent) -> Result<()> {
        if self.contains(event.id) {
            return Err(OutboxError::DuplicateEvent(event.id));
        }
        metrics::counter!("outbox_events_appended_total", "event_type" => event.event_type.clone())
            .increment(1);
        self.events.push(event);
        Ok(())
    }

    /// Returns true if an event with this ID exists.
    pub fn contains(&self, event_id: EventId) -> bool {
        self.events.iter().any(|e| e.id == event_id)
    }

    /// Returns all rows in insertion order.
    pub fn events(&self) -> &[OutboxEvent] {
        &self.events
    }

    /// Returns the number of rows.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns true if the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    fn find_mut(&mut self, event_id: EventId) -> Option<&mut OutboxEvent> {
        self.events.iter_mut().find(|e| e.id == event_id)
    }

    /// Finds the event and checks that `lease_token` is its current lease.
    fn leased_mut(&mut self, event_id: EventId, lease_token: Uuid) -> Result<&mut OutboxEvent> {
        let event = self
            .find_mut(event_id)
            .ok_or(OutboxError::EventNotFound(event_id))?;
        if event.status != EventStatus::Processing || event.lease_token != Some(lease_token) {
            return Err(OutboxError::LeaseLost(event_id));
        }
        Ok(event)
    }

    fn claim_next(&mut self, now: DateTime<Utc>, lease: Duration) -> Option<OutboxEvent> {
        let (index, _) = self
            .events
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_eligible(now))
            .min_by_key(|(i, e)| (e.created_at, *i))?;

        let event = &mut self.events[index];
        event.status = EventStatus::Processing;
        event.lease_token = Some(Uuid::new_v4());
        event.locked_until = Some(
            now.checked_add_signed(lease)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        );
        event.updated_at = now;
        Some(event.clone())
    }
}

/// Records one failed attempt on an event the caller is allowed to modify.
fn record_failure(event: &mut OutboxEvent, disposition: FailureDisposition, now: DateTime<Utc>) {
    event.retry_count += 1;
    event.lease_token = None;
    event.locked_until = None;
    event.updated_at = now;
    match disposition {
        FailureDisposition::Retry { error, next_run_at } => {
            event.status = EventStatus::Pending;
            event.next_run_at = Some(next_run_at);
            event.error_message = Some(error);
        }
        FailureDisposition::DeadLetter { error } => {
            event.status = EventStatus::DeadLetter;
            event.next_run_at = None;
            event.error_message = Some(error);
        }
    }
}

/// In-memory outbox for tests and local runs.
///
/// Provides the same interface and claim semantics as the PostgreSQL store;
/// the table mutex stands in for the row lock.
#[derive(Clone, Default)]
pub struct InMemoryOutboxStore {
    table: Arc<Mutex<OutboxTable>>,
}

impl InMemoryOutboxStore {
    /// Creates a new empty in-memory outbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the table for a caller-managed unit of work.
    pub async fn lock(&self) -> MutexGuard<'_, OutboxTable> {
        self.table.lock().await
    }

    /// Returns the total number of events stored.
    pub async fn event_count(&self) -> usize {
        self.table.lock().await.len()
    }

    /// Returns a copy of every stored event.
    pub async fn all_events(&self) -> Vec<OutboxEvent> {
        self.table.lock().await.events().to_vec()
    }

    /// Clears all events.
    pub async fn clear(&self) {
        self.table.lock().await.events.clear();
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn publish(&self, event: OutboxEvent) -> Result<()> {
        self.table.lock().await.append(event)
    }

    async fn claim_next(
        &self,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Option<OutboxEvent>> {
        Ok(self.table.lock().await.claim_next(now, lease))
    }

    async fn complete(&self, event_id: EventId, lease_token: Uuid) -> Result<OutboxEvent> {
        let mut table = self.table.lock().await;
        let event = table.leased_mut(event_id, lease_token)?;
        event.status = EventStatus::Completed;
        event.lease_token = None;
        event.locked_until = None;
        event.error_message = None;
        event.updated_at = Utc::now();
        Ok(event.clone())
    }

    async fn fail(
        &self,
        event_id: EventId,
        lease_token: Uuid,
        disposition: FailureDisposition,
    ) -> Result<OutboxEvent> {
        let mut table = self.table.lock().await;
        let event = table.leased_mut(event_id, lease_token)?;
        record_failure(event, disposition, Utc::now());
        Ok(event.clone())
    }

    async fn reap_expired(&self, now: DateTime<Utc>, max_retries: u32) -> Result<ReapSummary> {
        let mut table = self.table.lock().await;
        let mut summary = ReapSummary::default();

        for event in table.events.iter_mut().filter(|e| e.lease_expired(now)) {
            let disposition = if event.retry_count + 1 >= max_retries {
                summary.dead_lettered += 1;
                FailureDisposition::DeadLetter {
                    error: LEASE_EXPIRED.to_string(),
                }
            } else {
                summary.requeued += 1;
                FailureDisposition::Retry {
                    error: LEASE_EXPIRED.to_string(),
                    next_run_at: now,
                }
            };
            record_failure(event, disposition, now);
        }

        Ok(summary)
    }

    async fn purge_completed(&self, older_than: DateTime<Utc>, batch_size: u32) -> Result<u64> {
        let mut table = self.table.lock().await;
        let mut remaining = batch_size as usize;
        let before = table.events.len();

        table.events.retain(|e| {
            let expired = e.status == EventStatus::Completed && e.created_at < older_than;
            if expired && remaining > 0 {
                remaining -= 1;
                false
            } else {
                true
            }
        });

        Ok((before - table.events.len()) as u64)
    }

    async fn count_events(&self, query: StatsQuery) -> Result<Vec<EventCount>> {
        let table = self.table.lock().await;
        let mut counts: Vec<EventCount> = Vec::new();

        for event in table.events.iter().filter(|e| query.contains(e.created_at)) {
            match counts
                .iter_mut()
                .find(|c| c.event_type == event.event_type && c.status == event.status)
            {
                Some(count) => count.count += 1,
                None => counts.push(EventCount {
                    event_type: event.event_type.clone(),
                    status: event.status,
                    count: 1,
                }),
            }
        }

        counts.sort_by(|a, b| {
            (a.event_type.as_str(), a.status.as_str()).cmp(&(b.event_type.as_str(), b.status.as_str()))
        });
        Ok(counts)
    }

    async fn get_event(&self, event_id: EventId) -> Result<Option<OutboxEvent>> {
        let table = self.table.lock().await;
        Ok(table.events.iter().find(|e| e.id == event_id).cloned())
    }

    async fn query_events(&self, query: EventQuery) -> Result<Vec<OutboxEvent>> {
        let table = self.table.lock().await;
        let mut events: Vec<_> = table
            .events
            .iter()
            .filter(|e| query.matches(e))
            .cloned()
            .collect();
        events.sort_by_key(|e| e.created_at);
        if let Some(limit) = query.limit {
            events.truncate(limit);
        }
        Ok(events)
    }
}
