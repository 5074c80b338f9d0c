use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{EventStatus, EventType};

/// Builder for listing outbox events.
///
/// Used by operational tooling to inspect dead letters and stuck events.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    /// Filter by status.
    pub status: Option<EventStatus>,

    /// Filter by stored event tag.
    pub event_type: Option<String>,

    /// Filter by the entity the event concerns.
    pub aggregate_id: Option<String>,

    /// Filter by events created at or after this timestamp.
    pub created_from: Option<DateTime<Utc>>,

    /// Maximum number of events to return.
    pub limit: Option<usize>,
}

impl EventQuery {
    /// Creates a new empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a query for events in a specific status.
    pub fn with_status(status: EventStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Filters by status.
    pub fn status(mut self, status: EventStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Filters by event type.
    pub fn event_type(mut self, event_type: EventType) -> Self {
        self.event_type = Some(event_type.as_str().to_string());
        self
    }

    /// Filters by aggregate.
    pub fn aggregate_id(mut self, aggregate_id: impl ToString) -> Self {
        self.aggregate_id = Some(aggregate_id.to_string());
        self
    }

    /// Filters to events created at or after this timestamp.
    pub fn created_from(mut self, timestamp: DateTime<Utc>) -> Self {
        self.created_from = Some(timestamp);
        self
    }

    /// Limits the number of events returned.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns true if the event satisfies every filter.
    pub fn matches(&self, event: &crate::OutboxEvent) -> bool {
        if let Some(status) = self.status
            && event.status != status
        {
            return false;
        }
        if let Some(ref event_type) = self.event_type
            && &event.event_type != event_type
        {
            return false;
        }
        if let Some(ref aggregate_id) = self.aggregate_id
            && &event.aggregate_id != aggregate_id
        {
            return false;
        }
        if let Some(from) = self.created_from
            && event.created_at < from
        {
            return false;
        }
        true
    }
}

/// Time window for event counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsQuery {
    /// Inclusive lower bound on `created_at`.
    pub from: DateTime<Utc>,

    /// Exclusive upper bound on `created_at`.
    pub to: DateTime<Utc>,
}

impl StatsQuery {
    /// Creates a window `[from, to)`.
    pub fn between(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }

    /// Creates a window covering the last `window` up to `now`.
    ///
    /// A window reaching past the earliest representable time starts there.
    pub fn trailing(now: DateTime<Utc>, window: chrono::Duration) -> Self {
        Self {
            from: now
                .checked_sub_signed(window)
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
            to: now,
        }
    }

    /// Returns true if `timestamp` falls inside the window.
    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        timestamp >= self.from && timestamp < self.to
    }
}

/// Number of events with a given type and status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventCount {
    pub event_type: String,
    pub status: EventStatus,
    pub count: u64,
}

/// Aggregated counts for dead-letter-rate monitoring.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EventStats {
    pub counts: Vec<EventCount>,
}

impl EventStats {
    /// Wraps raw counts.
    pub fn from_counts(counts: Vec<EventCount>) -> Self {
        Self { counts }
    }

    /// Total events in the window.
    pub fn total(&self) -> u64 {
        self.counts.iter().map(|c| c.count).sum()
    }

    /// Events in the window with the given status.
    pub fn with_status(&self, status: EventStatus) -> u64 {
        self.counts
            .iter()
            .filter(|c| c.status == status)
            .map(|c| c.count)
            .sum()
    }

    /// Share of finished events that were dead-lettered, in `[0, 1]`.
    ///
    /// Returns 0 when no event finished in the window.
    pub fn dead_letter_rate(&self) -> f64 {
        let dead = self.with_status(EventStatus::DeadLetter);
        let finished = dead + self.with_status(EventStatus::Completed);
        if finished == 0 {
            0.0
        } else {
            dead as f64 / finished as f64
        }
    }
}
