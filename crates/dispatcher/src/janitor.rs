//! Retention and monitoring for the outbox table.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use outbox::{EventStats, EventStatus, OutboxStore, StatsQuery};
use serde::Serialize;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{info, warn};

use crate::{JanitorConfig, Result, config::to_chrono};

/// Result of one janitor pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JanitorReport {
    /// COMPLETED events deleted.
    pub purged: u64,

    pub stats: EventStats,
}

/// Purges old COMPLETED events and reports dead-letter rates.
///
/// PENDING, PROCESSING and DEAD_LETTER rows are never deleted.
pub struct Janitor {
    store: Arc<dyn OutboxStore>,
    config: JanitorConfig,
}

impl Janitor {
    pub fn new(store: Arc<dyn OutboxStore>, config: JanitorConfig) -> Self {
        Self { store, config }
    }

    /// Deletes COMPLETED events past the retention period, batch by batch.
    pub async fn purge(&self) -> Result<u64> {
        let cutoff = Utc::now()
            .checked_sub_signed(to_chrono(self.config.retention))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let batch_size = self.config.batch_size.max(1);
        let mut purged = 0;

        loop {
            let deleted = self.store.purge_completed(cutoff, batch_size).await?;
            purged += deleted;
            if deleted < u64::from(batch_size) {
                break;
            }
        }

        if purged > 0 {
            metrics::counter!("outbox_events_purged_total").increment(purged);
            info!(purged, %cutoff, "purged completed outbox events");
        }
        Ok(purged)
    }

    /// Event counts over the configured trailing window.
    pub async fn stats(&self) -> Result<EventStats> {
        let query = StatsQuery::trailing(Utc::now(), to_chrono(self.config.stats_window));
        let stats = EventStats::from_counts(self.store.count_events(query).await?);

        metrics::gauge!("outbox_dead_letter_rate").set(stats.dead_letter_rate());
        metrics::gauge!("outbox_events_pending").set(stats.with_status(EventStatus::Pending) as f64);
        Ok(stats)
    }

    pub async fn run_once(&self) -> Result<JanitorReport> {
        let purged = self.purge().await?;
        let stats = self.stats().await?;
        if stats.with_status(EventStatus::DeadLetter) > 0 {
            warn!(
                dead_letter = stats.with_status(EventStatus::DeadLetter),
                rate = stats.dead_letter_rate(),
                "dead-lettered outbox events in window"
            );
        }
        Ok(JanitorReport { purged, stats })
    }

    /// Spawns the janitor loop; it exits when `shutdown` fires.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = shutdown.changed() => break,
                }
                if *shutdown.borrow() {
                    break;
                }
                if let Err(e) = self.run_once().await {
                    warn!(error = %e, "outbox janitor pass failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use outbox::{InMemoryOutboxStore, OutboxEvent};

    use super::*;

    async fn completed(store: &InMemoryOutboxStore, created_at: DateTime<Utc>) {
        let mut event = OutboxEvent::from_raw("ORDER_CREATED", "order-1", serde_json::json!({}));
        event.created_at = created_at;
        event.status = EventStatus::Completed;
        store.publish(event).await.unwrap();
    }

    #[tokio::test]
    async fn purge_loops_over_batches_and_keeps_recent_events() {
        let store = InMemoryOutboxStore::new();
        let old = Utc::now() - chrono::Duration::days(45);
        for _ in 0..7 {
            completed(&store, old).await;
        }
        completed(&store, Utc::now()).await;

        let mut dead = OutboxEvent::from_raw("ORDER_PAID", "order-2", serde_json::json!({}));
        dead.created_at = old;
        dead.status = EventStatus::DeadLetter;
        store.publish(dead).await.unwrap();

        let janitor = Janitor::new(
            Arc::new(store.clone()),
            JanitorConfig {
                batch_size: 3,
                ..Default::default()
            },
        );

        assert_eq!(janitor.purge().await.unwrap(), 7);
        assert_eq!(store.event_count().await, 2);
    }

    #[tokio::test]
    async fn huge_retention_and_window_do_not_overflow() {
        let store = InMemoryOutboxStore::new();
        completed(&store, Utc::now() - chrono::Duration::days(45)).await;

        let janitor = Janitor::new(
            Arc::new(store.clone()),
            JanitorConfig {
                retention: Duration::MAX,
                stats_window: Duration::MAX,
                ..Default::default()
            },
        );
        let report = janitor.run_once().await.unwrap();

        assert_eq!(report.purged, 0);
        assert_eq!(report.stats.total(), 1);
        assert_eq!(store.event_count().await, 1);
    }

    #[tokio::test]
    async fn stats_report_dead_letter_rate() {
        let store = InMemoryOutboxStore::new();
        let recent = Utc::now() - chrono::Duration::seconds(1);
        for _ in 0..3 {
            completed(&store, recent).await;
        }
        let mut dead = OutboxEvent::from_raw("ORDER_PAID", "order-2", serde_json::json!({}));
        dead.created_at = recent;
        dead.status = EventStatus::DeadLetter;
        store.publish(dead).await.unwrap();

        let janitor = Janitor::new(
            Arc::new(store),
            JanitorConfig {
                stats_window: Duration::from_secs(3600),
                ..Default::default()
            },
        );
        let report = janitor.run_once().await.unwrap();

        assert_eq!(report.purged, 0);
        assert_eq!(report.stats.total(), 4);
        assert!((report.stats.dead_letter_rate() - 0.25).abs() < f64::EPSILON);
    }
}
