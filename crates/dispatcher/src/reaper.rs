//! Reclaims leases abandoned by crashed or stalled workers.

use std::sync::Arc;

use chrono::Utc;
use outbox::{OutboxStore, ReapSummary};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{info, warn};

use crate::{DispatcherConfig, Result};

/// Background task that returns expired PROCESSING events to the queue.
pub struct LeaseReaper {
    store: Arc<dyn OutboxStore>,
    config: DispatcherConfig,
}

impl LeaseReaper {
    pub fn new(store: Arc<dyn OutboxStore>, config: DispatcherConfig) -> Self {
        Self { store, config }
    }

    /// Runs one reaper pass.
    pub async fn run_once(&self) -> Result<ReapSummary> {
        let summary = self
            .store
            .reap_expired(Utc::now(), self.config.retry.max_retries)
            .await?;

        if summary.total() > 0 {
            metrics::counter!("outbox_leases_reaped_total").increment(summary.total());
            if summary.dead_lettered > 0 {
                metrics::counter!("outbox_events_dead_lettered_total", "event_type" => "lease_expired")
                    .increment(summary.dead_lettered);
            }
            info!(
                requeued = summary.requeued,
                dead_lettered = summary.dead_lettered,
                "reclaimed expired leases"
            );
        }
        Ok(summary)
    }

    /// Spawns the reaper loop; it exits when `shutdown` fires.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.reaper_interval);
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
                    warn!(error = %e, "lease reaper pass failed");
                }
            }
        })
    }
}
