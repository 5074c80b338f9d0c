//! Best-effort ingestion queue for user actions and notifications.
//!
//! Producers enqueue without waiting; a single consumer task drains up to
//! `batch_size` items per tick. Items still queued when the process dies
//! are lost.

use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use common::UserId;
use outbox::{EventType, OutboxEvent, OutboxStore};
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{MessageType, NotificationConfig, NotificationError, NotificationService, Result, SendRequest};

/// Something to process off the request path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueueItem {
    /// Telemetry about something a user did.
    UserAction {
        user_id: UserId,
        action_type: String,
        #[serde(default)]
        target: Option<String>,
        #[serde(default)]
        properties: BTreeMap<String, String>,
    },

    /// A push notification to send.
    Notification {
        user_id: UserId,
        recipient: String,
        message_type: MessageType,
        template_data: BTreeMap<String, String>,
        #[serde(default)]
        page: Option<String>,
    },
}

/// Snapshot of the queue for monitoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub queue_depth: usize,
    pub capacity: usize,
    pub batch_size: usize,
    pub flush_interval_ms: u64,
    pub processed_total: u64,
}

/// Producer handle to the ingestion queue.
#[derive(Clone)]
pub struct NotificationQueue {
    items: mpsc::Sender<QueueItem>,
    flushes: mpsc::Sender<oneshot::Sender<usize>>,
    processed: Arc<AtomicU64>,
    capacity: usize,
    batch_size: usize,
    flush_interval: Duration,
}

/// The single task that drains the queue.
pub struct QueueConsumer {
    items: mpsc::Receiver<QueueItem>,
    flushes: mpsc::Receiver<oneshot::Sender<usize>>,
    processed: Arc<AtomicU64>,
    batch_size: usize,
    flush_interval: Duration,
    service: Arc<NotificationService>,
    outbox: Arc<dyn OutboxStore>,
}

impl NotificationQueue {
    /// Creates the queue and its consumer. Spawn the consumer with
    /// [`QueueConsumer::spawn`].
    pub fn new(
        config: &NotificationConfig,
        service: Arc<NotificationService>,
        outbox: Arc<dyn OutboxStore>,
    ) -> (Self, QueueConsumer) {
        let capacity = config.queue_capacity.max(1);
        let batch_size = config.batch_size.max(1);
        let (items_tx, items_rx) = mpsc::channel(capacity);
        let (flush_tx, flush_rx) = mpsc::channel(8);
        let processed = Arc::new(AtomicU64::new(0));

        let queue = Self {
            items: items_tx,
            flushes: flush_tx,
            processed: processed.clone(),
            capacity,
            batch_size,
            flush_interval: config.flush_interval,
        };
        let consumer = QueueConsumer {
            items: items_rx,
            flushes: flush_rx,
            processed,
            batch_size,
            flush_interval: config.flush_interval,
            service,
            outbox,
        };
        (queue, consumer)
    }

    /// Adds an item without waiting. Returns false if it was dropped
    /// because the queue is full or closed.
    pub fn enqueue(&self, item: QueueItem) -> bool {
        match self.items.try_send(item) {
            Ok(()) => {
                metrics::gauge!("notification_queue_depth").set(self.depth() as f64);
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(capacity = self.capacity, "notification queue full, item dropped");
                metrics::counter!("notification_queue_dropped_total").increment(1);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("notification queue closed, item dropped");
                false
            }
        }
    }

    /// Processes everything queued now. Returns how many items were handled.
    pub async fn flush(&self) -> Result<usize> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.flushes
            .send(reply_tx)
            .await
            .map_err(|_| NotificationError::QueueClosed)?;
        reply_rx.await.map_err(|_| NotificationError::QueueClosed)
    }

    pub fn status(&self) -> QueueStatus {
        QueueStatus {
            queue_depth: self.depth(),
            capacity: self.capacity,
            batch_size: self.batch_size,
            flush_interval_ms: self.flush_interval.as_millis() as u64,
            processed_total: self.processed.load(Ordering::Relaxed),
        }
    }

    fn depth(&self) -> usize {
        self.items.max_capacity() - self.items.capacity()
    }
}

impl QueueConsumer {
    /// Runs the consumer until `shutdown` fires, then drains what is left.
    pub fn spawn(mut self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.flush_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.process_batch(self.batch_size).await;
                    }
                    Some(reply) = self.flushes.recv() => {
                        let handled = self.process_pending().await;
                        let _ = reply.send(handled);
                    }
                    _ = shutdown.changed() => break,
                }
                if *shutdown.borrow() {
                    break;
                }
            }

            let remaining = self.process_pending().await;
            info!(remaining, "notification queue drained on shutdown");
        })
    }

    /// Processes the items queued when called. Items enqueued meanwhile wait
    /// for the next batch.
    async fn process_pending(&mut self) -> usize {
        let pending = self.items.len();
        self.process_batch(pending).await
    }

    /// Processes up to `limit` queued items.
    async fn process_batch(&mut self, limit: usize) -> usize {
        let mut handled = 0;
        while handled < limit {
            let Ok(item) = self.items.try_recv() else {
                break;
            };
            self.process(item).await;
            handled += 1;
        }
        if handled > 0 {
            self.processed.fetch_add(handled as u64, Ordering::Relaxed);
            debug!(handled, "processed notification queue batch");
        }
        metrics::gauge!("notification_queue_depth").set(self.items.len() as f64);
        handled
    }

    async fn process(&self, item: QueueItem) {
        match item {
            QueueItem::UserAction {
                user_id,
                action_type,
                target,
                properties,
            } => {
                info!(
                    %user_id,
                    action_type = %action_type,
                    target = target.as_deref().unwrap_or(""),
                    ?properties,
                    "user action"
                );
                let payload = serde_json::json!({
                    "user_id": user_id,
                    "action_type": action_type,
                    "target": target,
                    "properties": properties,
                });
                let event = OutboxEvent::from_raw(EventType::UserAction.as_str(), user_id, payload);
                if let Err(e) = self.outbox.publish(event).await {
                    warn!(error = %e, "failed to publish user action event");
                }
            }
            QueueItem::Notification {
                user_id,
                recipient,
                message_type,
                template_data,
                page,
            } => {
                let mut request = SendRequest::new(user_id, recipient, message_type, template_data);
                request.page = page;
                if let Err(e) = self.service.send_message(request).await {
                    warn!(error = %e, %message_type, "queued notification failed");
                }
            }
        }
    }
}
