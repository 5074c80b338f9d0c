use std::{sync::Arc, time::Instant};

use chrono::{DateTime, Utc};
use outbox::{EventId, FailureDisposition, OutboxError, OutboxEvent, OutboxStore};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::{
    DispatchError, DispatcherConfig, HandlerError, HandlerRegistry, Result, sleep_or_shutdown,
};

/// What a single dispatch attempt did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// No event was eligible.
    Idle,

    /// The handler succeeded, or no handler is registered for the type.
    Completed { event_id: EventId },

    /// The handler failed and the event is scheduled again.
    Retried {
        event_id: EventId,
        retry_count: u32,
        next_run_at: DateTime<Utc>,
    },

    /// The event will not be attempted again.
    DeadLettered { event_id: EventId, retry_count: u32 },

    /// The lease expired and was reclaimed before the result was recorded.
    LeaseLost { event_id: EventId },
}

impl DispatchOutcome {
    fn label(&self) -> &'static str {
        match self {
            DispatchOutcome::Idle => "idle",
            DispatchOutcome::Completed { .. } => "completed",
            DispatchOutcome::Retried { .. } => "retried",
            DispatchOutcome::DeadLettered { .. } => "dead_lettered",
            DispatchOutcome::LeaseLost { .. } => "lease_lost",
        }
    }
}

/// Claims outbox events and routes them to registered handlers.
pub struct Dispatcher {
    store: Arc<dyn OutboxStore>,
    registry: Arc<HandlerRegistry>,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        registry: HandlerRegistry,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            store,
            registry: Arc::new(registry),
            config,
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Claims and processes at most one event.
    ///
    /// Handler failures are recorded on the event and reported through the
    /// outcome; only store failures surface as errors.
    pub async fn run_once(&self) -> Result<DispatchOutcome> {
        let Some(event) = self
            .store
            .claim_next(Utc::now(), self.config.lease_duration())
            .await?
        else {
            return Ok(DispatchOutcome::Idle);
        };

        let span = info_span!(
            "dispatch",
            event_id = %event.id,
            event_type = %event.event_type,
            retry_count = event.retry_count,
        );
        self.process(event).instrument(span).await
    }

    async fn process(&self, event: OutboxEvent) -> Result<DispatchOutcome> {
        let lease_token = event
            .lease_token
            .ok_or(DispatchError::MissingLease(event.id))?;
        let started = Instant::now();

        let attempt = match event.kind() {
            Err(unknown) => Err(HandlerError::permanent(unknown)),
            Ok(event_type) => match self.registry.get(event_type) {
                None => {
                    warn!("no handler registered, completing without delivery");
                    Ok(())
                }
                Some(handler) => {
                    debug!(handler = handler.name(), "invoking handler");
                    match tokio::time::timeout(self.config.handler_timeout, handler.handle(&event))
                        .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(HandlerError::transient(format!(
                            "handler {} timed out after {:?}",
                            handler.name(),
                            self.config.handler_timeout
                        ))),
                    }
                }
            },
        };

        let recorded = match attempt {
            Ok(()) => self.store.complete(event.id, lease_token).await,
            Err(err) => {
                let disposition = if err.is_permanent() {
                    FailureDisposition::DeadLetter {
                        error: err.to_string(),
                    }
                } else {
                    self.config
                        .retry
                        .on_failure(event.retry_count, err.to_string(), Utc::now())
                };
                warn!(error = %err, "event handling failed");
                self.store.fail(event.id, lease_token, disposition).await
            }
        };

        let outcome = match recorded {
            Ok(updated) => outcome_for(&updated),
            Err(OutboxError::LeaseLost(event_id)) => {
                warn!("lease reclaimed before the result was recorded");
                DispatchOutcome::LeaseLost { event_id }
            }
            Err(e) => return Err(e.into()),
        };

        metrics::counter!("outbox_events_dispatched_total", "outcome" => outcome.label())
            .increment(1);
        metrics::histogram!("outbox_dispatch_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        if let DispatchOutcome::DeadLettered { retry_count, .. } = outcome {
            metrics::counter!("outbox_events_dead_lettered_total", "event_type" => event.event_type.clone())
                .increment(1);
            error!(retry_count, "event dead-lettered");
        }

        Ok(outcome)
    }

    /// Processes events until none is eligible. Returns how many were handled.
    pub async fn drain(&self) -> Result<usize> {
        let mut handled = 0;
        while self.run_once().await? != DispatchOutcome::Idle {
            handled += 1;
        }
        Ok(handled)
    }

    /// Worker loop: dispatch until `shutdown` fires.
    ///
    /// An in-flight event is always finished before the loop exits.
    pub async fn run_worker(&self, worker: usize, mut shutdown: watch::Receiver<bool>) {
        info!(worker, "dispatcher worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let pause = match self.run_once().await {
                Ok(DispatchOutcome::Idle) => true,
                Ok(_) => false,
                Err(e) => {
                    error!(worker, error = %e, "dispatch failed");
                    true
                }
            };
            if pause && sleep_or_shutdown(&mut shutdown, self.config.poll_interval).await {
                break;
            }
        }
        info!(worker, "dispatcher worker stopped");
    }

    /// Spawns `config.workers` worker loops.
    pub fn spawn_workers(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        (0..self.config.workers.max(1))
            .map(|worker| {
                let dispatcher = Arc::clone(&self);
                let shutdown = shutdown.clone();
                tokio::spawn(async move { dispatcher.run_worker(worker, shutdown).await })
            })
            .collect()
    }
}

fn outcome_for(event: &OutboxEvent) -> DispatchOutcome {
    match event.status {
        outbox::EventStatus::DeadLetter => DispatchOutcome::DeadLettered {
            event_id: event.id,
            retry_count: event.retry_count,
        },
        outbox::EventStatus::Pending => DispatchOutcome::Retried {
            event_id: event.id,
            retry_count: event.retry_count,
            next_run_at: event.next_run_at.unwrap_or(event.updated_at),
        },
        _ => DispatchOutcome::Completed { event_id: event.id },
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use async_trait::async_trait;
    use outbox::{EventStatus, EventType, InMemoryOutboxStore};

    use super::*;
    use crate::{EventHandler, RetryPolicy};

    struct Counting {
        calls: AtomicUsize,
        result: std::result::Result<(), HandlerError>,
    }

    impl Counting {
        fn new(result: std::result::Result<(), HandlerError>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                result,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EventHandler for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn handle(&self, _event: &OutboxEvent) -> std::result::Result<(), HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    struct Slow;

    #[async_trait]
    impl EventHandler for Slow {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn handle(&self, _event: &OutboxEvent) -> std::result::Result<(), HandlerError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    async fn publish(store: &InMemoryOutboxStore, event_type: &str) -> EventId {
        let event = OutboxEvent::from_raw(event_type, "order-1", serde_json::json!({}));
        let id = event.id;
        store.publish(event).await.unwrap();
        id
    }

    fn dispatcher(
        store: &InMemoryOutboxStore,
        handler: Arc<dyn EventHandler>,
        config: DispatcherConfig,
    ) -> Dispatcher {
        let registry = HandlerRegistry::new().with([EventType::OrderCreated], handler);
        Dispatcher::new(Arc::new(store.clone()), registry, config)
    }

    #[tokio::test]
    async fn idle_when_nothing_is_pending() {
        let store = InMemoryOutboxStore::new();
        let d = dispatcher(&store, Counting::new(Ok(())), DispatcherConfig::default());
        assert_eq!(d.run_once().await.unwrap(), DispatchOutcome::Idle);
    }

    #[tokio::test]
    async fn success_completes_the_event() {
        let store = InMemoryOutboxStore::new();
        let handler = Counting::new(Ok(()));
        let d = dispatcher(&store, handler.clone(), DispatcherConfig::default());
        let id = publish(&store, "ORDER_CREATED").await;

        assert_eq!(
            d.run_once().await.unwrap(),
            DispatchOutcome::Completed { event_id: id }
        );
        let event = store.get_event(id).await.unwrap().unwrap();
        assert_eq!(event.status, EventStatus::Completed);
        assert!(event.lease_token.is_none());
        assert_eq!(handler.calls(), 1);
    }

    #[tokio::test]
    async fn transient_failure_schedules_a_retry() {
        let store = InMemoryOutboxStore::new();
        let d = dispatcher(
            &store,
            Counting::new(Err(HandlerError::transient("down"))),
            DispatcherConfig::default(),
        );
        let id = publish(&store, "ORDER_CREATED").await;
        let before = Utc::now();

        let outcome = d.run_once().await.unwrap();
        let DispatchOutcome::Retried {
            retry_count,
            next_run_at,
            ..
        } = outcome
        else {
            panic!("expected a retry, got {outcome:?}");
        };
        assert_eq!(retry_count, 1);
        assert!(next_run_at >= before + chrono::Duration::seconds(30));

        let event = store.get_event(id).await.unwrap().unwrap();
        assert_eq!(event.status, EventStatus::Pending);
        assert_eq!(event.error_message.as_deref(), Some("down"));

        // Not eligible again until the backoff elapses
        assert_eq!(d.run_once().await.unwrap(), DispatchOutcome::Idle);
    }

    #[tokio::test]
    async fn last_allowed_failure_dead_letters() {
        let store = InMemoryOutboxStore::new();
        let d = dispatcher(
            &store,
            Counting::new(Err(HandlerError::transient("down"))),
            DispatcherConfig::default(),
        );
        let mut event = OutboxEvent::from_raw("ORDER_CREATED", "order-1", serde_json::json!({}));
        event.retry_count = 2;
        let id = event.id;
        store.publish(event).await.unwrap();

        assert_eq!(
            d.run_once().await.unwrap(),
            DispatchOutcome::DeadLettered {
                event_id: id,
                retry_count: 3
            }
        );
        let event = store.get_event(id).await.unwrap().unwrap();
        assert_eq!(event.status, EventStatus::DeadLetter);
        assert_eq!(event.retry_count, 3);
    }

    #[tokio::test]
    async fn permanent_failure_skips_the_retry_budget() {
        let store = InMemoryOutboxStore::new();
        let d = dispatcher(
            &store,
            Counting::new(Err(HandlerError::permanent("bad payload"))),
            DispatcherConfig::default(),
        );
        let id = publish(&store, "ORDER_CREATED").await;

        assert_eq!(
            d.run_once().await.unwrap(),
            DispatchOutcome::DeadLettered {
                event_id: id,
                retry_count: 1
            }
        );
    }

    #[tokio::test]
    async fn unknown_event_type_is_dead_lettered() {
        let store = InMemoryOutboxStore::new();
        let handler = Counting::new(Ok(()));
        let d = dispatcher(&store, handler.clone(), DispatcherConfig::default());
        let id = publish(&store, "SOMETHING_ELSE").await;

        assert!(matches!(
            d.run_once().await.unwrap(),
            DispatchOutcome::DeadLettered { .. }
        ));
        let event = store.get_event(id).await.unwrap().unwrap();
        assert!(
            event
                .error_message
                .unwrap()
                .contains("SOMETHING_ELSE")
        );
        assert_eq!(handler.calls(), 0);
    }

    #[tokio::test]
    async fn unhandled_event_type_is_completed() {
        let store = InMemoryOutboxStore::new();
        let d = dispatcher(&store, Counting::new(Ok(())), DispatcherConfig::default());
        let id = publish(&store, "ORDER_DELIVERED").await;

        assert_eq!(
            d.run_once().await.unwrap(),
            DispatchOutcome::Completed { event_id: id }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn handler_timeout_counts_as_transient_failure() {
        let store = InMemoryOutboxStore::new();
        let config = DispatcherConfig {
            handler_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        let d = dispatcher(&store, Arc::new(Slow), config);
        publish(&store, "ORDER_CREATED").await;

        assert!(matches!(
            d.run_once().await.unwrap(),
            DispatchOutcome::Retried { retry_count: 1, .. }
        ));
    }

    #[tokio::test]
    async fn drain_processes_everything_eligible() {
        let store = InMemoryOutboxStore::new();
        let handler = Counting::new(Ok(()));
        let d = dispatcher(&store, handler.clone(), DispatcherConfig::default());
        for _ in 0..5 {
            publish(&store, "ORDER_CREATED").await;
        }

        assert_eq!(d.drain().await.unwrap(), 5);
        assert_eq!(handler.calls(), 5);
    }

    #[tokio::test]
    async fn zero_delay_retries_until_dead_letter() {
        let store = InMemoryOutboxStore::new();
        let handler = Counting::new(Err(HandlerError::transient("down")));
        let config = DispatcherConfig {
            retry: RetryPolicy {
                max_retries: 3,
                base_delay: Duration::ZERO,
                max_delay: Duration::ZERO,
            },
            ..Default::default()
        };
        let d = dispatcher(&store, handler.clone(), config);
        let id = publish(&store, "ORDER_CREATED").await;

        assert_eq!(d.drain().await.unwrap(), 3);
        assert_eq!(handler.calls(), 3);
        let event = store.get_event(id).await.unwrap().unwrap();
        assert_eq!(event.status, EventStatus::DeadLetter);
    }
}
