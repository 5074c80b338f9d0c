use std::{collections::BTreeMap, sync::Arc};

use chrono::{DateTime, Utc};
use common::UserId;
use tokio::{
    sync::{Mutex, watch},
    task::JoinHandle,
};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    MessageRecord, MessageStatus, MessageStore, MessageType, NotificationConfig,
    NotificationError, PushProvider, Result, TemplateMessage,
};

/// A notification to deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    pub user_id: UserId,

    /// Provider recipient id.
    pub recipient: String,

    pub message_type: MessageType,

    /// Template field values.
    pub template_data: BTreeMap<String, String>,

    /// Mini-program page opened from the notification.
    pub page: Option<String>,

    /// Outbox event the notification was produced from.
    pub source_event_id: Option<Uuid>,
}

impl SendRequest {
    pub fn new(
        user_id: UserId,
        recipient: impl Into<String>,
        message_type: MessageType,
        template_data: BTreeMap<String, String>,
    ) -> Self {
        Self {
            user_id,
            recipient: recipient.into(),
            message_type,
            template_data,
            page: None,
            source_event_id: None,
        }
    }

    pub fn page(mut self, page: impl Into<String>) -> Self {
        self.page = Some(page.into());
        self
    }

    pub fn source_event(mut self, event_id: Uuid) -> Self {
        self.source_event_id = Some(event_id);
        self
    }
}

/// Sends push notifications and keeps the delivery ledger.
pub struct NotificationService {
    store: Arc<dyn MessageStore>,
    provider: Arc<dyn PushProvider>,
    config: NotificationConfig,
    retry_scan: Mutex<()>,
}

impl NotificationService {
    pub fn new(
        store: Arc<dyn MessageStore>,
        provider: Arc<dyn PushProvider>,
        config: NotificationConfig,
    ) -> Self {
        Self {
            store,
            provider,
            config,
            retry_scan: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    pub fn config(&self) -> &NotificationConfig {
        &self.config
    }

    /// Persists a PENDING record, then attempts delivery.
    ///
    /// Provider and transport failures are recorded on the returned record
    /// as FAILED; they are left to the retry scan rather than returned.
    #[instrument(skip(self, request), fields(user_id = %request.user_id, message_type = %request.message_type))]
    pub async fn send_message(&self, request: SendRequest) -> Result<MessageRecord> {
        let template_id = self.config.template_id(request.message_type)?;
        let message = TemplateMessage::new(
            request.recipient,
            template_id,
            request.template_data,
            request.page,
        );

        let record = MessageRecord::pending(
            request.user_id,
            request.message_type,
            &message,
            request.source_event_id,
        )?;
        self.store.insert(&record).await?;

        self.deliver(record, &message, false).await
    }

    async fn deliver(
        &self,
        mut record: MessageRecord,
        message: &TemplateMessage,
        resend: bool,
    ) -> Result<MessageRecord> {
        let outcome = self.provider.send(message).await;
        let now = Utc::now();

        match outcome {
            Ok(receipt) if receipt.is_success() => {
                info!(message_id = %record.id, "notification sent");
                record.mark_sent(receipt.msgid, now);
                if resend {
                    // The attempt reserved before sending did not fail
                    record.retry_count = record.retry_count.saturating_sub(1);
                }
            }
            Ok(receipt) => {
                warn!(
                    message_id = %record.id,
                    errcode = receipt.errcode,
                    errmsg = %receipt.errmsg,
                    "provider rejected notification"
                );
                record.mark_failed(format!("{}: {}", receipt.errcode, receipt.errmsg), now);
            }
            Err(e) => {
                warn!(message_id = %record.id, error = %e, "notification delivery failed");
                record.mark_failed(e.to_string(), now);
            }
        }
        metrics::counter!("notifications_sent_total", "status" => record.status.as_str())
            .increment(1);
        self.store.update(record).await
    }

    /// Resends FAILED messages past the cool-down, and ones stuck mid-attempt.
    ///
    /// Returns how many were delivered. Only one scan runs at a time; a
    /// concurrent call fails with [`NotificationError::RetryInProgress`].
    #[instrument(skip(self))]
    pub async fn retry_failed_messages(&self) -> Result<usize> {
        let _guard = self
            .retry_scan
            .try_lock()
            .map_err(|_| NotificationError::RetryInProgress)?;

        let cooldown = chrono::Duration::from_std(self.config.retry_cooldown)
            .unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(cooldown)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let candidates = self
            .store
            .find_retry_candidates(cutoff, self.config.max_retries, self.config.retry_limit)
            .await?;

        let mut resent = 0;
        for mut record in candidates {
            let id = record.id;
            record.mark_retrying(Utc::now());
            // Count this attempt up front so an interrupted resend still spends budget
            record.retry_count += 1;
            let record = match self.store.update(record).await {
                Ok(record) => record,
                Err(NotificationError::VersionConflict(_)) => continue,
                Err(e) => return Err(e),
            };

            let message = match record.template_message() {
                Ok(message) => message,
                Err(e) => {
                    error!(message_id = %id, error = %e, "stored content is unreadable");
                    let mut record = record;
                    record.mark_failed(format!("unreadable content: {e}"), Utc::now());
                    record.retry_count = self.config.max_retries;
                    self.store.update(record).await?;
                    continue;
                }
            };

            match self.deliver(record, &message, true).await {
                Ok(record) if record.status == MessageStatus::Sent => resent += 1,
                Ok(_) => {}
                Err(e) => warn!(message_id = %id, error = %e, "failed to record retry result"),
            }
        }

        info!(resent, "completed retry of failed messages");
        Ok(resent)
    }

    /// Spawns the periodic retry scan; it exits when `shutdown` fires.
    pub fn spawn_retry_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            // First scan one interval after startup
            let period = self.config.retry_interval;
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = shutdown.changed() => break,
                }
                if *shutdown.borrow() {
                    break;
                }
                match self.retry_failed_messages().await {
                    Ok(_) | Err(NotificationError::RetryInProgress) => {}
                    Err(e) => warn!(error = %e, "notification retry scan failed"),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::Duration;

    use super::*;
    use crate::{InMemoryMessageStore, SendReceipt, error::ProviderError};

    /// Replays scripted provider responses, then repeats the last one.
    struct Scripted {
        responses: std::sync::Mutex<Vec<std::result::Result<SendReceipt, u16>>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(responses: Vec<std::result::Result<SendReceipt, u16>>) -> Arc<Self> {
            Arc::new(Self {
                responses: std::sync::Mutex::new(responses),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PushProvider for Scripted {
        async fn send(
            &self,
            _message: &TemplateMessage,
        ) -> std::result::Result<SendReceipt, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            let next = if responses.len() > 1 {
                responses.remove(0)
            } else {
                responses[0].clone()
            };
            next.map_err(ProviderError::Status)
        }
    }

    fn ok(msgid: &str) -> std::result::Result<SendReceipt, u16> {
        Ok(SendReceipt {
            errcode: 0,
            errmsg: "ok".into(),
            msgid: Some(msgid.into()),
        })
    }

    fn rejected() -> std::result::Result<SendReceipt, u16> {
        Ok(SendReceipt {
            errcode: 43101,
            errmsg: "user refuse to accept the msg".into(),
            msgid: None,
        })
    }

    fn service(
        store: &InMemoryMessageStore,
        provider: Arc<Scripted>,
    ) -> NotificationService {
        let config = NotificationConfig::default().with_template(MessageType::OrderPaid, "tmpl-paid");
        NotificationService::new(Arc::new(store.clone()), provider, config)
    }

    fn request() -> SendRequest {
        let mut data = BTreeMap::new();
        data.insert("character_string1".to_string(), "ORD1".to_string());
        SendRequest::new(UserId::new(), "open-id", MessageType::OrderPaid, data)
    }

    async fn age(store: &InMemoryMessageStore, record: &MessageRecord) {
        let mut stored = store.get(record.id).await.unwrap().unwrap();
        stored.updated_at = Utc::now() - Duration::minutes(10);
        store.update(stored).await.unwrap();
    }

    #[tokio::test]
    async fn success_is_recorded_with_provider_id() {
        let store = InMemoryMessageStore::new();
        let service = service(&store, Scripted::new(vec![ok("m1")]));

        let record = service.send_message(request()).await.unwrap();
        assert_eq!(record.status, MessageStatus::Sent);
        assert_eq!(record.provider_message_id.as_deref(), Some("m1"));
        assert_eq!(record.template_id, "tmpl-paid");
        assert_eq!(store.get(record.id).await.unwrap().unwrap(), record);
    }

    #[tokio::test]
    async fn rejection_is_recorded_as_failed() {
        let store = InMemoryMessageStore::new();
        let service = service(&store, Scripted::new(vec![rejected()]));

        let record = service.send_message(request()).await.unwrap();
        assert_eq!(record.status, MessageStatus::Failed);
        assert_eq!(
            record.error_message.as_deref(),
            Some("43101: user refuse to accept the msg")
        );
        assert_eq!(record.retry_count, 0);
    }

    #[tokio::test]
    async fn transport_failure_is_recorded_not_returned() {
        let store = InMemoryMessageStore::new();
        let service = service(&store, Scripted::new(vec![Err(502)]));

        let record = service.send_message(request()).await.unwrap();
        assert_eq!(record.status, MessageStatus::Failed);
        assert_eq!(record.error_message.as_deref(), Some("HTTP error: 502"));
    }

    #[tokio::test]
    async fn missing_template_persists_nothing() {
        let store = InMemoryMessageStore::new();
        let provider = Scripted::new(vec![ok("m1")]);
        let service = service(&store, provider.clone());

        let mut req = request();
        req.message_type = MessageType::OrderCreated;
        let result = service.send_message(req).await;

        assert!(matches!(
            result,
            Err(NotificationError::TemplateNotConfigured(MessageType::OrderCreated))
        ));
        assert!(store.is_empty().await);
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn retry_resends_failed_messages_after_cooldown() {
        let store = InMemoryMessageStore::new();
        let provider = Scripted::new(vec![rejected(), ok("m2")]);
        let service = service(&store, provider.clone());

        let record = service.send_message(request()).await.unwrap();

        // Still cooling down
        assert_eq!(service.retry_failed_messages().await.unwrap(), 0);

        age(&store, &record).await;
        assert_eq!(service.retry_failed_messages().await.unwrap(), 1);

        let stored = store.get(record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, MessageStatus::Sent);
        assert_eq!(stored.provider_message_id.as_deref(), Some("m2"));
        assert_eq!(stored.retry_count, 0);
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn repeated_failures_exhaust_the_budget() {
        let store = InMemoryMessageStore::new();
        let provider = Scripted::new(vec![rejected()]);
        let service = service(&store, provider.clone());
        let record = service.send_message(request()).await.unwrap();

        for expected in 1..=3 {
            age(&store, &record).await;
            assert_eq!(service.retry_failed_messages().await.unwrap(), 0);
            let stored = store.get(record.id).await.unwrap().unwrap();
            assert_eq!(stored.status, MessageStatus::Failed);
            assert_eq!(stored.retry_count, expected);
        }

        age(&store, &record).await;
        service.retry_failed_messages().await.unwrap();
        assert_eq!(provider.calls(), 4);
    }

    #[tokio::test]
    async fn success_after_failed_resends_counts_only_failures() {
        let store = InMemoryMessageStore::new();
        let provider = Scripted::new(vec![rejected(), rejected(), ok("m3")]);
        let service = service(&store, provider.clone());
        let record = service.send_message(request()).await.unwrap();

        age(&store, &record).await;
        assert_eq!(service.retry_failed_messages().await.unwrap(), 0);
        age(&store, &record).await;
        assert_eq!(service.retry_failed_messages().await.unwrap(), 1);

        let stored = store.get(record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, MessageStatus::Sent);
        assert_eq!(stored.retry_count, 1);
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn cooldown_beyond_the_calendar_finds_nothing() {
        let store = InMemoryMessageStore::new();
        let provider = Scripted::new(vec![rejected()]);
        let config = NotificationConfig {
            retry_cooldown: std::time::Duration::MAX,
            ..NotificationConfig::default().with_template(MessageType::OrderPaid, "tmpl-paid")
        };
        let service = NotificationService::new(Arc::new(store.clone()), provider.clone(), config);
        let record = service.send_message(request()).await.unwrap();

        age(&store, &record).await;
        assert_eq!(service.retry_failed_messages().await.unwrap(), 0);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn concurrent_scan_is_rejected() {
        let store = InMemoryMessageStore::new();
        let service = service(&store, Scripted::new(vec![ok("m1")]));

        let _held = service.retry_scan.try_lock().unwrap();
        assert!(matches!(
            service.retry_failed_messages().await,
            Err(NotificationError::RetryInProgress)
        ));
    }
}
