use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::MessageId;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    MessageRecord, MessageStatus, MessageStore, MessageType, NotificationError, Result,
};

/// In-memory message ledger for tests and local runs.
#[derive(Clone, Default)]
pub struct InMemoryMessageStore {
    records: Arc<RwLock<HashMap<MessageId, MessageRecord>>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every record, oldest first.
    pub async fn all(&self) -> Vec<MessageRecord> {
        let mut records: Vec<_> = self.records.read().await.values().cloned().collect();
        records.sort_by_key(|r| r.created_at);
        records
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn insert(&self, record: &MessageRecord) -> Result<()> {
        let mut records = self.records.write().await;
        if let Some(source_event_id) = record.source_event_id
            && records.values().any(|r| {
                r.source_event_id == Some(source_event_id) && r.message_type == record.message_type
            })
        {
            return Err(NotificationError::DuplicateMessage {
                source_event_id,
                message_type: record.message_type,
            });
        }
        records.insert(record.id, record.clone());
        Ok(())
    }

    async fn update(&self, mut record: MessageRecord) -> Result<MessageRecord> {
        let mut records = self.records.write().await;
        let stored = records
            .get_mut(&record.id)
            .ok_or(NotificationError::MessageNotFound(record.id))?;
        if stored.version != record.version {
            return Err(NotificationError::VersionConflict(record.id));
        }
        record.version += 1;
        *stored = record.clone();
        Ok(record)
    }

    async fn get(&self, id: MessageId) -> Result<Option<MessageRecord>> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn find_by_source(
        &self,
        source_event_id: Uuid,
        message_type: MessageType,
    ) -> Result<Option<MessageRecord>> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .find(|r| r.source_event_id == Some(source_event_id) && r.message_type == message_type)
            .cloned())
    }

    async fn find_retry_candidates(
        &self,
        cutoff: DateTime<Utc>,
        max_retries: u32,
        limit: u32,
    ) -> Result<Vec<MessageRecord>> {
        let records = self.records.read().await;
        let mut candidates: Vec<_> = records
            .values()
            .filter(|r| r.status != MessageStatus::Sent)
            .filter(|r| r.updated_at < cutoff && r.retry_count < max_retries)
            .cloned()
            .collect();
        candidates.sort_by_key(|r| r.updated_at);
        candidates.truncate(limit as usize);
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Duration;
    use common::UserId;

    use super::*;
    use crate::TemplateMessage;

    fn record(source_event_id: Option<Uuid>) -> MessageRecord {
        let message = TemplateMessage::new("open-id", "tmpl", BTreeMap::new(), None);
        MessageRecord::pending(UserId::new(), MessageType::OrderPaid, &message, source_event_id)
            .unwrap()
    }

    #[tokio::test]
    async fn duplicate_source_event_is_rejected() {
        let store = InMemoryMessageStore::new();
        let source = Uuid::new_v4();
        store.insert(&record(Some(source))).await.unwrap();

        let result = store.insert(&record(Some(source))).await;
        assert!(matches!(
            result,
            Err(NotificationError::DuplicateMessage { .. })
        ));

        // Records without a source never collide
        store.insert(&record(None)).await.unwrap();
        store.insert(&record(None)).await.unwrap();
        assert_eq!(store.len().await, 3);

        let found = store
            .find_by_source(source, MessageType::OrderPaid)
            .await
            .unwrap();
        assert!(found.is_some());
        assert!(
            store
                .find_by_source(source, MessageType::OrderCreated)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn update_checks_version() {
        let store = InMemoryMessageStore::new();
        let original = record(None);
        store.insert(&original).await.unwrap();

        let mut sent = original.clone();
        sent.mark_sent(Some("m1".into()), Utc::now());
        let saved = store.update(sent).await.unwrap();
        assert_eq!(saved.version, 2);

        let mut stale = original;
        stale.mark_failed("boom", Utc::now());
        assert!(matches!(
            store.update(stale).await,
            Err(NotificationError::VersionConflict(_))
        ));
    }

    #[tokio::test]
    async fn retry_candidates_respect_cooldown_budget_and_status() {
        let store = InMemoryMessageStore::new();
        let old = Utc::now() - Duration::minutes(10);

        let mut failed = record(None);
        failed.mark_failed("boom", old);
        let mut stuck = record(None);
        stuck.updated_at = old;
        let mut exhausted = record(None);
        exhausted.mark_failed("boom", old);
        exhausted.retry_count = 3;
        let mut recent = record(None);
        recent.mark_failed("boom", Utc::now());
        let mut sent = record(None);
        sent.mark_sent(None, old);

        for r in [&failed, &stuck, &exhausted, &recent, &sent] {
            store.insert(r).await.unwrap();
        }

        let cutoff = Utc::now() - Duration::minutes(5);
        let candidates = store.find_retry_candidates(cutoff, 3, 100).await.unwrap();
        let mut ids: Vec<_> = candidates.iter().map(|r| r.id).collect();
        ids.sort();
        let mut expected = vec![failed.id, stuck.id];
        expected.sort();
        assert_eq!(ids, expected);

        assert_eq!(
            store.find_retry_candidates(cutoff, 3, 1).await.unwrap().len(),
            1
        );
    }
}
