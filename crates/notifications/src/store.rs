use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::MessageId;
use uuid::Uuid;

use crate::{MessageRecord, MessageType, Result};

/// Persistence for the notification ledger.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Inserts a new record.
    ///
    /// Fails with `DuplicateMessage` if a record with the same
    /// `(source_event_id, message_type)` already exists.
    async fn insert(&self, record: &MessageRecord) -> Result<()>;

    /// Overwrites a record if its stored version is still `record.version`.
    ///
    /// Returns the record with its version bumped.
    async fn update(&self, record: MessageRecord) -> Result<MessageRecord>;

    async fn get(&self, id: MessageId) -> Result<Option<MessageRecord>>;

    /// Looks up the record produced from an outbox event.
    async fn find_by_source(
        &self,
        source_event_id: Uuid,
        message_type: MessageType,
    ) -> Result<Option<MessageRecord>>;

    /// Records due for a resend, oldest first.
    ///
    /// Matches FAILED records, and PENDING or RETRYING records left behind by
    /// an interrupted attempt, whose last update is before `cutoff` and
    /// whose `retry_count` is below `max_retries`.
    async fn find_retry_candidates(
        &self,
        cutoff: DateTime<Utc>,
        max_retries: u32,
        limit: u32,
    ) -> Result<Vec<MessageRecord>>;
}

#[async_trait]
impl<T: MessageStore + ?Sized> MessageStore for Arc<T> {
    async fn insert(&self, record: &MessageRecord) -> Result<()> {
        (**self).insert(record).await
    }

    async fn update(&self, record: MessageRecord) -> Result<MessageRecord> {
        (**self).update(record).await
    }

    async fn get(&self, id: MessageId) -> Result<Option<MessageRecord>> {
        (**self).get(id).await
    }

    async fn find_by_source(
        &self,
        source_event_id: Uuid,
        message_type: MessageType,
    ) -> Result<Option<MessageRecord>> {
        (**self).find_by_source(source_event_id, message_type).await
    }

    async fn find_retry_candidates(
        &self,
        cutoff: DateTime<Utc>,
        max_retries: u32,
        limit: u32,
    ) -> Result<Vec<MessageRecord>> {
        (**self)
            .find_retry_candidates(cutoff, max_retries, limit)
            .await
    }
}
