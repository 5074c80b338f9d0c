use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{MessageId, UserId};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{MessageRecord, MessageStore, MessageType, NotificationError, Result};

const MESSAGE_COLUMNS: &str = "id, user_id, recipient, message_type, template_id, content, \
     status, provider_message_id, error_message, retry_count, source_event_id, version, \
     sent_at, created_at, updated_at";

/// PostgreSQL-backed message ledger.
#[derive(Clone)]
pub struct PostgresMessageStore {
    pool: PgPool,
}

impl PostgresMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_record(row: PgRow) -> Result<MessageRecord> {
        let message_type: String = row.try_get("message_type")?;
        let status: String = row.try_get("status")?;
        let retry_count: i32 = row.try_get("retry_count")?;

        Ok(MessageRecord {
            id: MessageId::from_uuid(row.try_get::<Uuid, _>("id")?),
            user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
            recipient: row.try_get("recipient")?,
            message_type: message_type.parse()?,
            template_id: row.try_get("template_id")?,
            content: row.try_get("content")?,
            status: status.parse()?,
            provider_message_id: row.try_get("provider_message_id")?,
            error_message: row.try_get("error_message")?,
            retry_count: retry_count.max(0) as u32,
            source_event_id: row.try_get("source_event_id")?,
            version: row.try_get("version")?,
            sent_at: row.try_get("sent_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl MessageStore for PostgresMessageStore {
    async fn insert(&self, record: &MessageRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO message_records (id, user_id, recipient, message_type, template_id,
                content, status, provider_message_id, error_message, retry_count,
                source_event_id, version, sent_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.user_id.as_uuid())
        .bind(&record.recipient)
        .bind(record.message_type.as_str())
        .bind(&record.template_id)
        .bind(&record.content)
        .bind(record.status.as_str())
        .bind(&record.provider_message_id)
        .bind(&record.error_message)
        .bind(record.retry_count as i32)
        .bind(record.source_event_id)
        .bind(record.version)
        .bind(record.sent_at)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
                && let Some(source_event_id) = record.source_event_id
            {
                return NotificationError::DuplicateMessage {
                    source_event_id,
                    message_type: record.message_type,
                };
            }
            NotificationError::Database(e)
        })?;

        Ok(())
    }

    async fn update(&self, mut record: MessageRecord) -> Result<MessageRecord> {
        let result = sqlx::query(
            r#"
            UPDATE message_records
            SET status = $3, provider_message_id = $4, error_message = $5, retry_count = $6,
                sent_at = $7, updated_at = $8, version = version + 1
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.version)
        .bind(record.status.as_str())
        .bind(&record.provider_message_id)
        .bind(&record.error_message)
        .bind(record.retry_count as i32)
        .bind(record.sent_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(match self.get(record.id).await? {
                Some(_) => NotificationError::VersionConflict(record.id),
                None => NotificationError::MessageNotFound(record.id),
            });
        }

        record.version += 1;
        Ok(record)
    }

    async fn get(&self, id: MessageId) -> Result<Option<MessageRecord>> {
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM message_records WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_record).transpose()
    }

    async fn find_by_source(
        &self,
        source_event_id: Uuid,
        message_type: MessageType,
    ) -> Result<Option<MessageRecord>> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM message_records \
             WHERE source_event_id = $1 AND message_type = $2"
        );
        let row = sqlx::query(&sql)
            .bind(source_event_id)
            .bind(message_type.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_record).transpose()
    }

    async fn find_retry_candidates(
        &self,
        cutoff: DateTime<Utc>,
        max_retries: u32,
        limit: u32,
    ) -> Result<Vec<MessageRecord>> {
        let sql = format!(
            r#"
            SELECT {MESSAGE_COLUMNS} FROM message_records
            WHERE status IN ('FAILED', 'PENDING', 'RETRYING')
              AND updated_at < $1
              AND retry_count < $2
            ORDER BY updated_at ASC
            LIMIT $3
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(cutoff)
            .bind(max_retries as i32)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Self::row_to_record).collect()
    }
}
