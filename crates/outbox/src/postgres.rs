use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    EventCount, EventId, EventQuery, EventStatus, OutboxError, OutboxEvent, Result, StatsQuery,
    store::{FailureDisposition, OutboxStore, ReapSummary},
};

const EVENT_COLUMNS: &str = "id, event_type, aggregate_id, payload, status, retry_count, \
     next_run_at, lease_token, locked_until, error_message, created_at, updated_at";

/// PostgreSQL-backed outbox.
#[derive(Clone)]
pub struct PostgresOutboxStore {
    pool: PgPool,
}

impl PostgresOutboxStore {
    /// Creates a new PostgreSQL outbox store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    /// Inserts an event on the caller's connection.
    ///
    /// Pass `&mut *tx` to make the event part of an open transaction; it
    /// becomes visible to dispatchers only when that transaction commits.
    pub async fn append(conn: &mut PgConnection, event: &OutboxEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO outbox_events (id, event_type, aggregate_id, payload, status, retry_count,
                next_run_at, lease_token, locked_until, error_message, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(event.id.as_uuid())
        .bind(&event.event_type)
        .bind(&event.aggregate_id)
        .bind(&event.payload)
        .bind(event.status.as_str())
        .bind(event.retry_count as i32)
        .bind(event.next_run_at)
        .bind(event.lease_token)
        .bind(event.locked_until)
        .bind(&event.error_message)
        .bind(event.created_at)
        .bind(event.updated_at)
        .execute(conn)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return OutboxError::DuplicateEvent(event.id);
            }
            OutboxError::Database(e)
        })?;

        metrics::counter!("outbox_events_appended_total", "event_type" => event.event_type.clone())
            .increment(1);
        Ok(())
    }

    fn row_to_event(row: PgRow) -> Result<OutboxEvent> {
        let status: String = row.try_get("status")?;
        let retry_count: i32 = row.try_get("retry_count")?;

        Ok(OutboxEvent {
            id: EventId::from_uuid(row.try_get::<Uuid, _>("id")?),
            event_type: row.try_get("event_type")?,
            aggregate_id: row.try_get("aggregate_id")?,
            payload: row.try_get("payload")?,
            status: status.parse()?,
            retry_count: retry_count.max(0) as u32,
            next_run_at: row.try_get("next_run_at")?,
            lease_token: row.try_get("lease_token")?,
            locked_until: row.try_get("locked_until")?,
            error_message: row.try_get("error_message")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    /// Distinguishes a missing row from a lost lease after a guarded update matched nothing.
    async fn lease_error(&self, event_id: EventId) -> OutboxError {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM outbox_events WHERE id = $1)",
        )
        .bind(event_id.as_uuid())
        .fetch_one(&self.pool)
        .await;

        match exists {
            Ok(true) => OutboxError::LeaseLost(event_id),
            Ok(false) => OutboxError::EventNotFound(event_id),
            Err(e) => OutboxError::Database(e),
        }
    }
}

#[async_trait]
impl OutboxStore for PostgresOutboxStore {
    async fn publish(&self, event: OutboxEvent) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        Self::append(&mut conn, &event).await
    }

    async fn claim_next(
        &self,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Option<OutboxEvent>> {
        let sql = format!(
            r#"
            UPDATE outbox_events
            SET status = 'PROCESSING', lease_token = $1, locked_until = $2, updated_at = $3
            WHERE id = (
                SELECT id FROM outbox_events
                WHERE status = 'PENDING' AND (next_run_at IS NULL OR next_run_at <= $3)
                ORDER BY created_at ASC, id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {EVENT_COLUMNS}
            "#
        );

        let row = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(now.checked_add_signed(lease).unwrap_or(DateTime::<Utc>::MAX_UTC))
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_event).transpose()
    }

    async fn complete(&self, event_id: EventId, lease_token: Uuid) -> Result<OutboxEvent> {
        let sql = format!(
            r#"
            UPDATE outbox_events
            SET status = 'COMPLETED', lease_token = NULL, locked_until = NULL,
                error_message = NULL, updated_at = $3
            WHERE id = $1 AND status = 'PROCESSING' AND lease_token = $2
            RETURNING {EVENT_COLUMNS}
            "#
        );

        let row = sqlx::query(&sql)
            .bind(event_id.as_uuid())
            .bind(lease_token)
            .bind(Utc::now())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Self::row_to_event(row),
            None => Err(self.lease_error(event_id).await),
        }
    }

    async fn fail(
        &self,
        event_id: EventId,
        lease_token: Uuid,
        disposition: FailureDisposition,
    ) -> Result<OutboxEvent> {
        let (status, next_run_at, error) = match disposition {
            FailureDisposition::Retry { error, next_run_at } => {
                (EventStatus::Pending, Some(next_run_at), error)
            }
            FailureDisposition::DeadLetter { error } => (EventStatus::DeadLetter, None, error),
        };

        let sql = format!(
            r#"
            UPDATE outbox_events
            SET status = $3, retry_count = retry_count + 1, next_run_at = $4,
                error_message = $5, lease_token = NULL, locked_until = NULL, updated_at = $6
            WHERE id = $1 AND status = 'PROCESSING' AND lease_token = $2
            RETURNING {EVENT_COLUMNS}
            "#
        );

        let row = sqlx::query(&sql)
            .bind(event_id.as_uuid())
            .bind(lease_token)
            .bind(status.as_str())
            .bind(next_run_at)
            .bind(error)
            .bind(Utc::now())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Self::row_to_event(row),
            None => Err(self.lease_error(event_id).await),
        }
    }

    async fn reap_expired(&self, now: DateTime<Utc>, max_retries: u32) -> Result<ReapSummary> {
        let rows = sqlx::query(
            r#"
            UPDATE outbox_events o
            SET retry_count = o.retry_count + 1,
                status = CASE WHEN o.retry_count + 1 >= $2 THEN 'DEAD_LETTER' ELSE 'PENDING' END,
                next_run_at = CASE WHEN o.retry_count + 1 >= $2 THEN NULL ELSE $1 END,
                error_message = 'lease expired',
                lease_token = NULL,
                locked_until = NULL,
                updated_at = $1
            WHERE o.id IN (
                SELECT id FROM outbox_events
                WHERE status = 'PROCESSING' AND locked_until < $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING o.status
            "#,
        )
        .bind(now)
        .bind(max_retries as i32)
        .fetch_all(&self.pool)
        .await?;

        let mut summary = ReapSummary::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            if status.parse::<EventStatus>()? == EventStatus::DeadLetter {
                summary.dead_lettered += 1;
            } else {
                summary.requeued += 1;
            }
        }
        Ok(summary)
    }

    async fn purge_completed(&self, older_than: DateTime<Utc>, batch_size: u32) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM outbox_events
            WHERE id IN (
                SELECT id FROM outbox_events
                WHERE status = 'COMPLETED' AND created_at < $1
                ORDER BY created_at ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            "#,
        )
        .bind(older_than)
        .bind(batch_size as i64)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn count_events(&self, query: StatsQuery) -> Result<Vec<EventCount>> {
        let rows = sqlx::query(
            r#"
            SELECT event_type, status, COUNT(*) AS count
            FROM outbox_events
            WHERE created_at >= $1 AND created_at < $2
            GROUP BY event_type, status
            ORDER BY event_type ASC, status ASC
            "#,
        )
        .bind(query.from)
        .bind(query.to)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let status: String = row.try_get("status")?;
                let count: i64 = row.try_get("count")?;
                Ok(EventCount {
                    event_type: row.try_get("event_type")?,
                    status: status.parse()?,
                    count: count.max(0) as u64,
                })
            })
            .collect()
    }

    async fn get_event(&self, event_id: EventId) -> Result<Option<OutboxEvent>> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM outbox_events WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(event_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_event).transpose()
    }

    async fn query_events(&self, query: EventQuery) -> Result<Vec<OutboxEvent>> {
        let mut sql = format!("SELECT {EVENT_COLUMNS} FROM outbox_events WHERE 1=1");
        let mut param_count = 0;

        // Build dynamic query
        if query.status.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND status = ${param_count}"));
        }
        if query.event_type.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND event_type = ${param_count}"));
        }
        if query.aggregate_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND aggregate_id = ${param_count}"));
        }
        if query.created_from.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND created_at >= ${param_count}"));
        }

        sql.push_str(" ORDER BY created_at ASC, id ASC");

        if query.limit.is_some() {
            param_count += 1;
            sql.push_str(&format!(" LIMIT ${param_count}"));
        }

        let mut sqlx_query = sqlx::query(&sql);

        if let Some(status) = query.status {
            sqlx_query = sqlx_query.bind(status.as_str());
        }
        if let Some(event_type) = query.event_type {
            sqlx_query = sqlx_query.bind(event_type);
        }
        if let Some(aggregate_id) = query.aggregate_id {
            sqlx_query = sqlx_query.bind(aggregate_id);
        }
        if let Some(from) = query.created_from {
            sqlx_query = sqlx_query.bind(from);
        }
        if let Some(limit) = query.limit {
            sqlx_query = sqlx_query.bind(limit as i64);
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_event).collect()
    }
}
