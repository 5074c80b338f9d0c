//! PostgreSQL integration tests for the message ledger.
//!
//! Run with:
//!
//! ```bash
//! cargo test -p notifications --test postgres_integration -- --ignored --test-threads=1
//! ```

use std::{collections::BTreeMap, sync::Arc};

use chrono::{Duration, Utc};
use common::UserId;
use notifications::{
    MessageRecord, MessageStatus, MessageStore, MessageType, NotificationError,
    PostgresMessageStore, TemplateMessage,
};
use outbox::PostgresOutboxStore;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use uuid::Uuid;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();
            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();
            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            PostgresOutboxStore::new(temp_pool.clone())
                .run_migrations()
                .await
                .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

async fn get_test_store() -> PostgresMessageStore {
    let info = get_container_info().await;
    let pool = PgPool::connect(&info.connection_string).await.unwrap();
    sqlx::query("TRUNCATE TABLE message_records")
        .execute(&pool)
        .await
        .unwrap();
    PostgresMessageStore::new(pool)
}

fn record(source_event_id: Option<Uuid>) -> MessageRecord {
    let mut fields = BTreeMap::new();
    fields.insert("order_number".to_string(), "ORD1".to_string());
    let message = TemplateMessage::new("open-id", "tmpl", fields, None);
    MessageRecord::pending(UserId::new(), MessageType::OrderPaid, &message, source_event_id)
        .unwrap()
}

#[tokio::test]
#[ignore = "requires docker"]
async fn insert_and_get_round_trip() {
    let store = get_test_store().await;
    let original = record(None);
    store.insert(&original).await.unwrap();

    let loaded = store.get(original.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, MessageStatus::Pending);
    assert_eq!(loaded.template_message().unwrap().touser, "open-id");
    assert_eq!(loaded.version, 1);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn source_event_is_unique_per_message_type() {
    let store = get_test_store().await;
    let source = Uuid::new_v4();
    store.insert(&record(Some(source))).await.unwrap();

    let result = store.insert(&record(Some(source))).await;
    assert!(matches!(
        result,
        Err(NotificationError::DuplicateMessage { .. })
    ));
    assert!(
        store
            .find_by_source(source, MessageType::OrderPaid)
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
#[ignore = "requires docker"]
async fn stale_update_is_rejected() {
    let store = get_test_store().await;
    let original = record(None);
    store.insert(&original).await.unwrap();

    let mut sent = original.clone();
    sent.mark_sent(Some("m1".into()), Utc::now());
    assert_eq!(store.update(sent).await.unwrap().version, 2);

    let mut stale = original;
    stale.mark_failed("boom", Utc::now());
    assert!(matches!(
        store.update(stale).await,
        Err(NotificationError::VersionConflict(_))
    ));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn retry_candidates_filter_on_age_budget_and_status() {
    let store = get_test_store().await;
    let old = Utc::now() - Duration::minutes(10);

    let mut failed = record(None);
    failed.mark_failed("boom", old);
    let mut exhausted = record(None);
    exhausted.mark_failed("boom", old);
    exhausted.retry_count = 3;
    let mut sent = record(None);
    sent.mark_sent(Some("m1".into()), old);
    let mut recent = record(None);
    recent.mark_failed("boom", Utc::now());

    for r in [&failed, &exhausted, &sent, &recent] {
        store.insert(r).await.unwrap();
    }

    let candidates = store
        .find_retry_candidates(Utc::now() - Duration::minutes(5), 3, 100)
        .await
        .unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].id, failed.id);
}
