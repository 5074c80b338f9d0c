//! PostgreSQL integration tests for the order store.
//!
//! Run with:
//!
//! ```bash
//! cargo test -p domain --test postgres_integration -- --ignored --test-threads=1
//! ```

use std::sync::Arc;

use chrono::Utc;
use common::{AddressId, UserId};
use domain::{
    Order, OrderChange, OrderEvent, OrderStore, OrderWrite, PostgresOrderStore, Product,
    StockAdjustment, StoreError, generate_order_number,
};
use outbox::{OutboxStore, PostgresOutboxStore};
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

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

async fn get_test_stores() -> (PostgresOrderStore, PostgresOutboxStore) {
    let info = get_container_info().await;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE orders, products, outbox_events")
        .execute(&pool)
        .await
        .unwrap();

    (
        PostgresOrderStore::new(pool.clone()),
        PostgresOutboxStore::new(pool),
    )
}

fn new_order(product: &Product, quantity: u32) -> Order {
    Order::place(
        generate_order_number(Utc::now()),
        UserId::new(),
        product.id,
        AddressId::new(),
        quantity,
        product.amount_for(quantity).unwrap(),
    )
}

fn insert(order: &Order) -> OrderChange {
    OrderChange {
        stock: Some(StockAdjustment::Decrement {
            product_id: order.product_id,
            quantity: order.quantity,
        }),
        write: OrderWrite::Insert(order.clone()),
        event: OrderEvent::created(order).to_outbox().unwrap(),
    }
}

#[tokio::test]
#[ignore = "requires docker"]
async fn commit_writes_order_stock_and_event_together() {
    let (store, outbox) = get_test_stores().await;
    let product = Product::new("Tea", 300, 5);
    store.upsert_product(&product).await.unwrap();

    let order = new_order(&product, 3);
    let change = insert(&order);
    let event_id = change.event.id;
    store.commit(change).await.unwrap();

    assert_eq!(store.get_order(order.id).await.unwrap().unwrap().quantity, 3);
    assert_eq!(store.get_product(product.id).await.unwrap().unwrap().stock, 2);
    assert!(outbox.get_event(event_id).await.unwrap().is_some());
}

#[tokio::test]
#[ignore = "requires docker"]
async fn failed_decrement_rolls_back_everything() {
    let (store, outbox) = get_test_stores().await;
    let product = Product::new("Tea", 300, 2);
    store.upsert_product(&product).await.unwrap();

    let order = new_order(&product, 3);
    let change = insert(&order);
    let event_id = change.event.id;
    let result = store.commit(change).await;

    assert!(matches!(result, Err(StoreError::StockDecrementFailed(_))));
    assert!(store.get_order(order.id).await.unwrap().is_none());
    assert!(outbox.get_event(event_id).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires docker"]
async fn duplicate_order_number_rolls_back_stock() {
    let (store, _outbox) = get_test_stores().await;
    let product = Product::new("Tea", 300, 5);
    store.upsert_product(&product).await.unwrap();

    let first = new_order(&product, 1);
    store.commit(insert(&first)).await.unwrap();
    let mut second = new_order(&product, 1);
    second.order_number = first.order_number.clone();

    let result = store.commit(insert(&second)).await;
    assert!(matches!(result, Err(StoreError::DuplicateOrder(_))));
    assert_eq!(store.get_product(product.id).await.unwrap().unwrap().stock, 4);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn concurrent_decrements_never_oversell() {
    let (store, _outbox) = get_test_stores().await;
    let product = Product::new("Tea", 300, 10);
    store.upsert_product(&product).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..20 {
        let store = store.clone();
        let order = new_order(&product, 3);
        handles.push(tokio::spawn(async move { store.commit(insert(&order)).await }));
    }

    let committed = futures_util::future::join_all(handles)
        .await
        .into_iter()
        .filter(|r| matches!(r, Ok(Ok(_))))
        .count() as u32;

    let stock = store.get_product(product.id).await.unwrap().unwrap().stock;
    assert_eq!(committed, 3);
    assert_eq!(stock, 1);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn stale_update_is_a_version_conflict() {
    let (store, _outbox) = get_test_stores().await;
    let product = Product::new("Tea", 300, 5);
    store.upsert_product(&product).await.unwrap();
    let order = store.commit(insert(&new_order(&product, 1))).await.unwrap();

    let mut paid = order.clone();
    paid.pay("txn-1", Utc::now()).unwrap();
    let event = OrderEvent::paid(&paid, "txn-1", Utc::now()).to_outbox().unwrap();
    let saved = store
        .commit(OrderChange {
            stock: None,
            write: OrderWrite::Update {
                order: paid.clone(),
                expected_version: order.version,
            },
            event,
        })
        .await
        .unwrap();
    assert_eq!(saved.version, 2);

    let event = OrderEvent::paid(&paid, "txn-1", Utc::now()).to_outbox().unwrap();
    let result = store
        .commit(OrderChange {
            stock: None,
            write: OrderWrite::Update {
                order: paid,
                expected_version: order.version,
            },
            event,
        })
        .await;
    assert!(matches!(result, Err(StoreError::VersionConflict { .. })));
}
