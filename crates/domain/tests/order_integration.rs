//! Order service integration tests against the in-memory stores.

use std::sync::Arc;

use common::{ErrorKind, UserId};
use domain::{
    Address, CreateOrder, DomainError, InMemoryAddressValidator, InMemoryOrderStore, OrderService,
    OrderStatus, OrderStore, Product, StoreError,
};
use outbox::{EventQuery, EventType, InMemoryOutboxStore, OutboxStore};

type Service = OrderService<InMemoryOrderStore, InMemoryAddressValidator>;

struct Shop {
    service: Arc<Service>,
    store: InMemoryOrderStore,
    outbox: InMemoryOutboxStore,
    product: Product,
    user_id: UserId,
    address: Address,
}

async fn shop(stock: u32) -> Shop {
    let outbox = InMemoryOutboxStore::new();
    let store = InMemoryOrderStore::new(outbox.clone());
    let addresses = InMemoryAddressValidator::new();

    let product = Product::new("Tea", 300, stock);
    store.upsert_product(product.clone()).await;
    let user_id = UserId::new();
    let address = Address::new(user_id, "Zhejiang", "Hangzhou", "Xihu", "8 Tea Rd");
    addresses.add_address(address.clone()).await;

    Shop {
        service: Arc::new(OrderService::new(store.clone(), addresses)),
        store,
        outbox,
        product,
        user_id,
        address,
    }
}

#[tokio::test]
async fn concurrent_orders_never_oversell() {
    let shop = shop(10).await;

    let mut handles = Vec::new();
    for _ in 0..25 {
        let service = shop.service.clone();
        let cmd = CreateOrder::new(shop.user_id, shop.product.id, shop.address.id, 3);
        handles.push(tokio::spawn(async move { service.create_order(cmd).await }));
    }

    let mut reserved = 0;
    for result in futures_util::future::join_all(handles).await {
        match result.unwrap() {
            Ok(order) => reserved += order.quantity,
            Err(err) => assert!(matches!(
                err.kind(),
                ErrorKind::BadRequest | ErrorKind::Conflict
            )),
        }
    }

    let stock = shop
        .store
        .get_product(shop.product.id)
        .await
        .unwrap()
        .unwrap()
        .stock;
    assert!(reserved <= 10);
    assert_eq!(reserved + stock, 10);

    // One ORDER_CREATED event per committed order
    let created = shop
        .outbox
        .query_events(EventQuery::new().event_type(EventType::OrderCreated))
        .await
        .unwrap();
    assert_eq!(created.len(), shop.store.order_count().await);
    assert_eq!(created.len() as u32 * 3, reserved);
}

#[tokio::test]
async fn every_event_matches_a_committed_order() {
    let shop = shop(5).await;

    let order = shop
        .service
        .create_order(CreateOrder::new(
            shop.user_id,
            shop.product.id,
            shop.address.id,
            3,
        ))
        .await
        .unwrap();
    let rejected = shop
        .service
        .create_order(CreateOrder::new(
            shop.user_id,
            shop.product.id,
            shop.address.id,
            3,
        ))
        .await;
    assert!(rejected.is_err());

    let events = shop.outbox.all_events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].aggregate_id, order.id.to_string());
    assert_eq!(events[0].payload["order_number"], order.order_number);
}

#[tokio::test]
async fn racing_payment_and_timeout_commit_exactly_one() {
    let shop = shop(5).await;
    let order = shop
        .service
        .create_order(CreateOrder::new(
            shop.user_id,
            shop.product.id,
            shop.address.id,
            1,
        ))
        .await
        .unwrap();

    let pay = {
        let service = shop.service.clone();
        tokio::spawn(async move { service.handle_payment_success(order.id, "txn-1").await })
    };
    let timeout = {
        let service = shop.service.clone();
        tokio::spawn(async move { service.handle_payment_timeout(order.id).await })
    };
    let pay = pay.await.unwrap();
    let timeout = timeout.await.unwrap();

    let stored = shop.service.get_order(order.id).await.unwrap();
    let events = shop.outbox.event_count().await;
    match stored.status {
        OrderStatus::PendingDelivery => {
            assert!(pay.is_ok());
            // The timeout either saw the paid order (no-op) or lost the version race
            if let Err(err) = timeout {
                assert!(matches!(
                    err,
                    DomainError::Store(StoreError::VersionConflict { .. })
                ));
            }
        }
        OrderStatus::Cancelled => {
            assert!(timeout.is_ok());
            assert!(pay.is_err());
        }
        other => panic!("unexpected status {other}"),
    }
    assert_eq!(events, 2);
}
