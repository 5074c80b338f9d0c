//! Order events flowing through the dispatcher into notifications.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use common::UserId;
use dispatcher::{Dispatcher, DispatcherConfig, EventHandler, HandlerRegistry};
use domain::{
    Address, CreateOrder, InMemoryAddressValidator, InMemoryOrderStore, OrderService, Product,
};
use notifications::{
    InMemoryMessageStore, InMemoryRecipientDirectory, MessageStatus, MessageType,
    NotificationConfig, NotificationService, OrderNotificationHandler, ProviderError,
    PushProvider, SendReceipt, TemplateMessage,
};
use outbox::{EventQuery, EventStatus, InMemoryOutboxStore, OutboxStore};

#[derive(Default)]
struct RecordingProvider {
    calls: AtomicUsize,
    sent: Mutex<Vec<TemplateMessage>>,
}

#[async_trait]
impl PushProvider for RecordingProvider {
    async fn send(&self, message: &TemplateMessage) -> Result<SendReceipt, ProviderError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.sent.lock().unwrap().push(message.clone());
        Ok(SendReceipt {
            errcode: 0,
            errmsg: "ok".into(),
            msgid: Some(format!("m{n}")),
        })
    }
}

struct World {
    orders: OrderService<InMemoryOrderStore, InMemoryAddressValidator>,
    outbox: InMemoryOutboxStore,
    messages: InMemoryMessageStore,
    directory: InMemoryRecipientDirectory,
    provider: Arc<RecordingProvider>,
    handler: Arc<OrderNotificationHandler>,
    user_id: UserId,
    product: Product,
    address: Address,
}

async fn world() -> World {
    let outbox = InMemoryOutboxStore::new();
    let store = InMemoryOrderStore::new(outbox.clone());
    let addresses = InMemoryAddressValidator::new();
    let product = Product::new("Spring water 18L", 1500, 10);
    store.upsert_product(product.clone()).await;
    let user_id = UserId::new();
    let address = Address::new(user_id, "Zhejiang", "Hangzhou", "Xihu", "8 Lake Rd");
    addresses.add_address(address.clone()).await;

    let messages = InMemoryMessageStore::new();
    let provider = Arc::new(RecordingProvider::default());
    let mut config = NotificationConfig::default();
    for message_type in MessageType::ALL {
        config = config.with_template(message_type, format!("tmpl-{message_type}"));
    }
    let service = Arc::new(NotificationService::new(
        Arc::new(messages.clone()),
        provider.clone(),
        config,
    ));
    let directory = InMemoryRecipientDirectory::new();
    directory.set_recipient(user_id, "open-id-1").await;
    let handler = Arc::new(OrderNotificationHandler::new(
        service,
        Arc::new(directory.clone()),
    ));

    World {
        orders: OrderService::new(store, addresses),
        outbox,
        messages,
        directory,
        provider,
        handler,
        user_id,
        product,
        address,
    }
}

impl World {
    async fn place_order(&self) -> domain::Order {
        self.orders
            .create_order(CreateOrder::new(
                self.user_id,
                self.product.id,
                self.address.id,
                2,
            ))
            .await
            .unwrap()
    }

    fn dispatcher(&self) -> Dispatcher {
        let registry = HandlerRegistry::new()
            .with(OrderNotificationHandler::EVENT_TYPES, self.handler.clone());
        Dispatcher::new(
            Arc::new(self.outbox.clone()),
            registry,
            DispatcherConfig::default(),
        )
    }
}

#[tokio::test]
async fn created_and_paid_orders_notify_the_user() {
    let w = world().await;
    let order = w.place_order().await;
    w.orders
        .handle_payment_success(order.id, "txn-1")
        .await
        .unwrap();

    assert_eq!(w.dispatcher().drain().await.unwrap(), 2);

    let records = w.messages.all().await;
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.status == MessageStatus::Sent));
    let mut types: Vec<_> = records.iter().map(|r| r.message_type).collect();
    types.sort();
    assert_eq!(types, vec![MessageType::OrderCreated, MessageType::OrderPaid]);

    let sent = w.provider.sent.lock().unwrap().clone();
    assert!(
        sent.iter()
            .all(|m| m.data["order_number"].value == order.order_number)
    );
    assert_eq!(sent[0].data["amount"].value, "30.00");

    let completed = w
        .outbox
        .query_events(EventQuery::with_status(EventStatus::Completed))
        .await
        .unwrap();
    assert_eq!(completed.len(), 2);
}

#[tokio::test]
async fn redelivered_event_sends_one_notification() {
    let w = world().await;
    w.place_order().await;
    let event = w.outbox.all_events().await.remove(0);

    w.handler.handle(&event).await.unwrap();
    w.handler.handle(&event).await.unwrap();

    assert_eq!(w.messages.len().await, 1);
    assert_eq!(w.provider.calls.load(Ordering::SeqCst), 1);
    let record = w
        .messages
        .all()
        .await
        .remove(0);
    assert_eq!(record.source_event_id, Some(event.id.as_uuid()));
}

#[tokio::test]
async fn opted_out_user_is_skipped() {
    let w = world().await;
    w.directory
        .disable(w.user_id, MessageType::OrderCreated)
        .await;
    w.place_order().await;

    assert_eq!(w.dispatcher().drain().await.unwrap(), 1);
    assert!(w.messages.is_empty().await);
    assert_eq!(w.provider.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cancelled_paid_order_mentions_refund() {
    let w = world().await;
    let order = w.place_order().await;
    w.orders
        .handle_payment_success(order.id, "txn-1")
        .await
        .unwrap();
    w.orders.cancel_order(order.id).await.unwrap();

    w.dispatcher().drain().await.unwrap();

    let sent = w.provider.sent.lock().unwrap().clone();
    let cancelled = sent
        .iter()
        .find(|m| m.template_id == "tmpl-ORDER_CANCELLED")
        .unwrap();
    assert_eq!(cancelled.data["note"].value, "Refund in progress");
}
