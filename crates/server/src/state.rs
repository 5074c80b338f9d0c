//! Wiring of stores, services and background tasks.

use std::sync::Arc;

use dispatcher::{Dispatcher, HandlerRegistry, Janitor, LeaseReaper};
use domain::{
    AddressValidator, InMemoryAddressValidator, InMemoryOrderStore, OrderService, OrderStore,
    PostgresOrderStore, Product, StoreResult,
};
use notifications::{
    HttpPushProvider, InMemoryMessageStore, InMemoryRecipientDirectory, MessageStore,
    NotificationQueue, NotificationService, OrderNotificationHandler, PostgresMessageStore,
    ProviderError, PushProvider, QueueConsumer, RecipientDirectory,
};
use outbox::{InMemoryOutboxStore, OutboxStore, PostgresOutboxStore};
use sqlx::PgPool;
use tokio::{sync::watch, task::JoinHandle};

use crate::{OrderApi, config::Config, sweeper::PaymentTimeoutSweeper};

/// Where orders, events and message records live.
#[derive(Clone)]
pub enum Storage {
    InMemory,
    Postgres(PgPool),
}

impl Storage {
    pub fn name(&self) -> &'static str {
        match self {
            Storage::InMemory => "memory",
            Storage::Postgres(_) => "postgres",
        }
    }
}

/// Product table writes, which sit outside the order store trait.
#[derive(Clone)]
pub enum Catalog {
    InMemory(InMemoryOrderStore),
    Postgres(PostgresOrderStore),
}

impl Catalog {
    pub async fn upsert_product(&self, product: &Product) -> StoreResult<()> {
        match self {
            Catalog::InMemory(store) => {
                store.upsert_product(product.clone()).await;
                Ok(())
            }
            Catalog::Postgres(store) => store.upsert_product(product).await,
        }
    }
}

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub storage: &'static str,
    pub orders: Arc<OrderApi>,
    pub catalog: Catalog,
    pub addresses: InMemoryAddressValidator,
    pub recipients: InMemoryRecipientDirectory,
    pub outbox: Arc<dyn OutboxStore>,
    pub notifications: Arc<NotificationService>,
    pub queue: NotificationQueue,
    pub stats_window: chrono::Duration,
}

/// Background tasks that run beside the HTTP server.
pub struct Background {
    dispatcher: Arc<Dispatcher>,
    reaper: LeaseReaper,
    janitor: Janitor,
    consumer: QueueConsumer,
    sweeper: PaymentTimeoutSweeper,
    notifications: Arc<NotificationService>,
}

impl Background {
    /// Spawns every loop. They all exit once `shutdown` fires.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let mut handles = self.dispatcher.spawn_workers(shutdown.clone());
        handles.push(self.reaper.spawn(shutdown.clone()));
        handles.push(self.janitor.spawn(shutdown.clone()));
        handles.push(self.consumer.spawn(shutdown.clone()));
        handles.push(self.notifications.spawn_retry_loop(shutdown.clone()));
        handles.push(self.sweeper.spawn(shutdown));
        handles
    }
}

/// Builds state and background tasks with the HTTP push provider.
pub fn build(config: &Config, storage: Storage) -> Result<(Arc<AppState>, Background), ProviderError> {
    let provider = HttpPushProvider::new(config.push.clone())?;
    Ok(build_with_provider(config, storage, Arc::new(provider)))
}

/// Builds state and background tasks around the given push provider.
pub fn build_with_provider(
    config: &Config,
    storage: Storage,
    provider: Arc<dyn PushProvider>,
) -> (Arc<AppState>, Background) {
    let (outbox, order_store, catalog, messages) = match &storage {
        Storage::InMemory => {
            let outbox = InMemoryOutboxStore::new();
            let orders = InMemoryOrderStore::new(outbox.clone());
            let outbox: Arc<dyn OutboxStore> = Arc::new(outbox);
            let order_store: Arc<dyn OrderStore> = Arc::new(orders.clone());
            let messages: Arc<dyn MessageStore> = Arc::new(InMemoryMessageStore::new());
            (outbox, order_store, Catalog::InMemory(orders), messages)
        }
        Storage::Postgres(pool) => {
            let orders = PostgresOrderStore::new(pool.clone());
            let outbox: Arc<dyn OutboxStore> = Arc::new(PostgresOutboxStore::new(pool.clone()));
            let order_store: Arc<dyn OrderStore> = Arc::new(orders.clone());
            let messages: Arc<dyn MessageStore> = Arc::new(PostgresMessageStore::new(pool.clone()));
            (outbox, order_store, Catalog::Postgres(orders), messages)
        }
    };

    let addresses = InMemoryAddressValidator::new();
    let recipients = InMemoryRecipientDirectory::new();
    let address_validator: Arc<dyn AddressValidator> = Arc::new(addresses.clone());
    let orders = Arc::new(OrderService::new(order_store, address_validator));

    let notifications = Arc::new(NotificationService::new(
        messages,
        provider,
        config.notifications.clone(),
    ));
    let (queue, consumer) =
        NotificationQueue::new(&config.notifications, notifications.clone(), outbox.clone());

    let directory: Arc<dyn RecipientDirectory> = Arc::new(recipients.clone());
    let handler = Arc::new(OrderNotificationHandler::new(notifications.clone(), directory));
    let registry = HandlerRegistry::new().with(OrderNotificationHandler::EVENT_TYPES, handler);
    let dispatcher = Arc::new(Dispatcher::new(
        outbox.clone(),
        registry,
        config.dispatcher.clone(),
    ));

    let background = Background {
        dispatcher,
        reaper: LeaseReaper::new(outbox.clone(), config.dispatcher.clone()),
        janitor: Janitor::new(outbox.clone(), config.janitor.clone()),
        consumer,
        sweeper: PaymentTimeoutSweeper::new(
            orders.clone(),
            config.payment_timeout,
            config.payment_sweep_interval,
        ),
        notifications: notifications.clone(),
    };

    let state = Arc::new(AppState {
        storage: storage.name(),
        orders,
        catalog,
        addresses,
        recipients,
        outbox,
        notifications,
        queue,
        stats_window: chrono::Duration::from_std(config.janitor.stats_window)
            .unwrap_or(chrono::Duration::hours(24)),
    });

    (state, background)
}
