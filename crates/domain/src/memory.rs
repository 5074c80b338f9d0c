use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, ProductId};
use outbox::{InMemoryOutboxStore, OutboxError};
use tokio::sync::Mutex;

use crate::{
    order::{Order, OrderStatus, Product},
    store::{OrderChange, OrderStore, OrderWrite, StockAdjustment, StoreError, StoreResult},
};

#[derive(Debug, Default)]
struct Tables {
    orders: HashMap<OrderId, Order>,
    products: HashMap<ProductId, Product>,
}

/// In-memory order store sharing an [`InMemoryOutboxStore`].
///
/// A commit holds both the order tables and the outbox table for its whole
/// duration and checks every precondition before writing, so a failed
/// commit leaves no partial state.
#[derive(Clone)]
pub struct InMemoryOrderStore {
    tables: Arc<Mutex<Tables>>,
    outbox: InMemoryOutboxStore,
}

impl InMemoryOrderStore {
    /// Creates a store that appends events to `outbox`.
    pub fn new(outbox: InMemoryOutboxStore) -> Self {
        Self {
            tables: Arc::new(Mutex::new(Tables::default())),
            outbox,
        }
    }

    /// Returns the outbox this store appends to.
    pub fn outbox(&self) -> &InMemoryOutboxStore {
        &self.outbox
    }

    /// Inserts or replaces a catalog product.
    pub async fn upsert_product(&self, product: Product) {
        self.tables
            .lock()
            .await
            .products
            .insert(product.id, product);
    }

    /// Returns the number of stored orders.
    pub async fn order_count(&self) -> usize {
        self.tables.lock().await.orders.len()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn get_product(&self, product_id: ProductId) -> StoreResult<Option<Product>> {
        Ok(self.tables.lock().await.products.get(&product_id).cloned())
    }

    async fn get_order(&self, order_id: OrderId) -> StoreResult<Option<Order>> {
        Ok(self.tables.lock().await.orders.get(&order_id).cloned())
    }

    async fn get_order_by_number(&self, order_number: &str) -> StoreResult<Option<Order>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .orders
            .values()
            .find(|o| o.order_number == order_number)
            .cloned())
    }

    async fn find_expired_unpaid(
        &self,
        created_before: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<Order>> {
        let tables = self.tables.lock().await;
        let mut orders: Vec<Order> = tables
            .orders
            .values()
            .filter(|o| o.status == OrderStatus::PendingPayment && o.created_at < created_before)
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.created_at);
        orders.truncate(limit);
        Ok(orders)
    }

    async fn commit(&self, change: OrderChange) -> StoreResult<Order> {
        let mut tables = self.tables.lock().await;
        let mut outbox = self.outbox.lock().await;

        // Validate everything first
        let new_stock = match change.stock {
            Some(StockAdjustment::Decrement {
                product_id,
                quantity,
            }) => {
                let product = tables
                    .products
                    .get(&product_id)
                    .ok_or(StoreError::StockDecrementFailed(product_id))?;
                let stock = product
                    .stock
                    .checked_sub(quantity)
                    .ok_or(StoreError::StockDecrementFailed(product_id))?;
                Some((product_id, stock))
            }
            Some(StockAdjustment::Restore {
                product_id,
                quantity,
            }) => {
                let product = tables
                    .products
                    .get(&product_id)
                    .ok_or(StoreError::ProductNotFound(product_id))?;
                Some((product_id, product.stock.saturating_add(quantity)))
            }
            None => None,
        };

        let order = match change.write {
            OrderWrite::Insert(order) => {
                if tables.orders.contains_key(&order.id)
                    || tables
                        .orders
                        .values()
                        .any(|o| o.order_number == order.order_number)
                {
                    return Err(StoreError::DuplicateOrder(order.order_number));
                }
                order
            }
            OrderWrite::Update {
                mut order,
                expected_version,
            } => {
                let stored = tables
                    .orders
                    .get(&order.id)
                    .ok_or(StoreError::OrderNotFound(order.id))?;
                if stored.version != expected_version {
                    return Err(StoreError::VersionConflict {
                        order_id: order.id,
                        expected: expected_version,
                    });
                }
                order.version = expected_version + 1;
                order
            }
        };

        if outbox.contains(change.event.id) {
            return Err(OutboxError::DuplicateEvent(change.event.id).into());
        }

        // Apply
        if let Some((product_id, stock)) = new_stock
            && let Some(product) = tables.products.get_mut(&product_id)
        {
            product.stock = stock;
        }
        outbox.append(change.event)?;
        tables.orders.insert(order.id, order.clone());

        Ok(order)
    }
}
