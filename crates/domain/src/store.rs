//! Order persistence with a unit-of-work commit.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{ErrorKind, OrderId, ProductId};
use outbox::{OutboxError, OutboxEvent};
use thiserror::Error;

use crate::order::{Order, Product};

/// Errors raised by order stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The conditional stock decrement matched no row: another order took the stock first.
    #[error("Stock decrement failed for product {0}")]
    StockDecrementFailed(ProductId),

    /// The product to restock does not exist.
    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    /// The order was modified since it was read.
    #[error("Concurrent modification of order {order_id}: expected version {expected}")]
    VersionConflict { order_id: OrderId, expected: i64 },

    /// The order to update does not exist.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// Another order already uses this number or ID.
    #[error("Duplicate order: {0}")]
    DuplicateOrder(String),

    /// The outbox append failed.
    #[error("Outbox error: {0}")]
    Outbox(#[from] OutboxError),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored value could not be decoded.
    #[error("Invalid stored data: {0}")]
    InvalidData(String),
}

impl StoreError {
    /// Returns the error classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::StockDecrementFailed(_)
            | StoreError::VersionConflict { .. }
            | StoreError::DuplicateOrder(_) => ErrorKind::Conflict,
            StoreError::ProductNotFound(_) | StoreError::OrderNotFound(_) => ErrorKind::NotFound,
            StoreError::Outbox(e) => e.kind(),
            StoreError::Database(_) => ErrorKind::TransientIo,
            StoreError::InvalidData(_) => ErrorKind::Permanent,
        }
    }
}

/// Result type for order store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Conditional change to a product's stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockAdjustment {
    /// `stock = stock - quantity WHERE stock >= quantity`.
    Decrement { product_id: ProductId, quantity: u32 },

    /// `stock = stock + quantity`.
    Restore { product_id: ProductId, quantity: u32 },
}

/// How the order row is written.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderWrite {
    /// Insert a new order.
    Insert(Order),

    /// Update in place if the stored version still equals `expected_version`.
    ///
    /// The stored version becomes `expected_version + 1`.
    Update { order: Order, expected_version: i64 },
}

impl OrderWrite {
    /// Returns the order being written.
    pub fn order(&self) -> &Order {
        match self {
            OrderWrite::Insert(order) => order,
            OrderWrite::Update { order, .. } => order,
        }
    }
}

/// One atomic unit: optional stock change, one order write, one outbox event.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderChange {
    pub stock: Option<StockAdjustment>,
    pub write: OrderWrite,
    pub event: OutboxEvent,
}

/// Storage for orders and the product stock they reserve.
///
/// [`OrderStore::commit`] applies every part of an [`OrderChange`] or none
/// of them.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Loads a product.
    async fn get_product(&self, product_id: ProductId) -> StoreResult<Option<Product>>;

    /// Loads an order by ID.
    async fn get_order(&self, order_id: OrderId) -> StoreResult<Option<Order>>;

    /// Loads an order by its order number.
    async fn get_order_by_number(&self, order_number: &str) -> StoreResult<Option<Order>>;

    /// Lists PENDING_PAYMENT orders created before `created_before`, oldest first.
    async fn find_expired_unpaid(
        &self,
        created_before: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<Order>>;

    /// Atomically applies a change and returns the order as persisted.
    async fn commit(&self, change: OrderChange) -> StoreResult<Order>;
}

#[async_trait]
impl<T: OrderStore + ?Sized> OrderStore for Arc<T> {
    async fn get_product(&self, product_id: ProductId) -> StoreResult<Option<Product>> {
        (**self).get_product(product_id).await
    }

    async fn get_order(&self, order_id: OrderId) -> StoreResult<Option<Order>> {
        (**self).get_order(order_id).await
    }

    async fn get_order_by_number(&self, order_number: &str) -> StoreResult<Option<Order>> {
        (**self).get_order_by_number(order_number).await
    }

    async fn find_expired_unpaid(
        &self,
        created_before: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<Order>> {
        (**self).find_expired_unpaid(created_before, limit).await
    }

    async fn commit(&self, change: OrderChange) -> StoreResult<Order> {
        (**self).commit(change).await
    }
}
