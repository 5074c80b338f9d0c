//! Order and product records.

use chrono::{DateTime, Utc};
use common::{AddressId, DeliveryWorkerId, OrderId, ProductId, UserId};
use serde::{Deserialize, Serialize};

use super::{OrderError, OrderStatus};

/// An order row.
///
/// `amount_cents` is fixed at creation and never recomputed. `status` only
/// changes through the transition methods below, except for the
/// administrative [`Order::override_status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub order_number: String,
    pub user_id: UserId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub amount_cents: i64,
    pub address_id: AddressId,
    pub status: OrderStatus,
    pub payment_transaction_id: Option<String>,
    pub payment_time: Option<DateTime<Utc>>,
    pub delivery_worker_id: Option<DeliveryWorkerId>,
    pub completed_at: Option<DateTime<Utc>>,

    /// Optimistic concurrency column; 1 for a freshly placed order.
    pub version: i64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Creates a new order awaiting payment.
    pub fn place(
        order_number: String,
        user_id: UserId,
        product_id: ProductId,
        address_id: AddressId,
        quantity: u32,
        amount_cents: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: OrderId::new(),
            order_number,
            user_id,
            product_id,
            quantity,
            amount_cents,
            address_id,
            status: OrderStatus::PendingPayment,
            payment_transaction_id: None,
            payment_time: None,
            delivery_worker_id: None,
            completed_at: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns true once a payment has been recorded.
    pub fn is_paid(&self) -> bool {
        self.payment_transaction_id.is_some()
    }

    fn transition(
        &mut self,
        next: OrderStatus,
        action: &'static str,
        at: DateTime<Utc>,
    ) -> Result<(), OrderError> {
        if !self.status.can_transition_to(next) {
            return Err(OrderError::InvalidStateTransition {
                current: self.status,
                action,
            });
        }
        self.status = next;
        self.updated_at = at;
        Ok(())
    }

    /// Records a successful payment.
    pub fn pay(&mut self, transaction_id: &str, at: DateTime<Utc>) -> Result<(), OrderError> {
        self.transition(OrderStatus::PendingDelivery, "pay", at)?;
        self.payment_transaction_id = Some(transaction_id.to_string());
        self.payment_time = Some(at);
        Ok(())
    }

    /// Cancels the order. Returns true if the payment must be refunded.
    pub fn cancel(&mut self, at: DateTime<Utc>) -> Result<bool, OrderError> {
        let should_refund = self.status == OrderStatus::PendingDelivery && self.is_paid();
        self.transition(OrderStatus::Cancelled, "cancel", at)?;
        Ok(should_refund)
    }

    /// Hands the order to a courier.
    pub fn start_delivery(
        &mut self,
        worker: DeliveryWorkerId,
        at: DateTime<Utc>,
    ) -> Result<(), OrderError> {
        self.transition(OrderStatus::Delivering, "start delivery", at)?;
        self.delivery_worker_id = Some(worker);
        Ok(())
    }

    /// Marks the order delivered.
    pub fn complete_delivery(&mut self, at: DateTime<Utc>) -> Result<(), OrderError> {
        self.transition(OrderStatus::Completed, "complete delivery", at)?;
        self.completed_at = Some(at);
        Ok(())
    }

    /// Sets the status without consulting the state machine. Returns the previous status.
    pub fn override_status(&mut self, status: OrderStatus, at: DateTime<Utc>) -> OrderStatus {
        let previous = self.status;
        self.status = status;
        self.updated_at = at;
        if status == OrderStatus::Completed && self.completed_at.is_none() {
            self.completed_at = Some(at);
        }
        previous
    }
}

/// A catalog product as seen by the order flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price_cents: i64,
    pub stock: u32,
}

impl Product {
    /// Creates a product with a fresh ID.
    pub fn new(name: impl Into<String>, price_cents: i64, stock: u32) -> Self {
        Self {
            id: ProductId::new(),
            name: name.into(),
            price_cents,
            stock,
        }
    }

    /// Computes the order amount for `quantity` units.
    pub fn amount_for(&self, quantity: u32) -> Result<i64, OrderError> {
        self.price_cents
            .checked_mul(i64::from(quantity))
            .ok_or(OrderError::AmountOverflow {
                price_cents: self.price_cents,
                quantity,
            })
    }
}
