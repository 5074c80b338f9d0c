//! Order domain events.
//!
//! Each event is written to the outbox with its [`EventType`] tag; the
//! payload is the matching data struct serialized as snake_case JSON.

use chrono::{DateTime, Utc};
use common::{AddressId, DeliveryWorkerId, OrderId, ProductId, UserId};
use outbox::{EventType, OutboxEvent};
use serde::{Deserialize, Serialize};

use super::{Order, OrderStatus};

/// Events produced by order mutations.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderEvent {
    /// Order was placed and stock reserved.
    Created(OrderCreatedData),

    /// Payment succeeded.
    Paid(OrderPaidData),

    /// Order was cancelled by the user.
    Cancelled(OrderCancelledData),

    /// Payment window elapsed and the order was cancelled.
    PaymentTimedOut(PaymentTimeoutData),

    /// A courier picked the order up.
    Assigned(OrderAssignedData),

    /// The order was delivered.
    Delivered(OrderDeliveredData),

    /// An administrator overrode the status.
    StatusOverridden(StatusOverriddenData),
}

/// Data for ORDER_CREATED.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCreatedData {
    pub order_id: OrderId,
    pub order_number: String,
    pub user_id: UserId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub amount_cents: i64,
    pub address_id: AddressId,
}

/// Data for ORDER_PAID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPaidData {
    pub order_id: OrderId,
    pub order_number: String,
    pub user_id: UserId,
    pub amount_cents: i64,
    pub payment_transaction_id: String,
    pub paid_at: DateTime<Utc>,
}

/// Data for ORDER_CANCELLED.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCancelledData {
    pub order_id: OrderId,
    pub order_number: String,
    pub user_id: UserId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub amount_cents: i64,

    /// True when payment had completed and the amount must be refunded.
    pub should_refund: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_transaction_id: Option<String>,
}

/// Data for PAYMENT_TIMEOUT.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentTimeoutData {
    pub order_id: OrderId,
    pub order_number: String,
    pub user_id: UserId,
    pub amount_cents: i64,
}

/// Data for ORDER_ASSIGNED.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAssignedData {
    pub order_id: OrderId,
    pub order_number: String,
    pub user_id: UserId,
    pub delivery_worker_id: DeliveryWorkerId,
}

/// Data for ORDER_DELIVERED.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDeliveredData {
    pub order_id: OrderId,
    pub order_number: String,
    pub user_id: UserId,
    pub completed_at: DateTime<Utc>,
}

/// Data for ORDER_STATUS_OVERRIDDEN.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusOverriddenData {
    pub order_id: OrderId,
    pub order_number: String,
    pub user_id: UserId,
    pub from: OrderStatus,
    pub to: OrderStatus,
}

impl OrderEvent {
    /// Returns the outbox tag for this event.
    pub fn event_type(&self) -> EventType {
        match self {
            OrderEvent::Created(_) => EventType::OrderCreated,
            OrderEvent::Paid(_) => EventType::OrderPaid,
            OrderEvent::Cancelled(_) => EventType::OrderCancelled,
            OrderEvent::PaymentTimedOut(_) => EventType::PaymentTimeout,
            OrderEvent::Assigned(_) => EventType::OrderAssigned,
            OrderEvent::Delivered(_) => EventType::OrderDelivered,
            OrderEvent::StatusOverridden(_) => EventType::OrderStatusOverridden,
        }
    }

    /// Returns the order this event concerns.
    pub fn order_id(&self) -> OrderId {
        match self {
            OrderEvent::Created(d) => d.order_id,
            OrderEvent::Paid(d) => d.order_id,
            OrderEvent::Cancelled(d) => d.order_id,
            OrderEvent::PaymentTimedOut(d) => d.order_id,
            OrderEvent::Assigned(d) => d.order_id,
            OrderEvent::Delivered(d) => d.order_id,
            OrderEvent::StatusOverridden(d) => d.order_id,
        }
    }

    /// Returns the user who owns the order.
    pub fn user_id(&self) -> UserId {
        match self {
            OrderEvent::Created(d) => d.user_id,
            OrderEvent::Paid(d) => d.user_id,
            OrderEvent::Cancelled(d) => d.user_id,
            OrderEvent::PaymentTimedOut(d) => d.user_id,
            OrderEvent::Assigned(d) => d.user_id,
            OrderEvent::Delivered(d) => d.user_id,
            OrderEvent::StatusOverridden(d) => d.user_id,
        }
    }

    /// Returns the human-facing order number.
    pub fn order_number(&self) -> &str {
        match self {
            OrderEvent::Created(d) => &d.order_number,
            OrderEvent::Paid(d) => &d.order_number,
            OrderEvent::Cancelled(d) => &d.order_number,
            OrderEvent::PaymentTimedOut(d) => &d.order_number,
            OrderEvent::Assigned(d) => &d.order_number,
            OrderEvent::Delivered(d) => &d.order_number,
            OrderEvent::StatusOverridden(d) => &d.order_number,
        }
    }

    /// Builds the pending outbox row for this event.
    pub fn to_outbox(&self) -> Result<OutboxEvent, serde_json::Error> {
        let event_type = self.event_type();
        let order_id = self.order_id();
        match self {
            OrderEvent::Created(d) => OutboxEvent::new(event_type, order_id, d),
            OrderEvent::Paid(d) => OutboxEvent::new(event_type, order_id, d),
            OrderEvent::Cancelled(d) => OutboxEvent::new(event_type, order_id, d),
            OrderEvent::PaymentTimedOut(d) => OutboxEvent::new(event_type, order_id, d),
            OrderEvent::Assigned(d) => OutboxEvent::new(event_type, order_id, d),
            OrderEvent::Delivered(d) => OutboxEvent::new(event_type, order_id, d),
            OrderEvent::StatusOverridden(d) => OutboxEvent::new(event_type, order_id, d),
        }
    }

    /// Decodes an outbox payload. Returns `None` for tags that are not order events.
    pub fn decode(
        event_type: EventType,
        payload: &serde_json::Value,
    ) -> Result<Option<Self>, serde_json::Error> {
        let payload = payload.clone();
        let event = match event_type {
            EventType::OrderCreated => OrderEvent::Created(serde_json::from_value(payload)?),
            EventType::OrderPaid => OrderEvent::Paid(serde_json::from_value(payload)?),
            EventType::OrderCancelled => OrderEvent::Cancelled(serde_json::from_value(payload)?),
            EventType::PaymentTimeout => {
                OrderEvent::PaymentTimedOut(serde_json::from_value(payload)?)
            }
            EventType::OrderAssigned => OrderEvent::Assigned(serde_json::from_value(payload)?),
            EventType::OrderDelivered => OrderEvent::Delivered(serde_json::from_value(payload)?),
            EventType::OrderStatusOverridden => {
                OrderEvent::StatusOverridden(serde_json::from_value(payload)?)
            }
            EventType::UserAction => return Ok(None),
        };
        Ok(Some(event))
    }
}

// Constructors from the order state after the mutation
impl OrderEvent {
    /// Creates an ORDER_CREATED event.
    pub fn created(order: &Order) -> Self {
        OrderEvent::Created(OrderCreatedData {
            order_id: order.id,
            order_number: order.order_number.clone(),
            user_id: order.user_id,
            product_id: order.product_id,
            quantity: order.quantity,
            amount_cents: order.amount_cents,
            address_id: order.address_id,
        })
    }

    /// Creates an ORDER_PAID event.
    pub fn paid(order: &Order, payment_transaction_id: &str, paid_at: DateTime<Utc>) -> Self {
        OrderEvent::Paid(OrderPaidData {
            order_id: order.id,
            order_number: order.order_number.clone(),
            user_id: order.user_id,
            amount_cents: order.amount_cents,
            payment_transaction_id: payment_transaction_id.to_string(),
            paid_at,
        })
    }

    /// Creates an ORDER_CANCELLED event.
    pub fn cancelled(order: &Order, should_refund: bool) -> Self {
        OrderEvent::Cancelled(OrderCancelledData {
            order_id: order.id,
            order_number: order.order_number.clone(),
            user_id: order.user_id,
            product_id: order.product_id,
            quantity: order.quantity,
            amount_cents: order.amount_cents,
            should_refund,
            payment_transaction_id: order.payment_transaction_id.clone(),
        })
    }

    /// Creates a PAYMENT_TIMEOUT event.
    pub fn payment_timed_out(order: &Order) -> Self {
        OrderEvent::PaymentTimedOut(PaymentTimeoutData {
            order_id: order.id,
            order_number: order.order_number.clone(),
            user_id: order.user_id,
            amount_cents: order.amount_cents,
        })
    }

    /// Creates an ORDER_ASSIGNED event.
    pub fn assigned(order: &Order, delivery_worker_id: DeliveryWorkerId) -> Self {
        OrderEvent::Assigned(OrderAssignedData {
            order_id: order.id,
            order_number: order.order_number.clone(),
            user_id: order.user_id,
            delivery_worker_id,
        })
    }

    /// Creates an ORDER_DELIVERED event.
    pub fn delivered(order: &Order, completed_at: DateTime<Utc>) -> Self {
        OrderEvent::Delivered(OrderDeliveredData {
            order_id: order.id,
            order_number: order.order_number.clone(),
            user_id: order.user_id,
            completed_at,
        })
    }

    /// Creates an ORDER_STATUS_OVERRIDDEN event.
    pub fn status_overridden(order: &Order, from: OrderStatus) -> Self {
        OrderEvent::StatusOverridden(StatusOverriddenData {
            order_id: order.id,
            order_number: order.order_number.clone(),
            user_id: order.user_id,
            from,
            to: order.status,
        })
    }
}
