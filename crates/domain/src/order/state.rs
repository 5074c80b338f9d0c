//! Order state machine.

use serde::{Deserialize, Serialize};

/// The status of an order in its lifecycle.
///
/// State transitions:
/// ```text
/// PENDING_PAYMENT ──► PENDING_DELIVERY ──► DELIVERING ──► COMPLETED
///        │                   │
///        └───────────────────┴──► CANCELLED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Created, stock reserved, awaiting payment.
    #[default]
    PendingPayment,

    /// Paid, awaiting a courier.
    PendingDelivery,

    /// Out for delivery.
    Delivering,

    /// Delivered (terminal state).
    Completed,

    /// Cancelled before delivery started (terminal state).
    Cancelled,
}

impl OrderStatus {
    /// Every status.
    pub const ALL: [OrderStatus; 5] = [
        OrderStatus::PendingPayment,
        OrderStatus::PendingDelivery,
        OrderStatus::Delivering,
        OrderStatus::Completed,
        OrderStatus::Cancelled,
    ];

    /// Returns true if the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (OrderStatus::PendingPayment, OrderStatus::PendingDelivery)
                | (OrderStatus::PendingPayment, OrderStatus::Cancelled)
                | (OrderStatus::PendingDelivery, OrderStatus::Delivering)
                | (OrderStatus::PendingDelivery, OrderStatus::Cancelled)
                | (OrderStatus::Delivering, OrderStatus::Completed)
        )
    }

    /// Returns true if the order can be cancelled in this status.
    pub fn can_cancel(&self) -> bool {
        self.can_transition_to(OrderStatus::Cancelled)
    }

    /// Returns true if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }

    /// Returns the stored status string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::PendingPayment => "PENDING_PAYMENT",
            OrderStatus::PendingDelivery => "PENDING_DELIVERY",
            OrderStatus::Delivering => "DELIVERING",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Returned when a stored status string is not a known [`OrderStatus`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown order status: {0}")]
pub struct UnknownOrderStatus(pub String);

impl std::str::FromStr for OrderStatus {
    type Err = UnknownOrderStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownOrderStatus(s.to_string()))
    }
}
