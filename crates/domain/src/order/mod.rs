//! Order model, state machine, events and service.

mod commands;
mod events;
mod model;
mod number;
mod service;
mod state;

pub use commands::{CreateOrder, StartDelivery};
pub use events::{
    OrderAssignedData, OrderCancelledData, OrderCreatedData, OrderDeliveredData, OrderEvent,
    OrderPaidData, PaymentTimeoutData, StatusOverriddenData,
};
pub use model::{Order, Product};
pub use number::generate_order_number;
pub use service::OrderService;
pub use state::{OrderStatus, UnknownOrderStatus};

use common::{AddressId, ErrorKind, OrderId, ProductId, UserId};
use thiserror::Error;

/// Validation and lookup failures of order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    /// The order does not exist.
    #[error("Order not found: {0}")]
    NotFound(OrderId),

    /// No order has this order number.
    #[error("Order not found: {0}")]
    NumberNotFound(String),

    /// The product does not exist.
    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    /// The delivery address does not exist.
    #[error("Address not found: {0}")]
    AddressNotFound(AddressId),

    /// Invalid quantity.
    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: u32 },

    /// Not enough stock to reserve the requested quantity.
    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    /// The address belongs to another user.
    #[error("Address {address_id} does not belong to user {user_id}")]
    AddressNotOwned {
        address_id: AddressId,
        user_id: UserId,
    },

    /// The address is outside the delivery area.
    #[error("Address {0} is outside the delivery area")]
    AddressNotServiceable(AddressId),

    /// Price times quantity does not fit in an i64.
    #[error("Order amount overflows: {quantity} x {price_cents} cents")]
    AmountOverflow { price_cents: i64, quantity: u32 },

    /// Order is not in a status that allows the operation.
    #[error("Invalid state transition: cannot {action} from {current} status")]
    InvalidStateTransition {
        current: OrderStatus,
        action: &'static str,
    },
}

impl OrderError {
    /// Returns the error classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrderError::NotFound(_)
            | OrderError::NumberNotFound(_)
            | OrderError::ProductNotFound(_)
            | OrderError::AddressNotFound(_) => ErrorKind::NotFound,
            OrderError::InvalidQuantity { .. }
            | OrderError::InsufficientStock { .. }
            | OrderError::AddressNotOwned { .. }
            | OrderError::AddressNotServiceable(_)
            | OrderError::AmountOverflow { .. }
            | OrderError::InvalidStateTransition { .. } => ErrorKind::BadRequest,
        }
    }
}
