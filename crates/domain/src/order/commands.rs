//! Order commands.

use common::{AddressId, DeliveryWorkerId, OrderId, ProductId, UserId};
use serde::Deserialize;

/// Command to place a new order for a single product.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreateOrder {
    /// The user placing the order.
    pub user_id: UserId,

    /// The product being ordered.
    pub product_id: ProductId,

    /// Delivery address; must belong to `user_id`.
    pub address_id: AddressId,

    /// Number of units, greater than 0.
    pub quantity: u32,
}

impl CreateOrder {
    /// Creates a new CreateOrder command.
    pub fn new(user_id: UserId, product_id: ProductId, address_id: AddressId, quantity: u32) -> Self {
        Self {
            user_id,
            product_id,
            address_id,
            quantity,
        }
    }
}

/// Command to hand a paid order to a courier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct StartDelivery {
    pub order_id: OrderId,
    pub delivery_worker_id: DeliveryWorkerId,
}

impl StartDelivery {
    /// Creates a new StartDelivery command.
    pub fn new(order_id: OrderId, delivery_worker_id: DeliveryWorkerId) -> Self {
        Self {
            order_id,
            delivery_worker_id,
        }
    }
}
