//! Shared types for the order-processing backend.

pub mod error;
pub mod types;

pub use error::ErrorKind;
pub use types::{AddressId, DeliveryWorkerId, MessageId, OrderId, ProductId, UserId};
