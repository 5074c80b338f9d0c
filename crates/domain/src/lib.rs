//! Order domain for the order-processing backend.
//!
//! This crate provides:
//! - the order state machine and order model
//! - order events as written to the outbox
//! - the order store, whose commit applies stock, order and event atomically
//! - the order service implementing every order operation

pub mod address;
pub mod error;
pub mod memory;
pub mod order;
pub mod postgres;
pub mod store;

pub use address::{Address, AddressValidator, InMemoryAddressValidator};
pub use error::DomainError;
pub use memory::InMemoryOrderStore;
pub use order::{
    CreateOrder, Order, OrderAssignedData, OrderCancelledData, OrderCreatedData,
    OrderDeliveredData, OrderError, OrderEvent, OrderPaidData, OrderService, OrderStatus,
    PaymentTimeoutData, Product, StartDelivery, StatusOverriddenData, UnknownOrderStatus,
    generate_order_number,
};
pub use postgres::PostgresOrderStore;
pub use store::{
    OrderChange, OrderStore, OrderWrite, StockAdjustment, StoreError, StoreResult,
};

/// Result type for order service operations.
pub type Result<T> = std::result::Result<T, DomainError>;
