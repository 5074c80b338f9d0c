//! HTTP route handlers.

pub mod admin;
pub mod health;
pub mod metrics;
pub mod ops;
pub mod orders;
pub mod telemetry;
