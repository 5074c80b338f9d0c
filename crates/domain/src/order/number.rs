use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Generates an order number: `ORD`, the creation time in epoch
/// milliseconds, then a four-digit random suffix.
///
/// Uniqueness is enforced by the store; a collision surfaces as a conflict
/// the caller may retry.
pub fn generate_order_number(now: DateTime<Utc>) -> String {
    let suffix = 1000 + (Uuid::new_v4().as_u128() % 9000) as u32;
    format!("ORD{}{}", now.timestamp_millis(), suffix)
}
