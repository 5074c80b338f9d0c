//! Transactional outbox event store.
//!
//! Events are appended inside the caller's transaction so they commit
//! atomically with the state change they describe, then claimed one at a
//! time by dispatcher workers under a lease.

pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod store;

pub use error::{OutboxError, Result};
pub use event::{EventId, EventStatus, EventType, OutboxEvent, UnknownEventType};
pub use memory::{InMemoryOutboxStore, OutboxTable};
pub use postgres::PostgresOutboxStore;
pub use query::{EventCount, EventQuery, EventStats, StatsQuery};
pub use store::{FailureDisposition, OutboxStore, ReapSummary};
