use common::ErrorKind;
use thiserror::Error;

use crate::EventId;

/// Errors that can occur when interacting with the outbox.
#[derive(Debug, Error)]
pub enum OutboxError {
    /// The event does not exist.
    #[error("Outbox event not found: {0}")]
    EventNotFound(EventId),

    /// The caller no longer holds the lease on the event: it was reaped,
    /// reclaimed by another worker, or already finished.
    #[error("Lease lost for outbox event {0}")]
    LeaseLost(EventId),

    /// An event with the same ID already exists.
    #[error("Duplicate outbox event: {0}")]
    DuplicateEvent(EventId),

    /// A stored status string is not a known status.
    #[error("Invalid event status: {0}")]
    InvalidStatus(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl OutboxError {
    /// Returns the error classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            OutboxError::EventNotFound(_) => ErrorKind::NotFound,
            OutboxError::LeaseLost(_) | OutboxError::DuplicateEvent(_) => ErrorKind::Conflict,
            OutboxError::InvalidStatus(_) | OutboxError::Serialization(_) => ErrorKind::Permanent,
            OutboxError::Database(_) | OutboxError::Migration(_) => ErrorKind::TransientIo,
        }
    }
}

/// Result type for outbox operations.
pub type Result<T> = std::result::Result<T, OutboxError>;
