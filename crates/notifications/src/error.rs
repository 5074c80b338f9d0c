use common::{ErrorKind, MessageId};
use outbox::OutboxError;
use thiserror::Error;

use crate::MessageType;

/// Errors from the notification pipeline.
#[derive(Debug, Error)]
pub enum NotificationError {
    /// No provider template is configured for the message type.
    #[error("Template ID not found for message type: {0}")]
    TemplateNotConfigured(MessageType),

    #[error("Message not found: {0}")]
    MessageNotFound(MessageId),

    /// A record for this (source event, message type) pair already exists.
    #[error("Message for event {source_event_id} and type {message_type} already exists")]
    DuplicateMessage {
        source_event_id: uuid::Uuid,
        message_type: MessageType,
    },

    /// The record was modified concurrently.
    #[error("Message {0} was modified concurrently")]
    VersionConflict(MessageId),

    /// Another retry scan is running.
    #[error("A retry scan is already in progress")]
    RetryInProgress,

    /// The queue consumer has stopped.
    #[error("Notification queue is closed")]
    QueueClosed,

    #[error("Outbox error: {0}")]
    Outbox(#[from] OutboxError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored value could not be interpreted.
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl NotificationError {
    /// Returns the error classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            NotificationError::TemplateNotConfigured(_) => ErrorKind::BadRequest,
            NotificationError::MessageNotFound(_) => ErrorKind::NotFound,
            NotificationError::DuplicateMessage { .. }
            | NotificationError::VersionConflict(_)
            | NotificationError::RetryInProgress => ErrorKind::Conflict,
            NotificationError::QueueClosed | NotificationError::Database(_) => {
                ErrorKind::TransientIo
            }
            NotificationError::Outbox(e) => e.kind(),
            NotificationError::Serialization(_) | NotificationError::InvalidData(_) => {
                ErrorKind::Permanent
            }
        }
    }
}

/// Failure talking to the push provider.
///
/// A response with a non-zero `errcode` from the send endpoint is not an
/// error here; it is reported through [`SendReceipt`](crate::SendReceipt).
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Connection, timeout or body decoding failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider answered with a non-success status.
    #[error("HTTP error: {0}")]
    Status(u16),

    /// The token endpoint refused to issue a token.
    #[error("Failed to obtain access token: {errcode} - {errmsg}")]
    Token { errcode: i64, errmsg: String },
}

impl ProviderError {
    /// Returns the error classification.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::TransientIo
    }
}

/// Result type for notification operations.
pub type Result<T> = std::result::Result<T, NotificationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds() {
        assert_eq!(
            NotificationError::TemplateNotConfigured(MessageType::OrderPaid).kind(),
            ErrorKind::BadRequest
        );
        assert_eq!(NotificationError::RetryInProgress.kind(), ErrorKind::Conflict);
        assert_eq!(NotificationError::QueueClosed.kind(), ErrorKind::TransientIo);
        assert_eq!(ProviderError::Status(502).kind(), ErrorKind::TransientIo);
    }

    #[test]
    fn messages_name_the_message_type() {
        let err = NotificationError::TemplateNotConfigured(MessageType::OrderCreated);
        assert_eq!(
            err.to_string(),
            "Template ID not found for message type: ORDER_CREATED"
        );
    }
}
