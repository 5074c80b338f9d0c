use common::ErrorKind;
use outbox::{EventId, OutboxError};
use thiserror::Error;

/// Errors that stop a dispatcher, reaper or janitor pass.
///
/// Handler failures are not errors here: they are recorded on the event.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The outbox store failed.
    #[error("Outbox error: {0}")]
    Outbox(#[from] OutboxError),

    /// A claimed event came back without a lease token.
    #[error("Claimed event {0} has no lease token")]
    MissingLease(EventId),
}

impl DispatchError {
    /// Returns the error classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::Outbox(e) => e.kind(),
            DispatchError::MissingLease(_) => ErrorKind::Permanent,
        }
    }
}

/// Result type for dispatcher operations.
pub type Result<T> = std::result::Result<T, DispatchError>;
