//! Domain error types.

use common::ErrorKind;
use thiserror::Error;

use crate::{order::OrderError, store::StoreError};

/// Errors returned by [`OrderService`](crate::OrderService) operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// Validation or lookup failure.
    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    /// The order store failed or rejected the commit.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A collaborating service could not be reached.
    #[error("{service} unavailable: {message}")]
    Unavailable {
        service: &'static str,
        message: String,
    },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DomainError {
    /// Returns the error classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DomainError::Order(e) => e.kind(),
            DomainError::Store(e) => e.kind(),
            DomainError::Unavailable { .. } => ErrorKind::TransientIo,
            DomainError::Serialization(_) => ErrorKind::Permanent,
        }
    }
}
