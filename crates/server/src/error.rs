//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use common::ErrorKind;
use dispatcher::DispatchError;
use domain::{DomainError, StoreError};
use notifications::NotificationError;
use outbox::OutboxError;
use thiserror::Error;

/// API-level error type that maps to HTTP responses.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed request from the client.
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Outbox(#[from] OutboxError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Notification(#[from] NotificationError),
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::BadRequest(_) => ErrorKind::BadRequest,
            ApiError::Domain(e) => e.kind(),
            ApiError::Store(e) => e.kind(),
            ApiError::Outbox(e) => e.kind(),
            ApiError::Dispatch(e) => e.kind(),
            ApiError::Notification(e) => e.kind(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::TransientIo => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Permanent => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let kind = self.kind();
        if status.is_server_error() {
            tracing::error!(error = %self, %kind, "request failed");
        }

        let body = serde_json::json!({ "error": self.to_string(), "kind": kind });
        (status, axum::Json(body)).into_response()
    }
}
