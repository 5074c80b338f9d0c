use serde::{Deserialize, Serialize};

/// Classification shared by every error in the system.
///
/// Crate-level error enums expose a `kind()` so callers (the HTTP layer,
/// the dispatcher) can decide how to react without matching on every
/// concrete variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A referenced entity does not exist.
    NotFound,

    /// The request violates a validation or business rule.
    BadRequest,

    /// A concurrent writer won a race; the caller may retry.
    Conflict,

    /// A downstream dependency (storage, HTTP) failed; retrying may succeed.
    TransientIo,

    /// Retrying will not help; manual intervention is required.
    Permanent,
}

impl ErrorKind {
    /// Returns true if an automatic retry may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Conflict | ErrorKind::TransientIo)
    }

    /// Returns the kind as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::Conflict => "conflict",
            ErrorKind::TransientIo => "transient_io",
            ErrorKind::Permanent => "permanent",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
