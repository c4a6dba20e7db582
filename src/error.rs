//! Error taxonomy for the relay.
//!
//! Every core operation returns an explicit `Result<T, RelayError>`; the
//! transport layers translate failures into user-visible responses. Nothing
//! crosses a component boundary as a panic.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Failure classes surfaced by the core.
///
/// Duplicate effects (re-adding an existing friendship, re-adding a group
/// member) are not errors: the store resolves them to success so client
/// retries stay simple. Likewise a send that reaches a dead connection is
/// normal; the connection is pruned and offline semantics apply.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Malformed input, rejected before any side effect.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Unknown user, group, or message. No partial state changes.
    #[error("not found: {0}")]
    NotFound(String),

    /// The caller is not allowed to perform the operation
    /// (non-member posting to a group, non-admin mutating one).
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// The persistence layer stayed unreachable through the bounded
    /// retry window. Fatal for this request, never silently dropped.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// A permanent store error (corrupt schema, unexpected SQL failure).
    #[error("database error: {0}")]
    Database(String),
}

impl RelayError {
    /// Stable wire identifier for the error class, used in `error` events.
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::Validation(_) => "validation",
            RelayError::NotFound(_) => "not_found",
            RelayError::AccessDenied(_) => "access_denied",
            RelayError::StoreUnavailable(_) => "store_unavailable",
            RelayError::Database(_) => "database",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            RelayError::Validation(_) => StatusCode::BAD_REQUEST,
            RelayError::NotFound(_) => StatusCode::NOT_FOUND,
            RelayError::AccessDenied(_) => StatusCode::UNAUTHORIZED,
            RelayError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            RelayError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.kind(),
            "message": self.to_string(),
        }));
        (self.status(), body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds_are_stable() {
        assert_eq!(RelayError::Validation("x".into()).kind(), "validation");
        assert_eq!(RelayError::NotFound("x".into()).kind(), "not_found");
        assert_eq!(RelayError::AccessDenied("x".into()).kind(), "access_denied");
        assert_eq!(
            RelayError::StoreUnavailable("x".into()).kind(),
            "store_unavailable"
        );
        assert_eq!(RelayError::Database("x".into()).kind(), "database");
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(
            RelayError::Validation("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            RelayError::NotFound("x".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            RelayError::AccessDenied("x".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            RelayError::StoreUnavailable("x".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
