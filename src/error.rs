//! Error types for the Quorum gateway and service-mesh library

use std::io;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised across the trust boundary, the mesh client, and the
/// realtime layer.
#[derive(Error, Debug)]
pub enum Error {
    /// Missing, invalid, or expired credential at a trust boundary
    #[error("{0}")]
    Unauthenticated(String),

    /// Authenticated but not authorized for the resource
    #[error("{0}")]
    Forbidden(String),

    /// Resource absent
    #[error("{0}")]
    NotFound(String),

    /// Uniqueness violation from the persistence collaborator
    #[error("{0}")]
    Conflict(String),

    /// Missing or malformed request fields
    #[error("{0}")]
    Validation(String),

    /// Circuit open or transport failure calling a peer service
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Circuit breaker rejected the call without network I/O
    #[error("Circuit breaker open for {0}")]
    CircuitOpen(String),

    /// Outbound call exceeded its hard timeout
    #[error("Timeout calling {0}")]
    Timeout(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// HTTP status for this error at the outer boundary.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether a failed call against this error is worth retrying.
    ///
    /// Transport-level failures may be transient; auth, validation, and
    /// breaker rejections are not.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Timeout(_) | Self::Io(_))
    }

    /// Message shown to external clients.
    ///
    /// Transport internals (connection errors, downstream bodies from
    /// failed calls, circuit state) never reach the wire.
    #[must_use]
    pub fn public_message(&self) -> &str {
        match self {
            Self::Unauthenticated(msg)
            | Self::Forbidden(msg)
            | Self::NotFound(msg)
            | Self::Conflict(msg)
            | Self::Validation(msg) => msg,
            _ => "Service temporarily unavailable",
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "Request failed");
        }
        let body = Json(json!({
            "success": false,
            "error": self.public_message(),
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_follows_taxonomy() {
        assert_eq!(
            Error::Unauthenticated("no token".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            Error::Forbidden("not a member".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            Error::NotFound("team".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            Error::Conflict("exists".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            Error::Validation("missing name".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::CircuitOpen("team-service".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn transport_errors_get_generic_public_message() {
        let err = Error::CircuitOpen("team-service".into());
        assert_eq!(err.public_message(), "Service temporarily unavailable");
        let err = Error::Timeout("user-service".into());
        assert_eq!(err.public_message(), "Service temporarily unavailable");
    }

    #[test]
    fn boundary_errors_keep_their_message() {
        let err = Error::Unauthenticated("No token provided".into());
        assert_eq!(err.public_message(), "No token provided");
    }

    #[test]
    fn circuit_open_is_not_retryable() {
        assert!(!Error::CircuitOpen("chat-service".into()).is_retryable());
        assert!(Error::Timeout("chat-service".into()).is_retryable());
    }
}
