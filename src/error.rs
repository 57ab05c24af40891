//! Bridge error types with HTTP status code mapping.
//!
//! [`BridgeError`] is the central error type for the bridge. Each variant
//! maps to a numeric code and an HTTP status for the REST endpoints;
//! WebSocket sessions report the same errors as `{"type":"error"}` frames.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 1001,
///     "message": "invalid command: params.position must be within [0, 1]",
///     "details": "c1"
///   }
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Numeric error code.
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details (the offending command id, if any).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Server-side error enum.
///
/// # Error Code Ranges
///
/// | Range     | Category      | HTTP Status                 |
/// |-----------|---------------|-----------------------------|
/// | 1000–1999 | Validation    | 400 Bad Request             |
/// | 2000–2999 | Device bus    | 503 Service Unavailable     |
/// | 3000–3999 | Server        | 500 Internal Server Error   |
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Client-supplied command failed validation. `reason` names the
    /// offending field.
    #[error("invalid command: {reason}")]
    InvalidCommand {
        /// Echo of the command's `id` (empty when it could not be read).
        ref_id: String,
        /// First violation found.
        reason: String,
    },

    /// The device bus transport is not connected.
    #[error("bus unavailable: {0}")]
    BusUnavailable(String),

    /// A WebSocket read or write failed.
    #[error("session i/o error: {0}")]
    SessionIo(String),

    /// Startup configuration is missing or invalid.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Internal invariant violation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// Shorthand for an [`BridgeError::InvalidCommand`].
    #[must_use]
    pub fn invalid(ref_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidCommand {
            ref_id: ref_id.into(),
            reason: reason.into(),
        }
    }

    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidCommand { .. } => 1001,
            Self::BusUnavailable(_) => 2001,
            Self::Internal(_) => 3000,
            Self::SessionIo(_) => 3001,
            Self::Configuration(_) => 3002,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidCommand { .. } => StatusCode::BAD_REQUEST,
            Self::BusUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::SessionIo(_) | Self::Configuration(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// The text sent to clients in the `reason` field of an error frame.
    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            Self::InvalidCommand { reason, .. } => reason.clone(),
            other => other.to_string(),
        }
    }
}

impl From<axum::Error> for BridgeError {
    fn from(err: axum::Error) -> Self {
        Self::SessionIo(err.to_string())
    }
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let details = match &self {
            Self::InvalidCommand { ref_id, .. } if !ref_id.is_empty() => Some(ref_id.clone()),
            _ => None,
        };
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}
