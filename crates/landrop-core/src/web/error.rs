//! HTTP error handling for the transfer server.
//!
//! Converts core errors into JSON error responses. The upload and
//! signaling contracts require exactly one terminal response per request,
//! so handlers return `ApiResult` and let this conversion pick the status.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::error::Error;

/// API error response body.
#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    /// Error code (e.g. "E002" for a bad pairing code)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Human-readable error message
    #[serde(rename = "error")]
    pub message: String,
}

impl ApiError {
    /// Create an error with a message only.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    /// Create an error with a code and message.
    #[must_use]
    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// Create a bad request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::with_code("E001", message)
    }

    /// Create a not found error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::with_code("E004", message)
    }

    /// Create an internal server error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(message)
    }

    /// HTTP status for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self.code.as_deref() {
            Some("E001" | "E006") => StatusCode::BAD_REQUEST,
            Some("E002") => StatusCode::FORBIDDEN,
            Some("E003" | "E004") => StatusCode::NOT_FOUND,
            Some("E005" | "E007") => StatusCode::BAD_GATEWAY,
            Some("E008") => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let code = err.code().map(String::from);
        let code = match (&code, &err) {
            // Path traversal attempts get a plain 400.
            (None, Error::InvalidPath(_)) => Some("E001".to_string()),
            _ => code,
        };
        Self {
            code,
            message: err.to_string(),
        }
    }
}

/// Result type for web handlers.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::from(Error::MissingCredentials).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(Error::InvalidPairingCode("d1".into())).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::from(Error::ReceivedFileNotFound("x".into())).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(Error::SizeLimitExceeded {
                size: 10,
                limit: 5
            })
            .status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            ApiError::from(Error::Internal("boom".into())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_invalid_path_is_client_error() {
        assert_eq!(
            ApiError::from(Error::InvalidPath("../x".into())).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_serialization_shape() {
        let err = ApiError::with_code("E002", "invalid or expired pairing code");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"code\":\"E002\""));
        assert!(json.contains("\"error\":"));

        let plain = ApiError::new("oops");
        let json = serde_json::to_string(&plain).unwrap();
        assert!(!json.contains("code"));
    }
}
