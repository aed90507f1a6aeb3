//! Error types for the Cash Delhi server.
//!
//! This module defines the error taxonomy surfaced over HTTP. Lower layers
//! keep their own error enums ([`StoreError`], [`SessionError`],
//! [`AuthError`]) and convert into [`ApiError`] at the route boundary.
//!
//! # Error Types
//!
//! - [`FieldError`] - A single per-field validation message
//! - [`ApiError`] - Every failure a route handler can return, with its HTTP mapping
//!
//! # Example
//!
//! ```rust
//! use cashdelhi_server::error::{ApiError, FieldError};
//!
//! let err = ApiError::validation(vec![FieldError::new("title", "Event title is required")]);
//! assert!(err.is_client_error());
//! ```

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};

use crate::auth::AuthError;
use crate::db::StoreError;
use crate::events::EventError;
use crate::session::SessionError;

/// Client-facing message for a missing event.
pub const EVENT_NOT_FOUND: &str = "Event not found";

/// A validation failure attached to one input field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// The JSON field name (camelCase, as the client sent it).
    pub field: String,

    /// Human-readable message suitable for showing next to the form input.
    pub message: String,
}

impl FieldError {
    /// Creates a new field error.
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Errors returned by route handlers.
///
/// Each variant maps to exactly one HTTP status code. Internal errors carry
/// a detail string for the server log; the client only ever sees a generic
/// message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Request body failed per-field validation.
    #[error("validation failed ({} field errors)", .0.len())]
    Validation(Vec<FieldError>),

    /// Request body could not be parsed at all.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Request body exceeded the size limit.
    #[error("payload too large")]
    PayloadTooLarge,

    /// Username unknown or password mismatch.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// A gated route was called without a valid session.
    #[error("unauthorized")]
    Unauthorized,

    /// The addressed resource does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Unexpected failure (store error, serialization bug, panic).
    #[error("internal server error: {0}")]
    Internal(String),
}

/// JSON error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<FieldError>>,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            errors: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_errors(mut self, errors: Vec<FieldError>) -> Self {
        self.errors = Some(errors);
        self
    }
}

impl ApiError {
    /// Creates a validation error from a list of field errors.
    pub fn validation(errors: Vec<FieldError>) -> Self {
        Self::Validation(errors)
    }

    /// Creates a bad request error.
    ///
    /// # Example
    ///
    /// ```rust
    /// use cashdelhi_server::error::ApiError;
    ///
    /// let err = ApiError::bad_request("expected a JSON object");
    /// assert!(matches!(err, ApiError::BadRequest(_)));
    /// ```
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    /// Creates a not-found error with the message returned to the client.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Creates an internal error. The message is logged, never returned.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::InvalidCredentials | Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns `true` if this error indicates a client-side problem.
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Returns `true` if this error indicates a server-side problem.
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    fn to_body(&self) -> ErrorResponse {
        match self {
            Self::Validation(errors) => ErrorResponse::new("Invalid event data")
                .with_code("validation_failed")
                .with_errors(errors.clone()),
            Self::BadRequest(msg) => ErrorResponse::new(msg.clone()).with_code("invalid_body"),
            Self::PayloadTooLarge => {
                ErrorResponse::new("Request body too large").with_code("payload_too_large")
            }
            Self::InvalidCredentials => ErrorResponse::new("Invalid username or password")
                .with_code("invalid_credentials"),
            Self::Unauthorized => ErrorResponse::new("Unauthorized").with_code("unauthorized"),
            Self::NotFound(msg) => ErrorResponse::new(msg.clone()).with_code("not_found"),
            Self::Internal(_) => ErrorResponse::new("Internal server error"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.is_server_error() {
            error!(error = %self, "Request failed with internal error");
        } else if self.is_client_error() {
            debug!(status = self.status_code().as_u16(), "Request rejected");
        }
        (self.status_code(), Json(self.to_body())).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<EventError> for ApiError {
    fn from(err: EventError) -> Self {
        match err {
            EventError::Validation(errors) => Self::Validation(errors),
            EventError::NotFound => Self::NotFound(EVENT_NOT_FOUND.to_string()),
            EventError::Store(store) => Self::from(store),
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials => Self::InvalidCredentials,
            AuthError::Unauthorized => Self::Unauthorized,
            other => Self::Internal(other.to_string()),
        }
    }
}

/// A specialized Result type for route handlers.
pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(err: ApiError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(
            ApiError::validation(vec![]).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::bad_request("x").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::PayloadTooLarge.status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            ApiError::InvalidCredentials.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(ApiError::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::not_found("Event not found").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::internal("boom").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn client_and_server_error_classification() {
        assert!(ApiError::Unauthorized.is_client_error());
        assert!(ApiError::validation(vec![]).is_client_error());
        assert!(!ApiError::internal("db down").is_client_error());
        assert!(ApiError::internal("db down").is_server_error());
        assert!(!ApiError::not_found("x").is_server_error());
    }

    #[tokio::test]
    async fn validation_body_lists_field_errors() {
        let err = ApiError::validation(vec![
            FieldError::new("title", "Event title is required"),
            FieldError::new("venue", "Venue is required"),
        ]);
        let (status, body) = body_json(err).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Invalid event data");
        assert_eq!(body["code"], "validation_failed");
        assert_eq!(body["errors"][0]["field"], "title");
        assert_eq!(body["errors"][1]["message"], "Venue is required");
    }

    #[tokio::test]
    async fn internal_error_hides_detail() {
        let (status, body) = body_json(ApiError::internal("pool timed out on host db-1")).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "Internal server error");
        assert!(body.get("code").is_none());
        assert!(!body.to_string().contains("db-1"));
    }

    #[tokio::test]
    async fn not_found_uses_given_message() {
        let (status, body) = body_json(ApiError::not_found("Event not found")).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "Event not found");
        assert_eq!(body["code"], "not_found");
    }

    #[test]
    fn auth_error_maps_to_api_error() {
        assert_eq!(
            ApiError::from(AuthError::InvalidCredentials),
            ApiError::InvalidCredentials
        );
        assert_eq!(ApiError::from(AuthError::Unauthorized), ApiError::Unauthorized);
        assert!(matches!(
            ApiError::from(AuthError::Hashing("bad salt".into())),
            ApiError::Internal(_)
        ));
    }

    #[test]
    fn event_error_maps_to_api_error() {
        assert_eq!(
            ApiError::from(EventError::NotFound),
            ApiError::not_found(EVENT_NOT_FOUND)
        );
        let errors = vec![FieldError::new("venue", "Venue is required")];
        assert_eq!(
            ApiError::from(EventError::Validation(errors.clone())),
            ApiError::validation(errors)
        );
    }

    #[test]
    fn display_is_useful_for_logs() {
        assert_eq!(
            ApiError::validation(vec![FieldError::new("date", "Date is required")]).to_string(),
            "validation failed (1 field errors)"
        );
        assert_eq!(
            ApiError::internal("disk full").to_string(),
            "internal server error: disk full"
        );
    }
}
