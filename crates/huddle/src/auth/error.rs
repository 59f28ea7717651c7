//! Authentication errors.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No session cookie (or dev header) on the request.
    #[error("not logged in")]
    MissingSession,

    /// The session token is unknown or expired.
    #[error("invalid session")]
    InvalidSession,

    /// The session points at a user that no longer exists.
    #[error("user not found")]
    UserNotFound,

    /// The account has no email usable as a chat identity.
    #[error("account has no usable identity")]
    InvalidIdentity,

    /// Invalid credentials.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Internal error.
    #[error("internal auth error: {0}")]
    Internal(String),
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct AuthErrorResponse {
    pub error: String,
    pub error_code: String,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, error_code) = match &self {
            AuthError::MissingSession => (StatusCode::UNAUTHORIZED, "missing_session"),
            AuthError::InvalidSession => (StatusCode::UNAUTHORIZED, "invalid_session"),
            AuthError::UserNotFound => (StatusCode::UNAUTHORIZED, "user_not_found"),
            AuthError::InvalidIdentity => (StatusCode::UNAUTHORIZED, "invalid_identity"),
            AuthError::InvalidCredentials => (StatusCode::UNAUTHORIZED, "invalid_credentials"),
            AuthError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let body = Json(AuthErrorResponse {
            error: self.to_string(),
            error_code: error_code.to_string(),
        });

        (status, body).into_response()
    }
}
