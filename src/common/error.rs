// Error handling types for the API

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use std::fmt;
use tracing::error;

use super::validation::ValidationResult;

/// API error types
///
/// Auth failures are a closed set so that every variant maps to a stable
/// machine-readable code. Unauthorized variants never carry internal detail
/// (a login failure does not reveal whether the email exists).
#[derive(Debug)]
pub enum ApiError {
    EmailInUse,
    InvalidCredentials,
    EmailNotVerified,
    InvalidToken,
    TokenExpired,
    InvalidRefreshToken,
    RefreshTokenExpired,
    UserNotFound,
    SocialAuthFailed,
    Unauthorized(String),
    InternalServer(String),
    ServiceUnavailable(String),
    DatabaseError(sqlx::Error),
    ValidationError(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::EmailInUse => write!(f, "Email already in use"),
            ApiError::InvalidCredentials => write!(f, "Invalid credentials"),
            ApiError::EmailNotVerified => write!(f, "Please verify your email address"),
            ApiError::InvalidToken => write!(f, "Invalid or expired token"),
            ApiError::TokenExpired => write!(f, "Token has expired"),
            ApiError::InvalidRefreshToken => write!(f, "Invalid refresh token"),
            ApiError::RefreshTokenExpired => write!(f, "Refresh token has expired"),
            ApiError::UserNotFound => write!(f, "User not found or inactive"),
            ApiError::SocialAuthFailed => write!(f, "Social authentication failed"),
            ApiError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            ApiError::InternalServer(msg) => write!(f, "Internal Server Error: {}", msg),
            ApiError::ServiceUnavailable(msg) => write!(f, "Service Unavailable: {}", msg),
            ApiError::DatabaseError(e) => write!(f, "Database Error: {}", e),
            ApiError::ValidationError(msg) => write!(f, "Validation Error: {}", msg),
        }
    }
}

impl ApiError {
    /// Stable machine-readable code surfaced to clients
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::EmailInUse => "EMAIL_IN_USE",
            ApiError::InvalidCredentials => "INVALID_CREDENTIALS",
            ApiError::EmailNotVerified => "EMAIL_NOT_VERIFIED",
            ApiError::InvalidToken => "INVALID_TOKEN",
            ApiError::TokenExpired => "TOKEN_EXPIRED",
            ApiError::InvalidRefreshToken => "INVALID_REFRESH_TOKEN",
            ApiError::RefreshTokenExpired => "REFRESH_TOKEN_EXPIRED",
            ApiError::UserNotFound => "USER_NOT_FOUND",
            ApiError::SocialAuthFailed => "SOCIAL_AUTH_FAILED",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::InternalServer(_) => "INTERNAL_SERVER_ERROR",
            ApiError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            ApiError::DatabaseError(_) => "DATABASE_ERROR",
            ApiError::ValidationError(_) => "VALIDATION_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::EmailInUse
            | ApiError::InvalidToken
            | ApiError::ValidationError(_) => StatusCode::BAD_REQUEST,
            ApiError::InvalidCredentials
            | ApiError::TokenExpired
            | ApiError::InvalidRefreshToken
            | ApiError::RefreshTokenExpired
            | ApiError::UserNotFound
            | ApiError::SocialAuthFailed
            | ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::EmailNotVerified => StatusCode::FORBIDDEN,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::InternalServer(_) | ApiError::DatabaseError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// JSON error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let code = self.code();
        let error_message = match &self {
            ApiError::DatabaseError(e) => {
                error!(error = %e, "Database error occurred");
                "Database operation failed".to_string()
            }
            other => other.to_string(),
        };

        let error_response = ErrorResponse {
            error: error_message,
            code: code.to_string(),
        };

        (status, Json(error_response)).into_response()
    }
}

/// Helper function to convert ValidationResult to ApiError
impl From<ValidationResult> for ApiError {
    fn from(result: ValidationResult) -> Self {
        if result.is_valid {
            ApiError::InternalServer(
                "Validation result was valid but converted to error".to_string(),
            )
        } else {
            let error_messages: Vec<String> = result
                .errors
                .iter()
                .map(|e| format!("{}: {}", e.field, e.message))
                .collect();
            ApiError::ValidationError(error_messages.join(", "))
        }
    }
}
