//! Authentication routes

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers;

/// Creates and returns the authentication router
///
/// # Routes
/// - `POST /api/auth/register` - Email/password registration
/// - `POST /api/auth/login` - Email/password login
/// - `POST /api/auth/refresh` - Rotate a refresh token
/// - `POST /api/auth/logout` - Revoke a refresh token (best-effort)
/// - `POST /api/auth/verify-email` - Confirm an email address
/// - `POST /api/auth/forgot-password` - Request a password reset
/// - `POST /api/auth/reset-password` - Set a new password
/// - `POST /api/auth/google` - Google Sign-In
/// - `POST /api/auth/facebook` - Facebook Login
/// - `POST /api/auth/apple` - Sign in with Apple
/// - `GET /api/me` - Current user information
pub fn auth_routes() -> Router {
    Router::new()
        .route("/api/auth/register", post(handlers::register))
        .route("/api/auth/login", post(handlers::login))
        .route("/api/auth/refresh", post(handlers::refresh))
        .route("/api/auth/logout", post(handlers::logout))
        .route("/api/auth/verify-email", post(handlers::verify_email))
        .route("/api/auth/forgot-password", post(handlers::forgot_password))
        .route("/api/auth/reset-password", post(handlers::reset_password))
        .route("/api/auth/google", post(handlers::google_auth))
        .route("/api/auth/facebook", post(handlers::facebook_auth))
        .route("/api/auth/apple", post(handlers::apple_auth))
        .route("/api/me", get(handlers::me_handler))
}
