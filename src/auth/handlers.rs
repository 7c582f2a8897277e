//! Authentication handlers
//!
//! Thin JSON layer over `AuthService`: deserialize, validate, delegate,
//! serialize. All policy lives in the service.

use axum::extract::{Extension, Json};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use super::extractors::AuthedUser;
use super::models::{
    AppleAuthRequest, AuthTokens, FacebookAuthRequest, ForgotPasswordRequest, GoogleAuthRequest,
    LoginRequest, RefreshRequest, RegisterRequest, ResetPasswordRequest, User, VerifyEmailRequest,
};
use crate::common::{ApiError, AppState, Validator};

/// POST /api/auth/register
///
/// # Request Body
/// ```json
/// {
///   "email": "alice@example.com",
///   "password": "pw123456",
///   "name": "Alice A"
/// }
/// ```
///
/// # Response
/// ```json
/// {
///   "accessToken": "...",
///   "refreshToken": "...",
///   "expiresIn": 900,
///   "tokenType": "Bearer"
/// }
/// ```
pub async fn register(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    Json(payload): Json<RegisterRequest>,
) -> Result<Json<AuthTokens>, ApiError> {
    let validation = payload.validate(&payload);
    if !validation.is_valid {
        return Err(validation.into());
    }

    let state = state_lock.read().await.clone();
    let tokens = state
        .auth_service
        .register(&payload.email, &payload.password, &payload.name)
        .await?;

    Ok(Json(tokens))
}

/// POST /api/auth/login
pub async fn login(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthTokens>, ApiError> {
    let state = state_lock.read().await.clone();
    let tokens = state
        .auth_service
        .login(&payload.email, &payload.password)
        .await?;

    Ok(Json(tokens))
}

/// POST /api/auth/refresh
///
/// Exchanges a refresh token for a new pair. The presented token is
/// single-use: a second exchange with it fails.
pub async fn refresh(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<AuthTokens>, ApiError> {
    let state = state_lock.read().await.clone();
    let tokens = state.auth_service.refresh(&payload.refresh_token).await?;

    Ok(Json(tokens))
}

/// POST /api/auth/logout
///
/// Unconditionally safe: revokes the refresh token if it can, succeeds
/// either way.
pub async fn logout(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let state = state_lock.read().await.clone();
    state.auth_service.logout(&payload.refresh_token).await;

    info!("User logout successful");
    Ok(Json(serde_json::json!({ "message": "Logout successful" })))
}

/// POST /api/auth/verify-email
pub async fn verify_email(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    Json(payload): Json<VerifyEmailRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let state = state_lock.read().await.clone();
    state.auth_service.verify_email(&payload.token).await?;

    Ok(Json(serde_json::json!({ "message": "Email verified" })))
}

/// POST /api/auth/forgot-password
///
/// Always answers 200 whether or not the email exists.
pub async fn forgot_password(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    Json(payload): Json<ForgotPasswordRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let state = state_lock.read().await.clone();
    state
        .auth_service
        .request_password_reset(&payload.email)
        .await?;

    Ok(Json(serde_json::json!({
        "message": "If that email is registered, a reset link has been sent"
    })))
}

/// POST /api/auth/reset-password
pub async fn reset_password(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let validation = payload.validate(&payload);
    if !validation.is_valid {
        return Err(validation.into());
    }

    let state = state_lock.read().await.clone();
    state
        .auth_service
        .reset_password(&payload.token, &payload.password)
        .await?;

    Ok(Json(serde_json::json!({ "message": "Password updated" })))
}

/// POST /api/auth/google
/// Authenticates a user via a Google OAuth ID token
pub async fn google_auth(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    Json(payload): Json<GoogleAuthRequest>,
) -> Result<Json<AuthTokens>, ApiError> {
    info!("🔐 Received Google auth request");
    let state = state_lock.read().await.clone();
    let tokens = state.auth_service.login_with_google(&payload.id_token).await?;

    Ok(Json(tokens))
}

/// POST /api/auth/facebook
/// Authenticates a user via a Facebook user access token
pub async fn facebook_auth(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    Json(payload): Json<FacebookAuthRequest>,
) -> Result<Json<AuthTokens>, ApiError> {
    info!("🔐 Received Facebook auth request");
    let state = state_lock.read().await.clone();
    let tokens = state
        .auth_service
        .login_with_facebook(&payload.access_token)
        .await?;

    Ok(Json(tokens))
}

/// POST /api/auth/apple
/// Authenticates a user via a Sign in with Apple ID token
pub async fn apple_auth(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    Json(payload): Json<AppleAuthRequest>,
) -> Result<Json<AuthTokens>, ApiError> {
    info!("🔐 Received Apple auth request");
    let state = state_lock.read().await.clone();
    let tokens = state.auth_service.login_with_apple(&payload.id_token).await?;

    Ok(Json(tokens))
}

/// GET /api/me
/// Returns the current authenticated user's information
#[axum::debug_handler]
pub async fn me_handler(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    authed: AuthedUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    let state = state_lock.read().await.clone();

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(&authed.id)
        .fetch_one(&state.db)
        .await
        .map_err(ApiError::DatabaseError)?;

    Ok(Json(serde_json::json!({ "user": user })))
}
