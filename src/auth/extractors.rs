//! Authentication extractors for Axum

use async_trait::async_trait;
use axum::{
    extract::{Extension, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, warn};

use super::models::User;
use super::tokens::TokenError;
use crate::common::{safe_email_log, ApiError, AppState};

/// Authenticated user extractor
///
/// Validates the Bearer access token through the codec and loads the user
/// row, so handlers behind it always see an existing, active user.
#[derive(Debug)]
pub struct AuthedUser {
    pub id: String,
    pub email: String,
    pub role: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthedUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        // Extract the Extension containing the AppState
        let Extension(state_lock): Extension<Arc<RwLock<AppState>>> =
            Extension::from_request_parts(parts, state)
                .await
                .map_err(|_| ApiError::InternalServer("missing app state".to_string()))?;

        let app_state = state_lock.read().await.clone();

        // Extract Bearer token from Authorization header
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .map(|s| s.to_string());

        let token = match token {
            Some(t) => t,
            None => {
                warn!("Authentication failed: missing Authorization header");
                return Err(ApiError::Unauthorized("missing auth".into()));
            }
        };

        // Handle "Bearer <token>" format or raw token
        let bare_token = token.strip_prefix("Bearer ").unwrap_or(&token);

        let claims = app_state
            .auth_service
            .codec()
            .verify_session(bare_token, false)
            .map_err(|e| match e {
                TokenError::Expired => ApiError::TokenExpired,
                _ => {
                    warn!(error = %e, "Access token validation failed");
                    ApiError::Unauthorized("invalid token".into())
                }
            })?;

        // Look up user in database
        let user: Option<User> =
            sqlx::query_as("SELECT * FROM users WHERE id = ? AND is_active = 1")
                .bind(&claims.user_id)
                .fetch_optional(&app_state.db)
                .await
                .map_err(|e| {
                    error!(
                        error = %e,
                        user_id = %claims.user_id,
                        "Database error during user lookup in authentication"
                    );
                    ApiError::DatabaseError(e)
                })?;

        match user {
            Some(u) => {
                debug!(
                    user_id = %u.id,
                    email = %safe_email_log(&u.email),
                    "User authentication successful via extractor"
                );
                Ok(AuthedUser {
                    id: u.id,
                    email: u.email,
                    role: u.role,
                })
            }
            None => {
                warn!(user_id = %claims.user_id, "Authentication failed: user not found");
                Err(ApiError::Unauthorized("user not found".into()))
            }
        }
    }
}
