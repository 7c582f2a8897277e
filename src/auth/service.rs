// src/auth/service.rs
//! Session manager and identity resolver
//!
//! `AuthService` owns the token lifecycle: paired access/refresh issuance,
//! strict single-use refresh rotation, revocation on logout and password
//! change. Social logins resolve to a local user inside one transaction so
//! two concurrent first logins from the same external identity cannot
//! create two users. All mutual exclusion is delegated to the store; the
//! service itself holds no mutable state.

use chrono::{DateTime, Duration, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::models::{AuthTokens, RefreshTokenRecord, SocialProfile, User};
use super::tokens::{
    TokenCodec, TokenPurpose, RESET_TOKEN_TTL_HOURS, VERIFICATION_TOKEN_TTL_HOURS,
};
use super::username::allocate_username;
use crate::common::config::AuthConfig;
use crate::common::{
    generate_social_link_id, generate_user_id, safe_email_log, safe_token_log, ApiError,
};
use crate::services::email::{
    render_reset_password, render_verify_email, Mailer, OutgoingEmail,
};

/// Outcome of social identity resolution
#[derive(Debug, Clone)]
pub struct ResolvedIdentity {
    pub id: String,
    pub email: String,
    pub role: String,
}

pub struct AuthService {
    db: SqlitePool,
    config: AuthConfig,
    codec: TokenCodec,
    providers: super::social::SocialProviders,
    mailer: Arc<dyn Mailer>,
}

impl AuthService {
    pub fn new(
        db: SqlitePool,
        config: AuthConfig,
        http: reqwest::Client,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        let codec = TokenCodec::new(config.jwt_secret.clone(), config.jwt_issuer.clone());
        let providers = super::social::SocialProviders::new(http, &config);
        Self {
            db,
            config,
            codec,
            providers,
            mailer,
        }
    }

    /// Codec handle for access-token verification in extractors
    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    // ------------------------------------------------------------------
    // Registration / login
    // ------------------------------------------------------------------

    /// Register a new user with email and password.
    ///
    /// Sends a 24h verification email and returns a session pair. The
    /// refresh half is persisted just like login's, so it can be rotated.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        name: &str,
    ) -> Result<AuthTokens, ApiError> {
        let existing: Option<(String,)> = sqlx::query_as("SELECT id FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.db)
            .await
            .map_err(ApiError::DatabaseError)?;

        if existing.is_some() {
            return Err(ApiError::EmailInUse);
        }

        let hashed_password = self.hash_password(password.to_string()).await?;

        let user_id = generate_user_id();
        let mut conn = self.db.acquire().await.map_err(ApiError::DatabaseError)?;
        let username = allocate_username(&mut conn, name).await?;

        sqlx::query(
            "INSERT INTO users (id, email, password, name, username) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&user_id)
        .bind(email)
        .bind(&hashed_password)
        .bind(name)
        .bind(&username)
        .execute(&mut *conn)
        .await
        .map_err(ApiError::DatabaseError)?;

        info!(
            user_id = %user_id,
            email = %safe_email_log(email),
            username = %username,
            "New user registered"
        );

        let verification_token = self.codec.sign_action(
            &user_id,
            email,
            TokenPurpose::EmailVerification,
            Duration::hours(VERIFICATION_TOKEN_TTL_HOURS),
        )?;

        let verification_url = format!(
            "{}/verify-email?token={}",
            self.config.frontend_url, verification_token
        );
        self.dispatch_email(OutgoingEmail {
            to: email.to_string(),
            subject: "Verify your email".to_string(),
            template: "verify-email".to_string(),
            html: render_verify_email(name, &verification_url),
        })
        .await;

        let (tokens, token_id) = self.issue_tokens(&user_id, email, "user")?;
        self.store_refresh_token(&mut conn, &user_id, &token_id, &tokens.refresh_token)
            .await?;

        Ok(tokens)
    }

    /// Login with email and password.
    ///
    /// Unknown email, inactive account and wrong password all fail with the
    /// same INVALID_CREDENTIALS so callers cannot probe which it was.
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthTokens, ApiError> {
        let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.db)
            .await
            .map_err(ApiError::DatabaseError)?;

        let user = match user {
            Some(u) if u.is_active => u,
            _ => return Err(ApiError::InvalidCredentials),
        };

        let stored_hash = user.password.clone().ok_or(ApiError::InvalidCredentials)?;
        if !self
            .verify_password(password.to_string(), stored_hash)
            .await?
        {
            return Err(ApiError::InvalidCredentials);
        }

        if !user.email_verified {
            return Err(ApiError::EmailNotVerified);
        }

        let (tokens, token_id) = self.issue_tokens(&user.id, &user.email, &user.role)?;

        let mut conn = self.db.acquire().await.map_err(ApiError::DatabaseError)?;
        self.store_refresh_token(&mut conn, &user.id, &token_id, &tokens.refresh_token)
            .await?;

        sqlx::query(
            "UPDATE users SET last_login = datetime('now'), updated_at = datetime('now') WHERE id = ?",
        )
        .bind(&user.id)
        .execute(&mut *conn)
        .await
        .map_err(ApiError::DatabaseError)?;

        info!(user_id = %user.id, email = %safe_email_log(email), "User logged in");

        Ok(tokens)
    }

    // ------------------------------------------------------------------
    // Refresh rotation / logout
    // ------------------------------------------------------------------

    /// Exchange a refresh token for a new pair, revoking the old record.
    ///
    /// Strict rotation: the revoke is a conditional update and a new pair
    /// is issued only when it hit a row, so exactly one of two concurrent
    /// refresh calls with the same token wins.
    pub async fn refresh(&self, refresh_token: &str) -> Result<AuthTokens, ApiError> {
        let claims = self
            .codec
            .verify_session(refresh_token, false)
            .map_err(|_| ApiError::InvalidRefreshToken)?;

        let record: Option<RefreshTokenRecord> = sqlx::query_as(
            "SELECT id, user_id, token, expires_at, revoked FROM refresh_tokens \
             WHERE id = ? AND user_id = ? AND revoked = 0",
        )
        .bind(&claims.token_id)
        .bind(&claims.user_id)
        .fetch_optional(&self.db)
        .await
        .map_err(ApiError::DatabaseError)?;

        // The stored string must byte-equal the presented token: a stale
        // copy from before a rotation no longer matches.
        let record = match record {
            Some(r) if r.token == refresh_token => r,
            _ => return Err(ApiError::InvalidRefreshToken),
        };

        let expires_at = DateTime::parse_from_rfc3339(&record.expires_at)
            .map_err(|_| ApiError::InternalServer("corrupt refresh token expiry".to_string()))?;
        if Utc::now() > expires_at {
            // Expired is converted into permanently revoked before erroring
            self.revoke_record(&record.id).await?;
            return Err(ApiError::RefreshTokenExpired);
        }

        let user: Option<(String, String, String)> =
            sqlx::query_as("SELECT id, email, role FROM users WHERE id = ? AND is_active = 1")
                .bind(&claims.user_id)
                .fetch_optional(&self.db)
                .await
                .map_err(ApiError::DatabaseError)?;

        let (user_id, user_email, role) = user.ok_or(ApiError::UserNotFound)?;

        let (tokens, token_id) = self.issue_tokens(&user_id, &user_email, &role)?;

        let mut tx = self.db.begin().await.map_err(ApiError::DatabaseError)?;

        let revoked = sqlx::query(
            "UPDATE refresh_tokens SET revoked = 1, updated_at = datetime('now') \
             WHERE id = ? AND revoked = 0",
        )
        .bind(&record.id)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::DatabaseError)?;

        if revoked.rows_affected() == 0 {
            // A concurrent refresh already rotated this token
            return Err(ApiError::InvalidRefreshToken);
        }

        self.store_refresh_token(&mut tx, &user_id, &token_id, &tokens.refresh_token)
            .await?;

        tx.commit().await.map_err(ApiError::DatabaseError)?;

        debug!(user_id = %user_id, "Refresh token rotated");

        Ok(tokens)
    }

    /// Best-effort logout: revokes the record behind the presented refresh
    /// token, even an expired one. Never raises; failures are only logged.
    pub async fn logout(&self, refresh_token: &str) {
        match self.codec.verify_session(refresh_token, true) {
            Ok(claims) => {
                if let Err(e) = self.revoke_record(&claims.token_id).await {
                    warn!(error = %e, "Error revoking refresh token during logout");
                }
            }
            Err(e) => {
                warn!(
                    error = %e,
                    token = %safe_token_log(refresh_token),
                    "Error during logout"
                );
            }
        }
    }

    // ------------------------------------------------------------------
    // Email verification / password reset
    // ------------------------------------------------------------------

    /// Flip email_verified for the user named by a verification token
    pub async fn verify_email(&self, token: &str) -> Result<(), ApiError> {
        let claims = self
            .codec
            .verify_action(token)
            .map_err(|_| ApiError::InvalidToken)?;

        if claims.purpose != TokenPurpose::EmailVerification {
            return Err(ApiError::InvalidToken);
        }

        let updated = sqlx::query(
            "UPDATE users SET email_verified = 1, updated_at = datetime('now') \
             WHERE id = ? AND email = ?",
        )
        .bind(&claims.user_id)
        .bind(&claims.email)
        .execute(&self.db)
        .await
        .map_err(ApiError::DatabaseError)?;

        if updated.rows_affected() == 0 {
            return Err(ApiError::UserNotFound);
        }

        info!(user_id = %claims.user_id, "Email verified");

        Ok(())
    }

    /// Issue a 1h reset token and email it. Always succeeds from the
    /// caller's perspective so the endpoint cannot be used to probe for
    /// registered addresses.
    pub async fn request_password_reset(&self, email: &str) -> Result<(), ApiError> {
        let user: Option<(String, String, String)> =
            sqlx::query_as("SELECT id, name, email FROM users WHERE email = ?")
                .bind(email)
                .fetch_optional(&self.db)
                .await
                .map_err(ApiError::DatabaseError)?;

        let Some((user_id, name, email)) = user else {
            debug!(
                email = %safe_email_log(email),
                "Password reset requested for unknown email"
            );
            return Ok(());
        };

        let reset_token = self.codec.sign_action(
            &user_id,
            &email,
            TokenPurpose::PasswordReset,
            Duration::hours(RESET_TOKEN_TTL_HOURS),
        )?;

        let reset_url = format!(
            "{}/reset-password?token={}",
            self.config.frontend_url, reset_token
        );
        self.dispatch_email(OutgoingEmail {
            to: email,
            subject: "Reset your password".to_string(),
            template: "reset-password".to_string(),
            html: render_reset_password(&name, &reset_url),
        })
        .await;

        Ok(())
    }

    /// Set a new password and revoke every refresh token the user holds
    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<(), ApiError> {
        let claims = self
            .codec
            .verify_action(token)
            .map_err(|_| ApiError::InvalidToken)?;

        if claims.purpose != TokenPurpose::PasswordReset {
            return Err(ApiError::InvalidToken);
        }

        let hashed_password = self.hash_password(new_password.to_string()).await?;

        let updated = sqlx::query(
            "UPDATE users SET password = ?, updated_at = datetime('now') \
             WHERE id = ? AND email = ?",
        )
        .bind(&hashed_password)
        .bind(&claims.user_id)
        .bind(&claims.email)
        .execute(&self.db)
        .await
        .map_err(ApiError::DatabaseError)?;

        if updated.rows_affected() == 0 {
            return Err(ApiError::UserNotFound);
        }

        // Global session invalidation on password change
        sqlx::query(
            "UPDATE refresh_tokens SET revoked = 1, updated_at = datetime('now') WHERE user_id = ?",
        )
        .bind(&claims.user_id)
        .execute(&self.db)
        .await
        .map_err(ApiError::DatabaseError)?;

        info!(user_id = %claims.user_id, "Password reset, all sessions revoked");

        Ok(())
    }

    // ------------------------------------------------------------------
    // Social login
    // ------------------------------------------------------------------

    pub async fn login_with_google(&self, id_token: &str) -> Result<AuthTokens, ApiError> {
        let profile = self.providers.verify_google(id_token).await?;
        self.social_login(profile).await
    }

    pub async fn login_with_facebook(&self, access_token: &str) -> Result<AuthTokens, ApiError> {
        let profile = self.providers.verify_facebook(access_token).await?;
        self.social_login(profile).await
    }

    pub async fn login_with_apple(&self, id_token: &str) -> Result<AuthTokens, ApiError> {
        let profile = self.providers.verify_apple(id_token).await?;
        self.social_login(profile).await
    }

    /// Resolve a verified provider profile to a session pair
    pub async fn social_login(&self, profile: SocialProfile) -> Result<AuthTokens, ApiError> {
        let identity = self.resolve_social_user(&profile).await?;

        let (tokens, token_id) = self.issue_tokens(&identity.id, &identity.email, &identity.role)?;
        let mut conn = self.db.acquire().await.map_err(ApiError::DatabaseError)?;
        self.store_refresh_token(&mut conn, &identity.id, &token_id, &tokens.refresh_token)
            .await?;

        info!(
            user_id = %identity.id,
            provider = %profile.provider,
            "User authenticated via social provider"
        );

        Ok(tokens)
    }

    /// Find or create the local user for an external identity.
    ///
    /// Runs as one transaction: the read-then-insert branches below must not
    /// race with a concurrent resolution of the same external identity.
    pub async fn resolve_social_user(
        &self,
        profile: &SocialProfile,
    ) -> Result<ResolvedIdentity, ApiError> {
        let mut tx = self.db.begin().await.map_err(ApiError::DatabaseError)?;

        let link: Option<(String,)> = sqlx::query_as(
            "SELECT user_id FROM user_social_accounts WHERE provider = ? AND provider_user_id = ?",
        )
        .bind(profile.provider.as_str())
        .bind(&profile.id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(ApiError::DatabaseError)?;

        let user_id = match link {
            // Known external identity: reuse its owner
            Some((user_id,)) => {
                self.touch_login(&mut tx, &user_id, profile.avatar.as_deref())
                    .await?;
                user_id
            }
            None => {
                let existing: Option<(String,)> =
                    sqlx::query_as("SELECT id FROM users WHERE email = ?")
                        .bind(&profile.email)
                        .fetch_optional(&mut *tx)
                        .await
                        .map_err(ApiError::DatabaseError)?;

                match existing {
                    // Email already registered: link the social identity to it
                    Some((user_id,)) => {
                        self.insert_social_link(&mut tx, &user_id, profile).await?;
                        self.touch_login(&mut tx, &user_id, profile.avatar.as_deref())
                            .await?;
                        user_id
                    }
                    // Brand new user
                    None => {
                        let user_id = generate_user_id();
                        let display_name = profile
                            .name
                            .clone()
                            .unwrap_or_else(|| email_local_part(&profile.email).to_string());
                        let username = allocate_username(&mut tx, &display_name).await?;

                        sqlx::query(
                            "INSERT INTO users \
                             (id, email, name, username, avatar, email_verified, is_active, last_login) \
                             VALUES (?, ?, ?, ?, ?, ?, 1, datetime('now'))",
                        )
                        .bind(&user_id)
                        .bind(&profile.email)
                        .bind(&display_name)
                        .bind(&username)
                        .bind(&profile.avatar)
                        .bind(profile.email_verified)
                        .execute(&mut *tx)
                        .await
                        .map_err(ApiError::DatabaseError)?;

                        self.insert_social_link(&mut tx, &user_id, profile).await?;

                        info!(
                            user_id = %user_id,
                            email = %safe_email_log(&profile.email),
                            provider = %profile.provider,
                            "Created new user from social profile"
                        );

                        user_id
                    }
                }
            }
        };

        let (id, email, role): (String, String, String) =
            sqlx::query_as("SELECT id, email, role FROM users WHERE id = ?")
                .bind(&user_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(ApiError::DatabaseError)?;

        tx.commit().await.map_err(ApiError::DatabaseError)?;

        Ok(ResolvedIdentity { id, email, role })
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Issue an access/refresh pair sharing one tokenId claim
    fn issue_tokens(
        &self,
        user_id: &str,
        email: &str,
        role: &str,
    ) -> Result<(AuthTokens, String), ApiError> {
        let token_id = Uuid::new_v4().to_string();

        let access_token = self.codec.sign_session(
            user_id,
            email,
            role,
            &token_id,
            self.config.access_ttl(),
        )?;
        let refresh_token = self.codec.sign_session(
            user_id,
            email,
            role,
            &token_id,
            self.config.refresh_ttl(),
        )?;

        Ok((
            AuthTokens {
                access_token,
                refresh_token,
                expires_in: self.config.expires_in_seconds(),
                token_type: "Bearer".to_string(),
            },
            token_id,
        ))
    }

    async fn store_refresh_token(
        &self,
        conn: &mut SqliteConnection,
        user_id: &str,
        token_id: &str,
        token: &str,
    ) -> Result<(), ApiError> {
        let expires_at = (Utc::now() + self.config.refresh_ttl()).to_rfc3339();

        sqlx::query(
            "INSERT INTO refresh_tokens (id, user_id, token, expires_at) VALUES (?, ?, ?, ?)",
        )
        .bind(token_id)
        .bind(user_id)
        .bind(token)
        .bind(expires_at)
        .execute(&mut *conn)
        .await
        .map_err(ApiError::DatabaseError)?;

        Ok(())
    }

    /// Conditional revoke; revoking an already-revoked row is a no-op
    async fn revoke_record(&self, token_id: &str) -> Result<(), ApiError> {
        sqlx::query(
            "UPDATE refresh_tokens SET revoked = 1, updated_at = datetime('now') \
             WHERE id = ? AND revoked = 0",
        )
        .bind(token_id)
        .execute(&self.db)
        .await
        .map_err(ApiError::DatabaseError)?;

        Ok(())
    }

    /// Refresh last_login; backfill avatar only when the user has none
    async fn touch_login(
        &self,
        conn: &mut SqliteConnection,
        user_id: &str,
        incoming_avatar: Option<&str>,
    ) -> Result<(), ApiError> {
        sqlx::query(
            "UPDATE users SET last_login = datetime('now'), updated_at = datetime('now'), \
             avatar = COALESCE(avatar, ?) WHERE id = ?",
        )
        .bind(incoming_avatar)
        .bind(user_id)
        .execute(&mut *conn)
        .await
        .map_err(ApiError::DatabaseError)?;

        Ok(())
    }

    async fn insert_social_link(
        &self,
        conn: &mut SqliteConnection,
        user_id: &str,
        profile: &SocialProfile,
    ) -> Result<(), ApiError> {
        sqlx::query(
            "INSERT INTO user_social_accounts \
             (id, user_id, provider, provider_user_id, email, name, avatar) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(generate_social_link_id())
        .bind(user_id)
        .bind(profile.provider.as_str())
        .bind(&profile.id)
        .bind(&profile.email)
        .bind(&profile.name)
        .bind(&profile.avatar)
        .execute(&mut *conn)
        .await
        .map_err(ApiError::DatabaseError)?;

        Ok(())
    }

    /// bcrypt is CPU-bound; run it off the async runtime
    async fn hash_password(&self, password: String) -> Result<String, ApiError> {
        let cost = self.config.bcrypt_cost;
        tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
            .await
            .map_err(|e| ApiError::InternalServer(format!("hashing task failed: {}", e)))?
            .map_err(|e| ApiError::InternalServer(format!("password hashing failed: {}", e)))
    }

    async fn verify_password(&self, password: String, hash: String) -> Result<bool, ApiError> {
        tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
            .await
            .map_err(|e| ApiError::InternalServer(format!("hashing task failed: {}", e)))?
            .map_err(|e| ApiError::InternalServer(format!("password verification failed: {}", e)))
    }

    /// Failures are logged and swallowed; auth flows never fail on email
    async fn dispatch_email(&self, email: OutgoingEmail) {
        let template = email.template.clone();
        let to = safe_email_log(&email.to);
        if let Err(e) = self.mailer.send(email).await {
            warn!(error = %e, template = %template, to = %to, "Email dispatch failed");
        }
    }
}

fn email_local_part(email: &str) -> &str {
    email.split('@').next().unwrap_or(email)
}
