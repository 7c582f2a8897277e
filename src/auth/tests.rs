//! Tests for auth module
//!
//! Service-level flows against an in-memory SQLite pool with a recording
//! mailer: registration/verification, login, refresh rotation, password
//! reset, logout, and social identity resolution.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::SqlitePool;

    use crate::auth::models::{SocialProfile, SocialProvider};
    use crate::auth::service::AuthService;
    use crate::auth::tokens::TokenCodec;
    use crate::common::config::test_config;
    use crate::common::migrations::run_migrations;
    use crate::common::ApiError;
    use crate::services::email::{Mailer, MemoryMailer};

    async fn test_service() -> (AuthService, SqlitePool, Arc<MemoryMailer>) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory pool");
        run_migrations(&pool).await.expect("migrations");

        let mailer = Arc::new(MemoryMailer::new());
        let service = AuthService::new(
            pool.clone(),
            test_config(),
            reqwest::Client::new(),
            mailer.clone() as Arc<dyn Mailer>,
        );
        (service, pool, mailer)
    }

    fn test_codec() -> TokenCodec {
        TokenCodec::new("test_secret_key", "whisper-api-test")
    }

    /// Pull the action token out of a rendered email body
    fn extract_token(html: &str, marker: &str) -> String {
        html.split(marker)
            .nth(1)
            .expect("email contains token link")
            .split('"')
            .next()
            .unwrap()
            .to_string()
    }

    fn google_profile(external_id: &str, email: &str, name: &str) -> SocialProfile {
        SocialProfile {
            id: external_id.to_string(),
            email: email.to_string(),
            name: Some(name.to_string()),
            avatar: Some("https://cdn.example.com/avatar.jpg".to_string()),
            provider: SocialProvider::Google,
            email_verified: true,
        }
    }

    #[tokio::test]
    async fn test_register_then_login_requires_verification() {
        let (service, pool, mailer) = test_service().await;

        let tokens = service
            .register("alice@example.com", "pw123456", "Alice A")
            .await
            .expect("register");
        assert_eq!(tokens.token_type, "Bearer");
        assert_eq!(tokens.expires_in, 900);

        // Created unverified, with a derived username
        let (username, email_verified): (String, bool) =
            sqlx::query_as("SELECT username, email_verified FROM users WHERE email = ?")
                .bind("alice@example.com")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert!(username.starts_with("alice_a"), "got {}", username);
        assert!(!email_verified);

        // Verification email dispatched with the right template
        let sent = mailer.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].template, "verify-email");
        assert_eq!(sent[0].to, "alice@example.com");

        // Login is forbidden until the email is verified
        let err = service.login("alice@example.com", "pw123456").await.unwrap_err();
        assert!(matches!(err, ApiError::EmailNotVerified), "got {:?}", err);
        assert_eq!(err.code(), "EMAIL_NOT_VERIFIED");

        let verification_token = extract_token(&sent[0].html, "verify-email?token=");
        service.verify_email(&verification_token).await.expect("verify email");

        // Verifying twice is harmless
        service.verify_email(&verification_token).await.expect("re-verify");

        let tokens = service
            .login("alice@example.com", "pw123456")
            .await
            .expect("login after verification");

        let claims = test_codec().verify_session(&tokens.access_token, false).unwrap();
        assert_eq!(claims.email, "alice@example.com");
        assert_eq!(claims.role, "user");

        // Access and refresh halves share the tokenId claim
        let refresh_claims = test_codec().verify_session(&tokens.refresh_token, false).unwrap();
        assert_eq!(claims.token_id, refresh_claims.token_id);
        assert_eq!(claims.user_id, refresh_claims.user_id);
    }

    #[tokio::test]
    async fn test_register_with_multibyte_email() {
        let (service, _pool, mailer) = test_service().await;

        // The local part starts on a multibyte character; every flow that
        // logs the masked address must survive it
        service
            .register("émile@example.com", "pw123456", "Émile Z")
            .await
            .expect("register with accented email");

        let sent = mailer.sent.lock().unwrap().clone();
        assert_eq!(sent[0].to, "émile@example.com");

        let err = service
            .login("émile@example.com", "pw123456")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::EmailNotVerified), "got {:?}", err);

        service
            .request_password_reset("émile@example.com")
            .await
            .expect("reset request");
    }

    #[tokio::test]
    async fn test_register_duplicate_email() {
        let (service, _pool, _mailer) = test_service().await;

        service
            .register("alice@example.com", "pw123456", "Alice A")
            .await
            .unwrap();

        let err = service
            .register("alice@example.com", "different8", "Other Alice")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::EmailInUse));
    }

    #[tokio::test]
    async fn test_login_failure_is_uniform() {
        let (service, pool, mailer) = test_service().await;

        service
            .register("alice@example.com", "pw123456", "Alice A")
            .await
            .unwrap();
        let sent = mailer.sent.lock().unwrap().clone();
        let token = extract_token(&sent[0].html, "verify-email?token=");
        service.verify_email(&token).await.unwrap();

        // Wrong password and unknown email produce the identical error
        let wrong_password = service
            .login("alice@example.com", "not-the-password")
            .await
            .unwrap_err();
        let unknown_email = service.login("nobody@example.com", "pw123456").await.unwrap_err();
        assert!(matches!(wrong_password, ApiError::InvalidCredentials));
        assert!(matches!(unknown_email, ApiError::InvalidCredentials));

        // Deactivated accounts look the same as missing ones
        sqlx::query("UPDATE users SET is_active = 0 WHERE email = ?")
            .bind("alice@example.com")
            .execute(&pool)
            .await
            .unwrap();
        let inactive = service.login("alice@example.com", "pw123456").await.unwrap_err();
        assert!(matches!(inactive, ApiError::InvalidCredentials));
    }

    async fn register_verified(
        service: &AuthService,
        mailer: &MemoryMailer,
        email: &str,
        password: &str,
        name: &str,
    ) -> crate::auth::models::AuthTokens {
        service.register(email, password, name).await.expect("register");
        let html = {
            let sent = mailer.sent.lock().unwrap();
            sent.last().unwrap().html.clone()
        };
        let token = extract_token(&html, "verify-email?token=");
        service.verify_email(&token).await.expect("verify");
        service.login(email, password).await.expect("login")
    }

    #[tokio::test]
    async fn test_refresh_rotation_is_single_use() {
        let (service, _pool, mailer) = test_service().await;
        let tokens =
            register_verified(&service, &mailer, "alice@example.com", "pw123456", "Alice A").await;

        let rotated = service.refresh(&tokens.refresh_token).await.expect("first refresh");
        assert_ne!(rotated.refresh_token, tokens.refresh_token);

        // The rotated-out token is dead even though its signature is valid
        let err = service.refresh(&tokens.refresh_token).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidRefreshToken), "got {:?}", err);

        // The new token keeps working
        service.refresh(&rotated.refresh_token).await.expect("second refresh");
    }

    #[tokio::test]
    async fn test_registration_tokens_are_rotatable() {
        let (service, _pool, _mailer) = test_service().await;

        let tokens = service
            .register("alice@example.com", "pw123456", "Alice A")
            .await
            .unwrap();

        // The pair issued at registration is persisted like login's
        service.refresh(&tokens.refresh_token).await.expect("refresh");
    }

    #[tokio::test]
    async fn test_expired_refresh_record_is_revoked() {
        let (service, pool, mailer) = test_service().await;
        let tokens =
            register_verified(&service, &mailer, "alice@example.com", "pw123456", "Alice A").await;

        // Age the stored record past its expiry
        let past = (chrono::Utc::now() - chrono::Duration::days(1)).to_rfc3339();
        sqlx::query("UPDATE refresh_tokens SET expires_at = ?")
            .bind(&past)
            .execute(&pool)
            .await
            .unwrap();

        let err = service.refresh(&tokens.refresh_token).await.unwrap_err();
        assert!(matches!(err, ApiError::RefreshTokenExpired), "got {:?}", err);

        // Detection converted expired into permanently revoked
        let claims = test_codec().verify_session(&tokens.refresh_token, false).unwrap();
        let (revoked,): (bool,) =
            sqlx::query_as("SELECT revoked FROM refresh_tokens WHERE id = ?")
                .bind(&claims.token_id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert!(revoked);

        let err = service.refresh(&tokens.refresh_token).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidRefreshToken));
    }

    #[tokio::test]
    async fn test_reset_password_invalidates_sessions_and_old_password() {
        let (service, _pool, mailer) = test_service().await;
        let tokens =
            register_verified(&service, &mailer, "alice@example.com", "pw123456", "Alice A").await;

        service
            .request_password_reset("alice@example.com")
            .await
            .expect("request reset");

        let sent = mailer.sent.lock().unwrap().clone();
        let reset_email = sent.last().unwrap();
        assert_eq!(reset_email.template, "reset-password");
        let reset_token = extract_token(&reset_email.html, "reset-password?token=");

        service
            .reset_password(&reset_token, "brand-new-pw")
            .await
            .expect("reset password");

        let err = service.login("alice@example.com", "pw123456").await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidCredentials));

        service
            .login("alice@example.com", "brand-new-pw")
            .await
            .expect("login with new password");

        // Every pre-reset refresh token is revoked
        let err = service.refresh(&tokens.refresh_token).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidRefreshToken));
    }

    #[tokio::test]
    async fn test_forgot_password_unknown_email_is_silent() {
        let (service, _pool, mailer) = test_service().await;

        service
            .request_password_reset("nobody@example.com")
            .await
            .expect("no-op reset request");

        assert!(mailer.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_action_token_purpose_is_enforced() {
        let (service, _pool, mailer) = test_service().await;

        service
            .register("alice@example.com", "pw123456", "Alice A")
            .await
            .unwrap();
        let sent = mailer.sent.lock().unwrap().clone();
        let verification_token = extract_token(&sent[0].html, "verify-email?token=");

        // A verification token cannot reset a password
        let err = service
            .reset_password(&verification_token, "brand-new-pw")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidToken));

        // Garbage is rejected the same way
        let err = service.verify_email("not-a-token").await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidToken));
    }

    #[tokio::test]
    async fn test_logout_revokes_and_never_fails() {
        let (service, pool, mailer) = test_service().await;
        let tokens =
            register_verified(&service, &mailer, "alice@example.com", "pw123456", "Alice A").await;

        service.logout(&tokens.refresh_token).await;

        let err = service.refresh(&tokens.refresh_token).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidRefreshToken));

        // Garbage input is swallowed
        service.logout("not-a-token").await;

        // An expired (but correctly signed) token still revokes its record
        let another = register_verified(&service, &mailer, "bob@example.com", "pw123456", "Bob B").await;
        let claims = test_codec().verify_session(&another.refresh_token, false).unwrap();
        let expired = test_codec()
            .sign_session(
                &claims.user_id,
                &claims.email,
                &claims.role,
                &claims.token_id,
                chrono::Duration::minutes(-5),
            )
            .unwrap();
        service.logout(&expired).await;

        let (revoked,): (bool,) =
            sqlx::query_as("SELECT revoked FROM refresh_tokens WHERE id = ?")
                .bind(&claims.token_id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert!(revoked);
    }

    #[tokio::test]
    async fn test_social_resolution_is_idempotent() {
        let (service, pool, _mailer) = test_service().await;
        let profile = google_profile("google-123", "jane@example.com", "Jane Doe");

        let first = service.resolve_social_user(&profile).await.expect("first resolve");
        let second = service.resolve_social_user(&profile).await.expect("second resolve");

        assert_eq!(first.id, second.id);
        assert_eq!(first.role, "user");

        let (users,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(&pool)
            .await
            .unwrap();
        let (links,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM user_social_accounts")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(users, 1);
        assert_eq!(links, 1);
    }

    #[tokio::test]
    async fn test_social_new_user_is_seeded_from_profile() {
        let (service, pool, _mailer) = test_service().await;
        let profile = google_profile("google-123", "jane@example.com", "Jane Doe");

        let identity = service.resolve_social_user(&profile).await.unwrap();

        let user: crate::auth::models::User =
            sqlx::query_as("SELECT * FROM users WHERE id = ?")
                .bind(&identity.id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(user.username, "jane_doe");
        assert!(user.email_verified, "provider verification signal is trusted");
        assert!(user.is_active);
        assert!(user.password.is_none());
        assert_eq!(user.avatar.as_deref(), Some("https://cdn.example.com/avatar.jpg"));
        assert!(user.last_login.is_some());
    }

    #[tokio::test]
    async fn test_social_login_links_to_existing_email_user() {
        let (service, pool, mailer) = test_service().await;
        register_verified(&service, &mailer, "jane@example.com", "pw123456", "Jane Doe").await;

        let profile = google_profile("google-123", "jane@example.com", "Jane Doe");
        let identity = service.resolve_social_user(&profile).await.unwrap();

        let (registered_id,): (String,) =
            sqlx::query_as("SELECT id FROM users WHERE email = ?")
                .bind("jane@example.com")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(identity.id, registered_id);

        // Linked, not duplicated; avatar backfilled since none was set
        let (users,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(users, 1);
        let (avatar,): (Option<String>,) =
            sqlx::query_as("SELECT avatar FROM users WHERE id = ?")
                .bind(&identity.id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(avatar.as_deref(), Some("https://cdn.example.com/avatar.jpg"));

        // The password account still works
        service.login("jane@example.com", "pw123456").await.expect("password login");
    }

    #[tokio::test]
    async fn test_social_avatar_never_overwrites() {
        let (service, pool, _mailer) = test_service().await;

        let mut profile = google_profile("google-123", "jane@example.com", "Jane Doe");
        service.resolve_social_user(&profile).await.unwrap();

        // Subsequent logins with a different avatar leave the stored one alone
        profile.avatar = Some("https://cdn.example.com/other.jpg".to_string());
        let identity = service.resolve_social_user(&profile).await.unwrap();

        let (avatar,): (Option<String>,) =
            sqlx::query_as("SELECT avatar FROM users WHERE id = ?")
                .bind(&identity.id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(avatar.as_deref(), Some("https://cdn.example.com/avatar.jpg"));
    }

    #[tokio::test]
    async fn test_social_only_account_has_no_usable_password() {
        let (service, _pool, _mailer) = test_service().await;

        let profile = google_profile("google-123", "jane@example.com", "Jane Doe");
        let tokens = service.social_login(profile).await.expect("social login");

        // The social pair is a normal session: it rotates
        service.refresh(&tokens.refresh_token).await.expect("refresh");

        let err = service.login("jane@example.com", "anything8").await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidCredentials));
    }

    #[tokio::test]
    async fn test_refresh_for_deactivated_user_fails() {
        let (service, pool, mailer) = test_service().await;
        let tokens =
            register_verified(&service, &mailer, "alice@example.com", "pw123456", "Alice A").await;

        sqlx::query("UPDATE users SET is_active = 0 WHERE email = ?")
            .bind("alice@example.com")
            .execute(&pool)
            .await
            .unwrap();

        let err = service.refresh(&tokens.refresh_token).await.unwrap_err();
        assert!(matches!(err, ApiError::UserNotFound));
    }
}
