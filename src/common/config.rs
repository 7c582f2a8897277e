// src/common/config.rs
//! Environment-supplied auth configuration

use chrono::Duration;
use std::env;
use tracing::warn;

/// Google Sign-In credentials
#[derive(Debug, Clone)]
pub struct GoogleOAuthConfig {
    pub client_id: String,
}

/// Facebook Login credentials
#[derive(Debug, Clone)]
pub struct FacebookOAuthConfig {
    pub app_id: String,
    pub app_secret: String,
}

/// Sign in with Apple credentials
#[derive(Debug, Clone)]
pub struct AppleOAuthConfig {
    pub client_id: String,
}

/// Auth subsystem configuration, loaded once at startup.
///
/// Each social provider is optional: missing credentials disable that
/// provider rather than failing startup.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub access_ttl_minutes: i64,
    pub refresh_ttl_days: i64,
    pub bcrypt_cost: u32,
    pub frontend_url: String,
    pub google: Option<GoogleOAuthConfig>,
    pub facebook: Option<FacebookOAuthConfig>,
    pub apple: Option<AppleOAuthConfig>,
}

impl AuthConfig {
    pub fn from_env() -> Self {
        let jwt_secret = env::var("JWT_SECRET").unwrap_or_else(|_| {
            warn!("JWT_SECRET not set, using insecure default");
            "replace_with_strong_secret".to_string()
        });

        let google = env::var("GOOGLE_CLIENT_ID")
            .ok()
            .filter(|v| !v.is_empty())
            .map(|client_id| GoogleOAuthConfig { client_id });

        let facebook = match (env::var("FACEBOOK_APP_ID"), env::var("FACEBOOK_APP_SECRET")) {
            (Ok(app_id), Ok(app_secret)) if !app_id.is_empty() && !app_secret.is_empty() => {
                Some(FacebookOAuthConfig { app_id, app_secret })
            }
            _ => None,
        };

        let apple = env::var("APPLE_CLIENT_ID")
            .ok()
            .filter(|v| !v.is_empty())
            .map(|client_id| AppleOAuthConfig { client_id });

        Self {
            jwt_secret,
            jwt_issuer: env::var("JWT_ISSUER").unwrap_or_else(|_| "whisper-api".to_string()),
            access_ttl_minutes: parse_env_i64("JWT_ACCESS_TTL_MINUTES", 15),
            refresh_ttl_days: parse_env_i64("JWT_REFRESH_TTL_DAYS", 7),
            bcrypt_cost: parse_env_i64("BCRYPT_COST", 10) as u32,
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            google,
            facebook,
            apple,
        }
    }

    /// Access token lifetime (short)
    pub fn access_ttl(&self) -> Duration {
        Duration::minutes(self.access_ttl_minutes)
    }

    /// Refresh token lifetime (long)
    pub fn refresh_ttl(&self) -> Duration {
        Duration::days(self.refresh_ttl_days)
    }

    /// `expiresIn` reported to clients, in seconds of access-token lifetime
    pub fn expires_in_seconds(&self) -> i64 {
        self.access_ttl_minutes * 60
    }
}

fn parse_env_i64(key: &str, default: i64) -> i64 {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(key = %key, value = %raw, "Invalid numeric env value, using default");
            default
        }),
        Err(_) => default,
    }
}

/// Config used by service-level tests: fast hashing, no providers
#[cfg(test)]
pub fn test_config() -> AuthConfig {
    AuthConfig {
        jwt_secret: "test_secret_key".to_string(),
        jwt_issuer: "whisper-api-test".to_string(),
        access_ttl_minutes: 15,
        refresh_ttl_days: 7,
        bcrypt_cost: 4,
        frontend_url: "http://localhost:3000".to_string(),
        google: None,
        facebook: None,
        apple: None,
    }
}
