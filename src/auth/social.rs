// src/auth/social.rs
//! Social identity provider adapters
//!
//! Each adapter verifies a provider-issued credential through that
//! provider's own mechanism and extracts a normalized [`SocialProfile`].
//! Verification failures are provider-agnostic at the boundary: callers
//! only ever see `SOCIAL_AUTH_FAILED`, never provider error internals.
//! A provider with no configured credentials reports unavailable.

use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, error, warn};

use super::models::{SocialProfile, SocialProvider};
use crate::common::config::{AppleOAuthConfig, AuthConfig, FacebookOAuthConfig, GoogleOAuthConfig};
use crate::common::{safe_email_log, ApiError};

const APPLE_ISSUER: &str = "https://appleid.apple.com";
const APPLE_KEYS_URL: &str = "https://appleid.apple.com/auth/keys";

/// Verifies provider credentials and normalizes profiles.
/// Providers without configured credentials are disabled, not errors.
#[derive(Clone)]
pub struct SocialProviders {
    http: Client,
    google: Option<GoogleOAuthConfig>,
    facebook: Option<FacebookOAuthConfig>,
    apple: Option<AppleOAuthConfig>,
}

impl SocialProviders {
    pub fn new(http: Client, config: &AuthConfig) -> Self {
        Self {
            http,
            google: config.google.clone(),
            facebook: config.facebook.clone(),
            apple: config.apple.clone(),
        }
    }

    fn unavailable(provider: SocialProvider) -> ApiError {
        warn!(provider = %provider, "Social sign-in requested for unconfigured provider");
        ApiError::ServiceUnavailable(format!("{} sign-in is not configured", provider))
    }

    /// Verify a Google ID token with Google's tokeninfo endpoint
    /// Docs: https://developers.google.com/identity/sign-in/web/backend-auth
    pub async fn verify_google(&self, id_token: &str) -> Result<SocialProfile, ApiError> {
        let config = self
            .google
            .as_ref()
            .ok_or_else(|| Self::unavailable(SocialProvider::Google))?;

        let tokeninfo_url = format!(
            "https://oauth2.googleapis.com/tokeninfo?id_token={}",
            id_token
        );

        debug!("Initiating Google token validation with tokeninfo endpoint");

        let response = self.http.get(&tokeninfo_url).send().await.map_err(|e| {
            error!(error = %e, "HTTP error contacting Google tokeninfo endpoint");
            ApiError::InternalServer("google token validation service unavailable".to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!(http_status = %status, "Google tokeninfo rejected the token");
            return Err(ApiError::SocialAuthFailed);
        }

        let body: serde_json::Value = response.json().await.map_err(|e| {
            warn!(error = %e, "Failed to parse Google tokeninfo response");
            ApiError::SocialAuthFailed
        })?;

        let email = body.get("email").and_then(|v| v.as_str());
        let sub = body.get("sub").and_then(|v| v.as_str());

        let (email, sub) = match (email, sub) {
            (Some(email), Some(sub)) => (email.to_string(), sub.to_string()),
            _ => {
                warn!(
                    has_email = email.is_some(),
                    has_sub = sub.is_some(),
                    "Google token missing required fields (email/sub)"
                );
                return Err(ApiError::SocialAuthFailed);
            }
        };

        // Validate audience (client id) to reject tokens minted for other apps
        match body.get("aud").and_then(|v| v.as_str()) {
            Some(aud) if aud == config.client_id => {}
            Some(aud) => {
                warn!(
                    token_audience = %aud,
                    "Google token audience validation failed - rejecting token"
                );
                return Err(ApiError::SocialAuthFailed);
            }
            None => {
                warn!("Google token missing audience field - rejecting token");
                return Err(ApiError::SocialAuthFailed);
            }
        }

        // tokeninfo reports exp as a decimal string
        let exp = body.get("exp").and_then(|v| {
            v.as_i64()
                .or_else(|| v.as_str().and_then(|s| s.parse::<i64>().ok()))
        });
        if let Some(exp) = exp {
            if exp < chrono::Utc::now().timestamp() {
                warn!(token_exp = exp, "Google token has expired");
                return Err(ApiError::SocialAuthFailed);
            }
        }

        // tokeninfo reports email_verified as the string "true"
        let email_verified = match body.get("email_verified") {
            Some(v) => v.as_bool().unwrap_or_else(|| v.as_str() == Some("true")),
            None => false,
        };

        debug!(
            email = %safe_email_log(&email),
            provider = "google",
            "Google token validation successful"
        );

        Ok(SocialProfile {
            id: sub,
            email,
            name: body.get("name").and_then(|v| v.as_str()).map(str::to_string),
            avatar: body
                .get("picture")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            provider: SocialProvider::Google,
            email_verified,
        })
    }

    /// Verify a Facebook user access token via debug_token, then fetch the
    /// profile from the Graph API
    pub async fn verify_facebook(&self, access_token: &str) -> Result<SocialProfile, ApiError> {
        let config = self
            .facebook
            .as_ref()
            .ok_or_else(|| Self::unavailable(SocialProvider::Facebook))?;

        let debug_url = format!(
            "https://graph.facebook.com/debug_token?input_token={}&access_token={}|{}",
            access_token, config.app_id, config.app_secret
        );

        let response = self.http.get(&debug_url).send().await.map_err(|e| {
            error!(error = %e, "HTTP error contacting Facebook debug_token endpoint");
            ApiError::InternalServer("facebook token validation service unavailable".to_string())
        })?;

        let debug_resp: FacebookDebugTokenResponse = response.json().await.map_err(|e| {
            warn!(error = %e, "Failed to parse Facebook debug_token response");
            ApiError::SocialAuthFailed
        })?;

        if !debug_resp.data.is_valid
            || debug_resp.data.app_id.as_deref() != Some(config.app_id.as_str())
        {
            warn!(
                is_valid = debug_resp.data.is_valid,
                "Facebook token validation failed - rejecting token"
            );
            return Err(ApiError::SocialAuthFailed);
        }

        let me_url = format!(
            "https://graph.facebook.com/v19.0/me?fields=id,name,email,picture.type(large)&access_token={}",
            access_token
        );

        let response = self.http.get(&me_url).send().await.map_err(|e| {
            error!(error = %e, "HTTP error contacting Facebook Graph API");
            ApiError::InternalServer("facebook profile lookup unavailable".to_string())
        })?;

        let me: FacebookUserResponse = response.json().await.map_err(|e| {
            warn!(error = %e, "Failed to parse Facebook profile response");
            ApiError::SocialAuthFailed
        })?;

        let email = me.email.ok_or_else(|| {
            warn!("Facebook profile has no email - rejecting");
            ApiError::SocialAuthFailed
        })?;

        debug!(
            email = %safe_email_log(&email),
            provider = "facebook",
            "Facebook token validation successful"
        );

        Ok(SocialProfile {
            id: me.id,
            email,
            name: me.name,
            avatar: me.picture.and_then(|p| p.data.url),
            provider: SocialProvider::Facebook,
            // Facebook only exposes verified email addresses
            email_verified: true,
        })
    }

    /// Verify a Sign in with Apple ID token against Apple's published JWKS
    pub async fn verify_apple(&self, id_token: &str) -> Result<SocialProfile, ApiError> {
        let config = self
            .apple
            .as_ref()
            .ok_or_else(|| Self::unavailable(SocialProvider::Apple))?;

        let header = decode_header(id_token).map_err(|e| {
            warn!(error = %e, "Apple ID token header is malformed");
            ApiError::SocialAuthFailed
        })?;
        let kid = header.kid.ok_or_else(|| {
            warn!("Apple ID token missing key id");
            ApiError::SocialAuthFailed
        })?;

        let response = self.http.get(APPLE_KEYS_URL).send().await.map_err(|e| {
            error!(error = %e, "HTTP error fetching Apple signing keys");
            ApiError::InternalServer("apple token validation service unavailable".to_string())
        })?;

        let jwks: AppleJwks = response.json().await.map_err(|e| {
            error!(error = %e, "Failed to parse Apple signing keys");
            ApiError::InternalServer("apple token validation service unavailable".to_string())
        })?;

        let jwk = jwks.keys.iter().find(|k| k.kid == kid).ok_or_else(|| {
            warn!(kid = %kid, "No Apple signing key matches the token's key id");
            ApiError::SocialAuthFailed
        })?;

        let decoding_key = DecodingKey::from_rsa_components(&jwk.n, &jwk.e).map_err(|e| {
            error!(error = %e, "Failed to build decoding key from Apple JWK");
            ApiError::InternalServer("apple token validation failed".to_string())
        })?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[&config.client_id]);
        validation.set_issuer(&[APPLE_ISSUER]);

        let token_data = decode::<AppleIdClaims>(id_token, &decoding_key, &validation)
            .map_err(|e| {
                warn!(error = %e, "Apple ID token verification failed");
                ApiError::SocialAuthFailed
            })?;

        let claims = token_data.claims;
        let email_verified = claims.email_verified();
        let email = claims.email.ok_or_else(|| {
            warn!("Apple ID token has no email - rejecting");
            ApiError::SocialAuthFailed
        })?;

        debug!(
            email = %safe_email_log(&email),
            provider = "apple",
            "Apple token validation successful"
        );

        Ok(SocialProfile {
            id: claims.sub,
            email,
            // Apple never puts a display name in the ID token; the resolver
            // falls back to the email's local part.
            name: None,
            avatar: None,
            provider: SocialProvider::Apple,
            email_verified,
        })
    }
}

#[derive(Deserialize, Debug)]
struct FacebookDebugTokenResponse {
    data: FacebookDebugTokenData,
}

#[derive(Deserialize, Debug)]
struct FacebookDebugTokenData {
    #[serde(default)]
    is_valid: bool,
    app_id: Option<String>,
}

#[derive(Deserialize, Debug)]
struct FacebookUserResponse {
    id: String,
    name: Option<String>,
    email: Option<String>,
    picture: Option<FacebookPicture>,
}

#[derive(Deserialize, Debug)]
struct FacebookPicture {
    data: FacebookPictureData,
}

#[derive(Deserialize, Debug)]
struct FacebookPictureData {
    url: Option<String>,
}

#[derive(Deserialize, Debug)]
struct AppleJwks {
    keys: Vec<AppleJwk>,
}

#[derive(Deserialize, Debug)]
struct AppleJwk {
    kid: String,
    n: String,
    e: String,
}

#[derive(Deserialize, Debug)]
struct AppleIdClaims {
    sub: String,
    email: Option<String>,
    // Apple sends this as either a bool or the string "true"
    email_verified: Option<serde_json::Value>,
}

impl AppleIdClaims {
    fn email_verified(&self) -> bool {
        match &self.email_verified {
            Some(v) => v.as_bool().unwrap_or_else(|| v.as_str() == Some("true")),
            None => false,
        }
    }
}
