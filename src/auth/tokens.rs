// src/auth/tokens.rs
//! Signed token codec for session and action tokens
//!
//! Session tokens come in pairs (short-lived access, long-lived refresh)
//! sharing a `tokenId` claim so a refresh token can be correlated with its
//! stored record. Action tokens (email verification, password reset) carry a
//! `purpose` discriminator instead and are never persisted: their only proof
//! of validity is a correct signature and an unexpired timestamp.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Email-verification tokens live for 24 hours
pub const VERIFICATION_TOKEN_TTL_HOURS: i64 = 24;
/// Password-reset tokens live for 1 hour
pub const RESET_TOKEN_TTL_HOURS: i64 = 1;

/// Closed verification-failure kinds. Callers pattern-match on these rather
/// than on the jsonwebtoken error hierarchy.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token has expired")]
    Expired,

    #[error("invalid token")]
    Invalid,

    #[error("token signing failed: {0}")]
    Signing(String),
}

/// Claims carried by the paired session tokens
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SessionClaims {
    pub user_id: String,
    pub email: String,
    pub role: String,
    pub token_id: String,
    pub iss: String,
    pub exp: i64,
}

/// Single-use action discriminator, checked by the consumer
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TokenPurpose {
    EmailVerification,
    PasswordReset,
}

/// Claims carried by action tokens (verification / reset)
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ActionClaims {
    pub user_id: String,
    pub email: String,
    pub purpose: TokenPurpose,
    pub iss: String,
    pub exp: i64,
}

/// HS256 signer/verifier scoped by a process-wide secret and issuer.
/// Pure computation, no IO.
#[derive(Clone)]
pub struct TokenCodec {
    secret: String,
    issuer: String,
}

impl TokenCodec {
    pub fn new(secret: impl Into<String>, issuer: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            issuer: issuer.into(),
        }
    }

    fn encoding_key(&self) -> EncodingKey {
        EncodingKey::from_secret(self.secret.as_bytes())
    }

    fn decoding_key(&self) -> DecodingKey {
        DecodingKey::from_secret(self.secret.as_bytes())
    }

    fn validation(&self, ignore_expiration: bool) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.validate_exp = !ignore_expiration;
        validation
    }

    /// Sign a session token binding the payload to this codec's issuer
    pub fn sign_session(
        &self,
        user_id: &str,
        email: &str,
        role: &str,
        token_id: &str,
        ttl: Duration,
    ) -> Result<String, TokenError> {
        let claims = SessionClaims {
            user_id: user_id.to_string(),
            email: email.to_string(),
            role: role.to_string(),
            token_id: token_id.to_string(),
            iss: self.issuer.clone(),
            exp: (Utc::now() + ttl).timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key())
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    /// Verify a session token. `ignore_expiration` lets logout revoke the
    /// record behind an already-expired token.
    pub fn verify_session(
        &self,
        token: &str,
        ignore_expiration: bool,
    ) -> Result<SessionClaims, TokenError> {
        decode::<SessionClaims>(token, &self.decoding_key(), &self.validation(ignore_expiration))
            .map(|data| data.claims)
            .map_err(map_decode_error)
    }

    /// Sign a single-purpose action token
    pub fn sign_action(
        &self,
        user_id: &str,
        email: &str,
        purpose: TokenPurpose,
        ttl: Duration,
    ) -> Result<String, TokenError> {
        let claims = ActionClaims {
            user_id: user_id.to_string(),
            email: email.to_string(),
            purpose,
            iss: self.issuer.clone(),
            exp: (Utc::now() + ttl).timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key())
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    /// Verify an action token. The caller checks `purpose`.
    pub fn verify_action(&self, token: &str) -> Result<ActionClaims, TokenError> {
        decode::<ActionClaims>(token, &self.decoding_key(), &self.validation(false))
            .map(|data| data.claims)
            .map_err(map_decode_error)
    }
}

impl From<TokenError> for crate::common::ApiError {
    fn from(error: TokenError) -> Self {
        match error {
            TokenError::Expired => crate::common::ApiError::TokenExpired,
            TokenError::Invalid => crate::common::ApiError::InvalidToken,
            TokenError::Signing(msg) => crate::common::ApiError::InternalServer(msg),
        }
    }
}

fn map_decode_error(error: jsonwebtoken::errors::Error) -> TokenError {
    match error.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
        _ => TokenError::Invalid,
    }
}
