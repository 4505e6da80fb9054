//! Token issuance and verification.
//!
//! Access and refresh tokens are HS256 JWTs signed with separate secrets, so
//! a token of one kind never verifies as the other. Verification is pure
//! computation: no I/O and no shared state.
//!
//! Refresh verification checks the signature and expiry only. The caller
//! compares `token_version` against the directory's live counter; a stale
//! but well-signed token passes here by design of the rotation protocol.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use super::claims::{AccessClaims, RefreshClaims};
use crate::config::TokenConfig;
use crate::directory::Identity;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Token expired")]
    Expired,

    #[error("Malformed token: {0}")]
    Malformed(String),

    #[error("Failed to sign token: {0}")]
    Signing(String),
}

/// A freshly signed token and its lifetime.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    /// Expiration time (unix seconds)
    pub expires_at: i64,
    /// Lifetime, used as the cookie max-age
    pub ttl: Duration,
}

struct SigningKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl SigningKeys {
    fn from_secret(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }
}

pub struct TokenService {
    access: SigningKeys,
    refresh: SigningKeys,
    access_ttl: Duration,
    refresh_ttl: Duration,
    leeway_secs: i64,
}

impl TokenService {
    pub fn new(config: &TokenConfig) -> Self {
        Self {
            access: SigningKeys::from_secret(&config.access_secret),
            refresh: SigningKeys::from_secret(&config.refresh_secret),
            access_ttl: config.access_ttl,
            refresh_ttl: config.refresh_ttl,
            leeway_secs: config.leeway_secs as i64,
        }
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    /// Sign an access token for `identity` under `session_id`.
    pub fn issue_access(
        &self,
        identity: &Identity,
        session_id: &str,
        fingerprint: Option<String>,
    ) -> Result<IssuedToken, TokenError> {
        let claims = AccessClaims::new(
            identity,
            session_id,
            fingerprint,
            now(),
            self.access_ttl.as_secs() as i64,
        );
        let token = sign(&claims, &self.access.encoding)?;

        Ok(IssuedToken {
            token,
            expires_at: claims.expires_at,
            ttl: self.access_ttl,
        })
    }

    /// Sign a refresh token bound to the revocation counter value `token_version`.
    pub fn issue_refresh(
        &self,
        user_id: &str,
        session_id: &str,
        token_version: u64,
    ) -> Result<IssuedToken, TokenError> {
        let claims = RefreshClaims::new(
            user_id,
            session_id,
            token_version,
            now(),
            self.refresh_ttl.as_secs() as i64,
        );
        let token = sign(&claims, &self.refresh.encoding)?;

        Ok(IssuedToken {
            token,
            expires_at: claims.expires_at,
            ttl: self.refresh_ttl,
        })
    }

    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, TokenError> {
        let claims: AccessClaims = verify_signature(token, &self.access.decoding)?;

        if self.is_expired(claims.expires_at) {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }

    /// Verify signature and expiry of a refresh token.
    ///
    /// Expired refresh tokens are reported as malformed: the client has no
    /// recovery path other than logging in again.
    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims, TokenError> {
        let claims: RefreshClaims = verify_signature(token, &self.refresh.decoding)?;

        if self.is_expired(claims.expires_at) {
            tracing::debug!(user_id = %claims.id, "Refresh token expired");
            return Err(TokenError::Malformed("refresh token expired".to_string()));
        }

        Ok(claims)
    }

    fn is_expired(&self, expires_at: i64) -> bool {
        expires_at + self.leeway_secs <= now()
    }

    #[cfg(test)]
    fn sign_access(&self, claims: &AccessClaims) -> String {
        sign(claims, &self.access.encoding).unwrap()
    }

    #[cfg(test)]
    fn sign_refresh(&self, claims: &RefreshClaims) -> String {
        sign(claims, &self.refresh.encoding).unwrap()
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn sign<T: Serialize>(claims: &T, key: &EncodingKey) -> Result<String, TokenError> {
    encode(&Header::new(Algorithm::HS256), claims, key)
        .map_err(|e| TokenError::Signing(e.to_string()))
}

fn verify_signature<T: DeserializeOwned>(token: &str, key: &DecodingKey) -> Result<T, TokenError> {
    let mut validation = Validation::new(Algorithm::HS256);
    // Expiry is checked by the caller with the configured leeway
    validation.validate_exp = false;
    validation.validate_aud = false;

    decode::<T>(token, key, &validation)
        .map(|data| data.claims)
        .map_err(|e| TokenError::Malformed(e.to_string()))
}
