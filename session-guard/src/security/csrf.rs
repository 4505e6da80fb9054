//! CSRF double-submit protection.
//!
//! Every authenticated session gets one random secret. The client echoes it
//! in the `X-CSRF-Token` header on state-changing requests and the guard
//! compares it with the counterpart it holds:
//!
//! - [`CsrfStorage::Server`]: the SHA-256 of the secret lives in the
//!   key-value store under the session id
//! - [`CsrfStorage::Cookie`]: the secret lives in an HTTP-only cookie
//!
//! Secrets are keyed by session id, not by user, so two devices logged in
//! as the same user never overwrite each other's token.
//!
//! Safe methods and the public credential endpoints are never checked:
//! there is no CSRF context before authentication.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use thiserror::Error;

use super::session::generate_secret;
use crate::config::{CsrfStorage, GuardConfig};
use crate::store::{KeyValueStore, StoreError};

/// Request and response header carrying the token
pub const CSRF_HEADER: &str = "x-csrf-token";

/// Cookie carrying the token in cookie storage mode
pub const CSRF_COOKIE: &str = "csrf";

/// Secret length in bytes
const CSRF_SECRET_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum CsrfError {
    #[error("CSRF token missing")]
    Missing,

    #[error("CSRF token invalid")]
    Invalid,

    #[error("CSRF token could not be verified")]
    Verification,

    #[error("CSRF store error: {0}")]
    Store(#[from] StoreError),
}

/// Inputs to a CSRF verification.
#[derive(Debug, Clone, Copy)]
pub struct CsrfCheck<'a> {
    pub method: &'a str,
    pub path: &'a str,
    /// Session the request is authenticated under, if any
    pub session_id: Option<&'a str>,
    pub header_token: Option<&'a str>,
    pub cookie_token: Option<&'a str>,
}

pub struct CsrfGuard {
    enabled: bool,
    storage: CsrfStorage,
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
    public_paths: Vec<String>,
}

impl CsrfGuard {
    pub fn new(config: &GuardConfig, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            enabled: config.csrf.enabled,
            storage: config.csrf.storage,
            store,
            // The secret cannot outlive the session's access token
            ttl: config.tokens.access_ttl,
            public_paths: vec![
                config.auth_path("/login"),
                config.auth_path("/register"),
                config.auth_path("/refresh"),
            ],
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn storage(&self) -> CsrfStorage {
        self.storage
    }

    /// Generate a secret for `session_id` and record its server-side counterpart.
    ///
    /// Returns `Ok(None)` when CSRF protection is disabled. In cookie mode the
    /// caller delivers the returned token in both the cookie and the header.
    pub fn issue(&self, session_id: &str) -> Result<Option<String>, CsrfError> {
        if !self.enabled {
            return Ok(None);
        }

        let secret: [u8; CSRF_SECRET_LEN] = generate_secret();
        let token = URL_SAFE_NO_PAD.encode(secret);

        if self.storage == CsrfStorage::Server {
            self.store
                .set(&store_key(session_id), &digest(&secret), self.ttl)?;
        }

        Ok(Some(token))
    }

    /// Returns true if the request must carry a valid token.
    pub fn requires_check(&self, method: &str, path: &str) -> bool {
        self.enabled && !is_safe_method(method) && !self.public_paths.iter().any(|p| p == path)
    }

    pub fn verify(&self, check: &CsrfCheck<'_>) -> Result<(), CsrfError> {
        if !self.requires_check(check.method, check.path) {
            return Ok(());
        }

        let header = check
            .header_token
            .filter(|t| !t.is_empty())
            .ok_or(CsrfError::Missing)?;

        match self.storage {
            CsrfStorage::Server => self.verify_against_store(header, check.session_id),
            CsrfStorage::Cookie => verify_against_cookie(header, check.cookie_token),
        }
    }

    /// Drop the secret held for `session_id`.
    pub fn clear(&self, session_id: &str) {
        if self.storage != CsrfStorage::Server {
            return;
        }
        if let Err(e) = self.store.delete(&store_key(session_id)) {
            tracing::warn!(error = %e, "Failed to clear CSRF secret");
        }
    }

    fn verify_against_store(&self, header: &str, session_id: Option<&str>) -> Result<(), CsrfError> {
        let session_id = session_id.ok_or(CsrfError::Missing)?;

        let stored = match self.store.get(&store_key(session_id)) {
            Ok(Some(stored)) => stored,
            Ok(None) => return Err(CsrfError::Missing),
            Err(e) => {
                tracing::warn!(error = %e, "CSRF store lookup failed");
                return Err(CsrfError::Verification);
            }
        };

        let presented = decode_token(header)?;
        if constant_time_eq(digest(&presented).as_bytes(), stored.as_bytes()) {
            Ok(())
        } else {
            Err(CsrfError::Invalid)
        }
    }
}

fn verify_against_cookie(header: &str, cookie: Option<&str>) -> Result<(), CsrfError> {
    let cookie = cookie.filter(|c| !c.is_empty()).ok_or(CsrfError::Missing)?;

    let presented = decode_token(header)?;
    let expected = decode_token(cookie)?;
    if constant_time_eq(&presented, &expected) {
        Ok(())
    } else {
        Err(CsrfError::Invalid)
    }
}

fn decode_token(token: &str) -> Result<Vec<u8>, CsrfError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(token.trim_end_matches('='))
        .map_err(|_| CsrfError::Verification)?;
    if bytes.len() != CSRF_SECRET_LEN {
        return Err(CsrfError::Verification);
    }
    Ok(bytes)
}

fn digest(secret: &[u8]) -> String {
    hex::encode(Sha256::digest(secret))
}

fn store_key(session_id: &str) -> String {
    format!("csrf:{}", session_id)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

fn is_safe_method(method: &str) -> bool {
    matches!(
        method.to_ascii_uppercase().as_str(),
        "GET" | "HEAD" | "OPTIONS"
    )
}
