//! Claim sets carried by access and refresh tokens.

use serde::{Deserialize, Serialize};

use crate::directory::Identity;

/// Claims of a short-lived access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessClaims {
    pub id: String,
    pub email: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_id: Option<String>,
    pub name: String,
    pub session_id: String,

    /// Issued at (unix seconds)
    #[serde(rename = "iat")]
    pub issued_at: i64,

    /// Expiration time (unix seconds)
    #[serde(rename = "exp")]
    pub expires_at: i64,

    /// Request fingerprint captured at issuance
    #[serde(rename = "fpr", default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

impl AccessClaims {
    pub fn new(
        identity: &Identity,
        session_id: &str,
        fingerprint: Option<String>,
        issued_at: i64,
        ttl_secs: i64,
    ) -> Self {
        Self {
            id: identity.id.clone(),
            email: identity.email.clone(),
            role: identity.role.clone(),
            role_id: identity.role_id.clone(),
            name: identity.name.clone(),
            session_id: session_id.to_string(),
            issued_at,
            expires_at: issued_at + ttl_secs,
            fingerprint,
        }
    }

    /// Identity snapshot embedded in the token.
    pub fn identity(&self) -> Identity {
        Identity {
            id: self.id.clone(),
            email: self.email.clone(),
            role: self.role.clone(),
            role_id: self.role_id.clone(),
            name: self.name.clone(),
        }
    }
}

/// Claims of a long-lived refresh token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshClaims {
    pub id: String,
    pub session_id: String,
    /// Revocation counter value at issuance
    pub token_version: u64,
    #[serde(rename = "iat")]
    pub issued_at: i64,
    #[serde(rename = "exp")]
    pub expires_at: i64,
}

impl RefreshClaims {
    pub fn new(
        user_id: &str,
        session_id: &str,
        token_version: u64,
        issued_at: i64,
        ttl_secs: i64,
    ) -> Self {
        Self {
            id: user_id.to_string(),
            session_id: session_id.to_string(),
            token_version,
            issued_at,
            expires_at: issued_at + ttl_secs,
        }
    }
}
