//! Audit logging for authentication and session events.
//!
//! Every security-relevant decision produces an [`AuditEvent`]. Events are
//! written to:
//! 1. The `audit` tracing target as a single JSON line - for log shipping
//! 2. The injected [`ActivityLog`] - for the application's persistent store
//!
//! Activity log failures never affect the request: they are logged and dropped.

use serde::Serialize;
use thiserror::Error;

/// Tracing target for audit records
pub const AUDIT_TARGET: &str = "audit";

#[derive(Debug, Error)]
#[error("Activity log write failed: {0}")]
pub struct ActivityLogError(pub String);

/// Persistent sink for audit events.
pub trait ActivityLog: Send + Sync {
    fn record(&self, event: &AuditEvent) -> Result<(), ActivityLogError>;
}

/// Sink that keeps nothing; audit events still reach the tracing target.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopActivityLog;

impl ActivityLog for NoopActivityLog {
    fn record(&self, _event: &AuditEvent) -> Result<(), ActivityLogError> {
        Ok(())
    }
}

/// Audit events for the authentication core.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum AuditEvent {
    /// Credentials accepted and a session issued
    #[serde(rename = "LOGIN_SUCCESS")]
    LoginSuccess {
        timestamp: String,
        user_id: String,
        session_id: String,
        client_addr: Option<String>,
    },

    /// Credentials rejected
    #[serde(rename = "LOGIN_FAILED")]
    LoginFailed {
        timestamp: String,
        email: String,
        client_addr: Option<String>,
        reason: String,
    },

    /// New account created
    #[serde(rename = "USER_REGISTERED")]
    UserRegistered {
        timestamp: String,
        user_id: String,
        session_id: String,
        client_addr: Option<String>,
    },

    /// Access token re-minted from a refresh token
    #[serde(rename = "TOKEN_REFRESHED")]
    TokenRefreshed {
        timestamp: String,
        user_id: String,
        previous_session_id: String,
        session_id: String,
    },

    /// Refresh token refused
    #[serde(rename = "REFRESH_REJECTED")]
    RefreshRejected {
        timestamp: String,
        user_id: Option<String>,
        client_addr: Option<String>,
        reason: String,
    },

    /// Single session ended
    #[serde(rename = "LOGOUT")]
    Logout {
        timestamp: String,
        user_id: String,
        session_id: String,
    },

    /// Revocation counter bumped, every refresh token invalidated
    #[serde(rename = "LOGOUT_ALL")]
    LogoutAll {
        timestamp: String,
        user_id: String,
        session_id: String,
        token_version: u64,
    },

    /// Request refused by a rate limiter
    #[serde(rename = "RATE_LIMITED")]
    RateLimited {
        timestamp: String,
        client_addr: String,
        path: String,
        scope: String,
        retry_after: u64,
    },

    /// State-changing request refused by the CSRF guard
    #[serde(rename = "CSRF_REJECTED")]
    CsrfRejected {
        timestamp: String,
        user_id: Option<String>,
        session_id: Option<String>,
        method: String,
        path: String,
        code: String,
    },

    /// Request metadata differs from the token's fingerprint
    #[serde(rename = "FINGERPRINT_MISMATCH")]
    FingerprintMismatch {
        timestamp: String,
        user_id: String,
        session_id: String,
        client_addr: Option<String>,
        enforced: bool,
    },
}

impl AuditEvent {
    pub fn login_success(user_id: &str, session_id: &str, client_addr: Option<&str>) -> Self {
        Self::LoginSuccess {
            timestamp: iso_timestamp(),
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            client_addr: client_addr.map(String::from),
        }
    }

    pub fn login_failed(email: &str, client_addr: Option<&str>, reason: &str) -> Self {
        Self::LoginFailed {
            timestamp: iso_timestamp(),
            email: email.to_string(),
            client_addr: client_addr.map(String::from),
            reason: reason.to_string(),
        }
    }

    pub fn user_registered(user_id: &str, session_id: &str, client_addr: Option<&str>) -> Self {
        Self::UserRegistered {
            timestamp: iso_timestamp(),
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            client_addr: client_addr.map(String::from),
        }
    }

    pub fn token_refreshed(user_id: &str, previous_session_id: &str, session_id: &str) -> Self {
        Self::TokenRefreshed {
            timestamp: iso_timestamp(),
            user_id: user_id.to_string(),
            previous_session_id: previous_session_id.to_string(),
            session_id: session_id.to_string(),
        }
    }

    pub fn refresh_rejected(user_id: Option<&str>, client_addr: Option<&str>, reason: &str) -> Self {
        Self::RefreshRejected {
            timestamp: iso_timestamp(),
            user_id: user_id.map(String::from),
            client_addr: client_addr.map(String::from),
            reason: reason.to_string(),
        }
    }

    pub fn logout(user_id: &str, session_id: &str) -> Self {
        Self::Logout {
            timestamp: iso_timestamp(),
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
        }
    }

    pub fn logout_all(user_id: &str, session_id: &str, token_version: u64) -> Self {
        Self::LogoutAll {
            timestamp: iso_timestamp(),
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            token_version,
        }
    }

    pub fn rate_limited(client_addr: &str, path: &str, scope: &str, retry_after: u64) -> Self {
        Self::RateLimited {
            timestamp: iso_timestamp(),
            client_addr: client_addr.to_string(),
            path: path.to_string(),
            scope: scope.to_string(),
            retry_after,
        }
    }

    pub fn csrf_rejected(
        user_id: Option<&str>,
        session_id: Option<&str>,
        method: &str,
        path: &str,
        code: &str,
    ) -> Self {
        Self::CsrfRejected {
            timestamp: iso_timestamp(),
            user_id: user_id.map(String::from),
            session_id: session_id.map(String::from),
            method: method.to_string(),
            path: path.to_string(),
            code: code.to_string(),
        }
    }

    pub fn fingerprint_mismatch(
        user_id: &str,
        session_id: &str,
        client_addr: Option<&str>,
        enforced: bool,
    ) -> Self {
        Self::FingerprintMismatch {
            timestamp: iso_timestamp(),
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            client_addr: client_addr.map(String::from),
            enforced,
        }
    }

    /// Emit on the audit target and forward to `sink`.
    pub fn log(&self, sink: &dyn ActivityLog) {
        match serde_json::to_string(self) {
            Ok(json) => tracing::info!(target: AUDIT_TARGET, event = self.event_type(), "{}", json),
            Err(e) => tracing::warn!(event = self.event_type(), error = %e, "Failed to encode audit event"),
        }

        if let Err(e) = sink.record(self) {
            tracing::warn!(event = self.event_type(), error = %e, "Dropping audit event");
        }
    }

    /// Get the event type as a string.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::LoginSuccess { .. } => "LOGIN_SUCCESS",
            Self::LoginFailed { .. } => "LOGIN_FAILED",
            Self::UserRegistered { .. } => "USER_REGISTERED",
            Self::TokenRefreshed { .. } => "TOKEN_REFRESHED",
            Self::RefreshRejected { .. } => "REFRESH_REJECTED",
            Self::Logout { .. } => "LOGOUT",
            Self::LogoutAll { .. } => "LOGOUT_ALL",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::CsrfRejected { .. } => "CSRF_REJECTED",
            Self::FingerprintMismatch { .. } => "FINGERPRINT_MISMATCH",
        }
    }
}

/// Get the current timestamp in RFC 3339 format.
fn iso_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}
