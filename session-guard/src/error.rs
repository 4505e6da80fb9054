//! Request-terminal authentication errors.
//!
//! Every variant maps to a stable machine-readable code and HTTP status.
//! The `Display` text may carry internal detail for logs; clients only ever
//! see [`AuthError::public_message`].

use thiserror::Error;

use crate::directory::DirectoryError;
use crate::security::{CsrfError, RateLimitError, RateLimitScope};
use crate::store::StoreError;
use crate::token::TokenError;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Access token expired")]
    TokenExpired,

    #[error("Malformed token: {0}")]
    TokenMalformed(String),

    #[error("Refresh token revoked")]
    TokenRevoked,

    #[error("CSRF token missing")]
    CsrfMissing,

    #[error("CSRF token invalid")]
    CsrfInvalid,

    #[error("CSRF verification failed")]
    CsrfVerification,

    #[error("Rate limit exceeded ({scope}), retry after {retry_after}s")]
    RateLimitExceeded {
        scope: RateLimitScope,
        limit: u64,
        retry_after: u64,
    },

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Session fingerprint mismatch")]
    FingerprintMismatch,

    #[error("Email already registered")]
    EmailTaken,

    #[error("Directory error: {0}")]
    Directory(DirectoryError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Token signing failed: {0}")]
    Signing(String),
}

impl AuthError {
    /// Stable code returned in the JSON error body.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::TokenMalformed(_) => "TOKEN_MALFORMED",
            Self::TokenRevoked => "TOKEN_REVOKED",
            Self::CsrfMissing => "CSRF_TOKEN_MISSING",
            Self::CsrfInvalid => "CSRF_TOKEN_INVALID",
            Self::CsrfVerification => "CSRF_TOKEN_ERROR",
            Self::RateLimitExceeded {
                scope: RateLimitScope::Global,
                ..
            } => "RATE_LIMIT_EXCEEDED",
            Self::RateLimitExceeded {
                scope: RateLimitScope::Credential,
                ..
            } => "AUTH_RATE_LIMIT_EXCEEDED",
            Self::NotAuthenticated => "NOT_AUTHENTICATED",
            Self::UserNotFound(_) => "USER_NOT_FOUND",
            Self::FingerprintMismatch => "SESSION_FINGERPRINT_MISMATCH",
            Self::EmailTaken => "EMAIL_TAKEN",
            Self::Directory(_) | Self::Store(_) | Self::Signing(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::InvalidCredentials
            | Self::TokenExpired
            | Self::TokenMalformed(_)
            | Self::TokenRevoked
            | Self::NotAuthenticated
            | Self::UserNotFound(_)
            | Self::FingerprintMismatch => 401,
            Self::CsrfMissing | Self::CsrfInvalid | Self::CsrfVerification => 403,
            Self::EmailTaken => 409,
            Self::RateLimitExceeded { .. } => 429,
            Self::Directory(_) | Self::Store(_) | Self::Signing(_) => 500,
        }
    }

    /// Client-facing message. Identical for every cause sharing a code.
    pub fn public_message(&self) -> String {
        match self {
            Self::InvalidCredentials => "Invalid email or password".to_string(),
            // Validation detail describes the client's own input
            Self::Validation(detail) => detail.clone(),
            Self::TokenExpired => "Access token expired".to_string(),
            Self::TokenMalformed(_) => "Invalid token".to_string(),
            Self::TokenRevoked => "Session has been revoked".to_string(),
            Self::CsrfMissing => "CSRF token missing".to_string(),
            Self::CsrfInvalid => "CSRF token invalid".to_string(),
            Self::CsrfVerification => "CSRF token verification failed".to_string(),
            Self::RateLimitExceeded { .. } => {
                "Too many requests, please try again later".to_string()
            }
            Self::NotAuthenticated => "Authentication required".to_string(),
            Self::UserNotFound(_) => "User not found".to_string(),
            Self::FingerprintMismatch => "Session could not be verified".to_string(),
            Self::EmailTaken => "Email is already registered".to_string(),
            Self::Directory(_) | Self::Store(_) | Self::Signing(_) => {
                "Internal server error".to_string()
            }
        }
    }

    /// Seconds the client should wait, for rate-limit rejections.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::RateLimitExceeded { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    pub fn is_server_error(&self) -> bool {
        self.status_code() >= 500
    }
}

impl From<TokenError> for AuthError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Expired => Self::TokenExpired,
            TokenError::Malformed(detail) => Self::TokenMalformed(detail),
            TokenError::Signing(detail) => Self::Signing(detail),
        }
    }
}

impl From<RateLimitError> for AuthError {
    fn from(e: RateLimitError) -> Self {
        match e {
            RateLimitError::Exceeded {
                scope,
                limit,
                retry_after,
            } => Self::RateLimitExceeded {
                scope,
                limit,
                retry_after,
            },
        }
    }
}

impl From<CsrfError> for AuthError {
    fn from(e: CsrfError) -> Self {
        match e {
            CsrfError::Missing => Self::CsrfMissing,
            CsrfError::Invalid => Self::CsrfInvalid,
            CsrfError::Verification => Self::CsrfVerification,
            CsrfError::Store(e) => {
                tracing::warn!(error = %e, "CSRF store error");
                Self::CsrfVerification
            }
        }
    }
}

impl From<DirectoryError> for AuthError {
    fn from(e: DirectoryError) -> Self {
        match e {
            DirectoryError::EmailTaken(_) => Self::EmailTaken,
            DirectoryError::NotFound(id) => Self::UserNotFound(id),
            other => Self::Directory(other),
        }
    }
}
