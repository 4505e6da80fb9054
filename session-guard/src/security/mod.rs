//! Request-level security controls.
//!
//! - Rate limiting for abuse and credential-stuffing protection
//! - CSRF double-submit protection for state-changing requests
//! - Request fingerprinting for session-hijack detection
//! - Identity caching to spare directory round trips
//! - Session ID and secret generation with cryptographic randomness

pub mod cache;
pub mod csrf;
pub mod fingerprint;
pub mod rate_limit;
pub mod session;

pub use cache::{CachedIdentity, SessionCache};
pub use csrf::{CsrfCheck, CsrfError, CsrfGuard, CSRF_COOKIE, CSRF_HEADER};
pub use fingerprint::{generate_fingerprint, verify_fingerprint, RequestMetadata};
pub use rate_limit::{RateLimitDecision, RateLimitError, RateLimitScope, RateLimiter};
pub use session::{generate_secret, generate_session_id};
