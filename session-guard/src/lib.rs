//! Authentication and session-security core for cookie-based web backends.
//!
//! Guards run as a fixed pipeline on every request:
//! 1. Rate limiting by client address (and address + path for credential endpoints)
//! 2. Access token verification
//! 3. Fingerprint comparison against the token's issuing client
//! 4. CSRF double-submit check for state-changing requests
//! 5. Identity resolution through a TTL cache in front of the user directory
//!
//! The user directory and activity log are injected; shared counters and
//! secrets live behind a [`KeyValueStore`].
//!
//! ## Environment Variables
//! - `JWT_ACCESS_SECRET` (required): HMAC secret for access tokens
//! - `JWT_REFRESH_SECRET` (required): HMAC secret for refresh tokens
//! - `JWT_ACCESS_EXPIRY` / `JWT_REFRESH_EXPIRY` (optional): lifetimes, defaults 15m / 7d
//! - `APP_ENV` (optional): `development` or `production`, defaults to development
//! - `COOKIE_DOMAIN`, `COOKIE_SECURE`, `COOKIE_SAMESITE` (optional): cookie overrides
//! - `CSRF_ENABLED`, `CSRF_STORAGE` (optional): CSRF switch and `server`/`cookie` mode
//! - `RATE_LIMIT_MAX`, `AUTH_RATE_LIMIT_MAX` (optional): global and credential ceilings
//! - `SKIP_RATE_LIMIT` (optional, development only): disable both limiters
//! - `AUTH_PREFIX`, `TRUST_PROXY`, `FINGERPRINT_MODE` (optional)

#![deny(unsafe_code)]

pub mod audit;
pub mod auth;
pub mod config;
pub mod directory;
pub mod error;
pub mod http;
pub mod security;
pub mod store;
pub mod token;

pub use audit::{ActivityLog, ActivityLogError, AuditEvent, NoopActivityLog};
pub use auth::{AuthContext, AuthService, Credentials, RegisterRequest, RequestInfo, SessionGrant};
pub use config::{ConfigError, GuardConfig};
pub use directory::{DirectoryError, Identity, InMemoryDirectory, NewUser, UserDirectory, UserRecord};
pub use error::AuthError;
pub use store::{KeyValueStore, MemoryStore, StoreError};
