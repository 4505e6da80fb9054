//! Guard configuration.
//!
//! A single immutable [`GuardConfig`] is built once at startup, either from
//! environment variables ([`GuardConfig::from_env`]) or a YAML file
//! ([`GuardConfig::from_file`]), validated, and handed to every component.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default access token lifetime (15 minutes)
const DEFAULT_ACCESS_TTL: Duration = Duration::from_secs(15 * 60);

/// Default refresh token lifetime (7 days)
const DEFAULT_REFRESH_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

/// Default rate-limit window (15 minutes)
const DEFAULT_RATE_LIMIT_WINDOW: Duration = Duration::from_secs(15 * 60);

/// Default identity cache lifetime (1 hour)
const DEFAULT_SESSION_CACHE_TTL: Duration = Duration::from_secs(3600);

const DEFAULT_AUTH_PREFIX: &str = "/api/auth";

/// Minimum secret length accepted in production
const MIN_PRODUCTION_SECRET_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "development" | "dev" => Some(Self::Development),
            "production" | "prod" => Some(Self::Production),
            _ => None,
        }
    }

    pub fn is_production(self) -> bool {
        self == Self::Production
    }
}

/// Cookie `SameSite` policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "strict" => Some(Self::Strict),
            "lax" => Some(Self::Lax),
            "none" => Some(Self::None),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "Strict",
            Self::Lax => "Lax",
            Self::None => "None",
        }
    }
}

/// Where the server-side counterpart of a CSRF token lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CsrfStorage {
    /// SHA-256 of the token kept in the key-value store per session
    #[default]
    Server,
    /// Token kept in an HTTP-only cookie and compared with the header
    Cookie,
}

/// How a fingerprint mismatch is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FingerprintMode {
    Off,
    /// Flag the context and emit an audit event
    #[default]
    Warn,
    /// Reject the request
    Enforce,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    pub access_secret: String,
    pub refresh_secret: String,
    #[serde(with = "humantime_serde", default = "default_access_ttl")]
    pub access_ttl: Duration,
    #[serde(with = "humantime_serde", default = "default_refresh_ttl")]
    pub refresh_ttl: Duration,
    /// Clock skew tolerance applied to expiry checks, in seconds
    #[serde(default)]
    pub leeway_secs: u64,
}

fn default_access_ttl() -> Duration {
    DEFAULT_ACCESS_TTL
}

fn default_refresh_ttl() -> Duration {
    DEFAULT_REFRESH_TTL
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieConfig {
    pub domain: Option<String>,
    /// Overrides the environment-derived `Secure` flag
    pub secure: Option<bool>,
    /// Overrides the environment-derived `SameSite` policy
    pub same_site: Option<SameSite>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CsrfConfig {
    pub enabled: bool,
    pub storage: CsrfStorage,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            storage: CsrfStorage::Server,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Global ceiling per client address; environment default when unset
    pub global_max: Option<u64>,
    /// Credential ceiling per address and path; environment default when unset
    pub credential_max: Option<u64>,
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    /// Disable both limiters. Ignored outside development.
    pub skip: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            global_max: None,
            credential_max: None,
            window: DEFAULT_RATE_LIMIT_WINDOW,
            skip: false,
        }
    }
}

/// Complete guard configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    #[serde(default)]
    pub environment: Environment,
    #[serde(default = "default_auth_prefix")]
    pub auth_prefix: String,
    /// Take the client address from `X-Forwarded-For`
    #[serde(default)]
    pub trust_proxy: bool,
    pub tokens: TokenConfig,
    #[serde(default)]
    pub cookies: CookieConfig,
    #[serde(default)]
    pub csrf: CsrfConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub fingerprint: FingerprintMode,
    #[serde(with = "humantime_serde", default = "default_session_cache_ttl")]
    pub session_cache_ttl: Duration,
}

fn default_auth_prefix() -> String {
    DEFAULT_AUTH_PREFIX.to_string()
}

fn default_session_cache_ttl() -> Duration {
    DEFAULT_SESSION_CACHE_TTL
}

impl GuardConfig {
    /// Development configuration with the given secrets and all defaults.
    pub fn new(access_secret: impl Into<String>, refresh_secret: impl Into<String>) -> Self {
        Self {
            environment: Environment::Development,
            auth_prefix: default_auth_prefix(),
            trust_proxy: false,
            tokens: TokenConfig {
                access_secret: access_secret.into(),
                refresh_secret: refresh_secret.into(),
                access_ttl: DEFAULT_ACCESS_TTL,
                refresh_ttl: DEFAULT_REFRESH_TTL,
                leeway_secs: 0,
            },
            cookies: CookieConfig::default(),
            csrf: CsrfConfig::default(),
            rate_limit: RateLimitConfig::default(),
            fingerprint: FingerprintMode::default(),
            session_cache_ttl: DEFAULT_SESSION_CACHE_TTL,
        }
    }

    /// Load configuration from environment variables and validate it.
    pub fn from_env() -> Result<Self, ConfigError> {
        let access_secret = required_var("JWT_ACCESS_SECRET")?;
        let refresh_secret = required_var("JWT_REFRESH_SECRET")?;

        let mut config = Self::new(access_secret, refresh_secret);

        if let Some(value) = optional_var("APP_ENV") {
            config.environment =
                Environment::parse(&value).ok_or_else(|| invalid("APP_ENV", &value))?;
        }
        if let Some(ttl) = duration_var("JWT_ACCESS_EXPIRY")? {
            config.tokens.access_ttl = ttl;
        }
        if let Some(ttl) = duration_var("JWT_REFRESH_EXPIRY")? {
            config.tokens.refresh_ttl = ttl;
        }
        if let Some(leeway) = optional_var("JWT_LEEWAY_SECS") {
            config.tokens.leeway_secs = leeway
                .parse()
                .map_err(|_| invalid("JWT_LEEWAY_SECS", &leeway))?;
        }

        config.cookies.domain = optional_var("COOKIE_DOMAIN");
        config.cookies.secure = optional_var("COOKIE_SECURE").map(|v| is_truthy(&v));
        if let Some(value) = optional_var("COOKIE_SAMESITE") {
            config.cookies.same_site =
                Some(SameSite::parse(&value).ok_or_else(|| invalid("COOKIE_SAMESITE", &value))?);
        }

        if let Some(value) = optional_var("CSRF_ENABLED") {
            config.csrf.enabled = is_truthy(&value);
        }
        if let Some(value) = optional_var("CSRF_STORAGE") {
            config.csrf.storage = match value.to_ascii_lowercase().as_str() {
                "server" => CsrfStorage::Server,
                "cookie" => CsrfStorage::Cookie,
                _ => return Err(invalid("CSRF_STORAGE", &value)),
            };
        }

        config.rate_limit.global_max = count_var("RATE_LIMIT_MAX")?;
        config.rate_limit.credential_max = count_var("AUTH_RATE_LIMIT_MAX")?;
        if let Some(window) = duration_var("RATE_LIMIT_WINDOW")? {
            config.rate_limit.window = window;
        }
        config.rate_limit.skip = optional_var("SKIP_RATE_LIMIT")
            .map(|v| is_truthy(&v))
            .unwrap_or(false);

        if let Some(prefix) = optional_var("AUTH_PREFIX") {
            config.auth_prefix = prefix;
        }
        config.trust_proxy = optional_var("TRUST_PROXY")
            .map(|v| is_truthy(&v))
            .unwrap_or(false);

        if let Some(value) = optional_var("FINGERPRINT_MODE") {
            config.fingerprint = match value.to_ascii_lowercase().as_str() {
                "off" => FingerprintMode::Off,
                "warn" => FingerprintMode::Warn,
                "enforce" => FingerprintMode::Enforce,
                _ => return Err(invalid("FINGERPRINT_MODE", &value)),
            };
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file and validate it.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would weaken the guards.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tokens.access_secret.is_empty() {
            return Err(invalid_reason("tokens.access_secret", "must not be empty"));
        }
        if self.tokens.refresh_secret.is_empty() {
            return Err(invalid_reason("tokens.refresh_secret", "must not be empty"));
        }
        if self.tokens.access_ttl.is_zero() || self.tokens.refresh_ttl.is_zero() {
            return Err(invalid_reason("tokens", "token lifetimes must be non-zero"));
        }

        if self.environment.is_production() {
            if self.tokens.access_secret.len() < MIN_PRODUCTION_SECRET_LEN
                || self.tokens.refresh_secret.len() < MIN_PRODUCTION_SECRET_LEN
            {
                return Err(invalid_reason(
                    "tokens",
                    "secrets must be at least 32 bytes in production",
                ));
            }
            if self.tokens.access_secret == self.tokens.refresh_secret {
                return Err(invalid_reason(
                    "tokens",
                    "access and refresh secrets must differ in production",
                ));
            }
        }

        if self.same_site() == SameSite::None && !self.cookie_secure() {
            return Err(invalid_reason(
                "cookies.same_site",
                "SameSite=None requires Secure cookies",
            ));
        }

        if !self.auth_prefix.starts_with('/') || self.auth_prefix.ends_with('/') {
            return Err(invalid_reason(
                "auth_prefix",
                "must start with '/' and not end with '/'",
            ));
        }

        if self.rate_limit.window.is_zero() {
            return Err(invalid_reason("rate_limit.window", "must be non-zero"));
        }

        Ok(())
    }

    pub fn cookie_secure(&self) -> bool {
        self.cookies
            .secure
            .unwrap_or(self.environment.is_production())
    }

    pub fn same_site(&self) -> SameSite {
        self.cookies.same_site.unwrap_or(if self.environment.is_production() {
            SameSite::Strict
        } else {
            SameSite::Lax
        })
    }

    pub fn global_rate_limit(&self) -> u64 {
        self.rate_limit
            .global_max
            .unwrap_or(if self.environment.is_production() {
                1000
            } else {
                10_000
            })
    }

    pub fn credential_rate_limit(&self) -> u64 {
        self.rate_limit
            .credential_max
            .unwrap_or(if self.environment.is_production() {
                20
            } else {
                100
            })
    }

    /// Rate limiting may only be switched off in development.
    pub fn skip_rate_limit(&self) -> bool {
        self.rate_limit.skip && !self.environment.is_production()
    }

    /// Full path of an endpoint in the auth group, e.g. `/api/auth/login`.
    pub fn auth_path(&self, endpoint: &str) -> String {
        format!("{}{}", self.auth_prefix, endpoint)
    }
}

fn optional_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn required_var(key: &str) -> Result<String, ConfigError> {
    optional_var(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

fn duration_var(key: &str) -> Result<Option<Duration>, ConfigError> {
    optional_var(key)
        .map(|value| {
            humantime::parse_duration(&value).map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                reason: e.to_string(),
            })
        })
        .transpose()
}

fn count_var(key: &str) -> Result<Option<u64>, ConfigError> {
    optional_var(key)
        .map(|value| value.parse().map_err(|_| invalid(key, &value)))
        .transpose()
}

/// Only explicit "true" or "1" enable a flag.
fn is_truthy(value: &str) -> bool {
    value == "true" || value == "1"
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: format!("unrecognised value '{}'", value),
    }
}

fn invalid_reason(key: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}
