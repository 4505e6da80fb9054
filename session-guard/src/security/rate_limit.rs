//! Rate limiting for abuse and brute force protection.
//!
//! Two independent limiters run on every request:
//!
//! - **Global**: keyed by client address, generous ceiling sized for a chatty
//!   single-page client. Credential-submission endpoints are exempt because
//!   they carry their own limiter.
//! - **Credential**: keyed by client address *and* path so login and
//!   registration keep separate budgets. Session checks, refresh and logout
//!   are exempt so browser polling never starves them.
//!
//! ## Strategy
//!
//! Each key owns a counter window that opens at its first request and
//! closes a fixed duration later. The counter is bumped with a single atomic
//! increment-and-read on the backing store before any other work happens,
//! so concurrent racers can never push more than `max_requests` through.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::GuardConfig;
use crate::store::KeyValueStore;

/// Rate limit errors
#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("Rate limit exceeded ({scope}): try again in {retry_after} seconds")]
    Exceeded {
        scope: RateLimitScope,
        limit: u64,
        retry_after: u64,
    },
}

/// Which limiter produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitScope {
    Global,
    Credential,
}

impl RateLimitScope {
    fn key_prefix(self) -> &'static str {
        match self {
            Self::Global => "rl:global",
            Self::Credential => "rl:auth",
        }
    }
}

impl std::fmt::Display for RateLimitScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Global => write!(f, "global"),
            Self::Credential => write!(f, "credential"),
        }
    }
}

/// Which paths a limiter counts.
#[derive(Debug, Clone)]
pub enum PathFilter {
    /// Every path except the listed ones
    AllExcept(Vec<String>),
    /// Paths under `prefix`, except the listed ones
    PrefixExcept { prefix: String, exempt: Vec<String> },
}

impl PathFilter {
    fn matches(&self, path: &str) -> bool {
        match self {
            Self::AllExcept(exempt) => !exempt.iter().any(|p| p == path),
            Self::PrefixExcept { prefix, exempt } => {
                is_under_prefix(path, prefix) && !exempt.iter().any(|p| p == path)
            }
        }
    }
}

fn is_under_prefix(path: &str, prefix: &str) -> bool {
    path == prefix
        || path
            .strip_prefix(prefix)
            .map(|rest| rest.starts_with('/'))
            .unwrap_or(false)
}

/// Limiter policy
#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    pub max_requests: u64,
    pub window: Duration,
    pub paths: PathFilter,
    /// Include the request path in the counter key
    pub key_by_path: bool,
}

/// Outcome of an allowed request, for `RateLimit-*` response headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub scope: RateLimitScope,
    pub limit: u64,
    pub remaining: u64,
    pub reset_after: Duration,
}

/// Store-backed sliding window limiter.
pub struct RateLimiter {
    scope: RateLimitScope,
    policy: RateLimitPolicy,
    store: Arc<dyn KeyValueStore>,
    enabled: bool,
}

impl RateLimiter {
    pub fn new(scope: RateLimitScope, policy: RateLimitPolicy, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            scope,
            policy,
            store,
            enabled: true,
        }
    }

    /// Per-address limiter for all traffic except credential submission.
    pub fn global(config: &GuardConfig, store: Arc<dyn KeyValueStore>) -> Self {
        let policy = RateLimitPolicy {
            max_requests: config.global_rate_limit(),
            window: config.rate_limit.window,
            paths: PathFilter::AllExcept(vec![
                config.auth_path("/login"),
                config.auth_path("/register"),
            ]),
            key_by_path: false,
        };
        Self::new(RateLimitScope::Global, policy, store).enabled(!config.skip_rate_limit())
    }

    /// Per-address-and-path limiter for the auth endpoint group.
    pub fn credential(config: &GuardConfig, store: Arc<dyn KeyValueStore>) -> Self {
        let policy = RateLimitPolicy {
            max_requests: config.credential_rate_limit(),
            window: config.rate_limit.window,
            paths: PathFilter::PrefixExcept {
                prefix: config.auth_prefix.clone(),
                exempt: vec![
                    config.auth_path("/me"),
                    config.auth_path("/refresh"),
                    config.auth_path("/logout"),
                    config.auth_path("/logout-all"),
                ],
            },
            key_by_path: true,
        };
        Self::new(RateLimitScope::Credential, policy, store).enabled(!config.skip_rate_limit())
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn scope(&self) -> RateLimitScope {
        self.scope
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Returns true if this limiter counts requests to `path`.
    pub fn applies_to(&self, path: &str) -> bool {
        self.enabled && self.policy.paths.matches(path)
    }

    /// Count a request and decide whether it may proceed.
    ///
    /// Returns `Ok(None)` when the path is exempt, the limiter is disabled,
    /// or the store is unreachable (the limiter fails open).
    pub fn check(
        &self,
        client_addr: &str,
        path: &str,
    ) -> Result<Option<RateLimitDecision>, RateLimitError> {
        if !self.applies_to(path) {
            return Ok(None);
        }

        let key = self.key_for(client_addr, path);
        let window = match self.store.incr(&key, self.policy.window) {
            Ok(window) => window,
            Err(e) => {
                tracing::warn!(
                    scope = %self.scope,
                    error = %e,
                    "Rate limit store unavailable, allowing request"
                );
                return Ok(None);
            }
        };

        if window.count > self.policy.max_requests {
            return Err(RateLimitError::Exceeded {
                scope: self.scope,
                limit: self.policy.max_requests,
                retry_after: retry_after_secs(window.resets_in),
            });
        }

        Ok(Some(RateLimitDecision {
            scope: self.scope,
            limit: self.policy.max_requests,
            remaining: self.policy.max_requests - window.count,
            reset_after: window.resets_in,
        }))
    }

    fn key_for(&self, client_addr: &str, path: &str) -> String {
        if self.policy.key_by_path {
            format!("{}:{}:{}", self.scope.key_prefix(), client_addr, path)
        } else {
            format!("{}:{}", self.scope.key_prefix(), client_addr)
        }
    }
}

/// Whole seconds until reset, never zero while the window is still open.
fn retry_after_secs(resets_in: Duration) -> u64 {
    let secs = resets_in.as_secs();
    if resets_in.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreError, WindowCount};

    fn store() -> Arc<dyn KeyValueStore> {
        Arc::new(MemoryStore::new())
    }

    fn test_policy(max_requests: u64, window: Duration) -> RateLimitPolicy {
        RateLimitPolicy {
            max_requests,
            window,
            paths: PathFilter::AllExcept(vec!["/api/auth/login".to_string()]),
            key_by_path: false,
        }
    }

    fn test_config() -> GuardConfig {
        let mut config = GuardConfig::new("a", "b");
        config.rate_limit.global_max = Some(5);
        config.rate_limit.credential_max = Some(3);
        config
    }

    #[test]
    fn test_allows_up_to_ceiling() {
        let limiter = RateLimiter::new(
            RateLimitScope::Global,
            test_policy(3, Duration::from_secs(60)),
            store(),
        );

        for expected_remaining in [2, 1, 0] {
            let decision = limiter.check("10.0.0.1", "/api/projects").unwrap().unwrap();
            assert_eq!(decision.remaining, expected_remaining);
            assert_eq!(decision.limit, 3);
        }

        let result = limiter.check("10.0.0.1", "/api/projects");
        match result {
            Err(RateLimitError::Exceeded {
                scope, retry_after, ..
            }) => {
                assert_eq!(scope, RateLimitScope::Global);
                assert!(retry_after >= 1 && retry_after <= 60);
            }
            other => panic!("expected rate limit, got {:?}", other),
        }
    }

    #[test]
    fn test_different_clients_independent() {
        let limiter = RateLimiter::new(
            RateLimitScope::Global,
            test_policy(1, Duration::from_secs(60)),
            store(),
        );

        assert!(limiter.check("10.0.0.1", "/x").is_ok());
        assert!(limiter.check("10.0.0.1", "/x").is_err());
        assert!(limiter.check("10.0.0.2", "/x").is_ok());
    }

    #[test]
    fn test_window_resets_after_elapsed_time() {
        let limiter = RateLimiter::new(
            RateLimitScope::Global,
            test_policy(2, Duration::from_millis(30)),
            store(),
        );

        assert!(limiter.check("10.0.0.1", "/x").is_ok());
        assert!(limiter.check("10.0.0.1", "/x").is_ok());
        assert!(limiter.check("10.0.0.1", "/x").is_err());

        std::thread::sleep(Duration::from_millis(60));

        let decision = limiter.check("10.0.0.1", "/x").unwrap().unwrap();
        assert_eq!(decision.remaining, 1);
    }

    #[test]
    fn test_global_exempts_credential_endpoints() {
        let config = test_config();
        let limiter = RateLimiter::global(&config, store());

        assert!(!limiter.applies_to("/api/auth/login"));
        assert!(!limiter.applies_to("/api/auth/register"));
        assert!(limiter.applies_to("/api/auth/me"));
        assert!(limiter.applies_to("/api/projects"));

        for _ in 0..20 {
            assert!(limiter.check("10.0.0.1", "/api/auth/login").unwrap().is_none());
        }
    }

    #[test]
    fn test_credential_limiter_scope_and_exemptions() {
        let config = test_config();
        let limiter = RateLimiter::credential(&config, store());

        assert!(limiter.applies_to("/api/auth/login"));
        assert!(limiter.applies_to("/api/auth/register"));
        for exempt in ["/api/auth/me", "/api/auth/refresh", "/api/auth/logout", "/api/auth/logout-all"] {
            assert!(!limiter.applies_to(exempt), "{} must be exempt", exempt);
        }
        assert!(!limiter.applies_to("/api/projects"));
        assert!(!limiter.applies_to("/api/authors"));
    }

    #[test]
    fn test_credential_budget_is_per_path() {
        let config = test_config();
        let limiter = RateLimiter::credential(&config, store());

        for _ in 0..3 {
            assert!(limiter.check("10.0.0.1", "/api/auth/login").is_ok());
        }
        assert!(matches!(
            limiter.check("10.0.0.1", "/api/auth/login"),
            Err(RateLimitError::Exceeded {
                scope: RateLimitScope::Credential,
                ..
            })
        ));

        // Registration keeps its own budget
        assert!(limiter.check("10.0.0.1", "/api/auth/register").is_ok());
    }

    #[test]
    fn test_skip_flag_disables_in_development() {
        let mut config = test_config();
        config.rate_limit.skip = true;
        let limiter = RateLimiter::credential(&config, store());

        for _ in 0..10 {
            assert!(limiter.check("10.0.0.1", "/api/auth/login").unwrap().is_none());
        }
    }

    #[test]
    fn test_concurrent_racers_cannot_exceed_ceiling() {
        let limiter = Arc::new(RateLimiter::new(
            RateLimitScope::Global,
            test_policy(20, Duration::from_secs(60)),
            store(),
        ));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || {
                    (0..10)
                        .filter(|_| limiter.check("10.0.0.9", "/x").is_ok())
                        .count()
                })
            })
            .collect();

        let allowed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(allowed, 20);
    }

    struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::Backend("down".into()))
        }
        fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), StoreError> {
            Err(StoreError::Backend("down".into()))
        }
        fn incr(&self, _key: &str, _window: Duration) -> Result<WindowCount, StoreError> {
            Err(StoreError::Backend("down".into()))
        }
        fn delete(&self, _key: &str) -> Result<bool, StoreError> {
            Err(StoreError::Backend("down".into()))
        }
    }

    #[test]
    fn test_store_failure_fails_open() {
        let limiter = RateLimiter::new(
            RateLimitScope::Global,
            test_policy(1, Duration::from_secs(60)),
            Arc::new(BrokenStore),
        );

        for _ in 0..5 {
            assert!(limiter.check("10.0.0.1", "/x").unwrap().is_none());
        }
    }

    #[test]
    fn test_retry_after_rounds_up() {
        assert_eq!(retry_after_secs(Duration::from_millis(1500)), 2);
        assert_eq!(retry_after_secs(Duration::from_secs(30)), 30);
        assert_eq!(retry_after_secs(Duration::from_millis(1)), 1);
        assert_eq!(retry_after_secs(Duration::ZERO), 1);
    }
}
