//! Request pipeline and session flows.
//!
//! [`AuthService`] wires the guards together and owns the endpoint flows.
//! It is transport-agnostic: the HTTP layer extracts a [`RequestInfo`],
//! calls into the service, and turns the results into cookies and status
//! codes.
//!
//! ## Pipeline
//!
//! 1. [`AuthService::check_rate_limit`] - global then credential limiter
//! 2. [`AuthService::authorize`] - access token, fingerprint, CSRF on
//!    state-changing requests, then identity
//!
//! [`AuthService::authenticate`] and [`AuthService::verify_csrf`] run the
//! stages separately for callers that need only one of them.
//!
//! Flows that mint credentials return a [`SessionGrant`]. Cookies are set
//! from the grant only, so a flow that fails part-way never half-commits.

use serde::Deserialize;
use std::sync::Arc;

use crate::audit::{ActivityLog, AuditEvent, NoopActivityLog};
use crate::config::{FingerprintMode, GuardConfig};
use crate::directory::{Identity, NewUser, UserDirectory};
use crate::error::AuthError;
use crate::security::{
    generate_fingerprint, generate_session_id, verify_fingerprint, CsrfCheck, CsrfError, CsrfGuard,
    RateLimitDecision, RateLimiter, RequestMetadata, SessionCache,
};
use crate::store::KeyValueStore;
use crate::token::{AccessClaims, IssuedToken, TokenService};

/// Minimum accepted password length at registration
const MIN_PASSWORD_LEN: usize = 8;

/// Address used for rate limiting when the transport reports none
const UNKNOWN_CLIENT: &str = "unknown";

/// Transport-neutral view of an inbound request.
#[derive(Debug, Clone, Default)]
pub struct RequestInfo {
    pub method: String,
    pub path: String,
    pub client_addr: Option<String>,
    pub metadata: RequestMetadata,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub csrf_header: Option<String>,
    pub csrf_cookie: Option<String>,
}

impl RequestInfo {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_client_addr(mut self, addr: impl Into<String>) -> Self {
        self.client_addr = Some(addr.into());
        self
    }

    pub fn with_metadata(mut self, metadata: RequestMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn with_refresh_token(mut self, token: impl Into<String>) -> Self {
        self.refresh_token = Some(token.into());
        self
    }

    pub fn with_csrf_header(mut self, token: impl Into<String>) -> Self {
        self.csrf_header = Some(token.into());
        self
    }

    pub fn with_csrf_cookie(mut self, token: impl Into<String>) -> Self {
        self.csrf_cookie = Some(token.into());
        self
    }

    fn client(&self) -> &str {
        self.client_addr.as_deref().unwrap_or(UNKNOWN_CLIENT)
    }
}

/// Authenticated request context handed to downstream handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub identity: Identity,
    pub session_id: String,
    /// Fingerprint of the current request
    pub fingerprint: String,
    /// False when the request does not match the token's fingerprint
    pub fingerprint_matched: bool,
    /// Access token expiry (unix seconds)
    pub expires_at: i64,
}

/// Credentials minted by login, register or refresh.
#[derive(Debug, Clone)]
pub struct SessionGrant {
    pub identity: Identity,
    pub session_id: String,
    pub access: IssuedToken,
    /// Absent on refresh: refresh tokens are reused until expiry or revoke-all
    pub refresh: Option<IssuedToken>,
    /// Absent when CSRF protection is disabled
    pub csrf_token: Option<String>,
}

/// Login request body.
#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

/// Self-registration request body. Role assignment is not accepted here.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: String,
}

/// Access token and fingerprint checks passed; identity not yet resolved.
struct VerifiedSession {
    claims: AccessClaims,
    fingerprint: String,
    fingerprint_matched: bool,
}

pub struct AuthService {
    config: GuardConfig,
    tokens: TokenService,
    cache: SessionCache,
    csrf: CsrfGuard,
    global_limiter: RateLimiter,
    credential_limiter: RateLimiter,
    directory: Arc<dyn UserDirectory>,
    activity: Arc<dyn ActivityLog>,
}

impl AuthService {
    pub fn new(
        config: GuardConfig,
        directory: Arc<dyn UserDirectory>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            tokens: TokenService::new(&config.tokens),
            cache: SessionCache::new(store.clone(), config.session_cache_ttl),
            csrf: CsrfGuard::new(&config, store.clone()),
            global_limiter: RateLimiter::global(&config, store.clone()),
            credential_limiter: RateLimiter::credential(&config, store),
            directory,
            activity: Arc::new(NoopActivityLog),
            config,
        }
    }

    pub fn with_activity_log(mut self, activity: Arc<dyn ActivityLog>) -> Self {
        self.activity = activity;
        self
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    pub fn csrf(&self) -> &CsrfGuard {
        &self.csrf
    }

    pub fn cache(&self) -> &SessionCache {
        &self.cache
    }

    /// Count the request against both limiters.
    ///
    /// Returns the decisions of the limiters that applied, for response headers.
    pub fn check_rate_limit(&self, req: &RequestInfo) -> Result<Vec<RateLimitDecision>, AuthError> {
        let mut decisions = Vec::with_capacity(2);

        for limiter in [&self.global_limiter, &self.credential_limiter] {
            match limiter.check(req.client(), &req.path) {
                Ok(Some(decision)) => decisions.push(decision),
                Ok(None) => {}
                Err(e) => {
                    let err = AuthError::from(e);
                    self.audit(AuditEvent::rate_limited(
                        req.client(),
                        &req.path,
                        &limiter.scope().to_string(),
                        err.retry_after().unwrap_or(1),
                    ));
                    return Err(err);
                }
            }
        }

        Ok(decisions)
    }

    /// Run the full guard pipeline for a protected route.
    ///
    /// CSRF is checked before the identity is resolved, so a rejected
    /// request never reaches the session cache or the directory.
    pub fn authorize(&self, req: &RequestInfo) -> Result<AuthContext, AuthError> {
        let session = self.verify_session(req)?;
        self.check_csrf(req, Some(&session.claims.id), Some(&session.claims.session_id))?;
        self.resolve_context(session)
    }

    /// Verify the access token and resolve the caller's identity, without
    /// the CSRF check.
    pub fn authenticate(&self, req: &RequestInfo) -> Result<AuthContext, AuthError> {
        let session = self.verify_session(req)?;
        self.resolve_context(session)
    }

    fn verify_session(&self, req: &RequestInfo) -> Result<VerifiedSession, AuthError> {
        let token = req
            .access_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::NotAuthenticated)?;

        let claims = self.tokens.verify_access(token)?;
        let fingerprint = generate_fingerprint(&req.metadata);

        let fingerprint_matched = match (self.config.fingerprint, claims.fingerprint.as_deref()) {
            (FingerprintMode::Off, _) | (_, None) => true,
            (mode, Some(stored)) => {
                let matched = verify_fingerprint(&req.metadata, stored);
                if !matched {
                    let enforced = mode == FingerprintMode::Enforce;
                    self.audit(AuditEvent::fingerprint_mismatch(
                        &claims.id,
                        &claims.session_id,
                        req.client_addr.as_deref(),
                        enforced,
                    ));
                    if enforced {
                        return Err(AuthError::FingerprintMismatch);
                    }
                }
                matched
            }
        };

        Ok(VerifiedSession {
            claims,
            fingerprint,
            fingerprint_matched,
        })
    }

    fn resolve_context(&self, session: VerifiedSession) -> Result<AuthContext, AuthError> {
        let VerifiedSession {
            claims,
            fingerprint,
            fingerprint_matched,
        } = session;
        let identity = self.resolve_identity(&claims.id, || claims.identity())?;

        Ok(AuthContext {
            identity,
            session_id: claims.session_id,
            fingerprint,
            fingerprint_matched,
            expires_at: claims.expires_at,
        })
    }

    /// Check the double-submit token of a state-changing request.
    pub fn verify_csrf(&self, req: &RequestInfo, ctx: Option<&AuthContext>) -> Result<(), AuthError> {
        self.check_csrf(
            req,
            ctx.map(|c| c.identity.id.as_str()),
            ctx.map(|c| c.session_id.as_str()),
        )
    }

    fn check_csrf(
        &self,
        req: &RequestInfo,
        user_id: Option<&str>,
        session_id: Option<&str>,
    ) -> Result<(), AuthError> {
        let check = CsrfCheck {
            method: &req.method,
            path: &req.path,
            session_id,
            header_token: req.csrf_header.as_deref(),
            cookie_token: req.csrf_cookie.as_deref(),
        };

        self.csrf.verify(&check).map_err(|e| {
            let err = AuthError::from(e);
            self.audit(AuditEvent::csrf_rejected(
                user_id,
                session_id,
                &req.method,
                &req.path,
                err.code(),
            ));
            err
        })
    }

    /// Create an account and log it in.
    pub fn register(&self, req: &RequestInfo, user: RegisterRequest) -> Result<SessionGrant, AuthError> {
        let user = validate_registration(user)?;

        let record = self.directory.create_user(user)?;
        tracing::info!(user_id = %record.identity.id, "User registered");

        let grant = self.start_session(req, record.identity, record.token_version)?;
        self.audit(AuditEvent::user_registered(
            &grant.identity.id,
            &grant.session_id,
            req.client_addr.as_deref(),
        ));
        Ok(grant)
    }

    /// Exchange credentials for a new session.
    ///
    /// Unknown email and wrong password are indistinguishable to the caller,
    /// including in cost: both run one password check.
    pub fn login(&self, req: &RequestInfo, credentials: &Credentials) -> Result<SessionGrant, AuthError> {
        let email = credentials.email.trim();

        let record = match self.directory.find_by_email(email)? {
            Some(record) => record,
            None => {
                self.directory.verify_unknown_user(&credentials.password);
                self.audit(AuditEvent::login_failed(email, req.client_addr.as_deref(), "unknown email"));
                return Err(AuthError::InvalidCredentials);
            }
        };

        if !self.directory.verify_password(&record, &credentials.password)? {
            self.audit(AuditEvent::login_failed(email, req.client_addr.as_deref(), "wrong password"));
            return Err(AuthError::InvalidCredentials);
        }

        let grant = self.start_session(req, record.identity, record.token_version)?;
        tracing::info!(user_id = %grant.identity.id, session_id = %grant.session_id, "Login succeeded");
        self.audit(AuditEvent::login_success(
            &grant.identity.id,
            &grant.session_id,
            req.client_addr.as_deref(),
        ));
        Ok(grant)
    }

    /// Mint a new access token from the refresh token.
    ///
    /// The access token is issued under a new session id. The refresh token
    /// is not reissued.
    pub fn refresh(&self, req: &RequestInfo) -> Result<SessionGrant, AuthError> {
        let token = req
            .refresh_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::NotAuthenticated)?;

        let claims = self.tokens.verify_refresh(token).map_err(|e| {
            self.audit(AuditEvent::refresh_rejected(None, req.client_addr.as_deref(), "malformed"));
            AuthError::from(e)
        })?;

        let record = match self.directory.find_by_id(&claims.id)? {
            Some(record) => record,
            None => {
                self.audit(AuditEvent::refresh_rejected(
                    Some(&claims.id),
                    req.client_addr.as_deref(),
                    "user not found",
                ));
                return Err(AuthError::UserNotFound(claims.id));
            }
        };

        if claims.token_version != record.token_version {
            tracing::info!(
                user_id = %claims.id,
                presented = claims.token_version,
                current = record.token_version,
                "Rejecting revoked refresh token"
            );
            self.audit(AuditEvent::refresh_rejected(
                Some(&claims.id),
                req.client_addr.as_deref(),
                "revoked",
            ));
            return Err(AuthError::TokenRevoked);
        }

        let session_id = generate_session_id();
        let access = self.tokens.issue_access(
            &record.identity,
            &session_id,
            self.capture_fingerprint(&req.metadata),
        )?;
        let csrf_token = self.issue_csrf(&session_id)?;
        self.cache.put(&record.identity);

        self.audit(AuditEvent::token_refreshed(
            &record.identity.id,
            &claims.session_id,
            &session_id,
        ));

        Ok(SessionGrant {
            identity: record.identity,
            session_id,
            access,
            refresh: None,
            csrf_token,
        })
    }

    /// End the caller's session. Unauthenticated callers have nothing to clear.
    pub fn logout(&self, ctx: Option<&AuthContext>) {
        let Some(ctx) = ctx else {
            return;
        };

        self.csrf.clear(&ctx.session_id);
        self.cache.invalidate(&ctx.identity.id);
        self.audit(AuditEvent::logout(&ctx.identity.id, &ctx.session_id));
    }

    /// Revoke every refresh token of the caller. Returns the new counter value.
    ///
    /// Access tokens already issued stay valid until they expire.
    pub fn logout_all(&self, ctx: &AuthContext) -> Result<u64, AuthError> {
        let token_version = self.directory.increment_token_version(&ctx.identity.id)?;

        self.csrf.clear(&ctx.session_id);
        self.cache.invalidate(&ctx.identity.id);

        tracing::info!(user_id = %ctx.identity.id, token_version, "Revoked all sessions");
        self.audit(AuditEvent::logout_all(
            &ctx.identity.id,
            &ctx.session_id,
            token_version,
        ));
        Ok(token_version)
    }

    pub fn me(&self, ctx: &AuthContext) -> Identity {
        ctx.identity.clone()
    }

    fn start_session(
        &self,
        req: &RequestInfo,
        identity: Identity,
        token_version: u64,
    ) -> Result<SessionGrant, AuthError> {
        let session_id = generate_session_id();

        let access = self.tokens.issue_access(
            &identity,
            &session_id,
            self.capture_fingerprint(&req.metadata),
        )?;
        let refresh = self
            .tokens
            .issue_refresh(&identity.id, &session_id, token_version)?;
        let csrf_token = self.issue_csrf(&session_id)?;
        self.cache.put(&identity);

        Ok(SessionGrant {
            identity,
            session_id,
            access,
            refresh: Some(refresh),
            csrf_token,
        })
    }

    /// Grants are minted on CSRF-exempt routes, so a store failure here is
    /// a server error rather than a CSRF rejection.
    fn issue_csrf(&self, session_id: &str) -> Result<Option<String>, AuthError> {
        self.csrf.issue(session_id).map_err(|e| match e {
            CsrfError::Store(e) => AuthError::Store(e),
            other => AuthError::from(other),
        })
    }

    fn capture_fingerprint(&self, metadata: &RequestMetadata) -> Option<String> {
        match self.config.fingerprint {
            FingerprintMode::Off => None,
            _ => Some(generate_fingerprint(metadata)),
        }
    }

    /// Cache first, then the directory. A directory outage falls back to the
    /// identity carried in the verified token.
    fn resolve_identity(
        &self,
        user_id: &str,
        from_token: impl FnOnce() -> Identity,
    ) -> Result<Identity, AuthError> {
        if let Some(cached) = self.cache.get(user_id) {
            return Ok(cached.identity);
        }

        match self.directory.find_by_id(user_id) {
            Ok(Some(record)) => {
                self.cache.put(&record.identity);
                Ok(record.identity)
            }
            Ok(None) => Err(AuthError::UserNotFound(user_id.to_string())),
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Directory unavailable, using token identity");
                Ok(from_token())
            }
        }
    }

    fn audit(&self, event: AuditEvent) {
        event.log(self.activity.as_ref());
    }
}

fn validate_registration(request: RegisterRequest) -> Result<NewUser, AuthError> {
    let user = NewUser {
        email: request.email.trim().to_string(),
        password: request.password,
        name: request.name.trim().to_string(),
        role_id: None,
    };

    if !is_plausible_email(&user.email) {
        return Err(AuthError::Validation("A valid email address is required".to_string()));
    }
    if user.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::Validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    if user.name.is_empty() {
        return Err(AuthError::Validation("Name is required".to_string()));
    }

    Ok(user)
}

fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && domain.contains('.')
                && !domain.contains('@')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    }
}
