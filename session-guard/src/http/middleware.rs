//! Guard middleware and extractors.
//!
//! Install [`rate_limit`] outermost so counters are bumped before any other
//! work, then [`require_auth`] on routes that need an identity. Handlers
//! behind `require_auth` take [`AuthContext`] as an extractor.

use axum::extract::{ConnectInfo, FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::http::{header, Extensions, HeaderMap, HeaderValue, Method, Uri};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use super::cookies::{get_cookie, REFRESH_COOKIE, SESSION_COOKIE};
use crate::auth::{AuthContext, AuthService, RequestInfo};
use crate::config::GuardConfig;
use crate::error::AuthError;
use crate::security::{RateLimitDecision, RequestMetadata, CSRF_COOKIE, CSRF_HEADER};

/// Count the request against the rate limiters.
pub async fn rate_limit(
    State(service): State<Arc<AuthService>>,
    req: Request,
    next: Next,
) -> Response {
    let info = request_info(service.config(), req.method(), req.uri(), req.headers(), req.extensions());

    match service.check_rate_limit(&info) {
        Ok(decisions) => {
            let mut response = next.run(req).await;
            if let Some(decision) = tightest(&decisions) {
                insert_rate_limit_headers(response.headers_mut(), decision);
            }
            response
        }
        Err(e) => e.into_response(),
    }
}

/// Authenticate the request and enforce CSRF on state-changing methods.
pub async fn require_auth(
    State(service): State<Arc<AuthService>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let info = request_info(service.config(), req.method(), req.uri(), req.headers(), req.extensions());

    let ctx = service.authorize(&info)?;

    req.extensions_mut().insert(ctx);
    Ok(next.run(req).await)
}

impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .ok_or(AuthError::NotAuthenticated)
    }
}

/// Transport view of the request, for handlers outside `require_auth`.
#[derive(Debug, Clone)]
pub struct ClientRequest(pub RequestInfo);

impl FromRequestParts<Arc<AuthService>> for ClientRequest {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        service: &Arc<AuthService>,
    ) -> Result<Self, Self::Rejection> {
        Ok(Self(request_info(
            service.config(),
            &parts.method,
            &parts.uri,
            &parts.headers,
            &parts.extensions,
        )))
    }
}

pub(crate) fn request_info(
    config: &GuardConfig,
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    extensions: &Extensions,
) -> RequestInfo {
    RequestInfo {
        method: method.as_str().to_string(),
        path: uri.path().to_string(),
        client_addr: client_address(config.trust_proxy, headers, extensions),
        metadata: RequestMetadata::new(
            header_str(headers, header::USER_AGENT.as_str()),
            header_str(headers, header::ACCEPT_LANGUAGE.as_str()),
            header_str(headers, header::ACCEPT_ENCODING.as_str()),
        ),
        access_token: get_cookie(headers, SESSION_COOKIE)
            .filter(|t| !t.is_empty())
            .or_else(|| bearer_token(headers))
            .map(String::from),
        refresh_token: get_cookie(headers, REFRESH_COOKIE).map(String::from),
        csrf_header: header_str(headers, CSRF_HEADER).map(String::from),
        csrf_cookie: get_cookie(headers, CSRF_COOKIE).map(String::from),
    }
}

/// Peer address, or the first `X-Forwarded-For` hop behind a trusted proxy.
pub(crate) fn client_address(
    trust_proxy: bool,
    headers: &HeaderMap,
    extensions: &Extensions,
) -> Option<String> {
    if trust_proxy {
        let forwarded = header_str(headers, "x-forwarded-for")
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|hop| !hop.is_empty());
        if let Some(hop) = forwarded {
            return Some(hop.to_string());
        }
    }

    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    header_str(headers, header::AUTHORIZATION.as_str())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// The decision closest to rejecting, reported to the client.
fn tightest(decisions: &[RateLimitDecision]) -> Option<&RateLimitDecision> {
    decisions.iter().min_by_key(|d| d.remaining)
}

fn insert_rate_limit_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert("ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert("ratelimit-remaining", HeaderValue::from(decision.remaining));
    headers.insert(
        "ratelimit-reset",
        HeaderValue::from(decision.reset_after.as_secs().max(1)),
    );
}
