//! Auth cookie construction and parsing.

use axum::http::{header, HeaderMap};
use std::time::Duration;

use crate::config::{GuardConfig, SameSite};

/// Access token cookie
pub const SESSION_COOKIE: &str = "session";

/// Refresh token cookie, scoped to the auth route group
pub const REFRESH_COOKIE: &str = "refresh";

/// Attributes shared by every auth cookie.
#[derive(Debug, Clone)]
pub struct CookieOptions {
    pub secure: bool,
    pub same_site: SameSite,
    pub domain: Option<String>,
}

impl CookieOptions {
    pub fn from_config(config: &GuardConfig) -> Self {
        Self {
            secure: config.cookie_secure(),
            same_site: config.same_site(),
            domain: config.cookies.domain.clone(),
        }
    }
}

/// Build an HTTP-only `Set-Cookie` value.
pub fn build_cookie(name: &str, value: &str, path: &str, max_age: Duration, opts: &CookieOptions) -> String {
    let mut cookie = format!(
        "{}={}; Path={}; Max-Age={}; HttpOnly; SameSite={}",
        name,
        value,
        path,
        max_age.as_secs(),
        opts.same_site.as_str()
    );
    if opts.secure {
        cookie.push_str("; Secure");
    }
    if let Some(domain) = &opts.domain {
        cookie.push_str("; Domain=");
        cookie.push_str(domain);
    }
    cookie
}

/// Build a `Set-Cookie` value that deletes the cookie.
///
/// Path and domain must match the original or the browser keeps it.
pub fn clear_cookie(name: &str, path: &str, opts: &CookieOptions) -> String {
    build_cookie(name, "", path, Duration::ZERO, opts)
}

/// Read a cookie from the request's `Cookie` headers.
pub fn get_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}
