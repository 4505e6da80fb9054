//! JSON responses for auth outcomes.

use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;

use super::cookies::{build_cookie, clear_cookie, CookieOptions, REFRESH_COOKIE, SESSION_COOKIE};
use crate::auth::{AuthService, SessionGrant};
use crate::config::CsrfStorage;
use crate::directory::Identity;
use crate::error::AuthError;
use crate::security::{CSRF_COOKIE, CSRF_HEADER};

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        if self.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "Request failed");
        } else {
            tracing::debug!(code = self.code(), error = %self, "Request rejected");
        }

        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let retry_after = self.retry_after();

        let mut body = json!({
            "message": self.public_message(),
            "code": self.code(),
        });
        if let Some(retry_after) = retry_after {
            body["retryAfter"] = json!(retry_after);
        }

        let mut response = (status, Json(body)).into_response();
        if let Some(retry_after) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
        }
        response
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GrantBody<'a> {
    user: &'a Identity,
    #[serde(skip_serializing_if = "Option::is_none")]
    csrf_token: Option<&'a str>,
    expires_at: i64,
}

/// Turn a grant into cookies, the CSRF header and a JSON body.
pub(crate) fn grant_response(service: &AuthService, grant: &SessionGrant, status: StatusCode) -> Response {
    let config = service.config();
    let opts = CookieOptions::from_config(config);
    let mut headers = HeaderMap::new();

    let mut cookies = vec![build_cookie(
        SESSION_COOKIE,
        &grant.access.token,
        "/",
        grant.access.ttl,
        &opts,
    )];
    if let Some(refresh) = &grant.refresh {
        cookies.push(build_cookie(
            REFRESH_COOKIE,
            &refresh.token,
            &config.auth_prefix,
            refresh.ttl,
            &opts,
        ));
    }
    if let Some(csrf_token) = &grant.csrf_token {
        if service.csrf().storage() == CsrfStorage::Cookie {
            cookies.push(build_cookie(CSRF_COOKIE, csrf_token, "/", grant.access.ttl, &opts));
        }
        if let Ok(value) = HeaderValue::from_str(csrf_token) {
            headers.insert(CSRF_HEADER, value);
        }
    }
    append_cookies(&mut headers, cookies);

    let body = GrantBody {
        user: &grant.identity,
        csrf_token: grant.csrf_token.as_deref(),
        expires_at: grant.access.expires_at,
    };
    (status, headers, Json(body)).into_response()
}

/// Plain message response that also deletes every auth cookie.
pub(crate) fn cleared_response(service: &AuthService, message: &str) -> Response {
    let config = service.config();
    let opts = CookieOptions::from_config(config);
    let mut headers = HeaderMap::new();

    append_cookies(
        &mut headers,
        vec![
            clear_cookie(SESSION_COOKIE, "/", &opts),
            clear_cookie(REFRESH_COOKIE, &config.auth_prefix, &opts),
            clear_cookie(CSRF_COOKIE, "/", &opts),
        ],
    );

    (StatusCode::OK, headers, Json(json!({ "message": message }))).into_response()
}

fn append_cookies(headers: &mut HeaderMap, cookies: Vec<String>) {
    for cookie in cookies {
        match HeaderValue::from_str(&cookie) {
            Ok(value) => {
                headers.append(header::SET_COOKIE, value);
            }
            Err(e) => tracing::warn!(error = %e, "Dropping unrepresentable cookie"),
        }
    }
}
