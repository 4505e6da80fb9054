//! Auth endpoint handlers.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::sync::Arc;

use super::middleware::ClientRequest;
use super::response::{cleared_response, grant_response};
use crate::auth::{AuthContext, AuthService, Credentials, RegisterRequest};
use crate::error::AuthError;

pub(crate) async fn register(
    State(service): State<Arc<AuthService>>,
    ClientRequest(info): ClientRequest,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Response, AuthError> {
    let Json(user) = body.map_err(invalid_body)?;
    let grant = service.register(&info, user)?;
    Ok(grant_response(&service, &grant, StatusCode::CREATED))
}

pub(crate) async fn login(
    State(service): State<Arc<AuthService>>,
    ClientRequest(info): ClientRequest,
    body: Result<Json<Credentials>, JsonRejection>,
) -> Result<Response, AuthError> {
    let Json(credentials) = body.map_err(invalid_body)?;
    let grant = service.login(&info, &credentials)?;
    Ok(grant_response(&service, &grant, StatusCode::OK))
}

pub(crate) async fn refresh(
    State(service): State<Arc<AuthService>>,
    ClientRequest(info): ClientRequest,
) -> Result<Response, AuthError> {
    let grant = service.refresh(&info)?;
    Ok(grant_response(&service, &grant, StatusCode::OK))
}

pub(crate) async fn me(State(service): State<Arc<AuthService>>, ctx: AuthContext) -> Response {
    Json(json!({ "user": service.me(&ctx) })).into_response()
}

/// Logout works with or without a live access token; cookies are always cleared.
pub(crate) async fn logout(
    State(service): State<Arc<AuthService>>,
    ClientRequest(info): ClientRequest,
) -> Result<Response, AuthError> {
    match service.authorize(&info) {
        Ok(ctx) => service.logout(Some(&ctx)),
        Err(e @ (AuthError::CsrfMissing | AuthError::CsrfInvalid | AuthError::CsrfVerification)) => {
            return Err(e)
        }
        Err(e) => tracing::debug!(code = e.code(), "Logout without a valid session"),
    }
    Ok(cleared_response(&service, "Logged out"))
}

pub(crate) async fn logout_all(
    State(service): State<Arc<AuthService>>,
    ctx: AuthContext,
) -> Result<Response, AuthError> {
    service.logout_all(&ctx)?;
    Ok(cleared_response(&service, "Logged out from all devices"))
}

fn invalid_body(rejection: JsonRejection) -> AuthError {
    AuthError::Validation(rejection.body_text())
}
