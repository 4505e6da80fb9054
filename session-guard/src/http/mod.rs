//! axum integration.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use axum::{routing::get, Router};
//! # use session_guard::{http, AuthService, GuardConfig, InMemoryDirectory, MemoryStore};
//! let config = GuardConfig::new("access-secret", "refresh-secret");
//! let service = Arc::new(AuthService::new(
//!     config,
//!     Arc::new(InMemoryDirectory::new()),
//!     Arc::new(MemoryStore::new()),
//! ));
//!
//! let projects = Router::new().route("/api/projects", get(|| async { "[]" }));
//! let app = http::secure(projects, service);
//! ```
//!
//! Serve with `into_make_service_with_connect_info::<SocketAddr>()` so the
//! rate limiter can key on the peer address.

pub mod cookies;
mod handlers;
pub mod middleware;
mod response;

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;

use crate::auth::AuthService;

pub use middleware::{rate_limit, require_auth, ClientRequest};

/// The auth endpoint group, mounted at the configured prefix.
///
/// `/me` and `/logout-all` require authentication; `/logout` accepts
/// callers without a live session so stale cookies can always be cleared.
pub fn auth_routes(service: Arc<AuthService>) -> Router {
    let config = service.config().clone();

    let authenticated = Router::new()
        .route(&config.auth_path("/me"), get(handlers::me))
        .route(&config.auth_path("/logout-all"), post(handlers::logout_all))
        .route_layer(axum::middleware::from_fn_with_state(
            service.clone(),
            require_auth,
        ));

    Router::new()
        .route(&config.auth_path("/register"), post(handlers::register))
        .route(&config.auth_path("/login"), post(handlers::login))
        .route(&config.auth_path("/refresh"), post(handlers::refresh))
        .route(&config.auth_path("/logout"), post(handlers::logout))
        .merge(authenticated)
        .with_state(service)
}

/// Require authentication (and CSRF on state changes) for every route of `router`.
///
/// A router without routes is returned unchanged; axum rejects a route
/// layer that has nothing to wrap.
pub fn protect(router: Router, service: Arc<AuthService>) -> Router {
    if !router.has_routes() {
        return router;
    }
    router.route_layer(axum::middleware::from_fn_with_state(service, require_auth))
}

/// Count every request of `router` against the rate limiters.
pub fn rate_limited(router: Router, service: Arc<AuthService>) -> Router {
    router.layer(axum::middleware::from_fn_with_state(service, rate_limit))
}

/// Auth routes plus `app` behind the full guard pipeline.
///
/// `app` may be empty, in which case only the auth routes are served.
pub fn secure(app: Router, service: Arc<AuthService>) -> Router {
    let router = auth_routes(service.clone()).merge(protect(app, service.clone()));
    rate_limited(router, service)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthContext;
    use crate::config::GuardConfig;
    use crate::directory::{InMemoryDirectory, NewUser, UserDirectory};
    use crate::store::MemoryStore;
    use axum::body::Body;
    use axum::http::{header, Request, Response, StatusCode};
    use axum::Json;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const EMAIL: &str = "ada@example.com";
    const PASSWORD: &str = "correct horse battery";

    struct TestApp {
        router: Router,
        directory: Arc<InMemoryDirectory>,
    }

    fn test_app_with(configure: impl FnOnce(&mut GuardConfig)) -> TestApp {
        let mut config = GuardConfig::new("access-secret-for-tests", "refresh-secret-for-tests");
        configure(&mut config);

        let directory = Arc::new(InMemoryDirectory::new());
        let service = Arc::new(AuthService::new(
            config,
            directory.clone(),
            Arc::new(MemoryStore::new()),
        ));

        async fn list(ctx: AuthContext) -> Json<Value> {
            Json(json!({ "owner": ctx.identity.email }))
        }
        async fn create(ctx: AuthContext) -> (StatusCode, Json<Value>) {
            (StatusCode::CREATED, Json(json!({ "owner": ctx.identity.email })))
        }
        let projects = Router::new().route("/api/projects", get(list).post(create));

        TestApp {
            router: secure(projects, service),
            directory,
        }
    }

    fn test_app() -> TestApp {
        test_app_with(|_| {})
    }

    impl TestApp {
        fn seed(&self) {
            self.directory
                .create_user(NewUser {
                    email: EMAIL.to_string(),
                    password: PASSWORD.to_string(),
                    name: "Ada".to_string(),
                    role_id: None,
                })
                .unwrap();
        }

        async fn send(&self, req: Request<Body>) -> Response<Body> {
            self.router.clone().oneshot(req).await.unwrap()
        }

        async fn login(&self, password: &str) -> Response<Body> {
            self.send(json_request(
                "/api/auth/login",
                json!({ "email": EMAIL, "password": password }),
            ))
            .await
        }
    }

    fn json_request(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn request(method: &str, uri: &str, cookies: &str, csrf: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if !cookies.is_empty() {
            builder = builder.header(header::COOKIE, cookies);
        }
        if let Some(csrf) = csrf {
            builder = builder.header("x-csrf-token", csrf);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn set_cookies(resp: &Response<Body>) -> Vec<String> {
        resp.headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect()
    }

    fn cookie_value(resp: &Response<Body>, name: &str) -> Option<String> {
        let prefix = format!("{}=", name);
        set_cookies(resp).into_iter().find_map(|cookie| {
            cookie
                .split(';')
                .next()
                .and_then(|pair| pair.strip_prefix(&prefix))
                .map(String::from)
        })
    }

    fn csrf_header(resp: &Response<Body>) -> String {
        resp.headers()
            .get("x-csrf-token")
            .unwrap()
            .to_str()
            .unwrap()
            .to_string()
    }

    async fn body_json(resp: Response<Body>) -> Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_login_sets_cookies_and_me_returns_identity() {
        let app = test_app();
        app.seed();

        let resp = app.login(PASSWORD).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let cookies = set_cookies(&resp);
        assert!(cookies
            .iter()
            .any(|c| c.starts_with("session=") && c.contains("Path=/;") && c.contains("HttpOnly")));
        assert!(cookies
            .iter()
            .any(|c| c.starts_with("refresh=") && c.contains("Path=/api/auth;")));
        assert!(!csrf_header(&resp).is_empty());

        let session = cookie_value(&resp, "session").unwrap();
        let body = body_json(resp).await;
        assert_eq!(body["user"]["email"], EMAIL);

        let resp = app
            .send(request("GET", "/api/auth/me", &format!("session={}", session), None))
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers().contains_key("ratelimit-remaining"));
        let body = body_json(resp).await;
        assert_eq!(body["user"]["email"], EMAIL);
        assert_eq!(body["user"]["name"], "Ada");
    }

    #[tokio::test]
    async fn test_me_without_session() {
        let app = test_app();

        let resp = app.send(request("GET", "/api/auth/me", "", None)).await;

        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(resp).await;
        assert_eq!(body["code"], "NOT_AUTHENTICATED");
        assert!(body["message"].is_string());
    }

    #[tokio::test]
    async fn test_bearer_token_accepted() {
        let app = test_app();
        app.seed();
        let session = cookie_value(&app.login(PASSWORD).await, "session").unwrap();

        let req = Request::builder()
            .uri("/api/projects")
            .header(header::AUTHORIZATION, format!("Bearer {}", session))
            .body(Body::empty())
            .unwrap();
        let resp = app.send(req).await;

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["owner"], EMAIL);
    }

    #[tokio::test]
    async fn test_refresh_issues_new_access_cookie_only() {
        let app = test_app();
        app.seed();
        let login = app.login(PASSWORD).await;
        let session = cookie_value(&login, "session").unwrap();
        let refresh = cookie_value(&login, "refresh").unwrap();

        let resp = app
            .send(request("POST", "/api/auth/refresh", &format!("refresh={}", refresh), None))
            .await;

        assert_eq!(resp.status(), StatusCode::OK);
        let new_session = cookie_value(&resp, "session").unwrap();
        assert_ne!(new_session, session);
        assert!(cookie_value(&resp, "refresh").is_none());
        assert!(!csrf_header(&resp).is_empty());
    }

    #[tokio::test]
    async fn test_csrf_enforced_on_state_changes() {
        let app = test_app();
        app.seed();
        let login = app.login(PASSWORD).await;
        let cookies = format!("session={}", cookie_value(&login, "session").unwrap());
        let csrf = csrf_header(&login);

        let resp = app.send(request("GET", "/api/projects", &cookies, None)).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app.send(request("POST", "/api/projects", &cookies, None)).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_json(resp).await["code"], "CSRF_TOKEN_MISSING");

        let resp = app
            .send(request("POST", "/api/projects", &cookies, Some("AAAA")))
            .await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_json(resp).await["code"], "CSRF_TOKEN_ERROR");

        let resp = app
            .send(request("POST", "/api/projects", &cookies, Some(&csrf)))
            .await;
        assert_eq!(resp.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_cookie_mode_double_submit() {
        let app = test_app_with(|c| c.csrf.storage = crate::config::CsrfStorage::Cookie);
        app.seed();
        let login = app.login(PASSWORD).await;
        let csrf = cookie_value(&login, "csrf").unwrap();
        assert_eq!(csrf, csrf_header(&login));

        let session = cookie_value(&login, "session").unwrap();
        let cookies = format!("session={}; csrf={}", session, csrf);

        let resp = app
            .send(request("POST", "/api/projects", &cookies, Some(&csrf)))
            .await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let resp = app
            .send(request("POST", "/api/projects", &format!("session={}", session), Some(&csrf)))
            .await;
        assert_eq!(body_json(resp).await["code"], "CSRF_TOKEN_MISSING");
    }

    #[tokio::test]
    async fn test_failed_logins_then_rate_limited() {
        let app = test_app_with(|c| c.rate_limit.credential_max = Some(3));
        app.seed();

        for _ in 0..2 {
            let resp = app.login("wrong password").await;
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(body_json(resp).await["code"], "INVALID_CREDENTIALS");
        }
        assert_eq!(app.login(PASSWORD).await.status(), StatusCode::OK);

        // Correct credentials no longer matter once the ceiling is reached
        let resp = app.login(PASSWORD).await;
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        let retry_after: u64 = resp.headers()[header::RETRY_AFTER]
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!((1..=15 * 60).contains(&retry_after));

        let body = body_json(resp).await;
        assert_eq!(body["code"], "AUTH_RATE_LIMIT_EXCEEDED");
        assert_eq!(body["retryAfter"], retry_after);

        // Registration keeps its own budget
        let resp = app
            .send(json_request(
                "/api/auth/register",
                json!({ "email": "grace@example.com", "password": PASSWORD, "name": "Grace" }),
            ))
            .await;
        assert_eq!(resp.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_register_rejects_bad_input() {
        let app = test_app();

        let resp = app
            .send(json_request(
                "/api/auth/register",
                json!({ "email": "grace@example.com", "password": "short", "name": "Grace" }),
            ))
            .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["code"], "VALIDATION_ERROR");

        let resp = app
            .send(json_request("/api/auth/register", json!({ "email": "grace@example.com" })))
            .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_register_ignores_role_from_body() {
        let app = test_app();

        let resp = app
            .send(json_request(
                "/api/auth/register",
                json!({
                    "email": "eve@example.com",
                    "password": PASSWORD,
                    "name": "Eve",
                    "roleId": "admin-role",
                }),
            ))
            .await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let session = cookie_value(&resp, "session").unwrap();
        assert!(body_json(resp).await["user"].get("roleId").is_none());

        let resp = app
            .send(request("GET", "/api/auth/me", &format!("session={}", session), None))
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["user"]["email"], "eve@example.com");
        assert!(body["user"].get("roleId").is_none());

        let stored = app.directory.find_by_email("eve@example.com").unwrap().unwrap();
        assert_eq!(stored.identity.role_id, None);
    }

    #[tokio::test]
    async fn test_secure_accepts_empty_app() {
        let config = GuardConfig::new("access-secret-for-tests", "refresh-secret-for-tests");
        let service = Arc::new(AuthService::new(
            config,
            Arc::new(InMemoryDirectory::new()),
            Arc::new(MemoryStore::new()),
        ));
        let router = secure(Router::new(), service);

        let resp = router
            .oneshot(json_request(
                "/api/auth/register",
                json!({ "email": "grace@example.com", "password": PASSWORD, "name": "Grace" }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_logout_clears_cookies() {
        let app = test_app();
        app.seed();
        let login = app.login(PASSWORD).await;
        let cookies = format!("session={}", cookie_value(&login, "session").unwrap());
        let csrf = csrf_header(&login);

        let resp = app
            .send(request("POST", "/api/auth/logout", &cookies, None))
            .await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let resp = app
            .send(request("POST", "/api/auth/logout", &cookies, Some(&csrf)))
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let cleared = set_cookies(&resp);
        assert!(cleared.iter().any(|c| c.starts_with("session=;") && c.contains("Max-Age=0")));
        assert!(cleared.iter().any(|c| c.starts_with("refresh=;") && c.contains("Path=/api/auth;")));

        // No session at all still clears cookies
        let resp = app.send(request("POST", "/api/auth/logout", "", None)).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_logout_all_revokes_refresh_tokens() {
        let app = test_app();
        app.seed();
        let login = app.login(PASSWORD).await;
        let session = cookie_value(&login, "session").unwrap();
        let refresh = cookie_value(&login, "refresh").unwrap();
        let csrf = csrf_header(&login);

        let resp = app
            .send(request(
                "POST",
                "/api/auth/logout-all",
                &format!("session={}", session),
                Some(&csrf),
            ))
            .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app
            .send(request("POST", "/api/auth/refresh", &format!("refresh={}", refresh), None))
            .await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(resp).await["code"], "TOKEN_REVOKED");
    }
}
