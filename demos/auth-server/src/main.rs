//! Demo server running the session-guard pipeline.
//!
//! ## Usage
//!
//! ```bash
//! export JWT_ACCESS_SECRET=dev-access-secret JWT_REFRESH_SECRET=dev-refresh-secret
//! cargo run -p auth-server
//!
//! curl -i -c jar -H 'content-type: application/json' \
//!      -d '{"email":"demo@example.com","password":"demo-password"}' \
//!      http://localhost:3000/api/auth/login
//! curl -b jar http://localhost:3000/api/projects
//! ```
//!
//! Set `SESSION_GUARD_CONFIG` to load a YAML config file instead of the
//! environment.
//!
//! ## API Endpoints
//!
//! - `POST /api/auth/register`, `/login`, `/refresh`, `/logout`, `/logout-all`
//! - `GET /api/auth/me`
//! - `GET /api/projects`, `POST /api/projects` - require a session

use anyhow::Context;
use axum::{
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use session_guard::{
    http, ActivityLog, ActivityLogError, AuditEvent, AuthContext, AuthService, GuardConfig,
    InMemoryDirectory, MemoryStore, NewUser, UserDirectory,
};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::info;

const DEMO_EMAIL: &str = "demo@example.com";
const DEMO_PASSWORD: &str = "demo-password";

/// Activity log that keeps the most recent events in memory.
#[derive(Default)]
struct RecentActivity {
    events: RwLock<Vec<AuditEvent>>,
}

impl RecentActivity {
    const CAPACITY: usize = 100;
}

impl ActivityLog for RecentActivity {
    fn record(&self, event: &AuditEvent) -> Result<(), ActivityLogError> {
        let mut events = self
            .events
            .write()
            .map_err(|_| ActivityLogError("activity lock poisoned".to_string()))?;
        if events.len() == Self::CAPACITY {
            events.remove(0);
        }
        events.push(event.clone());
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct NewProject {
    name: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = match std::env::var("SESSION_GUARD_CONFIG") {
        Ok(path) => GuardConfig::from_file(Path::new(&path))
            .with_context(|| format!("loading {}", path))?,
        Err(_) => GuardConfig::from_env().context("loading configuration from environment")?,
    };

    let directory = Arc::new(InMemoryDirectory::new());
    directory
        .create_user(NewUser {
            email: DEMO_EMAIL.to_string(),
            password: DEMO_PASSWORD.to_string(),
            name: "Demo User".to_string(),
            role_id: None,
        })
        .context("seeding demo user")?;

    let activity = Arc::new(RecentActivity::default());
    let service = Arc::new(
        AuthService::new(config, directory, Arc::new(MemoryStore::new()))
            .with_activity_log(activity.clone()),
    );

    let projects = Router::new().route("/api/projects", get(list_projects).post(create_project));
    let app = http::secure(projects, service);

    let listener = tokio::net::TcpListener::bind("0.0.0.0:3000")
        .await
        .context("binding 0.0.0.0:3000")?;
    info!("Auth demo server listening on http://0.0.0.0:3000");
    info!("Log in as {} / {}", DEMO_EMAIL, DEMO_PASSWORD);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("serving")?;

    let recorded = activity.events.read().map(|e| e.len()).unwrap_or(0);
    info!(recorded, "Shut down");
    Ok(())
}

async fn list_projects(ctx: AuthContext) -> Json<Value> {
    Json(json!({
        "owner": ctx.identity.email,
        "projects": [],
    }))
}

async fn create_project(
    ctx: AuthContext,
    Json(project): Json<NewProject>,
) -> (StatusCode, Json<Value>) {
    info!(user_id = %ctx.identity.id, name = %project.name, "Project created");
    (
        StatusCode::CREATED,
        Json(json!({
            "name": project.name,
            "owner": ctx.identity.email,
        })),
    )
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
    }
}
