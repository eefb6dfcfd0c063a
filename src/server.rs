//! HTTP API for triggering jobs and polling their progress.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/projects/{id}/index` | Start indexing a project → `202 { jobId }` |
//! | `POST` | `/projects/{id}/commits/sync` | Start a commit sync → `202 { jobId }` |
//! | `GET`  | `/jobs/{id}` | Latest progress snapshot of a job |
//!
//! Trigger bodies are optional JSON: `{ "githubToken": "..." }`, plus
//! `"maxCommits"` for commit sync. Clients poll `GET /jobs/{id}` about
//! once per second until `phase` is `completed` or `failed`. Finished
//! jobs stay readable for the configured retention window.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "no project with id: 42" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::config::Config;
use crate::jobs::{Collaborators, JobRunner, PipelineSettings};
use crate::models::Project;
use crate::source::Credentials;
use crate::tracker::{spawn_sweeper, InMemoryProgressTracker, ProgressSnapshot, ProgressTracker};

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub runner: Arc<JobRunner>,
}

/// Build the router. Exposed so tests can serve it on an ephemeral port.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/projects/{id}/index", post(handle_index))
        .route("/projects/{id}/commits/sync", post(handle_sync))
        .route("/jobs/{id}", get(handle_job))
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server.
///
/// Binds to `[server].bind`, starts the progress sweeper, and serves until
/// Ctrl-C. The sweeper is stopped on shutdown.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let tracker: Arc<dyn ProgressTracker> = Arc::new(InMemoryProgressTracker::new(
        Duration::from_secs(config.progress.retention_secs),
    ));
    let collaborators = Collaborators::from_config(config).await?;
    let runner = JobRunner::new(
        collaborators,
        tracker.clone(),
        &PipelineSettings::from_config(config),
    )?;

    let shutdown = CancellationToken::new();
    let sweeper = spawn_sweeper(
        tracker,
        Duration::from_secs(config.progress.sweep_interval_secs),
        shutdown.clone(),
    );

    let app = router(AppState {
        runner: Arc::new(runner),
    });

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(addr = %config.server.bind, "rdigest server listening");

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    let _ = sweeper.await;
    Ok(())
}

// ============ Error response ============

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`, `"not_found"`).
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn internal(err: anyhow::Error) -> AppError {
    error!(error = %format!("{:#}", err), "request failed");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: err.to_string(),
    }
}

/// Parse an optional JSON body; an empty body yields `T::default()`.
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| bad_request(format!("invalid JSON body: {}", e)))
}

async fn resolve_project(state: &AppState, id: &str) -> Result<Project, AppError> {
    state
        .runner
        .storage()
        .get_project(id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found(format!("no project with id: {}", id)))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /projects/{id}/... ============

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexRequest {
    github_token: Option<String>,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SyncRequest {
    github_token: Option<String>,
    max_commits: Option<usize>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JobAccepted {
    job_id: String,
}

fn accepted(job_id: String) -> Response {
    (StatusCode::ACCEPTED, Json(JobAccepted { job_id })).into_response()
}

async fn handle_index(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Response, AppError> {
    let request: IndexRequest = parse_body(&body)?;
    let project = resolve_project(&state, &id).await?;

    let handle = state
        .runner
        .spawn_index(&project, Credentials::from_token(request.github_token));
    Ok(accepted(handle.job_id))
}

async fn handle_sync(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Response, AppError> {
    let request: SyncRequest = parse_body(&body)?;
    if request.max_commits == Some(0) {
        return Err(bad_request("maxCommits must be greater than zero"));
    }
    let project = resolve_project(&state, &id).await?;

    let handle = state.runner.spawn_sync(
        &project,
        Credentials::from_token(request.github_token),
        request.max_commits,
    );
    Ok(accepted(handle.job_id))
}

// ============ GET /jobs/{id} ============

async fn handle_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ProgressSnapshot>, AppError> {
    state
        .runner
        .tracker()
        .get_progress(&id)
        .map(Json)
        .ok_or_else(|| not_found(format!("no job with id: {}", id)))
}
