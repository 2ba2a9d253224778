//! JSON HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/v1/knowledge/import` | Submit an import batch |
//! | `GET`  | `/api/v1/knowledge/tasks/{id}` | Task status with per-item detail |
//! | `POST` | `/api/v1/knowledge/search` | Keyword, semantic, or hybrid search |
//! | `GET`  | `/api/v1/knowledge/repos` | Distinct repository names |
//! | `POST` | `/api/v1/knowledge/classify` | Run the classifier on one text |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "items must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use knowledge_hub_core::classify::Classification;
use knowledge_hub_core::models::SearchResult;

use crate::app::App;
use crate::error::ServiceError;
use crate::tasks::{ImportRequest, ImportResponse, TaskStatusView};

/// Build the router over a shared [`App`].
pub fn router(app: Arc<App>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/knowledge/import", post(handle_import))
        .route("/api/v1/knowledge/tasks/{id}", get(handle_task_status))
        .route("/api/v1/knowledge/search", post(handle_search))
        .route("/api/v1/knowledge/repos", get(handle_repos))
        .route("/api/v1/knowledge/classify", post(handle_classify))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(app)
}

/// Serve the API on `listener` until `shutdown` resolves.
pub async fn serve<F>(
    app: Arc<App>,
    listener: tokio::net::TcpListener,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "HTTP server listening");
    axum::serve(listener, router(app))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

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

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Validation(message) => AppError {
                status: StatusCode::BAD_REQUEST,
                code: "bad_request",
                message,
            },
            ServiceError::NotFound(message) => AppError {
                status: StatusCode::NOT_FOUND,
                code: "not_found",
                message,
            },
            ServiceError::Internal(e) => {
                tracing::error!(error = %format!("{:#}", e), "request failed");
                AppError {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    code: "internal",
                    message: format!("{:#}", e),
                }
            }
        }
    }
}

type ApiResult<T> = Result<Json<T>, AppError>;

// ============ Handlers ============

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

async fn handle_import(
    State(app): State<Arc<App>>,
    Json(req): Json<ImportRequest>,
) -> ApiResult<ImportResponse> {
    Ok(Json(app.imports.submit(req).await?))
}

async fn handle_task_status(
    State(app): State<Arc<App>>,
    Path(id): Path<String>,
) -> ApiResult<TaskStatusView> {
    Ok(Json(app.imports.task_status(&id).await?))
}

#[derive(Deserialize)]
struct SearchBody {
    query: String,
    #[serde(default)]
    repo_name: Option<String>,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    limit: Option<i64>,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<SearchResult>,
}

async fn handle_search(
    State(app): State<Arc<App>>,
    Json(body): Json<SearchBody>,
) -> ApiResult<SearchResponse> {
    let results = app
        .search(
            &body.query,
            body.repo_name.as_deref(),
            body.mode.as_deref(),
            body.limit,
        )
        .await?;
    Ok(Json(SearchResponse { results }))
}

#[derive(Serialize)]
struct ReposResponse {
    repos: Vec<String>,
}

async fn handle_repos(State(app): State<Arc<App>>) -> ApiResult<ReposResponse> {
    Ok(Json(ReposResponse {
        repos: app.list_repos().await?,
    }))
}

#[derive(Deserialize)]
struct ClassifyBody {
    text: String,
}

async fn handle_classify(
    State(app): State<Arc<App>>,
    Json(body): Json<ClassifyBody>,
) -> ApiResult<Classification> {
    Ok(Json(app.classify(&body.text).await?))
}
