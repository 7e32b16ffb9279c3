//! HTTP API.
//!
//! Exposes the question answering pipeline and the conversation history as a
//! JSON API for web front-ends and other collaborators.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (version and index state) |
//! | `POST` | `/answer` | Answer a question; the conversation is saved |
//! | `POST` | `/index/rebuild` | Reload the corpus and rebuild the index |
//! | `POST` | `/feedback` | Rate a saved conversation up (`1`) or down (`-1`) |
//! | `GET`  | `/conversations/recent?limit=N` | Newest conversations first |
//! | `GET`  | `/feedback/stats` | Thumbs up/down counts |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "invalid_query", "message": "invalid query: question must not be empty" } }
//! ```
//!
//! Error codes: `invalid_query` (400), `invalid_argument` (400), `not_found`
//! (404), `index_not_ready` (409), `index_build_failure` (500), `config`
//! (500), `internal` (500), `search_failure` (502), `generation_failure`
//! (502), `data_unavailable` (503).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error, info};

use crate::config::Config;
use crate::db;
use crate::error::RagError;
use crate::history::{self, Conversation, FeedbackStats, HistoryStore};
use crate::index::{IndexState, IndexSummary};
use crate::pipeline::{AnswerResponse, Pipeline};

/// Upper bound for `GET /conversations/recent?limit=`.
const MAX_RECENT: u32 = 100;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<Pipeline>,
    history: Arc<HistoryStore>,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>, history: Arc<HistoryStore>) -> Self {
        Self { pipeline, history }
    }
}

/// All routes, with CORS applied.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/answer", post(handle_answer))
        .route("/index/rebuild", post(handle_rebuild))
        .route("/feedback", post(handle_feedback))
        .route("/conversations/recent", get(handle_recent))
        .route("/feedback/stats", get(handle_feedback_stats))
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server on `[server].bind` and runs until the process is
/// terminated.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();

    let history = HistoryStore::new(db::connect(&config).await?);
    history.init().await?;
    let pipeline = Pipeline::from_config(config).await?;

    let app = router(AppState::new(Arc::new(pipeline), Arc::new(history)));

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(bind = %bind_addr, "listening");
    println!("Listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;

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

/// Internal error type that converts into an Axum HTTP response.
pub struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn app_error(status: StatusCode, code: &str, message: impl Into<String>) -> AppError {
    AppError {
        status,
        code: code.to_string(),
        message: message.into(),
    }
}

fn invalid_argument(message: impl Into<String>) -> AppError {
    app_error(StatusCode::BAD_REQUEST, "invalid_argument", message)
}

fn not_found(message: impl Into<String>) -> AppError {
    app_error(StatusCode::NOT_FOUND, "not_found", message)
}

fn internal(err: anyhow::Error) -> AppError {
    error!(error = %format!("{:#}", err), "internal error");
    app_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", format!("{:#}", err))
}

/// HTTP status for a pipeline error.
pub fn status_for(err: &RagError) -> StatusCode {
    match err {
        RagError::InvalidQuery(_) | RagError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        RagError::IndexNotReady { .. } => StatusCode::CONFLICT,
        RagError::DataUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        RagError::SearchFailure { .. } | RagError::GenerationFailure { .. } => {
            StatusCode::BAD_GATEWAY
        }
        RagError::IndexBuildFailure { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        let status = status_for(&err);
        if err.is_recoverable() {
            debug!(code = err.code(), error = %err, "request rejected");
        } else {
            error!(code = err.code(), error = %err, "request failed");
        }
        app_error(status, err.code(), err.to_string())
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        invalid_argument(rejection.body_text())
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    index: String,
    index_state: Option<IndexState>,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        index: state.pipeline.config().index.name.clone(),
        index_state: state.pipeline.index_state().await.ok(),
    })
}

// ============ POST /answer ============

#[derive(Deserialize)]
struct AnswerRequest {
    question: String,
    #[serde(default)]
    top_k: Option<usize>,
    #[serde(default)]
    rebuild_index: bool,
}

async fn handle_answer(
    State(state): State<AppState>,
    payload: Result<Json<AnswerRequest>, JsonRejection>,
) -> Result<Json<AnswerResponse>, AppError> {
    let Json(req) = payload?;
    let top_k = req
        .top_k
        .unwrap_or(state.pipeline.config().retrieval.top_k);

    let response = state
        .pipeline
        .answer(&req.question, top_k, req.rebuild_index)
        .await?;

    state
        .history
        .save_conversation(response.conversation_id, &req.question, &response.answer)
        .await
        .map_err(internal)?;

    Ok(Json(response))
}

// ============ POST /index/rebuild ============

async fn handle_rebuild(State(state): State<AppState>) -> Result<Json<IndexSummary>, AppError> {
    Ok(Json(state.pipeline.rebuild_index().await?))
}

// ============ POST /feedback ============

#[derive(Deserialize)]
struct FeedbackRequest {
    conversation_id: String,
    score: i64,
}

async fn handle_feedback(
    State(state): State<AppState>,
    payload: Result<Json<FeedbackRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, AppError> {
    let Json(req) = payload?;

    if !history::is_valid_score(req.score) {
        return Err(invalid_argument(format!(
            "score must be 1 or -1, got {}",
            req.score
        )));
    }
    let exists = state
        .history
        .conversation_exists(&req.conversation_id)
        .await
        .map_err(internal)?;
    if !exists {
        return Err(not_found(format!(
            "no conversation with id: {}",
            req.conversation_id
        )));
    }

    state
        .history
        .save_feedback(&req.conversation_id, req.score)
        .await
        .map_err(internal)?;

    Ok(Json(serde_json::json!({ "status": "ok" })))
}

// ============ GET /conversations/recent ============

#[derive(Deserialize)]
struct RecentParams {
    limit: Option<u32>,
}

#[derive(Serialize)]
struct RecentResponse {
    conversations: Vec<Conversation>,
}

async fn handle_recent(
    State(state): State<AppState>,
    Query(params): Query<RecentParams>,
) -> Result<Json<RecentResponse>, AppError> {
    let limit = params.limit.unwrap_or(5);
    if limit == 0 || limit > MAX_RECENT {
        return Err(invalid_argument(format!(
            "limit must be between 1 and {}",
            MAX_RECENT
        )));
    }
    let conversations = state
        .history
        .recent_conversations(limit)
        .await
        .map_err(internal)?;
    Ok(Json(RecentResponse { conversations }))
}

// ============ GET /feedback/stats ============

async fn handle_feedback_stats(
    State(state): State<AppState>,
) -> Result<Json<FeedbackStats>, AppError> {
    Ok(Json(state.history.feedback_stats().await.map_err(internal)?))
}
