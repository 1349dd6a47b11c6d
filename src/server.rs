//! HTTP chat server.
//!
//! Exposes the [`Orchestrator`] as a JSON API for the learning platform's
//! chat widget.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/api/chat` | Run one chat turn |
//! | `POST` | `/api/feedback` | Record a user rating of an answer |
//!
//! # Authentication
//!
//! `/api/*` requires an `Api-Key` header matching one of the keys in the
//! environment variable named by `[server].api_keys_env` (default
//! `KIC_API_KEYS`, comma-separated). With no keys configured the API is
//! open and a warning is logged at startup.
//!
//! # Chat Contract
//!
//! ```json
//! // request
//! { "session_id": null, "history": [], "message": "Wie lange dauert der Kurs?",
//!   "course_id": 79, "module_id": null }
//!
//! // response
//! { "session_id": "0b0f…", "response_id": "7c1e…", "answer": "Der Kurs dauert sechs Wochen [[1]](https://…).",
//!   "language": "de", "kind": "grounded", "degraded": [],
//!   "sources": [{ "title": "Kursübersicht", "url": "https://…" }] }
//! ```
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "message must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unauthorized` (401), `cancelled`
//! (503). Failures of the
//! pipeline itself are answered with a cannot-answer reply, not an error.
//!
//! # Feedback
//!
//! ```json
//! { "response_id": "7c1e…", "score": 1, "feedback": "hilfreich" }
//! ```
//!
//! `score` is 1 (good) or 0 (bad). Feedback is emitted as a `tracing`
//! event carrying the `response_id` logged with the answer.
//!
//! # Cancellation and sessions
//!
//! A client disconnect drops the handler future and with it the turn.
//! Shutdown (Ctrl-C) cancels every running turn through a shared
//! [`CancellationToken`] before the listener closes. A background task
//! evicts idle sessions every minute until shutdown.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so the widget can be
//! embedded on any platform page.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use campus_assistant_core::models::{AnswerKind, ChatTurn, Scope, Stage};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::orchestrator::{ChatRequest, Orchestrator};

/// Header carrying the client's API key.
pub const API_KEY_HEADER: &str = "api-key";

const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub shutdown: CancellationToken,
    /// Accepted API keys; empty disables the check.
    pub api_keys: Arc<Vec<String>>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, shutdown: CancellationToken) -> Self {
        Self {
            orchestrator,
            shutdown,
            api_keys: Arc::new(Vec::new()),
        }
    }

    pub fn with_api_keys(mut self, keys: Vec<String>) -> Self {
        self.api_keys = Arc::new(keys);
        self
    }
}

/// Starts the server on `[server].bind` and runs until Ctrl-C.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let orchestrator = Arc::new(Orchestrator::from_config(config).await?);
    let shutdown = CancellationToken::new();

    let api_keys = config.server.api_keys();
    if api_keys.is_empty() {
        warn!(
            env = %config.server.api_keys_env,
            "no API keys configured, /api endpoints are unauthenticated"
        );
    }
    let state = AppState::new(Arc::clone(&orchestrator), shutdown.clone()).with_api_keys(api_keys);
    let sweeper = spawn_session_sweeper(orchestrator, shutdown.clone());

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "chat server listening");

    let signal = shutdown.clone();
    axum::serve(listener, router(state))
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

/// Periodically drops idle sessions until `shutdown` fires.
fn spawn_session_sweeper(
    orchestrator: Arc<Orchestrator>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SESSION_SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.cancelled() => break,
            }
            let evicted = orchestrator.sessions().evict_idle().await;
            if evicted > 0 {
                debug!(evicted, "session sweep");
            }
        }
    })
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        .route("/api/chat", post(handle_chat))
        .route("/api/feedback", post(handle_feedback))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .route("/health", get(handle_health))
        .merge(api)
        .layer(cors)
        .with_state(state)
}

async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if state.api_keys.is_empty() {
        return Ok(next.run(request).await);
    }
    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());
    match provided {
        Some(key) if state.api_keys.iter().any(|k| k == key) => Ok(next.run(request).await),
        _ => Err(unauthorized()),
    }
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

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn unauthorized() -> AppError {
    AppError {
        status: StatusCode::UNAUTHORIZED,
        code: "unauthorized".to_string(),
        message: "missing or invalid API key".to_string(),
    }
}

fn cancelled() -> AppError {
    AppError {
        status: StatusCode::SERVICE_UNAVAILABLE,
        code: "cancelled".to_string(),
        message: "chat turn cancelled".to_string(),
    }
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

// ============ POST /api/chat ============

#[derive(Debug, Deserialize)]
pub struct ChatBody {
    #[serde(default)]
    pub session_id: Option<String>,
    /// Seeds a new session; ignored when `session_id` names a live one.
    #[serde(default)]
    pub history: Vec<ChatTurn>,
    pub message: String,
    #[serde(default)]
    pub course_id: Option<i64>,
    #[serde(default)]
    pub module_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ChatReply {
    pub session_id: String,
    /// Identifies this answer for `/api/feedback`.
    pub response_id: String,
    pub answer: String,
    /// ISO 639-1 code of the answer language.
    pub language: String,
    pub kind: AnswerKind,
    pub degraded: Vec<Stage>,
    pub sources: Vec<SourceLink>,
}

#[derive(Debug, Serialize)]
pub struct SourceLink {
    pub title: String,
    pub url: String,
}

async fn handle_chat(
    State(state): State<AppState>,
    Json(body): Json<ChatBody>,
) -> Result<Json<ChatReply>, AppError> {
    if body.message.trim().is_empty() {
        return Err(bad_request("message must not be empty"));
    }
    let scope = Scope {
        course_id: body.course_id,
        module_id: body.module_id,
    };
    scope.validate().map_err(bad_request)?;

    let request = ChatRequest {
        session_id: body.session_id,
        history: body.history,
        message: body.message,
        scope,
    };
    let response = state
        .orchestrator
        .chat(request, state.shutdown.child_token())
        .await
        .map_err(|_| cancelled())?;

    let answer = response.answer;
    let response_id = Uuid::new_v4().to_string();
    info!(
        response_id = %response_id,
        session = %response.session_id,
        kind = ?answer.kind,
        "chat turn answered"
    );
    Ok(Json(ChatReply {
        session_id: response.session_id,
        response_id,
        answer: answer.text,
        language: answer.language.code().to_string(),
        kind: answer.kind,
        degraded: answer.degraded,
        sources: answer
            .citations
            .into_iter()
            .map(|c| SourceLink {
                title: c.title,
                url: c.url,
            })
            .collect(),
    }))
}

// ============ POST /api/feedback ============

#[derive(Debug, Deserialize)]
pub struct FeedbackBody {
    pub response_id: String,
    /// 1 = helpful, 0 = not helpful.
    pub score: i64,
    #[serde(default)]
    pub feedback: Option<String>,
}

async fn handle_feedback(Json(body): Json<FeedbackBody>) -> Result<StatusCode, AppError> {
    if body.response_id.trim().is_empty() {
        return Err(bad_request("response_id must not be empty"));
    }
    if !(0..=1).contains(&body.score) {
        return Err(bad_request("score must be 0 or 1"));
    }

    info!(
        response_id = %body.response_id,
        score = body.score,
        feedback = body.feedback.as_deref().unwrap_or(""),
        "user feedback"
    );
    Ok(StatusCode::NO_CONTENT)
}
