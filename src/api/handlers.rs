//! HTTP request handlers

use super::sse::sse_stream;
use super::types::{
    ErrorResponse, InvokeResponse, RunRequest, ThreadCreatedResponse, ThreadListResponse,
    DEFAULT_THREAD_ID,
};
use super::AppState;
use crate::runtime::RuntimeError;
use crate::state_machine::{StreamEvent, ThreadValues, TransitionError};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Single-thread entry point
        .route("/", post(run_default))
        .route("/thread/:id", get(get_thread))
        .route("/thread/:id/stream", post(stream_thread))
        .route("/thread/:id/invoke", post(invoke_thread))
        .route("/threads", get(list_threads).post(create_thread))
        .route("/version", get(get_version))
        .with_state(state)
}

// ============================================================
// Turns
// ============================================================

async fn run_default(
    State(state): State<AppState>,
    Json(req): Json<RunRequest>,
) -> Result<Response, AppError> {
    let thread_id = req
        .thread_id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_THREAD_ID.to_string());
    let rx = state
        .runtime
        .begin_turn(&thread_id, req.into_turn())
        .await?;
    Ok(sse_stream(rx).into_response())
}

async fn stream_thread(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<RunRequest>,
) -> Result<Response, AppError> {
    let rx = state.runtime.begin_turn(&id, req.into_turn()).await?;
    Ok(sse_stream(rx).into_response())
}

async fn invoke_thread(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<RunRequest>,
) -> Result<Json<InvokeResponse>, AppError> {
    let mut rx = state.runtime.begin_turn(&id, req.into_turn()).await?;

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    if !events.last().is_some_and(StreamEvent::is_terminal) {
        tracing::warn!(thread_id = %id, "Turn stream closed without done or error");
    }

    // The turn's own final snapshot; another turn may start once the lock is released
    let last_values = events.iter().rev().find_map(|event| match event {
        StreamEvent::Values { values } => Some(values.clone()),
        _ => None,
    });
    let values = match last_values {
        Some(values) => values,
        None => state.runtime.snapshot(&id).await?,
    };
    Ok(Json(InvokeResponse { events, values }))
}

// ============================================================
// Threads
// ============================================================

async fn get_thread(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ThreadValues>, AppError> {
    Ok(Json(state.runtime.snapshot(&id).await?))
}

async fn list_threads(State(state): State<AppState>) -> Result<Json<ThreadListResponse>, AppError> {
    let threads = state.runtime.list().await?;
    Ok(Json(ThreadListResponse { threads }))
}

async fn create_thread(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<ThreadCreatedResponse>), AppError> {
    let thread = state.runtime.create_thread().await?;
    Ok((
        StatusCode::CREATED,
        Json(ThreadCreatedResponse {
            values: thread.values(),
            thread_id: thread.thread_id,
        }),
    ))
}

async fn get_version() -> impl IntoResponse {
    env!("CARGO_PKG_VERSION")
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl From<RuntimeError> for AppError {
    fn from(e: RuntimeError) -> Self {
        match e {
            RuntimeError::Busy(_) | RuntimeError::Transition(TransitionError::AgentBusy) => {
                AppError::Conflict(e.to_string())
            }
            RuntimeError::ThreadNotFound(_) => AppError::NotFound(e.to_string()),
            RuntimeError::MissingMessage(_)
            | RuntimeError::InvalidContext(_)
            | RuntimeError::Transition(_) => AppError::BadRequest(e.to_string()),
            RuntimeError::Store(_) => {
                tracing::error!(error = %e, "Storage failure");
                AppError::Internal(e.to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
