//! Async task endpoints — submit, poll, fetch, cancel.
//!
//! - `POST /v1/tasks`              — submit async work
//! - `GET  /v1/tasks`              — list tasks (filter by user, kind, state)
//! - `GET  /v1/tasks/:id`          — status snapshot
//! - `GET  /v1/tasks/:id/events`   — progress events since a sequence number
//! - `GET  /v1/tasks/:id/result`   — final result (terminal tasks only)
//! - `POST /v1/tasks/:id/cancel`   — cooperative cancel

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use guru_domain::error::ErrorKind;
use guru_domain::task::{TaskKind, TaskState};
use guru_registry::ListFilter;

use crate::error::ApiError;
use crate::runtime::jobs;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / query shapes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct SubmitRequest {
    kind: TaskKind,
    user_id: String,
    inputs: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    #[serde(default)]
    pub since_seq: u64,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/tasks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn submit_task(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Result<impl IntoResponse, ApiError> {
    let req: SubmitRequest = serde_json::from_value(body)
        .map_err(|e| ApiError::invalid_input(format!("invalid submission: {e}")))?;
    if req.user_id.trim().is_empty() {
        return Err(ApiError::invalid_input("user_id must be non-empty"));
    }

    // Validate inputs and build the job body before touching the registry
    // so a bad request leaves no task behind.
    let job = jobs::build_job(&state, req.kind, &req.inputs)
        .map_err(ApiError::invalid_input)?;

    let force_regenerate = req
        .inputs
        .get("force_regenerate")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let task = state
        .registry
        .create(req.kind, &req.user_id, &req.inputs, force_regenerate)?;

    if let Err(e) = state.pool.submit(req.kind, task.task_id, job) {
        // The task was registered but never enqueued; release it.
        let _ = state.registry.cancel(task.task_id);
        return Err(ApiError::new(e.kind(), e.to_string())
            .with_retry_after(e.retry_after_secs()));
    }

    tracing::info!(
        task_id = %task.task_id,
        correlation_id = %task.correlation_id,
        kind = %req.kind,
        user_id = %req.user_id,
        "task submitted"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "task_id": task.task_id,
            "state": task.state,
        })),
    ))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/tasks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list_tasks(
    State(state): State<AppState>,
    Query(q): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let kind = match &q.kind {
        Some(raw) => Some(parse_enum::<TaskKind>(raw, "kind")?),
        None => None,
    };
    let task_state = match &q.state {
        Some(raw) => Some(parse_enum::<TaskState>(raw, "state")?),
        None => None,
    };

    let (tasks, total) = state.registry.list(&ListFilter {
        user_id: q.user_id,
        kind,
        state: task_state,
        limit: q.limit.min(200),
        offset: q.offset,
    });

    Ok(Json(json!({
        "tasks": tasks,
        "total": total,
        "limit": q.limit.min(200),
        "offset": q.offset,
    })))
}

fn parse_enum<T: serde::de::DeserializeOwned>(raw: &str, field: &str) -> Result<T, ApiError> {
    serde_json::from_value(json!(raw))
        .map_err(|_| ApiError::invalid_input(format!("unrecognized {field}: {raw}")))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/tasks/:id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn task_status(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let task = state.registry.get(task_id)?;
    Ok(Json(json!({
        "task_id": task.task_id,
        "kind": task.kind,
        "state": task.state,
        "progress_percent": task.progress_percent,
        "partial_result": task.partial_result,
        "submitted_at": task.submitted_at,
        "started_at": task.started_at,
        "completed_at": task.completed_at,
        "attempt_count": task.attempt_count,
    })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/tasks/:id/events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn task_events(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    Query(q): Query<EventsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let events = state.registry.events_since(task_id, q.since_seq)?;
    Ok(Json(json!({
        "task_id": task_id,
        "events": events,
    })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/tasks/:id/result
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn task_result(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> Result<axum::response::Response, ApiError> {
    let task = state.registry.get(task_id)?;
    match task.state {
        TaskState::Completed => Ok(Json(json!({
            "task_id": task.task_id,
            "final_result": task.final_result,
        }))
        .into_response()),
        TaskState::Queued | TaskState::Running => Err(ApiError::new(
            ErrorKind::StateConflict,
            format!("task is {}; result not available yet", task.state),
        )),
        TaskState::Failed => {
            let error = task.error.unwrap_or(guru_domain::task::TaskErrorInfo {
                kind: ErrorKind::Internal,
                message: "task failed without a recorded error".into(),
            });
            Ok((
                StatusCode::GONE,
                Json(json!({
                    "error_kind": error.kind,
                    "message": error.message,
                    "partial_result": task.partial_result,
                })),
            )
                .into_response())
        }
        TaskState::Cancelled => Ok((
            StatusCode::GONE,
            Json(json!({
                "error_kind": ErrorKind::Cancelled,
                "message": "task was cancelled",
                "partial_result": task.partial_result,
            })),
        )
            .into_response()),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/tasks/:id/cancel
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn cancel_task(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let task = state.registry.get(task_id)?;
    if task.state.is_terminal() && task.state != TaskState::Cancelled {
        return Err(ApiError::new(
            ErrorKind::StateConflict,
            format!("task is already {}", task.state),
        ));
    }

    // Mark the store first, then signal the job; it observes the token at
    // its next suspension point and any in-flight upstream call is
    // abandoned.
    state.registry.cancel(task_id)?;
    state.pool.cancel(task_id);

    tracing::info!(task_id = %task_id, "task cancelled");
    Ok(Json(json!({
        "task_id": task_id,
        "state": TaskState::Cancelled,
    })))
}
