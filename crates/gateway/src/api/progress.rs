//! User progress endpoints.
//!
//! - `POST /v1/progress/quiz`                    — record a quiz score
//! - `POST /v1/progress/lessons`                 — record a lesson completion
//! - `GET  /v1/progress/:user_id`                — derived progress view
//! - `POST /v1/progress/:user_id/interventions`  — force trigger evaluation
//!
//! Recording a quiz score also runs the trigger pipeline, so a failing
//! score dispatches its intervention without waiting for a manual poke.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use guru_domain::task::TaskKind;

use crate::error::ApiError;
use crate::runtime::jobs;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request shapes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct QuizRequest {
    user_id: String,
    subject: String,
    topic: String,
    score: u32,
}

#[derive(Debug, Deserialize)]
struct LessonCompletionRequest {
    user_id: String,
    subject: String,
    topic: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/progress/quiz
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn record_quiz(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Result<impl IntoResponse, ApiError> {
    let req: QuizRequest = serde_json::from_value(body)
        .map_err(|e| ApiError::invalid_input(format!("invalid quiz record: {e}")))?;
    if req.user_id.trim().is_empty() {
        return Err(ApiError::invalid_input("user_id must be non-empty"));
    }

    let now = Utc::now();
    state
        .tracker
        .record_quiz(&req.user_id, &req.subject, &req.topic, req.score, now)
        .map_err(|e| ApiError::new(e.kind(), e.to_string()))?;

    let dispatched = dispatch_interventions(&state, &req.user_id);
    if !dispatched.is_empty() {
        tracing::info!(
            user_id = %req.user_id,
            count = dispatched.len(),
            "interventions dispatched from quiz telemetry"
        );
    }

    Ok(StatusCode::NO_CONTENT)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/progress/lessons
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn record_lesson_completion(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Result<impl IntoResponse, ApiError> {
    let req: LessonCompletionRequest = serde_json::from_value(body)
        .map_err(|e| ApiError::invalid_input(format!("invalid completion record: {e}")))?;
    if req.user_id.trim().is_empty() {
        return Err(ApiError::invalid_input("user_id must be non-empty"));
    }

    state
        .tracker
        .record_lesson_completion(&req.user_id, &req.subject, &req.topic, Utc::now());
    Ok(StatusCode::NO_CONTENT)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/progress/:user_id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_progress(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let progress = state
        .tracker
        .get(&user_id)
        .ok_or_else(|| ApiError::unknown(format!("no progress recorded for user '{user_id}'")))?;

    // Surface the user's intervention tasks alongside the aggregate.
    let (tasks, _) = state.registry.list(&guru_registry::ListFilter {
        user_id: Some(user_id.clone()),
        kind: Some(TaskKind::Intervention),
        state: None,
        limit: 50,
        offset: 0,
    });
    let interventions: Vec<serde_json::Value> = tasks
        .iter()
        .map(|t| {
            json!({
                "task_id": t.task_id,
                "state": t.state,
                "submitted_at": t.submitted_at,
            })
        })
        .collect();

    Ok(Json(json!({
        "user_id": progress.user_id,
        "performance_band": progress.performance_band,
        "lessons_completed": progress.lessons_completed,
        "quiz_scores": progress.quiz_scores,
        "last_intervention_at": progress.last_intervention_at,
        "interventions": interventions,
    })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/progress/:user_id/interventions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn trigger_interventions(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if state.tracker.get(&user_id).is_none() {
        return Err(ApiError::unknown(format!(
            "no progress recorded for user '{user_id}'"
        )));
    }

    let task_ids = dispatch_interventions(&state, &user_id);
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "task_ids": task_ids })),
    ))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dispatch pipeline
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Evaluate triggers for a user and enqueue one intervention task per
/// trigger that clears its dedup window. Returns the ids of enqueued
/// tasks.
pub fn dispatch_interventions(state: &AppState, user_id: &str) -> Vec<Uuid> {
    let now = Utc::now();
    let triggers = state.tracker.evaluate_triggers(user_id, now);
    let to_fire = state.tracker.begin_dispatch(user_id, triggers, now);

    let mut task_ids = Vec::new();
    for trigger in to_fire {
        let inputs = json!({
            "user_id": user_id,
            "trigger_kind": trigger.kind.as_str(),
            "context": {
                "subject": trigger.subject,
                "topic": trigger.topic,
                "reason": trigger.reason,
            },
        });

        let job = match jobs::build_job(state, TaskKind::Intervention, &inputs) {
            Ok(job) => job,
            Err(e) => {
                tracing::error!(user_id, error = %e, "intervention job build failed");
                continue;
            }
        };

        // A still-running intervention for the same trigger suppresses
        // the new one via the fingerprint index.
        let task = match state
            .registry
            .create(TaskKind::Intervention, user_id, &inputs, false)
        {
            Ok(task) => task,
            Err(e) => {
                tracing::debug!(user_id, error = %e, "intervention suppressed");
                continue;
            }
        };

        match state.pool.submit(TaskKind::Intervention, task.task_id, job) {
            Ok(()) => task_ids.push(task.task_id),
            Err(e) => {
                tracing::warn!(
                    user_id,
                    task_id = %task.task_id,
                    error = %e,
                    "intervention enqueue rejected"
                );
                let _ = state.registry.cancel(task.task_id);
            }
        }
    }
    task_ids
}
