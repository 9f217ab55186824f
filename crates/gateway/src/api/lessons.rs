//! Lesson endpoints.
//!
//! - `GET  /v1/lessons?subject=&topic=` — fetch a stored lesson; never generates
//! - `POST /v1/lessons`                 — compose a lesson synchronously
//!
//! The POST honors the conflict rule: with `force_regenerate=false` and a
//! stored lesson for `(subject, topic)`, the request is answered 409
//! without invoking the composer. Async lesson generation goes through
//! `POST /v1/tasks` with `kind=lesson` instead.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use serde_json::json;

use guru_domain::cancel::CancelToken;
use guru_domain::error::ErrorKind;
use guru_domain::lesson::LessonRequest;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LessonIdentityQuery {
    pub subject: String,
    pub topic: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/lessons
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_lesson(
    State(state): State<AppState>,
    Query(q): Query<LessonIdentityQuery>,
) -> Result<impl IntoResponse, ApiError> {
    match state.lessons.get(&q.subject, &q.topic) {
        Some(lesson) => Ok(Json(lesson)),
        None => Err(ApiError::unknown(format!(
            "no lesson stored for subject '{}' topic '{}'",
            q.subject, q.topic
        ))),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/lessons
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn create_lesson(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Result<impl IntoResponse, ApiError> {
    let req: LessonRequest = serde_json::from_value(body)
        .map_err(|e| ApiError::invalid_input(format!("invalid lesson request: {e}")))?;
    if req.subject.trim().is_empty() || req.topic.trim().is_empty() {
        return Err(ApiError::invalid_input(
            "subject and topic must be non-empty",
        ));
    }
    if req.user_id.trim().is_empty() {
        return Err(ApiError::invalid_input("user_id must be non-empty"));
    }

    // Conflict rule: the composer is unaware of existing artifacts; the
    // gateway answers from storage without invoking it.
    if !req.force_regenerate && state.lessons.contains(&req.subject, &req.topic) {
        return Err(ApiError::new(
            ErrorKind::StateConflict,
            format!(
                "a lesson for subject '{}' topic '{}' already exists; \
                 set force_regenerate to replace it",
                req.subject, req.topic
            ),
        ));
    }

    let cancel = CancelToken::new();
    let lesson = state
        .composer
        .compose(&req, &cancel)
        .await
        .map_err(|e| ApiError::new(e.kind(), e.to_string()))?;

    state.lessons.put(lesson.clone());
    tracing::info!(
        subject = %lesson.subject,
        topic = %lesson.topic,
        method = ?lesson.metadata.generation_method,
        "lesson composed"
    );

    Ok((StatusCode::CREATED, Json(json!(lesson))))
}
