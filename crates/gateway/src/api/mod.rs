//! HTTP surface of the orchestration core.

pub mod admin;
pub mod auth;
pub mod lessons;
pub mod progress;
pub mod tasks;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Build the full API router.
///
/// Routes are split into **public** probes (health, integration status)
/// and **protected** routes gated behind the bearer-token middleware.
pub fn router(state: AppState) -> Router {
    let public = Router::new()
        .route("/v1/health", get(admin::health))
        .route("/v1/status", get(admin::integration_status));

    let protected = Router::new()
        // Async tasks
        .route("/v1/tasks", post(tasks::submit_task).get(tasks::list_tasks))
        .route("/v1/tasks/:id", get(tasks::task_status))
        .route("/v1/tasks/:id/events", get(tasks::task_events))
        .route("/v1/tasks/:id/result", get(tasks::task_result))
        .route("/v1/tasks/:id/cancel", post(tasks::cancel_task))
        // Lessons
        .route(
            "/v1/lessons",
            get(lessons::get_lesson).post(lessons::create_lesson),
        )
        // Progress & interventions
        .route("/v1/progress/quiz", post(progress::record_quiz))
        .route(
            "/v1/progress/lessons",
            post(progress::record_lesson_completion),
        )
        .route("/v1/progress/:user_id", get(progress::get_progress))
        .route(
            "/v1/progress/:user_id/interventions",
            post(progress::trigger_interventions),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_token,
        ));

    public.merge(protected).with_state(state)
}
