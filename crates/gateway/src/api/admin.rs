//! Liveness and integration status.
//!
//! - `GET /v1/health` — trivial probe
//! - `GET /v1/status` — task counts, pool gauges, breaker states, upstream
//!   call counters

use axum::extract::State;
use axum::response::{IntoResponse, Json};
use serde_json::json;

use guru_domain::task::TaskState;

use crate::state::AppState;

pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn integration_status(State(state): State<AppState>) -> impl IntoResponse {
    let counts = state.registry.state_counts();
    let task_counts = json!({
        "queued": counts.get(&TaskState::Queued).copied().unwrap_or(0),
        "running": counts.get(&TaskState::Running).copied().unwrap_or(0),
        "completed": counts.get(&TaskState::Completed).copied().unwrap_or(0),
        "failed": counts.get(&TaskState::Failed).copied().unwrap_or(0),
        "cancelled": counts.get(&TaskState::Cancelled).copied().unwrap_or(0),
    });

    let breakers: Vec<serde_json::Value> = state
        .upstream
        .breaker_snapshot()
        .into_iter()
        .map(|(service, endpoint, circuit)| {
            json!({
                "service": service,
                "endpoint": endpoint,
                "status": circuit.status,
                "consecutive_failures": circuit.consecutive_failures,
                "opened_at": circuit.opened_at,
            })
        })
        .collect();

    let upstream_calls: Vec<serde_json::Value> = state
        .upstream
        .counters_snapshot()
        .into_iter()
        .map(|(service, endpoint, counters)| {
            json!({
                "service": service,
                "endpoint": endpoint,
                "calls": counters.calls,
                "failures": counters.failures,
            })
        })
        .collect();

    Json(json!({
        "status": "ok",
        "tasks": task_counts,
        "pools": state.pool.metrics(),
        "breakers": breakers,
        "upstream_calls": upstream_calls,
        "lessons_stored": state.lessons.len(),
    }))
}
