//! Job bodies for the four task kinds.
//!
//! Every body follows the same loop discipline: check cancellation, talk
//! to the upstream, emit progress, sleep. Progress emission is
//! best-effort — a rejected emit (task already terminal) never sinks the
//! job on its own.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

use guru_composer::ComposeError;
use guru_domain::error::ErrorKind;
use guru_domain::lesson::LessonRequest;
use guru_domain::task::TaskKind;
use guru_upstream::UpstreamError;

use crate::runtime::pool::{JobContext, JobError, JobFn};
use crate::state::AppState;

/// Cadence of the simulation polling loop.
const SIM_POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Consecutive poll failures tolerated before the job gives up.
const SIM_POLL_FAILURE_LIMIT: u32 = 5;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Input shapes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct TtsInputs {
    text: String,
    #[serde(default)]
    voice: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InterventionInputs {
    user_id: String,
    trigger_kind: String,
    #[serde(default)]
    context: Value,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Builder
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Validate the inputs for `kind` and produce the job body. Errors are
/// validation messages for the gateway to surface as `invalid_input`.
pub fn build_job(state: &AppState, kind: TaskKind, inputs: &Value) -> Result<JobFn, String> {
    match kind {
        TaskKind::Lesson => lesson_job(state, inputs),
        TaskKind::Simulation => simulation_job(state, inputs),
        TaskKind::Intervention => intervention_job(state, inputs),
        TaskKind::Tts => tts_job(state, inputs),
    }
}

fn lesson_job(state: &AppState, inputs: &Value) -> Result<JobFn, String> {
    let req: LessonRequest = serde_json::from_value(inputs.clone())
        .map_err(|e| format!("invalid lesson inputs: {e}"))?;
    if req.subject.trim().is_empty() || req.topic.trim().is_empty() {
        return Err("lesson subject and topic must be non-empty".into());
    }

    let composer = state.composer.clone();
    let store = state.lessons.clone();
    Ok(Arc::new(move |ctx: JobContext| {
        let composer = composer.clone();
        let store = store.clone();
        let req = req.clone();
        Box::pin(async move {
            emit(&ctx, 10, "retrieving", None);
            let lesson = composer
                .compose(&req, &ctx.cancel)
                .await
                .map_err(compose_error)?;
            emit(&ctx, 90, "storing", None);
            store.put(lesson.clone());
            serde_json::to_value(&lesson)
                .map_err(|e| JobError::fatal(ErrorKind::Internal, e.to_string()))
        })
    }))
}

fn simulation_job(state: &AppState, inputs: &Value) -> Result<JobFn, String> {
    if !inputs.is_object() {
        return Err("simulation inputs must be an object".into());
    }
    let payload = inputs.clone();
    let simulation = state.services.simulation.clone();

    Ok(Arc::new(move |ctx: JobContext| {
        let simulation = simulation.clone();
        let payload = payload.clone();
        Box::pin(async move {
            emit(&ctx, 5, "starting", None);
            let handle = simulation
                .start(&payload, &ctx.cancel)
                .await
                .map_err(upstream_error)?;

            let mut last_percent = 5u32;
            let mut poll_failures = 0u32;
            loop {
                if ctx.cancel.is_cancelled() {
                    return Err(JobError::fatal(ErrorKind::Cancelled, "cancelled"));
                }

                match simulation.poll(&handle.id, &ctx.cancel).await {
                    Ok(status) => {
                        poll_failures = 0;
                        if status.is_failed() {
                            return Err(JobError::fatal(
                                ErrorKind::UpstreamUnavailable,
                                status
                                    .error
                                    .unwrap_or_else(|| "simulation failed".into()),
                            ));
                        }
                        if status.is_completed() {
                            emit(&ctx, 99, "finalizing", None);
                            return Ok(status
                                .result
                                .unwrap_or_else(|| json!({"state": "completed"})));
                        }
                        let percent = status
                            .percent
                            .unwrap_or(last_percent)
                            .clamp(last_percent, 99);
                        last_percent = percent;
                        emit(&ctx, percent, "simulating", None);
                    }
                    Err(UpstreamError::Cancelled) => {
                        return Err(JobError::fatal(ErrorKind::Cancelled, "cancelled"));
                    }
                    Err(e) => {
                        poll_failures += 1;
                        if poll_failures >= SIM_POLL_FAILURE_LIMIT {
                            return Err(upstream_error(e));
                        }
                    }
                }

                tokio::time::sleep(SIM_POLL_INTERVAL).await;
            }
        })
    }))
}

fn intervention_job(state: &AppState, inputs: &Value) -> Result<JobFn, String> {
    let parsed: InterventionInputs = serde_json::from_value(inputs.clone())
        .map_err(|e| format!("invalid intervention inputs: {e}"))?;
    let tutoring = state.services.tutoring.clone();

    Ok(Arc::new(move |ctx: JobContext| {
        let tutoring = tutoring.clone();
        let user_id = parsed.user_id.clone();
        let trigger_kind = parsed.trigger_kind.clone();
        let context = parsed.context.clone();
        Box::pin(async move {
            emit(&ctx, 20, "consulting-tutor", None);
            let request = json!({
                "user_id": user_id,
                "trigger_kind": trigger_kind,
                "context": context,
            });
            // The task id doubles as the idempotency key, which lets the
            // client retry the non-idempotent POST safely.
            let key = ctx.task_id.to_string();
            let recommendations = tutoring
                .recommend(&request, Some(&key), &ctx.cancel)
                .await
                .map_err(upstream_error)?;
            emit(&ctx, 90, "received", None);
            Ok(json!({
                "user_id": user_id,
                "trigger_kind": trigger_kind,
                "recommendations": recommendations,
            }))
        })
    }))
}

fn tts_job(state: &AppState, inputs: &Value) -> Result<JobFn, String> {
    let parsed: TtsInputs = serde_json::from_value(inputs.clone())
        .map_err(|e| format!("invalid tts inputs: {e}"))?;
    if parsed.text.trim().is_empty() {
        return Err("tts text must be non-empty".into());
    }
    let tts = state.services.tts.clone();

    Ok(Arc::new(move |ctx: JobContext| {
        let tts = tts.clone();
        let text = parsed.text.clone();
        let voice = parsed.voice.clone();
        Box::pin(async move {
            emit(&ctx, 10, "synthesizing", None);
            let key = ctx.task_id.to_string();
            let audio = tts
                .synthesize(&text, voice.as_deref(), Some(&key), &ctx.cancel)
                .await
                .map_err(upstream_error)?;
            emit(&ctx, 90, "encoding", None);
            Ok(json!({
                "content_type": audio.content_type,
                "size_bytes": audio.bytes.len(),
                "audio_hex": hex::encode(&audio.bytes),
            }))
        })
    }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn emit(ctx: &JobContext, percent: u32, stage: &str, partial: Option<Value>) {
    if let Err(e) = ctx.registry.emit(ctx.task_id, percent, stage, partial) {
        tracing::debug!(task_id = %ctx.task_id, error = %e, "progress emit rejected");
    }
}

fn compose_error(e: ComposeError) -> JobError {
    let kind = e.kind();
    JobError {
        kind,
        message: e.to_string(),
        retryable: kind == ErrorKind::UpstreamUnavailable,
    }
}

fn upstream_error(e: UpstreamError) -> JobError {
    JobError {
        kind: e.kind(),
        message: e.to_string(),
        retryable: e.is_transient(),
    }
}
