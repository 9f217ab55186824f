//! High-latency scenario: a long-running job must keep emitting progress,
//! and cancellation must take effect promptly.
//!
//! SLOs: no silent stretch longer than `stall_threshold` while the task
//! runs (a stretch ends with either a new progress event or a terminal
//! transition), and a cancel request is observed within 5 s.

use std::time::Duration;

use anyhow::Result;
use serde_json::json;
use tokio::time::Instant;

use crate::client::HarnessClient;
use crate::report::ScenarioReport;

#[derive(Debug, Clone)]
pub struct LatencyParams {
    /// How long to let the job run before cancelling.
    pub observe: Duration,
    /// Maximum tolerated silence while running.
    pub stall_threshold: Duration,
    /// Requested job duration, forwarded to the simulation upstream.
    pub job_duration: Duration,
}

impl Default for LatencyParams {
    fn default() -> Self {
        Self {
            observe: Duration::from_secs(60),
            stall_threshold: Duration::from_secs(30),
            job_duration: Duration::from_secs(300),
        }
    }
}

pub async fn run(client: &HarnessClient, params: &LatencyParams) -> Result<ScenarioReport> {
    let mut report = ScenarioReport::new("high-latency");

    let outcome = client
        .submit_task(
            "simulation",
            "harness-latency",
            &json!({
                "scenario": "harness-high-latency",
                "duration_secs": params.job_duration.as_secs(),
                "force_regenerate": true,
            }),
        )
        .await?;

    let Some(task_id) = outcome.task_id.clone() else {
        report.check(
            "job submitted",
            false,
            format!("submission returned {}", outcome.status),
        );
        return Ok(report);
    };
    report.check("job submitted", true, format!("task {task_id}"));

    // Watch progress: a stall is a stretch with no new event and no
    // terminal transition.
    let mut last_seq = 0u64;
    let mut last_signal = Instant::now();
    let mut max_gap = Duration::ZERO;
    let mut terminal_early = false;
    let observe_until = Instant::now() + params.observe;

    while Instant::now() < observe_until {
        let events = client.task_events(&task_id, last_seq).await?;
        if let Some(last) = events.last() {
            last_seq = last.seq;
            last_signal = Instant::now();
        }

        let snapshot = client.task_status(&task_id).await?;
        if ["completed", "failed", "cancelled"].contains(&snapshot.state.as_str()) {
            terminal_early = true;
            break;
        }

        max_gap = max_gap.max(last_signal.elapsed());
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    report.check(
        "progress never stalls past threshold",
        max_gap <= params.stall_threshold,
        format!("max silent gap {max_gap:?} (threshold {:?})", params.stall_threshold),
    );

    if terminal_early {
        report.note("job finished before the cancel phase; cancel check skipped");
        return Ok(report);
    }

    // Cancel and time how long the state takes to flip.
    let cancel_sent = Instant::now();
    let status = client.cancel_task(&task_id).await?;
    report.check("cancel accepted", status == 200, format!("HTTP {status}"));

    let mut cancelled_within = None;
    while cancel_sent.elapsed() < Duration::from_secs(5) {
        let snapshot = client.task_status(&task_id).await?;
        if snapshot.state == "cancelled" {
            cancelled_within = Some(cancel_sent.elapsed());
            break;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    report.check(
        "cancellation observed within 5s",
        cancelled_within.is_some(),
        match cancelled_within {
            Some(d) => format!("{d:?}"),
            None => "still not cancelled after 5s".into(),
        },
    );

    Ok(report)
}
