//! Bursty scenario: N clients submit within a small window.
//!
//! Records per-request outcome (submitted, backpressured, failed),
//! end-to-end latency percentiles, and the backpressure ratio, then polls
//! every accepted task to a terminal state while watching for illegal
//! state regressions.
//!
//! SLOs (N ≤ 10): submission success ≥ 80%, p95 submission latency ≤ 1 s,
//! every accepted task terminal within the scenario deadline, no state
//! sequence regression.

use std::time::Duration;

use anyhow::Result;
use futures_util::future::join_all;
use serde_json::json;

use crate::client::{HarnessClient, SubmitOutcome};
use crate::report::{percentile, ScenarioReport};

#[derive(Debug, Clone)]
pub struct BurstyParams {
    pub clients: usize,
    pub window: Duration,
    /// How long accepted tasks get to reach a terminal state.
    pub completion_deadline: Duration,
}

impl Default for BurstyParams {
    fn default() -> Self {
        Self {
            clients: 10,
            window: Duration::from_millis(100),
            completion_deadline: Duration::from_secs(60),
        }
    }
}

/// A task's observed states must be a prefix of a legal path through the
/// state machine.
pub fn legal_state_sequence(states: &[String]) -> bool {
    fn order(state: &str) -> Option<u8> {
        match state {
            "queued" => Some(0),
            "running" => Some(1),
            "completed" | "failed" | "cancelled" => Some(2),
            _ => None,
        }
    }

    let mut last = 0u8;
    let mut terminal: Option<&str> = None;
    for state in states {
        let Some(rank) = order(state) else {
            return false;
        };
        if rank < last {
            return false;
        }
        if let Some(t) = terminal {
            if t != state.as_str() {
                return false;
            }
        }
        if rank == 2 {
            terminal = Some(state.as_str());
        }
        last = rank;
    }
    true
}

pub async fn run(client: &HarnessClient, params: &BurstyParams) -> Result<ScenarioReport> {
    let mut report = ScenarioReport::new("bursty");

    // Stagger the submissions across the window. Template-mode lessons
    // keep the scenario independent of upstream availability.
    let stagger = params.window / params.clients.max(1) as u32;
    let submissions = (0..params.clients).map(|i| async move {
        tokio::time::sleep(stagger * i as u32).await;
        client
            .submit_task(
                "lesson",
                &format!("harness-u{i}"),
                &json!({
                    "subject": "science",
                    "topic": format!("burst-topic-{i}"),
                    "user_id": format!("harness-u{i}"),
                    "use_knowledge_store": false,
                    "include_encyclopedia": false,
                    "force_regenerate": true,
                }),
            )
            .await
    });
    let outcomes: Vec<SubmitOutcome> = join_all(submissions)
        .await
        .into_iter()
        .collect::<Result<_>>()?;

    let accepted: Vec<&SubmitOutcome> = outcomes.iter().filter(|o| o.accepted()).collect();
    let backpressured = outcomes.iter().filter(|o| o.backpressured()).count();
    let failed = outcomes.len() - accepted.len() - backpressured;
    let latencies: Vec<Duration> = outcomes.iter().map(|o| o.latency).collect();
    let p50 = percentile(&latencies, 50.0);
    let p95 = percentile(&latencies, 95.0);

    report.note(format!(
        "{} submitted, {} backpressured, {} failed; p50 {:?}, p95 {:?}, backpressure ratio {:.2}",
        accepted.len(),
        backpressured,
        failed,
        p50,
        p95,
        backpressured as f64 / outcomes.len().max(1) as f64,
    ));

    let success_ratio = accepted.len() as f64 / outcomes.len().max(1) as f64;
    report.check(
        "submission success >= 80%",
        success_ratio >= 0.8,
        format!("{:.0}%", success_ratio * 100.0),
    );
    report.check(
        "p95 submission latency <= 1s",
        p95 <= Duration::from_secs(1),
        format!("{p95:?}"),
    );

    // Poll accepted tasks to terminal, watching the state sequence.
    let mut all_terminal = true;
    let mut all_legal = true;
    let deadline = tokio::time::Instant::now() + params.completion_deadline;
    for outcome in &accepted {
        let Some(task_id) = outcome.task_id.as_deref() else {
            all_terminal = false;
            continue;
        };
        let mut observed: Vec<String> = Vec::new();
        let mut terminal = false;
        while tokio::time::Instant::now() < deadline {
            let snapshot = client.task_status(task_id).await?;
            observed.push(snapshot.state.clone());
            if ["completed", "failed", "cancelled"].contains(&snapshot.state.as_str()) {
                terminal = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        if !terminal {
            all_terminal = false;
        }
        if !legal_state_sequence(&observed) {
            all_legal = false;
            report.note(format!("illegal state sequence for {task_id}: {observed:?}"));
        }
    }

    report.check(
        "accepted tasks reach a terminal state",
        all_terminal,
        format!("{} tasks polled", accepted.len()),
    );
    report.check("no state regression observed", all_legal, "prefix-legal");

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq(states: &[&str]) -> Vec<String> {
        states.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn legal_sequences() {
        assert!(legal_state_sequence(&seq(&["queued"])));
        assert!(legal_state_sequence(&seq(&["queued", "running", "completed"])));
        assert!(legal_state_sequence(&seq(&["queued", "queued", "running", "running", "failed"])));
        assert!(legal_state_sequence(&seq(&["queued", "cancelled"])));
        assert!(legal_state_sequence(&seq(&["running", "completed", "completed"])));
    }

    #[test]
    fn regressions_are_illegal() {
        assert!(!legal_state_sequence(&seq(&["running", "queued"])));
        assert!(!legal_state_sequence(&seq(&["completed", "running"])));
        assert!(!legal_state_sequence(&seq(&["completed", "failed"])));
    }

    #[test]
    fn unknown_states_are_illegal() {
        assert!(!legal_state_sequence(&seq(&["queued", "paused"])));
    }

    #[test]
    fn terminal_states_are_sticky() {
        assert!(!legal_state_sequence(&seq(&["queued", "running", "failed", "completed"])));
        assert!(legal_state_sequence(&seq(&["queued", "running", "failed", "failed"])));
    }
}
