//! Connectivity scenario: with the knowledge upstream failing (arranged
//! by the operator — e.g. pointed at a dead port), the breaker must open
//! within `failure_threshold` attempts and clients must then see fast
//! failures. With `expect_recovery`, the scenario additionally waits out
//! the cool-down and asserts the breaker closes after service returns.

use std::time::Duration;

use anyhow::Result;
use serde_json::{json, Value};
use tokio::time::Instant;

use crate::client::HarnessClient;
use crate::report::ScenarioReport;

#[derive(Debug, Clone)]
pub struct ConnectivityParams {
    /// The gateway's configured breaker threshold for the upstream.
    pub failure_threshold: u32,
    /// The gateway's configured open duration.
    pub open_duration: Duration,
    /// Also verify breaker recovery (requires the operator to restore
    /// the upstream before the cool-down elapses).
    pub expect_recovery: bool,
}

impl Default for ConnectivityParams {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(30),
            expect_recovery: false,
        }
    }
}

fn kb_only_request(topic: &str) -> Value {
    json!({
        "subject": "science",
        "topic": topic,
        "user_id": "harness-connectivity",
        "use_knowledge_store": true,
        "include_encyclopedia": false,
        "force_regenerate": true,
    })
}

fn knowledge_breaker_status(status: &Value) -> Option<String> {
    status["breakers"]
        .as_array()?
        .iter()
        .find(|b| b["service"] == "knowledge")
        .and_then(|b| b["status"].as_str())
        .map(str::to_owned)
}

pub async fn run(client: &HarnessClient, params: &ConnectivityParams) -> Result<ScenarioReport> {
    let mut report = ScenarioReport::new("connectivity");

    // Drive KB-only lessons until the breaker trips. Each request is a
    // distinct topic so duplicate suppression stays out of the way.
    let attempts = params.failure_threshold + 1;
    let mut saw_failure = false;
    for i in 0..attempts {
        let (status, body, latency) = client
            .create_lesson(&kb_only_request(&format!("outage-topic-{i}")))
            .await?;
        saw_failure |= status >= 500;
        report.note(format!(
            "attempt {i}: HTTP {status} ({}) in {latency:?}",
            body["error_kind"].as_str().unwrap_or("-"),
        ));
    }
    report.check(
        "upstream failures observed",
        saw_failure,
        format!("{attempts} attempts issued"),
    );

    // The breaker must now be open: the next calls fail fast without
    // touching the network.
    let (status, body, latency) = client
        .create_lesson(&kb_only_request("outage-final"))
        .await?;
    report.check(
        "post-threshold call fails fast",
        status == 502 && latency <= Duration::from_secs(1),
        format!(
            "HTTP {status} ({}) in {latency:?}",
            body["error_kind"].as_str().unwrap_or("-")
        ),
    );

    let integration = client.integration_status().await?;
    let breaker = knowledge_breaker_status(&integration);
    report.check(
        "knowledge breaker reports open",
        breaker.as_deref() == Some("open"),
        format!("breaker status: {breaker:?}"),
    );

    if params.expect_recovery {
        // Wait out the cool-down plus a margin, then one probe should
        // close the breaker.
        tokio::time::sleep(params.open_duration + Duration::from_secs(2)).await;
        let recovery_deadline = Instant::now() + Duration::from_secs(30);
        let mut recovered = false;
        while Instant::now() < recovery_deadline {
            let (status, _, _) = client
                .create_lesson(&kb_only_request("recovery-topic"))
                .await?;
            if status == 201 {
                recovered = true;
                break;
            }
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
        let integration = client.integration_status().await?;
        let breaker = knowledge_breaker_status(&integration);
        report.check(
            "breaker closes after recovery",
            recovered && breaker.as_deref() == Some("closed"),
            format!("recovered={recovered}, breaker status: {breaker:?}"),
        );
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breaker_status_extraction() {
        let status = json!({
            "breakers": [
                {"service": "tts", "endpoint": "/api/synthesize", "status": "closed"},
                {"service": "knowledge", "endpoint": "/api/retrieve", "status": "open"},
            ]
        });
        assert_eq!(knowledge_breaker_status(&status).as_deref(), Some("open"));
    }

    #[test]
    fn breaker_status_absent() {
        assert_eq!(knowledge_breaker_status(&json!({"breakers": []})), None);
        assert_eq!(knowledge_breaker_status(&json!({})), None);
    }
}
