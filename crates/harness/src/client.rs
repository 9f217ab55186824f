//! Thin typed wrapper over the gateway's HTTP surface.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;

/// Outcome of one submission attempt.
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub status: u16,
    pub task_id: Option<String>,
    pub error_kind: Option<String>,
    pub retry_after: Option<u64>,
    pub latency: Duration,
}

impl SubmitOutcome {
    pub fn accepted(&self) -> bool {
        self.status == 202
    }

    pub fn backpressured(&self) -> bool {
        self.status == 503
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskSnapshot {
    pub state: String,
    #[serde(default)]
    pub progress_percent: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventSnapshot {
    pub seq: u64,
    pub percent: u64,
    pub stage: String,
}

pub struct HarnessClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HarnessClient {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
            token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn decorate(&self, rb: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => rb.bearer_auth(token),
            None => rb,
        }
    }

    /// Submit an async task; every response shape maps onto
    /// [`SubmitOutcome`] rather than an error, since rejections are data
    /// for the scenarios.
    pub async fn submit_task(&self, kind: &str, user_id: &str, inputs: &Value) -> Result<SubmitOutcome> {
        let body = serde_json::json!({
            "kind": kind,
            "user_id": user_id,
            "inputs": inputs,
        });
        let started = Instant::now();
        let resp = self
            .decorate(self.http.post(self.url("/v1/tasks")).json(&body))
            .send()
            .await
            .context("submit request failed")?;
        let latency = started.elapsed();
        let status = resp.status().as_u16();
        let body: Value = resp.json().await.unwrap_or(Value::Null);

        Ok(SubmitOutcome {
            status,
            task_id: body["task_id"].as_str().map(str::to_owned),
            error_kind: body["error_kind"].as_str().map(str::to_owned),
            retry_after: body["retry_after"].as_u64(),
            latency,
        })
    }

    pub async fn task_status(&self, task_id: &str) -> Result<TaskSnapshot> {
        let resp = self
            .decorate(self.http.get(self.url(&format!("/v1/tasks/{task_id}"))))
            .send()
            .await
            .context("status request failed")?;
        resp.json().await.context("parsing status response")
    }

    pub async fn task_events(&self, task_id: &str, since_seq: u64) -> Result<Vec<EventSnapshot>> {
        let resp = self
            .decorate(
                self.http.get(
                    self.url(&format!("/v1/tasks/{task_id}/events?since_seq={since_seq}")),
                ),
            )
            .send()
            .await
            .context("events request failed")?;
        let body: Value = resp.json().await.context("parsing events response")?;
        let events = serde_json::from_value(body["events"].clone())
            .context("parsing events array")?;
        Ok(events)
    }

    pub async fn cancel_task(&self, task_id: &str) -> Result<u16> {
        let resp = self
            .decorate(
                self.http
                    .post(self.url(&format!("/v1/tasks/{task_id}/cancel"))),
            )
            .send()
            .await
            .context("cancel request failed")?;
        Ok(resp.status().as_u16())
    }

    /// Synchronous lesson creation; returns (status, body, latency).
    pub async fn create_lesson(&self, request: &Value) -> Result<(u16, Value, Duration)> {
        let started = Instant::now();
        let resp = self
            .decorate(self.http.post(self.url("/v1/lessons")).json(request))
            .send()
            .await
            .context("create-lesson request failed")?;
        let latency = started.elapsed();
        let status = resp.status().as_u16();
        let body: Value = resp.json().await.unwrap_or(Value::Null);
        Ok((status, body, latency))
    }

    pub async fn integration_status(&self) -> Result<Value> {
        let resp = self
            .http
            .get(self.url("/v1/status"))
            .send()
            .await
            .context("status request failed")?;
        resp.json().await.context("parsing integration status")
    }
}
