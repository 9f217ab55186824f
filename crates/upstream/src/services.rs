//! Typed clients for the external collaborators.
//!
//! Each collaborator is a trait so consumers (the lesson composer, the job
//! bodies) can be tested against mocks; the REST implementations here ride
//! on [`UpstreamClient`] and inherit its breakers and retries.
//!
//! Idempotency: knowledge retrieval and encyclopedia lookups are GETs and
//! retry freely. Tutoring and TTS are non-idempotent POSTs — a single
//! attempt unless the caller supplies an idempotency key. Simulation start
//! is a non-idempotent POST; simulation polling is a GET.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use guru_domain::cancel::CancelToken;
use guru_domain::config::UpstreamConfig;

use crate::client::{EndpointConfig, UpstreamClient};
use crate::error::UpstreamError;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Payload types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A ranked passage from the knowledge retriever.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Passage {
    pub text: String,
    pub source_name: String,
    #[serde(default)]
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncyclopediaSummary {
    pub title: String,
    pub summary: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub related: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TtsAudio {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimulationHandle {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimulationStatus {
    pub state: String,
    #[serde(default)]
    pub percent: Option<u32>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl SimulationStatus {
    pub fn is_completed(&self) -> bool {
        self.state == "completed"
    }

    pub fn is_failed(&self) -> bool {
        self.state == "failed"
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Traits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait]
pub trait KnowledgeRetriever: Send + Sync {
    /// Ranked passages for a `(subject, topic)` query.
    async fn retrieve(
        &self,
        subject: &str,
        topic: &str,
        cancel: &CancelToken,
    ) -> Result<Vec<Passage>, UpstreamError>;
}

#[async_trait]
pub trait EncyclopediaFetcher: Send + Sync {
    /// Summary, URL, and related titles for a title.
    async fn summary(
        &self,
        title: &str,
        cancel: &CancelToken,
    ) -> Result<EncyclopediaSummary, UpstreamError>;
}

#[async_trait]
pub trait TutoringService: Send + Sync {
    /// Recommendations for an intervention context.
    async fn recommend(
        &self,
        context: &serde_json::Value,
        idempotency_key: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<serde_json::Value, UpstreamError>;
}

#[async_trait]
pub trait TtsService: Send + Sync {
    async fn synthesize(
        &self,
        text: &str,
        voice: Option<&str>,
        idempotency_key: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<TtsAudio, UpstreamError>;
}

#[async_trait]
pub trait SimulationService: Send + Sync {
    async fn start(
        &self,
        payload: &serde_json::Value,
        cancel: &CancelToken,
    ) -> Result<SimulationHandle, UpstreamError>;

    async fn poll(
        &self,
        handle_id: &str,
        cancel: &CancelToken,
    ) -> Result<SimulationStatus, UpstreamError>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// REST implementations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

macro_rules! rest_client {
    ($name:ident) => {
        pub struct $name {
            client: Arc<UpstreamClient>,
            base_url: String,
            cfg: EndpointConfig,
        }

        impl $name {
            pub fn new(client: Arc<UpstreamClient>, upstream: &UpstreamConfig) -> Self {
                Self {
                    client,
                    base_url: upstream.base_url.trim_end_matches('/').to_owned(),
                    cfg: EndpointConfig::from(upstream),
                }
            }

            fn url(&self, path: &str) -> String {
                format!("{}{}", self.base_url, path)
            }
        }
    };
}

rest_client!(RestKnowledgeClient);
rest_client!(RestEncyclopediaClient);
rest_client!(RestTutoringClient);
rest_client!(RestTtsClient);
rest_client!(RestSimulationClient);

async fn parse_json<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
    what: &str,
) -> Result<T, UpstreamError> {
    let body = resp.text().await.map_err(crate::error::from_reqwest)?;
    serde_json::from_str(&body).map_err(|e| UpstreamError::Network {
        message: format!("failed to parse {what} response: {e}: {body}"),
    })
}

#[derive(Debug, Deserialize)]
struct RetrieveResponse {
    #[serde(default)]
    passages: Vec<Passage>,
}

#[async_trait]
impl KnowledgeRetriever for RestKnowledgeClient {
    async fn retrieve(
        &self,
        subject: &str,
        topic: &str,
        cancel: &CancelToken,
    ) -> Result<Vec<Passage>, UpstreamError> {
        let url = self.url("/api/retrieve");
        let resp = self
            .client
            .call("knowledge", "/api/retrieve", &self.cfg, true, cancel, |http| {
                http.get(&url)
                    .query(&[("subject", subject), ("topic", topic)])
            })
            .await?;
        let parsed: RetrieveResponse = parse_json(resp, "retrieve").await?;
        Ok(parsed.passages)
    }
}

#[async_trait]
impl EncyclopediaFetcher for RestEncyclopediaClient {
    async fn summary(
        &self,
        title: &str,
        cancel: &CancelToken,
    ) -> Result<EncyclopediaSummary, UpstreamError> {
        let url = self.url("/api/summary");
        let resp = self
            .client
            .call("encyclopedia", "/api/summary", &self.cfg, true, cancel, |http| {
                http.get(&url).query(&[("title", title)])
            })
            .await?;
        parse_json(resp, "summary").await
    }
}

#[async_trait]
impl TutoringService for RestTutoringClient {
    async fn recommend(
        &self,
        context: &serde_json::Value,
        idempotency_key: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<serde_json::Value, UpstreamError> {
        let url = self.url("/api/recommend");
        let body = context.clone();
        // Retries only when the service accepts idempotency keys.
        let idempotent = idempotency_key.is_some();
        let key = idempotency_key.map(str::to_owned);
        let resp = self
            .client
            .call("tutoring", "/api/recommend", &self.cfg, idempotent, cancel, |http| {
                let mut rb = http.post(&url).json(&body);
                if let Some(ref k) = key {
                    rb = rb.header("Idempotency-Key", k);
                }
                rb
            })
            .await?;
        parse_json(resp, "recommend").await
    }
}

#[async_trait]
impl TtsService for RestTtsClient {
    async fn synthesize(
        &self,
        text: &str,
        voice: Option<&str>,
        idempotency_key: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<TtsAudio, UpstreamError> {
        let url = self.url("/api/synthesize");
        let body = serde_json::json!({ "text": text, "voice": voice });
        let idempotent = idempotency_key.is_some();
        let key = idempotency_key.map(str::to_owned);
        let resp = self
            .client
            .call("tts", "/api/synthesize", &self.cfg, idempotent, cancel, |http| {
                let mut rb = http.post(&url).json(&body);
                if let Some(ref k) = key {
                    rb = rb.header("Idempotency-Key", k);
                }
                rb
            })
            .await?;

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("audio/mpeg")
            .to_owned();
        let bytes = resp
            .bytes()
            .await
            .map_err(crate::error::from_reqwest)?
            .to_vec();
        Ok(TtsAudio {
            content_type,
            bytes,
        })
    }
}

#[async_trait]
impl SimulationService for RestSimulationClient {
    async fn start(
        &self,
        payload: &serde_json::Value,
        cancel: &CancelToken,
    ) -> Result<SimulationHandle, UpstreamError> {
        let url = self.url("/api/simulations");
        let body = payload.clone();
        let resp = self
            .client
            .call("simulation", "/api/simulations", &self.cfg, false, cancel, |http| {
                http.post(&url).json(&body)
            })
            .await?;
        parse_json(resp, "simulation start").await
    }

    async fn poll(
        &self,
        handle_id: &str,
        cancel: &CancelToken,
    ) -> Result<SimulationStatus, UpstreamError> {
        let url = self.url(&format!("/api/simulations/{handle_id}"));
        let resp = self
            .client
            .call("simulation", "/api/simulations/:id", &self.cfg, true, cancel, |http| {
                http.get(&url)
            })
            .await?;
        parse_json(resp, "simulation status").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passage_defaults_score() {
        let p: Passage =
            serde_json::from_str(r#"{"text":"t","source_name":"kb-1"}"#).unwrap();
        assert_eq!(p.score, 0.0);
    }

    #[test]
    fn simulation_status_predicates() {
        let done: SimulationStatus =
            serde_json::from_str(r#"{"state":"completed","result":{"x":1}}"#).unwrap();
        assert!(done.is_completed());
        assert!(!done.is_failed());

        let failed: SimulationStatus =
            serde_json::from_str(r#"{"state":"failed","error":"diverged"}"#).unwrap();
        assert!(failed.is_failed());
    }

    #[test]
    fn encyclopedia_summary_optional_fields() {
        let s: EncyclopediaSummary =
            serde_json::from_str(r#"{"title":"Motion","summary":"Bodies move."}"#).unwrap();
        assert!(s.url.is_none());
        assert!(s.related.is_empty());
    }
}
