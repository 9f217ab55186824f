//! Upstream client — the shield between the control plane and flaky
//! external services.
//!
//! Every outbound call goes through a per-endpoint circuit breaker and a
//! retry engine with an overall deadline. Callers see a small failure
//! taxonomy instead of raw transport errors, and every attempt is recorded
//! for the integration-status view.

pub mod breaker;
pub mod client;
pub mod error;
pub mod services;

pub use breaker::{BreakerConfig, BreakerStatus, CircuitState};
pub use client::{EndpointConfig, UpstreamClient};
pub use error::UpstreamError;
pub use services::{
    EncyclopediaFetcher, EncyclopediaSummary, KnowledgeRetriever, Passage,
    RestEncyclopediaClient, RestKnowledgeClient, RestSimulationClient, RestTtsClient,
    RestTutoringClient, SimulationHandle, SimulationService, SimulationStatus, TtsAudio,
    TtsService, TutoringService,
};
