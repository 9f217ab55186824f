//! Shared application state passed to all API handlers.
//!
//! Every component is an explicitly constructed `Arc` injected at startup
//! — no process-wide statics — so tests can spin up isolated cores.

use std::sync::Arc;

use guru_composer::LessonComposer;
use guru_domain::config::Config;
use guru_progress::ProgressTracker;
use guru_registry::TaskRegistry;
use guru_upstream::{SimulationService, TtsService, TutoringService, UpstreamClient};

use crate::runtime::{CancelMap, LessonStore, WorkerPool};

/// Handles to the upstream collaborators used by job bodies. The
/// composer holds its own knowledge/encyclopedia handles.
pub struct Services {
    pub tutoring: Arc<dyn TutoringService>,
    pub tts: Arc<dyn TtsService>,
    pub simulation: Arc<dyn SimulationService>,
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<TaskRegistry>,
    pub pool: Arc<WorkerPool>,
    pub cancel_map: Arc<CancelMap>,
    pub lessons: Arc<LessonStore>,
    pub composer: Arc<LessonComposer>,
    pub tracker: Arc<ProgressTracker>,
    pub upstream: Arc<UpstreamClient>,
    pub services: Arc<Services>,
    /// SHA-256 hash of the API bearer token (read once at startup).
    /// `None` = dev mode (no auth enforced).
    pub api_token_hash: Option<Vec<u8>>,
}
