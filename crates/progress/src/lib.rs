//! Progress tracker — per-user quiz/lesson telemetry and intervention
//! trigger detection.

pub mod tracker;

pub use tracker::{ProgressTracker, TrackerError, Trigger, TriggerKind};
