//! Shared domain model for the Gurukul orchestration core.
//!
//! Every other crate in the workspace depends on this one: the task state
//! machine, the lesson artifact model, per-user progress aggregates, the
//! `error_kind` taxonomy surfaced over HTTP, the configuration tree, and
//! input fingerprinting for duplicate detection.

pub mod backoff;
pub mod cancel;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod lesson;
pub mod progress;
pub mod task;

pub use cancel::CancelToken;
pub use error::{ErrorBody, ErrorKind};
pub use task::{ProgressEvent, Task, TaskErrorInfo, TaskKind, TaskState};
