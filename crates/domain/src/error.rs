//! The `error_kind` taxonomy surfaced to clients.
//!
//! Every error body on the HTTP surface is `{error_kind, message,
//! retry_after?}` with `error_kind` drawn from [`ErrorKind`]. Components map
//! their internal errors into this vocabulary; `internal` is reserved for
//! unexpected bugs and always logged with a correlation id.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Schema/validation failure. Not retryable without change.
    InvalidInput,
    /// No such task_id.
    UnknownTask,
    /// Operation not permitted in the current state.
    StateConflict,
    /// An equivalent task is already in flight; its task_id is returned.
    DuplicateInflight,
    /// A per-kind queue is full; `retry_after` is provided.
    Backpressure,
    /// A deadline was exceeded at some layer.
    Timeout,
    /// All fallback paths are exhausted.
    UpstreamUnavailable,
    /// An upstream is in fail-fast mode.
    CircuitOpen,
    /// Registry persistence failed.
    StorageUnavailable,
    /// The task was cancelled.
    Cancelled,
    /// Catch-all for bugs.
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::UnknownTask => "unknown_task",
            Self::StateConflict => "state_conflict",
            Self::DuplicateInflight => "duplicate_inflight",
            Self::Backpressure => "backpressure",
            Self::Timeout => "timeout",
            Self::UpstreamUnavailable => "upstream_unavailable",
            Self::CircuitOpen => "circuit_open",
            Self::StorageUnavailable => "storage_unavailable",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        }
    }

    /// Whether a client may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Backpressure
                | Self::Timeout
                | Self::UpstreamUnavailable
                | Self::CircuitOpen
                | Self::StorageUnavailable
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire shape of every error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error_kind: ErrorKind,
    pub message: String,
    /// Retry hint in seconds, present for `backpressure`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl ErrorBody {
    pub fn new(error_kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            error_kind,
            message: message.into(),
            retry_after: None,
        }
    }
}
