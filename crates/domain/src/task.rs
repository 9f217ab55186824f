//! Task data model — the unit of asynchronous work tracked by the registry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorKind;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task kind
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The category of a task. Determines which worker pool runs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Lesson,
    Simulation,
    Intervention,
    Tts,
}

impl TaskKind {
    pub const ALL: [TaskKind; 4] = [
        TaskKind::Lesson,
        TaskKind::Simulation,
        TaskKind::Intervention,
        TaskKind::Tts,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lesson => "lesson",
            Self::Simulation => "simulation",
            Self::Intervention => "intervention",
            Self::Tts => "tts",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Legal transitions: queued→running→{completed,failed};
    /// queued→cancelled; running→cancelled. Nothing else.
    pub fn can_transition_to(self, next: TaskState) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Running)
                | (Self::Queued, Self::Cancelled)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
                | (Self::Running, Self::Cancelled)
        )
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The error recorded on a failed task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub task_id: Uuid,
    pub kind: TaskKind,
    pub user_id: String,
    /// Correlation id stamped into every structured log line for this task.
    pub correlation_id: Uuid,
    pub submitted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub state: TaskState,
    pub progress_percent: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial_result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskErrorInfo>,
    pub attempt_count: u32,
    pub input_fingerprint: String,
}

impl Task {
    pub fn new(kind: TaskKind, user_id: impl Into<String>, input_fingerprint: String) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            kind,
            user_id: user_id.into(),
            correlation_id: Uuid::new_v4(),
            submitted_at: Utc::now(),
            started_at: None,
            completed_at: None,
            state: TaskState::Queued,
            progress_percent: 0,
            partial_result: None,
            final_result: None,
            error: None,
            attempt_count: 0,
            input_fingerprint,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Progress events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Append-only progress record attached to a task. `seq` is strictly
/// increasing per task and `percent` never decreases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub task_id: Uuid,
    pub seq: u64,
    pub emitted_at: DateTime<Utc>,
    pub percent: u32,
    pub stage: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── TaskState ───────────────────────────────────────────────────

    #[test]
    fn terminal_states() {
        assert!(!TaskState::Queued.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
    }

    #[test]
    fn legal_transitions() {
        assert!(TaskState::Queued.can_transition_to(TaskState::Running));
        assert!(TaskState::Queued.can_transition_to(TaskState::Cancelled));
        assert!(TaskState::Running.can_transition_to(TaskState::Completed));
        assert!(TaskState::Running.can_transition_to(TaskState::Failed));
        assert!(TaskState::Running.can_transition_to(TaskState::Cancelled));
    }

    #[test]
    fn illegal_transitions() {
        assert!(!TaskState::Queued.can_transition_to(TaskState::Completed));
        assert!(!TaskState::Queued.can_transition_to(TaskState::Failed));
        assert!(!TaskState::Running.can_transition_to(TaskState::Queued));
        assert!(!TaskState::Completed.can_transition_to(TaskState::Running));
        assert!(!TaskState::Completed.can_transition_to(TaskState::Failed));
        assert!(!TaskState::Cancelled.can_transition_to(TaskState::Running));
        assert!(!TaskState::Failed.can_transition_to(TaskState::Completed));
    }

    #[test]
    fn state_snake_case_serialization() {
        assert_eq!(serde_json::to_string(&TaskState::Queued).unwrap(), "\"queued\"");
        assert_eq!(serde_json::to_string(&TaskState::Cancelled).unwrap(), "\"cancelled\"");
    }

    // ── TaskKind ────────────────────────────────────────────────────

    #[test]
    fn kind_serde_roundtrip() {
        for kind in TaskKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            let back: TaskKind = serde_json::from_str(&json).unwrap();
            assert_eq!(kind, back);
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn unknown_kind_rejected() {
        let parsed: Result<TaskKind, _> = serde_json::from_str("\"homework\"");
        assert!(parsed.is_err());
    }

    // ── Task ────────────────────────────────────────────────────────

    #[test]
    fn task_new_defaults() {
        let task = Task::new(TaskKind::Lesson, "u1", "fp".into());
        assert_eq!(task.kind, TaskKind::Lesson);
        assert_eq!(task.user_id, "u1");
        assert_eq!(task.state, TaskState::Queued);
        assert_eq!(task.progress_percent, 0);
        assert_eq!(task.attempt_count, 0);
        assert!(task.started_at.is_none());
        assert!(task.final_result.is_none());
        assert!(task.error.is_none());
    }
}
