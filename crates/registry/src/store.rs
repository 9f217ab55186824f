//! In-memory task store with state-machine enforcement.
//!
//! All mutations take the write lock, which serializes them per task (and
//! globally — the store is not a hot path; tasks mutate a handful of times
//! over their lifetime). Reads snapshot under the read lock and are
//! consistent with the last completed write.
//!
//! Terminal transitions are idempotent: repeating the transition the task
//! already took is a no-op, a *conflicting* terminal transition is a
//! `state_conflict`. Once terminal, a task never changes again until the
//! TTL sweeper removes it.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use guru_domain::error::ErrorKind;
use guru_domain::fingerprint;
use guru_domain::task::{ProgressEvent, Task, TaskErrorInfo, TaskKind, TaskState};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown task: {0}")]
    UnknownTask(Uuid),

    #[error("an equivalent task is already in flight: {existing}")]
    DuplicateInflight { existing: Uuid },

    #[error("state conflict: {message}")]
    StateConflict { message: String },

    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// Reserved for persistent backends; the in-memory store never emits it.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl RegistryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownTask(_) => ErrorKind::UnknownTask,
            Self::DuplicateInflight { .. } => ErrorKind::DuplicateInflight,
            Self::StateConflict { .. } => ErrorKind::StateConflict,
            Self::InvalidInput { .. } => ErrorKind::InvalidInput,
            Self::StorageUnavailable(_) => ErrorKind::StorageUnavailable,
        }
    }

    fn conflict(message: impl Into<String>) -> Self {
        Self::StateConflict {
            message: message.into(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct TaskRecord {
    task: Task,
    events: Vec<ProgressEvent>,
    next_seq: u64,
}

type InflightKey = (String, TaskKind, String);

#[derive(Default)]
struct Inner {
    tasks: HashMap<Uuid, TaskRecord>,
    /// (user_id, kind, fingerprint) → non-terminal task, for duplicate
    /// suppression. Entries are dropped on terminal transition.
    inflight: HashMap<InflightKey, Uuid>,
}

/// Filters for [`TaskRegistry::list`].
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub user_id: Option<String>,
    pub kind: Option<TaskKind>,
    pub state: Option<TaskState>,
    pub limit: usize,
    pub offset: usize,
}

pub struct TaskRegistry {
    ttl: Duration,
    events_page_limit: usize,
    inner: RwLock<Inner>,
}

impl TaskRegistry {
    pub fn new(ttl: std::time::Duration, events_page_limit: usize) -> Self {
        Self {
            ttl: Duration::from_std(ttl).unwrap_or_else(|_| Duration::hours(24)),
            events_page_limit: events_page_limit.max(1),
            inner: RwLock::new(Inner::default()),
        }
    }

    // ── creation ─────────────────────────────────────────────────────

    /// Allocate a new task in state `queued`.
    ///
    /// When a non-terminal task with the same `(user_id, kind, fingerprint)`
    /// already exists and `force_regenerate` is unset, no task is created
    /// and `DuplicateInflight` carries the existing id.
    pub fn create(
        &self,
        kind: TaskKind,
        user_id: &str,
        inputs: &serde_json::Value,
        force_regenerate: bool,
    ) -> Result<Task, RegistryError> {
        let fp = fingerprint::fingerprint(inputs);
        let key: InflightKey = (user_id.to_owned(), kind, fp.clone());

        let mut inner = self.inner.write();
        if !force_regenerate {
            if let Some(existing) = inner.inflight.get(&key) {
                return Err(RegistryError::DuplicateInflight {
                    existing: *existing,
                });
            }
        }

        let task = Task::new(kind, user_id, fp);
        tracing::debug!(
            task_id = %task.task_id,
            correlation_id = %task.correlation_id,
            kind = %kind,
            user_id,
            "task created"
        );
        inner.inflight.insert(key, task.task_id);
        inner.tasks.insert(
            task.task_id,
            TaskRecord {
                task: task.clone(),
                events: Vec::new(),
                next_seq: 1,
            },
        );
        Ok(task)
    }

    // ── transitions ──────────────────────────────────────────────────

    /// Atomic queued→running.
    pub fn begin(&self, task_id: Uuid) -> Result<(), RegistryError> {
        let mut inner = self.inner.write();
        let record = record_mut(&mut inner, task_id)?;
        if record.task.state != TaskState::Queued {
            return Err(RegistryError::conflict(format!(
                "cannot begin task in state {}",
                record.task.state
            )));
        }
        record.task.state = TaskState::Running;
        record.task.started_at = Some(Utc::now());
        record.task.attempt_count = 1;
        Ok(())
    }

    /// Record a retry attempt on a running task.
    pub fn note_attempt(&self, task_id: Uuid) -> Result<u32, RegistryError> {
        let mut inner = self.inner.write();
        let record = record_mut(&mut inner, task_id)?;
        if record.task.state != TaskState::Running {
            return Err(RegistryError::conflict(format!(
                "cannot retry task in state {}",
                record.task.state
            )));
        }
        record.task.attempt_count += 1;
        Ok(record.task.attempt_count)
    }

    /// Append a progress event. Rejected on terminal tasks and on any
    /// percent regression.
    pub fn emit(
        &self,
        task_id: Uuid,
        percent: u32,
        stage: &str,
        partial: Option<serde_json::Value>,
    ) -> Result<ProgressEvent, RegistryError> {
        if percent > 100 {
            return Err(RegistryError::InvalidInput {
                message: format!("percent {percent} out of range"),
            });
        }

        let mut inner = self.inner.write();
        let record = record_mut(&mut inner, task_id)?;
        if record.task.state != TaskState::Running {
            return Err(RegistryError::conflict(format!(
                "cannot emit progress in state {}",
                record.task.state
            )));
        }
        if percent < record.task.progress_percent {
            return Err(RegistryError::conflict(format!(
                "progress would regress from {} to {percent}",
                record.task.progress_percent
            )));
        }

        let event = ProgressEvent {
            task_id,
            seq: record.next_seq,
            emitted_at: Utc::now(),
            percent,
            stage: stage.to_owned(),
            partial: partial.clone(),
        };
        record.next_seq += 1;
        record.task.progress_percent = percent;
        if partial.is_some() {
            record.task.partial_result = partial;
        }
        record.events.push(event.clone());
        Ok(event)
    }

    /// Terminal transition running→completed. Idempotent for repeated
    /// completes; conflicting terminal states fail.
    pub fn complete(
        &self,
        task_id: Uuid,
        final_result: serde_json::Value,
    ) -> Result<(), RegistryError> {
        self.terminal(task_id, TaskState::Completed, Some(final_result), None)
    }

    /// Terminal transition running→failed.
    pub fn fail(&self, task_id: Uuid, error: TaskErrorInfo) -> Result<(), RegistryError> {
        self.terminal(task_id, TaskState::Failed, None, Some(error))
    }

    /// Terminal transition {queued,running}→cancelled.
    pub fn cancel(&self, task_id: Uuid) -> Result<(), RegistryError> {
        self.terminal(task_id, TaskState::Cancelled, None, None)
    }

    fn terminal(
        &self,
        task_id: Uuid,
        target: TaskState,
        final_result: Option<serde_json::Value>,
        error: Option<TaskErrorInfo>,
    ) -> Result<(), RegistryError> {
        let mut inner = self.inner.write();
        let record = record_mut(&mut inner, task_id)?;
        let current = record.task.state;

        if current == target {
            // Matching terminal transition — a no-op.
            return Ok(());
        }
        if !current.can_transition_to(target) {
            return Err(RegistryError::conflict(format!(
                "cannot transition {current} → {target}"
            )));
        }

        record.task.state = target;
        record.task.completed_at = Some(Utc::now());
        if target == TaskState::Completed {
            record.task.progress_percent = 100;
            record.task.final_result = final_result;
        }
        if target == TaskState::Failed {
            // The correlation id travels in the message so log lines and
            // client-visible errors can be joined.
            record.task.error = error.map(|mut e| {
                e.message = format!("[{}] {}", record.task.correlation_id, e.message);
                e
            });
        }
        tracing::debug!(
            task_id = %task_id,
            correlation_id = %record.task.correlation_id,
            state = %target,
            "task reached terminal state"
        );

        let key: InflightKey = (
            record.task.user_id.clone(),
            record.task.kind,
            record.task.input_fingerprint.clone(),
        );
        // Only drop the index entry if it still points at this task; a
        // force_regenerate resubmission may have claimed the key since.
        if inner.inflight.get(&key) == Some(&task_id) {
            inner.inflight.remove(&key);
        }
        Ok(())
    }

    // ── reads ────────────────────────────────────────────────────────

    pub fn get(&self, task_id: Uuid) -> Result<Task, RegistryError> {
        self.inner
            .read()
            .tasks
            .get(&task_id)
            .map(|r| r.task.clone())
            .ok_or(RegistryError::UnknownTask(task_id))
    }

    /// Events with `seq > since_seq`, in seq order, bounded by the page
    /// limit.
    pub fn events_since(
        &self,
        task_id: Uuid,
        since_seq: u64,
    ) -> Result<Vec<ProgressEvent>, RegistryError> {
        let inner = self.inner.read();
        let record = inner
            .tasks
            .get(&task_id)
            .ok_or(RegistryError::UnknownTask(task_id))?;
        Ok(record
            .events
            .iter()
            .filter(|e| e.seq > since_seq)
            .take(self.events_page_limit)
            .cloned()
            .collect())
    }

    /// List tasks newest-first with optional filters and pagination.
    pub fn list(&self, filter: &ListFilter) -> (Vec<Task>, usize) {
        let inner = self.inner.read();
        let mut matching: Vec<&Task> = inner
            .tasks
            .values()
            .map(|r| &r.task)
            .filter(|t| {
                filter.user_id.as_deref().is_none_or(|u| t.user_id == u)
                    && filter.kind.is_none_or(|k| t.kind == k)
                    && filter.state.is_none_or(|s| t.state == s)
            })
            .collect();
        matching.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));

        let total = matching.len();
        let limit = if filter.limit == 0 { 50 } else { filter.limit };
        let page = matching
            .into_iter()
            .skip(filter.offset)
            .take(limit)
            .cloned()
            .collect();
        (page, total)
    }

    /// Task counts per state, for the integration-status endpoint.
    pub fn state_counts(&self) -> HashMap<TaskState, usize> {
        let inner = self.inner.read();
        let mut counts = HashMap::new();
        for record in inner.tasks.values() {
            *counts.entry(record.task.state).or_insert(0) += 1;
        }
        counts
    }

    // ── maintenance ──────────────────────────────────────────────────

    /// Remove tasks whose terminal age exceeds the TTL. Returns how many
    /// were removed.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.ttl;
        let mut inner = self.inner.write();
        let before = inner.tasks.len();
        inner.tasks.retain(|_, r| {
            !r.task.state.is_terminal() || r.task.completed_at.is_none_or(|at| at > cutoff)
        });
        before - inner.tasks.len()
    }
}

fn record_mut(inner: &mut Inner, task_id: Uuid) -> Result<&mut TaskRecord, RegistryError> {
    inner
        .tasks
        .get_mut(&task_id)
        .ok_or(RegistryError::UnknownTask(task_id))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration as StdDuration;

    fn registry() -> TaskRegistry {
        TaskRegistry::new(StdDuration::from_secs(86_400), 500)
    }

    fn queued(reg: &TaskRegistry) -> Uuid {
        reg.create(TaskKind::Lesson, "u1", &json!({"topic": "motion"}), true)
            .unwrap()
            .task_id
    }

    fn running(reg: &TaskRegistry) -> Uuid {
        let id = queued(reg);
        reg.begin(id).unwrap();
        id
    }

    // ── creation & duplicates ───────────────────────────────────────

    #[test]
    fn create_starts_queued() {
        let reg = registry();
        let task = reg
            .create(TaskKind::Simulation, "u1", &json!({"p": 1}), false)
            .unwrap();
        assert_eq!(task.state, TaskState::Queued);
        assert_eq!(task.attempt_count, 0);
        assert_eq!(task.input_fingerprint.len(), 64);
    }

    #[test]
    fn duplicate_inflight_returns_existing_id() {
        let reg = registry();
        let inputs = json!({"topic": "motion"});
        let first = reg.create(TaskKind::Lesson, "u1", &inputs, false).unwrap();

        let err = reg.create(TaskKind::Lesson, "u1", &inputs, false).unwrap_err();
        match err {
            RegistryError::DuplicateInflight { existing } => {
                assert_eq!(existing, first.task_id)
            }
            other => panic!("expected DuplicateInflight, got {other:?}"),
        }
    }

    #[test]
    fn force_regenerate_bypasses_duplicate_check() {
        let reg = registry();
        let inputs = json!({"topic": "motion"});
        let first = reg.create(TaskKind::Lesson, "u1", &inputs, false).unwrap();
        let second = reg.create(TaskKind::Lesson, "u1", &inputs, true).unwrap();
        assert_ne!(first.task_id, second.task_id);
    }

    #[test]
    fn duplicate_check_scoped_to_user_and_kind() {
        let reg = registry();
        let inputs = json!({"topic": "motion"});
        reg.create(TaskKind::Lesson, "u1", &inputs, false).unwrap();
        // Different user: allowed.
        reg.create(TaskKind::Lesson, "u2", &inputs, false).unwrap();
        // Different kind: allowed.
        reg.create(TaskKind::Tts, "u1", &inputs, false).unwrap();
    }

    #[test]
    fn terminal_task_frees_duplicate_slot() {
        let reg = registry();
        let inputs = json!({"topic": "motion"});
        let first = reg.create(TaskKind::Lesson, "u1", &inputs, false).unwrap();
        reg.begin(first.task_id).unwrap();
        reg.complete(first.task_id, json!({"ok": true})).unwrap();

        // The first task is terminal, so the same inputs may run again.
        let second = reg.create(TaskKind::Lesson, "u1", &inputs, false).unwrap();
        assert_ne!(first.task_id, second.task_id);
    }

    // ── state machine ───────────────────────────────────────────────

    #[test]
    fn begin_only_from_queued() {
        let reg = registry();
        let id = running(&reg);
        assert!(matches!(
            reg.begin(id),
            Err(RegistryError::StateConflict { .. })
        ));
    }

    #[test]
    fn complete_requires_running() {
        let reg = registry();
        let id = queued(&reg);
        assert!(matches!(
            reg.complete(id, json!({})),
            Err(RegistryError::StateConflict { .. })
        ));
    }

    #[test]
    fn cancel_from_queued_and_running() {
        let reg = registry();
        let a = queued(&reg);
        reg.cancel(a).unwrap();
        assert_eq!(reg.get(a).unwrap().state, TaskState::Cancelled);

        let b = running(&reg);
        reg.cancel(b).unwrap();
        assert_eq!(reg.get(b).unwrap().state, TaskState::Cancelled);
    }

    #[test]
    fn terminal_writes_idempotent() {
        let reg = registry();
        let id = running(&reg);
        reg.complete(id, json!({"r": 1})).unwrap();
        // Matching terminal transition is a no-op.
        reg.complete(id, json!({"r": 1})).unwrap();
        // Conflicting terminal transition fails.
        let err = reg
            .fail(
                id,
                TaskErrorInfo {
                    kind: ErrorKind::Internal,
                    message: "boom".into(),
                },
            )
            .unwrap_err();
        assert!(matches!(err, RegistryError::StateConflict { .. }));
        // And the original result is untouched.
        let task = reg.get(id).unwrap();
        assert_eq!(task.state, TaskState::Completed);
        assert_eq!(task.final_result, Some(json!({"r": 1})));
    }

    #[test]
    fn cancel_after_complete_conflicts() {
        let reg = registry();
        let id = running(&reg);
        reg.complete(id, json!({})).unwrap();
        assert!(matches!(
            reg.cancel(id),
            Err(RegistryError::StateConflict { .. })
        ));
    }

    #[test]
    fn completed_task_has_result_and_full_progress() {
        let reg = registry();
        let id = running(&reg);
        reg.complete(id, json!({"answer": 42})).unwrap();
        let task = reg.get(id).unwrap();
        assert_eq!(task.progress_percent, 100);
        assert!(task.completed_at.is_some());
        assert!(task.error.is_none());
    }

    #[test]
    fn failed_task_has_error() {
        let reg = registry();
        let id = running(&reg);
        reg.fail(
            id,
            TaskErrorInfo {
                kind: ErrorKind::Timeout,
                message: "deadline exceeded".into(),
            },
        )
        .unwrap();
        let task = reg.get(id).unwrap();
        assert_eq!(task.state, TaskState::Failed);
        assert_eq!(task.error.as_ref().unwrap().kind, ErrorKind::Timeout);
        assert!(task.final_result.is_none());
    }

    // ── progress events ─────────────────────────────────────────────

    #[test]
    fn emit_monotonic_seq_and_percent() {
        let reg = registry();
        let id = running(&reg);
        let e1 = reg.emit(id, 10, "fetch", None).unwrap();
        let e2 = reg.emit(id, 10, "fetch", None).unwrap();
        let e3 = reg.emit(id, 60, "compose", None).unwrap();
        assert_eq!((e1.seq, e2.seq, e3.seq), (1, 2, 3));
        assert_eq!(reg.get(id).unwrap().progress_percent, 60);
    }

    #[test]
    fn emit_rejects_regression() {
        let reg = registry();
        let id = running(&reg);
        reg.emit(id, 50, "halfway", None).unwrap();
        assert!(matches!(
            reg.emit(id, 40, "backwards", None),
            Err(RegistryError::StateConflict { .. })
        ));
    }

    #[test]
    fn emit_rejects_out_of_range() {
        let reg = registry();
        let id = running(&reg);
        assert!(matches!(
            reg.emit(id, 101, "overflow", None),
            Err(RegistryError::InvalidInput { .. })
        ));
    }

    #[test]
    fn emit_rejected_on_terminal_task() {
        let reg = registry();
        let id = running(&reg);
        reg.complete(id, json!({})).unwrap();
        assert!(matches!(
            reg.emit(id, 99, "late", None),
            Err(RegistryError::StateConflict { .. })
        ));
    }

    #[test]
    fn emit_with_partial_updates_task() {
        let reg = registry();
        let id = running(&reg);
        reg.emit(id, 30, "draft", Some(json!({"draft": "text"}))).unwrap();
        assert_eq!(
            reg.get(id).unwrap().partial_result,
            Some(json!({"draft": "text"}))
        );
    }

    #[test]
    fn events_since_pages_in_order() {
        let reg = registry();
        let id = running(&reg);
        for pct in [10, 20, 30, 40] {
            reg.emit(id, pct, "step", None).unwrap();
        }
        let events = reg.events_since(id, 2).unwrap();
        let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![3, 4]);
    }

    #[test]
    fn events_since_respects_page_limit() {
        let reg = TaskRegistry::new(StdDuration::from_secs(60), 2);
        let id = running(&reg);
        for pct in [10, 20, 30, 40] {
            reg.emit(id, pct, "step", None).unwrap();
        }
        assert_eq!(reg.events_since(id, 0).unwrap().len(), 2);
    }

    // ── reads, list, sweep ──────────────────────────────────────────

    #[test]
    fn get_unknown_task() {
        let reg = registry();
        assert!(matches!(
            reg.get(Uuid::new_v4()),
            Err(RegistryError::UnknownTask(_))
        ));
    }

    #[test]
    fn list_filters_by_state() {
        let reg = registry();
        let a = running(&reg);
        let _b = queued(&reg);
        reg.complete(a, json!({})).unwrap();

        let (done, total) = reg.list(&ListFilter {
            state: Some(TaskState::Completed),
            ..Default::default()
        });
        assert_eq!(total, 1);
        assert_eq!(done[0].task_id, a);
    }

    #[test]
    fn list_filters_by_user_and_kind() {
        let reg = registry();
        reg.create(TaskKind::Lesson, "alpha", &json!({"n": 1}), true).unwrap();
        reg.create(TaskKind::Tts, "alpha", &json!({"n": 2}), true).unwrap();
        reg.create(TaskKind::Lesson, "beta", &json!({"n": 3}), true).unwrap();

        let (tasks, total) = reg.list(&ListFilter {
            user_id: Some("alpha".into()),
            kind: Some(TaskKind::Lesson),
            ..Default::default()
        });
        assert_eq!(total, 1);
        assert_eq!(tasks[0].user_id, "alpha");
    }

    #[test]
    fn sweep_removes_expired_terminal_tasks_only() {
        let reg = TaskRegistry::new(StdDuration::from_secs(3600), 500);
        let done = running(&reg);
        reg.complete(done, json!({})).unwrap();
        let live = running(&reg);

        // Nothing is older than the TTL yet.
        assert_eq!(reg.sweep(Utc::now()), 0);

        // Two hours from now, the completed task has expired; the running
        // one is untouched regardless of age.
        let later = Utc::now() + Duration::hours(2);
        assert_eq!(reg.sweep(later), 1);
        assert!(reg.get(done).is_err());
        assert!(reg.get(live).is_ok());
    }

    #[test]
    fn state_counts_tracks_states() {
        let reg = registry();
        let _q = queued(&reg);
        let r = running(&reg);
        reg.complete(r, json!({})).unwrap();

        let counts = reg.state_counts();
        assert_eq!(counts.get(&TaskState::Queued), Some(&1));
        assert_eq!(counts.get(&TaskState::Completed), Some(&1));
    }
}
