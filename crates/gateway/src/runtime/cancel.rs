//! Per-task cancellation tokens.
//!
//! Each running job registers a [`CancelToken`] here keyed by task id.
//! The cancel endpoint signals the token; the job observes it at its next
//! suspension point and any in-flight upstream call is abandoned.

use std::collections::HashMap;

use parking_lot::Mutex;
use uuid::Uuid;

use guru_domain::cancel::CancelToken;

/// Tracks active cancellation tokens per task.
#[derive(Default)]
pub struct CancelMap {
    tokens: Mutex<HashMap<Uuid, CancelToken>>,
}

impl CancelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a new cancel token for a task.
    pub fn register(&self, task_id: Uuid) -> CancelToken {
        let token = CancelToken::new();
        self.tokens.lock().insert(task_id, token.clone());
        token
    }

    /// Cancel a running job. Returns true if a token was found.
    pub fn cancel(&self, task_id: Uuid) -> bool {
        if let Some(token) = self.tokens.lock().get(&task_id) {
            token.cancel();
            true
        } else {
            false
        }
    }

    /// Remove the token for a task (called when its job finishes).
    pub fn remove(&self, task_id: Uuid) {
        self.tokens.lock().remove(&task_id);
    }

    /// Check if a task currently has a registered (running) job.
    pub fn is_running(&self, task_id: Uuid) -> bool {
        self.tokens.lock().contains_key(&task_id)
    }

    /// Cancel everything — used at shutdown after the drain grace period.
    pub fn cancel_all(&self) {
        for token in self.tokens.lock().values() {
            token.cancel();
        }
    }
}
