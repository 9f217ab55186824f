//! Worker pool — bounded concurrent execution with per-kind queues.
//!
//! One queue + dispatcher per task kind. The queue is a bounded mpsc
//! channel (`max_queue_depth`); a full channel is backpressure, surfaced
//! at submit time. The dispatcher dequeues FIFO and acquires a semaphore
//! permit (`max_concurrency`) before spawning the job, so slow kinds never
//! starve fast ones and at most `max_concurrency` jobs of a kind run at
//! once.
//!
//! Each job runs under an overall deadline (`job_timeout`, covering
//! retries and backoff sleeps). Failures a job reports as retryable are
//! replayed with the shared backoff schedule, bounded by the per-kind
//! retry budget. All task state flows through the registry; the pool owns
//! no task state of its own.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, Semaphore};
use uuid::Uuid;

use guru_domain::backoff::RetryBackoff;
use guru_domain::cancel::CancelToken;
use guru_domain::config::{KindConfig, PoolConfig};
use guru_domain::error::ErrorKind;
use guru_domain::task::{TaskErrorInfo, TaskKind, TaskState};
use guru_registry::TaskRegistry;

use super::cancel::CancelMap;

/// How many recent job durations feed the drain-time estimate.
const DURATION_SAMPLES: usize = 32;
/// Fallback per-job estimate when no sample exists yet.
const DEFAULT_JOB_SECS: u64 = 5;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Job plumbing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What a job reports back to the pool.
#[derive(Debug, Clone)]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl JobError {
    pub fn fatal(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn retryable(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: true,
        }
    }
}

pub type JobResult = Result<serde_json::Value, JobError>;
pub type JobFuture = Pin<Box<dyn Future<Output = JobResult> + Send>>;

/// A job body. Called once per attempt; retries re-invoke it with a fresh
/// context.
pub type JobFn = Arc<dyn Fn(JobContext) -> JobFuture + Send + Sync>;

/// Everything a job attempt needs: identity, cancellation, and the
/// registry for progress emission.
#[derive(Clone)]
pub struct JobContext {
    pub task_id: Uuid,
    pub attempt: u32,
    pub cancel: CancelToken,
    pub registry: Arc<TaskRegistry>,
}

struct QueuedJob {
    task_id: Uuid,
    job: JobFn,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Errors & metrics
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, thiserror::Error)]
pub enum PoolError {
    #[error("queue full for kind {kind}")]
    Backpressure { kind: TaskKind, retry_after_secs: u64 },

    #[error("pool is shutting down")]
    ShuttingDown,
}

impl PoolError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Backpressure
    }

    pub fn retry_after_secs(&self) -> u64 {
        match self {
            Self::Backpressure {
                retry_after_secs, ..
            } => *retry_after_secs,
            Self::ShuttingDown => 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct KindMetrics {
    pub kind: TaskKind,
    pub queued: usize,
    pub running: usize,
    pub max_concurrency: usize,
    pub max_queue_depth: usize,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pool
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct KindPool {
    tx: mpsc::Sender<QueuedJob>,
    config: KindConfig,
    queued: Arc<AtomicUsize>,
    running: Arc<AtomicUsize>,
    durations: Arc<Mutex<VecDeque<Duration>>>,
}

pub struct WorkerPool {
    pools: HashMap<TaskKind, KindPool>,
    cancel_map: Arc<CancelMap>,
    accepting: AtomicBool,
}

impl WorkerPool {
    /// Build the pool and spawn one dispatcher per kind.
    pub fn new(
        config: &PoolConfig,
        registry: Arc<TaskRegistry>,
        cancel_map: Arc<CancelMap>,
    ) -> Self {
        let mut pools = HashMap::new();
        for kind in TaskKind::ALL {
            let kind_cfg = config.for_kind(kind);
            let (tx, rx) = mpsc::channel::<QueuedJob>(kind_cfg.max_queue_depth);
            let queued = Arc::new(AtomicUsize::new(0));
            let running = Arc::new(AtomicUsize::new(0));
            let durations = Arc::new(Mutex::new(VecDeque::new()));

            tokio::spawn(dispatch_loop(
                kind,
                kind_cfg.clone(),
                rx,
                registry.clone(),
                cancel_map.clone(),
                queued.clone(),
                running.clone(),
                durations.clone(),
            ));

            pools.insert(
                kind,
                KindPool {
                    tx,
                    config: kind_cfg,
                    queued,
                    running,
                    durations,
                },
            );
        }

        Self {
            pools,
            cancel_map,
            accepting: AtomicBool::new(true),
        }
    }

    /// Enqueue a job for an already-registered task. A full queue rejects
    /// with backpressure and a drain-time hint.
    pub fn submit(&self, kind: TaskKind, task_id: Uuid, job: JobFn) -> Result<(), PoolError> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(PoolError::ShuttingDown);
        }
        let pool = &self.pools[&kind];
        match pool.tx.try_send(QueuedJob { task_id, job }) {
            Ok(()) => {
                pool.queued.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => Err(PoolError::Backpressure {
                kind,
                retry_after_secs: self.drain_hint_secs(kind),
            }),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(PoolError::ShuttingDown),
        }
    }

    /// Signal a running job to stop. Queued tasks are handled in the
    /// registry by the caller; the dispatcher skips tasks that are no
    /// longer `queued` when their turn comes.
    pub fn cancel(&self, task_id: Uuid) -> bool {
        self.cancel_map.cancel(task_id)
    }

    /// Estimated seconds until the kind's queue drains, clamped to
    /// [1, 60]. Used as the `retry_after` hint.
    pub fn drain_hint_secs(&self, kind: TaskKind) -> u64 {
        let pool = &self.pools[&kind];
        let queued = pool.queued.load(Ordering::SeqCst) as u64;
        let avg_secs = {
            let samples = pool.durations.lock();
            if samples.is_empty() {
                DEFAULT_JOB_SECS
            } else {
                let total: Duration = samples.iter().sum();
                (total.as_secs_f64() / samples.len() as f64).ceil() as u64
            }
        };
        let estimate = queued
            .saturating_mul(avg_secs.max(1))
            .saturating_div(pool.config.max_concurrency.max(1) as u64);
        estimate.clamp(1, 60)
    }

    pub fn metrics(&self) -> Vec<KindMetrics> {
        let mut out: Vec<KindMetrics> = TaskKind::ALL
            .iter()
            .map(|kind| {
                let pool = &self.pools[kind];
                KindMetrics {
                    kind: *kind,
                    queued: pool.queued.load(Ordering::SeqCst),
                    running: pool.running.load(Ordering::SeqCst),
                    max_concurrency: pool.config.max_concurrency,
                    max_queue_depth: pool.config.max_queue_depth,
                }
            })
            .collect();
        out.sort_by_key(|m| m.kind.as_str());
        out
    }

    /// Stop accepting submissions, wait up to `grace` for in-flight work
    /// to drain, then cancel the rest.
    pub async fn shutdown(&self, grace: Duration) {
        self.accepting.store(false, Ordering::Release);
        let deadline = Instant::now() + grace;
        loop {
            let busy: usize = self
                .pools
                .values()
                .map(|p| p.queued.load(Ordering::SeqCst) + p.running.load(Ordering::SeqCst))
                .sum();
            if busy == 0 {
                return;
            }
            if Instant::now() >= deadline {
                tracing::warn!(remaining = busy, "shutdown grace expired, cancelling jobs");
                self.cancel_map.cancel_all();
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dispatcher & job runner
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[allow(clippy::too_many_arguments)]
async fn dispatch_loop(
    kind: TaskKind,
    config: KindConfig,
    mut rx: mpsc::Receiver<QueuedJob>,
    registry: Arc<TaskRegistry>,
    cancel_map: Arc<CancelMap>,
    queued: Arc<AtomicUsize>,
    running: Arc<AtomicUsize>,
    durations: Arc<Mutex<VecDeque<Duration>>>,
) {
    let semaphore = Arc::new(Semaphore::new(config.max_concurrency));
    while let Some(job) = rx.recv().await {
        queued.fetch_sub(1, Ordering::SeqCst);
        let permit = match semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };

        let span = tracing::info_span!("job", kind = %kind, task_id = %job.task_id);
        let registry = registry.clone();
        let cancel_map = cancel_map.clone();
        let running = running.clone();
        let durations = durations.clone();
        let config = config.clone();
        tokio::spawn(tracing::Instrument::instrument(
            async move {
                run_job(config, registry, cancel_map, job, &running, &durations).await;
                drop(permit);
            },
            span,
        ));
    }
}

async fn run_job(
    config: KindConfig,
    registry: Arc<TaskRegistry>,
    cancel_map: Arc<CancelMap>,
    job: QueuedJob,
    running: &AtomicUsize,
    durations: &Mutex<VecDeque<Duration>>,
) {
    let task_id = job.task_id;

    // The task may have been cancelled while it waited in the queue.
    match registry.get(task_id) {
        Ok(task) if task.state == TaskState::Queued => {}
        _ => return,
    }
    if registry.begin(task_id).is_err() {
        return;
    }

    let cancel = cancel_map.register(task_id);
    running.fetch_add(1, Ordering::SeqCst);
    let started = Instant::now();
    let deadline = started + config.job_timeout();
    let backoff = RetryBackoff::default();
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            finish_cancelled(&registry, task_id);
            break;
        }

        if attempt > 0 {
            if registry.note_attempt(task_id).is_err() {
                // Externally cancelled between attempts.
                break;
            }
            let delay = backoff.delay_for_attempt(attempt - 1);
            let remaining = deadline.saturating_duration_since(Instant::now());
            if delay >= remaining {
                finish_timeout(&registry, task_id, started);
                break;
            }
            tokio::time::sleep(delay).await;
            if cancel.is_cancelled() {
                finish_cancelled(&registry, task_id);
                break;
            }
        }

        let remaining = match deadline.checked_duration_since(Instant::now()) {
            Some(d) if !d.is_zero() => d,
            _ => {
                finish_timeout(&registry, task_id, started);
                break;
            }
        };

        let ctx = JobContext {
            task_id,
            attempt: attempt + 1,
            cancel: cancel.clone(),
            registry: registry.clone(),
        };

        match tokio::time::timeout(remaining, (job.job)(ctx)).await {
            Err(_) => {
                finish_timeout(&registry, task_id, started);
                break;
            }
            Ok(Ok(result)) => {
                if let Err(e) = registry.complete(task_id, result) {
                    // Lost to an external cancel; the terminal state stands.
                    tracing::debug!(task_id = %task_id, error = %e, "complete superseded");
                }
                break;
            }
            Ok(Err(e)) if e.kind == ErrorKind::Cancelled || cancel.is_cancelled() => {
                finish_cancelled(&registry, task_id);
                break;
            }
            Ok(Err(e)) if e.retryable && attempt < config.retries => {
                tracing::warn!(
                    task_id = %task_id,
                    attempt = attempt + 1,
                    error = %e.message,
                    "job attempt failed, retrying"
                );
                attempt += 1;
            }
            Ok(Err(e)) => {
                let info = TaskErrorInfo {
                    kind: e.kind,
                    message: e.message,
                };
                if let Err(err) = registry.fail(task_id, info) {
                    tracing::debug!(task_id = %task_id, error = %err, "fail superseded");
                }
                break;
            }
        }
    }

    running.fetch_sub(1, Ordering::SeqCst);
    cancel_map.remove(task_id);

    let mut samples = durations.lock();
    if samples.len() >= DURATION_SAMPLES {
        samples.pop_front();
    }
    samples.push_back(started.elapsed());
}

fn finish_cancelled(registry: &TaskRegistry, task_id: Uuid) {
    if let Err(e) = registry.cancel(task_id) {
        tracing::debug!(task_id = %task_id, error = %e, "cancel superseded");
    }
}

fn finish_timeout(registry: &TaskRegistry, task_id: Uuid, started: Instant) {
    let info = TaskErrorInfo {
        kind: ErrorKind::Timeout,
        message: format!("job exceeded its deadline after {:?}", started.elapsed()),
    };
    if let Err(e) = registry.fail(task_id, info) {
        tracing::debug!(task_id = %task_id, error = %e, "timeout fail superseded");
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
