//! Worker runtime: the per-kind pools, cancellation map, job bodies, and
//! the lesson storage seam.

pub mod cancel;
pub mod jobs;
pub mod lessons;
pub mod pool;

pub use cancel::CancelMap;
pub use lessons::LessonStore;
pub use pool::{JobContext, JobError, JobFn, PoolError, WorkerPool};
