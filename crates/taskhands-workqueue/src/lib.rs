//! # TaskHands Work Queue
//!
//! Durable job queue and the single-worker execution loop.
//!
//! ## Features
//!
//! - Priority ordering (urgent, high, normal, low) with FIFO tie-breaking
//! - Exponential retry backoff with a terminal `failed` state
//! - Atomic claim so several workers can share one store
//! - Stuck-job reclamation and retention cleanup
//! - Worker loop with heartbeat, pause/resume and bounded stop
//! - Best-effort completion callbacks

pub mod callback;
pub mod error;
pub mod executor;
pub mod job;
pub mod queue;
pub mod worker;

pub use callback::{CallbackClient, CallbackPayload};
pub use error::QueueError;
pub use executor::ExecutorRegistry;
pub use job::{Job, JobMetadata, JobPriority, JobResult, JobSource, JobStatus, NewJob};
pub use queue::{FailOutcome, JobQueue, QueueStats};
pub use worker::{CurrentJob, ProcessOutcome, WorkerLoop, WorkerSnapshot};
