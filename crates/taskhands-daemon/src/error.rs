//! Daemon errors.

use std::path::PathBuf;
use thiserror::Error;

use taskhands_monitor::MonitorError;
use taskhands_ratelimit::RateLimitError;
use taskhands_scheduler::SchedulerError;
use taskhands_store::StoreError;
use taskhands_workqueue::QueueError;

#[derive(Debug, Error)]
pub enum DaemonError {
    /// Another engine already holds the instance lock.
    #[error("Engine already running (lock file: {path}, PID: {pid})")]
    AlreadyRunning { path: PathBuf, pid: u32 },

    /// The lock file could not be read, written or removed.
    #[error("Lock file error at {path}: {reason}")]
    LockFile { path: PathBuf, reason: String },

    #[error("Failed to set up signal handlers: {0}")]
    SignalSetup(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Monitor(#[from] MonitorError),

    #[error(transparent)]
    RateLimit(#[from] RateLimitError),
}
