//! Monitor errors.

use thiserror::Error;

use taskhands_store::StoreError;
use taskhands_workqueue::QueueError;

/// Monitor error types.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Alert channel error.
    #[error("Alert error: {0}")]
    Alert(String),

    /// Connectivity probe failed to run.
    #[error("Probe error: {0}")]
    Probe(String),

    /// Worker control failed during recovery.
    #[error(transparent)]
    Worker(#[from] QueueError),

    /// Store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}
