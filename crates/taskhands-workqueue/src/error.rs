//! Queue errors.

use thiserror::Error;

use taskhands_store::StoreError;

use crate::job::JobStatus;

/// Queue error types.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Job not found.
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// The job's status does not allow the requested change.
    #[error("Job {id} cannot change from status {status}")]
    InvalidTransition { id: String, status: JobStatus },

    /// Unknown priority name.
    #[error("Invalid priority: {0}")]
    InvalidPriority(String),

    /// Worker lifecycle error.
    #[error("Worker error: {0}")]
    WorkerError(String),

    /// Callback delivery failed.
    #[error("Callback failed: {0}")]
    Callback(String),

    /// Store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Serialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<tokio_rusqlite::Error> for QueueError {
    fn from(e: tokio_rusqlite::Error) -> Self {
        QueueError::Store(e.into())
    }
}
