//! Scheduler errors.

use thiserror::Error;

use taskhands_store::StoreError;
use taskhands_workqueue::QueueError;

/// Scheduler error types.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Schedule not found.
    #[error("Schedule not found: {0}")]
    NotFound(String),

    /// A schedule with this id already exists.
    #[error("Schedule already exists: {0}")]
    AlreadyExists(String),

    /// Definition is not usable.
    #[error("Invalid schedule '{id}': {message}")]
    Invalid { id: String, message: String },

    /// Queue failure while enqueuing or maintaining jobs.
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// Store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Serialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<tokio_rusqlite::Error> for SchedulerError {
    fn from(e: tokio_rusqlite::Error) -> Self {
        SchedulerError::Store(e.into())
    }
}

impl SchedulerError {
    pub(crate) fn invalid(id: &str, message: impl Into<String>) -> Self {
        SchedulerError::Invalid {
            id: id.to_string(),
            message: message.into(),
        }
    }
}
