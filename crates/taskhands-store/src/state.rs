//! Worker heartbeat and persisted worker status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::codec::{format_ts, parse_ts};
use crate::error::StoreError;
use crate::store::Store;

/// State key of the latest heartbeat.
pub const KEY_LAST_HEARTBEAT: &str = "last_heartbeat";
/// State key of the persisted worker status.
pub const KEY_WORKER_STATUS: &str = "worker_status";

/// Persisted worker status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Stopped,
    Running,
    Paused,
    /// Recovery budget exhausted; requires an operator.
    Error,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Stopped => "stopped",
            WorkerStatus::Running => "running",
            WorkerStatus::Paused => "paused",
            WorkerStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkerStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stopped" => Ok(WorkerStatus::Stopped),
            "running" => Ok(WorkerStatus::Running),
            "paused" => Ok(WorkerStatus::Paused),
            "error" => Ok(WorkerStatus::Error),
            other => Err(StoreError::Corrupt(format!("unknown worker status '{}'", other))),
        }
    }
}

impl Store {
    /// Record a heartbeat for `worker_id` at the current time.
    pub async fn touch_heartbeat(&self, worker_id: &str) -> Result<DateTime<Utc>, StoreError> {
        let now = self.now();
        let stamp = format_ts(now);
        self.set_state(KEY_LAST_HEARTBEAT, &stamp).await?;
        self.set_state(&format!("heartbeat:{}", worker_id), &stamp).await?;
        Ok(now)
    }

    /// Time of the most recent heartbeat from any worker.
    pub async fn last_heartbeat(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        match self.get_state(KEY_LAST_HEARTBEAT).await? {
            Some(raw) => Ok(Some(parse_ts(&raw)?)),
            None => Ok(None),
        }
    }

    /// Persist the worker status.
    pub async fn set_worker_status(&self, status: WorkerStatus) -> Result<(), StoreError> {
        self.set_state(KEY_WORKER_STATUS, status.as_str()).await
    }

    /// Persisted worker status, `stopped` when never written.
    pub async fn worker_status(&self) -> Result<WorkerStatus, StoreError> {
        match self.get_state(KEY_WORKER_STATUS).await? {
            Some(raw) => raw.parse(),
            None => Ok(WorkerStatus::Stopped),
        }
    }
}
