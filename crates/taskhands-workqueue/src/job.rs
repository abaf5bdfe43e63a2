//! Job definition and status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use taskhands_protocols::{ExecutionStats, JobPayload};

use crate::error::QueueError;

/// Job priority; lower numbers run first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    Urgent = 1,
    High = 2,
    Normal = 3,
    Low = 4,
}

impl JobPriority {
    /// Stored ordinal.
    pub fn as_i64(self) -> i64 {
        self as i64
    }

    /// Decode a stored ordinal.
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            1 => Some(JobPriority::Urgent),
            2 => Some(JobPriority::High),
            3 => Some(JobPriority::Normal),
            4 => Some(JobPriority::Low),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobPriority::Urgent => "urgent",
            JobPriority::High => "high",
            JobPriority::Normal => "normal",
            JobPriority::Low => "low",
        }
    }
}

impl Default for JobPriority {
    fn default() -> Self {
        JobPriority::Normal
    }
}

impl std::fmt::Display for JobPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobPriority {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "urgent" | "1" => Ok(JobPriority::Urgent),
            "high" | "2" => Ok(JobPriority::High),
            "normal" | "3" => Ok(JobPriority::Normal),
            "low" | "4" => Ok(JobPriority::Low),
            other => Err(QueueError::InvalidPriority(other.to_string())),
        }
    }
}

/// Job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be claimed.
    Pending,
    /// Claimed by a worker.
    Running,
    /// Finished successfully.
    Completed,
    /// Out of retries.
    Failed,
    /// Cancelled before it started.
    Cancelled,
    /// Waiting for its backoff to elapse.
    RetryPending,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
        JobStatus::RetryPending,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::RetryPending => "retry_pending",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == raw)
    }

    /// Terminal statuses never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who created a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobSource {
    Manual,
    Scheduled,
    /// Auto-retry re-fire of a schedule.
    Retry,
}

impl JobSource {
    pub fn as_str(self) -> &'static str {
        match self {
            JobSource::Manual => "manual",
            JobSource::Scheduled => "scheduled",
            JobSource::Retry => "retry",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "manual" => Some(JobSource::Manual),
            "scheduled" => Some(JobSource::Scheduled),
            "retry" => Some(JobSource::Retry),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Free-form job metadata understood by the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobMetadata {
    /// Receives a POST when the job completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,

    /// Schedule that created the job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_id: Option<String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Result summary stored on completed jobs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    #[serde(flatten)]
    pub stats: ExecutionStats,
    pub duration_secs: f64,
}

/// A job record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub task_type: String,
    pub params: JobPayload,
    pub priority: JobPriority,
    pub status: JobStatus,
    pub source: JobSource,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub last_error: Option<String>,
    pub result: Option<serde_json::Value>,
    /// Earliest time the job may run.
    pub scheduled_for: Option<DateTime<Utc>>,
    pub metadata: JobMetadata,
    /// Worker that claimed the job.
    pub claimed_by: Option<String>,
}

impl Job {
    /// Check if the job can be retried.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Check if the job is eligible to be claimed at `now`.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, JobStatus::Pending | JobStatus::RetryPending)
            && self.scheduled_for.is_none_or(|at| at <= now)
    }
}

/// Parameters for creating a job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub task_type: String,
    pub params: JobPayload,
    pub priority: JobPriority,
    pub source: JobSource,
    pub scheduled_for: Option<DateTime<Utc>>,
    /// Falls back to the queue default.
    pub max_retries: Option<u32>,
    pub metadata: JobMetadata,
}

impl NewJob {
    /// A manual, normal priority job with empty params.
    pub fn new(task_type: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            params: JobPayload::empty(),
            priority: JobPriority::Normal,
            source: JobSource::Manual,
            scheduled_for: None,
            max_retries: None,
            metadata: JobMetadata::default(),
        }
    }

    pub fn with_params(mut self, params: JobPayload) -> Self {
        self.params = params;
        self
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_source(mut self, source: JobSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_scheduled_for(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_for = Some(at);
        self
    }

    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = Some(max);
        self
    }

    pub fn with_callback_url(mut self, url: impl Into<String>) -> Self {
        self.metadata.callback_url = Some(url.into());
        self
    }

    pub fn with_schedule_id(mut self, schedule_id: impl Into<String>) -> Self {
        self.metadata.schedule_id = Some(schedule_id.into());
        self
    }
}
