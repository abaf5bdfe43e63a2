//! Engine configuration types (queue, worker, scheduler).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use super::default_true;
use crate::cron_expr::ScheduleZone;

/// Job queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Retries granted to new jobs.
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,

    /// Base of the exponential retry backoff.
    #[serde(default = "default_retry_base")]
    pub retry_base_secs: u64,

    /// Upper bound on a single retry delay.
    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_secs: u64,

    /// Terminal jobs older than this are deleted by maintenance.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Running jobs older than this are reclaimed by maintenance.
    #[serde(default = "default_stuck_timeout")]
    pub stuck_timeout_minutes: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base() -> u64 {
    60
}

fn default_retry_max_delay() -> u64 {
    86_400
}

fn default_retention_days() -> u32 {
    7
}

fn default_stuck_timeout() -> u64 {
    60
}

impl QueueConfig {
    pub fn retry_base(&self) -> Duration {
        Duration::from_secs(self.retry_base_secs)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_secs(self.retry_max_delay_secs)
    }

    pub fn stuck_timeout(&self) -> Duration {
        Duration::from_secs(self.stuck_timeout_minutes * 60)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            default_max_retries: default_max_retries(),
            retry_base_secs: default_retry_base(),
            retry_max_delay_secs: default_retry_max_delay(),
            retention_days: default_retention_days(),
            stuck_timeout_minutes: default_stuck_timeout(),
        }
    }
}

/// Worker loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Identity recorded on claimed jobs.
    #[serde(default = "default_worker_id")]
    pub worker_id: String,

    /// Idle sleep between queue polls.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Minimum spacing between heartbeat writes.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// How long `stop` waits for the in-flight job.
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,

    /// Sleep after an unexpected loop error.
    #[serde(default = "default_error_sleep")]
    pub error_sleep_secs: u64,

    /// Timeout for job callback webhooks.
    #[serde(default = "default_callback_timeout")]
    pub callback_timeout_secs: u64,
}

fn default_worker_id() -> String {
    "worker-1".to_string()
}

fn default_poll_interval() -> u64 {
    10
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_stop_timeout() -> u64 {
    30
}

fn default_error_sleep() -> u64 {
    30
}

fn default_callback_timeout() -> u64 {
    10
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn error_sleep(&self) -> Duration {
        Duration::from_secs(self.error_sleep_secs)
    }

    pub fn callback_timeout(&self) -> Duration {
        Duration::from_secs(self.callback_timeout_secs)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: default_worker_id(),
            poll_interval_secs: default_poll_interval(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            stop_timeout_secs: default_stop_timeout(),
            error_sleep_secs: default_error_sleep(),
            callback_timeout_secs: default_callback_timeout(),
        }
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Whether timers are armed on start.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Spacing of the cleanup / stuck-job sweep.
    #[serde(default = "default_maintenance_interval")]
    pub maintenance_interval_secs: u64,

    /// Daily goal for task types without an explicit entry.
    #[serde(default = "default_daily_goal")]
    pub default_daily_goal: u64,

    /// Per task type daily goals.
    #[serde(default)]
    pub daily_goals: HashMap<String, u64>,

    #[serde(default)]
    pub auto_retry: AutoRetryConfig,

    /// Zone cron fields and `auto_retry.until_hour` are read in:
    /// `local`, `utc` or a fixed offset like `+02:00`.
    #[serde(default)]
    pub timezone: ScheduleZone,

    /// Schedules inserted on first start when absent from the store.
    #[serde(default)]
    pub schedules: Vec<ScheduleSeed>,
}

fn default_maintenance_interval() -> u64 {
    3600
}

fn default_daily_goal() -> u64 {
    50
}

impl SchedulerConfig {
    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }

    /// Daily goal that applies to `task_type`.
    pub fn daily_goal_for(&self, task_type: &str) -> u64 {
        self.daily_goals
            .get(task_type)
            .copied()
            .unwrap_or(self.default_daily_goal)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            maintenance_interval_secs: default_maintenance_interval(),
            default_daily_goal: default_daily_goal(),
            daily_goals: HashMap::new(),
            auto_retry: AutoRetryConfig::default(),
            timezone: ScheduleZone::default(),
            schedules: Vec::new(),
        }
    }
}

/// One-shot re-fire after a schedule triggers short of its goal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoRetryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Delay before the re-fire.
    #[serde(default = "default_retry_interval")]
    pub interval_minutes: u64,

    /// Re-fires are only armed while the local hour is below this.
    #[serde(default = "default_until_hour")]
    pub until_hour: u32,
}

fn default_retry_interval() -> u64 {
    30
}

fn default_until_hour() -> u32 {
    20
}

impl AutoRetryConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes * 60)
    }
}

impl Default for AutoRetryConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            interval_minutes: default_retry_interval(),
            until_hour: default_until_hour(),
        }
    }
}

/// A schedule definition seeded from configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSeed {
    /// Unique schedule ID.
    pub id: String,
    /// Task type the schedule materializes.
    pub task_type: String,
    #[serde(default)]
    pub description: String,
    /// Cron expression (5 or 6 fields).
    #[serde(default)]
    pub cron: Option<String>,
    /// Fixed interval alternative to `cron`.
    #[serde(default)]
    pub interval_minutes: Option<u64>,
    #[serde(default = "default_params")]
    pub params: serde_json::Value,
    #[serde(default = "default_priority")]
    pub priority: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_params() -> serde_json::Value {
    serde_json::json!({})
}

fn default_priority() -> String {
    "normal".to_string()
}
