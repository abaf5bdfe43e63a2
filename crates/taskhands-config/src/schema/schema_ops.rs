//! Operational configuration types (rate limits, monitor, alerts).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Rate limiter settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// JSON file holding samples and backoff state across restarts.
    #[serde(default)]
    pub persist_path: Option<PathBuf>,
}

/// Quota for one API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiLimitConfig {
    /// Requests allowed per window.
    pub limit: u64,
    /// Sliding window length.
    pub window_secs: u64,
    /// Base of the backoff applied after errors.
    #[serde(default = "default_backoff_base")]
    pub backoff_base_secs: u64,
}

fn default_backoff_base() -> u64 {
    60
}

impl ApiLimitConfig {
    pub fn new(limit: u64, window_secs: u64, backoff_base_secs: u64) -> Self {
        Self {
            limit,
            window_secs,
            backoff_base_secs,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_secs(self.backoff_base_secs)
    }
}

/// Health monitor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,

    /// Heartbeats older than this are stale.
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_secs: u64,

    /// Restarts allowed since the last healthy cycle.
    #[serde(default = "default_max_recovery_attempts")]
    pub max_recovery_attempts: u32,

    /// Health cycles kept in memory.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Filesystem checked for headroom.
    #[serde(default = "default_disk_path")]
    pub disk_path: PathBuf,

    #[serde(default = "default_disk_min_free")]
    pub disk_min_free_percent: f64,

    /// Rate limit usage above this counts as saturated.
    #[serde(default = "default_saturation")]
    pub saturation_percent: f64,

    /// Backend probed by the connectivity check.
    #[serde(default)]
    pub connectivity_url: Option<String>,

    /// Stop timeout used when restarting the worker.
    #[serde(default = "default_recovery_stop_timeout")]
    pub recovery_stop_timeout_secs: u64,
}

fn default_check_interval() -> u64 {
    60
}

fn default_heartbeat_timeout() -> u64 {
    120
}

fn default_max_recovery_attempts() -> u32 {
    3
}

fn default_history_limit() -> usize {
    100
}

fn default_disk_path() -> PathBuf {
    PathBuf::from("/")
}

fn default_disk_min_free() -> f64 {
    10.0
}

fn default_saturation() -> f64 {
    90.0
}

fn default_recovery_stop_timeout() -> u64 {
    10
}

impl MonitorConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn recovery_stop_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_stop_timeout_secs)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval(),
            heartbeat_timeout_secs: default_heartbeat_timeout(),
            max_recovery_attempts: default_max_recovery_attempts(),
            history_limit: default_history_limit(),
            disk_path: default_disk_path(),
            disk_min_free_percent: default_disk_min_free(),
            saturation_percent: default_saturation(),
            connectivity_url: None,
            recovery_stop_timeout_secs: default_recovery_stop_timeout(),
        }
    }
}

/// Alert channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertsConfig {
    /// Telegram bot token.
    #[serde(default)]
    pub telegram_bot_token: Option<String>,

    /// Telegram chat ID.
    #[serde(default)]
    pub telegram_chat_id: Option<String>,

    /// Generic JSON webhook.
    #[serde(default)]
    pub webhook_url: Option<String>,

    /// Pending notifications buffered before new ones are dropped.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_queue_capacity() -> usize {
    100
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            telegram_bot_token: None,
            telegram_chat_id: None,
            webhook_url: None,
            queue_capacity: default_queue_capacity(),
        }
    }
}
