//! Health checks run by the monitor on every cycle.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use taskhands_ratelimit::RateLimiter;
use taskhands_store::{Store, WorkerStatus};
use taskhands_workqueue::WorkerLoop;

use crate::error::MonitorError;

/// Result of one check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub name: String,
    pub healthy: bool,
    pub message: String,
    #[serde(default)]
    pub details: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl HealthCheck {
    pub fn healthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, true, message)
    }

    pub fn unhealthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, false, message)
    }

    fn new(name: impl Into<String>, healthy: bool, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            healthy,
            message: message.into(),
            details: serde_json::Value::Null,
            timestamp: Utc::now(),
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Anything the monitor can check.
///
/// The monitor overwrites `name` and `timestamp` of the returned result with
/// the registered name and the cycle time.
#[async_trait]
pub trait HealthCheckable: Send + Sync {
    async fn check(&self) -> HealthCheck;
}

/// Heartbeat freshness.
pub struct HeartbeatCheck {
    store: Store,
    timeout: Duration,
}

impl HeartbeatCheck {
    pub fn new(store: Store, timeout: Duration) -> Self {
        Self { store, timeout }
    }
}

#[async_trait]
impl HealthCheckable for HeartbeatCheck {
    async fn check(&self) -> HealthCheck {
        let last = match self.store.last_heartbeat().await {
            Ok(Some(last)) => last,
            Ok(None) => return HealthCheck::unhealthy("heartbeat", "No heartbeat recorded"),
            Err(e) => return HealthCheck::unhealthy("heartbeat", format!("Failed to read heartbeat: {}", e)),
        };

        let age = (self.store.now() - last).num_seconds().max(0);
        let stale = age as u64 > self.timeout.as_secs();
        let mut message = format!("Last heartbeat {}s ago", age);
        if stale {
            message.push_str(" (STALE)");
        }

        HealthCheck::new("heartbeat", !stale, message).with_details(json!({
            "last_heartbeat": last,
            "age_secs": age,
            "timeout_secs": self.timeout.as_secs(),
        }))
    }
}

/// Persisted worker status against the actual loop.
pub struct WorkerStatusCheck {
    store: Store,
    worker: Arc<WorkerLoop>,
}

impl WorkerStatusCheck {
    pub fn new(store: Store, worker: Arc<WorkerLoop>) -> Self {
        Self { store, worker }
    }
}

#[async_trait]
impl HealthCheckable for WorkerStatusCheck {
    async fn check(&self) -> HealthCheck {
        let status = match self.store.worker_status().await {
            Ok(status) => status,
            Err(e) => return HealthCheck::unhealthy("worker_status", format!("Failed to read status: {}", e)),
        };
        let snapshot = self.worker.snapshot();

        let (healthy, message) = match status {
            WorkerStatus::Running if !snapshot.alive => (false, "Worker claims running but loop not active".to_string()),
            WorkerStatus::Error => (false, "Worker in error state".to_string()),
            other => (true, format!("Worker {}", other)),
        };

        HealthCheck::new("worker_status", healthy, message).with_details(json!({
            "status": status,
            "alive": snapshot.alive,
            "paused": snapshot.paused,
            "current_job": snapshot.current_job,
        }))
    }
}

/// Free space on the filesystem holding the store.
pub struct DiskCheck {
    path: PathBuf,
    min_free_percent: f64,
}

impl DiskCheck {
    pub fn new(path: impl Into<PathBuf>, min_free_percent: f64) -> Self {
        Self {
            path: path.into(),
            min_free_percent,
        }
    }

    /// Judge a measured free percentage.
    pub fn evaluate(&self, free_percent: f64) -> HealthCheck {
        let healthy = free_percent > self.min_free_percent;
        HealthCheck::new("disk", healthy, format!("{:.1}% free", free_percent)).with_details(json!({
            "path": self.path,
            "free_percent": (free_percent * 10.0).round() / 10.0,
            "min_free_percent": self.min_free_percent,
        }))
    }

    #[cfg(unix)]
    fn free_percent(&self) -> Option<f64> {
        let stat = nix::sys::statvfs::statvfs(&self.path).ok()?;
        let total = stat.blocks() as f64;
        if total <= 0.0 {
            return None;
        }
        Some(stat.blocks_available() as f64 / total * 100.0)
    }

    #[cfg(not(unix))]
    fn free_percent(&self) -> Option<f64> {
        None
    }
}

#[async_trait]
impl HealthCheckable for DiskCheck {
    async fn check(&self) -> HealthCheck {
        match self.free_percent() {
            Some(free) => self.evaluate(free),
            None => HealthCheck::healthy("disk", "Disk check skipped"),
        }
    }
}

/// Rate limiter saturation.
pub struct RateLimitCheck {
    limiter: Option<Arc<RateLimiter>>,
    threshold_percent: f64,
}

impl RateLimitCheck {
    pub fn new(limiter: Option<Arc<RateLimiter>>, threshold_percent: f64) -> Self {
        Self {
            limiter,
            threshold_percent,
        }
    }
}

#[async_trait]
impl HealthCheckable for RateLimitCheck {
    async fn check(&self) -> HealthCheck {
        let Some(ref limiter) = self.limiter else {
            return HealthCheck::healthy("rate_limits", "No rate limiter configured");
        };

        let saturated = limiter.saturated(self.threshold_percent);
        if saturated.is_empty() {
            return HealthCheck::healthy("rate_limits", "All APIs within limits");
        }

        let issues: Vec<String> = saturated
            .iter()
            .map(|s| {
                if s.in_backoff {
                    format!("{} in backoff", s.api)
                } else {
                    format!("{} at {:.1}%", s.api, s.percentage)
                }
            })
            .collect();
        HealthCheck::unhealthy("rate_limits", issues.join("; ")).with_details(json!({ "saturated": saturated }))
    }
}

/// Reachability of the task-submission backend.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    /// What is being probed, for messages.
    fn target(&self) -> &str;

    async fn probe(&self) -> Result<(), MonitorError>;
}

/// HTTP GET probe; any 2xx is healthy.
pub struct HttpProbe {
    url: String,
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }
}

#[async_trait]
impl ConnectivityProbe for HttpProbe {
    fn target(&self) -> &str {
        &self.url
    }

    async fn probe(&self) -> Result<(), MonitorError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| MonitorError::Probe(e.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(MonitorError::Probe(format!("HTTP {}", response.status())))
        }
    }
}

pub struct ConnectivityCheck {
    probe: Option<Arc<dyn ConnectivityProbe>>,
}

impl ConnectivityCheck {
    pub fn new(probe: Option<Arc<dyn ConnectivityProbe>>) -> Self {
        Self { probe }
    }
}

#[async_trait]
impl HealthCheckable for ConnectivityCheck {
    async fn check(&self) -> HealthCheck {
        let Some(ref probe) = self.probe else {
            return HealthCheck::healthy("connectivity", "Connectivity check not configured");
        };
        match probe.probe().await {
            Ok(()) => HealthCheck::healthy("connectivity", format!("{} reachable", probe.target())),
            Err(e) => HealthCheck::unhealthy("connectivity", format!("{} unreachable: {}", probe.target(), e)),
        }
    }
}
