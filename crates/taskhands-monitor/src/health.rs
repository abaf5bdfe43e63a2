//! Health monitor: periodic checks, bounded worker recovery, escalation.
//!
//! Every cycle runs all registered checks. Unhealthy heartbeat or worker
//! status results trigger a stop-then-start of the worker loop, at most
//! `max_recovery_attempts` times since the last fully healthy cycle. Once the
//! budget is spent the worker is stopped, its persisted status becomes
//! `error` and a single critical notification is sent. Nothing restarts the
//! worker after that until a healthy cycle clears the escalation.

#[cfg(test)]
#[path = "health_tests.rs"]
mod tests;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use taskhands_config::MonitorConfig;
use taskhands_protocols::{BackoffPolicy, NotificationSink, RetryDecision};
use taskhands_ratelimit::RateLimiter;
use taskhands_store::{Store, WorkerStatus};
use taskhands_workqueue::WorkerLoop;

use crate::checks::{
    ConnectivityCheck, ConnectivityProbe, DiskCheck, HealthCheck, HealthCheckable, HeartbeatCheck, HttpProbe,
    RateLimitCheck, WorkerStatusCheck,
};
use crate::error::MonitorError;

/// Checks whose failure means the worker itself is in trouble.
const RECOVERABLE_CHECKS: [&str; 2] = ["heartbeat", "worker_status"];
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// What the monitor did about an unhealthy cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RecoveryAction {
    /// Worker restarted; `attempt` of `max`.
    Restarted { attempt: u32, max: u32 },
    /// Budget exhausted on this cycle; worker set to `error`.
    Escalated,
    /// Already escalated; waiting for an operator.
    AwaitingOperator,
}

/// One monitor cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCycle {
    pub timestamp: DateTime<Utc>,
    pub healthy: bool,
    pub checks: Vec<HealthCheck>,
    /// `name: message` for each failed check.
    pub issues: Vec<String>,
    pub recovery: Option<RecoveryAction>,
}

/// Monitor state for status reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub monitoring: bool,
    pub last_check: Option<HealthCycle>,
    pub recovery_attempts: u32,
    pub max_recovery_attempts: u32,
    pub escalated: bool,
    pub last_healthy: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct RecoveryState {
    attempts: u32,
    escalated: bool,
    last_healthy: Option<DateTime<Utc>>,
    history: VecDeque<HealthCycle>,
}

struct Inner {
    store: Store,
    worker: Arc<WorkerLoop>,
    notifier: Arc<dyn NotificationSink>,
    config: MonitorConfig,
    recovery_policy: BackoffPolicy,
    checks: RwLock<Vec<(String, Arc<dyn HealthCheckable>)>>,
    state: Mutex<RecoveryState>,
    cycle: tokio::sync::Mutex<()>,
}

pub struct HealthMonitor {
    inner: Arc<Inner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HealthMonitor {
    /// Monitor with the built-in checks. The connectivity check probes
    /// `config.connectivity_url` when set; the rate limit check reports
    /// "not configured" until [`with_rate_limiter`](Self::with_rate_limiter).
    pub fn new(
        store: Store,
        worker: Arc<WorkerLoop>,
        notifier: Arc<dyn NotificationSink>,
        config: MonitorConfig,
    ) -> Self {
        let probe = config
            .connectivity_url
            .as_deref()
            .map(|url| Arc::new(HttpProbe::new(url, PROBE_TIMEOUT)) as Arc<dyn ConnectivityProbe>);

        let checks: Vec<(String, Arc<dyn HealthCheckable>)> = vec![
            (
                "heartbeat".into(),
                Arc::new(HeartbeatCheck::new(store.clone(), config.heartbeat_timeout())),
            ),
            (
                "worker_status".into(),
                Arc::new(WorkerStatusCheck::new(store.clone(), worker.clone())),
            ),
            ("connectivity".into(), Arc::new(ConnectivityCheck::new(probe))),
            (
                "disk".into(),
                Arc::new(DiskCheck::new(config.disk_path.clone(), config.disk_min_free_percent)),
            ),
            (
                "rate_limits".into(),
                Arc::new(RateLimitCheck::new(None, config.saturation_percent)),
            ),
        ];

        let recovery_policy = BackoffPolicy::exponential(Duration::ZERO).with_max_attempts(config.max_recovery_attempts);

        Self {
            inner: Arc::new(Inner {
                store,
                worker,
                notifier,
                config,
                recovery_policy,
                checks: RwLock::new(checks),
                state: Mutex::new(RecoveryState::default()),
                cycle: tokio::sync::Mutex::new(()),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn with_rate_limiter(self, limiter: Arc<RateLimiter>) -> Self {
        let threshold = self.inner.config.saturation_percent;
        self.register_check("rate_limits", Arc::new(RateLimitCheck::new(Some(limiter), threshold)));
        self
    }

    pub fn with_connectivity_probe(self, probe: Arc<dyn ConnectivityProbe>) -> Self {
        self.register_check("connectivity", Arc::new(ConnectivityCheck::new(Some(probe))));
        self
    }

    /// Add a check, replacing any existing check with the same name.
    pub fn register_check(&self, name: impl Into<String>, check: Arc<dyn HealthCheckable>) {
        let name = name.into();
        let mut checks = self.inner.checks.write();
        match checks.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = check,
            None => checks.push((name, check)),
        }
    }

    pub fn check_names(&self) -> Vec<String> {
        self.inner.checks.read().iter().map(|(n, _)| n.clone()).collect()
    }

    /// Run one cycle now.
    pub async fn check_now(&self) -> Result<HealthCycle, MonitorError> {
        self.inner.run_cycle().await
    }

    pub fn get_health_status(&self) -> HealthStatus {
        let state = self.inner.state.lock();
        HealthStatus {
            monitoring: self.is_running(),
            last_check: state.history.back().cloned(),
            recovery_attempts: state.attempts,
            max_recovery_attempts: self.inner.config.max_recovery_attempts,
            escalated: state.escalated,
            last_healthy: state.last_healthy,
        }
    }

    /// Most recent cycles, oldest first.
    pub fn get_health_history(&self, limit: usize) -> Vec<HealthCycle> {
        let state = self.inner.state.lock();
        let skip = state.history.len().saturating_sub(limit);
        state.history.iter().skip(skip).cloned().collect()
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Start the periodic loop. The first cycle runs after one interval.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }

        let inner = self.inner.clone();
        let period = inner.config.check_interval();
        info!("Health monitor started (interval {}s)", period.as_secs());

        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = inner.run_cycle().await {
                    error!("Health check cycle failed: {}", e);
                }
            }
        }));
    }

    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
            info!("Health monitor stopped");
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

impl Inner {
    async fn run_cycle(&self) -> Result<HealthCycle, MonitorError> {
        let _cycle = self.cycle.lock().await;
        let now = self.store.now();

        let checks: Vec<_> = self.checks.read().clone();
        let mut results = Vec::with_capacity(checks.len());
        for (name, check) in checks {
            let mut result = check.check().await;
            result.name = name;
            result.timestamp = now;
            results.push(result);
        }

        let issues: Vec<String> = results
            .iter()
            .filter(|r| !r.healthy)
            .map(|r| format!("{}: {}", r.name, r.message))
            .collect();
        let healthy = issues.is_empty();

        let mut recovery = None;
        if healthy {
            debug!("Health check passed ({} checks)", results.len());
            let mut state = self.state.lock();
            state.attempts = 0;
            state.escalated = false;
            state.last_healthy = Some(now);
        } else {
            warn!("Health check failed: {}", issues.join("; "));
            self.notifier.notify_error("Health Check", &issues.join("\n"));

            let needs_recovery = results
                .iter()
                .any(|r| !r.healthy && RECOVERABLE_CHECKS.contains(&r.name.as_str()));
            if needs_recovery {
                recovery = Some(self.recover(&issues).await?);
            }
        }

        let cycle = HealthCycle {
            timestamp: now,
            healthy,
            checks: results,
            issues,
            recovery,
        };

        let mut state = self.state.lock();
        state.history.push_back(cycle.clone());
        while state.history.len() > self.config.history_limit.max(1) {
            state.history.pop_front();
        }
        Ok(cycle)
    }

    async fn recover(&self, issues: &[String]) -> Result<RecoveryAction, MonitorError> {
        let decision = {
            let state = self.state.lock();
            if state.escalated {
                return Ok(RecoveryAction::AwaitingOperator);
            }
            self.recovery_policy.decide(state.attempts)
        };

        match decision {
            RetryDecision::Retry { attempt, .. } => {
                let max = self.config.max_recovery_attempts;
                self.state.lock().attempts = attempt;
                info!("Attempting worker recovery ({}/{})", attempt, max);

                self.store
                    .log_event(
                        "recovery_attempted",
                        None,
                        &format!("Worker restart attempt {}/{}", attempt, max),
                        json!({ "attempt": attempt, "max": max, "issues": issues }),
                    )
                    .await?;

                if let Err(e) = self.worker.stop(self.config.recovery_stop_timeout()).await {
                    warn!("Worker stop during recovery failed: {}", e);
                }
                match self.worker.start().await {
                    Ok(()) => self
                        .notifier
                        .notify_status(&format!("Worker restarted by health monitor ({}/{})", attempt, max)),
                    Err(e) => error!("Worker restart failed: {}", e),
                }
                Ok(RecoveryAction::Restarted { attempt, max })
            }
            RetryDecision::Exhausted => {
                self.escalate(issues).await?;
                Ok(RecoveryAction::Escalated)
            }
        }
    }

    async fn escalate(&self, issues: &[String]) -> Result<(), MonitorError> {
        let attempts = self.state.lock().attempts;
        let message = format!(
            "Worker recovery failed after {} attempts; manual intervention required.\n{}",
            attempts,
            issues.join("\n")
        );
        error!("{}", message);

        self.store.set_worker_status(WorkerStatus::Error).await?;
        if let Err(e) = self.worker.stop(self.config.recovery_stop_timeout()).await {
            warn!("Worker stop during escalation failed: {}", e);
        }

        self.state.lock().escalated = true;
        self.notifier.notify_critical(&message);
        self.store
            .log_event(
                "worker_escalated",
                None,
                "Worker set to error after exhausting recovery",
                json!({ "attempts": attempts, "issues": issues }),
            )
            .await?;
        Ok(())
    }
}
