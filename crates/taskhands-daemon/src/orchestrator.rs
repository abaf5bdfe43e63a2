//! Composition root.
//!
//! The orchestrator builds every component from [`Config`], owns them for the
//! life of the process and is the only place that knows their start and stop
//! ordering. There are no globals: the binary constructs one and passes it
//! around.

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use taskhands_config::{Config, ConfigLoader};
use taskhands_monitor::{ChannelNotifier, HealthMonitor, HealthStatus};
use taskhands_protocols::{NotificationSink, SystemTimeProvider, TimeProvider};
use taskhands_ratelimit::{RateLimitStatus, RateLimiter};
use taskhands_scheduler::{Schedule, ScheduleUpdate, Scheduler, UpcomingRun};
use taskhands_store::{DailyStats, Store, WorkerStatus};
use taskhands_workqueue::{ExecutorRegistry, Job, JobQueue, NewJob, QueueStats, WorkerLoop, WorkerSnapshot};

use crate::error::DaemonError;
use crate::signal::SignalHandler;

/// Horizon of the upcoming-runs list in [`EngineStatus`].
const STATUS_UPCOMING_HOURS: u32 = 24;

/// Aggregated view of every component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStatus {
    pub running: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub uptime_secs: Option<i64>,
    pub worker: WorkerSnapshot,
    /// Status as persisted in the store.
    pub worker_status: WorkerStatus,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub queue: QueueStats,
    pub today: DailyStats,
    pub scheduler_running: bool,
    pub upcoming: Vec<UpcomingRun>,
    pub health: HealthStatus,
    pub rate_limits: BTreeMap<String, RateLimitStatus>,
}

pub struct Orchestrator {
    config: Config,
    store: Store,
    queue: JobQueue,
    executors: Arc<ExecutorRegistry>,
    limiter: Arc<RateLimiter>,
    notifier: Arc<dyn NotificationSink>,
    alerts: Option<Arc<ChannelNotifier>>,
    worker: Arc<WorkerLoop>,
    scheduler: Scheduler,
    monitor: HealthMonitor,
    signals: SignalHandler,
    started_at: Mutex<Option<DateTime<Utc>>>,
}

impl Orchestrator {
    /// Open the store, rate limiter and alert channels named in `config`.
    pub async fn from_config(config: Config, executors: Arc<ExecutorRegistry>) -> Result<Self, DaemonError> {
        let clock: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
        let store = Store::open(ConfigLoader::expand_path(&config.store.path), clock.clone()).await?;

        let mut limiter = RateLimiter::with_defaults(&config.rate_limits, clock);
        if let Some(ref path) = config.rate_limiter.persist_path {
            limiter = limiter.with_persistence(ConfigLoader::expand_path(path))?;
        }

        let alerts = Arc::new(ChannelNotifier::from_config(&config.alerts));
        let mut orchestrator = Self::build(config, store, executors, Arc::new(limiter), alerts.clone());
        orchestrator.alerts = Some(alerts);
        Ok(orchestrator)
    }

    /// Wire components around an already opened store.
    pub fn build(
        config: Config,
        store: Store,
        executors: Arc<ExecutorRegistry>,
        limiter: Arc<RateLimiter>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        let queue = JobQueue::new(store.clone(), &config.queue);
        let worker = Arc::new(WorkerLoop::new(
            queue.clone(),
            executors.clone(),
            notifier.clone(),
            config.worker.clone(),
        ));
        let scheduler = Scheduler::new(queue.clone(), config.scheduler.clone(), &config.queue);
        scheduler.attach_worker(worker.clone());
        let monitor = HealthMonitor::new(store.clone(), worker.clone(), notifier.clone(), config.monitor.clone())
            .with_rate_limiter(limiter.clone());

        Self {
            config,
            store,
            queue,
            executors,
            limiter,
            notifier,
            alerts: None,
            worker,
            scheduler,
            monitor,
            signals: SignalHandler::new(),
            started_at: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn executors(&self) -> &Arc<ExecutorRegistry> {
        &self.executors
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn worker(&self) -> &Arc<WorkerLoop> {
        &self.worker
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn monitor(&self) -> &HealthMonitor {
        &self.monitor
    }

    pub fn signals(&self) -> &SignalHandler {
        &self.signals
    }

    pub fn is_running(&self) -> bool {
        self.started_at.lock().is_some()
    }

    /// Start worker, scheduler, then monitor.
    pub async fn start(&self) -> Result<(), DaemonError> {
        if self.is_running() {
            return Ok(());
        }
        info!(
            worker_id = self.worker.worker_id(),
            executors = ?self.executors.task_types(),
            "Starting engine"
        );

        self.worker.start().await?;
        if self.config.scheduler.enabled {
            self.scheduler.start().await?;
        } else {
            info!("Scheduler disabled by configuration");
        }
        self.monitor.start();

        let now = self.store.now();
        *self.started_at.lock() = Some(now);
        self.store
            .log_event(
                "orchestrator_started",
                None,
                "Engine started",
                json!({
                    "worker_id": self.worker.worker_id(),
                    "scheduler": self.config.scheduler.enabled,
                    "executors": self.executors.task_types(),
                }),
            )
            .await?;
        info!("Engine started");
        Ok(())
    }

    /// Stop monitor, scheduler, then worker.
    pub async fn stop(&self) -> Result<(), DaemonError> {
        let Some(started_at) = self.started_at.lock().take() else {
            return Ok(());
        };
        info!("Stopping engine");

        self.monitor.stop();
        self.scheduler.stop();
        self.worker.stop(self.config.worker.stop_timeout()).await?;

        let uptime = (self.store.now() - started_at).num_seconds();
        self.store
            .log_event(
                "orchestrator_stopped",
                None,
                "Engine stopped",
                json!({ "uptime_secs": uptime }),
            )
            .await?;
        self.notifier.notify_status("Engine stopped");
        info!(uptime_secs = uptime, "Engine stopped");
        Ok(())
    }

    /// Pause job processing. Schedules keep firing so quotas stay accurate.
    pub async fn pause(&self) -> Result<(), DaemonError> {
        self.worker.pause().await?;
        Ok(())
    }

    pub async fn resume(&self) -> Result<(), DaemonError> {
        self.worker.resume().await?;
        Ok(())
    }

    pub async fn status(&self) -> Result<EngineStatus, DaemonError> {
        let started_at = *self.started_at.lock();
        let now = self.store.now();

        Ok(EngineStatus {
            running: started_at.is_some(),
            started_at,
            uptime_secs: started_at.map(|t| (now - t).num_seconds()),
            worker: self.worker.snapshot(),
            worker_status: self.store.worker_status().await?,
            last_heartbeat: self.store.last_heartbeat().await?,
            queue: self.queue.stats().await?,
            today: self.store.stats_today().await?,
            scheduler_running: self.scheduler.is_running(),
            upcoming: self.scheduler.get_upcoming(STATUS_UPCOMING_HOURS).await?,
            health: self.monitor.get_health_status(),
            rate_limits: self.limiter.all_status(),
        })
    }

    /// Enqueue a job outside any schedule.
    pub async fn add_job(&self, job: NewJob) -> Result<String, DaemonError> {
        let task_type = job.task_type.clone();
        let id = self.queue.create(job).await?;
        info!(job_id = %id, task_type = %task_type, "Job added");
        Ok(id)
    }

    pub async fn cancel_job(&self, id: &str) -> Result<bool, DaemonError> {
        Ok(self.queue.cancel(id).await?)
    }

    pub async fn get_job(&self, id: &str) -> Result<Option<Job>, DaemonError> {
        Ok(self.queue.get(id).await?)
    }

    /// Most recently created jobs first.
    pub async fn get_job_history(&self, limit: usize) -> Result<Vec<Job>, DaemonError> {
        Ok(self.queue.history(limit).await?)
    }

    pub async fn get_schedules(&self) -> Result<Vec<Schedule>, DaemonError> {
        Ok(self.scheduler.get_schedules().await?)
    }

    pub async fn update_schedule(&self, id: &str, update: ScheduleUpdate) -> Result<Schedule, DaemonError> {
        Ok(self.scheduler.update_schedule(id, update).await?)
    }

    pub async fn run_schedule_now(&self, id: &str) -> Result<String, DaemonError> {
        Ok(self.scheduler.run_now(id).await?)
    }

    /// Start, block until SIGTERM/SIGINT (or [`SignalHandler::request_shutdown`]),
    /// then stop and drain pending alerts.
    pub async fn run_until_signal(&self) -> Result<(), DaemonError> {
        self.signals.install_os_signals()?;
        self.start().await?;

        info!("Engine running; waiting for shutdown signal");
        self.signals.wait().await;

        let stopped = self.stop().await;
        if let Some(ref alerts) = self.alerts {
            alerts.close().await;
        }
        stopped
    }
}
