//! Timer-driven scheduler.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use taskhands_config::{QueueConfig, SchedulerConfig};
use taskhands_store::Store;
use taskhands_workqueue::{JobQueue, JobSource, NewJob, WorkerLoop};

use crate::error::SchedulerError;
use crate::repo::ScheduleRepo;
use crate::schedule::{Schedule, ScheduleUpdate, UpcomingRun};

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;

/// Events older than this are pruned by maintenance.
const EVENT_RETENTION_DAYS: u32 = 30;

/// Back-off for a timer whose schedule could not be read.
const TIMER_ERROR_SLEEP: Duration = Duration::from_secs(60);

/// What happened when a schedule fired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FireOutcome {
    /// A job was created.
    Enqueued {
        job_id: String,
        /// Items still missing from the daily goal.
        remaining: u64,
        /// When the auto-retry re-fire is planned, if any.
        retry_at: Option<DateTime<Utc>>,
    },
    /// The daily goal is already met; nothing was enqueued.
    QuotaMet { count: u64, goal: u64 },
    Disabled,
    NotFound,
}

/// Result of one maintenance pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceReport {
    pub jobs_removed: usize,
    pub stuck_reclaimed: usize,
    pub events_removed: usize,
}

struct Inner {
    repo: ScheduleRepo,
    queue: JobQueue,
    config: SchedulerConfig,
    retention_days: u32,
    stuck_timeout: Duration,
    running: AtomicBool,
    timers: Mutex<HashMap<String, JoinHandle<()>>>,
    /// Worker whose in-flight job the stuck sweep must not reclaim.
    worker: Mutex<Option<Arc<WorkerLoop>>>,
}

/// Recurring schedule runner.
pub struct Scheduler {
    inner: Arc<Inner>,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

fn retry_key(id: &str) -> String {
    format!("{}_retry", id)
}

fn until(now: DateTime<Utc>, at: DateTime<Utc>) -> Duration {
    (at - now).to_std().unwrap_or(Duration::ZERO)
}

impl Scheduler {
    pub fn new(queue: JobQueue, config: SchedulerConfig, queue_config: &QueueConfig) -> Self {
        let inner = Inner {
            repo: ScheduleRepo::new(queue.store().clone()),
            queue,
            config,
            retention_days: queue_config.retention_days,
            stuck_timeout: queue_config.stuck_timeout(),
            running: AtomicBool::new(false),
            timers: Mutex::new(HashMap::new()),
            worker: Mutex::new(None),
        };
        Self {
            inner: Arc::new(inner),
            maintenance: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Let maintenance know which worker is executing jobs in this process.
    ///
    /// While that worker is alive its running job is heartbeating and is left
    /// alone by the stuck-job sweep, however long it takes.
    pub fn attach_worker(&self, worker: Arc<WorkerLoop>) {
        *self.inner.worker.lock() = Some(worker);
    }

    /// Ids of the armed timers, sorted. Auto-retry one-shots end in `_retry`.
    pub fn timer_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.timers.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Insert configured seed schedules that are not stored yet.
    ///
    /// Existing rows are left alone so operator edits survive restarts.
    pub async fn seed(&self) -> Result<usize, SchedulerError> {
        let now = self.inner.now();
        let mut inserted = 0;

        for seed in &self.inner.config.schedules {
            let mut schedule = match Schedule::from_seed(seed) {
                Ok(s) => s,
                Err(e) => {
                    warn!("Skipping seed schedule: {}", e);
                    continue;
                }
            };
            schedule.created_at = now;
            if schedule.enabled {
                schedule.next_run = schedule.trigger.next_after(now, &self.inner.config.timezone);
            }
            if self.inner.repo.insert(&schedule).await? {
                debug!("Seeded schedule {}", schedule.id);
                inserted += 1;
            }
        }

        Ok(inserted)
    }

    /// Seed, arm a timer per enabled schedule and start maintenance.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        if self.is_running() {
            return Ok(());
        }

        let seeded = self.seed().await?;
        let schedules = self.inner.repo.list().await?;
        self.inner.running.store(true, Ordering::SeqCst);

        let mut armed = 0;
        for schedule in schedules.iter().filter(|s| s.enabled) {
            self.inner.arm(&schedule.id);
            armed += 1;
        }

        *self.maintenance.lock() = Some(self.spawn_maintenance());

        info!(seeded, armed, "Scheduler started");
        Ok(())
    }

    /// Cancel every timer. Persisted schedules are untouched.
    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);

        for (_, handle) in self.inner.timers.lock().drain() {
            handle.abort();
        }
        if let Some(handle) = self.maintenance.lock().take() {
            handle.abort();
        }

        info!("Scheduler stopped");
    }

    fn spawn_maintenance(&self) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.config.maintenance_interval();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                match inner.run_maintenance().await {
                    Ok(report) => debug!(?report, "Maintenance completed"),
                    Err(e) => error!("Maintenance failed: {}", e),
                }
            }
        })
    }

    /// Fire a schedule as its timer would.
    pub async fn fire(&self, id: &str) -> Result<FireOutcome, SchedulerError> {
        self.inner.fire(id, JobSource::Scheduled).await
    }

    /// Enqueue a manual job from a schedule, ignoring the daily goal.
    pub async fn run_now(&self, id: &str) -> Result<String, SchedulerError> {
        let schedule = self.get_schedule(id).await?;
        let job_id = self
            .inner
            .queue
            .create(self.inner.job_for(&schedule, JobSource::Manual))
            .await?;
        info!(schedule_id = %id, job_id = %job_id, "Schedule run manually");
        Ok(job_id)
    }

    pub async fn run_maintenance(&self) -> Result<MaintenanceReport, SchedulerError> {
        self.inner.run_maintenance().await
    }

    pub async fn get_schedules(&self) -> Result<Vec<Schedule>, SchedulerError> {
        self.inner.repo.list().await
    }

    pub async fn get_schedule(&self, id: &str) -> Result<Schedule, SchedulerError> {
        self.inner
            .repo
            .get(id)
            .await?
            .ok_or_else(|| SchedulerError::NotFound(id.to_string()))
    }

    /// Persist a new schedule and arm it when the scheduler is running.
    pub async fn add_schedule(&self, mut schedule: Schedule) -> Result<Schedule, SchedulerError> {
        schedule.trigger.validate(&schedule.id)?;

        let now = self.inner.now();
        schedule.created_at = now;
        schedule.next_run = if schedule.enabled {
            schedule.trigger.next_after(now, &self.inner.config.timezone)
        } else {
            None
        };

        if !self.inner.repo.insert(&schedule).await? {
            return Err(SchedulerError::AlreadyExists(schedule.id));
        }
        if self.is_running() && schedule.enabled {
            self.inner.arm(&schedule.id);
        }

        info!(schedule_id = %schedule.id, trigger = %schedule.trigger, "Schedule added");
        Ok(schedule)
    }

    /// Apply `update` and replace the schedule's timer.
    pub async fn update_schedule(&self, id: &str, update: ScheduleUpdate) -> Result<Schedule, SchedulerError> {
        let mut schedule = self.get_schedule(id).await?;
        update.apply(&mut schedule);
        schedule.trigger.validate(id)?;

        schedule.next_run = if schedule.enabled {
            schedule.trigger.next_after(self.inner.now(), &self.inner.config.timezone)
        } else {
            None
        };
        self.inner.repo.save(&schedule).await?;

        if self.is_running() {
            self.inner.disarm(id);
            if schedule.enabled {
                self.inner.arm(id);
            }
        }

        info!(schedule_id = %id, enabled = schedule.enabled, "Schedule updated");
        Ok(schedule)
    }

    pub async fn enable_schedule(&self, id: &str) -> Result<Schedule, SchedulerError> {
        self.update_schedule(id, ScheduleUpdate::enabled(true)).await
    }

    pub async fn disable_schedule(&self, id: &str) -> Result<Schedule, SchedulerError> {
        self.update_schedule(id, ScheduleUpdate::enabled(false)).await
    }

    /// Remove a schedule and its timers. Returns `false` if it did not exist.
    pub async fn delete_schedule(&self, id: &str) -> Result<bool, SchedulerError> {
        self.inner.disarm(id);
        self.inner.disarm(&retry_key(id));

        let removed = self.inner.repo.delete(id).await?;
        if removed {
            info!(schedule_id = %id, "Schedule deleted");
        }
        Ok(removed)
    }

    /// Enabled schedules due within `hours`, soonest first.
    pub async fn get_upcoming(&self, hours: u32) -> Result<Vec<UpcomingRun>, SchedulerError> {
        let now = self.inner.now();
        let horizon = now + chrono::Duration::hours(hours as i64);

        let mut upcoming: Vec<UpcomingRun> = self
            .inner
            .repo
            .list()
            .await?
            .into_iter()
            .filter(|s| s.enabled)
            .filter_map(|s| {
                let next_run = s.next_run.filter(|at| *at <= horizon)?;
                Some(UpcomingRun {
                    in_minutes: (next_run - now).num_minutes(),
                    id: s.id,
                    task_type: s.task_type,
                    description: s.description,
                    next_run,
                })
            })
            .collect();

        upcoming.sort_by(|a, b| a.next_run.cmp(&b.next_run).then_with(|| a.id.cmp(&b.id)));
        Ok(upcoming)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        for (_, handle) in self.inner.timers.lock().drain() {
            handle.abort();
        }
        if let Some(handle) = self.maintenance.lock().take() {
            handle.abort();
        }
    }
}

impl Inner {
    fn store(&self) -> &Store {
        self.queue.store()
    }

    fn now(&self) -> DateTime<Utc> {
        self.store().now()
    }

    fn job_for(&self, schedule: &Schedule, source: JobSource) -> NewJob {
        NewJob::new(&schedule.task_type)
            .with_params(schedule.params.clone())
            .with_priority(schedule.priority)
            .with_source(source)
            .with_schedule_id(&schedule.id)
    }

    /// Re-fire time for auto-retry, when the operating window is still open.
    /// `until_hour` is read in the schedule zone.
    fn auto_retry_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let retry = &self.config.auto_retry;
        if !retry.enabled {
            return None;
        }
        if self.config.timezone.hour_of(now) >= retry.until_hour {
            return None;
        }
        let interval = chrono::Duration::from_std(retry.interval()).ok()?;
        now.checked_add_signed(interval)
    }

    async fn fire(self: &Arc<Self>, id: &str, source: JobSource) -> Result<FireOutcome, SchedulerError> {
        let Some(schedule) = self.repo.get(id).await? else {
            warn!(schedule_id = %id, "Fired schedule no longer exists");
            return Ok(FireOutcome::NotFound);
        };
        if !schedule.enabled {
            debug!(schedule_id = %id, "Fired schedule is disabled");
            return Ok(FireOutcome::Disabled);
        }

        let goal = self.config.daily_goal_for(&schedule.task_type);
        let count = self.store().items_saved_today(&schedule.task_type).await?;
        if count >= goal {
            info!(
                schedule_id = %id,
                task_type = %schedule.task_type,
                "Schedule skipped: daily goal reached ({}/{})",
                count,
                goal
            );
            return Ok(FireOutcome::QuotaMet { count, goal });
        }
        let remaining = goal - count;

        let job_id = self.queue.create(self.job_for(&schedule, source)).await?;

        let now = self.now();
        let next_run = schedule.trigger.next_after(now, &self.config.timezone);
        self.repo.record_run(id, now, next_run).await?;
        self.store()
            .log_event(
                "schedule_triggered",
                Some(&schedule.task_type),
                &format!("Schedule {} triggered (job {})", id, job_id),
                serde_json::json!({
                    "schedule_id": id,
                    "job_id": job_id,
                    "count": count,
                    "goal": goal,
                }),
            )
            .await?;

        info!(
            schedule_id = %id,
            job_id = %job_id,
            "Schedule triggered: {}/{} today, {} remaining",
            count,
            goal,
            remaining
        );

        let retry_at = self.auto_retry_at(now);
        if let Some(at) = retry_at {
            if self.running.load(Ordering::SeqCst) {
                self.arm_retry(id, at);
            }
        }

        Ok(FireOutcome::Enqueued {
            job_id,
            remaining,
            retry_at,
        })
    }

    /// Next fire time of an enabled schedule, persisting it when recomputed.
    async fn next_fire(&self, id: &str) -> Result<Option<DateTime<Utc>>, SchedulerError> {
        let Some(schedule) = self.repo.get(id).await? else {
            return Ok(None);
        };
        if !schedule.enabled {
            return Ok(None);
        }

        let now = self.now();
        if let Some(next) = schedule.next_run.filter(|at| *at > now) {
            return Ok(Some(next));
        }

        let next = schedule.trigger.next_after(now, &self.config.timezone);
        self.repo.set_next_run(id, next).await?;
        Ok(next)
    }

    fn arm(self: &Arc<Self>, id: &str) {
        let handle = tokio::spawn(run_timer(Arc::downgrade(self), id.to_string()));
        if let Some(old) = self.timers.lock().insert(id.to_string(), handle) {
            old.abort();
        }
        debug!(schedule_id = %id, "Timer armed");
    }

    fn arm_retry(self: &Arc<Self>, id: &str, at: DateTime<Utc>) {
        let key = retry_key(id);
        let wait = until(self.now(), at);
        let weak = Arc::downgrade(self);
        let schedule_id = id.to_string();
        let task_key = key.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            let Some(inner) = weak.upgrade() else { return };
            inner.timers.lock().remove(&task_key);
            if let Err(e) = inner.fire(&schedule_id, JobSource::Retry).await {
                error!(schedule_id = %schedule_id, "Auto-retry fire failed: {}", e);
            }
        });

        if let Some(old) = self.timers.lock().insert(key, handle) {
            old.abort();
        }
        info!(schedule_id = %id, %at, "Auto-retry scheduled");
    }

    fn disarm(&self, key: &str) {
        if let Some(handle) = self.timers.lock().remove(key) {
            handle.abort();
            debug!(timer = %key, "Timer removed");
        }
    }

    async fn run_maintenance(&self) -> Result<MaintenanceReport, SchedulerError> {
        let jobs_removed = self.queue.cleanup_old(self.retention_days).await?;
        let live_owners: Vec<String> = self
            .worker
            .lock()
            .iter()
            .filter(|w| w.is_alive())
            .map(|w| w.worker_id().to_string())
            .collect();
        let stuck_reclaimed = self
            .queue
            .clear_stuck_except(self.stuck_timeout, &live_owners)
            .await?
            .len();
        let events_removed = self.store().cleanup_events(EVENT_RETENTION_DAYS).await?;

        let report = MaintenanceReport {
            jobs_removed,
            stuck_reclaimed,
            events_removed,
        };
        if stuck_reclaimed > 0 {
            warn!(?report, "Maintenance reclaimed stuck jobs");
        }
        Ok(report)
    }
}

async fn run_timer(inner: Weak<Inner>, id: String) {
    loop {
        let Some(this) = inner.upgrade() else { break };

        let next = match this.next_fire(&id).await {
            Ok(Some(next)) => next,
            Ok(None) => {
                debug!(schedule_id = %id, "No upcoming fire, timer exits");
                break;
            }
            Err(e) => {
                error!(schedule_id = %id, "Timer could not read schedule: {}", e);
                drop(this);
                tokio::time::sleep(TIMER_ERROR_SLEEP).await;
                continue;
            }
        };

        let wait = until(this.now(), next);
        drop(this);
        tokio::time::sleep(wait).await;

        let Some(this) = inner.upgrade() else { break };
        if this.now() < next {
            continue;
        }
        if let Err(e) = this.fire(&id, JobSource::Scheduled).await {
            error!(schedule_id = %id, "Schedule fire failed: {}", e);
        }
    }
}
