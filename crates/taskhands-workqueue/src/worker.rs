//! Single logical worker that drains the queue.
//!
//! The loop claims one job at a time, runs the executor registered for its
//! task type and records the outcome in the queue, run history and daily
//! counters. A heartbeat is written at most once per heartbeat interval,
//! including while an executor is running.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use taskhands_config::WorkerConfig;
use taskhands_protocols::{ExecutionStats, Executor, ExecutorError, JobPayload, NotificationSink};
use taskhands_store::{RunOutcome, Store, WorkerStatus};

use crate::callback::{CallbackClient, CallbackPayload};
use crate::error::QueueError;
use crate::executor::ExecutorRegistry;
use crate::job::{Job, JobResult, JobStatus};
use crate::queue::{FailOutcome, JobQueue};

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;

/// The job the worker is executing right now.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentJob {
    pub job_id: String,
    pub task_type: String,
    pub run_id: String,
    pub started_at: DateTime<Utc>,
}

/// Result of one loop iteration.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    /// Nothing eligible in the queue.
    Idle,
    /// Paused; the queue was not consulted.
    Paused,
    Completed { job_id: String, stats: ExecutionStats },
    Failed { job_id: String, outcome: FailOutcome },
    /// The job left `running` while the executor worked (reclaimed as stuck
    /// or cancelled). The run is recorded as abandoned and `status` is left
    /// as found.
    Superseded { job_id: String, status: JobStatus },
}

/// Point-in-time view of the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    pub worker_id: String,
    pub alive: bool,
    pub paused: bool,
    pub current_job: Option<CurrentJob>,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

struct WorkerShared {
    worker_id: String,
    queue: JobQueue,
    executors: Arc<ExecutorRegistry>,
    notifier: Arc<dyn NotificationSink>,
    callback: CallbackClient,
    config: WorkerConfig,
    paused: AtomicBool,
    current: RwLock<Option<CurrentJob>>,
    last_heartbeat: Mutex<Option<DateTime<Utc>>>,
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
}

struct LoopHandle {
    shutdown: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

/// Worker loop over a [`JobQueue`].
pub struct WorkerLoop {
    shared: Arc<WorkerShared>,
    handle: Mutex<Option<LoopHandle>>,
}

impl WorkerLoop {
    /// Create a stopped worker.
    pub fn new(
        queue: JobQueue,
        executors: Arc<ExecutorRegistry>,
        notifier: Arc<dyn NotificationSink>,
        config: WorkerConfig,
    ) -> Self {
        let shared = WorkerShared {
            worker_id: config.worker_id.clone(),
            callback: CallbackClient::new(config.callback_timeout()),
            queue,
            executors,
            notifier,
            config,
            paused: AtomicBool::new(false),
            current: RwLock::new(None),
            last_heartbeat: Mutex::new(None),
            jobs_completed: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
        };
        Self {
            shared: Arc::new(shared),
            handle: Mutex::new(None),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.shared.worker_id
    }

    fn store(&self) -> &Store {
        self.shared.queue.store()
    }

    /// Whether the loop task exists and has not exited.
    pub fn is_alive(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|h| !h.task.is_finished())
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::SeqCst)
    }

    /// Job currently executing, if any.
    pub fn current_job(&self) -> Option<CurrentJob> {
        self.shared.current.read().clone()
    }

    pub fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            worker_id: self.shared.worker_id.clone(),
            alive: self.is_alive(),
            paused: self.is_paused(),
            current_job: self.current_job(),
            jobs_completed: self.shared.jobs_completed.load(Ordering::SeqCst),
            jobs_failed: self.shared.jobs_failed.load(Ordering::SeqCst),
            last_heartbeat: *self.shared.last_heartbeat.lock(),
        }
    }

    /// Spawn the loop. Does nothing if it is already alive.
    pub async fn start(&self) -> Result<(), QueueError> {
        if self.is_alive() {
            debug!("Worker {} already running", self.shared.worker_id);
            return Ok(());
        }

        self.shared.paused.store(false, Ordering::SeqCst);
        self.store().set_worker_status(WorkerStatus::Running).await?;
        self.shared.beat().await?;

        let (shutdown, rx) = broadcast::channel(1);
        let task = tokio::spawn(run_loop(self.shared.clone(), rx));
        *self.handle.lock() = Some(LoopHandle { shutdown, task });

        info!(worker_id = %self.shared.worker_id, "Worker started");
        self.shared.notifier.notify_started();
        Ok(())
    }

    /// Signal the loop to exit and wait up to `timeout` for the in-flight job.
    ///
    /// After the timeout the loop is aborted and the job stays `running`
    /// until stuck-job reclamation picks it up. A persisted `error` status
    /// is left untouched.
    pub async fn stop(&self, timeout: Duration) -> Result<(), QueueError> {
        let handle = self.handle.lock().take();

        if let Some(LoopHandle { shutdown, mut task }) = handle {
            let _ = shutdown.send(());
            match tokio::time::timeout(timeout, &mut task).await {
                Ok(Ok(())) => info!(worker_id = %self.shared.worker_id, "Worker stopped"),
                Ok(Err(e)) => warn!(worker_id = %self.shared.worker_id, "Worker task ended abnormally: {}", e),
                Err(_) => {
                    warn!(
                        worker_id = %self.shared.worker_id,
                        job = ?self.current_job().map(|j| j.job_id),
                        "Worker did not stop within {:?}, abandoning in-flight job",
                        timeout
                    );
                    task.abort();
                    *self.shared.current.write() = None;
                }
            }
        }

        if self.store().worker_status().await? != WorkerStatus::Error {
            self.store().set_worker_status(WorkerStatus::Stopped).await?;
        }
        Ok(())
    }

    /// Stop dequeuing; heartbeats continue.
    pub async fn pause(&self) -> Result<(), QueueError> {
        self.shared.paused.store(true, Ordering::SeqCst);
        self.store().set_worker_status(WorkerStatus::Paused).await?;
        info!(worker_id = %self.shared.worker_id, "Worker paused");
        self.shared.notifier.notify_status("Worker paused");
        Ok(())
    }

    pub async fn resume(&self) -> Result<(), QueueError> {
        self.shared.paused.store(false, Ordering::SeqCst);
        let status = if self.is_alive() {
            WorkerStatus::Running
        } else {
            WorkerStatus::Stopped
        };
        self.store().set_worker_status(status).await?;
        info!(worker_id = %self.shared.worker_id, "Worker resumed");
        self.shared.notifier.notify_status("Worker resumed");
        Ok(())
    }

    /// Run a single loop iteration on the caller's task.
    pub async fn process_next(&self) -> Result<ProcessOutcome, QueueError> {
        self.shared.process_next().await
    }
}

async fn run_loop(shared: Arc<WorkerShared>, mut shutdown: broadcast::Receiver<()>) {
    loop {
        match shutdown.try_recv() {
            Err(TryRecvError::Empty) => {}
            _ => break,
        }

        let wait = match shared.process_next().await {
            Ok(
                ProcessOutcome::Completed { .. }
                | ProcessOutcome::Failed { .. }
                | ProcessOutcome::Superseded { .. },
            ) => None,
            Ok(ProcessOutcome::Idle | ProcessOutcome::Paused) => Some(shared.config.poll_interval()),
            Err(e) => {
                error!(worker_id = %shared.worker_id, "Worker loop error: {}", e);
                shared.record_loop_error(&e).await;
                Some(shared.config.error_sleep())
            }
        };

        if let Some(wait) = wait {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
    debug!(worker_id = %shared.worker_id, "Worker loop exited");
}

impl WorkerShared {
    async fn process_next(&self) -> Result<ProcessOutcome, QueueError> {
        self.beat_if_stale().await?;

        if self.paused.load(Ordering::SeqCst) {
            return Ok(ProcessOutcome::Paused);
        }

        let Some(job) = self.queue.claim_next(&self.worker_id).await? else {
            return Ok(ProcessOutcome::Idle);
        };

        let outcome = self.run_job(&job).await;
        *self.current.write() = None;
        outcome
    }

    async fn beat(&self) -> Result<(), QueueError> {
        let at = self.queue.store().touch_heartbeat(&self.worker_id).await?;
        *self.last_heartbeat.lock() = Some(at);
        Ok(())
    }

    async fn beat_if_stale(&self) -> Result<(), QueueError> {
        let interval = chrono::Duration::from_std(self.config.heartbeat_interval())
            .unwrap_or_else(|_| chrono::Duration::seconds(30));
        let now = self.queue.store().now();
        let stale = (*self.last_heartbeat.lock()).is_none_or(|last| now - last >= interval);
        if stale {
            self.beat().await?;
        }
        Ok(())
    }

    async fn run_job(&self, job: &Job) -> Result<ProcessOutcome, QueueError> {
        let store = self.queue.store();
        let now = store.now();
        let run_id = format!("{}_{}_{}", job.task_type, now.format("%Y%m%d_%H%M%S"), job.id);

        *self.current.write() = Some(CurrentJob {
            job_id: job.id.clone(),
            task_type: job.task_type.clone(),
            run_id: run_id.clone(),
            started_at: now,
        });
        info!(job_id = %job.id, task_type = %job.task_type, "Processing job");

        store.start_run(&run_id, &job.task_type, job.params.as_str()).await?;

        let started = tokio::time::Instant::now();
        let result = match self.executors.get(&job.task_type) {
            Some(executor) => self.execute_with_heartbeat(executor.as_ref(), &job.params).await,
            None => Err(ExecutorError::Failed(format!(
                "No executor registered for task type '{}'",
                job.task_type
            ))),
        };
        let duration = started.elapsed();

        match result {
            Ok(stats) => self.finish_success(job, &run_id, stats, duration).await,
            Err(e) => self.finish_failure(job, &run_id, &e.to_string(), duration).await,
        }
    }

    async fn execute_with_heartbeat(
        &self,
        executor: &dyn Executor,
        params: &JobPayload,
    ) -> Result<ExecutionStats, ExecutorError> {
        let mut ticker = tokio::time::interval(self.config.heartbeat_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        let execution = executor.execute(params);
        tokio::pin!(execution);

        loop {
            tokio::select! {
                result = &mut execution => return result,
                _ = ticker.tick() => {
                    if let Err(e) = self.beat().await {
                        warn!(worker_id = %self.worker_id, "Heartbeat failed during job: {}", e);
                    }
                }
            }
        }
    }

    async fn finish_success(
        &self,
        job: &Job,
        run_id: &str,
        stats: ExecutionStats,
        duration: Duration,
    ) -> Result<ProcessOutcome, QueueError> {
        let result = serde_json::to_value(JobResult {
            stats,
            duration_secs: duration.as_secs_f64(),
        })?;

        match self.queue.mark_completed(&job.id, result.clone()).await {
            Ok(()) => {}
            Err(QueueError::InvalidTransition { status, .. }) => {
                return self.abandon(job, run_id, stats, status, duration).await;
            }
            Err(e) => return Err(e),
        }
        self.queue
            .store()
            .end_run(run_id, RunOutcome::completed(stats, duration))
            .await?;
        self.jobs_completed.fetch_add(1, Ordering::SeqCst);

        info!(
            job_id = %job.id,
            task_type = %job.task_type,
            items_saved = stats.items_saved,
            duration_secs = duration.as_secs_f64(),
            "Job finished"
        );

        if let Some(url) = &job.metadata.callback_url {
            let payload = CallbackPayload {
                job_id: &job.id,
                status: JobStatus::Completed.as_str(),
                result: &result,
                timestamp: self.queue.store().now(),
            };
            if let Err(e) = self.callback.send(url, &payload).await {
                warn!(job_id = %job.id, "Callback failed: {}", e);
            }
        }

        if stats.items_saved > 0 {
            self.notifier.notify_completed(&job.task_type, stats, duration);
        }

        Ok(ProcessOutcome::Completed {
            job_id: job.id.clone(),
            stats,
        })
    }

    async fn finish_failure(
        &self,
        job: &Job,
        run_id: &str,
        message: &str,
        duration: Duration,
    ) -> Result<ProcessOutcome, QueueError> {
        error!(job_id = %job.id, task_type = %job.task_type, "Job failed: {}", message);

        let outcome = match self.queue.mark_failed(&job.id, message, true).await {
            Ok(outcome) => outcome,
            Err(QueueError::InvalidTransition { status, .. }) => {
                return self
                    .abandon(job, run_id, ExecutionStats::default(), status, duration)
                    .await;
            }
            Err(e) => return Err(e),
        };
        self.queue
            .store()
            .end_run(run_id, RunOutcome::failed(message, duration))
            .await?;
        self.jobs_failed.fetch_add(1, Ordering::SeqCst);

        self.notifier.notify_error(&job.task_type, message);

        Ok(ProcessOutcome::Failed {
            job_id: job.id.clone(),
            outcome,
        })
    }

    /// Close the run of a job that is no longer ours. Counters, callback and
    /// notifications are skipped; whoever moved the job owns its outcome.
    async fn abandon(
        &self,
        job: &Job,
        run_id: &str,
        stats: ExecutionStats,
        status: JobStatus,
        duration: Duration,
    ) -> Result<ProcessOutcome, QueueError> {
        warn!(
            job_id = %job.id,
            %status,
            "Job changed state while running; discarding this run's outcome"
        );
        self.queue
            .store()
            .end_run(
                run_id,
                RunOutcome::abandoned(stats, format!("job was {} when the run ended", status), duration),
            )
            .await?;

        Ok(ProcessOutcome::Superseded {
            job_id: job.id.clone(),
            status,
        })
    }

    async fn record_loop_error(&self, e: &QueueError) {
        self.notifier.notify_error("Worker", &e.to_string());
        let logged = self
            .queue
            .store()
            .log_event(
                "worker_error",
                None,
                &e.to_string(),
                serde_json::json!({ "worker_id": self.worker_id }),
            )
            .await;
        if let Err(log_err) = logged {
            warn!("Failed to record worker error event: {}", log_err);
        }
    }
}
