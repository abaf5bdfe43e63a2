//! Durable priority queue over the `jobs` table.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row, Transaction};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use taskhands_config::QueueConfig;
use taskhands_protocols::{BackoffPolicy, JobPayload, RetryDecision};
use taskhands_store::{format_ts, parse_opt_ts, parse_ts, Store, StoreError};

use crate::error::QueueError;
use crate::job::{Job, JobMetadata, JobPriority, JobSource, JobStatus, NewJob};

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;

const JOB_COLUMNS: &str = "id, task_type, params, priority, status, source, created_at, started_at, \
     completed_at, retry_count, max_retries, last_error, result, scheduled_for, metadata, claimed_by";

/// Error recorded on jobs reclaimed by [`JobQueue::clear_stuck`].
pub const STUCK_ERROR: &str = "stuck/timeout";

/// What `mark_failed` did with a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FailOutcome {
    /// Rescheduled after a backoff.
    Retrying { retry_count: u32, retry_at: DateTime<Utc> },
    /// Terminal failure.
    Failed,
}

/// Queue counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub by_status: HashMap<String, u64>,
    pub total: u64,
    pub completed_today: u64,
    pub failed_today: u64,
}

impl QueueStats {
    pub fn count(&self, status: JobStatus) -> u64 {
        self.by_status.get(status.as_str()).copied().unwrap_or(0)
    }
}

/// Raw column values, decoded outside the connection thread.
struct JobRow {
    id: String,
    task_type: String,
    params: String,
    priority: i64,
    status: String,
    source: String,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    retry_count: i64,
    max_retries: i64,
    last_error: Option<String>,
    result: Option<String>,
    scheduled_for: Option<String>,
    metadata: String,
    claimed_by: Option<String>,
}

impl JobRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            task_type: row.get(1)?,
            params: row.get(2)?,
            priority: row.get(3)?,
            status: row.get(4)?,
            source: row.get(5)?,
            created_at: row.get(6)?,
            started_at: row.get(7)?,
            completed_at: row.get(8)?,
            retry_count: row.get(9)?,
            max_retries: row.get(10)?,
            last_error: row.get(11)?,
            result: row.get(12)?,
            scheduled_for: row.get(13)?,
            metadata: row.get(14)?,
            claimed_by: row.get(15)?,
        })
    }

    fn into_job(self) -> Result<Job, QueueError> {
        let corrupt = |what: &str, raw: &str| {
            QueueError::Store(StoreError::Corrupt(format!("job {}: bad {} '{}'", self.id, what, raw)))
        };

        let priority = JobPriority::from_i64(self.priority)
            .ok_or_else(|| corrupt("priority", &self.priority.to_string()))?;
        let status = JobStatus::parse(&self.status).ok_or_else(|| corrupt("status", &self.status))?;
        let source = JobSource::parse(&self.source).ok_or_else(|| corrupt("source", &self.source))?;
        let metadata: JobMetadata = serde_json::from_str(&self.metadata)?;
        let result = self
            .result
            .as_deref()
            .map(serde_json::from_str::<serde_json::Value>)
            .transpose()?;

        Ok(Job {
            priority,
            status,
            source,
            metadata,
            result,
            created_at: parse_ts(&self.created_at)?,
            started_at: parse_opt_ts(self.started_at)?,
            completed_at: parse_opt_ts(self.completed_at)?,
            scheduled_for: parse_opt_ts(self.scheduled_for)?,
            retry_count: self.retry_count.max(0) as u32,
            max_retries: self.max_retries.max(0) as u32,
            params: JobPayload::new(self.params),
            last_error: self.last_error,
            claimed_by: self.claimed_by,
            task_type: self.task_type,
            id: self.id,
        })
    }
}

/// Why a transactional update did not apply.
enum Rejected {
    NotFound,
    Status(String),
}

impl Rejected {
    fn into_error(self, id: &str) -> QueueError {
        match self {
            Rejected::NotFound => QueueError::JobNotFound(id.to_string()),
            Rejected::Status(raw) => match JobStatus::parse(&raw) {
                Some(status) => QueueError::InvalidTransition { id: id.to_string(), status },
                None => QueueError::Store(StoreError::Corrupt(format!("job {}: bad status '{}'", id, raw))),
            },
        }
    }
}

/// Apply the retry-or-fail policy to one job inside an open transaction.
fn fail_in_tx(
    tx: &Transaction<'_>,
    id: &str,
    error: &str,
    retry: bool,
    now: DateTime<Utc>,
    policy: BackoffPolicy,
) -> rusqlite::Result<Result<FailOutcome, Rejected>> {
    let row = tx
        .query_row(
            "SELECT status, retry_count, max_retries FROM jobs WHERE id = ?1",
            [id],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?)),
        )
        .optional()?;

    let Some((status, retry_count, max_retries)) = row else {
        return Ok(Err(Rejected::NotFound));
    };
    if status != JobStatus::Running.as_str() {
        return Ok(Err(Rejected::Status(status)));
    }

    let retry_count = retry_count.max(0) as u32;
    let decision = if retry {
        policy.with_max_attempts(max_retries.max(0) as u32).decide(retry_count)
    } else {
        RetryDecision::Exhausted
    };
    let stamp = format_ts(now);

    match decision {
        RetryDecision::Retry { attempt, delay } => {
            let retry_at = now + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::days(1));
            tx.execute(
                "UPDATE jobs SET status = 'retry_pending', retry_count = ?1, last_error = ?2,
                 scheduled_for = ?3, started_at = NULL, claimed_by = NULL WHERE id = ?4",
                params![attempt, error, format_ts(retry_at), id],
            )?;
            Ok(Ok(FailOutcome::Retrying { retry_count: attempt, retry_at }))
        }
        RetryDecision::Exhausted => {
            tx.execute(
                "UPDATE jobs SET status = 'failed', last_error = ?1, completed_at = ?2 WHERE id = ?3",
                params![error, stamp, id],
            )?;
            Ok(Ok(FailOutcome::Failed))
        }
    }
}

/// Job queue backed by the durable store.
#[derive(Clone)]
pub struct JobQueue {
    store: Store,
    policy: BackoffPolicy,
    default_max_retries: u32,
}

impl JobQueue {
    /// Create a queue over `store`.
    pub fn new(store: Store, config: &QueueConfig) -> Self {
        Self {
            store,
            policy: BackoffPolicy::exponential(config.retry_base()).with_max_delay(config.retry_max_delay()),
            default_max_retries: config.default_max_retries,
        }
    }

    /// Store backing the queue.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Retry policy applied by `mark_failed`.
    pub fn policy(&self) -> BackoffPolicy {
        self.policy
    }

    /// Insert a pending job and return its id.
    pub async fn create(&self, job: NewJob) -> Result<String, QueueError> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let now = format_ts(self.store.now());
        let metadata = serde_json::to_string(&job.metadata)?;
        let max_retries = job.max_retries.unwrap_or(self.default_max_retries);
        let scheduled_for = job.scheduled_for.map(format_ts);
        let task_type = job.task_type.clone();

        let id_clone = id.clone();
        self.store
            .connection()
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO jobs (id, task_type, params, priority, status, source, created_at,
                     retry_count, max_retries, scheduled_for, metadata)
                     VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?6, 0, ?7, ?8, ?9)",
                    params![
                        id_clone,
                        job.task_type,
                        job.params.as_str(),
                        job.priority.as_i64(),
                        job.source.as_str(),
                        now,
                        max_retries,
                        scheduled_for,
                        metadata
                    ],
                )?;
                Ok(())
            })
            .await?;

        info!(job_id = %id, task_type = %task_type, "Job created");
        Ok(id)
    }

    /// Fetch a job by id.
    pub async fn get(&self, id: &str) -> Result<Option<Job>, QueueError> {
        let id = id.to_string();
        let sql = format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS);
        let row = self
            .store
            .connection()
            .call(move |conn| Ok(conn.query_row(&sql, [&id], JobRow::read).optional()?))
            .await?;
        row.map(JobRow::into_job).transpose()
    }

    /// Best-ranked eligible job, without claiming it.
    pub async fn next(&self) -> Result<Option<Job>, QueueError> {
        let now = format_ts(self.store.now());
        let sql = next_sql();
        let row = self
            .store
            .connection()
            .call(move |conn| Ok(conn.query_row(&sql, [&now], JobRow::read).optional()?))
            .await?;
        row.map(JobRow::into_job).transpose()
    }

    /// Claim a job for `worker_id`.
    ///
    /// Returns `false` when the job is no longer claimable.
    pub async fn mark_running(&self, id: &str, worker_id: &str) -> Result<bool, QueueError> {
        let id = id.to_string();
        let worker_id = worker_id.to_string();
        let now = format_ts(self.store.now());
        let updated = self
            .store
            .connection()
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE jobs SET status = 'running', started_at = ?1, completed_at = NULL, claimed_by = ?2
                     WHERE id = ?3 AND status IN ('pending', 'retry_pending')",
                    params![now, worker_id, id],
                )?)
            })
            .await?;
        Ok(updated == 1)
    }

    /// Select and claim the next eligible job in one transaction.
    pub async fn claim_next(&self, worker_id: &str) -> Result<Option<Job>, QueueError> {
        let now = format_ts(self.store.now());
        let worker_id = worker_id.to_string();
        let sql = next_sql();
        let claimed = self
            .store
            .connection()
            .call(move |conn| {
                let tx = conn.transaction()?;
                let id: Option<String> = tx
                    .query_row(&sql, [&now], |row| row.get(0))
                    .optional()?;

                if let Some(id) = &id {
                    tx.execute(
                        "UPDATE jobs SET status = 'running', started_at = ?1, completed_at = NULL, claimed_by = ?2
                         WHERE id = ?3",
                        params![now, worker_id, id],
                    )?;
                }

                tx.commit()?;
                Ok(id)
            })
            .await?;

        match claimed {
            Some(id) => {
                debug!(job_id = %id, "Job claimed");
                self.get(&id).await
            }
            None => Ok(None),
        }
    }

    /// Record a successful run.
    pub async fn mark_completed(&self, id: &str, result: serde_json::Value) -> Result<(), QueueError> {
        let id_owned = id.to_string();
        let now = format_ts(self.store.now());
        let result = serde_json::to_string(&result)?;
        let outcome = self
            .store
            .connection()
            .call(move |conn| {
                let tx = conn.transaction()?;
                let status: Option<String> = tx
                    .query_row("SELECT status FROM jobs WHERE id = ?1", [&id_owned], |row| row.get(0))
                    .optional()?;

                let outcome = match status {
                    None => Err(Rejected::NotFound),
                    Some(s) if s != JobStatus::Running.as_str() => Err(Rejected::Status(s)),
                    Some(_) => {
                        tx.execute(
                            "UPDATE jobs SET status = 'completed', completed_at = ?1, result = ?2 WHERE id = ?3",
                            params![now, result, id_owned],
                        )?;
                        Ok(())
                    }
                };

                tx.commit()?;
                Ok(outcome)
            })
            .await?;

        outcome.map_err(|r| r.into_error(id))?;
        info!(job_id = %id, "Job completed");
        Ok(())
    }

    /// Record a failure of a running job and apply the retry policy.
    ///
    /// With `retry` and budget left the job becomes `retry_pending` with an
    /// exponential delay; otherwise it becomes terminal `failed`.
    pub async fn mark_failed(&self, id: &str, error: &str, retry: bool) -> Result<FailOutcome, QueueError> {
        let id_owned = id.to_string();
        let error = error.to_string();
        let now = self.store.now();
        let policy = self.policy;
        let outcome = self
            .store
            .connection()
            .call(move |conn| {
                let tx = conn.transaction()?;
                let outcome = fail_in_tx(&tx, &id_owned, &error, retry, now, policy)?;
                tx.commit()?;
                Ok(outcome)
            })
            .await?;

        let outcome = outcome.map_err(|r| r.into_error(id))?;
        match outcome {
            FailOutcome::Retrying { retry_count, retry_at } => {
                warn!(job_id = %id, retry_count, %retry_at, "Job failed, retry scheduled")
            }
            FailOutcome::Failed => warn!(job_id = %id, "Job failed permanently"),
        }
        Ok(outcome)
    }

    /// Cancel a job that has not started.
    pub async fn cancel(&self, id: &str) -> Result<bool, QueueError> {
        let id_owned = id.to_string();
        let now = format_ts(self.store.now());
        let updated = self
            .store
            .connection()
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE jobs SET status = 'cancelled', completed_at = ?1
                     WHERE id = ?2 AND status IN ('pending', 'retry_pending')",
                    params![now, id_owned],
                )?)
            })
            .await?;

        if updated == 1 {
            info!(job_id = %id, "Job cancelled");
        }
        Ok(updated == 1)
    }

    /// Reclaim jobs running longer than `timeout`.
    pub async fn clear_stuck(&self, timeout: Duration) -> Result<Vec<(String, FailOutcome)>, QueueError> {
        self.clear_stuck_except(timeout, &[]).await
    }

    /// Reclaim timed-out running jobs, sparing those claimed by `live_owners`.
    pub async fn clear_stuck_except(
        &self,
        timeout: Duration,
        live_owners: &[String],
    ) -> Result<Vec<(String, FailOutcome)>, QueueError> {
        let now = self.store.now();
        let cutoff = format_ts(now - chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::zero()));
        let live_owners = live_owners.to_vec();
        let policy = self.policy;

        let reclaimed = self
            .store
            .connection()
            .call(move |conn| {
                let tx = conn.transaction()?;
                let stuck: Vec<(String, Option<String>)> = {
                    let mut stmt = tx.prepare(
                        "SELECT id, claimed_by FROM jobs WHERE status = 'running' AND started_at < ?1",
                    )?;
                    let rows = stmt
                        .query_map([&cutoff], |row| Ok((row.get(0)?, row.get(1)?)))?
                        .collect::<Result<Vec<_>, _>>()?;
                    rows
                };

                let mut reclaimed = Vec::new();
                for (id, owner) in stuck {
                    if owner.as_ref().is_some_and(|o| live_owners.contains(o)) {
                        continue;
                    }
                    if let Ok(outcome) = fail_in_tx(&tx, &id, STUCK_ERROR, true, now, policy)? {
                        reclaimed.push((id, outcome));
                    }
                }

                tx.commit()?;
                Ok(reclaimed)
            })
            .await?;

        for (id, outcome) in &reclaimed {
            warn!(job_id = %id, ?outcome, "Reclaimed stuck job");
        }
        Ok(reclaimed)
    }

    /// Delete terminal jobs completed more than `days` ago.
    pub async fn cleanup_old(&self, days: u32) -> Result<usize, QueueError> {
        let cutoff = format_ts(self.store.now() - chrono::Duration::days(days as i64));
        let removed = self
            .store
            .connection()
            .call(move |conn| {
                Ok(conn.execute(
                    "DELETE FROM jobs WHERE status IN ('completed', 'failed', 'cancelled')
                     AND completed_at IS NOT NULL AND completed_at < ?1",
                    [&cutoff],
                )?)
            })
            .await?;

        if removed > 0 {
            info!("Cleaned up {} old jobs", removed);
        }
        Ok(removed)
    }

    /// Counts by status plus today's outcomes.
    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        let day_start = self
            .store
            .today()
            .and_hms_opt(0, 0, 0)
            .map(|d| format_ts(d.and_utc()))
            .unwrap_or_default();

        let (rows, completed_today, failed_today) = self
            .store
            .connection()
            .call(move |conn| {
                let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status")?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
                    .collect::<Result<Vec<_>, _>>()?;

                let count_since = |status: &str| -> rusqlite::Result<i64> {
                    conn.query_row(
                        "SELECT COUNT(*) FROM jobs WHERE status = ?1 AND completed_at >= ?2",
                        params![status, day_start],
                        |row| row.get(0),
                    )
                };
                let completed = count_since("completed")?;
                let failed = count_since("failed")?;
                Ok((rows, completed, failed))
            })
            .await?;

        let mut stats = QueueStats {
            completed_today: completed_today.max(0) as u64,
            failed_today: failed_today.max(0) as u64,
            ..Default::default()
        };
        for (status, count) in rows {
            let count = count.max(0) as u64;
            stats.total += count;
            stats.by_status.insert(status, count);
        }
        Ok(stats)
    }

    /// Most recently created jobs, newest first.
    pub async fn history(&self, limit: usize) -> Result<Vec<Job>, QueueError> {
        let sql = format!(
            "SELECT {} FROM jobs ORDER BY created_at DESC, rowid DESC LIMIT ?1",
            JOB_COLUMNS
        );
        self.query_jobs(sql, vec![rusqlite::types::Value::Integer(limit as i64)]).await
    }

    /// Waiting jobs in claim order, optionally for one task type.
    pub async fn pending(&self, task_type: Option<&str>) -> Result<Vec<Job>, QueueError> {
        let sql = format!(
            "SELECT {} FROM jobs WHERE status IN ('pending', 'retry_pending')
             AND (?1 IS NULL OR task_type = ?1)
             ORDER BY priority ASC, created_at ASC, rowid ASC",
            JOB_COLUMNS
        );
        let filter = match task_type {
            Some(t) => rusqlite::types::Value::Text(t.to_string()),
            None => rusqlite::types::Value::Null,
        };
        self.query_jobs(sql, vec![filter]).await
    }

    /// Jobs currently marked running.
    pub async fn running(&self) -> Result<Vec<Job>, QueueError> {
        let sql = format!(
            "SELECT {} FROM jobs WHERE status = 'running' ORDER BY started_at ASC",
            JOB_COLUMNS
        );
        self.query_jobs(sql, Vec::new()).await
    }

    async fn query_jobs(&self, sql: String, args: Vec<rusqlite::types::Value>) -> Result<Vec<Job>, QueueError> {
        let rows = self
            .store
            .connection()
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(rusqlite::params_from_iter(args), JobRow::read)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        rows.into_iter().map(JobRow::into_job).collect()
    }
}

fn next_sql() -> String {
    format!(
        "SELECT {} FROM jobs
         WHERE status IN ('pending', 'retry_pending')
           AND (scheduled_for IS NULL OR scheduled_for <= ?1)
         ORDER BY priority ASC, created_at ASC, rowid ASC
         LIMIT 1",
        JOB_COLUMNS
    )
}
