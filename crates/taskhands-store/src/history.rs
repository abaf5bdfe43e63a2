//! Daily counters, run history and the event log.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use tracing::debug;

use taskhands_protocols::ExecutionStats;

use crate::codec::{format_ts, parse_opt_ts, parse_ts};
use crate::error::StoreError;
use crate::store::Store;

/// Counter incremented by the items each run saved.
pub const COUNTER_ITEMS_SAVED: &str = "items_saved";
/// Counter incremented once per finished run.
pub const COUNTER_RUNS: &str = "runs";

/// Final state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    /// The job was taken from this run before it finished, e.g. reclaimed as
    /// stuck. Its results do not count.
    Abandoned,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Abandoned => "abandoned",
        }
    }

    fn parse(raw: &str) -> Result<Self, StoreError> {
        match raw {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "abandoned" => Ok(RunStatus::Abandoned),
            other => Err(StoreError::Corrupt(format!("unknown run status '{}'", other))),
        }
    }
}

/// What a run produced.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub stats: ExecutionStats,
    pub duration: Duration,
    pub errors: Option<String>,
}

impl RunOutcome {
    pub fn completed(stats: ExecutionStats, duration: Duration) -> Self {
        Self {
            status: RunStatus::Completed,
            stats,
            duration,
            errors: None,
        }
    }

    pub fn failed(error: impl Into<String>, duration: Duration) -> Self {
        Self {
            status: RunStatus::Failed,
            stats: ExecutionStats::default(),
            duration,
            errors: Some(error.into()),
        }
    }

    /// Run whose job moved on without it; stats are kept on the row only.
    pub fn abandoned(stats: ExecutionStats, reason: impl Into<String>, duration: Duration) -> Self {
        Self {
            status: RunStatus::Abandoned,
            stats,
            duration,
            errors: Some(reason.into()),
        }
    }

    /// Whether this outcome feeds the daily counters.
    pub fn counts(&self) -> bool {
        self.status != RunStatus::Abandoned
    }
}

/// A row of `run_history`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub task_type: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub params: String,
    pub stats: ExecutionStats,
    pub duration_secs: Option<f64>,
    pub errors: Option<String>,
}

/// A row of `events`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub event_type: String,
    pub task_type: Option<String>,
    pub message: String,
    pub details: serde_json::Value,
}

/// Counters accumulated for one day.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DailyStats {
    pub date: String,
    pub items_saved: HashMap<String, u64>,
    pub runs: HashMap<String, u64>,
    pub total_items_saved: u64,
    pub total_runs: u64,
}

type RawRun = (
    String,
    String,
    String,
    Option<String>,
    String,
    String,
    [i64; 4],
    Option<f64>,
    Option<String>,
);

impl Store {
    /// Calendar date used for counters.
    pub fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }

    /// Add `by` to a counter for today.
    pub async fn increment_counter(&self, task_type: &str, counter: &str, by: u64) -> Result<(), StoreError> {
        let date = self.today().to_string();
        let task_type = task_type.to_string();
        let counter = counter.to_string();
        self.connection()
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO daily_counters (date, task_type, counter, value) VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(date, task_type, counter) DO UPDATE SET value = value + excluded.value",
                    params![date, task_type, counter, by as i64],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Value of a counter on `date` (today when `None`).
    pub async fn get_counter(
        &self,
        task_type: &str,
        counter: &str,
        date: Option<NaiveDate>,
    ) -> Result<u64, StoreError> {
        let date = date.unwrap_or_else(|| self.today()).to_string();
        let task_type = task_type.to_string();
        let counter = counter.to_string();
        let value = self
            .connection()
            .call(move |conn| {
                let value: i64 = conn.query_row(
                    "SELECT COALESCE(SUM(value), 0) FROM daily_counters
                     WHERE date = ?1 AND task_type = ?2 AND counter = ?3",
                    params![date, task_type, counter],
                    |row| row.get(0),
                )?;
                Ok(value)
            })
            .await?;
        Ok(value.max(0) as u64)
    }

    /// Items saved today for a task type.
    pub async fn items_saved_today(&self, task_type: &str) -> Result<u64, StoreError> {
        self.get_counter(task_type, COUNTER_ITEMS_SAVED, None).await
    }

    /// All counters recorded for `date`.
    pub async fn counters_for_date(&self, date: NaiveDate) -> Result<Vec<(String, String, u64)>, StoreError> {
        let date = date.to_string();
        let rows = self
            .connection()
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT task_type, counter, value FROM daily_counters WHERE date = ?1
                     ORDER BY task_type, counter",
                )?;
                let rows = stmt
                    .query_map([&date], |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, i64>(2)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(rows
            .into_iter()
            .map(|(task_type, counter, value)| (task_type, counter, value.max(0) as u64))
            .collect())
    }

    /// Summary of today's counters.
    pub async fn stats_today(&self) -> Result<DailyStats, StoreError> {
        let today = self.today();
        let mut stats = DailyStats {
            date: today.to_string(),
            ..Default::default()
        };

        for (task_type, counter, value) in self.counters_for_date(today).await? {
            match counter.as_str() {
                COUNTER_ITEMS_SAVED => {
                    stats.total_items_saved += value;
                    stats.items_saved.insert(task_type, value);
                }
                COUNTER_RUNS => {
                    stats.total_runs += value;
                    stats.runs.insert(task_type, value);
                }
                _ => {}
            }
        }

        Ok(stats)
    }

    /// Open a run-history record.
    pub async fn start_run(&self, run_id: &str, task_type: &str, params: &str) -> Result<(), StoreError> {
        let run_id = run_id.to_string();
        let task_type = task_type.to_string();
        let params = params.to_string();
        let now = format_ts(self.now());
        self.connection()
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO run_history (run_id, task_type, started_at, status, params)
                     VALUES (?1, ?2, ?3, 'running', ?4)",
                    params![run_id, task_type, now, params],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Close a run-history record and bump today's counters atomically.
    ///
    /// Abandoned runs are closed without touching the counters.
    pub async fn end_run(&self, run_id: &str, outcome: RunOutcome) -> Result<(), StoreError> {
        let run_id = run_id.to_string();
        let now = format_ts(self.now());
        let date = self.today().to_string();
        let stats = outcome.stats;
        let duration = outcome.duration.as_secs_f64();
        let status = outcome.status.as_str();
        let counts = outcome.counts();
        let errors = outcome.errors;

        self.connection()
            .call(move |conn| {
                let tx = conn.transaction()?;

                let task_type: String = tx.query_row(
                    "SELECT task_type FROM run_history WHERE run_id = ?1",
                    [&run_id],
                    |row| row.get(0),
                )?;

                tx.execute(
                    "UPDATE run_history SET ended_at = ?1, status = ?2, items_found = ?3, items_saved = ?4,
                     duplicates = ?5, filtered = ?6, duration_secs = ?7, errors = ?8
                     WHERE run_id = ?9",
                    params![
                        now,
                        status,
                        stats.items_found as i64,
                        stats.items_saved as i64,
                        stats.duplicates as i64,
                        stats.filtered as i64,
                        duration,
                        errors,
                        run_id
                    ],
                )?;

                if counts {
                    for (counter, by) in [(COUNTER_ITEMS_SAVED, stats.items_saved), (COUNTER_RUNS, 1)] {
                        tx.execute(
                            "INSERT INTO daily_counters (date, task_type, counter, value) VALUES (?1, ?2, ?3, ?4)
                             ON CONFLICT(date, task_type, counter) DO UPDATE SET value = value + excluded.value",
                            params![date, task_type, counter, by as i64],
                        )?;
                    }
                }

                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Most recent runs, newest first.
    pub async fn recent_runs(&self, limit: usize, task_type: Option<&str>) -> Result<Vec<RunRecord>, StoreError> {
        let task_type = task_type.map(str::to_string);
        let raw: Vec<RawRun> = self
            .connection()
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT run_id, task_type, started_at, ended_at, status, params,
                            items_found, items_saved, duplicates, filtered, duration_secs, errors
                     FROM run_history
                     WHERE ?1 IS NULL OR task_type = ?1
                     ORDER BY started_at DESC, rowid DESC
                     LIMIT ?2",
                )?;
                let rows = stmt
                    .query_map(params![task_type, limit as i64], |row| {
                        Ok((
                            row.get(0)?,
                            row.get(1)?,
                            row.get(2)?,
                            row.get(3)?,
                            row.get(4)?,
                            row.get(5)?,
                            [row.get(6)?, row.get(7)?, row.get(8)?, row.get(9)?],
                            row.get(10)?,
                            row.get(11)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        raw.into_iter()
            .map(|(run_id, task_type, started, ended, status, params, counts, duration_secs, errors)| {
                Ok(RunRecord {
                    run_id,
                    task_type,
                    started_at: parse_ts(&started)?,
                    ended_at: parse_opt_ts(ended)?,
                    status: RunStatus::parse(&status)?,
                    params,
                    stats: ExecutionStats {
                        items_found: counts[0].max(0) as u64,
                        items_saved: counts[1].max(0) as u64,
                        duplicates: counts[2].max(0) as u64,
                        filtered: counts[3].max(0) as u64,
                    },
                    duration_secs,
                    errors,
                })
            })
            .collect()
    }

    /// Append to the event log.
    pub async fn log_event(
        &self,
        event_type: &str,
        task_type: Option<&str>,
        message: &str,
        details: serde_json::Value,
    ) -> Result<(), StoreError> {
        debug!(event_type, message, "event");
        let event_type = event_type.to_string();
        let task_type = task_type.map(str::to_string);
        let message = message.to_string();
        let details = serde_json::to_string(&details)?;
        let now = format_ts(self.now());
        self.connection()
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO events (created_at, event_type, task_type, message, details)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![now, event_type, task_type, message, details],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Most recent events, newest first.
    pub async fn recent_events(&self, limit: usize, event_type: Option<&str>) -> Result<Vec<EventRecord>, StoreError> {
        let event_type = event_type.map(str::to_string);
        let raw = self
            .connection()
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, created_at, event_type, task_type, message, details FROM events
                     WHERE ?1 IS NULL OR event_type = ?1
                     ORDER BY id DESC LIMIT ?2",
                )?;
                let rows = stmt
                    .query_map(params![event_type, limit as i64], |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, Option<String>>(3)?,
                            row.get::<_, String>(4)?,
                            row.get::<_, String>(5)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        raw.into_iter()
            .map(|(id, created_at, event_type, task_type, message, details)| {
                Ok(EventRecord {
                    id,
                    created_at: parse_ts(&created_at)?,
                    event_type,
                    task_type,
                    message,
                    details: serde_json::from_str(&details)?,
                })
            })
            .collect()
    }

    /// Delete events older than `days`.
    pub async fn cleanup_events(&self, days: u32) -> Result<usize, StoreError> {
        let cutoff = format_ts(self.now() - chrono::Duration::days(days as i64));
        let removed = self
            .connection()
            .call(move |conn| Ok(conn.execute("DELETE FROM events WHERE created_at < ?1", [&cutoff])?))
            .await?;
        Ok(removed)
    }
}
