//! Persistence of schedules in the `schedules` table.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use taskhands_protocols::JobPayload;
use taskhands_store::{format_ts, parse_opt_ts, parse_ts, Store, StoreError};
use taskhands_workqueue::JobPriority;

use crate::error::SchedulerError;
use crate::schedule::{Schedule, Trigger};

const SCHEDULE_COLUMNS: &str =
    "id, task_type, description, enabled, cron, interval_minutes, params, priority, last_run, next_run, created_at";

struct ScheduleRow {
    id: String,
    task_type: String,
    description: String,
    enabled: bool,
    cron: Option<String>,
    interval_minutes: Option<i64>,
    params: String,
    priority: i64,
    last_run: Option<String>,
    next_run: Option<String>,
    created_at: String,
}

impl ScheduleRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            task_type: row.get(1)?,
            description: row.get(2)?,
            enabled: row.get(3)?,
            cron: row.get(4)?,
            interval_minutes: row.get(5)?,
            params: row.get(6)?,
            priority: row.get(7)?,
            last_run: row.get(8)?,
            next_run: row.get(9)?,
            created_at: row.get(10)?,
        })
    }

    fn into_schedule(self) -> Result<Schedule, SchedulerError> {
        let interval = self.interval_minutes.map(|m| m.max(0) as u64);
        let trigger = Trigger::from_parts(&self.id, self.cron, interval)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let priority = JobPriority::from_i64(self.priority)
            .ok_or_else(|| StoreError::Corrupt(format!("schedule {}: bad priority {}", self.id, self.priority)))?;

        Ok(Schedule {
            trigger,
            priority,
            params: JobPayload::new(self.params),
            last_run: parse_opt_ts(self.last_run)?,
            next_run: parse_opt_ts(self.next_run)?,
            created_at: parse_ts(&self.created_at)?,
            enabled: self.enabled,
            description: self.description,
            task_type: self.task_type,
            id: self.id,
        })
    }
}

/// Schedule table access.
#[derive(Clone)]
pub struct ScheduleRepo {
    store: Store,
}

impl ScheduleRepo {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Insert a new schedule; returns `false` if the id already exists.
    pub async fn insert(&self, schedule: &Schedule) -> Result<bool, SchedulerError> {
        let (cron, interval) = schedule.trigger.columns();
        let cron = cron.map(str::to_string);
        let interval = interval.map(|m| m as i64);
        let s = schedule.clone();

        let inserted = self
            .store
            .connection()
            .call(move |conn| {
                Ok(conn.execute(
                    "INSERT OR IGNORE INTO schedules (id, task_type, description, enabled, cron,
                     interval_minutes, params, priority, last_run, next_run, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    params![
                        s.id,
                        s.task_type,
                        s.description,
                        s.enabled,
                        cron,
                        interval,
                        s.params.as_str(),
                        s.priority.as_i64(),
                        s.last_run.map(format_ts),
                        s.next_run.map(format_ts),
                        format_ts(s.created_at)
                    ],
                )?)
            })
            .await?;
        Ok(inserted == 1)
    }

    /// Overwrite every mutable column of an existing schedule.
    pub async fn save(&self, schedule: &Schedule) -> Result<(), SchedulerError> {
        let (cron, interval) = schedule.trigger.columns();
        let cron = cron.map(str::to_string);
        let interval = interval.map(|m| m as i64);
        let s = schedule.clone();
        let id = s.id.clone();

        let updated = self
            .store
            .connection()
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE schedules SET task_type = ?1, description = ?2, enabled = ?3, cron = ?4,
                     interval_minutes = ?5, params = ?6, priority = ?7, last_run = ?8, next_run = ?9
                     WHERE id = ?10",
                    params![
                        s.task_type,
                        s.description,
                        s.enabled,
                        cron,
                        interval,
                        s.params.as_str(),
                        s.priority.as_i64(),
                        s.last_run.map(format_ts),
                        s.next_run.map(format_ts),
                        s.id
                    ],
                )?)
            })
            .await?;

        if updated == 0 {
            return Err(SchedulerError::NotFound(id));
        }
        Ok(())
    }

    /// Record a fire.
    pub async fn record_run(
        &self,
        id: &str,
        last_run: DateTime<Utc>,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<(), SchedulerError> {
        let id = id.to_string();
        let last_run = format_ts(last_run);
        let next_run = next_run.map(format_ts);
        self.store
            .connection()
            .call(move |conn| {
                conn.execute(
                    "UPDATE schedules SET last_run = ?1, next_run = ?2 WHERE id = ?3",
                    params![last_run, next_run, id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn set_next_run(&self, id: &str, next_run: Option<DateTime<Utc>>) -> Result<(), SchedulerError> {
        let id = id.to_string();
        let next_run = next_run.map(format_ts);
        self.store
            .connection()
            .call(move |conn| {
                conn.execute("UPDATE schedules SET next_run = ?1 WHERE id = ?2", params![next_run, id])?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<Schedule>, SchedulerError> {
        let id = id.to_string();
        let sql = format!("SELECT {} FROM schedules WHERE id = ?1", SCHEDULE_COLUMNS);
        let row = self
            .store
            .connection()
            .call(move |conn| Ok(conn.query_row(&sql, [&id], ScheduleRow::read).optional()?))
            .await?;
        row.map(ScheduleRow::into_schedule).transpose()
    }

    /// Every schedule, ordered by id.
    pub async fn list(&self) -> Result<Vec<Schedule>, SchedulerError> {
        let sql = format!("SELECT {} FROM schedules ORDER BY id", SCHEDULE_COLUMNS);
        let rows = self
            .store
            .connection()
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map([], ScheduleRow::read)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        rows.into_iter().map(ScheduleRow::into_schedule).collect()
    }

    pub async fn delete(&self, id: &str) -> Result<bool, SchedulerError> {
        let id = id.to_string();
        let removed = self
            .store
            .connection()
            .call(move |conn| Ok(conn.execute("DELETE FROM schedules WHERE id = ?1", [&id])?))
            .await?;
        Ok(removed == 1)
    }
}
