//! Schedule definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use taskhands_config::{parse_cron_expression, ScheduleSeed, ScheduleZone};
use taskhands_protocols::JobPayload;
use taskhands_workqueue::JobPriority;

use crate::error::SchedulerError;

/// When a schedule fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Trigger {
    /// Crontab expression, five or six fields.
    Cron { expr: String },
    /// Fixed spacing between fires.
    Interval { minutes: u64 },
}

impl Trigger {
    pub fn cron(expr: impl Into<String>) -> Self {
        Trigger::Cron { expr: expr.into() }
    }

    pub fn interval(minutes: u64) -> Self {
        Trigger::Interval { minutes }
    }

    /// Build from the two optional columns; exactly one must be set.
    pub fn from_parts(id: &str, cron: Option<String>, interval_minutes: Option<u64>) -> Result<Self, SchedulerError> {
        let trigger = match (cron, interval_minutes) {
            (Some(expr), None) => Trigger::Cron { expr },
            (None, Some(minutes)) => Trigger::Interval { minutes },
            (Some(_), Some(_)) => {
                return Err(SchedulerError::invalid(id, "both cron and interval_minutes are set"));
            }
            (None, None) => {
                return Err(SchedulerError::invalid(id, "one of cron or interval_minutes is required"));
            }
        };
        trigger.validate(id)?;
        Ok(trigger)
    }

    pub fn validate(&self, id: &str) -> Result<(), SchedulerError> {
        match self {
            Trigger::Cron { expr } => parse_cron_expression(expr)
                .map(|_| ())
                .map_err(|e| SchedulerError::invalid(id, format!("bad cron '{}': {}", expr, e))),
            Trigger::Interval { minutes: 0 } => Err(SchedulerError::invalid(id, "interval must be positive")),
            Trigger::Interval { .. } => Ok(()),
        }
    }

    /// First fire time strictly after `after`. Cron fields are read as wall
    /// clock time in `zone`.
    pub fn next_after(&self, after: DateTime<Utc>, zone: &ScheduleZone) -> Option<DateTime<Utc>> {
        match self {
            Trigger::Cron { expr } => zone.next_fire(&parse_cron_expression(expr).ok()?, after),
            Trigger::Interval { minutes } => {
                let minutes = i64::try_from(*minutes).ok()?;
                after.checked_add_signed(chrono::Duration::minutes(minutes))
            }
        }
    }

    pub(crate) fn columns(&self) -> (Option<&str>, Option<u64>) {
        match self {
            Trigger::Cron { expr } => (Some(expr.as_str()), None),
            Trigger::Interval { minutes } => (None, Some(*minutes)),
        }
    }
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trigger::Cron { expr } => write!(f, "cron '{}'", expr),
            Trigger::Interval { minutes } => write!(f, "every {}m", minutes),
        }
    }
}

/// A recurring trigger definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: String,
    pub task_type: String,
    pub description: String,
    pub enabled: bool,
    pub trigger: Trigger,
    pub params: JobPayload,
    pub priority: JobPriority,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Schedule {
    /// An enabled, normal priority schedule with empty params.
    pub fn new(id: impl Into<String>, task_type: impl Into<String>, trigger: Trigger) -> Self {
        Self {
            id: id.into(),
            task_type: task_type.into(),
            description: String::new(),
            enabled: true,
            trigger,
            params: JobPayload::empty(),
            priority: JobPriority::Normal,
            last_run: None,
            next_run: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_params(mut self, params: JobPayload) -> Self {
        self.params = params;
        self
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Build from a configuration seed.
    pub fn from_seed(seed: &ScheduleSeed) -> Result<Self, SchedulerError> {
        let trigger = Trigger::from_parts(&seed.id, seed.cron.clone(), seed.interval_minutes)?;
        let priority = seed
            .priority
            .parse::<JobPriority>()
            .map_err(|e| SchedulerError::invalid(&seed.id, e.to_string()))?;

        Ok(Schedule::new(&seed.id, &seed.task_type, trigger)
            .with_description(&seed.description)
            .with_params(JobPayload::from(seed.params.clone()))
            .with_priority(priority)
            .with_enabled(seed.enabled))
    }
}

/// Partial update of a schedule; `None` fields are left as they are.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleUpdate {
    #[serde(default)]
    pub task_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub trigger: Option<Trigger>,
    #[serde(default)]
    pub params: Option<JobPayload>,
    #[serde(default)]
    pub priority: Option<JobPriority>,
}

impl ScheduleUpdate {
    pub fn enabled(enabled: bool) -> Self {
        Self {
            enabled: Some(enabled),
            ..Default::default()
        }
    }

    pub(crate) fn apply(self, schedule: &mut Schedule) {
        if let Some(task_type) = self.task_type {
            schedule.task_type = task_type;
        }
        if let Some(description) = self.description {
            schedule.description = description;
        }
        if let Some(enabled) = self.enabled {
            schedule.enabled = enabled;
        }
        if let Some(trigger) = self.trigger {
            schedule.trigger = trigger;
        }
        if let Some(params) = self.params {
            schedule.params = params;
        }
        if let Some(priority) = self.priority {
            schedule.priority = priority;
        }
    }
}

/// An enabled schedule due within a horizon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpcomingRun {
    pub id: String,
    pub task_type: String,
    pub description: String,
    pub next_run: DateTime<Utc>,
    pub in_minutes: i64,
}
