//! # TaskHands Scheduler
//!
//! Materializes recurring schedules into queue jobs.
//!
//! Each enabled schedule owns a timer task driven by a cron expression or a
//! fixed interval. On every fire the scheduler checks the task type's daily
//! goal against today's `items_saved` counter, enqueues a job when the goal
//! is not met and optionally arms a one-shot auto-retry. A maintenance timer
//! prunes old terminal jobs and reclaims stuck ones.

mod error;
mod repo;
mod schedule;
mod scheduler;

pub use error::SchedulerError;
pub use repo::ScheduleRepo;
pub use schedule::{Schedule, ScheduleUpdate, Trigger, UpcomingRun};
pub use scheduler::{FireOutcome, MaintenanceReport, Scheduler};
