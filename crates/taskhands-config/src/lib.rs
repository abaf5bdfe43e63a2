//! # TaskHands Config
//!
//! Configuration management for the TaskHands job engine.

pub mod cron_expr;
mod error;
mod loader;
mod schema;
mod validator;

pub use cron_expr::{parse_cron_expression, ScheduleZone};
pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::*;
pub use validator::{ConfigValidator, ValidationError, ValidationResult, ValidationWarning};
