//! Configuration validation.

use crate::cron_expr::parse_cron_expression;
use crate::schema::Config;

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;

/// Validation result.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }
}

/// A validation error.
#[derive(Debug)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// A validation warning.
#[derive(Debug)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration.
    pub fn validate(config: &Config) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_intervals(config, &mut result);
        Self::validate_schedules(config, &mut result);
        Self::validate_rate_limits(config, &mut result);
        Self::validate_monitor(config, &mut result);

        result
    }

    fn validate_intervals(config: &Config, result: &mut ValidationResult) {
        let intervals = [
            ("worker.poll_interval_secs", config.worker.poll_interval_secs),
            ("worker.heartbeat_interval_secs", config.worker.heartbeat_interval_secs),
            ("monitor.check_interval_secs", config.monitor.check_interval_secs),
            ("monitor.heartbeat_timeout_secs", config.monitor.heartbeat_timeout_secs),
            ("scheduler.maintenance_interval_secs", config.scheduler.maintenance_interval_secs),
            ("queue.retry_base_secs", config.queue.retry_base_secs),
        ];

        for (path, value) in intervals {
            if value == 0 {
                result.add_error(ValidationError::new(path, "must be greater than 0"));
            }
        }

        if config.monitor.heartbeat_timeout_secs < config.worker.heartbeat_interval_secs * 2 {
            result.add_warning(ValidationWarning::new(
                "monitor.heartbeat_timeout_secs",
                "shorter than two heartbeat intervals, healthy workers may read as stale",
            ));
        }
    }

    fn validate_schedules(config: &Config, result: &mut ValidationResult) {
        let auto_retry = &config.scheduler.auto_retry;
        if auto_retry.until_hour > 24 {
            result.add_error(ValidationError::new(
                "scheduler.auto_retry.until_hour",
                "must be between 0 and 24",
            ));
        }
        if auto_retry.enabled && auto_retry.interval_minutes == 0 {
            result.add_error(ValidationError::new(
                "scheduler.auto_retry.interval_minutes",
                "must be greater than 0 when auto retry is enabled",
            ));
        }

        for (idx, seed) in config.scheduler.schedules.iter().enumerate() {
            let path = format!("scheduler.schedules[{}]", idx);

            if seed.id.is_empty() {
                result.add_error(ValidationError::new(&path, "id cannot be empty"));
            }

            match (&seed.cron, seed.interval_minutes) {
                (Some(expr), None) => {
                    if let Err(e) = parse_cron_expression(expr) {
                        result.add_error(ValidationError::new(
                            format!("{}.cron", path),
                            format!("invalid cron expression '{}': {}", expr, e),
                        ));
                    }
                }
                (None, Some(0)) => {
                    result.add_error(ValidationError::new(
                        format!("{}.interval_minutes", path),
                        "must be greater than 0",
                    ));
                }
                (None, Some(_)) => {}
                (Some(_), Some(_)) => {
                    result.add_error(ValidationError::new(
                        &path,
                        "set either cron or interval_minutes, not both",
                    ));
                }
                (None, None) => {
                    result.add_error(ValidationError::new(
                        &path,
                        "one of cron or interval_minutes is required",
                    ));
                }
            }

            if !matches!(
                seed.priority.as_str(),
                "urgent" | "high" | "normal" | "low" | "1" | "2" | "3" | "4"
            ) {
                result.add_error(ValidationError::new(
                    format!("{}.priority", path),
                    format!("unknown priority '{}'", seed.priority),
                ));
            }
        }
    }

    fn validate_rate_limits(config: &Config, result: &mut ValidationResult) {
        for (api, limit) in &config.rate_limits {
            if limit.limit == 0 {
                result.add_error(ValidationError::new(
                    format!("rate_limits.{}.limit", api),
                    "must be greater than 0",
                ));
            }
            if limit.window_secs == 0 {
                result.add_error(ValidationError::new(
                    format!("rate_limits.{}.window_secs", api),
                    "must be greater than 0",
                ));
            }
        }
    }

    fn validate_monitor(config: &Config, result: &mut ValidationResult) {
        let monitor = &config.monitor;
        if monitor.max_recovery_attempts == 0 {
            result.add_warning(ValidationWarning::new(
                "monitor.max_recovery_attempts",
                "0 disables automatic recovery, the first failure escalates",
            ));
        }
        if !(0.0..=100.0).contains(&monitor.disk_min_free_percent) {
            result.add_error(ValidationError::new(
                "monitor.disk_min_free_percent",
                "must be between 0 and 100",
            ));
        }
        if !(0.0..=100.0).contains(&monitor.saturation_percent) {
            result.add_error(ValidationError::new(
                "monitor.saturation_percent",
                "must be between 0 and 100",
            ));
        }

        let alerts = &config.alerts;
        if alerts.telegram_bot_token.is_some() != alerts.telegram_chat_id.is_some() {
            result.add_warning(ValidationWarning::new(
                "alerts",
                "telegram needs both telegram_bot_token and telegram_chat_id",
            ));
        }
    }
}
