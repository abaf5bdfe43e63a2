use super::*;
use crate::schema::{ApiLimitConfig, ScheduleSeed};

fn seed(id: &str, cron: Option<&str>, interval: Option<u64>) -> ScheduleSeed {
    ScheduleSeed {
        id: id.to_string(),
        task_type: "direct".to_string(),
        description: String::new(),
        cron: cron.map(str::to_string),
        interval_minutes: interval,
        params: serde_json::json!({}),
        priority: "normal".to_string(),
        enabled: true,
    }
}

#[test]
fn test_default_config_is_valid() {
    let result = ConfigValidator::validate(&Config::default());
    assert!(result.is_valid(), "{:?}", result.errors);
    assert!(result.warnings.is_empty());
}

#[test]
fn test_zero_poll_interval() {
    let mut config = Config::default();
    config.worker.poll_interval_secs = 0;

    let result = ConfigValidator::validate(&config);
    assert!(!result.is_valid());
    assert!(result.errors.iter().any(|e| e.path == "worker.poll_interval_secs"));
}

#[test]
fn test_short_heartbeat_timeout_warns() {
    let mut config = Config::default();
    config.monitor.heartbeat_timeout_secs = 40;

    let result = ConfigValidator::validate(&config);
    assert!(result.is_valid());
    assert!(result.warnings.iter().any(|w| w.path == "monitor.heartbeat_timeout_secs"));
}

#[test]
fn test_invalid_cron_seed() {
    let mut config = Config::default();
    config.scheduler.schedules.push(seed("bad", Some("every tuesday"), None));

    let result = ConfigValidator::validate(&config);
    assert!(result.errors.iter().any(|e| e.path == "scheduler.schedules[0].cron"));
}

#[test]
fn test_seed_needs_exactly_one_trigger() {
    let mut config = Config::default();
    config.scheduler.schedules.push(seed("none", None, None));
    config.scheduler.schedules.push(seed("both", Some("0 9 * * *"), Some(60)));
    config.scheduler.schedules.push(seed("ok", None, Some(120)));

    let result = ConfigValidator::validate(&config);
    assert_eq!(result.errors.len(), 2);
}

#[test]
fn test_unknown_priority() {
    let mut config = Config::default();
    let mut s = seed("p", Some("0 9 * * *"), None);
    s.priority = "asap".to_string();
    config.scheduler.schedules.push(s);

    let result = ConfigValidator::validate(&config);
    assert!(result.errors.iter().any(|e| e.path.ends_with(".priority")));
}

#[test]
fn test_zero_rate_limit() {
    let mut config = Config::default();
    config.rate_limits.insert("reddit".to_string(), ApiLimitConfig::new(0, 60, 10));

    let result = ConfigValidator::validate(&config);
    assert!(result.errors.iter().any(|e| e.path == "rate_limits.reddit.limit"));
}

#[test]
fn test_until_hour_range() {
    let mut config = Config::default();
    config.scheduler.auto_retry.until_hour = 25;

    let result = ConfigValidator::validate(&config);
    assert!(!result.is_valid());
}
