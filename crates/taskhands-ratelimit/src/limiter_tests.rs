use super::*;
use chrono::TimeZone;
use taskhands_protocols::ManualTimeProvider;

fn clock() -> ManualTimeProvider {
    ManualTimeProvider::new(Utc.with_ymd_and_hms(2026, 10, 18, 9, 0, 0).unwrap())
}

fn limiter(clock: &ManualTimeProvider, limit: u64, window: u64, base: u64) -> RateLimiter {
    let mut configs = HashMap::new();
    configs.insert("api".to_string(), ApiLimitConfig::new(limit, window, base));
    RateLimiter::new(configs, Arc::new(clock.clone()))
}

#[test]
fn test_window_blocks_then_reopens() {
    let clock = clock();
    let limiter = limiter(&clock, 2, 60, 10);

    assert!(limiter.can_request("api"));
    limiter.track_request("api", 1);
    limiter.track_request("api", 1);
    assert!(!limiter.can_request("api"));

    clock.advance(chrono::Duration::seconds(61));
    assert!(limiter.can_request("api"));
    assert_eq!(limiter.status("api").unwrap().current, 0);
}

#[test]
fn test_partial_window_expiry() {
    let clock = clock();
    let limiter = limiter(&clock, 2, 60, 10);

    limiter.track_request("api", 1);
    clock.advance(chrono::Duration::seconds(30));
    limiter.track_request("api", 1);
    assert!(!limiter.can_request("api"));

    clock.advance(chrono::Duration::seconds(31));
    assert!(limiter.can_request("api"));
    assert_eq!(limiter.status("api").unwrap().current, 1);
}

#[test]
fn test_unknown_api_is_unlimited() {
    let clock = clock();
    let limiter = limiter(&clock, 1, 60, 10);
    limiter.track_request("other", 100);
    assert!(limiter.can_request("other"));
    assert!(limiter.status("other").is_none());
    assert_eq!(limiter.track_error("other", true), None);
}

#[test]
fn test_rate_limit_error_backs_off_exponentially() {
    let clock = clock();
    let limiter = limiter(&clock, 100, 60, 10);

    assert_eq!(limiter.track_error("api", true), Some(Duration::from_secs(20)));
    assert_eq!(limiter.track_error("api", true), Some(Duration::from_secs(40)));
    assert!(!limiter.can_request("api"));

    for _ in 0..10 {
        limiter.track_error("api", true);
    }
    assert_eq!(limiter.track_error("api", true), Some(Duration::from_secs(640)));
}

#[test]
fn test_generic_error_backs_off_linearly() {
    let clock = clock();
    let limiter = limiter(&clock, 100, 60, 10);

    assert_eq!(limiter.track_error("api", false), Some(Duration::from_secs(10)));
    assert_eq!(limiter.track_error("api", false), Some(Duration::from_secs(20)));
    assert_eq!(limiter.track_error("api", false), Some(Duration::from_secs(30)));
}

#[test]
fn test_backoff_expires_and_resets() {
    let clock = clock();
    let limiter = limiter(&clock, 100, 60, 10);

    limiter.track_error("api", false);
    assert!(!limiter.can_request("api"));
    clock.advance(chrono::Duration::seconds(11));
    assert!(limiter.can_request("api"));

    limiter.reset_backoff("api");
    let status = limiter.status("api").unwrap();
    assert_eq!(status.backoff_attempts, 0);
    assert!(status.backoff_until.is_none());
    assert_eq!(limiter.track_error("api", false), Some(Duration::from_secs(10)));
}

#[test]
fn test_status_fields() {
    let clock = clock();
    let limiter = limiter(&clock, 3, 60, 10);

    limiter.track_request("api", 1);
    clock.advance(chrono::Duration::seconds(20));
    limiter.track_request("api", 1);

    let status = limiter.status("api").unwrap();
    assert_eq!(status.current, 2);
    assert_eq!(status.remaining, 1);
    assert_eq!(status.percentage, 66.7);
    assert_eq!(status.window_secs, 60);
    assert_eq!(status.resets_in_secs, 40);
    assert!(!status.in_backoff);
}

#[test]
fn test_recommended_delay_tiers() {
    let clock = clock();
    let limiter = limiter(&clock, 100, 3600, 10);

    assert_eq!(limiter.recommended_delay("api"), Duration::from_millis(500));
    limiter.track_request("api", 51);
    assert_eq!(limiter.recommended_delay("api"), Duration::from_secs(2));
    limiter.track_request("api", 25);
    assert_eq!(limiter.recommended_delay("api"), Duration::from_secs(5));
    limiter.track_request("api", 15);
    assert_eq!(limiter.recommended_delay("api"), Duration::from_secs(10));
}

#[test]
fn test_defaults_and_overrides() {
    let mut overrides = HashMap::new();
    overrides.insert("reddit".to_string(), ApiLimitConfig::new(5, 60, 1));
    let limiter = RateLimiter::with_defaults(&overrides, Arc::new(clock()));

    let all = limiter.all_status();
    assert_eq!(all.len(), 6);
    assert_eq!(all["reddit"].limit, 5);
    assert_eq!(all["hunter"].window_secs, 2_592_000);
    assert_eq!(all["google_search"].limit, 100);
}

#[test]
fn test_saturated_reports_backoff_and_usage() {
    let clock = clock();
    let mut configs = HashMap::new();
    configs.insert("a".to_string(), ApiLimitConfig::new(10, 60, 1));
    configs.insert("b".to_string(), ApiLimitConfig::new(10, 60, 1));
    configs.insert("c".to_string(), ApiLimitConfig::new(10, 60, 1));
    let limiter = RateLimiter::new(configs, Arc::new(clock.clone()));

    limiter.track_request("a", 10);
    limiter.track_error("b", true);
    limiter.track_request("c", 5);

    let saturated: Vec<_> = limiter.saturated(90.0).into_iter().map(|s| s.api).collect();
    assert_eq!(saturated, vec!["a".to_string(), "b".to_string()]);
}

#[test]
fn test_persistence_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rate_limits.json");
    let clock = clock();

    {
        let limiter = limiter(&clock, 2, 60, 10).with_persistence(&path).unwrap();
        limiter.track_request("api", 2);
        limiter.track_error("api", true);
    }

    let limiter = limiter(&clock, 2, 60, 10).with_persistence(&path).unwrap();
    let status = limiter.status("api").unwrap();
    assert_eq!(status.current, 2);
    assert_eq!(status.backoff_attempts, 1);
    assert!(!limiter.can_request("api"));
}

#[test]
fn test_corrupt_persistence_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rate_limits.json");
    std::fs::write(&path, "{not json").unwrap();

    let result = limiter(&clock(), 2, 60, 10).with_persistence(&path);
    assert!(matches!(result, Err(RateLimitError::InvalidState(_))));
}

#[tokio::test(start_paused = true)]
async fn test_wait_if_needed_returns_immediately_when_free() {
    let limiter = limiter(&clock(), 2, 60, 10);
    assert!(limiter.wait_if_needed("api", Duration::from_secs(5)).await);
}

#[tokio::test(start_paused = true)]
async fn test_wait_if_needed_times_out() {
    let limiter = limiter(&clock(), 1, 3600, 10);
    limiter.track_request("api", 1);

    let started = tokio::time::Instant::now();
    assert!(!limiter.wait_if_needed("api", Duration::from_secs(90)).await);
    assert!(started.elapsed() >= Duration::from_secs(90));
}
