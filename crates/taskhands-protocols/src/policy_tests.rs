use super::*;

#[test]
fn test_exponential_delays_double() {
    let policy = BackoffPolicy::exponential(Duration::from_secs(60));
    assert_eq!(policy.delay_for(0), Duration::from_secs(60));
    assert_eq!(policy.delay_for(1), Duration::from_secs(120));
    assert_eq!(policy.delay_for(2), Duration::from_secs(240));
    assert_eq!(policy.delay_for(3), Duration::from_secs(480));
}

#[test]
fn test_delays_are_monotonic_up_to_cap() {
    let policy = BackoffPolicy::exponential(Duration::from_secs(60))
        .with_max_delay(Duration::from_secs(3600));
    let delays: Vec<_> = (0..12).map(|a| policy.delay_for(a)).collect();
    assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(*delays.last().unwrap(), Duration::from_secs(3600));
}

#[test]
fn test_max_exponent_clamps_growth() {
    let policy = BackoffPolicy::exponential(Duration::from_secs(10)).with_max_exponent(6);
    assert_eq!(policy.delay_for(6), Duration::from_secs(640));
    assert_eq!(policy.delay_for(40), Duration::from_secs(640));
}

#[test]
fn test_huge_attempt_does_not_overflow() {
    let policy = BackoffPolicy::exponential(Duration::from_secs(3600));
    let delay = policy.delay_for(u32::MAX);
    assert!(delay >= Duration::from_secs(3600));
}

#[test]
fn test_linear_delay() {
    let policy = BackoffPolicy::exponential(Duration::from_secs(120));
    assert_eq!(policy.linear_delay_for(1), Duration::from_secs(120));
    assert_eq!(policy.linear_delay_for(3), Duration::from_secs(360));
}

#[test]
fn test_decide_respects_budget() {
    let policy = BackoffPolicy::exponential(Duration::from_secs(60)).with_max_attempts(2);

    assert_eq!(
        policy.decide(0),
        RetryDecision::Retry { attempt: 1, delay: Duration::from_secs(60) }
    );
    assert_eq!(
        policy.decide(1),
        RetryDecision::Retry { attempt: 2, delay: Duration::from_secs(120) }
    );
    assert_eq!(policy.decide(2), RetryDecision::Exhausted);
    assert!(!policy.decide(5).is_retry());
}

#[test]
fn test_unbounded_policy_never_exhausts() {
    let policy = BackoffPolicy::default();
    assert!(policy.decide(1_000).is_retry());
    assert_eq!(policy.max_attempts(), None);
}
