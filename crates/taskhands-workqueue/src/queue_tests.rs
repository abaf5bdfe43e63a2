use super::*;
use std::sync::Arc;

use chrono::TimeZone;
use taskhands_protocols::{ManualTimeProvider, TimeProvider};

fn clock() -> ManualTimeProvider {
    ManualTimeProvider::new(Utc.with_ymd_and_hms(2026, 10, 18, 9, 0, 0).unwrap())
}

async fn queue_with(clock: &ManualTimeProvider) -> JobQueue {
    let store = Store::open_in_memory(Arc::new(clock.clone())).await.unwrap();
    JobQueue::new(store, &QueueConfig::default())
}

#[tokio::test]
async fn test_create_and_get() {
    let clock = clock();
    let queue = queue_with(&clock).await;

    let id = queue
        .create(
            NewJob::new("direct")
                .with_params(JobPayload::new(r#"{"max_results":50}"#))
                .with_callback_url("http://localhost/hook"),
        )
        .await
        .unwrap();

    let job = queue.get(&id).await.unwrap().unwrap();
    assert_eq!(job.task_type, "direct");
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.source, JobSource::Manual);
    assert_eq!(job.priority, JobPriority::Normal);
    assert_eq!(job.max_retries, 3);
    assert_eq!(job.created_at, clock.now());
    assert_eq!(job.params.as_str(), r#"{"max_results":50}"#);
    assert_eq!(job.metadata.callback_url.as_deref(), Some("http://localhost/hook"));
    assert!(queue.get("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_next_prefers_priority_over_age() {
    let clock = clock();
    let queue = queue_with(&clock).await;

    let _a = queue
        .create(NewJob::new("direct").with_priority(JobPriority::Low))
        .await
        .unwrap();
    clock.advance(chrono::Duration::seconds(1));
    let b = queue
        .create(NewJob::new("direct").with_priority(JobPriority::Urgent))
        .await
        .unwrap();

    let next = queue.next().await.unwrap().unwrap();
    assert_eq!(next.id, b);
}

#[tokio::test]
async fn test_next_is_fifo_within_priority() {
    let clock = clock();
    let queue = queue_with(&clock).await;

    let first = queue.create(NewJob::new("a")).await.unwrap();
    let _second = queue.create(NewJob::new("b")).await.unwrap();
    clock.advance(chrono::Duration::seconds(1));
    let _third = queue.create(NewJob::new("c")).await.unwrap();

    assert_eq!(queue.next().await.unwrap().unwrap().id, first);
    // next() does not claim
    assert_eq!(queue.next().await.unwrap().unwrap().id, first);
}

#[tokio::test]
async fn test_next_respects_scheduled_for() {
    let clock = clock();
    let queue = queue_with(&clock).await;

    let later = clock.now() + chrono::Duration::minutes(10);
    let id = queue
        .create(NewJob::new("direct").with_scheduled_for(later))
        .await
        .unwrap();
    assert!(queue.next().await.unwrap().is_none());

    clock.advance(chrono::Duration::minutes(10));
    assert_eq!(queue.next().await.unwrap().unwrap().id, id);
}

#[tokio::test]
async fn test_mark_running_claims_once() {
    let clock = clock();
    let queue = queue_with(&clock).await;
    let id = queue.create(NewJob::new("direct")).await.unwrap();

    assert!(queue.mark_running(&id, "worker-1").await.unwrap());
    assert!(!queue.mark_running(&id, "worker-2").await.unwrap());

    let job = queue.get(&id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Running);
    assert_eq!(job.started_at, Some(clock.now()));
    assert!(job.completed_at.is_none());
    assert_eq!(job.claimed_by.as_deref(), Some("worker-1"));
    assert!(queue.next().await.unwrap().is_none());
}

#[tokio::test]
async fn test_claim_next_is_exclusive() {
    let clock = clock();
    let queue = queue_with(&clock).await;
    queue.create(NewJob::new("direct")).await.unwrap();

    let (a, b) = tokio::join!(queue.claim_next("w1"), queue.claim_next("w2"));
    let claimed: Vec<_> = [a.unwrap(), b.unwrap()].into_iter().flatten().collect();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].status, JobStatus::Running);
}

#[tokio::test]
async fn test_mark_completed() {
    let clock = clock();
    let queue = queue_with(&clock).await;
    let id = queue.create(NewJob::new("direct")).await.unwrap();
    queue.mark_running(&id, "w").await.unwrap();

    clock.advance(chrono::Duration::seconds(5));
    queue
        .mark_completed(&id, serde_json::json!({"items_saved": 4}))
        .await
        .unwrap();

    let job = queue.get(&id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.completed_at, Some(clock.now()));
    assert_eq!(job.result.unwrap()["items_saved"], 4);

    // terminal states are immutable
    let err = queue.mark_completed(&id, serde_json::json!({})).await.unwrap_err();
    assert!(matches!(err, QueueError::InvalidTransition { status: JobStatus::Completed, .. }));
    let err = queue.mark_failed(&id, "late", true).await.unwrap_err();
    assert!(matches!(err, QueueError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_complete_requires_running() {
    let queue = queue_with(&clock()).await;
    let id = queue.create(NewJob::new("direct")).await.unwrap();

    let err = queue.mark_completed(&id, serde_json::json!({})).await.unwrap_err();
    assert!(matches!(err, QueueError::InvalidTransition { status: JobStatus::Pending, .. }));
    let err = queue.mark_completed("ghost", serde_json::json!({})).await.unwrap_err();
    assert!(matches!(err, QueueError::JobNotFound(_)));
}

#[tokio::test]
async fn test_retry_until_failed() {
    let clock = clock();
    let queue = queue_with(&clock).await;
    let id = queue
        .create(NewJob::new("direct").with_max_retries(2))
        .await
        .unwrap();

    queue.mark_running(&id, "w").await.unwrap();
    let first = queue.mark_failed(&id, "boom", true).await.unwrap();
    assert_eq!(
        first,
        FailOutcome::Retrying { retry_count: 1, retry_at: clock.now() + chrono::Duration::seconds(60) }
    );
    let job = queue.get(&id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::RetryPending);
    assert_eq!(job.retry_count, 1);
    assert_eq!(job.last_error.as_deref(), Some("boom"));

    clock.advance(chrono::Duration::seconds(60));
    queue.mark_running(&id, "w").await.unwrap();
    let second = queue.mark_failed(&id, "boom", true).await.unwrap();
    assert_eq!(
        second,
        FailOutcome::Retrying { retry_count: 2, retry_at: clock.now() + chrono::Duration::seconds(120) }
    );

    clock.advance(chrono::Duration::seconds(120));
    queue.mark_running(&id, "w").await.unwrap();
    let third = queue.mark_failed(&id, "boom", true).await.unwrap();
    assert_eq!(third, FailOutcome::Failed);

    let job = queue.get(&id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.retry_count, 2);
    assert!(job.completed_at.is_some());
}

#[tokio::test]
async fn test_fail_requires_running() {
    let queue = queue_with(&clock()).await;
    let id = queue.create(NewJob::new("direct")).await.unwrap();

    let err = queue.mark_failed(&id, "early", true).await.unwrap_err();
    assert!(matches!(err, QueueError::InvalidTransition { status: JobStatus::Pending, .. }));

    queue.mark_running(&id, "w").await.unwrap();
    queue.mark_failed(&id, "boom", true).await.unwrap();
    let err = queue.mark_failed(&id, "again", true).await.unwrap_err();
    assert!(matches!(err, QueueError::InvalidTransition { status: JobStatus::RetryPending, .. }));

    let job = queue.get(&id).await.unwrap().unwrap();
    assert_eq!(job.retry_count, 1);
    assert_eq!(job.last_error.as_deref(), Some("boom"));

    assert!(matches!(
        queue.mark_failed("ghost", "x", true).await.unwrap_err(),
        QueueError::JobNotFound(_)
    ));
}

#[tokio::test]
async fn test_retry_pending_waits_for_backoff() {
    let clock = clock();
    let queue = queue_with(&clock).await;
    let id = queue.create(NewJob::new("direct")).await.unwrap();
    queue.mark_running(&id, "w").await.unwrap();
    queue.mark_failed(&id, "boom", true).await.unwrap();

    assert!(queue.next().await.unwrap().is_none());
    clock.advance(chrono::Duration::seconds(59));
    assert!(queue.next().await.unwrap().is_none());
    clock.advance(chrono::Duration::seconds(1));
    assert_eq!(queue.next().await.unwrap().unwrap().id, id);
}

#[tokio::test]
async fn test_fail_without_retry_is_terminal() {
    let queue = queue_with(&clock()).await;
    let id = queue.create(NewJob::new("direct")).await.unwrap();
    queue.mark_running(&id, "w").await.unwrap();

    assert_eq!(queue.mark_failed(&id, "fatal", false).await.unwrap(), FailOutcome::Failed);
}

#[tokio::test]
async fn test_cancel_only_waiting_jobs() {
    let clock = clock();
    let queue = queue_with(&clock).await;

    let pending = queue.create(NewJob::new("direct")).await.unwrap();
    assert!(queue.cancel(&pending).await.unwrap());
    assert_eq!(queue.get(&pending).await.unwrap().unwrap().status, JobStatus::Cancelled);
    assert!(!queue.cancel(&pending).await.unwrap());

    let running = queue.create(NewJob::new("direct")).await.unwrap();
    queue.mark_running(&running, "w").await.unwrap();
    assert!(!queue.cancel(&running).await.unwrap());
    assert_eq!(queue.get(&running).await.unwrap().unwrap().status, JobStatus::Running);

    let retrying = queue.create(NewJob::new("direct")).await.unwrap();
    queue.mark_running(&retrying, "w").await.unwrap();
    queue.mark_failed(&retrying, "x", true).await.unwrap();
    assert!(queue.cancel(&retrying).await.unwrap());

    assert!(!queue.cancel("ghost").await.unwrap());
}

#[tokio::test]
async fn test_clear_stuck_retries_then_fails() {
    let clock = clock();
    let queue = queue_with(&clock).await;

    let with_budget = queue.create(NewJob::new("direct")).await.unwrap();
    let exhausted = queue
        .create(NewJob::new("direct").with_max_retries(0))
        .await
        .unwrap();
    queue.mark_running(&with_budget, "w").await.unwrap();
    queue.mark_running(&exhausted, "w").await.unwrap();

    clock.advance(chrono::Duration::minutes(90));
    let fresh = queue.create(NewJob::new("direct")).await.unwrap();
    queue.mark_running(&fresh, "w").await.unwrap();

    let reclaimed = queue.clear_stuck(Duration::from_secs(3600)).await.unwrap();
    assert_eq!(reclaimed.len(), 2);

    let job = queue.get(&with_budget).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::RetryPending);
    assert_eq!(job.retry_count, 1);
    assert_eq!(job.last_error.as_deref(), Some(STUCK_ERROR));
    assert!(job.claimed_by.is_none());

    assert_eq!(queue.get(&exhausted).await.unwrap().unwrap().status, JobStatus::Failed);
    assert_eq!(queue.get(&fresh).await.unwrap().unwrap().status, JobStatus::Running);
}

#[tokio::test]
async fn test_clear_stuck_spares_live_owner() {
    let clock = clock();
    let queue = queue_with(&clock).await;

    let mine = queue.create(NewJob::new("direct")).await.unwrap();
    let theirs = queue.create(NewJob::new("direct")).await.unwrap();
    queue.mark_running(&mine, "alive").await.unwrap();
    queue.mark_running(&theirs, "dead").await.unwrap();
    clock.advance(chrono::Duration::minutes(90));

    let reclaimed = queue
        .clear_stuck_except(Duration::from_secs(3600), &["alive".to_string()])
        .await
        .unwrap();
    assert_eq!(reclaimed.len(), 1);
    assert_eq!(reclaimed[0].0, theirs);
    assert_eq!(queue.get(&mine).await.unwrap().unwrap().status, JobStatus::Running);
}

#[tokio::test]
async fn test_cleanup_old_removes_terminal_only() {
    let clock = clock();
    let queue = queue_with(&clock).await;

    let done = queue.create(NewJob::new("direct")).await.unwrap();
    queue.mark_running(&done, "w").await.unwrap();
    queue.mark_completed(&done, serde_json::json!({})).await.unwrap();
    let waiting = queue.create(NewJob::new("direct")).await.unwrap();

    clock.advance(chrono::Duration::days(8));
    assert_eq!(queue.cleanup_old(7).await.unwrap(), 1);
    assert!(queue.get(&done).await.unwrap().is_none());
    assert!(queue.get(&waiting).await.unwrap().is_some());
}

#[tokio::test]
async fn test_stats_history_pending() {
    let clock = clock();
    let queue = queue_with(&clock).await;

    let a = queue.create(NewJob::new("direct")).await.unwrap();
    let _b = queue
        .create(NewJob::new("social").with_priority(JobPriority::High))
        .await
        .unwrap();
    let c = queue.create(NewJob::new("direct")).await.unwrap();
    queue.mark_running(&a, "w").await.unwrap();
    queue.mark_completed(&a, serde_json::json!({})).await.unwrap();
    queue.mark_running(&c, "w").await.unwrap();

    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.count(JobStatus::Completed), 1);
    assert_eq!(stats.count(JobStatus::Running), 1);
    assert_eq!(stats.count(JobStatus::Pending), 1);
    assert_eq!(stats.completed_today, 1);

    assert_eq!(queue.history(2).await.unwrap().len(), 2);
    assert_eq!(queue.pending(None).await.unwrap().len(), 1);
    assert_eq!(queue.pending(Some("direct")).await.unwrap().len(), 0);
    assert_eq!(queue.running().await.unwrap()[0].id, c);
}
