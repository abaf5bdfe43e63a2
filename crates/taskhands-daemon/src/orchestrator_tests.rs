use super::*;

use std::time::Duration;

use taskhands_config::{ScheduleSeed, WorkerConfig};
use taskhands_protocols::{ExecutionStats, ExecutorError, FnExecutor, JobPayload, MemorySink, Notification};
use taskhands_workqueue::{JobSource, JobStatus};

struct Harness {
    orchestrator: Orchestrator,
    sink: MemorySink,
}

fn test_config() -> Config {
    let seed: ScheduleSeed = serde_json::from_value(json!({
        "id": "direct_hourly",
        "task_type": "direct",
        "description": "Hourly sweep",
        "interval_minutes": 60,
        "params": {"max_results": 10}
    }))
    .unwrap();

    let mut config = Config::default();
    config.worker = WorkerConfig {
        poll_interval_secs: 1,
        stop_timeout_secs: 2,
        ..Default::default()
    };
    config.scheduler.schedules = vec![seed];
    config
}

async fn harness() -> Harness {
    let clock: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let store = Store::open_in_memory(clock.clone()).await.unwrap();
    let executors = Arc::new(ExecutorRegistry::new());
    executors.register(
        "direct",
        Arc::new(FnExecutor::new(|_params: JobPayload| async {
            Ok::<_, ExecutorError>(ExecutionStats {
                items_found: 3,
                items_saved: 2,
                duplicates: 1,
                filtered: 0,
            })
        })),
    );
    let limiter = Arc::new(RateLimiter::with_defaults(&Default::default(), clock));
    let sink = MemorySink::new();
    let orchestrator = Orchestrator::build(test_config(), store, executors, limiter, Arc::new(sink.clone()));
    Harness { orchestrator, sink }
}

async fn wait_for_status(orchestrator: &Orchestrator, id: &str, status: JobStatus) {
    for _ in 0..100 {
        if orchestrator.get_job(id).await.unwrap().map(|j| j.status) == Some(status) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("job {} never reached {:?}", id, status);
}

#[tokio::test]
async fn test_start_and_stop() {
    let h = harness().await;
    let o = &h.orchestrator;

    o.start().await.unwrap();
    assert!(o.is_running());
    assert!(o.worker().is_alive());
    assert!(o.scheduler().is_running());
    assert!(o.monitor().is_running());
    assert_eq!(o.scheduler().timer_ids(), vec!["direct_hourly".to_string()]);
    assert_eq!(o.store().worker_status().await.unwrap(), WorkerStatus::Running);
    assert_eq!(o.store().recent_events(10, Some("orchestrator_started")).await.unwrap().len(), 1);

    // idempotent
    o.start().await.unwrap();

    o.stop().await.unwrap();
    assert!(!o.is_running());
    assert!(!o.worker().is_alive());
    assert!(!o.scheduler().is_running());
    assert!(!o.monitor().is_running());
    assert_eq!(o.store().worker_status().await.unwrap(), WorkerStatus::Stopped);
    assert_eq!(o.store().recent_events(10, Some("orchestrator_stopped")).await.unwrap().len(), 1);
    assert!(h.sink.sent().contains(&Notification::Status {
        message: "Engine stopped".into()
    }));

    // stopping twice is a no-op
    o.stop().await.unwrap();
}

#[tokio::test]
async fn test_added_job_is_executed() {
    let h = harness().await;
    let o = &h.orchestrator;
    o.start().await.unwrap();

    let id = o.add_job(NewJob::new("direct")).await.unwrap();
    wait_for_status(o, &id, JobStatus::Completed).await;

    let history = o.get_job_history(10).await.unwrap();
    assert!(history.iter().any(|j| j.id == id));

    let status = o.status().await.unwrap();
    assert_eq!(status.today.total_items_saved, 2);
    assert_eq!(status.queue.count(JobStatus::Completed), 1);

    o.stop().await.unwrap();
}

#[tokio::test]
async fn test_pause_keeps_scheduler_running() {
    let h = harness().await;
    let o = &h.orchestrator;
    o.start().await.unwrap();

    o.pause().await.unwrap();
    assert!(o.worker().is_paused());
    assert!(o.scheduler().is_running());
    let id = o.add_job(NewJob::new("direct")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(o.get_job(&id).await.unwrap().unwrap().status, JobStatus::Pending);
    assert_eq!(o.status().await.unwrap().worker_status, WorkerStatus::Paused);

    o.resume().await.unwrap();
    wait_for_status(o, &id, JobStatus::Completed).await;

    o.stop().await.unwrap();
}

#[tokio::test]
async fn test_cancel_pending_job() {
    let h = harness().await;
    let o = &h.orchestrator;

    let id = o.add_job(NewJob::new("direct")).await.unwrap();
    assert!(o.cancel_job(&id).await.unwrap());
    assert!(!o.cancel_job(&id).await.unwrap());
    assert_eq!(o.get_job(&id).await.unwrap().unwrap().status, JobStatus::Cancelled);
}

#[tokio::test]
async fn test_schedule_administration() {
    let h = harness().await;
    let o = &h.orchestrator;
    o.start().await.unwrap();

    let schedules = o.get_schedules().await.unwrap();
    assert_eq!(schedules.len(), 1);
    assert!(schedules[0].next_run.is_some());

    let updated = o
        .update_schedule("direct_hourly", ScheduleUpdate::enabled(false))
        .await
        .unwrap();
    assert!(!updated.enabled);
    assert!(o.scheduler().timer_ids().is_empty());

    let job_id = o.run_schedule_now("direct_hourly").await.unwrap();
    let job = o.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.source, JobSource::Manual);
    assert_eq!(job.params.as_str(), r#"{"max_results":10}"#);

    assert!(matches!(
        o.run_schedule_now("missing").await,
        Err(DaemonError::Scheduler(_))
    ));

    o.stop().await.unwrap();
}

#[tokio::test]
async fn test_status_snapshot_when_idle() {
    let h = harness().await;
    let status = h.orchestrator.status().await.unwrap();

    assert!(!status.running);
    assert!(status.uptime_secs.is_none());
    assert!(!status.worker.alive);
    assert_eq!(status.worker_status, WorkerStatus::Stopped);
    assert!(status.rate_limits.contains_key("reddit"));

    let json = serde_json::to_value(&status).unwrap();
    assert_eq!(json["worker_status"], "stopped");
    assert_eq!(json["health"]["max_recovery_attempts"], 3);
}

#[tokio::test]
async fn test_run_until_signal() {
    let h = harness().await;
    let orchestrator = Arc::new(h.orchestrator);

    let runner = orchestrator.clone();
    let task = tokio::spawn(async move { runner.run_until_signal().await });

    for _ in 0..100 {
        if orchestrator.is_running() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(orchestrator.is_running());

    orchestrator.signals().request_shutdown();
    tokio::time::timeout(Duration::from_secs(10), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(!orchestrator.is_running());
    assert!(!orchestrator.worker().is_alive());
}
