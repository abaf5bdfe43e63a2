use super::*;

use async_trait::async_trait;
use chrono::TimeZone;
use taskhands_config::{QueueConfig, WorkerConfig};
use taskhands_protocols::{ManualTimeProvider, MemorySink, Notification, TimeProvider};
use taskhands_workqueue::{ExecutorRegistry, JobQueue};

struct Harness {
    clock: ManualTimeProvider,
    store: Store,
    worker: Arc<WorkerLoop>,
    sink: MemorySink,
    monitor: HealthMonitor,
}

fn monitor_config() -> MonitorConfig {
    MonitorConfig {
        disk_path: std::env::temp_dir(),
        disk_min_free_percent: 0.0,
        recovery_stop_timeout_secs: 1,
        ..Default::default()
    }
}

async fn harness(config: MonitorConfig) -> Harness {
    let clock = ManualTimeProvider::new(Utc.with_ymd_and_hms(2026, 10, 18, 9, 0, 0).unwrap());
    let store = Store::open_in_memory(Arc::new(clock.clone())).await.unwrap();
    let queue = JobQueue::new(store.clone(), &QueueConfig::default());
    let sink = MemorySink::new();
    // The loop itself must not refresh the heartbeat during these tests;
    // only `start()` does.
    let worker = Arc::new(WorkerLoop::new(
        queue,
        Arc::new(ExecutorRegistry::new()),
        Arc::new(sink.clone()),
        WorkerConfig {
            heartbeat_interval_secs: 3600,
            ..Default::default()
        },
    ));
    let monitor = HealthMonitor::new(store.clone(), worker.clone(), Arc::new(sink.clone()), config);
    Harness {
        clock,
        store,
        worker,
        sink,
        monitor,
    }
}

struct Fixed {
    healthy: bool,
}

#[async_trait]
impl HealthCheckable for Fixed {
    async fn check(&self) -> HealthCheck {
        if self.healthy {
            HealthCheck::healthy("fixed", "ok")
        } else {
            HealthCheck::unhealthy("fixed", "backend down")
        }
    }
}

fn criticals(sink: &MemorySink) -> usize {
    sink.critical_count()
}

#[tokio::test]
async fn test_healthy_cycle() {
    let h = harness(monitor_config()).await;
    h.worker.start().await.unwrap();

    let cycle = h.monitor.check_now().await.unwrap();
    assert!(cycle.healthy, "{:?}", cycle.issues);
    assert_eq!(cycle.checks.len(), 5);
    assert!(cycle.recovery.is_none());

    let status = h.monitor.get_health_status();
    assert_eq!(status.last_healthy, Some(h.clock.now()));
    assert_eq!(status.recovery_attempts, 0);
    assert!(!status.monitoring);

    h.worker.stop(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn test_stale_heartbeat_restarts_worker() {
    let h = harness(monitor_config()).await;
    h.worker.start().await.unwrap();
    h.clock.advance(chrono::Duration::seconds(150));

    let cycle = h.monitor.check_now().await.unwrap();
    assert!(!cycle.healthy);
    assert_eq!(cycle.issues, vec!["heartbeat: Last heartbeat 150s ago (STALE)".to_string()]);
    assert_eq!(cycle.recovery, Some(RecoveryAction::Restarted { attempt: 1, max: 3 }));

    // restart wrote a fresh heartbeat
    assert_eq!(h.store.last_heartbeat().await.unwrap(), Some(h.clock.now()));
    assert!(h.worker.is_alive());
    assert_eq!(h.store.recent_events(10, Some("recovery_attempted")).await.unwrap().len(), 1);

    let sent = h.sink.sent();
    assert!(sent.contains(&Notification::Error {
        source: "Health Check".into(),
        message: "heartbeat: Last heartbeat 150s ago (STALE)".into(),
    }));
    assert!(sent.iter().any(|n| matches!(n, Notification::Status { message } if message.contains("(1/3)"))));

    h.worker.stop(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn test_escalates_once_after_budget() {
    let h = harness(monitor_config()).await;
    h.worker.start().await.unwrap();

    for attempt in 1..=3 {
        h.clock.advance(chrono::Duration::seconds(150));
        let cycle = h.monitor.check_now().await.unwrap();
        assert_eq!(cycle.recovery, Some(RecoveryAction::Restarted { attempt, max: 3 }));
        assert_eq!(h.store.worker_status().await.unwrap(), WorkerStatus::Running);
        assert_eq!(criticals(&h.sink), 0);
    }

    h.clock.advance(chrono::Duration::seconds(150));
    let cycle = h.monitor.check_now().await.unwrap();
    assert_eq!(cycle.recovery, Some(RecoveryAction::Escalated));
    assert_eq!(h.store.worker_status().await.unwrap(), WorkerStatus::Error);
    assert!(!h.worker.is_alive());
    assert_eq!(criticals(&h.sink), 1);

    // further unhealthy cycles neither restart nor alert again
    h.clock.advance(chrono::Duration::seconds(150));
    let cycle = h.monitor.check_now().await.unwrap();
    assert_eq!(cycle.recovery, Some(RecoveryAction::AwaitingOperator));
    assert!(cycle.issues.iter().any(|i| i == "worker_status: Worker in error state"));
    assert!(!h.worker.is_alive());
    assert_eq!(criticals(&h.sink), 1);

    let status = h.monitor.get_health_status();
    assert!(status.escalated);
    assert_eq!(status.recovery_attempts, 3);
    assert_eq!(h.store.recent_events(10, Some("worker_escalated")).await.unwrap().len(), 1);
    assert_eq!(h.store.recent_events(10, Some("recovery_attempted")).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_healthy_cycle_rearms_escalation() {
    let h = harness(MonitorConfig {
        max_recovery_attempts: 1,
        ..monitor_config()
    })
    .await;
    h.worker.start().await.unwrap();

    for _ in 0..2 {
        h.clock.advance(chrono::Duration::seconds(150));
        h.monitor.check_now().await.unwrap();
    }
    assert_eq!(criticals(&h.sink), 1);

    // operator brings the worker back
    h.worker.start().await.unwrap();
    assert!(h.monitor.check_now().await.unwrap().healthy);
    let status = h.monitor.get_health_status();
    assert!(!status.escalated);
    assert_eq!(status.recovery_attempts, 0);

    for _ in 0..2 {
        h.clock.advance(chrono::Duration::seconds(150));
        h.monitor.check_now().await.unwrap();
    }
    assert_eq!(criticals(&h.sink), 2);
}

#[tokio::test]
async fn test_other_failures_do_not_restart_worker() {
    let h = harness(monitor_config()).await;
    h.worker.start().await.unwrap();
    h.monitor.register_check("backend", Arc::new(Fixed { healthy: false }));

    let cycle = h.monitor.check_now().await.unwrap();
    assert!(!cycle.healthy);
    assert_eq!(cycle.issues, vec!["backend: backend down".to_string()]);
    assert!(cycle.recovery.is_none());
    assert_eq!(h.monitor.get_health_status().recovery_attempts, 0);

    h.worker.stop(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn test_register_check_replaces_by_name() {
    let h = harness(monitor_config()).await;
    h.worker.start().await.unwrap();

    h.monitor.register_check("connectivity", Arc::new(Fixed { healthy: false }));
    h.monitor.register_check("connectivity", Arc::new(Fixed { healthy: true }));
    assert_eq!(
        h.monitor.check_names(),
        ["heartbeat", "worker_status", "connectivity", "disk", "rate_limits"]
    );

    let cycle = h.monitor.check_now().await.unwrap();
    assert!(cycle.healthy);
    let connectivity = cycle.checks.iter().find(|c| c.name == "connectivity").unwrap();
    assert_eq!(connectivity.message, "ok");
    assert_eq!(connectivity.timestamp, h.clock.now());

    h.worker.stop(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn test_history_is_bounded() {
    let h = harness(MonitorConfig {
        history_limit: 3,
        ..monitor_config()
    })
    .await;
    h.worker.start().await.unwrap();

    for _ in 0..5 {
        h.clock.advance(chrono::Duration::seconds(1));
        h.monitor.check_now().await.unwrap();
    }

    let history = h.monitor.get_health_history(20);
    assert_eq!(history.len(), 3);
    assert_eq!(history[2].timestamp, h.clock.now());

    let last_two = h.monitor.get_health_history(2);
    assert_eq!(last_two.len(), 2);
    assert_eq!(last_two[1].timestamp, h.clock.now());

    h.worker.stop(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn test_periodic_loop() {
    let h = harness(MonitorConfig {
        check_interval_secs: 1,
        ..monitor_config()
    })
    .await;
    h.worker.start().await.unwrap();

    h.monitor.start();
    assert!(h.monitor.is_running());

    for _ in 0..40 {
        if !h.monitor.get_health_history(20).is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(!h.monitor.get_health_history(20).is_empty());

    h.monitor.stop();
    assert!(!h.monitor.is_running());
    h.worker.stop(Duration::from_secs(1)).await.unwrap();
}
