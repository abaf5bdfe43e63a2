//! Notification sink seam.
//!
//! Calls are fire-and-forget: a sink must never block the caller or report
//! delivery failures back into the engine.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::executor::ExecutionStats;

/// A lifecycle notification emitted by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    /// The worker came up.
    Started,
    /// A job finished with results.
    Completed {
        task_type: String,
        stats: ExecutionStats,
        duration: Duration,
    },
    /// A recoverable failure.
    Error { source: String, message: String },
    /// Manual intervention required.
    Critical { message: String },
    /// Informational state change (pause, resume, shutdown).
    Status { message: String },
}

/// Receiver of engine notifications.
pub trait NotificationSink: Send + Sync {
    /// Deliver a notification without waiting for it to be sent.
    fn notify(&self, notification: Notification);

    fn notify_started(&self) {
        self.notify(Notification::Started);
    }

    fn notify_completed(&self, task_type: &str, stats: ExecutionStats, duration: Duration) {
        self.notify(Notification::Completed {
            task_type: task_type.to_string(),
            stats,
            duration,
        });
    }

    fn notify_error(&self, source: &str, message: &str) {
        self.notify(Notification::Error {
            source: source.to_string(),
            message: message.to_string(),
        });
    }

    fn notify_critical(&self, message: &str) {
        self.notify(Notification::Critical {
            message: message.to_string(),
        });
    }

    fn notify_status(&self, message: &str) {
        self.notify(Notification::Status {
            message: message.to_string(),
        });
    }
}

/// Sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl NotificationSink for NoopSink {
    fn notify(&self, _notification: Notification) {}
}

/// Sink that records notifications in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything received so far.
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }

    /// Number of critical notifications received.
    pub fn critical_count(&self) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|n| matches!(n, Notification::Critical { .. }))
            .count()
    }
}

impl NotificationSink for MemorySink {
    fn notify(&self, notification: Notification) {
        self.sent.lock().push(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_records_helpers() {
        let sink = MemorySink::new();
        sink.notify_started();
        sink.notify_error("Worker", "boom");
        sink.notify_critical("down");

        let sent = sink.sent();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0], Notification::Started);
        assert_eq!(
            sent[1],
            Notification::Error { source: "Worker".into(), message: "boom".into() }
        );
        assert_eq!(sink.critical_count(), 1);
    }

    #[test]
    fn test_notification_serializes_with_kind() {
        let json = serde_json::to_value(Notification::Critical { message: "x".into() }).unwrap();
        assert_eq!(json["kind"], "critical");
    }
}
