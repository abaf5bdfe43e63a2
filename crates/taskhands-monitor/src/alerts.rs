//! Alerts and the channel seam they are delivered through.

#[cfg(test)]
#[path = "alerts_tests.rs"]
mod tests;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use taskhands_protocols::Notification;

use crate::error::MonitorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertSeverity::Info => write!(f, "INFO"),
            AlertSeverity::Warning => write!(f, "WARNING"),
            AlertSeverity::Error => write!(f, "ERROR"),
            AlertSeverity::Critical => write!(f, "CRITICAL"),
        }
    }
}

impl AlertSeverity {
    pub fn emoji(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "\u{2139}\u{fe0f}",
            AlertSeverity::Warning => "\u{26a0}\u{fe0f}",
            AlertSeverity::Error => "\u{274c}",
            AlertSeverity::Critical => "\u{1f6a8}",
        }
    }
}

/// A rendered notification ready for a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub title: String,
    pub message: String,
    pub severity: AlertSeverity,
    pub timestamp: DateTime<Utc>,
    /// Component that raised the alert.
    pub source: Option<String>,
    pub details: Option<serde_json::Value>,
}

impl Alert {
    pub fn new(title: impl Into<String>, message: impl Into<String>, severity: AlertSeverity) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            severity,
            timestamp: Utc::now(),
            source: None,
            details: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Plain text rendering, used by the log channel and webhooks.
    pub fn format_text(&self) -> String {
        let mut text = format!(
            "[{}] {} - {}\n{}",
            self.severity,
            self.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            self.title,
            self.message
        );
        if let Some(ref source) = self.source {
            text.push_str(&format!("\nSource: {}", source));
        }
        text
    }

    /// Markdown rendering for chat channels.
    pub fn format_markdown(&self) -> String {
        let mut text = format!(
            "{} *{}* - {}\n\n{}",
            self.severity.emoji(),
            self.title,
            self.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            self.message
        );
        if let Some(ref source) = self.source {
            text.push_str(&format!("\n\n_Source: {}_", source));
        }
        text
    }
}

impl From<&Notification> for Alert {
    fn from(notification: &Notification) -> Self {
        match notification {
            Notification::Started => Alert::new("Worker started", "Job worker is up and polling", AlertSeverity::Info),
            Notification::Completed { task_type, stats, duration } => Alert::new(
                "Job completed",
                format!(
                    "Task: {}\nItems saved: {}\nFound: {} (duplicates: {}, filtered: {})\nDuration: {:.1}s",
                    task_type,
                    stats.items_saved,
                    stats.items_found,
                    stats.duplicates,
                    stats.filtered,
                    duration.as_secs_f64()
                ),
                AlertSeverity::Info,
            )
            .with_source(task_type.clone())
            .with_details(serde_json::to_value(stats).unwrap_or_default()),
            Notification::Error { source, message } => {
                Alert::new(format!("Error in {}", source), message.clone(), AlertSeverity::Error)
                    .with_source(source.clone())
            }
            Notification::Critical { message } => Alert::new(
                "Manual intervention required",
                message.clone(),
                AlertSeverity::Critical,
            ),
            Notification::Status { message } => Alert::new("Status", message.clone(), AlertSeverity::Info),
        }
    }
}

/// Delivery target for alerts.
#[async_trait]
pub trait AlertChannel: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, alert: &Alert) -> Result<(), MonitorError>;
}

/// Writes alerts to tracing.
pub struct LogChannel;

#[async_trait]
impl AlertChannel for LogChannel {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, alert: &Alert) -> Result<(), MonitorError> {
        match alert.severity {
            AlertSeverity::Info => info!("[ALERT] {}: {}", alert.title, alert.message),
            AlertSeverity::Warning => warn!("[ALERT] {}: {}", alert.title, alert.message),
            AlertSeverity::Error | AlertSeverity::Critical => {
                error!("[ALERT] {}: {}", alert.title, alert.message)
            }
        }
        Ok(())
    }
}
