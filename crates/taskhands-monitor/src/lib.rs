//! # TaskHands Monitor
//!
//! Watchdog and alerting for the job engine.
//!
//! ## Features
//!
//! - Periodic health checks: heartbeat age, worker liveness, connectivity,
//!   disk headroom, rate-limit saturation, plus custom checks
//! - Bounded automatic worker recovery with escalation to a terminal
//!   `error` status and a single critical alert
//! - Alert channels (log, Telegram, JSON webhook)
//! - Fire-and-forget notification sink backed by a bounded channel

pub mod alert_channels;
pub mod alerts;
pub mod checks;
pub mod error;
pub mod health;
pub mod notifier;

pub use alert_channels::{TelegramChannel, WebhookChannel};
pub use alerts::{Alert, AlertChannel, AlertSeverity, LogChannel};
pub use checks::{
    ConnectivityCheck, ConnectivityProbe, DiskCheck, HealthCheck, HealthCheckable, HeartbeatCheck, HttpProbe,
    RateLimitCheck, WorkerStatusCheck,
};
pub use error::MonitorError;
pub use health::{HealthCycle, HealthMonitor, HealthStatus, RecoveryAction};
pub use notifier::ChannelNotifier;
