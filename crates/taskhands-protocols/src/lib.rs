//! # TaskHands Protocols
//!
//! Seams shared by every TaskHands crate: time, retry policy, executors and
//! notification sinks.

pub mod executor;
pub mod notify;
pub mod policy;
pub mod time;

pub use executor::{ExecutionStats, Executor, ExecutorError, FnExecutor, JobPayload};
pub use notify::{MemorySink, NoopSink, Notification, NotificationSink};
pub use policy::{BackoffPolicy, RetryDecision};
pub use time::{ManualTimeProvider, SystemTimeProvider, TimeProvider};
