//! # TaskHands Daemon
//!
//! Composition root for the job engine.
//!
//! ## Features
//!
//! - [`Orchestrator`] builds every component from configuration and owns
//!   their start/stop ordering (worker, scheduler, monitor; reverse on stop)
//! - Administrative operations: enqueue, cancel, schedule edits, run-now,
//!   aggregated status
//! - Signal handling (SIGTERM/SIGINT for graceful shutdown)
//! - Instance lock next to the store so only one engine drives it
//!
//! ## Usage
//!
//! ```rust,ignore
//! use taskhands_daemon::Orchestrator;
//!
//! let orchestrator = Orchestrator::from_config(config, executors).await?;
//! orchestrator.run_until_signal().await?;
//! ```

pub mod error;
pub mod lock;
pub mod orchestrator;
pub mod signal;

pub use error::DaemonError;
pub use lock::InstanceLock;
pub use orchestrator::{EngineStatus, Orchestrator};
pub use signal::SignalHandler;
