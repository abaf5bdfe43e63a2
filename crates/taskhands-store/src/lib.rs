//! # TaskHands Store
//!
//! Embedded transactional store shared by every TaskHands component.
//!
//! ## Tables
//!
//! - `jobs` and `schedules` (owned by the queue and scheduler crates)
//! - `daily_counters` per (date, task type, counter)
//! - `run_history` of executor runs
//! - `events` audit log
//! - `worker_state` key/value pairs (heartbeat, worker status)

pub mod codec;
pub mod error;
pub mod history;
pub mod schema;
pub mod state;
pub mod store;

pub use codec::{format_ts, parse_opt_ts, parse_ts};
pub use error::StoreError;
pub use history::{DailyStats, EventRecord, RunOutcome, RunRecord, RunStatus, COUNTER_ITEMS_SAVED, COUNTER_RUNS};
pub use state::{WorkerStatus, KEY_LAST_HEARTBEAT, KEY_WORKER_STATUS};
pub use store::Store;
