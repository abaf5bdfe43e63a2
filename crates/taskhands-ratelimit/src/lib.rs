//! # TaskHands Rate Limit
//!
//! Sliding-window request quotas per external API, with exponential backoff
//! after errors. Executors consult the limiter before outbound calls and the
//! health monitor inspects it for saturation.

pub mod defaults;
pub mod error;
pub mod limiter;

pub use defaults::default_limits;
pub use error::RateLimitError;
pub use limiter::{RateLimitStatus, RateLimiter};
