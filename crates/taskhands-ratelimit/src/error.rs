//! Rate limiter errors.

use thiserror::Error;

/// Rate limiter error types.
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// Reading or writing the state file failed.
    #[error("Rate limit persistence failed: {0}")]
    Persistence(String),

    /// The state file exists but is not valid.
    #[error("Invalid rate limit state: {0}")]
    InvalidState(#[from] serde_json::Error),
}

impl From<std::io::Error> for RateLimitError {
    fn from(e: std::io::Error) -> Self {
        RateLimitError::Persistence(e.to_string())
    }
}
