//! Bounded exponential retry with a terminal escalation state.
//!
//! One policy object drives three things: job retry scheduling, rate limiter
//! backoff windows and health monitor recovery budgets.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[cfg(test)]
#[path = "policy_tests.rs"]
mod tests;

/// Largest exponent that still fits a `u32` shift.
const MAX_SHIFT: u32 = 31;

/// Outcome of consulting a [`BackoffPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after `delay`; `attempt` is the 1-based number of the retry.
    Retry { attempt: u32, delay: Duration },
    /// The budget is spent; escalate.
    Exhausted,
}

impl RetryDecision {
    /// Whether the policy allows another attempt.
    pub fn is_retry(&self) -> bool {
        matches!(self, RetryDecision::Retry { .. })
    }
}

/// Retry/backoff policy parameterised by base delay, cap and attempt budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    base: Duration,
    max_exponent: u32,
    max_delay: Option<Duration>,
    max_attempts: Option<u32>,
}

impl BackoffPolicy {
    /// Exponential policy `base * 2^attempt` without a cap or budget.
    pub fn exponential(base: Duration) -> Self {
        Self {
            base,
            max_exponent: MAX_SHIFT,
            max_delay: None,
            max_attempts: None,
        }
    }

    /// Clamp the exponent used by [`delay_for`](Self::delay_for).
    pub fn with_max_exponent(mut self, max_exponent: u32) -> Self {
        self.max_exponent = max_exponent.min(MAX_SHIFT);
        self
    }

    /// Cap any computed delay.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// Limit the number of retries before [`RetryDecision::Exhausted`].
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Base delay.
    pub fn base(&self) -> Duration {
        self.base
    }

    /// Attempt budget, if any.
    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    /// Exponential delay for the given number of prior attempts.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(self.max_exponent);
        self.cap(self.base.saturating_mul(1u32 << exponent))
    }

    /// Linear delay `base * attempt`, for failures that are not throttling.
    pub fn linear_delay_for(&self, attempt: u32) -> Duration {
        self.cap(self.base.saturating_mul(attempt))
    }

    /// Decide what to do after `attempts` retries have already been spent.
    pub fn decide(&self, attempts: u32) -> RetryDecision {
        match self.max_attempts {
            Some(max) if attempts >= max => RetryDecision::Exhausted,
            _ => RetryDecision::Retry {
                attempt: attempts + 1,
                delay: self.delay_for(attempts),
            },
        }
    }

    fn cap(&self, delay: Duration) -> Duration {
        match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::exponential(Duration::from_secs(60))
    }
}
