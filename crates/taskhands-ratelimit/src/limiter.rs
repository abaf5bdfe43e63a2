//! Sliding-window limiter.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use taskhands_config::ApiLimitConfig;
use taskhands_protocols::{BackoffPolicy, TimeProvider};

use crate::defaults::default_limits;
use crate::error::RateLimitError;

#[cfg(test)]
#[path = "limiter_tests.rs"]
mod tests;

/// Exponent cap for throttling backoff.
const MAX_BACKOFF_EXPONENT: u32 = 6;
/// Longest single sleep inside `wait_if_needed`.
const MAX_WAIT_SLICE: Duration = Duration::from_secs(30);

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct Sample {
    at: DateTime<Utc>,
    count: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ApiState {
    samples: VecDeque<Sample>,
    backoff_until: Option<DateTime<Utc>>,
    backoff_attempts: u32,
}

impl ApiState {
    fn prune(&mut self, now: DateTime<Utc>, window: Duration) {
        let window = to_chrono(window);
        while let Some(front) = self.samples.front() {
            if now - front.at >= window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    fn current(&self) -> u64 {
        self.samples.iter().map(|s| s.count).sum()
    }

    fn in_backoff(&self, now: DateTime<Utc>) -> bool {
        self.backoff_until.is_some_and(|until| until > now)
    }
}

/// Usage snapshot for one API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitStatus {
    pub api: String,
    pub current: u64,
    pub limit: u64,
    pub remaining: u64,
    /// Usage in percent, one decimal.
    pub percentage: f64,
    pub window_secs: u64,
    /// Seconds until the oldest sample leaves the window.
    pub resets_in_secs: u64,
    pub in_backoff: bool,
    pub backoff_until: Option<DateTime<Utc>>,
    pub backoff_attempts: u32,
}

#[derive(Default)]
struct Inner {
    configs: HashMap<String, ApiLimitConfig>,
    states: HashMap<String, ApiState>,
}

/// Per-API rate limiter guarded by a single mutex.
pub struct RateLimiter {
    inner: Mutex<Inner>,
    clock: Arc<dyn TimeProvider>,
    persist_path: Option<PathBuf>,
}

impl RateLimiter {
    /// Limiter with explicit quotas.
    pub fn new(configs: HashMap<String, ApiLimitConfig>, clock: Arc<dyn TimeProvider>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                configs,
                states: HashMap::new(),
            }),
            clock,
            persist_path: None,
        }
    }

    /// Limiter with the built-in quotas, overridden by `overrides`.
    pub fn with_defaults(overrides: &HashMap<String, ApiLimitConfig>, clock: Arc<dyn TimeProvider>) -> Self {
        let mut configs = default_limits();
        configs.extend(overrides.iter().map(|(api, cfg)| (api.clone(), *cfg)));
        Self::new(configs, clock)
    }

    /// Persist samples and backoff state to `path`, loading what is there.
    pub fn with_persistence(mut self, path: impl AsRef<Path>) -> Result<Self, RateLimitError> {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            if !raw.trim().is_empty() {
                let states: HashMap<String, ApiState> = serde_json::from_str(&raw)?;
                info!("Loaded rate limit state for {} APIs", states.len());
                self.inner.get_mut().states = states;
            }
        }
        self.persist_path = Some(path);
        Ok(self)
    }

    /// Add or replace the quota for an API.
    pub fn register(&self, api: &str, config: ApiLimitConfig) {
        self.inner.lock().configs.insert(api.to_string(), config);
    }

    /// Whether a request to `api` is allowed right now.
    ///
    /// Unknown APIs are unlimited.
    pub fn can_request(&self, api: &str) -> bool {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let Some(config) = inner.configs.get(api).copied() else {
            return true;
        };
        let state = inner.states.entry(api.to_string()).or_default();
        if state.in_backoff(now) {
            return false;
        }
        state.prune(now, config.window());
        state.current() < config.limit
    }

    /// Record `count` requests made to `api`.
    pub fn track_request(&self, api: &str, count: u64) {
        let now = self.clock.now();
        {
            let mut inner = self.inner.lock();
            let Some(config) = inner.configs.get(api).copied() else {
                return;
            };
            let state = inner.states.entry(api.to_string()).or_default();
            state.prune(now, config.window());
            state.samples.push_back(Sample { at: now, count });
        }
        self.persist();
    }

    /// Record a failed request and start a backoff.
    ///
    /// Throttling responses back off exponentially, other errors linearly.
    /// Returns the backoff applied, or `None` for unknown APIs.
    pub fn track_error(&self, api: &str, is_rate_limit: bool) -> Option<Duration> {
        let now = self.clock.now();
        let delay = {
            let mut inner = self.inner.lock();
            let config = inner.configs.get(api).copied()?;
            let state = inner.states.entry(api.to_string()).or_default();
            state.backoff_attempts += 1;

            let policy = BackoffPolicy::exponential(config.backoff_base())
                .with_max_exponent(MAX_BACKOFF_EXPONENT);
            let delay = if is_rate_limit {
                policy.delay_for(state.backoff_attempts)
            } else {
                policy.linear_delay_for(state.backoff_attempts)
            };

            let until = now + to_chrono(delay);
            state.backoff_until = Some(until);
            warn!(
                api,
                attempts = state.backoff_attempts,
                "Backing off for {}s (rate limit: {})",
                delay.as_secs(),
                is_rate_limit
            );
            delay
        };
        self.persist();
        Some(delay)
    }

    /// Clear backoff after a successful request.
    pub fn reset_backoff(&self, api: &str) {
        let changed = {
            let mut inner = self.inner.lock();
            match inner.states.get_mut(api) {
                Some(state) if state.backoff_attempts > 0 || state.backoff_until.is_some() => {
                    state.backoff_attempts = 0;
                    state.backoff_until = None;
                    true
                }
                _ => false,
            }
        };
        if changed {
            debug!(api, "Backoff reset");
            self.persist();
        }
    }

    /// Usage snapshot for one API; `None` for unknown APIs.
    pub fn status(&self, api: &str) -> Option<RateLimitStatus> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let config = inner.configs.get(api).copied()?;
        let state = inner.states.entry(api.to_string()).or_default();
        Some(Self::snapshot(api, &config, state, now))
    }

    /// Usage snapshots for every configured API, sorted by name.
    pub fn all_status(&self) -> BTreeMap<String, RateLimitStatus> {
        let now = self.clock.now();
        let mut guard = self.inner.lock();
        let Inner { configs, states } = &mut *guard;
        configs
            .iter()
            .map(|(api, config)| {
                let state = states.entry(api.clone()).or_default();
                (api.clone(), Self::snapshot(api, config, state, now))
            })
            .collect()
    }

    /// APIs in backoff or above `threshold_percent` of their quota.
    pub fn saturated(&self, threshold_percent: f64) -> Vec<RateLimitStatus> {
        self.all_status()
            .into_values()
            .filter(|s| s.in_backoff || s.percentage > threshold_percent)
            .collect()
    }

    /// Suggested pause between requests given current usage.
    pub fn recommended_delay(&self, api: &str) -> Duration {
        let percentage = self.status(api).map(|s| s.percentage).unwrap_or(0.0);
        if percentage > 90.0 {
            Duration::from_secs(10)
        } else if percentage > 75.0 {
            Duration::from_secs(5)
        } else if percentage > 50.0 {
            Duration::from_secs(2)
        } else {
            Duration::from_millis(500)
        }
    }

    /// Wait until `api` accepts a request, up to `max_wait`.
    ///
    /// Returns `false` if the wait timed out.
    pub async fn wait_if_needed(&self, api: &str, max_wait: Duration) -> bool {
        let started = tokio::time::Instant::now();
        loop {
            if self.can_request(api) {
                return true;
            }

            let elapsed = started.elapsed();
            if elapsed >= max_wait {
                warn!(api, "Gave up waiting for rate limit after {}s", elapsed.as_secs());
                return false;
            }

            let until_ready = self.time_until_ready(api).unwrap_or(MAX_WAIT_SLICE);
            let slice = until_ready
                .min(MAX_WAIT_SLICE)
                .min(max_wait - elapsed)
                .max(Duration::from_secs(1));
            debug!(api, "Rate limited, sleeping {}s", slice.as_secs());
            tokio::time::sleep(slice).await;
        }
    }

    fn time_until_ready(&self, api: &str) -> Option<Duration> {
        let status = self.status(api)?;
        let now = self.clock.now();
        let backoff = status
            .backoff_until
            .filter(|_| status.in_backoff)
            .and_then(|until| (until - now).to_std().ok())
            .unwrap_or(Duration::ZERO);
        let window = if status.remaining == 0 {
            Duration::from_secs(status.resets_in_secs)
        } else {
            Duration::ZERO
        };
        Some(backoff.max(window))
    }

    fn snapshot(api: &str, config: &ApiLimitConfig, state: &mut ApiState, now: DateTime<Utc>) -> RateLimitStatus {
        state.prune(now, config.window());
        let current = state.current();
        let percentage = if config.limit == 0 {
            100.0
        } else {
            (current as f64 / config.limit as f64 * 1000.0).round() / 10.0
        };
        let resets_in_secs = state
            .samples
            .front()
            .and_then(|oldest| (oldest.at + to_chrono(config.window()) - now).to_std().ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);

        RateLimitStatus {
            api: api.to_string(),
            current,
            limit: config.limit,
            remaining: config.limit.saturating_sub(current),
            percentage,
            window_secs: config.window_secs,
            resets_in_secs,
            in_backoff: state.in_backoff(now),
            backoff_until: state.backoff_until,
            backoff_attempts: state.backoff_attempts,
        }
    }

    fn persist(&self) {
        let Some(path) = &self.persist_path else {
            return;
        };
        let json = {
            let inner = self.inner.lock();
            serde_json::to_string_pretty(&inner.states)
        };
        let result = json
            .map_err(RateLimitError::from)
            .and_then(|json| std::fs::write(path, json).map_err(RateLimitError::from));
        if let Err(e) = result {
            warn!("Failed to persist rate limit state to {}: {}", path.display(), e);
        }
    }
}
