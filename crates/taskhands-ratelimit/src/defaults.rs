//! Built-in API quotas.

use std::collections::HashMap;

use taskhands_config::ApiLimitConfig;

const DAY: u64 = 86_400;
const HOUR: u64 = 3_600;
const MINUTE: u64 = 60;
const MONTH: u64 = 30 * DAY;

/// Quotas of the APIs the bundled executors talk to.
pub fn default_limits() -> HashMap<String, ApiLimitConfig> {
    [
        ("google_search", ApiLimitConfig::new(100, DAY, 60)),
        ("google_pagespeed", ApiLimitConfig::new(25_000, DAY, 1)),
        ("trustpilot", ApiLimitConfig::new(100, HOUR, 120)),
        ("reddit", ApiLimitConfig::new(60, MINUTE, 10)),
        ("staffkit", ApiLimitConfig::new(1_000, HOUR, 1)),
        ("hunter", ApiLimitConfig::new(25, MONTH, 3_600)),
    ]
    .into_iter()
    .map(|(api, cfg)| (api.to_string(), cfg))
    .collect()
}
