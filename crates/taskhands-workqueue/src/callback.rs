//! Completion webhook.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::error::QueueError;

/// Body POSTed to a job's `callback_url`.
#[derive(Debug, Clone, Serialize)]
pub struct CallbackPayload<'a> {
    pub job_id: &'a str,
    pub status: &'a str,
    pub result: &'a serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// HTTP client for completion callbacks.
#[derive(Clone)]
pub struct CallbackClient {
    client: reqwest::Client,
}

impl CallbackClient {
    /// Create a client whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }

    /// POST the payload to `url`. Non-2xx responses are errors.
    pub async fn send(&self, url: &str, payload: &CallbackPayload<'_>) -> Result<(), QueueError> {
        let response = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| QueueError::Callback(format!("request to {} failed: {}", url, e)))?;

        if response.status().is_success() {
            debug!(job_id = %payload.job_id, "Callback delivered");
            Ok(())
        } else {
            Err(QueueError::Callback(format!(
                "{} returned {}",
                url,
                response.status()
            )))
        }
    }
}
