//! Remote alert channels (Telegram, JSON webhook).

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::alerts::{Alert, AlertChannel};
use crate::error::MonitorError;

const TELEGRAM_API: &str = "https://api.telegram.org";
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(SEND_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

async fn check_response(channel: &str, response: reqwest::Response) -> Result<(), MonitorError> {
    if response.status().is_success() {
        debug!("{} alert sent", channel);
        return Ok(());
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(MonitorError::Alert(format!("{} returned {}: {}", channel, status, body)))
}

/// Telegram bot channel.
pub struct TelegramChannel {
    bot_token: String,
    chat_id: String,
    api_base: String,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(bot_token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
            chat_id: chat_id.into(),
            api_base: TELEGRAM_API.to_string(),
            client: http_client(),
        }
    }

    /// Point the channel at a different Bot API host.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl AlertChannel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, alert: &Alert) -> Result<(), MonitorError> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.bot_token);
        let payload = serde_json::json!({
            "chat_id": self.chat_id,
            "text": alert.format_markdown(),
            "parse_mode": "Markdown",
        });

        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| MonitorError::Alert(format!("Telegram request failed: {}", e)))?;
        check_response("Telegram API", response).await
    }
}

/// Posts the alert as JSON to an arbitrary URL.
pub struct WebhookChannel {
    url: String,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: http_client(),
        }
    }
}

#[async_trait]
impl AlertChannel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, alert: &Alert) -> Result<(), MonitorError> {
        let response = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({
                "title": alert.title,
                "message": alert.message,
                "severity": alert.severity,
                "source": alert.source,
                "details": alert.details,
                "timestamp": alert.timestamp,
                "text": alert.format_text(),
            }))
            .send()
            .await
            .map_err(|e| MonitorError::Alert(format!("Webhook request failed: {}", e)))?;
        check_response("Webhook", response).await
    }
}
