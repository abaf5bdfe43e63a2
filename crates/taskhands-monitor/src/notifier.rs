//! Notification sink that hands alerts to a background dispatcher.
//!
//! `notify` never blocks: notifications go into a bounded channel and are
//! dropped with a warning when it is full. A single task drains the channel
//! and fans each alert out to every configured [`AlertChannel`].

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use taskhands_config::AlertsConfig;
use taskhands_protocols::{Notification, NotificationSink};

use crate::alert_channels::{TelegramChannel, WebhookChannel};
use crate::alerts::{Alert, AlertChannel, LogChannel};

pub struct ChannelNotifier {
    tx: Mutex<Option<mpsc::Sender<Notification>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    channel_names: Vec<String>,
}

impl ChannelNotifier {
    /// Spawn the dispatcher. Must be called inside a tokio runtime.
    pub fn spawn(channels: Vec<Arc<dyn AlertChannel>>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let channel_names = channels.iter().map(|c| c.name().to_string()).collect();
        let dispatcher = tokio::spawn(dispatch(rx, channels));

        Self {
            tx: Mutex::new(Some(tx)),
            dispatcher: Mutex::new(Some(dispatcher)),
            channel_names,
        }
    }

    /// Log channel plus whatever remote channels are configured.
    pub fn from_config(config: &AlertsConfig) -> Self {
        let mut channels: Vec<Arc<dyn AlertChannel>> = vec![Arc::new(LogChannel)];

        if let (Some(token), Some(chat_id)) = (&config.telegram_bot_token, &config.telegram_chat_id) {
            if !token.is_empty() && !chat_id.is_empty() {
                info!("Adding Telegram alert channel");
                channels.push(Arc::new(TelegramChannel::new(token, chat_id)));
            }
        }

        if let Some(url) = config.webhook_url.as_deref().filter(|u| !u.is_empty()) {
            info!("Adding webhook alert channel");
            channels.push(Arc::new(WebhookChannel::new(url)));
        }

        Self::spawn(channels, config.queue_capacity)
    }

    pub fn channel_names(&self) -> &[String] {
        &self.channel_names
    }

    /// Stop accepting notifications and wait for the queue to drain.
    pub async fn close(&self) {
        self.tx.lock().take();
        let dispatcher = self.dispatcher.lock().take();
        if let Some(dispatcher) = dispatcher {
            if let Err(e) = dispatcher.await {
                warn!("Alert dispatcher ended abnormally: {}", e);
            }
        }
    }
}

impl NotificationSink for ChannelNotifier {
    fn notify(&self, notification: Notification) {
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            return;
        };
        match tx.try_send(notification) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(n)) => {
                warn!("Alert queue full, dropping notification: {:?}", n);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

async fn dispatch(mut rx: mpsc::Receiver<Notification>, channels: Vec<Arc<dyn AlertChannel>>) {
    while let Some(notification) = rx.recv().await {
        let alert = Alert::from(&notification);
        for channel in &channels {
            if let Err(e) = channel.send(&alert).await {
                warn!("Failed to send alert via {}: {}", channel.name(), e);
            }
        }
    }
}
