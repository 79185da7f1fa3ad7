use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::NotifierConfig;

// Server → screen events
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ScreenEvent {
    #[serde(rename = "schedule_updated")]
    ScheduleUpdated { screen_id: i32, timestamp: String },
}

/// Tells a screen that what it should be showing may have changed.
/// Delivery is best effort; nothing in the core waits on it.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &ScreenEvent) -> Result<()>;
}

/// Records the event in the log and nothing else.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &ScreenEvent) -> Result<()> {
        tracing::debug!("Screen event: {:?}", event);
        Ok(())
    }
}

/// POSTs each event as JSON to a fixed URL.
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, event: &ScreenEvent) -> Result<()> {
        self.client
            .post(&self.url)
            .json(event)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

pub fn from_config(config: Option<&NotifierConfig>) -> Result<Arc<dyn Notifier>> {
    match config.and_then(|c| c.webhook_url.clone()) {
        Some(url) => {
            let timeout = Duration::from_secs(config.and_then(|c| c.timeout_secs).unwrap_or(5));
            tracing::info!("Screen notifications go to webhook {}", url);
            Ok(Arc::new(WebhookNotifier::new(url, timeout)?))
        }
        None => Ok(Arc::new(LogNotifier)),
    }
}

/// Fire-and-forget fan-out of `schedule_updated` to every listed screen.
pub fn notify_screens(notifier: Arc<dyn Notifier>, screen_ids: Vec<i32>) {
    if screen_ids.is_empty() {
        return;
    }

    tokio::spawn(async move {
        let timestamp = Utc::now().to_rfc3339();
        let events: Vec<ScreenEvent> = screen_ids
            .iter()
            .map(|screen_id| ScreenEvent::ScheduleUpdated {
                screen_id: *screen_id,
                timestamp: timestamp.clone(),
            })
            .collect();

        let results = join_all(events.iter().map(|event| notifier.notify(event))).await;
        for (screen_id, result) in screen_ids.iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!("Failed to notify screen {}: {}", screen_id, e);
            }
        }
    });
}
