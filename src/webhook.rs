//! Webhook Module
//!
//! This module posts per-file ingest outcomes to a remote webhook. It supports
//! retries with exponential backoff and properly handles timeouts. Delivery failures
//! are logged and never affect the file that triggered them.
use crate::ingest::{FileEvent, IngestObserver};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Serialize;
use std::time::Duration;
use tokio::time::sleep;

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    #[serde(flatten)]
    event: &'a FileEvent,
    timestamp: chrono::DateTime<chrono::Utc>,
    version: &'static str,
}

/// WebhookNotifier is responsible for sending ingest outcomes to a webhook URL.
#[derive(Debug)]
pub struct WebhookNotifier {
    client: Client,
    url: Url,
    max_retries: u32,
}

impl WebhookNotifier {
    /// Creates a new WebhookNotifier with the given URL, timeout, and retry count.
    pub fn new(url: impl AsRef<str>, timeout: Duration, max_retries: u32) -> Result<Self> {
        let url = Url::parse(url.as_ref()).context("Invalid webhook URL")?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            url,
            max_retries,
        })
    }

    /// Sends one event.
    ///
    /// Retries are attempted with exponential backoff. Returns an error if all retries fail.
    pub async fn send(&self, event: &FileEvent) -> Result<()> {
        let payload = WebhookPayload {
            event,
            timestamp: chrono::Utc::now(),
            version: env!("CARGO_PKG_VERSION"),
        };
        let mut last_error = None;
        for retry in 0..=self.max_retries {
            if retry > 0 {
                let delay = Duration::from_secs(2u64.pow(retry - 1));
                log::info!("Retrying webhook send in {:?}...", delay);
                sleep(delay).await;
            }
            match self.client.post(self.url.clone()).json(&payload).send().await {
                Ok(response) if response.status().is_success() => {
                    log::debug!("Sent webhook for {} (attempt {})", event.file, retry + 1);
                    return Ok(());
                }
                Ok(response) => {
                    let status = response.status();
                    let body = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "Unable to read response body".to_string());
                    log::warn!(
                        "Webhook attempt {} failed: HTTP {} - Response: {}",
                        retry + 1,
                        status,
                        body
                    );
                    last_error = Some(format!("HTTP {} - {}", status, body));
                }
                Err(e) => {
                    log::warn!("Webhook attempt {} encountered error: {}", retry + 1, e);
                    last_error = Some(if e.is_timeout() {
                        "timeout".to_string()
                    } else {
                        e.to_string()
                    });
                }
            }
        }
        Err(anyhow::anyhow!(
            "Webhook failed after {} attempts: {:?}",
            self.max_retries + 1,
            last_error
        ))
    }
}

#[async_trait]
impl IngestObserver for WebhookNotifier {
    async fn on_file(&self, event: &FileEvent) {
        if let Err(e) = self.send(event).await {
            log::error!("Webhook notification for {} dropped: {}", event.file, e);
        }
    }
}
