use crate::error::DeliveryError;
use crate::events::ChannelKind;
use log::{debug, info};
use reqwest::Client;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// A transport that can deliver rendered text to a recipient
#[cfg_attr(test, mockall::automock)]
pub trait Channel: Send + Sync {
    /// Deliver `text` to `recipient`
    ///
    /// # Errors
    ///
    /// Returns a `DeliveryError` describing why the transport refused or failed.
    fn deliver(&self, recipient: &str, text: &str) -> Result<(), DeliveryError>;
}

/// Channel kind -> transport lookup table
pub type ChannelTable = HashMap<ChannelKind, Arc<dyn Channel>>;

/// Channel that writes notifications to the application log
#[derive(Debug, Clone, Copy)]
pub struct LogChannel {
    kind: ChannelKind,
}

impl LogChannel {
    pub fn new(kind: ChannelKind) -> Self {
        Self { kind }
    }
}

impl Channel for LogChannel {
    fn deliver(&self, recipient: &str, text: &str) -> Result<(), DeliveryError> {
        let title = text.lines().next().unwrap_or_default();
        info!("[{}] -> {}: {}", self.kind, recipient, title);
        debug!("[{}] full text for {}:\n{}", self.kind, recipient, text);
        Ok(())
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    recipient: &'a str,
    text: &'a str,
}

/// Channel that POSTs `{recipient, text}` as JSON to a fixed URL
pub struct WebhookChannel {
    client: Client,
    url: String,
    runtime: tokio::runtime::Runtime,
}

impl WebhookChannel {
    /// Create a webhook channel
    ///
    /// # Arguments
    ///
    /// * `url` - Endpoint receiving the JSON payload
    /// * `timeout` - Per-request HTTP timeout
    ///
    /// # Errors
    ///
    /// Fails when the HTTP client or its runtime cannot be created.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, DeliveryError> {
        let client = Client::builder().timeout(timeout).no_proxy().build()?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("webhook-channel")
            .enable_all()
            .build()?;

        Ok(Self {
            client,
            url: url.into(),
            runtime,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Channel for WebhookChannel {
    fn deliver(&self, recipient: &str, text: &str) -> Result<(), DeliveryError> {
        let payload = WebhookPayload { recipient, text };
        self.runtime.block_on(async {
            let response = self.client.post(&self.url).json(&payload).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(DeliveryError::Failed(format!(
                    "webhook {} returned {}",
                    self.url, status
                )));
            }
            debug!("Webhook delivered to {} ({})", recipient, status);
            Ok(())
        })
    }
}

/// One `LogChannel` per kind, plus the webhook when a URL is configured
///
/// # Errors
///
/// Fails when the webhook channel cannot be created.
pub fn default_channels(
    webhook_url: Option<&str>,
    webhook_timeout: Duration,
) -> Result<ChannelTable, DeliveryError> {
    let mut channels: ChannelTable = HashMap::new();
    for kind in [ChannelKind::Chat, ChannelKind::Email, ChannelKind::Sms] {
        channels.insert(kind, Arc::new(LogChannel::new(kind)));
    }
    match webhook_url {
        Some(url) => {
            channels.insert(
                ChannelKind::Webhook,
                Arc::new(WebhookChannel::new(url, webhook_timeout)?),
            );
        }
        None => {
            channels.insert(ChannelKind::Webhook, Arc::new(LogChannel::new(ChannelKind::Webhook)));
        }
    }
    Ok(channels)
}
