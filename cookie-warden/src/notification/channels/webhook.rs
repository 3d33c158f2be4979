//! Webhook channel: one JSON POST per event.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::NotificationChannel;
use crate::notification::events::{NotificationEvent, NotificationPriority};
use crate::{Error, Result};

/// Longest response body quoted in a delivery error.
const ERROR_BODY_LIMIT: usize = 200;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Display name used in logs.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub url: String,
    /// Sent as `Authorization: Bearer <token>`.
    #[serde(default)]
    pub bearer_token: Option<String>,
    /// Extra request headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Event types to deliver (`content_published`, `credential_invalid`, ...).
    /// Empty delivers everything.
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default)]
    pub min_priority: NotificationPriority,
    #[serde(default = "default_timeout", with = "crate::config::duration")]
    pub timeout: Duration,
}

fn default_enabled() -> bool {
    true
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            name: None,
            enabled: false,
            url: String::new(),
            bearer_token: None,
            headers: BTreeMap::new(),
            events: Vec::new(),
            min_priority: NotificationPriority::Normal,
            timeout: default_timeout(),
        }
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    event_type: &'static str,
    priority: NotificationPriority,
    title: String,
    description: String,
    timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    item_id: Option<&'a str>,
    data: &'a NotificationEvent,
}

impl<'a> WebhookPayload<'a> {
    fn new(event: &'a NotificationEvent) -> Self {
        Self {
            event_type: event.event_type(),
            priority: event.priority(),
            title: event.title(),
            description: event.description(),
            timestamp: event.timestamp(),
            item_id: event.item_id(),
            data: event,
        }
    }
}

pub struct WebhookChannel {
    config: WebhookConfig,
    client: Client,
}

impl WebhookChannel {
    /// Headers that do not parse are dropped with a warning.
    pub fn new(config: WebhookConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers(default_headers(&config))
            .build()
            .unwrap_or_default();

        Self { config, client }
    }

    fn wants(&self, event: &NotificationEvent) -> bool {
        self.config.events.is_empty()
            || self.config.events.iter().any(|e| e == event.event_type())
    }
}

fn default_headers(config: &WebhookConfig) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in &config.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!(header = %name, "Ignoring invalid webhook header"),
        }
    }
    if let Some(token) = &config.bearer_token {
        match HeaderValue::from_str(&format!("Bearer {token}")) {
            Ok(mut value) => {
                value.set_sensitive(true);
                headers.insert(AUTHORIZATION, value);
            }
            Err(_) => warn!("Ignoring webhook bearer token with invalid characters"),
        }
    }
    headers
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn channel_type(&self) -> &'static str {
        "webhook"
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled && !self.config.url.is_empty()
    }

    fn min_priority(&self) -> NotificationPriority {
        self.config.min_priority
    }

    async fn send(&self, event: &NotificationEvent) -> Result<()> {
        if !self.wants(event) {
            debug!(event_type = event.event_type(), "Event type not subscribed, skipping");
            return Ok(());
        }

        let response = self
            .client
            .post(&self.config.url)
            .json(&WebhookPayload::new(event))
            .send()
            .await
            .map_err(|e| Error::Other(format!("Webhook request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body: String = response
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(ERROR_BODY_LIMIT)
                .collect();
            return Err(Error::Other(format!("Webhook returned {status}: {body}")));
        }

        debug!(event_type = event.event_type(), %status, "Webhook delivered");
        Ok(())
    }
}
