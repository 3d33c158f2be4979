//! DingTalk group robot channel.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::NotificationChannel;
use crate::Result;
use crate::notification::events::{NotificationEvent, NotificationPriority};

/// DingTalk robot configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DingTalkConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Robot webhook, `https://oapi.dingtalk.com/robot/send?access_token=...`.
    pub webhook_url: String,
    /// Mention everyone for critical events.
    #[serde(default)]
    pub at_all_on_critical: bool,
    #[serde(default)]
    pub min_priority: NotificationPriority,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_timeout() -> u64 {
    10
}

#[derive(Debug, Deserialize)]
struct RobotResponse {
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
}

pub struct DingTalkChannel {
    config: DingTalkConfig,
    client: Client,
}

impl DingTalkChannel {
    pub fn new(config: DingTalkConfig) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self { config, client }
    }

    fn build_payload(&self, event: &NotificationEvent) -> serde_json::Value {
        let title = event.title();
        let text = format!(
            "### [{}] {}\n\n{}\n\n{}",
            event.priority().to_string().to_uppercase(),
            title,
            event.timestamp().format("%Y-%m-%d %H:%M:%S"),
            event.description()
        );
        let at_all =
            self.config.at_all_on_critical && event.priority() == NotificationPriority::Critical;

        json!({
            "msgtype": "markdown",
            "markdown": { "title": title, "text": text },
            "at": { "isAtAll": at_all }
        })
    }
}

#[async_trait]
impl NotificationChannel for DingTalkChannel {
    fn channel_type(&self) -> &'static str {
        "dingtalk"
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled && !self.config.webhook_url.is_empty()
    }

    fn min_priority(&self) -> NotificationPriority {
        self.config.min_priority
    }

    async fn send(&self, event: &NotificationEvent) -> Result<()> {
        let response = self
            .client
            .post(&self.config.webhook_url)
            .json(&self.build_payload(event))
            .send()
            .await
            .map_err(|e| crate::Error::Other(format!("DingTalk request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(crate::Error::Other(format!("DingTalk failed: {}", status)));
        }

        // The robot answers 200 with an errcode on rejection.
        let body: RobotResponse = response
            .json()
            .await
            .map_err(|e| crate::Error::Other(format!("DingTalk response: {}", e)))?;
        if body.errcode != 0 {
            return Err(crate::Error::Other(format!(
                "DingTalk rejected message: {} ({})",
                body.errmsg, body.errcode
            )));
        }

        debug!(event_type = event.event_type(), "DingTalk notification sent");
        Ok(())
    }
}
