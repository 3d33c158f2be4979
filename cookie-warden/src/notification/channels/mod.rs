//! Notification channels.
//!
//! - Generic webhooks (HTTP POST with a JSON body)
//! - DingTalk group robots (markdown messages)

mod dingtalk;
mod webhook;

pub use dingtalk::{DingTalkChannel, DingTalkConfig};
pub use webhook::{WebhookChannel, WebhookConfig};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::events::{NotificationEvent, NotificationPriority};
use crate::Result;

/// Trait for notification channels.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Get the channel type name.
    fn channel_type(&self) -> &'static str;

    /// Check if the channel is enabled.
    fn is_enabled(&self) -> bool;

    /// Lowest priority this channel delivers.
    fn min_priority(&self) -> NotificationPriority {
        NotificationPriority::Low
    }

    /// Send a notification through this channel.
    async fn send(&self, event: &NotificationEvent) -> Result<()>;
}

/// Channel configuration wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelConfig {
    /// Generic webhook channel.
    Webhook(WebhookConfig),
    /// DingTalk robot channel.
    #[serde(alias = "ding_talk")]
    Dingtalk(DingTalkConfig),
}

impl ChannelConfig {
    /// Get the channel type name.
    pub fn channel_type(&self) -> &'static str {
        match self {
            Self::Webhook(_) => "webhook",
            Self::Dingtalk(_) => "dingtalk",
        }
    }

    /// Check if the channel is enabled.
    pub fn is_enabled(&self) -> bool {
        match self {
            Self::Webhook(c) => c.enabled,
            Self::Dingtalk(c) => c.enabled,
        }
    }

    /// Optional human-friendly display name.
    pub fn display_name(&self) -> Option<&str> {
        match self {
            Self::Webhook(c) => c.name.as_deref(),
            Self::Dingtalk(c) => c.name.as_deref(),
        }
    }
}
