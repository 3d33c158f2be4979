//! Notification system module.
//!
//! Delivers content and credential events through webhook and DingTalk
//! channels with retry logic and a circuit breaker per channel.
//!
//! # Example
//!
//! ```ignore
//! use cookie_warden::notification::{NotificationService, NotificationServiceConfig};
//! use cookie_warden::notification::channels::{ChannelConfig, WebhookConfig};
//!
//! let config = NotificationServiceConfig {
//!     channels: vec![ChannelConfig::Webhook(WebhookConfig {
//!         enabled: true,
//!         url: "https://example.com/hook".to_string(),
//!         ..Default::default()
//!     })],
//!     ..Default::default()
//! };
//!
//! let service = NotificationService::with_config(config);
//! ```

pub mod channels;
pub mod events;
pub mod service;

pub use channels::{ChannelConfig, DingTalkConfig, NotificationChannel, WebhookConfig};
pub use events::{NotificationEvent, NotificationPriority};
pub use service::{NotificationService, NotificationServiceConfig, NotificationStats, Notifier};
