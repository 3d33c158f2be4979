//! Notification events.
//!
//! Defines the events that can trigger notifications and their priority levels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Priority level for notifications.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    /// Low priority - informational only.
    Low,
    /// Normal priority - standard notifications.
    #[default]
    Normal,
    /// High priority - important events.
    High,
    /// Critical priority - requires immediate attention.
    Critical,
}

impl std::fmt::Display for NotificationPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Normal => write!(f, "normal"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Events that can trigger notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NotificationEvent {
    // ========== Content Events ==========
    /// First sighting of a content item.
    ContentPublished {
        source: String,
        item_id: String,
        version: u64,
        author: Option<String>,
        headline: String,
        url: Option<String>,
        parent_id: Option<String>,
        timestamp: DateTime<Utc>,
    },
    /// A known item came back with a higher version.
    ContentEdited {
        source: String,
        item_id: String,
        previous_version: u64,
        version: u64,
        author: Option<String>,
        headline: String,
        url: Option<String>,
        timestamp: DateTime<Utc>,
    },

    // ========== Credential Events ==========
    /// A refresh produced new session secrets.
    CredentialRefreshed {
        target_id: String,
        strategy: String,
        timestamp: DateTime<Utc>,
    },
    /// A refresh attempt failed; the previous credential is still in use.
    CredentialRefreshFailed {
        target_id: String,
        error: String,
        failure_count: u32,
        timestamp: DateTime<Utc>,
    },
    /// The session cannot be renewed without a manual login.
    CredentialInvalid {
        target_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    // ========== System Events ==========
    /// System startup.
    SystemStartup {
        version: String,
        timestamp: DateTime<Utc>,
    },
    /// System shutdown.
    SystemShutdown {
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl NotificationEvent {
    /// Get the priority of this event.
    pub fn priority(&self) -> NotificationPriority {
        match self {
            Self::ContentPublished { .. } => NotificationPriority::Normal,
            Self::ContentEdited { .. } => NotificationPriority::Normal,
            Self::CredentialRefreshed { .. } => NotificationPriority::Low,
            Self::CredentialRefreshFailed { .. } => NotificationPriority::High,
            Self::CredentialInvalid { .. } => NotificationPriority::Critical,
            Self::SystemStartup { .. } => NotificationPriority::Low,
            Self::SystemShutdown { .. } => NotificationPriority::Low,
        }
    }

    /// Get the event type as a string.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ContentPublished { .. } => "content_published",
            Self::ContentEdited { .. } => "content_edited",
            Self::CredentialRefreshed { .. } => "credential_refreshed",
            Self::CredentialRefreshFailed { .. } => "credential_refresh_failed",
            Self::CredentialInvalid { .. } => "credential_invalid",
            Self::SystemStartup { .. } => "system_startup",
            Self::SystemShutdown { .. } => "system_shutdown",
        }
    }

    /// Get a human-readable title for this event.
    pub fn title(&self) -> String {
        match self {
            Self::ContentPublished { author, source, .. } => {
                format!("📝 New post from {}", author.as_deref().unwrap_or(source))
            }
            Self::ContentEdited {
                author,
                source,
                version,
                ..
            } => {
                format!(
                    "✏️ {} edited a post (v{})",
                    author.as_deref().unwrap_or(source),
                    version
                )
            }
            Self::CredentialRefreshed { target_id, .. } => {
                format!("🔑 Credential refreshed for {}", target_id)
            }
            Self::CredentialRefreshFailed {
                target_id,
                failure_count,
                ..
            } => {
                format!(
                    "⚠️ Credential refresh failed for {} ({} in a row)",
                    target_id, failure_count
                )
            }
            Self::CredentialInvalid { target_id, .. } => {
                format!("🚨 Re-login required for {}", target_id)
            }
            Self::SystemStartup { version, .. } => {
                format!("🚀 System started (v{})", version)
            }
            Self::SystemShutdown { reason, .. } => {
                format!("🛑 System shutting down: {}", reason)
            }
        }
    }

    /// Get a detailed description of this event.
    pub fn description(&self) -> String {
        match self {
            Self::ContentPublished {
                headline,
                url,
                parent_id,
                ..
            } => {
                let mut text = headline.clone();
                if let Some(parent) = parent_id {
                    text.push_str(&format!("\n(reply to {})", parent));
                }
                if let Some(url) = url {
                    text.push_str(&format!("\n{}", url));
                }
                text
            }
            Self::ContentEdited {
                headline,
                url,
                previous_version,
                version,
                ..
            } => {
                let mut text = format!("v{} → v{}\n{}", previous_version, version, headline);
                if let Some(url) = url {
                    text.push_str(&format!("\n{}", url));
                }
                text
            }
            Self::CredentialRefreshed { strategy, .. } => {
                format!("Renewed via {}", strategy)
            }
            Self::CredentialRefreshFailed { error, .. } => {
                format!("{} (previous credential kept)", error)
            }
            Self::CredentialInvalid { reason, .. } => reason.clone(),
            Self::SystemStartup { .. } => "System initialized successfully".to_string(),
            Self::SystemShutdown { reason, .. } => reason.clone(),
        }
    }

    /// Get the timestamp of this event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::ContentPublished { timestamp, .. }
            | Self::ContentEdited { timestamp, .. }
            | Self::CredentialRefreshed { timestamp, .. }
            | Self::CredentialRefreshFailed { timestamp, .. }
            | Self::CredentialInvalid { timestamp, .. }
            | Self::SystemStartup { timestamp, .. }
            | Self::SystemShutdown { timestamp, .. } => *timestamp,
        }
    }

    /// Content item id, for content events.
    pub fn item_id(&self) -> Option<&str> {
        match self {
            Self::ContentPublished { item_id, .. } | Self::ContentEdited { item_id, .. } => {
                Some(item_id)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_priority_ordering() {
        assert!(NotificationPriority::Low < NotificationPriority::Normal);
        assert!(NotificationPriority::Normal < NotificationPriority::High);
        assert!(NotificationPriority::High < NotificationPriority::Critical);
        assert_eq!(NotificationPriority::default(), NotificationPriority::Normal);
    }

    #[test]
    fn test_content_published_event() {
        let event = NotificationEvent::ContentPublished {
            source: "weibo".to_string(),
            item_id: "5000".to_string(),
            version: 0,
            author: Some("someone".to_string()),
            headline: "hello world".to_string(),
            url: Some("https://weibo.com/1/Ab".to_string()),
            parent_id: Some("4999".to_string()),
            timestamp: Utc::now(),
        };

        assert_eq!(event.event_type(), "content_published");
        assert!(event.title().contains("someone"));
        assert!(event.description().contains("reply to 4999"));
        assert_eq!(event.item_id(), Some("5000"));
    }

    #[test]
    fn test_credential_event_priorities() {
        let invalid = NotificationEvent::CredentialInvalid {
            target_id: "bili".to_string(),
            reason: "not logged in".to_string(),
            timestamp: Utc::now(),
        };
        assert_eq!(invalid.priority(), NotificationPriority::Critical);

        let failed = NotificationEvent::CredentialRefreshFailed {
            target_id: "bili".to_string(),
            error: "timeout".to_string(),
            failure_count: 3,
            timestamp: Utc::now(),
        };
        assert_eq!(failed.priority(), NotificationPriority::High);
        assert!(failed.title().contains("3 in a row"));
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let event = NotificationEvent::SystemShutdown {
            reason: "signal".to_string(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "system_shutdown");
    }
}
