use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dedup::Observation;
use crate::notification::NotificationEvent;

/// Headlines longer than this are cut on a char boundary.
const HEADLINE_MAX_CHARS: usize = 120;

/// One observed piece of content.
///
/// Replies reference their parent by id only; the tree is never materialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: String,
    /// Edit count or revision id; grows when the item is edited.
    pub version: u64,
    pub source: String,
    pub published_at: DateTime<Utc>,
    pub parent_id: Option<String>,
    pub author: Option<String>,
    pub headline: String,
    pub url: Option<String>,
    /// Raw entry as returned by the source.
    pub payload: serde_json::Value,
}

impl ContentItem {
    /// First line of `text`, shortened for notification titles.
    pub fn headline_from(text: &str) -> String {
        let line = text.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
        if line.chars().count() <= HEADLINE_MAX_CHARS {
            return line.to_string();
        }
        let mut cut: String = line.chars().take(HEADLINE_MAX_CHARS).collect();
        cut.push('…');
        cut
    }

    /// Event for an item the dedup index asked to emit.
    pub fn to_event(&self, observation: Observation) -> Option<NotificationEvent> {
        match observation {
            Observation::New => Some(NotificationEvent::ContentPublished {
                source: self.source.clone(),
                item_id: self.id.clone(),
                version: self.version,
                author: self.author.clone(),
                headline: self.headline.clone(),
                url: self.url.clone(),
                parent_id: self.parent_id.clone(),
                timestamp: self.published_at,
            }),
            Observation::Changed { previous } => Some(NotificationEvent::ContentEdited {
                source: self.source.clone(),
                item_id: self.id.clone(),
                previous_version: previous,
                version: self.version,
                author: self.author.clone(),
                headline: self.headline.clone(),
                url: self.url.clone(),
                timestamp: Utc::now(),
            }),
            Observation::Seen => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item() -> ContentItem {
        ContentItem {
            id: "abc".into(),
            version: 2,
            source: "weibo".into(),
            published_at: Utc::now(),
            parent_id: Some("root".into()),
            author: Some("someone".into()),
            headline: "hello".into(),
            url: None,
            payload: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_headline_from_takes_first_line() {
        assert_eq!(ContentItem::headline_from("\n  first \nsecond"), "first");
        let long = "字".repeat(200);
        let headline = ContentItem::headline_from(&long);
        assert_eq!(headline.chars().count(), HEADLINE_MAX_CHARS + 1);
        assert!(headline.ends_with('…'));
    }

    #[test]
    fn test_to_event_by_observation() {
        let item = item();
        assert_eq!(
            item.to_event(Observation::New).unwrap().event_type(),
            "content_published"
        );
        match item.to_event(Observation::Changed { previous: 1 }) {
            Some(NotificationEvent::ContentEdited {
                previous_version,
                version,
                ..
            }) => assert_eq!((previous_version, version), (1, 2)),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(item.to_event(Observation::Seen).is_none());
    }
}
