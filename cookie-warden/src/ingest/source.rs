//! Content sources and the per-tick lazy item sequence.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::item::ContentItem;
use crate::credentials::Credential;

#[derive(Debug, Error)]
pub enum FetchError {
    /// The source rejected the credential.
    #[error("Authentication rejected: {0}")]
    Unauthorized(String),
    /// Timeouts, 5xx and other errors worth retrying on the next tick.
    #[error("Transient fetch failure: {0}")]
    Transient(String),
    /// The page or a single entry could not be understood.
    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl FetchError {
    pub fn is_auth(&self) -> bool {
        matches!(self, FetchError::Unauthorized(_))
    }
}

/// A site timeline that can be fetched with a credential.
#[async_trait]
pub trait ContentSource: Send + Sync {
    fn name(&self) -> &str;

    /// Fetch the newest page as raw entries, in source order.
    async fn fetch_page(&self, credential: &Credential) -> Result<Vec<Value>, FetchError>;

    /// Decode one raw entry.
    fn decode(&self, raw: &Value) -> Result<ContentItem, FetchError>;
}

/// Lazily decoded items of one fetched page.
///
/// Cancellation is checked before every yield; malformed entries are logged
/// and skipped.
pub struct PageItems<'a> {
    source: &'a dyn ContentSource,
    raw: std::vec::IntoIter<Value>,
    cancel: &'a CancellationToken,
    malformed: usize,
}

impl<'a> PageItems<'a> {
    pub fn new(source: &'a dyn ContentSource, page: Vec<Value>, cancel: &'a CancellationToken) -> Self {
        Self {
            source,
            raw: page.into_iter(),
            cancel,
            malformed: 0,
        }
    }

    /// Entries skipped so far because they failed to decode.
    pub fn malformed(&self) -> usize {
        self.malformed
    }
}

impl Iterator for PageItems<'_> {
    type Item = ContentItem;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.cancel.is_cancelled() {
                return None;
            }
            let raw = self.raw.next()?;
            match self.source.decode(&raw) {
                Ok(item) => return Some(item),
                Err(e) => {
                    self.malformed += 1;
                    warn!(source = self.source.name(), error = %e, "Skipping malformed entry");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::*;

    struct NumberSource;

    #[async_trait]
    impl ContentSource for NumberSource {
        fn name(&self) -> &str {
            "numbers"
        }

        async fn fetch_page(&self, _credential: &Credential) -> Result<Vec<Value>, FetchError> {
            Ok(Vec::new())
        }

        fn decode(&self, raw: &Value) -> Result<ContentItem, FetchError> {
            let id = raw
                .as_u64()
                .ok_or_else(|| FetchError::Malformed(raw.to_string()))?;
            Ok(ContentItem {
                id: id.to_string(),
                version: 0,
                source: "numbers".into(),
                published_at: Utc::now(),
                parent_id: None,
                author: None,
                headline: String::new(),
                url: None,
                payload: raw.clone(),
            })
        }
    }

    #[test]
    fn test_malformed_entries_are_skipped() {
        let cancel = CancellationToken::new();
        let mut items = PageItems::new(&NumberSource, vec![json!(1), json!("x"), json!(3)], &cancel);

        let ids: Vec<String> = items.by_ref().map(|i| i.id).collect();
        assert_eq!(ids, vec!["1", "3"]);
        assert_eq!(items.malformed(), 1);
    }

    #[test]
    fn test_cancellation_stops_yielding() {
        let cancel = CancellationToken::new();
        let page = (1..=10).map(|n| json!(n)).collect();
        let mut items = PageItems::new(&NumberSource, page, &cancel);

        assert_eq!(items.next().unwrap().id, "1");
        assert_eq!(items.next().unwrap().id, "2");
        cancel.cancel();
        assert!(items.next().is_none());
    }

    #[test]
    fn test_auth_classification() {
        assert!(FetchError::Unauthorized("x".into()).is_auth());
        assert!(!FetchError::Transient("x".into()).is_auth());
    }
}
