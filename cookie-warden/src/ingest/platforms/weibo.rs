//! Weibo user timeline as a content source.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::Value;
use warden_platforms::weibo::{Mblog, WeiboEndpoints, WeiboError, fetch_timeline};

use crate::credentials::Credential;
use crate::ingest::item::ContentItem;
use crate::ingest::source::{ContentSource, FetchError};

const SOURCE_NAME: &str = "weibo";

pub struct WeiboTimelineSource {
    client: Client,
    endpoints: WeiboEndpoints,
    uid: u64,
}

impl WeiboTimelineSource {
    pub fn new(client: Client, endpoints: WeiboEndpoints, uid: u64) -> Self {
        Self {
            client,
            endpoints,
            uid,
        }
    }
}

impl From<WeiboError> for FetchError {
    fn from(err: WeiboError) -> Self {
        match err {
            WeiboError::Unauthorized(reason) => FetchError::Unauthorized(reason),
            WeiboError::Network(e) => FetchError::Transient(e.to_string()),
            WeiboError::Api { code, message } => {
                FetchError::Transient(format!("API error ({code}): {message}"))
            }
            WeiboError::Parse(e) => FetchError::Malformed(e),
        }
    }
}

#[async_trait]
impl ContentSource for WeiboTimelineSource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    async fn fetch_page(&self, credential: &Credential) -> Result<Vec<Value>, FetchError> {
        Ok(fetch_timeline(
            &self.client,
            &self.endpoints,
            self.uid,
            1,
            &credential.cookie_header(),
        )
        .await?)
    }

    fn decode(&self, raw: &Value) -> Result<ContentItem, FetchError> {
        let mblog = Mblog::from_value(raw)?;
        let text = if mblog.text_raw.is_empty() {
            &mblog.text
        } else {
            &mblog.text_raw
        };

        Ok(ContentItem {
            id: mblog.mid.clone(),
            version: mblog.edit_count,
            source: SOURCE_NAME.to_string(),
            published_at: mblog
                .published_at()
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(Utc::now),
            parent_id: mblog
                .retweeted_status
                .as_ref()
                .map(|parent| parent.mid.clone())
                .filter(|mid| !mid.is_empty()),
            author: Some(mblog.user.screen_name.clone()).filter(|n| !n.is_empty()),
            headline: ContentItem::headline_from(text),
            url: Some(mblog.url()),
            payload: raw.clone(),
        })
    }
}
