//! Weibo web AJAX bindings.
//!
//! The timeline is returned as raw JSON entries so that one malformed post
//! does not discard the rest of the page; [`Mblog::from_value`] gives the typed
//! view per entry.

use chrono::{DateTime, FixedOffset};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::DEFAULT_UA;
use crate::cookie_header::extract_cookie_value;

/// `ok` value the AJAX API returns for a logged-out session.
const OK_LOGGED_OUT: i64 = -100;

/// Ruby-style date used by `created_at`, e.g. `Mon Jan 02 15:04:05 +0800 2006`.
const CREATED_AT_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";

#[derive(Debug, Error)]
pub enum WeiboError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Session rejected: {0}")]
    Unauthorized(String),
    #[error("API error ({code}): {message}")]
    Api { code: i64, message: String },
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Base URL for the web API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeiboEndpoints {
    pub base: String,
}

impl Default for WeiboEndpoints {
    fn default() -> Self {
        Self {
            base: "https://weibo.com".to_string(),
        }
    }
}

impl WeiboEndpoints {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn mymblog(&self) -> String {
        format!("{}/ajax/statuses/mymblog", self.base)
    }

    pub fn home(&self) -> String {
        format!("{}/", self.base)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MblogUser {
    #[serde(default)]
    pub idstr: String,
    #[serde(default)]
    pub screen_name: String,
    #[serde(default)]
    pub avatar_hd: String,
}

/// A post as returned by the timeline API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mblog {
    pub mid: String,
    #[serde(default)]
    pub mblogid: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub edit_count: u64,
    #[serde(default)]
    pub user: MblogUser,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub text_raw: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub region_name: String,
    #[serde(default, rename = "isTop")]
    pub is_top: i64,
    #[serde(default)]
    pub retweeted_status: Option<Box<Mblog>>,
}

impl Mblog {
    pub fn from_value(value: &serde_json::Value) -> Result<Self, WeiboError> {
        let mblog: Mblog = serde_json::from_value(value.clone())
            .map_err(|e| WeiboError::Parse(e.to_string()))?;
        if mblog.mid.is_empty() {
            return Err(WeiboError::Parse("empty mid".to_string()));
        }
        Ok(mblog)
    }

    pub fn published_at(&self) -> Option<DateTime<FixedOffset>> {
        DateTime::parse_from_str(&self.created_at, CREATED_AT_FORMAT).ok()
    }

    pub fn url(&self) -> String {
        format!("https://weibo.com/{}/{}", self.user.idstr, self.mblogid)
    }
}

#[derive(Debug, Deserialize)]
struct TimelineResponse {
    ok: i64,
    #[serde(default, alias = "msg")]
    message: String,
    data: Option<TimelineData>,
}

#[derive(Debug, Deserialize)]
struct TimelineData {
    #[serde(default)]
    list: Vec<serde_json::Value>,
}

fn is_login_url(url: &reqwest::Url) -> bool {
    matches!(
        url.host_str(),
        Some("passport.weibo.com") | Some("login.sina.com.cn")
    ) || url.path().contains("login")
}

/// Fetch one page of a user's timeline, newest first.
pub async fn fetch_timeline(
    client: &Client,
    endpoints: &WeiboEndpoints,
    uid: u64,
    page: u32,
    cookies: &str,
) -> Result<Vec<serde_json::Value>, WeiboError> {
    let xsrf = extract_cookie_value(cookies, "XSRF-TOKEN").unwrap_or_default();

    let response = client
        .get(endpoints.mymblog())
        .query(&[
            ("uid", uid.to_string()),
            ("page", page.max(1).to_string()),
            ("feature", "0".to_string()),
        ])
        .header(reqwest::header::COOKIE, cookies)
        .header(reqwest::header::USER_AGENT, DEFAULT_UA)
        .header(reqwest::header::REFERER, endpoints.home())
        .header("X-Requested-With", "XMLHttpRequest")
        .header("X-Xsrf-Token", xsrf)
        .send()
        .await?;

    let status = response.status();
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        return Err(WeiboError::Unauthorized(format!("HTTP {status}")));
    }
    if is_login_url(response.url()) {
        return Err(WeiboError::Unauthorized(format!(
            "redirected to {}",
            response.url()
        )));
    }
    if !status.is_success() {
        return Err(WeiboError::Api {
            code: i64::from(status.as_u16()),
            message: format!("HTTP {status}"),
        });
    }

    let body = response.text().await?;
    let parsed: TimelineResponse =
        serde_json::from_str(&body).map_err(|e| WeiboError::Parse(e.to_string()))?;

    match parsed.ok {
        1 => {}
        OK_LOGGED_OUT => return Err(WeiboError::Unauthorized(parsed.message)),
        code => {
            return Err(WeiboError::Api {
                code,
                message: parsed.message,
            });
        }
    }

    let list = parsed.data.map(|d| d.list).unwrap_or_default();
    debug!(uid, page, count = list.len(), "Fetched timeline page");
    Ok(list)
}
