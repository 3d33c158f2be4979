//! Cookie header helpers for the Bilibili passport flows.
//!
//! Credentials are kept as a single `Cookie` header line (`a=1; b=2`). The
//! long-lived refresh token is not an HTTP cookie, but it is stored in the same
//! line under the [`REFRESH_TOKEN_KEY`] pseudo-cookie so one string carries the
//! whole credential. Strip it with [`strip_refresh_token`] before sending.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

pub use crate::cookie_header::{extract_cookie_value, parse_cookie_pairs};

/// Name used for storing refresh_token in cookie string.
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Cookies that lead the rebuilt header, in this order.
const LEADING_COOKIES: [&str; 4] = ["SESSDATA", "bili_jct", "DedeUserID", "DedeUserID__ckMd5"];

static REFRESH_CSRF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<div id="1-name">(.*?)</div>"#).unwrap());

/// Extract the one-time `refresh_csrf` token from the correspond page.
///
/// Returns `None` when the `<div id="1-name">` marker is absent or empty.
pub fn extract_refresh_csrf(html: &str) -> Option<String> {
    REFRESH_CSRF_RE
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|token| !token.is_empty())
}

/// Collect `name=value` pairs from `Set-Cookie` response headers.
pub fn parse_set_cookies(headers: &reqwest::header::HeaderMap) -> BTreeMap<String, String> {
    headers
        .get_all(reqwest::header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|raw| raw.split(';').next())
        .filter_map(|kv| kv.split_once('='))
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .collect()
}

/// Apply `updates` to a cookie header.
///
/// Leading session cookies come first, the remaining ones keep their original
/// order and new names are appended in sorted order.
pub fn rebuild_cookies(original: &str, updates: &BTreeMap<String, String>) -> String {
    let mut pairs = parse_cookie_pairs(original);
    for (name, value) in updates {
        match pairs.iter_mut().find(|(n, _)| n == name) {
            Some(existing) => existing.1 = value.clone(),
            None => pairs.push((name.clone(), value.clone())),
        }
    }
    join_ordered(pairs, &LEADING_COOKIES)
}

fn join_ordered(mut pairs: Vec<(String, String)>, leading: &[&str]) -> String {
    let mut out = Vec::with_capacity(pairs.len());
    for key in leading {
        if let Some(idx) = pairs.iter().position(|(n, _)| n == key) {
            let (n, v) = pairs.remove(idx);
            out.push(format!("{n}={v}"));
        }
    }
    out.extend(pairs.into_iter().map(|(n, v)| format!("{n}={v}")));
    out.join("; ")
}

/// Extract the embedded refresh token, if any.
pub fn extract_refresh_token(cookies: &str) -> Option<String> {
    extract_cookie_value(cookies, REFRESH_TOKEN_KEY).filter(|t| !t.is_empty())
}

/// Embed (or replace) the refresh token pseudo-cookie.
///
/// ```
/// use warden_platforms::bilibili::cookie_utils::embed_refresh_token;
///
/// let with_token = embed_refresh_token("SESSDATA=abc; bili_jct=xyz", "my_token");
/// assert_eq!(with_token, "SESSDATA=abc; bili_jct=xyz; refresh_token=my_token");
/// ```
pub fn embed_refresh_token(cookies: &str, refresh_token: &str) -> String {
    let mut pairs = parse_cookie_pairs(cookies);
    pairs.retain(|(n, _)| n != REFRESH_TOKEN_KEY);
    pairs.push((REFRESH_TOKEN_KEY.to_string(), refresh_token.to_string()));
    let mut leading = LEADING_COOKIES.to_vec();
    leading.push(REFRESH_TOKEN_KEY);
    join_ordered(pairs, &leading)
}

/// Remove the refresh token pseudo-cookie before sending the header.
pub fn strip_refresh_token(cookies: &str) -> String {
    parse_cookie_pairs(cookies)
        .into_iter()
        .filter(|(n, _)| n != REFRESH_TOKEN_KEY)
        .map(|(n, v)| format!("{n}={v}"))
        .collect::<Vec<_>>()
        .join("; ")
}
