//! Core credential types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use warden_platforms::bilibili::cookie_utils::{
    REFRESH_TOKEN_KEY, embed_refresh_token, extract_refresh_token,
};
use warden_platforms::cookie_header::parse_cookie_pairs;

/// The session secrets for one target.
///
/// Cookies keep their header order. The refresh token travels separately and
/// is never sent as a cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Target identity (site or account) the secrets belong to.
    pub target_id: String,
    cookies: Vec<(String, String)>,
    /// Long-lived token used to mint new session cookies.
    pub refresh_token: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(
        target_id: impl Into<String>,
        cookies: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        let mut credential = Self {
            target_id: target_id.into(),
            cookies: Vec::new(),
            refresh_token: None,
            updated_at: Utc::now(),
        };
        for (name, value) in cookies {
            credential.set_cookie(name, value);
        }
        credential
    }

    /// Parse a persisted `Cookie` header line.
    ///
    /// An embedded `refresh_token` pseudo-cookie becomes [`Self::refresh_token`].
    pub fn from_cookie_header(target_id: impl Into<String>, header: &str) -> Self {
        let refresh_token = extract_refresh_token(header);
        let cookies = parse_cookie_pairs(header)
            .into_iter()
            .filter(|(name, _)| name != REFRESH_TOKEN_KEY);
        Self {
            refresh_token,
            ..Self::new(target_id, cookies)
        }
    }

    pub fn with_refresh_token(mut self, token: Option<String>) -> Self {
        self.refresh_token = token.filter(|t| !t.is_empty());
        self
    }

    pub fn set_cookie(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.cookies.iter_mut().find(|(n, _)| *n == name) {
            Some(existing) => existing.1 = value,
            None => self.cookies.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn cookies(&self) -> impl Iterator<Item = (&str, &str)> {
        self.cookies.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// `Cookie` header value to send with requests.
    pub fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .map(|(n, v)| format!("{n}={v}"))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Single-line form for durable storage, refresh token included.
    pub fn to_persisted_line(&self) -> String {
        let header = self.cookie_header();
        match self.refresh_token.as_deref() {
            Some(token) => embed_refresh_token(&header, token),
            None => header,
        }
    }

    /// Names from `required` that are not present.
    pub fn missing<'a>(&self, required: &'a [String]) -> Vec<&'a str> {
        required
            .iter()
            .filter(|name| !self.contains(name))
            .map(String::as_str)
            .collect()
    }
}

/// Derived validity of a credential. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidityState {
    Unknown,
    Valid,
    Stale,
}

impl std::fmt::Display for ValidityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Valid => write!(f, "valid"),
            Self::Stale => write!(f, "stale"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_round_trip_keeps_refresh_token_out_of_cookies() {
        let credential =
            Credential::from_cookie_header("bili", "SESSDATA=a; bili_jct=b; refresh_token=rt");

        assert_eq!(credential.refresh_token.as_deref(), Some("rt"));
        assert_eq!(credential.cookie_header(), "SESSDATA=a; bili_jct=b");
        assert_eq!(
            credential.to_persisted_line(),
            "SESSDATA=a; bili_jct=b; refresh_token=rt"
        );
    }

    #[test]
    fn test_set_cookie_replaces_in_place() {
        let mut credential = Credential::from_cookie_header("t", "a=1; b=2");
        credential.set_cookie("a", "3");
        credential.set_cookie("c", "4");
        assert_eq!(credential.cookie_header(), "a=3; b=2; c=4");
    }

    #[test]
    fn test_missing_required() {
        let credential = Credential::from_cookie_header("t", "SUB=1; XSRF-TOKEN=x");
        let required = vec!["SUB".to_string(), "SUBP".to_string()];
        assert_eq!(credential.missing(&required), vec!["SUBP"]);
    }
}
