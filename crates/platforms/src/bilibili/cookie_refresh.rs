//! Bilibili web cookie refresh.
//!
//! The passport refresh is a challenge-response exchange:
//! 1. Check cookie status via the `/cookie/info` API
//! 2. Encrypt `refresh_{ts_ms}` with the published RSA key (OAEP/SHA-256)
//! 3. Fetch the correspond page and scrape the one-time `refresh_csrf`
//! 4. Rotate the cookies with the refresh token, then confirm the rotation
//!
//! The ciphertext is bound to its timestamp, so every attempt regenerates it.

use std::collections::BTreeMap;

use reqwest::Client;
use rsa::pkcs8::DecodePublicKey;
use rsa::rand_core::OsRng;
use rsa::{Oaep, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use tracing::{debug, warn};

use super::cookie_utils::{
    extract_cookie_value, extract_refresh_csrf, parse_set_cookies, rebuild_cookies,
    strip_refresh_token,
};
use crate::DEFAULT_UA;

/// Bilibili's RSA public key for CorrespondPath generation.
const BILIBILI_PUBKEY_PEM: &str = r#"-----BEGIN PUBLIC KEY-----
MIGfMA0GCSqGSIb3DQEBAQUAA4GNADCBiQKBgQDLgd2OAkcGVtoE3ThUREbio0Eg
Uc/prcajMKXvkCKFCWhJYJcLkcM2DKKcSeFpD/j6Boy538YXnR6VhcuUJOhH2x71
nzPjfdTcqMz7djHum0qSZA0AyCBDABUqCrfNgCiJ00Ra7GmRj+YCK1NJEuewlb40
JNrRuoEUXpabUzGB8QIDAQAB
-----END PUBLIC KEY-----
"#;

/// Bilibili "not logged in" API code.
const CODE_NOT_LOGGED_IN: i64 = -101;

#[derive(Debug, Error)]
pub enum CookieRefreshError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Crypto error: {0}")]
    Crypto(String),
    #[error("Missing cookie: {0}")]
    MissingCookie(&'static str),
    #[error("Missing refresh token")]
    MissingRefreshToken,
    #[error("refresh_csrf marker not found in correspond page (HTTP {status})")]
    RefreshCsrfNotFound { status: u16 },
    #[error("Not logged in")]
    NotLoggedIn,
    #[error("Refresh rejected ({code}): {message}")]
    Rejected { code: i64, message: String },
}

/// Hosts used by the passport flows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassportEndpoints {
    /// `https://passport.bilibili.com`
    pub passport: String,
    /// `https://www.bilibili.com`
    pub www: String,
    /// `https://api.bilibili.com`
    pub api: String,
}

impl Default for PassportEndpoints {
    fn default() -> Self {
        Self {
            passport: "https://passport.bilibili.com".to_string(),
            www: "https://www.bilibili.com".to_string(),
            api: "https://api.bilibili.com".to_string(),
        }
    }
}

impl PassportEndpoints {
    /// Route every host to the same base URL (mock servers, proxies).
    pub fn single_host(base: impl Into<String>) -> Self {
        let base = base.into().trim_end_matches('/').to_string();
        Self {
            passport: base.clone(),
            www: base.clone(),
            api: base,
        }
    }

    pub fn cookie_info(&self) -> String {
        format!("{}/x/passport-login/web/cookie/info", self.passport)
    }

    pub fn correspond(&self, path: &str) -> String {
        format!("{}/correspond/1/{}", self.www, path)
    }

    pub fn refresh(&self) -> String {
        format!("{}/x/passport-login/web/cookie/refresh", self.passport)
    }

    pub fn confirm(&self) -> String {
        format!("{}/x/passport-login/web/confirm/refresh", self.passport)
    }

    pub fn nav(&self) -> String {
        format!("{}/x/web-interface/nav", self.api)
    }

    pub fn qr_generate(&self) -> String {
        format!("{}/x/passport-login/web/qrcode/generate", self.passport)
    }

    pub fn qr_poll(&self) -> String {
        format!("{}/x/passport-login/web/qrcode/poll", self.passport)
    }
}

/// Cookie status check result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CookieStatus {
    /// Cookies are valid, no refresh needed
    Valid,
    /// Server asks for a refresh
    NeedsRefresh { deadline_timestamp: Option<u64> },
    /// Cookies are invalid (not logged in)
    Invalid { reason: String, code: Option<i64> },
}

/// Output of a successful rotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshedCookies {
    /// New cookie header, without the refresh token pseudo-cookie
    pub cookies: String,
    /// New refresh token; the old one is invalid after confirmation
    pub refresh_token: String,
}

/// Account summary returned by the nav probe.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NavInfo {
    #[serde(rename = "isLogin", default)]
    pub is_login: bool,
    #[serde(default)]
    pub mid: u64,
    #[serde(default)]
    pub uname: String,
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct RefreshData {
    #[serde(default)]
    refresh_token: String,
}

/// Generate CorrespondPath using RSA-OAEP encryption.
pub fn generate_correspond_path(timestamp_ms: u64) -> Result<String, CookieRefreshError> {
    let public_key = RsaPublicKey::from_public_key_pem(BILIBILI_PUBKEY_PEM)
        .map_err(|e| CookieRefreshError::Crypto(e.to_string()))?;
    let message = format!("refresh_{timestamp_ms}");

    let encrypted = public_key
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), message.as_bytes())
        .map_err(|e| CookieRefreshError::Crypto(e.to_string()))?;

    Ok(hex::encode(encrypted))
}

fn bili_jct(cookies: &str) -> Result<String, CookieRefreshError> {
    extract_cookie_value(cookies, "bili_jct").ok_or(CookieRefreshError::MissingCookie("bili_jct"))
}

/// Ask the passport whether the cookies should be refreshed.
pub async fn check_cookie_status(
    client: &Client,
    endpoints: &PassportEndpoints,
    cookies: &str,
) -> Result<CookieStatus, CookieRefreshError> {
    let cookies = strip_refresh_token(cookies);
    let csrf = bili_jct(&cookies)?;

    let body: serde_json::Value = client
        .get(endpoints.cookie_info())
        .query(&[("csrf", csrf.as_str())])
        .header(reqwest::header::COOKIE, &cookies)
        .header(reqwest::header::USER_AGENT, DEFAULT_UA)
        .send()
        .await?
        .json()
        .await
        .map_err(|e| CookieRefreshError::Parse(e.to_string()))?;

    let code = body.get("code").and_then(|c| c.as_i64()).unwrap_or(-1);
    let data = body.get("data");

    match code {
        0 => {
            let needs_refresh = data
                .and_then(|d| d.get("refresh"))
                .and_then(|r| r.as_bool())
                .unwrap_or(false);
            if needs_refresh {
                Ok(CookieStatus::NeedsRefresh {
                    deadline_timestamp: data
                        .and_then(|d| d.get("timestamp"))
                        .and_then(|t| t.as_u64()),
                })
            } else {
                Ok(CookieStatus::Valid)
            }
        }
        CODE_NOT_LOGGED_IN => Ok(CookieStatus::Invalid {
            reason: "Not logged in".to_string(),
            code: Some(CODE_NOT_LOGGED_IN),
        }),
        _ => {
            let message = body
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("Unknown error");
            Ok(CookieStatus::Invalid {
                reason: format!("Error {code}: {message}"),
                code: Some(code),
            })
        }
    }
}

/// Fetch the one-time `refresh_csrf` for a correspond path built from `timestamp_ms`.
///
/// A page without the marker yields [`CookieRefreshError::RefreshCsrfNotFound`];
/// the caller must not retry with the same timestamp.
pub async fn fetch_refresh_csrf(
    client: &Client,
    endpoints: &PassportEndpoints,
    cookies: &str,
    timestamp_ms: u64,
) -> Result<String, CookieRefreshError> {
    let path = generate_correspond_path(timestamp_ms)?;
    let response = client
        .get(endpoints.correspond(&path))
        .header(reqwest::header::COOKIE, cookies)
        .header(reqwest::header::USER_AGENT, DEFAULT_UA)
        .send()
        .await?;

    let status = response.status().as_u16();
    let html = response
        .text()
        .await
        .map_err(|e| CookieRefreshError::Parse(e.to_string()))?;

    extract_refresh_csrf(&html).ok_or_else(|| {
        debug!(
            status,
            preview = %html.chars().take(200).collect::<String>(),
            "correspond page without refresh_csrf"
        );
        CookieRefreshError::RefreshCsrfNotFound { status }
    })
}

/// Perform cookie refresh.
///
/// Nothing the caller holds is modified; on error the old cookies and refresh
/// token are still the live ones.
pub async fn refresh_cookies(
    client: &Client,
    endpoints: &PassportEndpoints,
    cookies: &str,
    refresh_token: &str,
) -> Result<RefreshedCookies, CookieRefreshError> {
    if refresh_token.is_empty() {
        return Err(CookieRefreshError::MissingRefreshToken);
    }
    let cookies = strip_refresh_token(cookies);
    let csrf = bili_jct(&cookies)?;

    let timestamp_ms = chrono::Utc::now().timestamp_millis().max(0) as u64;
    let refresh_csrf = fetch_refresh_csrf(client, endpoints, &cookies, timestamp_ms).await?;

    let refresh_response = client
        .post(endpoints.refresh())
        .header(reqwest::header::COOKIE, &cookies)
        .header(reqwest::header::USER_AGENT, DEFAULT_UA)
        .form(&[
            ("csrf", csrf.as_str()),
            ("csrf_token", csrf.as_str()),
            ("refresh_csrf", refresh_csrf.as_str()),
            ("source", "main_web"),
            ("refresh_token", refresh_token),
        ])
        .send()
        .await?;

    let rotated = parse_set_cookies(refresh_response.headers());
    let envelope: ApiEnvelope<RefreshData> = refresh_response
        .json()
        .await
        .map_err(|e| CookieRefreshError::Parse(e.to_string()))?;

    match envelope.code {
        0 => {}
        CODE_NOT_LOGGED_IN => return Err(CookieRefreshError::NotLoggedIn),
        code => {
            return Err(CookieRefreshError::Rejected {
                code,
                message: envelope.message,
            });
        }
    }

    let new_refresh_token = envelope
        .data
        .map(|d| d.refresh_token)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| CookieRefreshError::Parse("missing refresh_token in response".into()))?;
    let new_csrf = rotated.get("bili_jct").cloned().ok_or_else(|| {
        CookieRefreshError::Parse(format!(
            "missing bili_jct in Set-Cookie (received: {:?})",
            rotated.keys().collect::<Vec<_>>()
        ))
    })?;

    let new_cookies = rebuild_cookies(&cookies, &rotated);

    // The old token is invalidated here; the new pair is already usable, so a
    // failed confirmation must not discard it.
    if let Err(e) = confirm_refresh(client, endpoints, &new_cookies, &new_csrf, refresh_token).await {
        warn!(error = %e, "Refresh confirmation failed; keeping the rotated cookies");
    }

    let new_cookies = ensure_uid_cookie(client, endpoints, new_cookies).await;

    Ok(RefreshedCookies {
        cookies: new_cookies,
        refresh_token: new_refresh_token,
    })
}

/// Tell passport the old refresh token may be retired.
async fn confirm_refresh(
    client: &Client,
    endpoints: &PassportEndpoints,
    new_cookies: &str,
    new_csrf: &str,
    old_refresh_token: &str,
) -> Result<(), CookieRefreshError> {
    let confirm: ApiEnvelope<serde_json::Value> = client
        .post(endpoints.confirm())
        .header(reqwest::header::COOKIE, new_cookies)
        .header(reqwest::header::USER_AGENT, DEFAULT_UA)
        .form(&[
            ("csrf", new_csrf),
            ("csrf_token", new_csrf),
            ("refresh_token", old_refresh_token),
        ])
        .send()
        .await?
        .json()
        .await
        .map_err(|e| CookieRefreshError::Parse(e.to_string()))?;

    match confirm.code {
        0 => Ok(()),
        code => Err(CookieRefreshError::Rejected {
            code,
            message: confirm.message,
        }),
    }
}

async fn ensure_uid_cookie(client: &Client, endpoints: &PassportEndpoints, cookies: String) -> String {
    if extract_cookie_value(&cookies, "DedeUserID").is_some() {
        return cookies;
    }
    match fetch_nav(client, endpoints, &cookies).await {
        Ok(nav) if nav.is_login && nav.mid > 0 => {
            debug!(mid = nav.mid, "Filled DedeUserID from nav");
            let mut updates = BTreeMap::new();
            updates.insert("DedeUserID".to_string(), nav.mid.to_string());
            rebuild_cookies(&cookies, &updates)
        }
        _ => cookies,
    }
}

/// Call the nav API with the given cookies.
pub async fn fetch_nav(
    client: &Client,
    endpoints: &PassportEndpoints,
    cookies: &str,
) -> Result<NavInfo, CookieRefreshError> {
    let cookies = strip_refresh_token(cookies);
    let envelope: ApiEnvelope<NavInfo> = client
        .get(endpoints.nav())
        .header(reqwest::header::COOKIE, &cookies)
        .header(reqwest::header::USER_AGENT, DEFAULT_UA)
        .send()
        .await?
        .json()
        .await
        .map_err(|e| CookieRefreshError::Parse(e.to_string()))?;

    // code -101 still carries a data object with isLogin=false
    if envelope.code != 0 {
        return Ok(NavInfo::default());
    }
    Ok(envelope.data.unwrap_or_default())
}

/// Validate cookies by making an authenticated API call.
pub async fn validate_cookies(
    client: &Client,
    endpoints: &PassportEndpoints,
    cookies: &str,
) -> Result<bool, CookieRefreshError> {
    Ok(fetch_nav(client, endpoints, cookies).await?.is_login)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path, path_regex, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const COOKIES: &str = "SESSDATA=s1; bili_jct=jct1; DedeUserID=42; refresh_token=rt1";

    fn client() -> Client {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
        Client::new()
    }

    #[test]
    fn test_generate_correspond_path() {
        let path = generate_correspond_path(1234567890123).unwrap();
        // 1024-bit key -> 128 bytes of ciphertext
        assert_eq!(path.len(), 256);
        assert!(path.chars().all(|c| c.is_ascii_hexdigit()));
        // OAEP is randomized
        assert_ne!(path, generate_correspond_path(1234567890123).unwrap());
    }

    #[test]
    fn test_single_host_endpoints() {
        let endpoints = PassportEndpoints::single_host("http://127.0.0.1:9000/");
        assert_eq!(
            endpoints.correspond("ab"),
            "http://127.0.0.1:9000/correspond/1/ab"
        );
        assert_eq!(endpoints.nav(), "http://127.0.0.1:9000/x/web-interface/nav");
    }

    #[tokio::test]
    async fn test_check_cookie_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/x/passport-login/web/cookie/info"))
            .and(query_param("csrf", "jct1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"code":0,"message":"0","data":{"refresh":true,"timestamp":1700000000000}}"#,
            ))
            .mount(&server)
            .await;

        let endpoints = PassportEndpoints::single_host(server.uri());
        let status = check_cookie_status(&client(), &endpoints, COOKIES)
            .await
            .unwrap();
        assert_eq!(
            status,
            CookieStatus::NeedsRefresh {
                deadline_timestamp: Some(1700000000000)
            }
        );
    }

    #[tokio::test]
    async fn test_check_cookie_status_requires_csrf_cookie() {
        let endpoints = PassportEndpoints::single_host("http://127.0.0.1:1");
        let err = check_cookie_status(&client(), &endpoints, "SESSDATA=s1")
            .await
            .unwrap_err();
        assert!(matches!(err, CookieRefreshError::MissingCookie("bili_jct")));
    }

    #[tokio::test]
    async fn test_refresh_cookies_full_exchange() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/correspond/1/[0-9a-f]{256}$"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"<html><div id="1-name">csrf-token</div></html>"#),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/x/passport-login/web/cookie/refresh"))
            .and(body_string_contains("refresh_csrf=csrf-token"))
            .and(body_string_contains("refresh_token=rt1"))
            .and(body_string_contains("source=main_web"))
            .respond_with(
                ResponseTemplate::new(200)
                    .append_header("Set-Cookie", "SESSDATA=s2; Path=/; HttpOnly")
                    .append_header("Set-Cookie", "bili_jct=jct2; Path=/")
                    .set_body_string(r#"{"code":0,"data":{"refresh_token":"rt2"}}"#),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/x/passport-login/web/confirm/refresh"))
            .and(body_string_contains("csrf=jct2"))
            .and(body_string_contains("refresh_token=rt1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"code":0}"#))
            .expect(1)
            .mount(&server)
            .await;

        let endpoints = PassportEndpoints::single_host(server.uri());
        let refreshed = refresh_cookies(&client(), &endpoints, COOKIES, "rt1")
            .await
            .unwrap();

        assert_eq!(refreshed.refresh_token, "rt2");
        assert_eq!(refreshed.cookies, "SESSDATA=s2; bili_jct=jct2; DedeUserID=42");
    }

    #[tokio::test]
    async fn test_refresh_keeps_rotation_when_confirm_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/correspond/1/"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(r#"<div id="1-name">tok</div>"#),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/x/passport-login/web/cookie/refresh"))
            .respond_with(
                ResponseTemplate::new(200)
                    .append_header("Set-Cookie", "SESSDATA=s2; Path=/")
                    .append_header("Set-Cookie", "bili_jct=jct2; Path=/")
                    .set_body_string(r#"{"code":0,"data":{"refresh_token":"rt2"}}"#),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/x/passport-login/web/confirm/refresh"))
            .respond_with(
                ResponseTemplate::new(502).set_body_string("<html>Bad Gateway</html>"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let endpoints = PassportEndpoints::single_host(server.uri());
        let refreshed = refresh_cookies(&client(), &endpoints, COOKIES, "rt1")
            .await
            .unwrap();

        assert_eq!(refreshed.refresh_token, "rt2");
        assert_eq!(refreshed.cookies, "SESSDATA=s2; bili_jct=jct2; DedeUserID=42");
    }

    #[tokio::test]
    async fn test_refresh_without_marker_is_distinct_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/correspond/1/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>captcha</html>"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"code":0}"#))
            .expect(0)
            .mount(&server)
            .await;

        let endpoints = PassportEndpoints::single_host(server.uri());
        let err = refresh_cookies(&client(), &endpoints, COOKIES, "rt1")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CookieRefreshError::RefreshCsrfNotFound { status: 200 }
        ));
    }

    #[tokio::test]
    async fn test_refresh_rejected_by_server() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/correspond/1/"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(r#"<div id="1-name">c</div>"#),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/x/passport-login/web/cookie/refresh"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"code":86095,"message":"refresh_csrf error"}"#),
            )
            .mount(&server)
            .await;

        let endpoints = PassportEndpoints::single_host(server.uri());
        let err = refresh_cookies(&client(), &endpoints, COOKIES, "rt1")
            .await
            .unwrap_err();
        assert!(matches!(err, CookieRefreshError::Rejected { code: 86095, .. }));
    }

    #[tokio::test]
    async fn test_validate_cookies() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/x/web-interface/nav"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"code":0,"data":{"isLogin":true,"mid":42,"uname":"someone"}}"#,
            ))
            .mount(&server)
            .await;

        let endpoints = PassportEndpoints::single_host(server.uri());
        assert!(validate_cookies(&client(), &endpoints, COOKIES).await.unwrap());
    }
}
