//! Bilibili web QR login.
//!
//! Used once to bootstrap a credential: the login response sets the session
//! cookies and hands out the first refresh token.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::cookie_refresh::PassportEndpoints;
use super::cookie_utils::parse_set_cookies;
use crate::DEFAULT_UA;

#[derive(Debug, Error)]
pub enum QrLoginError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("API error: {0}")]
    Api(String),
}

/// QR code generation response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QrGenerateResponse {
    /// URL to encode as QR code
    pub url: String,
    /// Key used for polling
    pub qrcode_key: String,
}

/// QR code poll status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QrPollStatus {
    NotScanned,
    ScannedNotConfirmed,
    Expired,
    Success,
}

/// QR code poll result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QrPollResult {
    pub status: QrPollStatus,
    /// Response message from API
    pub message: String,
    /// Cookie header (on success)
    pub cookies: Option<String>,
    /// First refresh token (on success)
    pub refresh_token: Option<String>,
}

impl QrPollResult {
    fn pending(status: QrPollStatus, message: String) -> Self {
        Self {
            status,
            message,
            cookies: None,
            refresh_token: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct GenerateData {
    url: String,
    qrcode_key: String,
}

#[derive(Debug, Deserialize)]
struct PollData {
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    refresh_token: String,
}

/// Generate a login QR code.
pub async fn generate_qr(
    client: &Client,
    endpoints: &PassportEndpoints,
) -> Result<QrGenerateResponse, QrLoginError> {
    let body: Envelope<GenerateData> = client
        .get(endpoints.qr_generate())
        .header(reqwest::header::USER_AGENT, DEFAULT_UA)
        .send()
        .await?
        .json()
        .await
        .map_err(|e| QrLoginError::Parse(e.to_string()))?;

    if body.code != 0 {
        return Err(QrLoginError::Api(format!(
            "QR generate failed: {} ({})",
            body.message, body.code
        )));
    }
    let data = body
        .data
        .ok_or_else(|| QrLoginError::Parse("No data field".to_string()))?;

    Ok(QrGenerateResponse {
        url: data.url,
        qrcode_key: data.qrcode_key,
    })
}

/// Poll the status of a QR code login.
pub async fn poll_qr(
    client: &Client,
    endpoints: &PassportEndpoints,
    qrcode_key: &str,
) -> Result<QrPollResult, QrLoginError> {
    let response = client
        .get(endpoints.qr_poll())
        .query(&[("qrcode_key", qrcode_key)])
        .header(reqwest::header::USER_AGENT, DEFAULT_UA)
        .send()
        .await?;

    let set_cookies = parse_set_cookies(response.headers());
    let body: Envelope<PollData> = response
        .json()
        .await
        .map_err(|e| QrLoginError::Parse(e.to_string()))?;

    if body.code != 0 {
        return Err(QrLoginError::Api(format!(
            "Poll failed: {} ({})",
            body.message, body.code
        )));
    }
    let data = body
        .data
        .ok_or_else(|| QrLoginError::Parse("No data field".to_string()))?;

    tracing::debug!(code = data.code, message = %data.message, "Bilibili QR poll response");

    match data.code {
        0 => {}
        86101 => return Ok(QrPollResult::pending(QrPollStatus::NotScanned, data.message)),
        86090 => {
            return Ok(QrPollResult::pending(
                QrPollStatus::ScannedNotConfirmed,
                data.message,
            ));
        }
        86038 => return Ok(QrPollResult::pending(QrPollStatus::Expired, data.message)),
        code => {
            return Err(QrLoginError::Api(format!(
                "Poll failed: {} ({})",
                data.message, code
            )));
        }
    }

    if set_cookies.is_empty() || data.refresh_token.is_empty() {
        return Err(QrLoginError::Parse(
            "login confirmed without cookies or refresh_token".to_string(),
        ));
    }

    let cookies = set_cookies
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("; ");

    Ok(QrPollResult {
        status: QrPollStatus::Success,
        message: data.message,
        cookies: Some(cookies),
        refresh_token: Some(data.refresh_token),
    })
}
