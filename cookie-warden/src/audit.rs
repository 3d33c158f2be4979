//! Audit artifacts for human review of unattended logins.
//!
//! The browser refresher captures a screenshot once the session is renewed
//! and hands it to an [`AuditSink`].

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use tracing::debug;

use crate::{Error, Result};

#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Store a PNG screenshot. Returns a locator (URL or path) for logs.
    async fn upload_png(&self, label: &str, png: Vec<u8>) -> Result<String>;
}

/// POSTs the screenshot as `image/png` to an upload endpoint.
pub struct HttpAuditSink {
    client: Client,
    url: String,
}

impl HttpAuditSink {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl AuditSink for HttpAuditSink {
    async fn upload_png(&self, label: &str, png: Vec<u8>) -> Result<String> {
        let size = png.len();
        let response = self
            .client
            .post(&self.url)
            .query(&[("label", label)])
            .header(reqwest::header::CONTENT_TYPE, "image/png")
            .body(png)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Other(format!(
                "audit upload failed: {} - {}",
                status, body
            )));
        }

        // Prefer a Location header, then a plain-text body, then the endpoint.
        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.unwrap_or_default();
        let locator = location
            .or_else(|| Some(body.trim().to_string()).filter(|b| !b.is_empty()))
            .unwrap_or_else(|| self.url.clone());

        debug!(size, %locator, "Audit screenshot uploaded");
        Ok(locator)
    }
}

/// Writes `{dir}/{label}-{timestamp}.png`.
pub struct DirectoryAuditSink {
    dir: PathBuf,
}

impl DirectoryAuditSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl AuditSink for DirectoryAuditSink {
    async fn upload_png(&self, label: &str, png: Vec<u8>) -> Result<String> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let safe_label: String = label
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        let path = self.dir.join(format!(
            "{}-{}.png",
            safe_label,
            Utc::now().format("%Y%m%dT%H%M%S%.3f")
        ));
        tokio::fs::write(&path, png).await?;
        Ok(path.display().to_string())
    }
}
