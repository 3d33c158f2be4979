//! CDP browser driver backed by a local Chromium.

use std::path::PathBuf;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::CookieParam;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::debug;

use super::browser::{BrowserCookie, BrowserDriver, BrowserSession};
use crate::credentials::error::CredentialError;

fn browser_err(e: impl std::fmt::Display) -> CredentialError {
    CredentialError::Browser(e.to_string())
}

/// Launches a fresh incognito Chromium per refresh.
#[derive(Debug, Clone, Default)]
pub struct ChromiumDriver {
    /// Chrome/Chromium binary; auto-detected when unset.
    pub executable: Option<PathBuf>,
    /// Show the browser window.
    pub headful: bool,
}

#[async_trait]
impl BrowserDriver for ChromiumDriver {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, CredentialError> {
        let mut builder = BrowserConfig::builder().incognito();
        if self.headful {
            builder = builder.with_head();
        }
        if let Some(executable) = &self.executable {
            builder = builder.chrome_executable(executable);
        }
        let config = builder.build().map_err(browser_err)?;

        let (browser, mut handler) = Browser::launch(config).await.map_err(browser_err)?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "CDP handler stopped");
                    break;
                }
            }
        });

        let page = browser.new_page("about:blank").await.map_err(browser_err)?;
        Ok(Box::new(ChromiumSession {
            browser,
            page,
            handler,
        }))
    }
}

struct ChromiumSession {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn set_cookies(&mut self, cookies: &[BrowserCookie]) -> Result<(), CredentialError> {
        let params = cookies
            .iter()
            .map(|c| {
                CookieParam::builder()
                    .name(c.name.clone())
                    .value(c.value.clone())
                    .domain(c.domain.clone())
                    .path(c.path.clone())
                    .build()
                    .map_err(browser_err)
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.page.set_cookies(params).await.map_err(browser_err)?;
        Ok(())
    }

    async fn navigate(&mut self, url: &str) -> Result<(), CredentialError> {
        self.page.goto(url).await.map_err(browser_err)?;
        Ok(())
    }

    async fn cookies(&mut self) -> Result<Vec<BrowserCookie>, CredentialError> {
        let cookies = self.page.get_cookies().await.map_err(browser_err)?;
        Ok(cookies
            .into_iter()
            .map(|c| BrowserCookie {
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: c.path,
            })
            .collect())
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>, CredentialError> {
        self.page
            .screenshot(ScreenshotParams::builder().full_page(true).build())
            .await
            .map_err(browser_err)
    }

    async fn close(self: Box<Self>) -> Result<(), CredentialError> {
        let ChromiumSession {
            mut browser,
            page,
            handler,
        } = *self;
        drop(page);
        let closed = browser.close().await.map(|_| ()).map_err(browser_err);
        let _ = browser.wait().await;
        handler.abort();
        closed
    }
}
