//! Browser-automation refresher.
//!
//! For sites whose session cookies can only be re-issued by the page itself:
//! inject the current cookies into a fresh browser context, load an
//! authenticated page and wait for the site to set the required cookies.
//! The browser is reached through [`BrowserDriver`] so the flow can run
//! against a CDP browser (`chromium` feature) or a scripted fake.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::audit::AuditSink;
use crate::credentials::error::CredentialError;
use crate::credentials::refresher::Refresher;
use crate::credentials::types::Credential;

/// A cookie as seen by the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
}

/// Starts isolated browser contexts.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, CredentialError>;
}

/// One isolated browser context with a single page.
#[async_trait]
pub trait BrowserSession: Send {
    async fn set_cookies(&mut self, cookies: &[BrowserCookie]) -> Result<(), CredentialError>;
    async fn navigate(&mut self, url: &str) -> Result<(), CredentialError>;
    /// Current cookie jar of the page.
    async fn cookies(&mut self) -> Result<Vec<BrowserCookie>, CredentialError>;
    async fn screenshot(&mut self) -> Result<Vec<u8>, CredentialError>;
    async fn close(self: Box<Self>) -> Result<(), CredentialError>;
}

/// One real authenticated API call.
#[async_trait]
pub trait SessionProbe: Send + Sync {
    /// `Ok(false)` when the service rejects the session.
    async fn probe(&self, credential: &Credential) -> Result<bool, CredentialError>;
}

#[derive(Debug, Clone)]
pub struct BrowserRefresherConfig {
    /// Authenticated page that re-issues the session cookies.
    pub landing_url: String,
    /// Domain the injected cookies are scoped to.
    pub cookie_domain: String,
    /// Cookies that must all be present before the jar is accepted.
    pub required_cookies: Vec<String>,
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for BrowserRefresherConfig {
    fn default() -> Self {
        Self {
            landing_url: "https://weibo.com/".to_string(),
            cookie_domain: ".weibo.com".to_string(),
            required_cookies: vec!["XSRF-TOKEN".to_string()],
            poll_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(40),
        }
    }
}

pub struct BrowserRefresher {
    driver: Arc<dyn BrowserDriver>,
    probe: Arc<dyn SessionProbe>,
    audit: Option<Arc<dyn AuditSink>>,
    config: BrowserRefresherConfig,
}

impl BrowserRefresher {
    pub fn new(
        driver: Arc<dyn BrowserDriver>,
        probe: Arc<dyn SessionProbe>,
        config: BrowserRefresherConfig,
    ) -> Self {
        Self {
            driver,
            probe,
            audit: None,
            config,
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    async fn run_session(
        &self,
        session: &mut dyn BrowserSession,
        credential: &Credential,
    ) -> Result<Credential, CredentialError> {
        let injected: Vec<BrowserCookie> = credential
            .cookies()
            .map(|(name, value)| BrowserCookie {
                name: name.to_string(),
                value: value.to_string(),
                domain: self.config.cookie_domain.clone(),
                path: "/".to_string(),
            })
            .collect();
        session.set_cookies(&injected).await?;
        session.navigate(&self.config.landing_url).await?;

        let jar = self.wait_for_required(session).await?;

        let renewed = Credential::new(
            credential.target_id.clone(),
            jar.into_iter().map(|c| (c.name, c.value)),
        )
        .with_refresh_token(credential.refresh_token.clone());

        if !self.probe.probe(&renewed).await? {
            return Err(CredentialError::RefreshRejected(
                "renewed browser session failed validation".to_string(),
            ));
        }

        self.upload_audit(session, &credential.target_id).await;
        Ok(renewed)
    }

    /// Poll the jar until every required cookie is present.
    async fn wait_for_required(
        &self,
        session: &mut dyn BrowserSession,
    ) -> Result<Vec<BrowserCookie>, CredentialError> {
        let started = Instant::now();
        let mut missing: Vec<String> = self.config.required_cookies.clone();
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let poll = async {
            loop {
                ticker.tick().await;
                let jar = session.cookies().await?;
                // Judge each jar on its own; a cookie seen earlier may be gone now.
                missing = missing_from(&self.config.required_cookies, &jar);
                if missing.is_empty() {
                    return Ok::<_, CredentialError>(jar);
                }
                debug!(missing = ?missing, elapsed = ?started.elapsed(), "Waiting for browser cookies");
            }
        };

        let outcome = tokio::time::timeout(self.config.timeout, poll).await;
        match outcome {
            Ok(result) => result,
            Err(_) => Err(CredentialError::BrowserTimeout {
                waited: started.elapsed(),
                missing,
            }),
        }
    }

    async fn upload_audit(&self, session: &mut dyn BrowserSession, target_id: &str) {
        let Some(audit) = self.audit.as_ref() else {
            return;
        };
        let png = match session.screenshot().await {
            Ok(png) => png,
            Err(e) => {
                warn!(error = %e, "Audit screenshot failed");
                return;
            }
        };
        match audit.upload_png(target_id, png).await {
            Ok(locator) => info!(%locator, "Audit screenshot stored"),
            Err(e) => warn!(error = %e, "Audit screenshot upload failed"),
        }
    }
}

fn missing_from(required: &[String], jar: &[BrowserCookie]) -> Vec<String> {
    required
        .iter()
        .filter(|name| !jar.iter().any(|c| &c.name == *name && !c.value.is_empty()))
        .cloned()
        .collect()
}

#[async_trait]
impl Refresher for BrowserRefresher {
    fn name(&self) -> &'static str {
        "browser"
    }

    async fn is_valid(&self, credential: &Credential) -> Result<bool, CredentialError> {
        self.probe.probe(credential).await
    }

    #[instrument(skip_all, fields(target_id = %credential.target_id))]
    async fn refresh(&self, credential: &Credential) -> Result<Credential, CredentialError> {
        let mut session = self.driver.launch().await?;
        let result = self.run_session(session.as_mut(), credential).await;
        if let Err(e) = session.close().await {
            warn!(error = %e, "Failed to close browser session");
        }
        result
    }
}
