//! The jittered polling loop.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

use super::archive::ContentArchive;
use super::source::{ContentSource, FetchError, PageItems};
use super::ticker::JitteredTicker;
use crate::credentials::{CredentialService, RefreshOutcome};
use crate::dedup::DedupIndex;
use crate::notification::Notifier;

/// Counters for one poll.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub fetched: usize,
    pub emitted: usize,
    pub skipped: usize,
    pub malformed: usize,
    /// Cancellation stopped the walk before the page was exhausted.
    pub cancelled: bool,
}

pub struct PollingIngester {
    source: Arc<dyn ContentSource>,
    credentials: Arc<CredentialService>,
    dedup: Arc<DedupIndex>,
    archive: Arc<dyn ContentArchive>,
    notifier: Option<Arc<dyn Notifier>>,
    ticker: JitteredTicker,
    /// Outstanding notification deliveries.
    deliveries: TaskTracker,
}

impl PollingIngester {
    pub fn new(
        source: Arc<dyn ContentSource>,
        credentials: Arc<CredentialService>,
        dedup: Arc<DedupIndex>,
        archive: Arc<dyn ContentArchive>,
        ticker: JitteredTicker,
    ) -> Self {
        Self {
            source,
            credentials,
            dedup,
            archive,
            notifier: None,
            ticker,
            deliveries: TaskTracker::new(),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Fetch one page and forward whatever is new.
    ///
    /// An authentication failure triggers a refresh for the credential that
    /// was rejected before the error is returned.
    #[instrument(skip_all, fields(source = self.source.name()))]
    pub async fn poll_once(&self, cancel: &CancellationToken) -> Result<TickReport, FetchError> {
        let (credential, generation) = self.credentials.store().snapshot();

        let page = match self.source.fetch_page(&credential).await {
            Ok(page) => page,
            Err(e) if e.is_auth() => {
                warn!(error = %e, generation, "Fetch rejected, refreshing credential");
                match self.credentials.refresh_if_current(generation).await {
                    Ok(RefreshOutcome::Superseded) => {
                        debug!("Credential already replaced by another task");
                    }
                    Ok(outcome) => debug!(?outcome, "Refresh after auth error finished"),
                    Err(refresh_err) => {
                        error!(error = %refresh_err, "Refresh after auth error failed");
                    }
                }
                return Err(e);
            }
            Err(e) => {
                warn!(error = %e, "Fetch failed, waiting for the next tick");
                return Err(e);
            }
        };

        let mut report = TickReport {
            fetched: page.len(),
            ..Default::default()
        };
        let mut items = PageItems::new(self.source.as_ref(), page, cancel);

        for item in items.by_ref() {
            let observation = self.dedup.observe(&item.id, item.version);
            let Some(event) = item.to_event(observation) else {
                report.skipped += 1;
                continue;
            };
            report.emitted += 1;
            debug!(item_id = %item.id, version = item.version, ?observation, "Forwarding item");

            // Still counted as seen when the archive fails.
            if let Err(e) = self.archive.store(&item).await {
                error!(item_id = %item.id, error = %e, "Failed to archive item");
            }

            if let Some(notifier) = self.notifier.clone() {
                let item_id = item.id.clone();
                self.deliveries.spawn(async move {
                    if let Err(e) = notifier.notify(event).await {
                        warn!(%item_id, error = %e, "Failed to deliver content notification");
                    }
                });
            }
        }

        report.malformed = items.malformed();
        report.cancelled = cancel.is_cancelled()
            && report.skipped + report.emitted + report.malformed < report.fetched;
        Ok(report)
    }

    /// Poll immediately, then once per jittered interval, until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(source = self.source.name(), "Polling ingester started");

        while !cancel.is_cancelled() {
            match self.poll_once(&cancel).await {
                Ok(report) if report.emitted > 0 || report.malformed > 0 => {
                    info!(
                        fetched = report.fetched,
                        emitted = report.emitted,
                        skipped = report.skipped,
                        malformed = report.malformed,
                        "Poll finished"
                    );
                }
                Ok(report) => debug!(fetched = report.fetched, "Nothing new"),
                // logged inside poll_once
                Err(_) => {}
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.ticker.tick() => {}
            }
        }

        self.deliveries.close();
        self.deliveries.wait().await;
        info!(source = self.source.name(), "Polling ingester stopped");
    }

    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }
}
