//! Wires configuration into running components.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use warden_platforms::bilibili::PassportEndpoints;
use warden_platforms::bilibili::qr_login::{QrPollStatus, generate_qr, poll_qr};
use warden_platforms::weibo::WeiboEndpoints;

use crate::api::{self, BrowseState};
use crate::audit::{AuditSink, DirectoryAuditSink, HttpAuditSink};
use crate::config::{AppConfig, ArchiveKind, RefresherKind, Site};
use crate::credentials::platforms::{BrowserDriver, BrowserRefresher, ChallengeResponseRefresher, WeiboSessionProbe};
use crate::credentials::{
    Credential, CredentialPersistence, CredentialService, CredentialStore,
    FileCredentialPersistence, ForcedRefresher, KeepaliveScheduler, RefreshOutcome, Refresher,
    ValidityState,
};
use crate::database::{self, DbPool, SqlxContentRepository, SqlxCredentialPersistence};
use crate::dedup::{DedupIndex, spawn_eviction};
use crate::ingest::platforms::WeiboTimelineSource;
use crate::ingest::{ContentArchive, ContentSource, JitteredTicker, JsonFileArchive, NullArchive, PollingIngester};
use crate::notification::{NotificationEvent, NotificationService, Notifier};
use crate::utils::build_http_client;
use crate::{Error, Result};

/// How often the QR login flow polls for a scan.
const QR_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Storage shared by every command.
pub struct Storage {
    pub pool: DbPool,
    pub credentials: Arc<dyn CredentialPersistence>,
}

impl Storage {
    /// Open the database, run migrations and pick the credential backend.
    pub async fn open(config: &AppConfig) -> Result<Self> {
        let pool = database::init_pool(&config.database.url).await?;
        database::run_migrations(&pool).await?;

        let credentials: Arc<dyn CredentialPersistence> = match &config.target.cookie_file {
            Some(dir) => Arc::new(FileCredentialPersistence::new(dir)),
            None => Arc::new(SqlxCredentialPersistence::new(pool.clone())),
        };
        Ok(Self { pool, credentials })
    }
}

pub struct App {
    config: AppConfig,
    storage: Storage,
    client: reqwest::Client,
    notifier: Arc<NotificationService>,
    credentials: Arc<CredentialService>,
    dedup: Arc<DedupIndex>,
}

impl App {
    /// Build every component. Fails when no credential is stored for the target.
    pub async fn build(config: AppConfig) -> Result<Self> {
        let storage = Storage::open(&config).await?;
        let client = build_http_client(&config.http);
        let notifier = Arc::new(NotificationService::with_config(config.notification.clone()));

        let store = CredentialStore::load(&config.target.id, storage.credentials.clone()).await?;
        info!(
            target_id = %config.target.id,
            updated_at = %store.get().updated_at,
            has_refresh_token = store.get().refresh_token.is_some(),
            "Credential loaded"
        );

        let refresher = build_refresher(&config, &client)?;
        let credentials = Arc::new(
            CredentialService::new(Arc::new(store), refresher)
                .with_notifier(notifier.clone() as Arc<dyn Notifier>),
        );
        let dedup = Arc::new(DedupIndex::new(config.dedup.retention));

        Ok(Self {
            config,
            storage,
            client,
            notifier,
            credentials,
            dedup,
        })
    }

    pub fn credentials(&self) -> &Arc<CredentialService> {
        &self.credentials
    }

    pub fn dedup(&self) -> &Arc<DedupIndex> {
        &self.dedup
    }

    /// One-shot validity probe.
    pub async fn check(&self) -> Result<ValidityState> {
        Ok(self.credentials.check().await?.0)
    }

    /// One-shot forced refresh.
    pub async fn refresh(&self) -> Result<RefreshOutcome> {
        let outcome = self.credentials.force_refresh().await?;
        // Surface a failed write; the service only logs it.
        if self.credentials.store().is_dirty() {
            self.credentials.store().persist().await?;
        }
        Ok(outcome)
    }

    /// Run keepalive, polling and eviction until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        self.notify(NotificationEvent::SystemStartup {
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: Utc::now(),
        })
        .await;

        if self.config.keepalive.refresh_on_startup {
            info!("Refreshing credential on startup");
            if let Err(e) = self.credentials.force_refresh().await {
                warn!(error = %e, "Startup refresh failed; continuing with the stored credential");
            }
        }

        let archive = self.build_archive();
        if self.config.dedup.hydrate && self.config.archive.kind == ArchiveKind::Database {
            self.hydrate_dedup().await;
        }

        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        let keepalive = Arc::new(KeepaliveScheduler::new(
            self.credentials.clone(),
            self.config.keepalive.schedule()?,
        ));
        tasks.push(keepalive.start(cancel.child_token()));

        tasks.push(spawn_eviction(
            self.dedup.clone(),
            self.config.dedup.sweep_interval,
            cancel.child_token(),
        ));

        if self.config.browse.enabled {
            let state = BrowseState {
                content: (self.config.archive.kind == ArchiveKind::Database)
                    .then(|| Arc::new(SqlxContentRepository::new(self.storage.pool.clone()))),
                archive_dir: self.config.archive.directory.clone(),
            };
            let listen = self.config.browse.listen.clone();
            let browse_cancel = cancel.child_token();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = api::serve(&listen, state, browse_cancel).await {
                    error!(error = %e, "Archive browser stopped");
                }
            }));
        }

        match self.build_source() {
            Some(source) if self.config.poll.enabled => {
                let ingester = PollingIngester::new(
                    source,
                    self.credentials.clone(),
                    self.dedup.clone(),
                    archive,
                    JitteredTicker::new(self.config.poll.min_interval, self.config.poll.max_interval),
                )
                .with_notifier(self.notifier.clone() as Arc<dyn Notifier>);
                tasks.push(Arc::new(ingester).start(cancel.child_token()));
            }
            Some(_) => info!("Polling disabled by configuration"),
            None => info!(site = ?self.config.target.site, "No content source for site; keepalive only"),
        }

        info!(tasks = tasks.len(), "cookie-warden running");
        cancel.cancelled().await;
        info!("Shutting down");

        for task in tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Background task ended abnormally");
            }
        }

        if self.credentials.store().is_dirty() {
            if let Err(e) = self.credentials.store().persist().await {
                error!(error = %e, "Credential not persisted at shutdown");
            }
        }

        self.notify(NotificationEvent::SystemShutdown {
            reason: "signal".to_string(),
            timestamp: Utc::now(),
        })
        .await;
        self.notifier.stop();
        self.storage.pool.close().await;
        Ok(())
    }

    async fn notify(&self, event: NotificationEvent) {
        if let Err(e) = self.notifier.notify(event).await {
            warn!(error = %e, "Failed to send system notification");
        }
    }

    async fn hydrate_dedup(&self) {
        let repo = SqlxContentRepository::new(self.storage.pool.clone());
        let retention =
            chrono::Duration::from_std(self.config.dedup.retention).unwrap_or(chrono::Duration::MAX);
        let since = Utc::now()
            .checked_sub_signed(retention)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

        match repo.latest_versions(since).await {
            Ok(versions) => {
                for stored in &versions {
                    self.dedup
                        .hydrate(&stored.item_id, stored.version, stored.first_seen_at);
                }
                info!(entries = versions.len(), "Dedup index hydrated");
            }
            Err(e) => warn!(error = %e, "Dedup hydration failed; starting empty"),
        }
    }

    fn build_archive(&self) -> Arc<dyn ContentArchive> {
        match self.config.archive.kind {
            ArchiveKind::Database => Arc::new(SqlxContentRepository::new(self.storage.pool.clone())),
            ArchiveKind::Directory => Arc::new(JsonFileArchive::new(&self.config.archive.directory)),
            ArchiveKind::None => Arc::new(NullArchive),
        }
    }

    fn build_source(&self) -> Option<Arc<dyn ContentSource>> {
        match self.config.target.site {
            Site::Weibo => Some(Arc::new(WeiboTimelineSource::new(
                self.client.clone(),
                WeiboEndpoints::default(),
                self.config.poll.uid,
            ))),
            Site::Bilibili => None,
        }
    }
}

fn build_refresher(config: &AppConfig, client: &reqwest::Client) -> Result<Arc<dyn Refresher>> {
    let refresher: Arc<dyn Refresher> = match config.target.refresher {
        RefresherKind::ChallengeResponse => Arc::new(ChallengeResponseRefresher::new(client.clone())),
        RefresherKind::Browser => {
            let probe = Arc::new(WeiboSessionProbe::new(
                client.clone(),
                WeiboEndpoints::default(),
                config.poll.uid,
            ));
            let mut refresher =
                BrowserRefresher::new(browser_driver(config)?, probe, config.browser.refresher_config());
            if let Some(audit) = audit_sink(config, client) {
                refresher = refresher.with_audit(audit);
            }
            Arc::new(refresher)
        }
    };

    if config.target.forced {
        return Ok(Arc::new(ForcedRefresher::new(refresher)));
    }
    Ok(refresher)
}

#[cfg(feature = "chromium")]
fn browser_driver(config: &AppConfig) -> Result<Arc<dyn BrowserDriver>> {
    Ok(Arc::new(crate::credentials::platforms::ChromiumDriver {
        executable: config.browser.executable.clone(),
        headful: config.browser.headful,
    }))
}

#[cfg(not(feature = "chromium"))]
fn browser_driver(_config: &AppConfig) -> Result<Arc<dyn BrowserDriver>> {
    Err(Error::config(
        "the browser refresher requires building with the `chromium` feature",
    ))
}

fn audit_sink(config: &AppConfig, client: &reqwest::Client) -> Option<Arc<dyn AuditSink>> {
    if let Some(url) = &config.browser.audit_url {
        return Some(Arc::new(HttpAuditSink::new(client.clone(), url.clone())));
    }
    config
        .browser
        .audit_dir
        .as_ref()
        .map(|dir| Arc::new(DirectoryAuditSink::new(dir)) as Arc<dyn AuditSink>)
}

/// Interactive Bilibili web QR login.
///
/// `show_url` receives the URL to encode as a QR code. Returns the saved
/// credential once the scan is confirmed.
pub async fn qr_login(
    config: &AppConfig,
    endpoints: &PassportEndpoints,
    show_url: impl Fn(&str),
) -> Result<Credential> {
    if config.target.site != Site::Bilibili {
        return Err(Error::config("QR login is only available for bilibili targets"));
    }
    let storage = Storage::open(config).await?;
    let client = build_http_client(&config.http);

    let qr = generate_qr(&client, endpoints)
        .await
        .map_err(|e| Error::Other(e.to_string()))?;
    show_url(&qr.url);

    loop {
        tokio::time::sleep(QR_POLL_INTERVAL).await;
        let result = poll_qr(&client, endpoints, &qr.qrcode_key)
            .await
            .map_err(|e| Error::Other(e.to_string()))?;

        match result.status {
            QrPollStatus::NotScanned => {}
            QrPollStatus::ScannedNotConfirmed => info!("QR code scanned, waiting for confirmation"),
            QrPollStatus::Expired => return Err(Error::Other("QR code expired".to_string())),
            QrPollStatus::Success => {
                let cookies = result
                    .cookies
                    .ok_or_else(|| Error::Other("login succeeded without cookies".to_string()))?;
                let credential = Credential::from_cookie_header(&config.target.id, &cookies)
                    .with_refresh_token(result.refresh_token);
                storage.credentials.save(&credential).await?;
                storage.pool.close().await;
                info!(target_id = %credential.target_id, "Login credential saved");
                return Ok(credential);
            }
        }
    }
}
