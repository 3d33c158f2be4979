//! Application configuration.
//!
//! Loaded from a TOML file; every field has a default so an empty file is a
//! valid (if not very useful) configuration.

pub mod duration;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::credentials::KeepaliveSchedule;
use crate::credentials::platforms::BrowserRefresherConfig;
use crate::notification::NotificationServiceConfig;
use crate::{Error, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub http: HttpConfig,
    pub target: TargetConfig,
    pub keepalive: KeepaliveConfig,
    pub poll: PollConfig,
    pub dedup: DedupConfig,
    pub archive: ArchiveConfig,
    pub browse: BrowseConfig,
    pub browser: BrowserSettings,
    pub notification: NotificationServiceConfig,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!(
                "failed to read config file '{}': {e}",
                path.display()
            ))
        })?;
        Self::from_toml(&contents).map_err(|e| match e {
            Error::Configuration(msg) => {
                Error::config(format!("'{}': {msg}", path.display()))
            }
            other => other,
        })
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig =
            toml::from_str(contents).map_err(|e| Error::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.target.id.trim().is_empty() {
            return Err(Error::config("target.id must not be empty"));
        }
        if self
            .target
            .id
            .contains(|c: char| c == '/' || c == '\\' || c.is_whitespace())
        {
            return Err(Error::config(
                "target.id must not contain path separators or whitespace",
            ));
        }

        match (self.target.refresher, self.target.site) {
            (RefresherKind::ChallengeResponse, Site::Bilibili)
            | (RefresherKind::Browser, Site::Weibo) => {}
            (refresher, site) => {
                return Err(Error::config(format!(
                    "refresher '{refresher:?}' is not supported for site '{site:?}'"
                )));
            }
        }

        self.keepalive.schedule()?;

        if self.poll.min_interval.is_zero() || self.poll.max_interval.is_zero() {
            return Err(Error::config("poll intervals must be greater than zero"));
        }
        if self.poll.min_interval > self.poll.max_interval {
            return Err(Error::config(
                "poll.min_interval must not exceed poll.max_interval",
            ));
        }
        if self.poll.enabled && self.target.site == Site::Weibo && self.poll.uid == 0 {
            return Err(Error::config("poll.uid is required to poll a Weibo timeline"));
        }

        if self.dedup.retention.is_zero() || self.dedup.sweep_interval.is_zero() {
            return Err(Error::config(
                "dedup.retention and dedup.sweep_interval must be greater than zero",
            ));
        }

        if self.browser.poll_interval.is_zero() || self.browser.timeout < self.browser.poll_interval
        {
            return Err(Error::config(
                "browser.timeout must be at least one browser.poll_interval",
            ));
        }
        if self.browser.required_cookies.is_empty() {
            return Err(Error::config("browser.required_cookies must name at least one cookie"));
        }
        for url in [Some(&self.browser.landing_url), self.browser.audit_url.as_ref()]
            .into_iter()
            .flatten()
        {
            url::Url::parse(url)
                .map_err(|e| Error::config(format!("invalid URL '{url}': {e}")))?;
        }
        if self.browse.enabled {
            self.browse.listen.parse::<std::net::SocketAddr>().map_err(|e| {
                Error::config(format!("invalid browse.listen '{}': {e}", self.browse.listen))
            })?;
        }
        if let Some(proxy) = &self.http.proxy.url {
            url::Url::parse(proxy)
                .map_err(|e| Error::config(format!("invalid proxy URL '{proxy}': {e}")))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:cookie-warden.db?mode=rwc".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive; `RUST_LOG` wins when set.
    pub filter: Option<String>,
    /// Directory for the daily log files.
    pub directory: PathBuf,
    /// Write the file log as JSON lines.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: None,
            directory: PathBuf::from("logs"),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    #[serde(with = "duration")]
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub proxy: ProxyConfig,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: None,
            proxy: ProxyConfig::default(),
        }
    }
}

/// Outbound proxy.
///
/// - `enabled = false`: no proxy at all, environment included
/// - `url` set: that proxy, with optional basic auth
/// - otherwise: system/environment proxy when `use_system_proxy`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub enabled: bool,
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_system_proxy: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Site {
    Bilibili,
    Weibo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefresherKind {
    ChallengeResponse,
    Browser,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub id: String,
    pub site: Site,
    /// Persist to this cookie file instead of the database.
    pub cookie_file: Option<PathBuf>,
    pub refresher: RefresherKind,
    /// Skip the validity probe and always refresh.
    pub forced: bool,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            id: "bilibili".to_string(),
            site: Site::Bilibili,
            cookie_file: None,
            refresher: RefresherKind::ChallengeResponse,
            forced: false,
        }
    }
}

/// At most one of `every`, `daily_at` and `cron` may be set; the default is
/// every six hours.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepaliveConfig {
    #[serde(with = "duration::option", skip_serializing_if = "Option::is_none")]
    pub every: Option<Duration>,
    /// `HH:MM[:SS]` wall-clock time.
    pub daily_at: Option<String>,
    /// Six-field cron expression.
    pub cron: Option<String>,
    pub timezone: String,
    /// Force one refresh before the schedule starts.
    pub refresh_on_startup: bool,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            every: None,
            daily_at: None,
            cron: None,
            timezone: "UTC".to_string(),
            refresh_on_startup: false,
        }
    }
}

impl KeepaliveConfig {
    pub const DEFAULT_PERIOD: Duration = Duration::from_secs(6 * 3600);

    pub fn schedule(&self) -> Result<KeepaliveSchedule> {
        match (self.every, self.daily_at.as_deref(), self.cron.as_deref()) {
            (None, None, None) => Ok(KeepaliveSchedule::Every(Self::DEFAULT_PERIOD)),
            (Some(every), None, None) if every.is_zero() => {
                Err(Error::config("keepalive.every must be greater than zero"))
            }
            (Some(every), None, None) => Ok(KeepaliveSchedule::Every(every)),
            (None, Some(time), None) => KeepaliveSchedule::daily_at(time, &self.timezone),
            (None, None, Some(expr)) => KeepaliveSchedule::cron(expr, &self.timezone),
            _ => Err(Error::config(
                "set only one of keepalive.every, keepalive.daily_at, keepalive.cron",
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub enabled: bool,
    #[serde(with = "duration")]
    pub min_interval: Duration,
    #[serde(with = "duration")]
    pub max_interval: Duration,
    /// Timeline owner.
    pub uid: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_interval: Duration::from_secs(60),
            max_interval: Duration::from_secs(180),
            uid: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    #[serde(with = "duration")]
    pub retention: Duration,
    #[serde(with = "duration")]
    pub sweep_interval: Duration,
    /// Seed the index from the content table at startup.
    pub hydrate: bool,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            retention: crate::dedup::DEFAULT_RETENTION,
            sweep_interval: Duration::from_secs(24 * 3600),
            hydrate: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveKind {
    #[default]
    Database,
    Directory,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub kind: ArchiveKind,
    pub directory: PathBuf,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            kind: ArchiveKind::Database,
            directory: PathBuf::from("archive"),
        }
    }
}

/// Read-only HTTP view over the archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowseConfig {
    pub enabled: bool,
    pub listen: String,
}

impl Default for BrowseConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: "127.0.0.1:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub landing_url: String,
    pub cookie_domain: String,
    pub required_cookies: Vec<String>,
    #[serde(with = "duration")]
    pub poll_interval: Duration,
    #[serde(with = "duration")]
    pub timeout: Duration,
    /// Upload endpoint for the post-refresh screenshot.
    pub audit_url: Option<String>,
    /// Local directory for screenshots when no upload URL is set.
    pub audit_dir: Option<PathBuf>,
    /// Chrome/Chromium binary.
    pub executable: Option<PathBuf>,
    pub headful: bool,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        let defaults = BrowserRefresherConfig::default();
        Self {
            landing_url: defaults.landing_url,
            cookie_domain: defaults.cookie_domain,
            required_cookies: defaults.required_cookies,
            poll_interval: defaults.poll_interval,
            timeout: defaults.timeout,
            audit_url: None,
            audit_dir: None,
            executable: None,
            headful: false,
        }
    }
}

impl BrowserSettings {
    pub fn refresher_config(&self) -> BrowserRefresherConfig {
        BrowserRefresherConfig {
            landing_url: self.landing_url.clone(),
            cookie_domain: self.cookie_domain.clone(),
            required_cookies: self.required_cookies.clone(),
            poll_interval: self.poll_interval,
            timeout: self.timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_is_valid() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config.target.id, "bilibili");
        assert_eq!(config.dedup.retention, Duration::from_secs(14 * 86_400));
        assert!(matches!(
            config.keepalive.schedule().unwrap(),
            KeepaliveSchedule::Every(d) if d == KeepaliveConfig::DEFAULT_PERIOD
        ));
    }

    #[test]
    fn test_full_weibo_config() {
        let config = AppConfig::from_toml(
            r#"
            [target]
            id = "weibo-main"
            site = "weibo"
            refresher = "browser"
            cookie_file = "cookies"

            [keepalive]
            daily_at = "04:30"
            timezone = "Asia/Shanghai"
            refresh_on_startup = true

            [poll]
            min_interval = "30s"
            max_interval = "2m"
            uid = 7198559139

            [dedup]
            retention = "7d"

            [browser]
            required_cookies = ["XSRF-TOKEN", "SUB"]
            timeout = "30s"

            [[notification.channels]]
            type = "webhook"
            name = "ops"
            url = "https://hooks.example.com/x"
            "#,
        )
        .unwrap();

        assert_eq!(config.target.site, Site::Weibo);
        assert_eq!(config.poll.max_interval, Duration::from_secs(120));
        assert_eq!(config.dedup.retention, Duration::from_secs(7 * 86_400));
        assert_eq!(config.browser.refresher_config().required_cookies.len(), 2);
        assert_eq!(config.notification.channels.len(), 1);
        assert!(matches!(
            config.keepalive.schedule().unwrap(),
            KeepaliveSchedule::DailyAt { .. }
        ));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let cases = [
            "[target]\nid = \"\"",
            "[poll]\nmin_interval = \"5m\"\nmax_interval = \"1m\"",
            "[poll]\nmin_interval = \"0s\"",
            "[keepalive]\ncron = \"every day\"",
            "[keepalive]\ndaily_at = \"04:00\"\ntimezone = \"Nowhere/City\"",
            "[keepalive]\nevery = \"1h\"\ndaily_at = \"04:00\"",
            "[target]\nsite = \"weibo\"\nrefresher = \"challenge_response\"",
            "[target]\nsite = \"weibo\"\nrefresher = \"browser\"",
            "[poll]\nmin_interval = \"soon\"",
            "[browse]\nenabled = true\nlisten = \"localhost\"",
        ];
        for case in cases {
            assert!(AppConfig::from_toml(case).is_err(), "accepted: {case}");
        }
    }
}
