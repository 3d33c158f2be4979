//! Periodic credential keepalive.
//!
//! Each tick walks `Idle -> Checking -> (Valid: Idle | Stale: Refreshing -> Idle)`.
//! Failures never stop the loop; the next tick retries.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Days, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::error::CredentialError;
use super::service::{CredentialService, RefreshOutcome};
use super::types::ValidityState;
use crate::{Error, Result};

/// When the keepalive fires.
#[derive(Debug, Clone)]
pub enum KeepaliveSchedule {
    /// Fixed period, first tick one period after start.
    Every(Duration),
    /// Once a day at a wall-clock time.
    DailyAt { time: NaiveTime, tz: Tz },
    /// Six-field cron expression (`sec min hour day month weekday`).
    Cron {
        schedule: Box<cron::Schedule>,
        tz: Tz,
    },
}

impl KeepaliveSchedule {
    /// Parse a `HH:MM[:SS]` daily time in the given IANA timezone.
    pub fn daily_at(time: &str, timezone: &str) -> Result<Self> {
        let time = NaiveTime::parse_from_str(time, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(time, "%H:%M"))
            .map_err(|_| Error::config(format!("invalid daily time '{}'", time)))?;
        Ok(Self::DailyAt {
            time,
            tz: parse_tz(timezone)?,
        })
    }

    pub fn cron(expression: &str, timezone: &str) -> Result<Self> {
        let schedule = cron::Schedule::from_str(expression)
            .map_err(|e| Error::config(format!("invalid cron expression '{}': {}", expression, e)))?;
        Ok(Self::Cron {
            schedule: Box::new(schedule),
            tz: parse_tz(timezone)?,
        })
    }

    /// Time to wait from `now` until the next tick.
    pub fn next_delay(&self, now: DateTime<Utc>) -> Duration {
        let next = match self {
            Self::Every(period) => return *period,
            Self::DailyAt { time, tz } => next_daily(now, *time, tz),
            Self::Cron { schedule, tz } => schedule
                .after(&now.with_timezone(tz))
                .next()
                .map(|t| t.with_timezone(&Utc)),
        };

        match next {
            Some(next) => (next - now).to_std().unwrap_or(Duration::ZERO),
            None => {
                warn!("Schedule has no upcoming occurrence, retrying in 24h");
                Duration::from_secs(24 * 3600)
            }
        }
    }
}

fn parse_tz(timezone: &str) -> Result<Tz> {
    timezone
        .parse()
        .map_err(|_| Error::config(format!("'{}' is not a valid IANA timezone", timezone)))
}

fn next_daily(now: DateTime<Utc>, time: NaiveTime, tz: &Tz) -> Option<DateTime<Utc>> {
    let today = now.with_timezone(tz).date_naive();
    // A day whose local time falls into a DST gap is skipped.
    (0..3u64).find_map(|offset| {
        let date = today.checked_add_days(Days::new(offset))?;
        let candidate = tz
            .from_local_datetime(&date.and_time(time))
            .earliest()?
            .with_timezone(&Utc);
        (candidate > now).then_some(candidate)
    })
}

/// Keepalive state as observed between ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepaliveState {
    Idle,
    Checking,
    Refreshing,
}

pub struct KeepaliveScheduler {
    service: Arc<CredentialService>,
    schedule: KeepaliveSchedule,
    state_tx: watch::Sender<KeepaliveState>,
}

impl KeepaliveScheduler {
    pub fn new(service: Arc<CredentialService>, schedule: KeepaliveSchedule) -> Self {
        let (state_tx, _) = watch::channel(KeepaliveState::Idle);
        Self {
            service,
            schedule,
            state_tx,
        }
    }

    pub fn state(&self) -> KeepaliveState {
        *self.state_tx.borrow()
    }

    /// Observe state transitions.
    pub fn subscribe(&self) -> watch::Receiver<KeepaliveState> {
        self.state_tx.subscribe()
    }

    /// Run a single check, refreshing when stale.
    ///
    /// Errors are logged (and alerted by the service) and also returned so
    /// one-shot callers can report them.
    pub async fn tick(&self) -> std::result::Result<RefreshOutcome, CredentialError> {
        let target_id = self.service.store().target_id().to_string();
        self.state_tx.send_replace(KeepaliveState::Checking);

        let result = match self.service.check().await {
            Ok((ValidityState::Valid, _)) => {
                // Retry a persist that failed after an earlier refresh.
                if self.service.store().is_dirty() {
                    if let Err(e) = self.service.store().persist().await {
                        warn!(target_id = %target_id, error = %e, "Credential still not persisted");
                    }
                }
                debug!(target_id = %target_id, "Credential valid");
                Ok(RefreshOutcome::Valid)
            }
            Ok((_, generation)) => {
                info!(target_id = %target_id, "Credential stale, refreshing");
                self.state_tx.send_replace(KeepaliveState::Refreshing);
                self.service.refresh_if_current(generation).await
            }
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            error!(target_id = %target_id, error = %e, "Keepalive tick failed");
        }
        self.state_tx.send_replace(KeepaliveState::Idle);
        result
    }

    /// Tick on schedule until `cancel` fires. A tick already running completes.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            target_id = %self.service.store().target_id(),
            schedule = ?self.schedule,
            "Keepalive scheduler started"
        );

        loop {
            let delay = self.schedule.next_delay(Utc::now());
            debug!(delay_secs = delay.as_secs(), "Next keepalive tick scheduled");

            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Keepalive scheduler shutting down");
                    break;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            let _ = self.tick().await;
        }
    }

    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::NaiveDate;

    use super::*;
    use crate::credentials::refresher::Refresher;
    use crate::credentials::store::CredentialStore;
    use crate::credentials::types::Credential;

    struct FlakyRefresher {
        valid: AtomicBool,
        fail_next: AtomicBool,
        refreshes: AtomicUsize,
    }

    #[async_trait]
    impl Refresher for FlakyRefresher {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn is_valid(&self, _credential: &Credential) -> std::result::Result<bool, CredentialError> {
            Ok(self.valid.load(Ordering::SeqCst))
        }

        async fn refresh(&self, credential: &Credential) -> std::result::Result<Credential, CredentialError> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(CredentialError::RefreshRejected("nope".into()));
            }
            self.valid.store(true, Ordering::SeqCst);
            let mut renewed = credential.clone();
            renewed.set_cookie("SESSDATA", "new");
            Ok(renewed)
        }
    }

    fn scheduler(valid: bool, fail_next: bool) -> (Arc<KeepaliveScheduler>, Arc<FlakyRefresher>) {
        let refresher = Arc::new(FlakyRefresher {
            valid: AtomicBool::new(valid),
            fail_next: AtomicBool::new(fail_next),
            refreshes: AtomicUsize::new(0),
        });
        let store = Arc::new(CredentialStore::new(
            Credential::from_cookie_header("t", "SESSDATA=old"),
            None,
        ));
        let service = Arc::new(CredentialService::new(store, refresher.clone()));
        let scheduler = KeepaliveScheduler::new(service, KeepaliveSchedule::Every(Duration::from_secs(3600)));
        (Arc::new(scheduler), refresher)
    }

    #[test]
    fn test_daily_schedule_rolls_over_midnight() {
        let schedule = KeepaliveSchedule::daily_at("04:00", "Asia/Shanghai").unwrap();
        // 2026-01-01 21:00 UTC == 2026-01-02 05:00 in Shanghai
        let now = NaiveDate::from_ymd_opt(2026, 1, 1)
            .unwrap()
            .and_hms_opt(21, 0, 0)
            .unwrap()
            .and_utc();
        assert_eq!(schedule.next_delay(now), Duration::from_secs(23 * 3600));

        // 2026-01-01 19:00 UTC == 03:00 local, one hour to go
        let now = now - chrono::Duration::hours(2);
        assert_eq!(schedule.next_delay(now), Duration::from_secs(3600));
    }

    #[test]
    fn test_cron_schedule_next_delay() {
        let schedule = KeepaliveSchedule::cron("0 30 * * * *", "UTC").unwrap();
        let now = NaiveDate::from_ymd_opt(2026, 3, 1)
            .unwrap()
            .and_hms_opt(10, 10, 0)
            .unwrap()
            .and_utc();
        assert_eq!(schedule.next_delay(now), Duration::from_secs(20 * 60));
    }

    #[test]
    fn test_invalid_schedule_inputs() {
        assert!(KeepaliveSchedule::daily_at("25:00", "UTC").is_err());
        assert!(KeepaliveSchedule::daily_at("04:00", "Mars/Olympus").is_err());
        assert!(KeepaliveSchedule::cron("not a cron", "UTC").is_err());
    }

    #[tokio::test]
    async fn test_tick_refreshes_stale_credential() {
        let (scheduler, refresher) = scheduler(false, false);
        let mut states = scheduler.subscribe();

        assert_eq!(scheduler.tick().await.unwrap(), RefreshOutcome::Refreshed);
        assert_eq!(refresher.refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.service.store().get().get("SESSDATA"), Some("new"));
        assert_eq!(scheduler.state(), KeepaliveState::Idle);
        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), KeepaliveState::Idle);

        assert_eq!(scheduler.tick().await.unwrap(), RefreshOutcome::Valid);
        assert_eq!(refresher.refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_tick_returns_to_idle() {
        let (scheduler, _) = scheduler(false, true);

        assert!(scheduler.tick().await.is_err());
        assert_eq!(scheduler.state(), KeepaliveState::Idle);
        assert_eq!(scheduler.service.store().get().get("SESSDATA"), Some("old"));

        // the next tick retries
        assert_eq!(scheduler.tick().await.unwrap(), RefreshOutcome::Refreshed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_ticks_on_period_until_cancelled() {
        let (scheduler, refresher) = scheduler(false, true);
        let cancel = CancellationToken::new();
        let handle = scheduler.clone().start(cancel.clone());

        tokio::time::sleep(Duration::from_secs(3600 + 1)).await;
        // first tick failed, credential untouched
        assert_eq!(refresher.refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.service.store().get().get("SESSDATA"), Some("old"));

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(refresher.refreshes.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.service.store().get().get("SESSDATA"), Some("new"));

        cancel.cancel();
        handle.await.unwrap();
    }
}
