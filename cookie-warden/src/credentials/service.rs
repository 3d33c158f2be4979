//! Credential refresh service.
//!
//! Orchestrates credential checking, refreshing, and persistence for one
//! target. Both the keepalive schedule and the ingester's auth-error path go
//! through here, so at most one refresh is ever in flight.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use super::error::CredentialError;
use super::refresher::Refresher;
use super::store::CredentialStore;
use super::tracker::RefreshFailureTracker;
use super::types::ValidityState;
use crate::notification::{NotificationEvent, Notifier};

/// Result of a refresh request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The probe reported the credential as still valid.
    Valid,
    /// A new credential was installed.
    Refreshed,
    /// Another caller already replaced the credential this request was based on.
    Superseded,
}

pub struct CredentialService {
    store: Arc<CredentialStore>,
    refresher: Arc<dyn Refresher>,
    /// Serializes refreshes for the target.
    refresh_lock: Mutex<()>,
    failure_tracker: RefreshFailureTracker,
    notifier: Option<Arc<dyn Notifier>>,
}

impl CredentialService {
    pub fn new(store: Arc<CredentialStore>, refresher: Arc<dyn Refresher>) -> Self {
        Self {
            store,
            refresher,
            refresh_lock: Mutex::new(()),
            failure_tracker: RefreshFailureTracker::new(),
            notifier: None,
        }
    }

    /// Send credential events to `notifier`.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_tracker.failure_count(self.store.target_id())
    }

    /// Probe the current credential.
    ///
    /// Returns the state together with the generation that was probed.
    #[instrument(skip(self), fields(target_id = %self.store.target_id(), strategy = self.refresher.name()))]
    pub async fn check(&self) -> Result<(ValidityState, u64), CredentialError> {
        let (credential, generation) = self.store.snapshot();
        let state = if self.refresher.is_valid(&credential).await? {
            ValidityState::Valid
        } else {
            ValidityState::Stale
        };
        debug!(%state, generation, "Credential probed");
        Ok((state, generation))
    }

    /// Refresh unless the credential was replaced since `generation`.
    ///
    /// Callers that saw a stale or rejected credential pass the generation
    /// they used, so a burst of auth errors costs a single refresh.
    pub async fn refresh_if_current(
        &self,
        generation: u64,
    ) -> Result<RefreshOutcome, CredentialError> {
        let _guard = self.refresh_lock.lock().await;

        // Double-check after acquiring lock (another task may have refreshed)
        if self.store.generation() != generation {
            debug!(
                target_id = %self.store.target_id(),
                seen = generation,
                current = self.store.generation(),
                "Credential already replaced, skipping refresh"
            );
            return Ok(RefreshOutcome::Superseded);
        }
        self.perform_refresh().await
    }

    /// Refresh without probing first.
    pub async fn force_refresh(&self) -> Result<RefreshOutcome, CredentialError> {
        let _guard = self.refresh_lock.lock().await;
        self.perform_refresh().await
    }

    /// Probe and refresh when stale.
    pub async fn check_and_refresh(&self) -> Result<RefreshOutcome, CredentialError> {
        match self.check().await? {
            (ValidityState::Valid, _) => {
                self.failure_tracker.clear(self.store.target_id());
                Ok(RefreshOutcome::Valid)
            }
            (_, generation) => self.refresh_if_current(generation).await,
        }
    }

    #[instrument(skip(self), fields(target_id = %self.store.target_id(), strategy = self.refresher.name()))]
    async fn perform_refresh(&self) -> Result<RefreshOutcome, CredentialError> {
        let target_id = self.store.target_id().to_string();
        let current = self.store.get();

        info!("Starting credential refresh");

        match self.refresher.refresh(&current).await {
            Ok(mut renewed) => {
                renewed.target_id = target_id.clone();
                renewed.updated_at = Utc::now();
                let generation = self.store.set(renewed);
                self.failure_tracker.clear(&target_id);
                info!(generation, "Credential refresh successful");

                if let Err(e) = self.store.persist().await {
                    warn!(error = %e, "Refreshed credential not persisted; will retry on the next tick");
                }

                self.maybe_notify(NotificationEvent::CredentialRefreshed {
                    target_id,
                    strategy: self.refresher.name().to_string(),
                    timestamp: Utc::now(),
                });
                Ok(RefreshOutcome::Refreshed)
            }
            Err(e) => {
                let failure_count = self.failure_tracker.record_failure(&target_id, &e.to_string());
                error!(
                    error = %e,
                    failure_count,
                    requires_relogin = e.requires_relogin(),
                    "Credential refresh failed"
                );

                if e.requires_relogin() {
                    self.maybe_notify(NotificationEvent::CredentialInvalid {
                        target_id,
                        reason: e.to_string(),
                        timestamp: Utc::now(),
                    });
                } else if failure_count == 1 || failure_count % 3 == 0 {
                    self.maybe_notify(NotificationEvent::CredentialRefreshFailed {
                        target_id,
                        error: e.to_string(),
                        failure_count,
                        timestamp: Utc::now(),
                    });
                }
                Err(e)
            }
        }
    }

    fn maybe_notify(&self, event: NotificationEvent) {
        let Some(notifier) = self.notifier.as_ref().cloned() else {
            return;
        };

        tokio::spawn(async move {
            if let Err(e) = notifier.notify(event).await {
                warn!(error = %e, "Failed to dispatch credential notification");
            }
        });
    }
}
