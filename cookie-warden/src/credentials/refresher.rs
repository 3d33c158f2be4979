//! Refresh strategy abstraction.

use std::sync::Arc;

use async_trait::async_trait;

use super::error::CredentialError;
use super::types::Credential;

/// Validity probe and refresh for one authentication mechanism.
#[async_trait]
pub trait Refresher: Send + Sync {
    /// Strategy name for logs.
    fn name(&self) -> &'static str;

    /// Cheap authenticated probe.
    ///
    /// `Ok(false)` when the service says the session needs renewal; `Err` only
    /// for transport or protocol failures.
    async fn is_valid(&self, credential: &Credential) -> Result<bool, CredentialError>;

    /// Produce a renewed credential.
    ///
    /// `credential` is never modified. On error the caller still holds the
    /// last working secrets.
    async fn refresh(&self, credential: &Credential) -> Result<Credential, CredentialError>;
}

/// Wraps a strategy so that every validity probe reports stale.
///
/// Used for unconditional re-authentication, e.g. on startup.
pub struct ForcedRefresher {
    inner: Arc<dyn Refresher>,
}

impl ForcedRefresher {
    pub fn new(inner: Arc<dyn Refresher>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Refresher for ForcedRefresher {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn is_valid(&self, _credential: &Credential) -> Result<bool, CredentialError> {
        Ok(false)
    }

    async fn refresh(&self, credential: &Credential) -> Result<Credential, CredentialError> {
        self.inner.refresh(credential).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct AlwaysValid {
        refreshes: AtomicUsize,
    }

    #[async_trait]
    impl Refresher for AlwaysValid {
        fn name(&self) -> &'static str {
            "always_valid"
        }

        async fn is_valid(&self, _credential: &Credential) -> Result<bool, CredentialError> {
            Ok(true)
        }

        async fn refresh(&self, credential: &Credential) -> Result<Credential, CredentialError> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            Ok(credential.clone())
        }
    }

    #[tokio::test]
    async fn test_forced_refresher_reports_stale_and_delegates() {
        let inner = Arc::new(AlwaysValid {
            refreshes: AtomicUsize::new(0),
        });
        let forced = ForcedRefresher::new(inner.clone());
        let credential = Credential::from_cookie_header("t", "a=1");

        assert!(inner.is_valid(&credential).await.unwrap());
        assert!(!forced.is_valid(&credential).await.unwrap());

        forced.refresh(&credential).await.unwrap();
        assert_eq!(inner.refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(forced.name(), "always_valid");
    }
}
