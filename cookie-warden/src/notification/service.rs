//! Notification service implementation.
//!
//! The NotificationService is responsible for:
//! - Fanning events out to the configured channels
//! - Per-channel priority filtering
//! - Retry with exponential backoff and jitter
//! - A circuit breaker per failing channel

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::RwLock;
use rand::RngExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::channels::{ChannelConfig, DingTalkChannel, NotificationChannel, WebhookChannel};
use super::events::NotificationEvent;
use crate::Result;

/// Receiver of notification events.
///
/// Content and credential code depend on this rather than on the concrete
/// service so they can be exercised with recording fakes.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: NotificationEvent) -> Result<()>;
}

/// Configuration for the notification service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationServiceConfig {
    /// Whether the notification service is enabled.
    pub enabled: bool,
    /// Maximum retry attempts per channel and event.
    pub max_retries: u32,
    /// Initial retry delay in milliseconds.
    pub initial_retry_delay_ms: u64,
    /// Maximum retry delay in milliseconds.
    pub max_retry_delay_ms: u64,
    /// Circuit breaker failure threshold.
    pub circuit_breaker_threshold: u32,
    /// Circuit breaker cooldown in seconds.
    pub circuit_breaker_cooldown_secs: u64,
    /// Channel configurations.
    pub channels: Vec<ChannelConfig>,
}

impl Default for NotificationServiceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            initial_retry_delay_ms: 5000,
            max_retry_delay_ms: 60000,
            circuit_breaker_threshold: 10,
            circuit_breaker_cooldown_secs: 300,
            channels: Vec::new(),
        }
    }
}

/// Circuit breaker state for a channel.
#[derive(Debug, Clone)]
struct CircuitBreakerState {
    /// Number of consecutive failures.
    failures: u32,
    /// Whether the circuit is open (disabled).
    is_open: bool,
    /// When the circuit was opened.
    opened_at: Option<DateTime<Utc>>,
    cooldown: Duration,
}

impl CircuitBreakerState {
    fn new(cooldown_secs: u64) -> Self {
        Self {
            failures: 0,
            is_open: false,
            opened_at: None,
            cooldown: Duration::from_secs(cooldown_secs),
        }
    }

    fn record_failure(&mut self, threshold: u32) {
        self.failures += 1;

        // A failure in the half-open state restarts the cooldown.
        if self.is_open {
            self.opened_at = Some(Utc::now());
            return;
        }

        if self.failures >= threshold {
            self.is_open = true;
            self.opened_at = Some(Utc::now());
            warn!("Circuit breaker opened after {} failures", self.failures);
        }
    }

    fn record_success(&mut self) {
        self.failures = 0;
        self.is_open = false;
        self.opened_at = None;
    }

    fn is_allowed(&self) -> bool {
        if !self.is_open {
            return true;
        }

        // Half-open: one attempt after the cooldown.
        self.opened_at.is_some_and(|opened_at| {
            let elapsed = Utc::now().signed_duration_since(opened_at);
            elapsed.num_seconds().max(0) as u64 >= self.cooldown.as_secs()
        })
    }
}

#[derive(Clone)]
struct RuntimeChannel {
    key: String,
    channel: Arc<dyn NotificationChannel>,
}

/// Notification fan-out with retries and circuit breakers.
pub struct NotificationService {
    config: NotificationServiceConfig,
    channels: RwLock<Vec<RuntimeChannel>>,
    circuit_breakers: DashMap<String, CircuitBreakerState>,
    delivered: AtomicU64,
    failed: AtomicU64,
    cancellation_token: CancellationToken,
}

impl NotificationService {
    pub fn new() -> Self {
        Self::with_config(NotificationServiceConfig::default())
    }

    pub fn with_config(config: NotificationServiceConfig) -> Self {
        let service = Self {
            channels: RwLock::new(Vec::new()),
            circuit_breakers: DashMap::new(),
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            cancellation_token: CancellationToken::new(),
            config,
        };
        for channel in service.config.channels.clone() {
            service.add_channel(channel);
        }
        service
    }

    /// Add a channel from its configuration. Disabled channels are ignored.
    pub fn add_channel(&self, config: ChannelConfig) {
        if !config.is_enabled() {
            debug!(channel_type = config.channel_type(), "Skipping disabled channel");
            return;
        }

        let channel: Arc<dyn NotificationChannel> = match &config {
            ChannelConfig::Webhook(c) => Arc::new(WebhookChannel::new(c.clone())),
            ChannelConfig::Dingtalk(c) => Arc::new(DingTalkChannel::new(c.clone())),
        };
        self.register(config.display_name(), channel);
    }

    /// Register an already constructed channel.
    pub fn register(&self, name: Option<&str>, channel: Arc<dyn NotificationChannel>) {
        let mut channels = self.channels.write();
        let key = match name {
            Some(name) => normalize_channel_key(name),
            None => format!("{}-{}", channel.channel_type(), channels.len()),
        };
        info!(channel = %key, channel_type = channel.channel_type(), "Notification channel added");
        self.circuit_breakers.insert(
            key.clone(),
            CircuitBreakerState::new(self.config.circuit_breaker_cooldown_secs),
        );
        channels.push(RuntimeChannel { key, channel });
    }

    /// Send an event to every enabled channel whose priority filter admits it.
    ///
    /// Channels are delivered concurrently. Returns an error naming the
    /// channels that still failed after their retries.
    pub async fn notify(&self, event: NotificationEvent) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }

        let targets: Vec<RuntimeChannel> = self
            .channels
            .read()
            .iter()
            .filter(|c| c.channel.is_enabled() && event.priority() >= c.channel.min_priority())
            .cloned()
            .collect();
        if targets.is_empty() {
            return Ok(());
        }

        let results = join_all(
            targets
                .iter()
                .map(|target| self.deliver_with_retry(target, &event)),
        )
        .await;

        let failed: Vec<&str> = targets
            .iter()
            .zip(&results)
            .filter(|(_, result)| result.is_err())
            .map(|(target, _)| target.key.as_str())
            .collect();

        if failed.is_empty() {
            Ok(())
        } else {
            Err(crate::Error::Other(format!(
                "{} delivery failed on: {}",
                event.event_type(),
                failed.join(", ")
            )))
        }
    }

    async fn deliver_with_retry(
        &self,
        target: &RuntimeChannel,
        event: &NotificationEvent,
    ) -> Result<()> {
        let mut attempts = 0u32;
        loop {
            let allowed = self
                .circuit_breakers
                .get(&target.key)
                .map(|cb| cb.is_allowed())
                .unwrap_or(true);
            if !allowed {
                debug!(channel = %target.key, "Circuit open, skipping delivery");
                self.failed.fetch_add(1, Ordering::Relaxed);
                return Err(crate::Error::Other(format!(
                    "circuit open for {}",
                    target.key
                )));
            }

            match target.channel.send(event).await {
                Ok(()) => {
                    if let Some(mut cb) = self.circuit_breakers.get_mut(&target.key) {
                        cb.record_success();
                    }
                    self.delivered.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
                Err(e) => {
                    if let Some(mut cb) = self.circuit_breakers.get_mut(&target.key) {
                        cb.record_failure(self.config.circuit_breaker_threshold);
                    }
                    attempts += 1;
                    if attempts > self.config.max_retries {
                        warn!(
                            channel = %target.key,
                            event_type = event.event_type(),
                            attempts,
                            error = %e,
                            "Notification delivery failed"
                        );
                        self.failed.fetch_add(1, Ordering::Relaxed);
                        return Err(e);
                    }

                    let delay = self.calculate_retry_delay(attempts - 1);
                    debug!(channel = %target.key, attempts, ?delay, error = %e, "Retrying notification");
                    tokio::select! {
                        _ = self.cancellation_token.cancelled() => return Err(e),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Calculate retry delay with exponential backoff and jitter.
    fn calculate_retry_delay(&self, attempts: u32) -> Duration {
        let base_delay = self.config.initial_retry_delay_ms;
        let max_delay = self.config.max_retry_delay_ms;

        // Exponential backoff: delay = base * 2^attempts
        let delay_ms = base_delay.saturating_mul(2u64.saturating_pow(attempts));
        let delay_ms = delay_ms.min(max_delay);

        // Add jitter (±25%)
        let jitter_range = delay_ms / 4;
        let delay_ms = if jitter_range > 0 {
            let offset = rand::rng().random_range(0..jitter_range * 2);
            (delay_ms - jitter_range).saturating_add(offset)
        } else {
            delay_ms
        };

        Duration::from_millis(delay_ms)
    }

    pub fn stats(&self) -> NotificationStats {
        NotificationStats {
            channel_count: self.channels.read().len(),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            circuit_breakers: self
                .circuit_breakers
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().is_open))
                .collect(),
        }
    }

    /// Abort pending retries.
    pub fn stop(&self) {
        self.cancellation_token.cancel();
    }
}

#[async_trait]
impl Notifier for NotificationService {
    async fn notify(&self, event: NotificationEvent) -> Result<()> {
        NotificationService::notify(self, event).await
    }
}

impl Default for NotificationService {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize_channel_key(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return "_".to_string();
    }

    trimmed
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Statistics about the notification service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationStats {
    pub channel_count: usize,
    /// Successful channel deliveries.
    pub delivered: u64,
    /// Channel deliveries that gave up.
    pub failed: u64,
    /// Circuit breaker states (channel key -> is_open).
    pub circuit_breakers: HashMap<String, bool>,
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use super::*;
    use crate::notification::NotificationPriority;
    use crate::notification::channels::WebhookConfig;

    struct TestChannel {
        channel_type: &'static str,
        fail_for_attempts: u32,
        min_priority: NotificationPriority,
        attempts: Arc<AtomicU32>,
    }

    impl TestChannel {
        fn new(fail_for_attempts: u32, attempts: Arc<AtomicU32>) -> Self {
            Self {
                channel_type: "test",
                fail_for_attempts,
                min_priority: NotificationPriority::Low,
                attempts,
            }
        }
    }

    #[async_trait]
    impl NotificationChannel for TestChannel {
        fn channel_type(&self) -> &'static str {
            self.channel_type
        }

        fn is_enabled(&self) -> bool {
            true
        }

        fn min_priority(&self) -> NotificationPriority {
            self.min_priority
        }

        async fn send(&self, _event: &NotificationEvent) -> Result<()> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= self.fail_for_attempts {
                Err(crate::Error::Other(format!("forced failure {}", attempt)))
            } else {
                Ok(())
            }
        }
    }

    fn fast_config() -> NotificationServiceConfig {
        NotificationServiceConfig {
            enabled: true,
            max_retries: 3,
            initial_retry_delay_ms: 5,
            max_retry_delay_ms: 20,
            circuit_breaker_threshold: 100,
            circuit_breaker_cooldown_secs: 1,
            channels: Vec::new(),
        }
    }

    fn startup() -> NotificationEvent {
        NotificationEvent::SystemStartup {
            version: "test".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_notification_service_config_default() {
        let config = NotificationServiceConfig::default();
        assert!(config.enabled);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.circuit_breaker_threshold, 10);
    }

    #[test]
    fn test_circuit_breaker_state() {
        let mut cb = CircuitBreakerState::new(300);
        assert!(cb.is_allowed());

        for _ in 0..10 {
            cb.record_failure(10);
        }
        assert!(!cb.is_allowed());

        cb.record_success();
        assert!(cb.is_allowed());
    }

    #[test]
    fn test_calculate_retry_delay() {
        let service = NotificationService::with_config(NotificationServiceConfig {
            initial_retry_delay_ms: 1000,
            max_retry_delay_ms: 60000,
            ..Default::default()
        });

        let delay1 = service.calculate_retry_delay(0);
        let delay2 = service.calculate_retry_delay(1);
        let delay3 = service.calculate_retry_delay(2);

        assert!(delay1.as_millis() >= 750 && delay1.as_millis() <= 1250);
        assert!(delay2.as_millis() >= 1500 && delay2.as_millis() <= 2500);
        assert!(delay3.as_millis() >= 3000 && delay3.as_millis() <= 5000);
    }

    #[tokio::test]
    async fn test_notify_disabled() {
        let service = NotificationService::with_config(NotificationServiceConfig {
            enabled: false,
            ..Default::default()
        });
        let attempts = Arc::new(AtomicU32::new(0));
        service.register(None, Arc::new(TestChannel::new(0, attempts.clone())));

        service.notify(startup()).await.unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_add_channel_skips_disabled() {
        let service = NotificationService::new();
        service.add_channel(ChannelConfig::Webhook(WebhookConfig {
            enabled: false,
            url: "https://example.com/hook".to_string(),
            ..Default::default()
        }));
        assert_eq!(service.stats().channel_count, 0);

        service.add_channel(ChannelConfig::Webhook(WebhookConfig {
            name: Some("ops hook".to_string()),
            enabled: true,
            url: "https://example.com/hook".to_string(),
            ..Default::default()
        }));
        let stats = service.stats();
        assert_eq!(stats.channel_count, 1);
        assert!(stats.circuit_breakers.contains_key("ops_hook"));
    }

    #[tokio::test]
    async fn retries_do_not_duplicate_successful_channels() {
        let service = NotificationService::with_config(fast_config());

        let ok_attempts = Arc::new(AtomicU32::new(0));
        let flaky_attempts = Arc::new(AtomicU32::new(0));
        service.register(Some("ok"), Arc::new(TestChannel::new(0, ok_attempts.clone())));
        service.register(
            Some("flaky"),
            Arc::new(TestChannel::new(1, flaky_attempts.clone())),
        );

        service.notify(startup()).await.unwrap();

        assert_eq!(ok_attempts.load(Ordering::SeqCst), 1);
        assert_eq!(flaky_attempts.load(Ordering::SeqCst), 2);
        assert_eq!(service.stats().delivered, 2);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let service = NotificationService::with_config(fast_config());
        let attempts = Arc::new(AtomicU32::new(0));
        service.register(Some("down"), Arc::new(TestChannel::new(u32::MAX, attempts.clone())));

        let err = service.notify(startup()).await.unwrap_err();
        assert!(err.to_string().contains("down"));
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert_eq!(service.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_min_priority_filters_channels() {
        let service = NotificationService::with_config(fast_config());
        let attempts = Arc::new(AtomicU32::new(0));
        service.register(
            None,
            Arc::new(TestChannel {
                min_priority: NotificationPriority::High,
                ..TestChannel::new(0, attempts.clone())
            }),
        );

        // SystemStartup is Low priority.
        service.notify(startup()).await.unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 0);

        service
            .notify(NotificationEvent::CredentialInvalid {
                target_id: "t".to_string(),
                reason: "gone".to_string(),
                timestamp: Utc::now(),
            })
            .await
            .unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_open_circuit_skips_channel() {
        let service = NotificationService::with_config(NotificationServiceConfig {
            max_retries: 0,
            circuit_breaker_threshold: 1,
            circuit_breaker_cooldown_secs: 300,
            ..fast_config()
        });
        let attempts = Arc::new(AtomicU32::new(0));
        service.register(Some("down"), Arc::new(TestChannel::new(u32::MAX, attempts.clone())));

        assert!(service.notify(startup()).await.is_err());
        assert!(service.notify(startup()).await.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(service.stats().circuit_breakers.get("down"), Some(&true));
    }
}
