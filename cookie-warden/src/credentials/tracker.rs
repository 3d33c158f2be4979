//! Consecutive refresh-failure tracking per target.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// Failure history older than this is pruned lazily.
const MAX_AGE_DAYS: i64 = 7;

/// Tracks refresh failures per target.
///
/// Used to rate-gate alerts after consecutive failures.
pub struct RefreshFailureTracker {
    failures: DashMap<String, FailureRecord>,
    /// Day number of the last prune.
    last_prune_day: AtomicI64,
}

#[derive(Clone)]
struct FailureRecord {
    count: u32,
    first_failure: DateTime<Utc>,
    last_failure: DateTime<Utc>,
    last_error: String,
}

impl RefreshFailureTracker {
    pub fn new() -> Self {
        Self {
            failures: DashMap::new(),
            last_prune_day: AtomicI64::new(0),
        }
    }

    fn prune_if_needed(&self) {
        let now = Utc::now();
        let today = now.timestamp().div_euclid(86_400);

        let last = self.last_prune_day.load(Ordering::Relaxed);
        if last == today {
            return;
        }
        if self
            .last_prune_day
            .compare_exchange(last, today, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let cutoff = now - chrono::Duration::days(MAX_AGE_DAYS);
        self.failures.retain(|_, record| record.last_failure >= cutoff);
    }

    /// Record a failure and return the updated count.
    pub fn record_failure(&self, target_id: &str, error: &str) -> u32 {
        self.prune_if_needed();

        let now = Utc::now();
        let mut entry = self
            .failures
            .entry(target_id.to_string())
            .or_insert(FailureRecord {
                count: 0,
                first_failure: now,
                last_failure: now,
                last_error: String::new(),
            });

        entry.count += 1;
        entry.last_failure = now;
        entry.last_error = error.to_string();
        entry.count
    }

    /// Clear failures on success.
    pub fn clear(&self, target_id: &str) {
        self.failures.remove(target_id);
    }

    pub fn failure_count(&self, target_id: &str) -> u32 {
        self.prune_if_needed();
        self.failures.get(target_id).map(|r| r.count).unwrap_or(0)
    }

    pub fn failure_info(&self, target_id: &str) -> Option<FailureInfo> {
        self.prune_if_needed();
        self.failures.get(target_id).map(|r| FailureInfo {
            count: r.count,
            first_failure: r.first_failure,
            last_failure: r.last_failure,
            last_error: r.last_error.clone(),
        })
    }
}

impl Default for RefreshFailureTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Information about failures for a target.
#[derive(Debug, Clone)]
pub struct FailureInfo {
    /// Number of consecutive failures.
    pub count: u32,
    /// Time of first failure in this sequence.
    pub first_failure: DateTime<Utc>,
    /// Time of most recent failure.
    pub last_failure: DateTime<Utc>,
    /// Error message from last failure.
    pub last_error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_tracker_counts_and_clears() {
        let tracker = RefreshFailureTracker::new();

        assert_eq!(tracker.failure_count("bilibili"), 0);
        assert_eq!(tracker.record_failure("bilibili", "timeout"), 1);
        assert_eq!(tracker.record_failure("bilibili", "rejected"), 2);
        assert_eq!(tracker.failure_count("weibo"), 0);

        let info = tracker.failure_info("bilibili").unwrap();
        assert_eq!(info.count, 2);
        assert_eq!(info.last_error, "rejected");
        assert!(info.first_failure <= info.last_failure);

        tracker.clear("bilibili");
        assert_eq!(tracker.failure_count("bilibili"), 0);
        assert!(tracker.failure_info("bilibili").is_none());
    }
}
