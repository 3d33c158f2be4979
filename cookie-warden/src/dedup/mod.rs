//! Identity + version deduplication index.
//!
//! An entry is created on first sight, moved forward only by a strictly
//! greater version, and dropped by the eviction sweep once it has not been
//! seen for the retention window.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Default retention window.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(14 * 24 * 3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupEntry {
    pub version: u64,
    pub last_seen: DateTime<Utc>,
}

/// What [`DedupIndex::observe`] concluded about an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// Identity not in the index.
    New,
    /// Version strictly greater than the stored one.
    Changed { previous: u64 },
    /// Same or lower version; nothing to emit.
    Seen,
}

impl Observation {
    pub fn should_emit(&self) -> bool {
        !matches!(self, Observation::Seen)
    }
}

#[derive(Debug)]
pub struct DedupIndex {
    entries: DashMap<String, DedupEntry>,
    retention: Duration,
}

impl Default for DedupIndex {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}

impl DedupIndex {
    pub fn new(retention: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            retention,
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    pub fn observe(&self, id: &str, version: u64) -> Observation {
        self.observe_at(id, version, Utc::now())
    }

    /// Record a sighting at `now`. Every sighting refreshes `last_seen`.
    pub fn observe_at(&self, id: &str, version: u64, now: DateTime<Utc>) -> Observation {
        // The entry guard holds the shard lock, so check-and-update is atomic
        // with respect to the sweep.
        match self.entries.entry(id.to_string()) {
            Entry::Vacant(vacant) => {
                vacant.insert(DedupEntry {
                    version,
                    last_seen: now,
                });
                Observation::New
            }
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                entry.last_seen = entry.last_seen.max(now);
                if version > entry.version {
                    let previous = entry.version;
                    entry.version = version;
                    Observation::Changed { previous }
                } else {
                    Observation::Seen
                }
            }
        }
    }

    /// Seed an entry without counting it as a sighting (startup hydration).
    ///
    /// Keeps the higher version when the id is already present.
    pub fn hydrate(&self, id: &str, version: u64, last_seen: DateTime<Utc>) {
        self.entries
            .entry(id.to_string())
            .and_modify(|entry| {
                if version > entry.version {
                    entry.version = version;
                }
                entry.last_seen = entry.last_seen.max(last_seen);
            })
            .or_insert(DedupEntry { version, last_seen });
    }

    pub fn get(&self, id: &str) -> Option<DedupEntry> {
        self.entries.get(id).map(|e| *e)
    }

    pub fn remove(&self, id: &str) -> bool {
        self.entries.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop entries last seen before `cutoff`. Returns how many were removed.
    pub fn evict_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.last_seen >= cutoff);
        before.saturating_sub(self.entries.len())
    }

    /// Evict everything outside the retention window as of `now`.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let retention =
            chrono::Duration::from_std(self.retention).unwrap_or(chrono::Duration::MAX);
        let cutoff = now.checked_sub_signed(retention).unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.evict_older_than(cutoff)
    }
}

/// Run [`DedupIndex::sweep`] every `interval` until cancelled.
pub fn spawn_eviction(
    index: Arc<DedupIndex>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Dedup eviction task shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let removed = index.sweep(Utc::now());
                    if removed > 0 {
                        info!(removed, remaining = index.len(), "Evicted stale dedup entries");
                    } else {
                        debug!(remaining = index.len(), "Dedup sweep found nothing to evict");
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn days(n: i64) -> chrono::Duration {
        chrono::Duration::days(n)
    }

    #[test]
    fn test_versions_only_move_forward() {
        let index = DedupIndex::default();

        assert_eq!(index.observe("abc", 0), Observation::New);
        assert_eq!(index.observe("abc", 0), Observation::Seen);
        assert_eq!(index.observe("abc", 1), Observation::Changed { previous: 0 });
        assert_eq!(index.get("abc").unwrap().version, 1);

        // a lower version neither emits nor rolls the entry back
        assert_eq!(index.observe("abc", 0), Observation::Seen);
        assert_eq!(index.get("abc").unwrap().version, 1);
    }

    #[test]
    fn test_sighting_refreshes_last_seen() {
        let index = DedupIndex::default();
        let t0 = Utc::now() - days(20);

        index.observe_at("abc", 3, t0);
        index.observe_at("abc", 3, t0 + days(10));
        assert_eq!(index.get("abc").unwrap().last_seen, t0 + days(10));
    }

    #[test]
    fn test_sweep_respects_retention_window() {
        let index = DedupIndex::new(Duration::from_secs(14 * 24 * 3600));
        let now = Utc::now();

        index.observe_at("old", 1, now - days(15));
        index.observe_at("fresh", 1, now - days(13));

        assert_eq!(index.sweep(now), 1);
        assert!(index.get("old").is_none());
        assert!(index.get("fresh").is_some());

        // an evicted identity is new again
        assert_eq!(index.observe_at("old", 1, now), Observation::New);
    }

    #[test]
    fn test_hydrate_keeps_higher_version() {
        let index = DedupIndex::default();
        let now = Utc::now();

        index.hydrate("a", 2, now);
        index.hydrate("a", 1, now);
        assert_eq!(index.get("a").unwrap().version, 2);
        assert_eq!(index.observe("a", 2), Observation::Seen);
        assert!(index.remove("a"));
        assert!(index.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_task_stops_on_cancel() {
        let index = Arc::new(DedupIndex::new(Duration::from_secs(60)));
        index.observe_at("stale", 1, Utc::now() - days(1));
        let cancel = CancellationToken::new();

        let handle = spawn_eviction(index.clone(), Duration::from_secs(3600), cancel.clone());
        tokio::time::sleep(Duration::from_secs(3601)).await;
        assert!(index.is_empty());

        cancel.cancel();
        handle.await.unwrap();
    }
}
