use std::time::Duration;

use rand::RngExt;
use tracing::debug;

/// Sleeps a uniformly random interval in `[min, max]` per tick.
#[derive(Debug, Clone, Copy)]
pub struct JitteredTicker {
    min: Duration,
    max: Duration,
}

impl JitteredTicker {
    /// `max` below `min` is treated as `min`.
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max: max.max(min),
        }
    }

    pub fn next_interval(&self) -> Duration {
        if self.max == self.min {
            return self.min;
        }
        let min_ms = u64::try_from(self.min.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rand::rng().random_range(min_ms..=max_ms))
    }

    /// Sleep one jittered interval and return its length.
    pub async fn tick(&self) -> Duration {
        let interval = self.next_interval();
        debug!(interval_ms = interval.as_millis() as u64, "Next poll scheduled");
        tokio::time::sleep(interval).await;
        interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intervals_stay_in_range() {
        let ticker = JitteredTicker::new(Duration::from_secs(30), Duration::from_secs(90));
        for _ in 0..1000 {
            let interval = ticker.next_interval();
            assert!(interval >= Duration::from_secs(30) && interval <= Duration::from_secs(90));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_sleeps_the_returned_interval() {
        let ticker = JitteredTicker::new(Duration::from_secs(30), Duration::from_secs(90));
        let started = tokio::time::Instant::now();
        let interval = ticker.tick().await;
        assert!(started.elapsed() >= interval);
        assert!(interval >= Duration::from_secs(30) && interval <= Duration::from_secs(90));
    }

    #[test]
    fn test_degenerate_range() {
        let ticker = JitteredTicker::new(Duration::from_secs(60), Duration::from_secs(10));
        assert_eq!(ticker.next_interval(), Duration::from_secs(60));
    }
}
