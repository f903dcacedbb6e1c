use crate::config::{ChannelLimit, NotificationsConfig};
use crate::events::{ChannelKind, Timestamp};
use chrono::{Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::sync::{Mutex, PoisonError};

/// Timestamps of recent occurrences within a sliding window
///
/// Occurrences older than the window are discarded lazily on every read.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    window: Duration,
    occurrences: VecDeque<Timestamp>,
}

impl SlidingWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            occurrences: VecDeque::new(),
        }
    }

    /// Record one occurrence at `timestamp`
    pub fn record_at(&mut self, timestamp: Timestamp) {
        self.occurrences.push_back(timestamp);
    }

    /// Number of occurrences in `(now - window, now]`
    pub fn count_at(&mut self, now: Timestamp) -> usize {
        self.cleanup(now);
        self.occurrences.iter().filter(|&&t| t <= now).count()
    }

    /// Whether one more occurrence fits under `max` at `now`
    pub fn has_capacity_at(&mut self, now: Timestamp, max: usize) -> bool {
        self.count_at(now) < max
    }

    fn cleanup(&mut self, now: Timestamp) {
        let cutoff = now - self.window;
        // Occurrences may be recorded out of order, so scan everything
        self.occurrences.retain(|&time| time > cutoff);
    }
}

/// Sliding-window counters keyed by `K`, safe to share between threads
#[derive(Debug)]
pub struct WindowCounter<K> {
    window: Duration,
    counters: Mutex<HashMap<K, SlidingWindow>>,
}

impl<K: Eq + Hash + Clone> WindowCounter<K> {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            counters: Mutex::new(HashMap::new()),
        }
    }

    pub fn record_at(&self, key: &K, timestamp: Timestamp) {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        counters
            .entry(key.clone())
            .or_insert_with(|| SlidingWindow::new(self.window))
            .record_at(timestamp);
    }

    pub fn count_at(&self, key: &K, now: Timestamp) -> usize {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        counters.get_mut(key).map_or(0, |w| w.count_at(now))
    }

    /// Record an occurrence only if the key is below `max`, atomically
    ///
    /// Returns `false` without recording when the window is full.
    pub fn try_record_at(&self, key: &K, now: Timestamp, max: usize) -> bool {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        let window = counters
            .entry(key.clone())
            .or_insert_with(|| SlidingWindow::new(self.window));
        if window.has_capacity_at(now, max) {
            window.record_at(now);
            true
        } else {
            false
        }
    }
}

/// Why a channel refused another notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitExceeded {
    Hourly { limit: usize },
    Daily { limit: usize },
}

impl fmt::Display for RateLimitExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitExceeded::Hourly { limit } => {
                write!(f, "hourly rate limit of {} reached", limit)
            }
            RateLimitExceeded::Daily { limit } => write!(f, "daily rate limit of {} reached", limit),
        }
    }
}

#[derive(Debug)]
struct ChannelWindows {
    hourly: SlidingWindow,
    daily: SlidingWindow,
}

/// Rate limiter enforcing rolling hourly and daily caps per notification channel
///
/// Channels without a configured limit are never limited.
#[derive(Debug)]
pub struct RateLimiter {
    limits: HashMap<ChannelKind, ChannelLimit>,
    windows: Mutex<HashMap<ChannelKind, ChannelWindows>>,
}

impl RateLimiter {
    /// Create a rate limiter from per-channel caps
    ///
    /// # Arguments
    ///
    /// * `limits` - Caps keyed by channel
    pub fn new(limits: HashMap<ChannelKind, ChannelLimit>) -> Self {
        Self {
            limits,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Build from the notification configuration; unknown channel names are ignored
    pub fn from_config(config: &NotificationsConfig) -> Self {
        let limits = config
            .limits
            .iter()
            .filter_map(|(name, limit)| name.parse::<ChannelKind>().ok().map(|c| (c, *limit)))
            .collect();
        Self::new(limits)
    }

    pub fn limit_for(&self, channel: ChannelKind) -> Option<ChannelLimit> {
        self.limits.get(&channel).copied()
    }

    /// Reserve capacity for one notification on `channel` now
    pub fn try_acquire(&self, channel: ChannelKind) -> Result<(), RateLimitExceeded> {
        self.try_acquire_at(channel, Utc::now())
    }

    /// Reserve capacity for one notification on `channel` at `now`
    ///
    /// Both windows are checked before either is updated, so a rejected message
    /// never consumes capacity.
    ///
    /// # Errors
    ///
    /// Returns which cap was hit when the channel is full.
    pub fn try_acquire_at(
        &self,
        channel: ChannelKind,
        now: Timestamp,
    ) -> Result<(), RateLimitExceeded> {
        let Some(limit) = self.limit_for(channel) else {
            return Ok(());
        };

        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = windows.entry(channel).or_insert_with(|| ChannelWindows {
            hourly: SlidingWindow::new(Duration::hours(1)),
            daily: SlidingWindow::new(Duration::days(1)),
        });

        if !entry.hourly.has_capacity_at(now, limit.per_hour) {
            return Err(RateLimitExceeded::Hourly {
                limit: limit.per_hour,
            });
        }
        if !entry.daily.has_capacity_at(now, limit.per_day) {
            return Err(RateLimitExceeded::Daily {
                limit: limit.per_day,
            });
        }

        entry.hourly.record_at(now);
        entry.daily.record_at(now);
        Ok(())
    }

    /// Notifications accepted on `channel` in the trailing hour
    pub fn hourly_count_at(&self, channel: ChannelKind, now: Timestamp) -> usize {
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        windows
            .get_mut(&channel)
            .map_or(0, |w| w.hourly.count_at(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(per_hour: usize, per_day: usize) -> RateLimiter {
        let mut limits = HashMap::new();
        limits.insert(ChannelKind::Sms, ChannelLimit { per_hour, per_day });
        RateLimiter::new(limits)
    }

    #[test]
    fn test_sliding_window_cleanup() {
        let mut window = SlidingWindow::new(Duration::minutes(1));
        let now = Utc::now();

        window.record_at(now - Duration::minutes(2));
        window.record_at(now - Duration::seconds(30));

        assert_eq!(window.count_at(now), 1);
        assert!(window.has_capacity_at(now, 2));
        assert!(!window.has_capacity_at(now, 1));
    }

    #[test]
    fn test_sliding_window_slides() {
        let mut window = SlidingWindow::new(Duration::minutes(1));
        let now = Utc::now();
        window.record_at(now - Duration::seconds(30));
        window.record_at(now - Duration::seconds(10));

        assert!(!window.has_capacity_at(now, 2));
        // 35 seconds later the first occurrence has expired
        assert!(window.has_capacity_at(now + Duration::seconds(35), 2));
    }

    #[test]
    fn test_window_counter_try_record() {
        let counter: WindowCounter<&str> = WindowCounter::new(Duration::minutes(10));
        let now = Utc::now();

        assert!(counter.try_record_at(&"api", now, 2));
        assert!(counter.try_record_at(&"api", now, 2));
        assert!(!counter.try_record_at(&"api", now, 2));
        assert!(counter.try_record_at(&"disk", now, 2));

        assert_eq!(counter.count_at(&"api", now), 2);
        assert_eq!(counter.count_at(&"api", now + Duration::minutes(11)), 0);
        assert_eq!(counter.count_at(&"unknown", now), 0);
    }

    #[test]
    fn test_hourly_limit_rejects_n_plus_one() {
        let limiter = limiter(3, 100);
        let now = Utc::now();

        for _ in 0..3 {
            assert!(limiter.try_acquire_at(ChannelKind::Sms, now).is_ok());
        }
        assert_eq!(
            limiter.try_acquire_at(ChannelKind::Sms, now),
            Err(RateLimitExceeded::Hourly { limit: 3 })
        );
        assert_eq!(limiter.hourly_count_at(ChannelKind::Sms, now), 3);

        // The hourly window has rolled over
        assert!(limiter
            .try_acquire_at(ChannelKind::Sms, now + Duration::minutes(61))
            .is_ok());
    }

    #[test]
    fn test_daily_limit_spans_hours() {
        let limiter = limiter(2, 3);
        let start = Utc::now();

        assert!(limiter.try_acquire_at(ChannelKind::Sms, start).is_ok());
        assert!(limiter.try_acquire_at(ChannelKind::Sms, start).is_ok());
        let later = start + Duration::hours(2);
        assert!(limiter.try_acquire_at(ChannelKind::Sms, later).is_ok());
        assert_eq!(
            limiter.try_acquire_at(ChannelKind::Sms, later),
            Err(RateLimitExceeded::Daily { limit: 3 })
        );
    }

    #[test]
    fn test_unlimited_channel() {
        let limiter = limiter(1, 1);
        let now = Utc::now();
        for _ in 0..50 {
            assert!(limiter.try_acquire_at(ChannelKind::Chat, now).is_ok());
        }
    }

    #[test]
    fn test_from_config() {
        let limiter = RateLimiter::from_config(&NotificationsConfig::default());
        assert_eq!(limiter.limit_for(ChannelKind::Sms).unwrap().per_hour, 10);
        assert!(limiter.limit_for(ChannelKind::Webhook).is_some());
    }
}
