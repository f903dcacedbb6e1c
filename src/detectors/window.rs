//! Bounded rolling window of timestamped samples
//!
//! Detectors keep their raw inputs in a `RollingWindow`: a fixed-capacity ring
//! buffer that also forgets samples older than a maximum age. It never grows past
//! its capacity regardless of how fast samples arrive.

use crate::events::Timestamp;
use chrono::{Duration, Utc};
use std::collections::VecDeque;

/// A sample together with the time it was recorded
#[derive(Debug, Clone, PartialEq)]
pub struct Timestamped<T> {
    pub timestamp: Timestamp,
    pub value: T,
}

/// Fixed-capacity, age-bounded ring buffer
#[derive(Debug, Clone)]
pub struct RollingWindow<T> {
    samples: VecDeque<Timestamped<T>>,
    capacity: usize,
    max_age: Duration,
}

impl<T> RollingWindow<T> {
    /// Create a window holding at most `capacity` samples no older than `max_age`
    ///
    /// # Examples
    ///
    /// ```
    /// use faultline::detectors::RollingWindow;
    /// use chrono::Duration;
    ///
    /// let mut window = RollingWindow::new(2, Duration::seconds(60));
    /// window.push(1);
    /// window.push(2);
    /// window.push(3);
    /// assert_eq!(window.len(), 2);
    /// ```
    pub fn new(capacity: usize, max_age: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            max_age,
        }
    }

    /// Record a sample at the current time
    pub fn push(&mut self, value: T) {
        self.push_at(Utc::now(), value);
    }

    /// Record a sample at a specific time, evicting the oldest when full
    pub fn push_at(&mut self, timestamp: Timestamp, value: T) {
        while self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(Timestamped { timestamp, value });
    }

    /// Samples recorded within `max_age` of `now`, oldest first
    pub fn recent(&self, now: Timestamp) -> impl Iterator<Item = &Timestamped<T>> {
        let cutoff = now - self.max_age;
        self.samples
            .iter()
            .filter(move |sample| sample.timestamp >= cutoff && sample.timestamp <= now)
    }

    /// Most recent sample within the age bound
    pub fn latest(&self, now: Timestamp) -> Option<&Timestamped<T>> {
        self.recent(now).last()
    }

    /// Drop samples older than `max_age`
    pub fn prune(&mut self, now: Timestamp) {
        let cutoff = now - self.max_age;
        self.samples.retain(|sample| sample.timestamp >= cutoff);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
