use crate::events::{ChannelKind, ErrorCategory, Severity, Timestamp};
use chrono::Duration;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// Identity of a notification for duplicate suppression
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SuppressionKey {
    pub channel: ChannelKind,
    pub recipient: String,
    pub category: ErrorCategory,
    pub severity: Severity,
}

/// Suppresses identical notifications accepted within a time window
#[derive(Debug)]
pub struct DuplicateSuppressor {
    window: Duration,
    last_accepted: Mutex<HashMap<SuppressionKey, Timestamp>>,
}

impl DuplicateSuppressor {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_accepted: Mutex::new(HashMap::new()),
        }
    }

    /// Whether an identical notification was accepted in `(now - window, now]`
    pub fn is_duplicate_at(&self, key: &SuppressionKey, now: Timestamp) -> bool {
        let last_accepted = self
            .last_accepted
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        last_accepted
            .get(key)
            .is_some_and(|&at| at <= now && now - at < self.window)
    }

    /// Remember that a notification with `key` was accepted at `now`
    pub fn record_at(&self, key: SuppressionKey, now: Timestamp) {
        let mut last_accepted = self
            .last_accepted
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let cutoff = now - self.window;
        last_accepted.retain(|_, at| *at > cutoff);
        last_accepted.insert(key, now);
    }

    pub fn tracked_count(&self) -> usize {
        self.last_accepted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
