use crate::events::{ErrorCategory, Severity, Timestamp};
use std::collections::{BTreeMap, VecDeque};

/// One previously classified event
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub timestamp: Timestamp,
    pub severity: Severity,
    /// Name of the pattern rule that shaped the classification, if any
    pub pattern: Option<String>,
}

/// Bounded per-category record of past events
///
/// Each category keeps at most `capacity` entries; the oldest entry is dropped
/// first.
#[derive(Debug, Clone)]
pub struct ClassificationHistory {
    capacity: usize,
    entries: BTreeMap<ErrorCategory, VecDeque<HistoryEntry>>,
}

impl ClassificationHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, category: ErrorCategory, entry: HistoryEntry) {
        let entries = self.entries.entry(category).or_default();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Entries of `category` with a timestamp in `[since, until]`
    pub fn category_count_between(
        &self,
        category: ErrorCategory,
        since: Timestamp,
        until: Timestamp,
    ) -> usize {
        self.entries.get(&category).map_or(0, |entries| {
            entries
                .iter()
                .filter(|e| e.timestamp >= since && e.timestamp <= until)
                .count()
        })
    }

    /// Cached occurrences of a (category, severity, pattern) combination
    pub fn pattern_count(
        &self,
        category: ErrorCategory,
        severity: Severity,
        pattern: Option<&str>,
    ) -> usize {
        self.entries.get(&category).map_or(0, |entries| {
            entries
                .iter()
                .filter(|e| e.severity == severity && e.pattern.as_deref() == pattern)
                .count()
        })
    }

    pub fn len(&self, category: ErrorCategory) -> usize {
        self.entries.get(&category).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.values().all(VecDeque::is_empty)
    }

    pub fn total(&self) -> usize {
        self.entries.values().map(VecDeque::len).sum()
    }
}

impl Default for ClassificationHistory {
    fn default() -> Self {
        Self::new(1000)
    }
}
