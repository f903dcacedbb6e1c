use super::store::{JsonLinesStore, MemoryStore, Record, RecordStore};
use crate::config::AnalyticsConfig;
use crate::error::StoreError;
use crate::events::{
    ChannelKind, ErrorCategory, ErrorEvent, NotificationMessage, NotificationStatus,
    RecoveryAttempt, RecoveryStatus, Severity, SystemMetric, Timestamp,
};
use chrono::{Duration, NaiveDate, TimeZone, Timelike, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Events counted in a window before spike/drop insights are considered
const TREND_MIN_EVENTS: usize = 5;
const SPIKE_RATIO: f64 = 1.5;
const DROP_RATIO: f64 = 0.5;
const RECOVERY_MIN_ATTEMPTS: usize = 3;
const RECOVERY_RATE_FLOOR: f64 = 0.7;
const DELIVERY_MIN_FINISHED: usize = 5;
const DELIVERY_RATE_FLOOR: f64 = 0.9;
const RESOURCE_MIN_ERRORS: usize = 3;
const RESOURCE_USAGE_CEILING: f64 = 80.0;
const CLUSTER_MIN_EVENTS: usize = 10;
const CLUSTER_SHARE: f64 = 0.4;

/// Latest version of every record in a time range
///
/// Attempts and notifications are appended once per status change; only the
/// most recent copy of each id is kept here.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub events: Vec<ErrorEvent>,
    pub attempts: Vec<RecoveryAttempt>,
    pub notifications: Vec<NotificationMessage>,
    pub metrics: Vec<SystemMetric>,
}

impl Snapshot {
    fn from_records(records: Vec<Record>) -> Self {
        let mut snapshot = Snapshot::default();
        let mut attempt_index: HashMap<Uuid, usize> = HashMap::new();
        let mut notification_index: HashMap<Uuid, usize> = HashMap::new();
        let mut event_index: HashMap<Uuid, usize> = HashMap::new();

        for record in records {
            match record {
                Record::Event(event) => {
                    upsert(&mut snapshot.events, &mut event_index, event.id, event)
                }
                Record::Attempt(attempt) => {
                    upsert(&mut snapshot.attempts, &mut attempt_index, attempt.id, attempt)
                }
                Record::Notification(message) => upsert(
                    &mut snapshot.notifications,
                    &mut notification_index,
                    message.id,
                    message,
                ),
                Record::Metric(metric) => snapshot.metrics.push(metric),
            }
        }
        snapshot
    }

    fn events_between(&self, start: Timestamp, end: Timestamp) -> impl Iterator<Item = &ErrorEvent> {
        self.events
            .iter()
            .filter(move |e| e.timestamp >= start && e.timestamp < end)
    }
}

fn upsert<T>(items: &mut Vec<T>, index: &mut HashMap<Uuid, usize>, id: Uuid, item: T) {
    match index.get(&id) {
        Some(&position) => items[position] = item,
        None => {
            index.insert(id, items.len());
            items.push(item);
        }
    }
}

/// Count, response time and recovery rate for one bucket x category x severity
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TrendPoint {
    pub bucket_start: Timestamp,
    pub category: ErrorCategory,
    pub severity: Severity,
    pub count: usize,
    /// Mean seconds from detection to the first terminal recovery attempt
    pub avg_response_time_seconds: Option<f64>,
    /// Share of recovered events among those with an executed recovery
    pub recovery_rate: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InsightKind {
    TrendSpike,
    TrendDrop,
    RecoveryDegradation,
    DeliveryDegradation,
    ResourceCorrelation,
    TimeClustering,
}

/// A rule-based observation about recent pipeline behaviour
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Insight {
    pub kind: InsightKind,
    pub message: String,
    /// The measured value the rule fired on (ratio, rate, usage or share)
    pub value: f64,
}

/// Inputs of the health score, all measured over the same window
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
pub struct HealthInputs {
    pub error_count: usize,
    pub recovery_failure_rate: f64,
    pub notification_failure_rate: f64,
    pub critical_share: f64,
}

/// Score in `[0, 100]`; non-increasing in every input
pub fn health_score(inputs: &HealthInputs) -> f64 {
    let error_penalty = (inputs.error_count as f64 * 0.5).min(30.0);
    let recovery_penalty = 30.0 * unit(inputs.recovery_failure_rate);
    let notification_penalty = 20.0 * unit(inputs.notification_failure_rate);
    let critical_penalty = 20.0 * unit(inputs.critical_share);

    (100.0 - error_penalty - recovery_penalty - notification_penalty - critical_penalty)
        .clamp(0.0, 100.0)
}

fn unit(rate: f64) -> f64 {
    if rate.is_nan() {
        0.0
    } else {
        rate.clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct RecoveryPerformance {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub skipped: usize,
    /// Succeeded over executed (non-skipped) attempts
    pub success_rate: Option<f64>,
    pub avg_duration_seconds: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ChannelPerformance {
    pub sent: usize,
    pub escalated: usize,
    /// Delivery failed after being attempted
    pub failed: usize,
    pub pending: usize,
    /// Refused at admission; not a delivery failure
    pub rejected: usize,
}

/// Everything that happened on one UTC calendar day
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DailyReport {
    pub date: NaiveDate,
    pub total_events: usize,
    pub by_category: BTreeMap<ErrorCategory, usize>,
    pub by_severity: BTreeMap<Severity, usize>,
    pub recovery: RecoveryPerformance,
    pub notifications: BTreeMap<ChannelKind, ChannelPerformance>,
    pub insights: Vec<Insight>,
    pub health_score: f64,
}

/// Records pipeline activity and answers trend, insight and report queries
pub struct ErrorAnalytics {
    store: Arc<dyn RecordStore>,
    persistence_failures: AtomicU64,
}

impl ErrorAnalytics {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            persistence_failures: AtomicU64::new(0),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Build analytics over the configured store
    ///
    /// # Errors
    ///
    /// Fails when the JSON-lines store cannot be opened.
    pub fn from_config(config: &AnalyticsConfig) -> Result<Self, StoreError> {
        match config.store_path {
            Some(ref path) => {
                info!("Persisting analytics records to {}", path.display());
                Ok(Self::new(Arc::new(JsonLinesStore::open(path)?)))
            }
            None => {
                info!("No analytics store path configured, keeping records in memory");
                Ok(Self::in_memory())
            }
        }
    }

    pub fn record_event(&self, event: &ErrorEvent) {
        self.persist(Record::Event(event.clone()));
    }

    pub fn record_attempt(&self, attempt: &RecoveryAttempt) {
        self.persist(Record::Attempt(attempt.clone()));
    }

    pub fn record_notification(&self, message: &NotificationMessage) {
        self.persist(Record::Notification(message.clone()));
    }

    pub fn record_metric(&self, metric: &SystemMetric) {
        self.persist(Record::Metric(metric.clone()));
    }

    /// Appends that failed and were dropped
    pub fn persistence_failures(&self) -> u64 {
        self.persistence_failures.load(Ordering::Relaxed)
    }

    fn persist(&self, record: Record) {
        if let Err(e) = self.store.append(&record) {
            self.persistence_failures.fetch_add(1, Ordering::Relaxed);
            warn!("Dropping analytics record: {}", e);
        }
    }

    /// Latest version of every record stamped in `[start, end)`
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` when the store cannot be read.
    pub fn snapshot(&self, start: Timestamp, end: Timestamp) -> Result<Snapshot, StoreError> {
        let records = self
            .store
            .load_since(start)?
            .into_iter()
            .filter(|record| record.timestamp() < end)
            .collect();
        Ok(Snapshot::from_records(records))
    }

    /// Event counts grouped by time bucket, category and severity
    ///
    /// # Arguments
    ///
    /// * `start` / `end` - Half-open range of event timestamps
    /// * `bucket` - Bucket width; a non-positive width yields a single bucket
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` when the store cannot be read.
    pub fn trends(
        &self,
        start: Timestamp,
        end: Timestamp,
        bucket: Duration,
    ) -> Result<Vec<TrendPoint>, StoreError> {
        let snapshot = self.snapshot(start, end)?;
        let first_terminal = first_terminal_attempts(&snapshot.attempts);

        #[derive(Default)]
        struct Accumulator {
            count: usize,
            response_total: f64,
            responses: usize,
            recovered: usize,
            executed: usize,
        }

        let bucket_ms = bucket.num_milliseconds();
        let mut groups: BTreeMap<(Timestamp, ErrorCategory, Severity), Accumulator> =
            BTreeMap::new();

        for event in snapshot.events_between(start, end) {
            let bucket_start = if bucket_ms > 0 {
                let offset = (event.timestamp - start).num_milliseconds() / bucket_ms;
                start + Duration::milliseconds(offset * bucket_ms)
            } else {
                start
            };

            let group = groups
                .entry((bucket_start, event.category, event.severity))
                .or_default();
            group.count += 1;

            if let Some(outcome) = first_terminal.get(&event.id) {
                if let Some(end_time) = outcome.end_time {
                    group.response_total +=
                        (end_time - event.timestamp).num_milliseconds() as f64 / 1000.0;
                    group.responses += 1;
                }
            }

            let executed: Vec<&RecoveryAttempt> = snapshot
                .attempts
                .iter()
                .filter(|a| a.error_id == event.id && a.status != RecoveryStatus::Skipped)
                .filter(|a| a.status.is_terminal())
                .collect();
            if !executed.is_empty() {
                group.executed += 1;
                if executed.iter().any(|a| a.status == RecoveryStatus::Success) {
                    group.recovered += 1;
                }
            }
        }

        Ok(groups
            .into_iter()
            .map(|((bucket_start, category, severity), group)| TrendPoint {
                bucket_start,
                category,
                severity,
                count: group.count,
                avg_response_time_seconds: (group.responses > 0)
                    .then(|| group.response_total / group.responses as f64),
                recovery_rate: (group.executed > 0)
                    .then(|| group.recovered as f64 / group.executed as f64),
            })
            .collect())
    }

    /// Rule-based insights for `[now - window, now)` compared with the window before
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` when the store cannot be read.
    pub fn insights(&self, now: Timestamp, window: Duration) -> Result<Vec<Insight>, StoreError> {
        let window_start = now - window;
        let snapshot = self.snapshot(window_start - window, now)?;
        Ok(derive_insights(&snapshot, window_start, now, window))
    }

    /// Health inputs measured over `[now - window, now)`
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` when the store cannot be read.
    pub fn health_inputs(&self, now: Timestamp, window: Duration) -> Result<HealthInputs, StoreError> {
        let snapshot = self.snapshot(now - window, now)?;
        Ok(measure_health(&snapshot, now - window, now))
    }

    /// Aggregate report for one UTC calendar day
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` when the store cannot be read.
    pub fn daily_report(&self, date: NaiveDate) -> Result<DailyReport, StoreError> {
        let start = Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap_or_default());
        let end = start + Duration::days(1);
        let day = Duration::days(1);

        // Include the previous day so trend insights have a baseline
        let snapshot = self.snapshot(start - day, end)?;
        let events: Vec<&ErrorEvent> = snapshot.events_between(start, end).collect();

        let mut by_category = BTreeMap::new();
        let mut by_severity = BTreeMap::new();
        for event in &events {
            *by_category.entry(event.category).or_insert(0) += 1;
            *by_severity.entry(event.severity).or_insert(0) += 1;
        }

        let attempts: Vec<&RecoveryAttempt> = snapshot
            .attempts
            .iter()
            .filter(|a| a.start_time >= start && a.start_time < end)
            .collect();
        let recovery = recovery_performance(&attempts);

        let mut notifications: BTreeMap<ChannelKind, ChannelPerformance> = BTreeMap::new();
        for message in snapshot
            .notifications
            .iter()
            .filter(|m| m.created_at >= start && m.created_at < end)
        {
            let performance = notifications.entry(message.channel).or_default();
            match message.status {
                _ if message.rejected => performance.rejected += 1,
                NotificationStatus::Sent => performance.sent += 1,
                NotificationStatus::Escalated => performance.escalated += 1,
                NotificationStatus::Failed => performance.failed += 1,
                NotificationStatus::Pending => performance.pending += 1,
            }
        }

        let insights = derive_insights(&snapshot, start, end, day);
        let health = health_score(&measure_health(&snapshot, start, end));

        debug!(
            "Daily report for {}: {} events, health {:.1}",
            date,
            events.len(),
            health
        );

        Ok(DailyReport {
            date,
            total_events: events.len(),
            by_category,
            by_severity,
            recovery,
            notifications,
            insights,
            health_score: health,
        })
    }

    /// Remove records older than `retention`
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` when the store cannot be rewritten.
    pub fn purge_older_than(&self, retention: Duration) -> Result<usize, StoreError> {
        self.purge_older_than_at(Utc::now(), retention)
    }

    pub fn purge_older_than_at(
        &self,
        now: Timestamp,
        retention: Duration,
    ) -> Result<usize, StoreError> {
        let removed = self.store.purge_before(now - retention)?;
        if removed > 0 {
            info!("Retention sweep removed {} analytics records", removed);
        }
        Ok(removed)
    }
}

/// Earliest-ending terminal attempt per event
fn first_terminal_attempts(attempts: &[RecoveryAttempt]) -> HashMap<Uuid, &RecoveryAttempt> {
    let mut first: HashMap<Uuid, &RecoveryAttempt> = HashMap::new();
    for attempt in attempts.iter().filter(|a| a.status.is_terminal()) {
        let Some(end_time) = attempt.end_time else {
            continue;
        };
        match first.get(&attempt.error_id) {
            Some(existing) if existing.end_time.is_some_and(|t| t <= end_time) => {}
            _ => {
                first.insert(attempt.error_id, attempt);
            }
        }
    }
    first
}

fn recovery_performance(attempts: &[&RecoveryAttempt]) -> RecoveryPerformance {
    let mut performance = RecoveryPerformance {
        attempted: attempts.len(),
        ..RecoveryPerformance::default()
    };
    let mut duration_total = 0.0;
    let mut durations = 0usize;

    for attempt in attempts {
        match attempt.status {
            RecoveryStatus::Success => performance.succeeded += 1,
            RecoveryStatus::Failed => performance.failed += 1,
            RecoveryStatus::Timeout => performance.timed_out += 1,
            RecoveryStatus::Skipped => performance.skipped += 1,
            RecoveryStatus::Pending | RecoveryStatus::InProgress => {}
        }
        if attempt.status != RecoveryStatus::Skipped {
            if let Some(duration) = attempt.duration() {
                duration_total += duration.num_milliseconds() as f64 / 1000.0;
                durations += 1;
            }
        }
    }

    let executed = performance.succeeded + performance.failed + performance.timed_out;
    performance.success_rate =
        (executed > 0).then(|| performance.succeeded as f64 / executed as f64);
    performance.avg_duration_seconds =
        (durations > 0).then(|| duration_total / durations as f64);
    performance
}

fn measure_health(snapshot: &Snapshot, start: Timestamp, end: Timestamp) -> HealthInputs {
    let events: Vec<&ErrorEvent> = snapshot.events_between(start, end).collect();
    let critical = events
        .iter()
        .filter(|e| e.severity == Severity::Critical)
        .count();

    let attempts: Vec<&RecoveryAttempt> = snapshot
        .attempts
        .iter()
        .filter(|a| a.start_time >= start && a.start_time < end)
        .collect();
    let recovery = recovery_performance(&attempts);

    let (delivered, failed) = notification_outcomes(snapshot, start, end);

    HealthInputs {
        error_count: events.len(),
        recovery_failure_rate: recovery.success_rate.map_or(0.0, |rate| 1.0 - rate),
        notification_failure_rate: ratio(failed, delivered + failed),
        critical_share: ratio(critical, events.len()),
    }
}

/// (delivered, failed) notifications created in the range
///
/// Messages rejected at admission were never attempted and count as neither.
fn notification_outcomes(snapshot: &Snapshot, start: Timestamp, end: Timestamp) -> (usize, usize) {
    snapshot
        .notifications
        .iter()
        .filter(|m| m.created_at >= start && m.created_at < end && !m.rejected)
        .fold((0, 0), |(delivered, failed), m| match m.status {
            NotificationStatus::Sent | NotificationStatus::Escalated => (delivered + 1, failed),
            NotificationStatus::Failed => (delivered, failed + 1),
            NotificationStatus::Pending => (delivered, failed),
        })
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

fn derive_insights(
    snapshot: &Snapshot,
    start: Timestamp,
    end: Timestamp,
    window: Duration,
) -> Vec<Insight> {
    let mut insights = Vec::new();

    let current: Vec<&ErrorEvent> = snapshot.events_between(start, end).collect();
    let previous = snapshot.events_between(start - window, start).count();

    if current.len() >= TREND_MIN_EVENTS && current.len() as f64 >= SPIKE_RATIO * previous as f64 {
        insights.push(Insight {
            kind: InsightKind::TrendSpike,
            message: format!(
                "Error volume rose to {} from {} in the previous window",
                current.len(),
                previous
            ),
            value: current.len() as f64 / previous.max(1) as f64,
        });
    } else if previous >= TREND_MIN_EVENTS && current.len() as f64 <= DROP_RATIO * previous as f64 {
        insights.push(Insight {
            kind: InsightKind::TrendDrop,
            message: format!(
                "Error volume fell to {} from {} in the previous window",
                current.len(),
                previous
            ),
            value: current.len() as f64 / previous as f64,
        });
    }

    let attempts: Vec<&RecoveryAttempt> = snapshot
        .attempts
        .iter()
        .filter(|a| a.start_time >= start && a.start_time < end)
        .collect();
    let recovery = recovery_performance(&attempts);
    let executed = recovery.succeeded + recovery.failed + recovery.timed_out;
    if let Some(rate) = recovery.success_rate {
        if executed >= RECOVERY_MIN_ATTEMPTS && rate < RECOVERY_RATE_FLOOR {
            insights.push(Insight {
                kind: InsightKind::RecoveryDegradation,
                message: format!(
                    "Automated recovery succeeded in {:.0}% of {} attempts",
                    rate * 100.0,
                    executed
                ),
                value: rate,
            });
        }
    }

    let (delivered, failed) = notification_outcomes(snapshot, start, end);
    let finished = delivered + failed;
    if finished >= DELIVERY_MIN_FINISHED {
        let rate = ratio(delivered, finished);
        if rate < DELIVERY_RATE_FLOOR {
            insights.push(Insight {
                kind: InsightKind::DeliveryDegradation,
                message: format!(
                    "Notification delivery rate is {:.0}% over {} messages",
                    rate * 100.0,
                    finished
                ),
                value: rate,
            });
        }
    }

    let resource_errors = current
        .iter()
        .filter(|e| e.category == ErrorCategory::ResourceShortage)
        .count();
    if resource_errors >= RESOURCE_MIN_ERRORS {
        for name in ["cpu_percent", "memory_percent"] {
            let values: Vec<f64> = snapshot
                .metrics
                .iter()
                .filter(|m| m.name == name && m.timestamp >= start && m.timestamp < end)
                .map(|m| m.value)
                .collect();
            if values.is_empty() {
                continue;
            }
            let average = values.iter().sum::<f64>() / values.len() as f64;
            if average >= RESOURCE_USAGE_CEILING {
                insights.push(Insight {
                    kind: InsightKind::ResourceCorrelation,
                    message: format!(
                        "{} resource errors coincide with average {} of {:.1}",
                        resource_errors, name, average
                    ),
                    value: average,
                });
            }
        }
    }

    if current.len() >= CLUSTER_MIN_EVENTS {
        let mut by_hour = [0usize; 24];
        for event in &current {
            by_hour[event.timestamp.hour() as usize] += 1;
        }
        if let Some((hour, &count)) = by_hour.iter().enumerate().max_by_key(|&(_, count)| *count) {
            let share = ratio(count, current.len());
            if share >= CLUSTER_SHARE {
                insights.push(Insight {
                    kind: InsightKind::TimeClustering,
                    message: format!(
                        "{:.0}% of errors occurred between {:02}:00 and {:02}:59 UTC",
                        share * 100.0,
                        hour,
                        hour
                    ),
                    value: share,
                });
            }
        }
    }

    insights
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{ClassificationHistory, Classifier};
    use crate::config::ClassifierConfig;
    use quickcheck_macros::quickcheck;

    fn at(hour: u32, minute: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2024, 3, 12, hour, minute, 0).unwrap()
    }

    fn event(category: ErrorCategory, severity: Severity, timestamp: Timestamp) -> ErrorEvent {
        ErrorEvent::new(category, severity, "test", "test").with_timestamp(timestamp)
    }

    fn attempt_for(event: &ErrorEvent, status: RecoveryStatus, seconds: i64) -> RecoveryAttempt {
        let classification =
            Classifier::new(ClassifierConfig::default()).classify(event, &ClassificationHistory::default());
        let mut attempt = RecoveryAttempt::pending(event, &classification);
        attempt.start_time = event.timestamp;
        attempt.status = status;
        attempt.end_time = Some(event.timestamp + Duration::seconds(seconds));
        attempt
    }

    fn notification(event: &ErrorEvent, status: NotificationStatus) -> NotificationMessage {
        NotificationMessage {
            id: Uuid::new_v4(),
            error_id: event.id,
            category: event.category,
            severity: event.severity,
            channel: ChannelKind::Chat,
            recipient: "@admin".to_string(),
            text: "text".to_string(),
            priority: crate::events::Priority::P1,
            status,
            sent_time: None,
            retry_count: 0,
            max_retries: 3,
            escalation: false,
            failure_reason: None,
            rejected: false,
            created_at: event.timestamp,
        }
    }

    #[test]
    fn test_health_score_bounds() {
        assert_eq!(health_score(&HealthInputs::default()), 100.0);

        let worst = HealthInputs {
            error_count: 1000,
            recovery_failure_rate: 1.0,
            notification_failure_rate: 1.0,
            critical_share: 1.0,
        };
        assert_eq!(health_score(&worst), 0.0);

        let some = HealthInputs {
            error_count: 10,
            recovery_failure_rate: 0.5,
            ..HealthInputs::default()
        };
        assert!((health_score(&some) - 80.0).abs() < 1e-9);
    }

    #[quickcheck]
    fn prop_health_score_clamped(errors: u16, a: f64, b: f64, c: f64) -> bool {
        let score = health_score(&HealthInputs {
            error_count: errors as usize,
            recovery_failure_rate: a,
            notification_failure_rate: b,
            critical_share: c,
        });
        (0.0..=100.0).contains(&score)
    }

    #[quickcheck]
    fn prop_health_score_non_increasing(errors: u16, extra: u8, rates: (u8, u8, u8), bump: u8) -> bool {
        let base = HealthInputs {
            error_count: errors as usize,
            recovery_failure_rate: rates.0 as f64 / 255.0,
            notification_failure_rate: rates.1 as f64 / 255.0,
            critical_share: rates.2 as f64 / 255.0,
        };
        let delta = bump as f64 / 255.0;
        let score = health_score(&base);

        let more_errors = HealthInputs {
            error_count: base.error_count + extra as usize,
            ..base
        };
        let more_recovery_failures = HealthInputs {
            recovery_failure_rate: base.recovery_failure_rate + delta,
            ..base
        };
        let more_delivery_failures = HealthInputs {
            notification_failure_rate: base.notification_failure_rate + delta,
            ..base
        };
        let more_critical = HealthInputs {
            critical_share: base.critical_share + delta,
            ..base
        };

        health_score(&more_errors) <= score
            && health_score(&more_recovery_failures) <= score
            && health_score(&more_delivery_failures) <= score
            && health_score(&more_critical) <= score
    }

    #[test]
    fn test_snapshot_keeps_latest_version() {
        let analytics = ErrorAnalytics::in_memory();
        let e = event(ErrorCategory::ApiFailure, Severity::High, at(10, 0));
        let mut message = notification(&e, NotificationStatus::Pending);
        analytics.record_notification(&message);
        message.status = NotificationStatus::Sent;
        analytics.record_notification(&message);

        let snapshot = analytics.snapshot(at(0, 0), at(23, 0)).unwrap();
        assert_eq!(snapshot.notifications.len(), 1);
        assert_eq!(snapshot.notifications[0].status, NotificationStatus::Sent);
    }

    #[test]
    fn test_trends_group_by_bucket() {
        let analytics = ErrorAnalytics::in_memory();
        let first = event(ErrorCategory::ApiFailure, Severity::High, at(10, 5));
        let second = event(ErrorCategory::ApiFailure, Severity::High, at(10, 40));
        let third = event(ErrorCategory::ApiFailure, Severity::High, at(11, 10));
        for e in [&first, &second, &third] {
            analytics.record_event(e);
        }
        analytics.record_attempt(&attempt_for(&first, RecoveryStatus::Success, 20));
        analytics.record_attempt(&attempt_for(&second, RecoveryStatus::Failed, 40));

        let trends = analytics
            .trends(at(10, 0), at(12, 0), Duration::hours(1))
            .unwrap();
        assert_eq!(trends.len(), 2);

        let first_hour = &trends[0];
        assert_eq!(first_hour.bucket_start, at(10, 0));
        assert_eq!(first_hour.count, 2);
        assert_eq!(first_hour.avg_response_time_seconds, Some(30.0));
        assert_eq!(first_hour.recovery_rate, Some(0.5));

        assert_eq!(trends[1].count, 1);
        assert_eq!(trends[1].recovery_rate, None);
    }

    #[test]
    fn test_spike_and_degradation_insights() {
        let analytics = ErrorAnalytics::in_memory();
        analytics.record_event(&event(ErrorCategory::LogicError, Severity::Medium, at(9, 30)));
        for minute in 0..6 {
            let e = event(ErrorCategory::ApiFailure, Severity::High, at(10, minute * 5));
            analytics.record_event(&e);
            let status = if minute == 0 {
                RecoveryStatus::Success
            } else {
                RecoveryStatus::Failed
            };
            analytics.record_attempt(&attempt_for(&e, status, 5));
            let delivered = if minute < 3 {
                NotificationStatus::Sent
            } else {
                NotificationStatus::Failed
            };
            analytics.record_notification(&notification(&e, delivered));
        }

        let insights = analytics.insights(at(11, 0), Duration::hours(1)).unwrap();
        let kinds: Vec<InsightKind> = insights.iter().map(|i| i.kind).collect();
        assert!(kinds.contains(&InsightKind::TrendSpike));
        assert!(kinds.contains(&InsightKind::RecoveryDegradation));
        assert!(kinds.contains(&InsightKind::DeliveryDegradation));
        assert!(!kinds.contains(&InsightKind::TimeClustering));
    }

    #[test]
    fn test_drop_insight() {
        let analytics = ErrorAnalytics::in_memory();
        for minute in 0..6 {
            analytics.record_event(&event(ErrorCategory::ApiFailure, Severity::Low, at(9, minute)));
        }
        analytics.record_event(&event(ErrorCategory::ApiFailure, Severity::Low, at(10, 30)));

        let insights = analytics.insights(at(11, 0), Duration::hours(1)).unwrap();
        assert!(insights.iter().any(|i| i.kind == InsightKind::TrendDrop));
    }

    #[test]
    fn test_resource_correlation_and_clustering() {
        let analytics = ErrorAnalytics::in_memory();
        for minute in 0..10 {
            analytics.record_event(&event(
                ErrorCategory::ResourceShortage,
                Severity::High,
                at(14, minute),
            ));
            let mut metric = SystemMetric::new("memory_percent", 91.0);
            metric.timestamp = at(14, minute);
            analytics.record_metric(&metric);
        }

        let insights = analytics.insights(at(15, 0), Duration::days(1)).unwrap();
        let correlation = insights
            .iter()
            .find(|i| i.kind == InsightKind::ResourceCorrelation)
            .unwrap();
        assert!(correlation.message.contains("memory_percent"));

        let cluster = insights
            .iter()
            .find(|i| i.kind == InsightKind::TimeClustering)
            .unwrap();
        assert_eq!(cluster.value, 1.0);
    }

    #[test]
    fn test_daily_report() {
        let analytics = ErrorAnalytics::in_memory();
        let critical = event(ErrorCategory::ApiFailure, Severity::Critical, at(8, 0));
        let low = event(ErrorCategory::DataIntegrity, Severity::Low, at(9, 0));
        let other_day = event(ErrorCategory::ApiFailure, Severity::Low, at(8, 0) + Duration::days(1));
        for e in [&critical, &low, &other_day] {
            analytics.record_event(e);
        }
        analytics.record_attempt(&attempt_for(&critical, RecoveryStatus::Success, 10));
        analytics.record_notification(&notification(&critical, NotificationStatus::Sent));
        analytics.record_notification(&notification(&low, NotificationStatus::Failed));
        let mut suppressed = notification(&critical, NotificationStatus::Failed);
        suppressed.rejected = true;
        analytics.record_notification(&suppressed);

        let report = analytics
            .daily_report(NaiveDate::from_ymd_opt(2024, 3, 12).unwrap())
            .unwrap();
        assert_eq!(report.total_events, 2);
        assert_eq!(report.by_category[&ErrorCategory::ApiFailure], 1);
        assert_eq!(report.by_severity[&Severity::Low], 1);
        assert_eq!(report.recovery.succeeded, 1);
        assert_eq!(report.recovery.success_rate, Some(1.0));
        assert_eq!(report.notifications[&ChannelKind::Chat].sent, 1);
        assert_eq!(report.notifications[&ChannelKind::Chat].failed, 1);
        assert_eq!(report.notifications[&ChannelKind::Chat].rejected, 1);

        // 2 errors, no recovery failures, half the notifications failed, half critical
        assert!((report.health_score - 79.0).abs() < 1e-9);
        assert!(serde_json::to_string(&report).is_ok());
    }

    #[test]
    fn test_purge_older_than() {
        let analytics = ErrorAnalytics::in_memory();
        let now = at(12, 0);
        analytics.record_event(&event(ErrorCategory::ApiFailure, Severity::Low, now - Duration::days(91)));
        analytics.record_event(&event(ErrorCategory::ApiFailure, Severity::Low, now - Duration::days(1)));

        assert_eq!(analytics.purge_older_than_at(now, Duration::days(90)).unwrap(), 1);
        assert_eq!(
            analytics
                .snapshot(now - Duration::days(365), now)
                .unwrap()
                .events
                .len(),
            1
        );
    }

    struct FailingStore;

    impl RecordStore for FailingStore {
        fn append(&self, _record: &Record) -> Result<(), StoreError> {
            Err(StoreError::IoError(std::io::Error::other("disk full")))
        }

        fn load_since(&self, _since: Timestamp) -> Result<Vec<Record>, StoreError> {
            Ok(Vec::new())
        }

        fn purge_before(&self, _cutoff: Timestamp) -> Result<usize, StoreError> {
            Ok(0)
        }
    }

    #[test]
    fn test_persistence_failures_are_dropped() {
        let analytics = ErrorAnalytics::new(Arc::new(FailingStore));
        analytics.record_event(&event(ErrorCategory::ApiFailure, Severity::Low, at(1, 0)));
        analytics.record_metric(&SystemMetric::new("memory_mb", 1.0));
        assert_eq!(analytics.persistence_failures(), 2);
    }
}
