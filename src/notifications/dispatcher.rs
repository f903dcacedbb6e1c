use crate::analytics::ErrorAnalytics;
use crate::config::NotificationsConfig;
use crate::error::DeliveryError;
use crate::events::{
    ChannelKind, ClassificationResult, ErrorEvent, ErrorKey, NotificationMessage,
    NotificationStatus, Priority, RecoveryAction, RecoveryAttempt, Timestamp,
};
use crate::notifications::channel::ChannelTable;
use crate::notifications::directory::RecipientDirectory;
use crate::notifications::escalation::EscalationTimers;
use crate::notifications::suppression::{DuplicateSuppressor, SuppressionKey};
use crate::notifications::templates::{render, render_escalation, TemplateKind};
use crate::rate_limiter::RateLimiter;
use crate::scheduling::{backoff_delay, run_with_timeout, TimeoutError};
use chrono::Utc;
use log::{debug, error, info, warn};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Outcome of handing one event to the dispatcher
#[derive(Debug, Clone, Default)]
pub struct SendReport {
    pub accepted: usize,
    pub rejected: usize,
    pub escalation_armed: bool,
    /// Every record created for the event, accepted (Pending) and rejected (Failed)
    pub messages: Vec<NotificationMessage>,
}

/// Outcome of one queue drain pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessReport {
    pub delivered: usize,
    pub retried: usize,
    pub failed: usize,
}

/// Cumulative dispatcher counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    pub accepted: u64,
    pub rejected: u64,
    pub delivered: u64,
    pub failed: u64,
    pub retried: u64,
    pub escalations_fired: u64,
}

#[derive(Debug, Default)]
struct Counters {
    accepted: AtomicU64,
    rejected: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    escalations_fired: AtomicU64,
}

#[derive(Debug)]
struct QueuedMessage {
    message: NotificationMessage,
    not_before: Instant,
}

struct DispatcherInner {
    config: NotificationsConfig,
    directory: RecipientDirectory,
    channels: ChannelTable,
    rate_limiter: RateLimiter,
    suppressor: DuplicateSuppressor,
    // Serializes the check-then-record sequence of admission
    admission: Mutex<()>,
    queue: Mutex<VecDeque<QueuedMessage>>,
    counters: Counters,
    analytics: Option<Arc<ErrorAnalytics>>,
}

/// Fans classified events out to recipients and drives delivery
///
/// Admission applies duplicate suppression and per-channel rate limits; accepted
/// messages wait in a bounded queue drained by `process_queue`. Every event that
/// is not ignored arms an escalation timer which, unless resolved first, sends a
/// P0 escalation to the configured escalation contacts.
pub struct NotificationDispatcher {
    inner: Arc<DispatcherInner>,
    timers: EscalationTimers,
}

impl NotificationDispatcher {
    /// Create a dispatcher
    ///
    /// # Arguments
    ///
    /// * `config` - Limits, suppression window, retry policy and escalation contacts
    /// * `directory` - Role to address mapping
    /// * `channels` - Transport per channel kind; kinds without one fail delivery
    pub fn new(
        config: NotificationsConfig,
        directory: RecipientDirectory,
        channels: ChannelTable,
    ) -> Self {
        let inner = DispatcherInner {
            rate_limiter: RateLimiter::from_config(&config),
            suppressor: DuplicateSuppressor::new(config.suppression_window()),
            config,
            directory,
            channels,
            admission: Mutex::new(()),
            queue: Mutex::new(VecDeque::new()),
            counters: Counters::default(),
            analytics: None,
        };
        Self {
            inner: Arc::new(inner),
            timers: EscalationTimers::new(),
        }
    }

    /// Append every message status change to `analytics`
    pub fn with_analytics(mut self, analytics: Arc<ErrorAnalytics>) -> Self {
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => inner.analytics = Some(analytics),
            None => warn!("Dispatcher already shared, analytics not attached"),
        }
        self
    }

    /// Notify the classification's contacts about an event
    pub fn send_notification(
        &self,
        event: &ErrorEvent,
        classification: &ClassificationResult,
        recovery: Option<&RecoveryAttempt>,
    ) -> SendReport {
        self.send_notification_at(event, classification, recovery, Utc::now())
    }

    pub fn send_notification_at(
        &self,
        event: &ErrorEvent,
        classification: &ClassificationResult,
        recovery: Option<&RecoveryAttempt>,
        now: Timestamp,
    ) -> SendReport {
        let inner = &self.inner;
        let kind = TemplateKind::select(classification, recovery);
        let text = render(kind, event, classification, recovery);
        let recipients = inner.directory.resolve(
            &classification.escalation_contacts,
            &classification.notification_channels,
        );

        let mut report = SendReport::default();

        if recipients.is_empty() {
            let channel = classification
                .notification_channels
                .first()
                .copied()
                .unwrap_or(ChannelKind::Chat);
            let mut message = inner.new_message(
                event,
                channel,
                String::new(),
                text.clone(),
                classification.priority,
                false,
                now,
            );
            let reason = format!(
                "no recipients for roles [{}] on the selected channels",
                classification.escalation_contacts.join(", ")
            );
            warn!("Event {}: {}", event.id, reason);
            inner.reject(&mut message, reason);
            report.rejected += 1;
            report.messages.push(message);
        }

        for (channel, recipient) in recipients {
            let mut message = inner.new_message(
                event,
                channel,
                recipient,
                text.clone(),
                classification.priority,
                false,
                now,
            );
            match inner.admit(&message, now) {
                Ok(()) => {
                    inner.record(&message);
                    inner.push(message.clone(), Instant::now());
                    report.accepted += 1;
                }
                Err(reason) => {
                    debug!(
                        "Rejected {} notification to {}: {}",
                        channel, message.recipient, reason
                    );
                    inner.reject(&mut message, reason);
                    report.rejected += 1;
                }
            }
            report.messages.push(message);
        }

        inner
            .counters
            .accepted
            .fetch_add(report.accepted as u64, Ordering::Relaxed);

        if classification.action != RecoveryAction::Ignore {
            self.arm_escalation(event, classification);
            report.escalation_armed = true;
        }

        info!(
            "Event {} ({} {}): {} notifications accepted, {} rejected via {} template",
            event.id,
            event.category,
            classification.priority,
            report.accepted,
            report.rejected,
            kind.name()
        );
        report
    }

    fn arm_escalation(&self, event: &ErrorEvent, classification: &ClassificationResult) {
        let inner = Arc::clone(&self.inner);
        let event = event.clone();
        let classification = classification.clone();
        let timeout = classification.escalation_timeout;
        let armed_at = Instant::now();

        self.timers.arm(event.key(), timeout, move || {
            inner.enqueue_escalation(&event, &classification, armed_at.elapsed());
        });
    }

    /// Mark an error resolved, disarming its escalation timer
    pub fn resolve(&self, key: &ErrorKey) -> bool {
        let disarmed = self.timers.cancel(key);
        if disarmed {
            debug!("Escalation for {} disarmed", key);
        }
        disarmed
    }

    /// Disarm every pending escalation, returning how many were armed
    pub fn cancel_escalations(&self) -> usize {
        let armed = self.timers.active_count();
        self.timers.cancel_all();
        if armed > 0 {
            info!("Cancelled {} pending escalations", armed);
        }
        armed
    }

    /// Deliver every queued message whose back-off has elapsed
    pub fn process_queue(&self) -> ProcessReport {
        let inner = &self.inner;
        let now = Instant::now();
        let due: Vec<QueuedMessage> = {
            let mut queue = inner.queue.lock().unwrap_or_else(PoisonError::into_inner);
            let (due, waiting): (VecDeque<QueuedMessage>, VecDeque<QueuedMessage>) =
                queue.drain(..).partition(|queued| queued.not_before <= now);
            *queue = waiting;
            due.into()
        };

        let mut report = ProcessReport::default();
        for queued in due {
            let mut message = queued.message;
            message.retry_count += 1;

            match inner.deliver(&message) {
                Ok(()) => {
                    message.status = if message.escalation {
                        NotificationStatus::Escalated
                    } else {
                        NotificationStatus::Sent
                    };
                    message.sent_time = Some(Utc::now());
                    inner.counters.delivered.fetch_add(1, Ordering::Relaxed);
                    inner.record(&message);
                    report.delivered += 1;
                }
                Err(e @ DeliveryError::ChannelUnavailable(_)) => {
                    error!("Notification {} cannot be delivered: {}", message.id, e);
                    inner.fail(&mut message, e.to_string());
                    report.failed += 1;
                }
                Err(e) if message.retry_count >= message.max_retries => {
                    error!(
                        "Notification {} to {} failed after {} attempts: {}",
                        message.id, message.recipient, message.retry_count, e
                    );
                    inner.fail(&mut message, e.to_string());
                    report.failed += 1;
                }
                Err(e) => {
                    let delay = backoff_delay(
                        inner.config.retry_backoff(),
                        message.retry_count.saturating_sub(1),
                    );
                    warn!(
                        "Notification {} to {} failed (attempt {}/{}): {}; retrying in {:?}",
                        message.id,
                        message.recipient,
                        message.retry_count,
                        message.max_retries,
                        e,
                        delay
                    );
                    inner.counters.retried.fetch_add(1, Ordering::Relaxed);
                    inner.push(message, Instant::now() + delay);
                    report.retried += 1;
                }
            }
        }
        report
    }

    pub fn queue_depth(&self) -> usize {
        self.inner
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn active_escalations(&self) -> usize {
        self.timers.active_count()
    }

    pub fn is_escalation_armed(&self, key: &ErrorKey) -> bool {
        self.timers.is_armed(key)
    }

    pub fn stats(&self) -> DispatcherStats {
        let counters = &self.inner.counters;
        DispatcherStats {
            accepted: counters.accepted.load(Ordering::Relaxed),
            rejected: counters.rejected.load(Ordering::Relaxed),
            delivered: counters.delivered.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            retried: counters.retried.load(Ordering::Relaxed),
            escalations_fired: counters.escalations_fired.load(Ordering::Relaxed),
        }
    }

    /// Delivered share of finished deliveries; 1.0 before anything finished
    pub fn success_rate(&self) -> f64 {
        let stats = self.stats();
        let finished = stats.delivered + stats.failed;
        if finished == 0 {
            1.0
        } else {
            stats.delivered as f64 / finished as f64
        }
    }
}

impl DispatcherInner {
    #[allow(clippy::too_many_arguments)]
    fn new_message(
        &self,
        event: &ErrorEvent,
        channel: ChannelKind,
        recipient: String,
        text: String,
        priority: Priority,
        escalation: bool,
        now: Timestamp,
    ) -> NotificationMessage {
        NotificationMessage {
            id: Uuid::new_v4(),
            error_id: event.id,
            category: event.category,
            severity: event.severity,
            channel,
            recipient,
            text,
            priority,
            status: NotificationStatus::Pending,
            sent_time: None,
            retry_count: 0,
            max_retries: self.config.max_retries.max(1),
            escalation,
            failure_reason: None,
            rejected: false,
            created_at: now,
        }
    }

    /// Duplicate check, queue capacity and rate limit, in that order
    fn admit(&self, message: &NotificationMessage, now: Timestamp) -> Result<(), String> {
        let _admission = self.admission.lock().unwrap_or_else(PoisonError::into_inner);

        let key = SuppressionKey {
            channel: message.channel,
            recipient: message.recipient.clone(),
            category: message.category,
            severity: message.severity,
        };
        if self.suppressor.is_duplicate_at(&key, now) {
            return Err(format!(
                "duplicate of a notification accepted within the last {}s",
                self.config.suppression_window_seconds
            ));
        }

        let depth = self.queue.lock().unwrap_or_else(PoisonError::into_inner).len();
        if depth >= self.config.max_queue_size {
            return Err(format!(
                "notification queue full ({} messages)",
                self.config.max_queue_size
            ));
        }

        self.rate_limiter
            .try_acquire_at(message.channel, now)
            .map_err(|e| format!("{} channel: {}", message.channel, e))?;

        self.suppressor.record_at(key, now);
        Ok(())
    }

    fn push(&self, message: NotificationMessage, not_before: Instant) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(QueuedMessage {
                message,
                not_before,
            });
    }

    fn deliver(&self, message: &NotificationMessage) -> Result<(), DeliveryError> {
        let channel = self
            .channels
            .get(&message.channel)
            .map(Arc::clone)
            .ok_or(DeliveryError::ChannelUnavailable(message.channel))?;
        let recipient = message.recipient.clone();
        let text = message.text.clone();

        match run_with_timeout(self.config.deliver_timeout(), move || {
            channel.deliver(&recipient, &text)
        }) {
            Ok(result) => result,
            Err(TimeoutError::Elapsed) => Err(DeliveryError::Timeout),
            Err(TimeoutError::Panicked) => {
                Err(DeliveryError::Failed("channel panicked during delivery".to_string()))
            }
        }
    }

    fn reject(&self, message: &mut NotificationMessage, reason: String) {
        message.status = NotificationStatus::Failed;
        message.failure_reason = Some(reason);
        message.rejected = true;
        self.counters.rejected.fetch_add(1, Ordering::Relaxed);
        self.record(message);
    }

    fn fail(&self, message: &mut NotificationMessage, reason: String) {
        message.status = NotificationStatus::Failed;
        message.failure_reason = Some(reason);
        self.counters.failed.fetch_add(1, Ordering::Relaxed);
        self.record(message);
    }

    fn record(&self, message: &NotificationMessage) {
        if let Some(ref analytics) = self.analytics {
            analytics.record_notification(message);
        }
    }

    /// Queue a P0 escalation to every escalation contact on all of their channels
    ///
    /// Escalations bypass suppression, rate limits and the queue bound.
    fn enqueue_escalation(
        &self,
        event: &ErrorEvent,
        classification: &ClassificationResult,
        unresolved_for: Duration,
    ) {
        self.counters.escalations_fired.fetch_add(1, Ordering::Relaxed);

        let roles = &self.config.escalation_contacts;
        let mut channels: Vec<ChannelKind> = roles
            .iter()
            .flat_map(|role| self.directory.channels_for(role))
            .collect();
        channels.sort();
        channels.dedup();

        let recipients = self.directory.resolve(roles, &channels);
        if recipients.is_empty() {
            error!(
                "Escalation for {} has no reachable contacts among [{}]",
                event.key(),
                roles.join(", ")
            );
            return;
        }

        let text = render_escalation(event, classification, unresolved_for);
        let now = Utc::now();
        for (channel, recipient) in recipients {
            let message =
                self.new_message(event, channel, recipient, text.clone(), Priority::P0, true, now);
            self.record(&message);
            self.push(message, Instant::now());
        }
        warn!(
            "Escalated unresolved {} error {} after {:?}",
            event.category, event.id, unresolved_for
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChannelLimit, DirectoryConfig};
    use crate::events::{ErrorCategory, Severity};
    use crate::notifications::channel::{LogChannel, MockChannel};
    use chrono::Duration as ChronoDuration;
    use std::collections::{BTreeMap, HashMap};
    use std::thread;

    fn classification(timeout: Duration, action: RecoveryAction) -> ClassificationResult {
        ClassificationResult {
            priority: Priority::P1,
            action,
            auto_recovery_attempts: 2,
            escalation_timeout: timeout,
            notification_channels: vec![ChannelKind::Chat],
            business_impact: "Order flow degraded".to_string(),
            estimated_recovery_time: Duration::from_secs(900),
            recovery_strategy: "api_failure_recovery".to_string(),
            escalation_contacts: vec!["admin".to_string()],
            applied_rules: vec!["severity:high".to_string()],
        }
    }

    fn event(category: ErrorCategory) -> ErrorEvent {
        ErrorEvent::new(category, Severity::High, "Exchange unreachable", "api_detector")
    }

    fn log_channels() -> ChannelTable {
        let mut channels: ChannelTable = HashMap::new();
        for kind in [ChannelKind::Chat, ChannelKind::Email] {
            channels.insert(kind, Arc::new(LogChannel::new(kind)));
        }
        channels
    }

    fn config() -> NotificationsConfig {
        NotificationsConfig {
            retry_backoff_ms: 0,
            ..NotificationsConfig::default()
        }
    }

    fn dispatcher(config: NotificationsConfig, channels: ChannelTable) -> NotificationDispatcher {
        NotificationDispatcher::new(
            config,
            RecipientDirectory::from_config(&DirectoryConfig::default()),
            channels,
        )
    }

    fn drain(dispatcher: &NotificationDispatcher) {
        for _ in 0..20 {
            if dispatcher.queue_depth() == 0 {
                return;
            }
            dispatcher.process_queue();
        }
    }

    const LONG: Duration = Duration::from_secs(3600);

    #[test]
    fn test_rate_limit_rejects_n_plus_one() {
        let mut config = config();
        config.limits.insert(
            "chat".to_string(),
            ChannelLimit {
                per_hour: 3,
                per_day: 100,
            },
        );
        let dispatcher = dispatcher(config, log_channels());
        let cls = classification(LONG, RecoveryAction::Monitor);
        let now = Utc::now();

        for category in &ErrorCategory::ALL[..3] {
            let report = dispatcher.send_notification_at(&event(*category), &cls, None, now);
            assert_eq!(report.accepted, 1);
        }

        let report =
            dispatcher.send_notification_at(&event(ErrorCategory::LogicError), &cls, None, now);
        assert_eq!(report.accepted, 0);
        assert_eq!(report.rejected, 1);
        let rejected = &report.messages[0];
        assert_eq!(rejected.status, NotificationStatus::Failed);
        assert!(rejected
            .failure_reason
            .as_deref()
            .unwrap()
            .contains("hourly rate limit of 3"));
        assert_eq!(dispatcher.queue_depth(), 3);
    }

    #[test]
    fn test_duplicate_suppressed_within_window() {
        let dispatcher = dispatcher(config(), log_channels());
        let cls = classification(LONG, RecoveryAction::Monitor);
        let now = Utc::now();

        let first = dispatcher.send_notification_at(&event(ErrorCategory::ApiFailure), &cls, None, now);
        assert_eq!(first.accepted, 1);

        let second = dispatcher.send_notification_at(
            &event(ErrorCategory::ApiFailure),
            &cls,
            None,
            now + ChronoDuration::minutes(2),
        );
        assert_eq!(second.accepted, 0);
        assert!(second.messages[0]
            .failure_reason
            .as_deref()
            .unwrap()
            .contains("duplicate"));

        let later = dispatcher.send_notification_at(
            &event(ErrorCategory::ApiFailure),
            &cls,
            None,
            now + ChronoDuration::minutes(6),
        );
        assert_eq!(later.accepted, 1);
    }

    #[test]
    fn test_suppressed_duplicate_is_not_a_delivery_failure() {
        let analytics = Arc::new(ErrorAnalytics::in_memory());
        let dispatcher =
            dispatcher(config(), log_channels()).with_analytics(Arc::clone(&analytics));
        let cls = classification(LONG, RecoveryAction::Monitor);
        let e = event(ErrorCategory::ApiFailure);
        let now = Utc::now();

        assert_eq!(dispatcher.send_notification_at(&e, &cls, None, now).accepted, 1);
        let duplicate = dispatcher.send_notification_at(&e, &cls, None, now);
        assert_eq!(duplicate.accepted, 0);
        assert!(duplicate.messages[0].rejected);
        drain(&dispatcher);

        let stats = dispatcher.stats();
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.failed, 0);
        assert_eq!(dispatcher.success_rate(), 1.0);

        let health = analytics
            .health_inputs(Utc::now() + ChronoDuration::minutes(1), ChronoDuration::hours(1))
            .unwrap();
        assert_eq!(health.notification_failure_rate, 0.0);
    }

    #[test]
    fn test_no_recipients_records_failure() {
        let dispatcher = dispatcher(config(), log_channels());
        let mut cls = classification(LONG, RecoveryAction::Monitor);
        cls.escalation_contacts = vec!["nobody".to_string()];

        let report = dispatcher.send_notification(&event(ErrorCategory::ApiFailure), &cls, None);
        assert_eq!(report.accepted, 0);
        assert_eq!(report.messages.len(), 1);
        assert_eq!(report.messages[0].status, NotificationStatus::Failed);
        assert!(report.messages[0]
            .failure_reason
            .as_deref()
            .unwrap()
            .contains("nobody"));
    }

    #[test]
    fn test_queue_full_rejects() {
        let config = NotificationsConfig {
            max_queue_size: 1,
            ..config()
        };
        let dispatcher = dispatcher(config, log_channels());
        let cls = classification(LONG, RecoveryAction::Monitor);

        dispatcher.send_notification(&event(ErrorCategory::ApiFailure), &cls, None);
        let report = dispatcher.send_notification(&event(ErrorCategory::LogicError), &cls, None);
        assert_eq!(report.rejected, 1);
        assert!(report.messages[0]
            .failure_reason
            .as_deref()
            .unwrap()
            .contains("queue full"));
    }

    #[test]
    fn test_delivery_marks_sent() {
        let analytics = Arc::new(ErrorAnalytics::in_memory());
        let dispatcher =
            dispatcher(config(), log_channels()).with_analytics(Arc::clone(&analytics));
        let cls = classification(LONG, RecoveryAction::Monitor);
        let e = event(ErrorCategory::ApiFailure);

        dispatcher.send_notification(&e, &cls, None);
        let report = dispatcher.process_queue();
        assert_eq!(report.delivered, 1);
        assert_eq!(dispatcher.queue_depth(), 0);
        assert_eq!(dispatcher.success_rate(), 1.0);

        let snapshot = analytics
            .snapshot(e.timestamp - ChronoDuration::minutes(1), Utc::now() + ChronoDuration::minutes(1))
            .unwrap();
        assert_eq!(snapshot.notifications.len(), 1);
        assert_eq!(snapshot.notifications[0].status, NotificationStatus::Sent);
        assert!(snapshot.notifications[0].sent_time.is_some());
    }

    #[test]
    fn test_retry_exhaustion_after_max_retries() {
        let mut channel = MockChannel::new();
        channel
            .expect_deliver()
            .times(3)
            .returning(|_, _| Err(DeliveryError::Failed("connection reset".to_string())));
        let mut channels: ChannelTable = HashMap::new();
        channels.insert(ChannelKind::Chat, Arc::new(channel));

        let analytics = Arc::new(ErrorAnalytics::in_memory());
        let dispatcher = dispatcher(config(), channels).with_analytics(Arc::clone(&analytics));
        let e = event(ErrorCategory::ApiFailure);
        dispatcher.send_notification(&e, &classification(LONG, RecoveryAction::Monitor), None);

        drain(&dispatcher);

        let stats = dispatcher.stats();
        assert_eq!(stats.retried, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.delivered, 0);

        let snapshot = analytics
            .snapshot(e.timestamp - ChronoDuration::minutes(1), Utc::now() + ChronoDuration::minutes(1))
            .unwrap();
        let message = &snapshot.notifications[0];
        assert_eq!(message.status, NotificationStatus::Failed);
        assert_eq!(message.retry_count, 3);
        assert!(message.failure_reason.as_deref().unwrap().contains("connection reset"));
    }

    #[test]
    fn test_missing_channel_fails_without_retry() {
        let dispatcher = dispatcher(config(), HashMap::new());
        dispatcher.send_notification(
            &event(ErrorCategory::ApiFailure),
            &classification(LONG, RecoveryAction::Monitor),
            None,
        );

        let report = dispatcher.process_queue();
        assert_eq!(report.failed, 1);
        assert_eq!(report.retried, 0);
        assert_eq!(dispatcher.queue_depth(), 0);
    }

    #[test]
    fn test_escalation_fires_once_when_unresolved() {
        let dispatcher = dispatcher(config(), log_channels());
        let e = event(ErrorCategory::ApiFailure);
        let cls = classification(Duration::from_millis(40), RecoveryAction::AutoRecover);

        let report = dispatcher.send_notification(&e, &cls, None);
        assert!(report.escalation_armed);
        dispatcher.process_queue();

        thread::sleep(Duration::from_millis(300));
        assert_eq!(dispatcher.stats().escalations_fired, 1);
        assert!(!dispatcher.is_escalation_armed(&e.key()));

        // admin and senior_dev, each on chat and email
        assert_eq!(dispatcher.queue_depth(), 4);
        let processed = dispatcher.process_queue();
        assert_eq!(processed.delivered, 4);
    }

    #[test]
    fn test_resolve_prevents_escalation() {
        let dispatcher = dispatcher(config(), log_channels());
        let e = event(ErrorCategory::ApiFailure);
        let cls = classification(Duration::from_millis(60), RecoveryAction::AutoRecover);

        dispatcher.send_notification(&e, &cls, None);
        assert!(dispatcher.resolve(&e.key()));

        thread::sleep(Duration::from_millis(250));
        assert_eq!(dispatcher.stats().escalations_fired, 0);
        assert_eq!(dispatcher.active_escalations(), 0);
    }

    #[test]
    fn test_ignore_does_not_arm_escalation() {
        let dispatcher = dispatcher(config(), log_channels());
        let e = event(ErrorCategory::ApiFailure);
        let report =
            dispatcher.send_notification(&e, &classification(LONG, RecoveryAction::Ignore), None);
        assert!(!report.escalation_armed);
        assert!(!dispatcher.is_escalation_armed(&e.key()));
    }

    #[test]
    fn test_escalation_bypasses_rate_limits() {
        let mut config = config();
        let mut limits = BTreeMap::new();
        for name in ["chat", "email"] {
            limits.insert(
                name.to_string(),
                ChannelLimit {
                    per_hour: 1,
                    per_day: 1,
                },
            );
        }
        config.limits = limits;
        let dispatcher = dispatcher(config, log_channels());
        let cls = classification(Duration::from_millis(30), RecoveryAction::Escalate);

        dispatcher.send_notification(&event(ErrorCategory::ApiFailure), &cls, None);
        thread::sleep(Duration::from_millis(250));

        // one regular message plus four escalations despite the cap of one
        assert_eq!(dispatcher.queue_depth(), 5);
    }
}
