use crate::classifier::history::{ClassificationHistory, HistoryEntry};
use crate::classifier::rules::{
    default_base_rules, default_pattern_rules, BaseRule, BaseRuleTable, PatternRule,
};
use crate::config::{ClassifierConfig, MAX_TIMEOUT_FACTOR};
use crate::events::{ChannelKind, ClassificationResult, ErrorEvent, RecoveryAction, Severity};
use chrono::{Datelike, FixedOffset, Offset, Timelike, Utc, Weekday};
use log::{debug, warn};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Contact added when an error keeps recurring
const RECURRENCE_CONTACT: &str = "senior_dev";

/// Detail keys whose numeric value is an identifier rather than a measurement
const MATCHED_NUMERIC_DETAILS: [&str; 1] = ["status_code"];

/// Maps error events to response plans
///
/// Classification runs four stages in order: the severity base rule, regex
/// pattern rules, business-time rules and recurrence rules. The result depends only
/// on the event (including its timestamp) and the history it is classified
/// against, so identical inputs always give identical plans.
pub struct Classifier {
    config: ClassifierConfig,
    base_rules: BaseRuleTable,
    pattern_rules: Vec<PatternRule>,
    history: Mutex<ClassificationHistory>,
}

impl Classifier {
    /// Create a classifier with the default rule tables
    pub fn new(config: ClassifierConfig) -> Self {
        Self::with_rules(config, default_base_rules(), default_pattern_rules())
    }

    /// Create a classifier with custom rule tables
    ///
    /// Severities missing from `base_rules` keep their default rule.
    pub fn with_rules(
        config: ClassifierConfig,
        base_rules: Vec<BaseRule>,
        pattern_rules: Vec<PatternRule>,
    ) -> Self {
        let mut table = BaseRuleTable::default();
        for rule in base_rules {
            table.insert(rule);
        }

        let history = ClassificationHistory::new(config.history_capacity);
        Self {
            config,
            base_rules: table,
            pattern_rules,
            history: Mutex::new(history),
        }
    }

    /// Classify an event against the given history without recording it
    ///
    /// Pattern rules see the event message with every number masked, followed by
    /// the string-valued details and the status code. Measurements a detector
    /// writes into its message never decide which pattern applies.
    pub fn classify(
        &self,
        event: &ErrorEvent,
        history: &ClassificationHistory,
    ) -> ClassificationResult {
        self.classify_with_pattern(event, history).0
    }

    /// Classify an event against the internal history, then record it there
    pub fn classify_and_record(&self, event: &ErrorEvent) -> ClassificationResult {
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        let (result, pattern) = self.classify_with_pattern(event, &history);
        history.record(
            event.category,
            HistoryEntry {
                timestamp: event.timestamp,
                severity: event.severity,
                pattern,
            },
        );
        result
    }

    /// The plan given by the severity base rule alone
    pub fn base_classification(&self, event: &ErrorEvent) -> ClassificationResult {
        let base = self.base_rules.get(event.severity);
        ClassificationResult {
            priority: base.priority,
            action: base.action,
            auto_recovery_attempts: base.auto_recovery_attempts,
            escalation_timeout: base.escalation_timeout,
            notification_channels: base.channels.clone(),
            business_impact: base.business_impact.clone(),
            estimated_recovery_time: base.estimated_recovery_time,
            recovery_strategy: BaseRule::default_strategy(event.category),
            escalation_contacts: base.contacts.clone(),
            applied_rules: vec![base.name()],
        }
    }

    /// Copy of the internal history
    pub fn history(&self) -> ClassificationHistory {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn classify_with_pattern(
        &self,
        event: &ErrorEvent,
        history: &ClassificationHistory,
    ) -> (ClassificationResult, Option<String>) {
        let base = self.base_rules.get(event.severity);
        let mut plan = self.base_classification(event);
        // Smallest multiplier seen; only ever shortens the timeout
        let mut restrictive_multiplier: f64 = 1.0;
        let mut weekend_multiplier: f64 = 1.0;

        // Patterns
        let text = match_text(event);
        let matched: Vec<&PatternRule> = self
            .pattern_rules
            .iter()
            .filter(|rule| rule.matches(&text))
            .collect();

        let primary = matched.iter().min_by_key(|rule| rule.priority).copied();
        if let Some(primary) = primary {
            plan.priority = primary.priority;
            plan.action = primary.action;
            plan.recovery_strategy = primary.recovery_strategy.clone();
            if !primary.business_impact.is_empty() {
                plan.business_impact = primary.business_impact.clone();
            }
            if let Some(estimate) = primary.estimated_recovery_time {
                plan.estimated_recovery_time = estimate;
            }
            for rule in &matched {
                for &channel in &rule.channels {
                    add_channel(&mut plan.notification_channels, channel);
                }
                for contact in &rule.contacts {
                    add_contact(&mut plan.escalation_contacts, contact);
                }
                if usable_multiplier(rule.timeout_multiplier) {
                    restrictive_multiplier = restrictive_multiplier.min(rule.timeout_multiplier);
                } else {
                    warn!(
                        "Ignoring timeout multiplier {} of pattern rule {}",
                        rule.timeout_multiplier, rule.name
                    );
                }
                plan.applied_rules.push(format!("pattern:{}", rule.name));
            }
        } else {
            debug!(
                "No pattern rule matched event {}, base rule stands",
                event.id
            );
        }

        // Business time
        let offset = FixedOffset::east_opt(self.config.utc_offset_hours * 3600)
            .unwrap_or_else(|| Utc.fix());
        let local = event.timestamp.with_timezone(&offset);
        if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
            if usable_multiplier(self.config.weekend_multiplier) {
                weekend_multiplier = self.config.weekend_multiplier;
            }
            plan.applied_rules.push("business:weekend".to_string());
        } else if (self.config.active_hours_start..self.config.active_hours_end)
            .contains(&local.hour())
        {
            if usable_multiplier(self.config.active_hours_multiplier) {
                restrictive_multiplier =
                    restrictive_multiplier.min(self.config.active_hours_multiplier);
            }
            add_channel(&mut plan.notification_channels, ChannelKind::Sms);
            plan.applied_rules.push("business:active_hours".to_string());
        }

        // Recurrence, counting this event
        let pattern_name = primary.map(|rule| rule.name.clone());
        let since = event.timestamp - chrono::Duration::hours(1);
        let category_count =
            history.category_count_between(event.category, since, event.timestamp) + 1;
        let pattern_count =
            history.pattern_count(event.category, event.severity, pattern_name.as_deref()) + 1;

        let mut recurring = false;
        if category_count > self.config.category_recurrence_threshold {
            plan.applied_rules.push("history:category_recurrence".to_string());
            recurring = true;
        }
        if pattern_count > self.config.pattern_lifetime_threshold {
            plan.applied_rules.push("history:pattern_recurrence".to_string());
            recurring = true;
        }
        if recurring {
            plan.priority = plan.priority.raised();
            plan.action = RecoveryAction::Escalate;
            add_contact(&mut plan.escalation_contacts, RECURRENCE_CONTACT);
        }

        plan.escalation_timeout = scaled_timeout(
            base.escalation_timeout,
            restrictive_multiplier.min(1.0) * weekend_multiplier,
        );

        debug!(
            "Classified {} {} event {} as {} {:?} via [{}]",
            event.severity,
            event.category,
            event.id,
            plan.priority,
            plan.action,
            plan.applied_rules.join(", ")
        );

        (plan, pattern_name)
    }

    /// The base rule currently used for a severity
    pub fn base_rule(&self, severity: Severity) -> &BaseRule {
        self.base_rules.get(severity)
    }
}

fn usable_multiplier(multiplier: f64) -> bool {
    multiplier.is_finite() && multiplier > 0.0
}

/// `base` scaled by `factor`, capped at `MAX_TIMEOUT_FACTOR`
///
/// Falls back to `base` when the factor is unusable or the result does not fit
/// a `Duration`.
fn scaled_timeout(base: Duration, factor: f64) -> Duration {
    if !usable_multiplier(factor) {
        return base;
    }
    Duration::try_from_secs_f64(base.as_secs_f64() * factor.min(MAX_TIMEOUT_FACTOR))
        .unwrap_or(base)
}

/// Text the pattern rules run against
fn match_text(event: &ErrorEvent) -> String {
    let matched: serde_json::Map<String, serde_json::Value> = event
        .details
        .iter()
        .filter(|(key, value)| {
            value.is_string() || MATCHED_NUMERIC_DETAILS.contains(&key.as_str())
        })
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    let details = serde_json::to_string(&matched).unwrap_or_default();
    format!("{} {}", mask_numbers(&event.message), details)
}

/// Replace every run of digits (with embedded dots) by `#`
fn mask_numbers(text: &str) -> String {
    let mut masked = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c.is_ascii_digit() {
            while chars
                .next_if(|next| next.is_ascii_digit() || *next == '.')
                .is_some()
            {}
            masked.push('#');
        } else {
            masked.push(c);
        }
    }
    masked
}

fn add_channel(channels: &mut Vec<ChannelKind>, channel: ChannelKind) {
    if !channels.contains(&channel) {
        channels.push(channel);
    }
}

fn add_contact(contacts: &mut Vec<String>, contact: &str) {
    if !contacts.iter().any(|c| c == contact) {
        contacts.push(contact.to_string());
    }
}
