//! Rule tables used by the classifier
//!
//! Base rules map a severity to a default response plan. Pattern rules match a
//! regular expression against the event's descriptive text (see
//! `Classifier::classify`) and can override that plan.

use crate::events::{ChannelKind, ErrorCategory, Priority, RecoveryAction, Severity};
use log::warn;
use regex::Regex;
use std::time::Duration;

const MINUTE: u64 = 60;

/// Default response plan for one severity level
#[derive(Debug, Clone, PartialEq)]
pub struct BaseRule {
    pub severity: Severity,
    pub priority: Priority,
    pub action: RecoveryAction,
    pub auto_recovery_attempts: u32,
    pub escalation_timeout: Duration,
    pub channels: Vec<ChannelKind>,
    pub contacts: Vec<String>,
    pub business_impact: String,
    pub estimated_recovery_time: Duration,
}

impl BaseRule {
    /// Name recorded in the audit trail
    pub fn name(&self) -> String {
        format!("severity:{}", self.severity)
    }

    /// Default strategy name for a category when no pattern rule picks one
    pub fn default_strategy(category: ErrorCategory) -> String {
        format!("{}_recovery", category)
    }
}

/// Default response plan for `severity`
pub fn default_base_rule(severity: Severity) -> BaseRule {
    match severity {
        Severity::Critical => BaseRule {
            severity,
            priority: Priority::P0,
            action: RecoveryAction::AutoRecover,
            auto_recovery_attempts: 3,
            escalation_timeout: Duration::from_secs(5 * MINUTE),
            channels: vec![ChannelKind::Chat, ChannelKind::Email, ChannelKind::Sms],
            contacts: roles(&["admin", "dev_team"]),
            business_impact: "Service outage or trading halted".to_string(),
            estimated_recovery_time: Duration::from_secs(5 * MINUTE),
        },
        Severity::High => BaseRule {
            severity,
            priority: Priority::P1,
            action: RecoveryAction::AutoRecover,
            auto_recovery_attempts: 2,
            escalation_timeout: Duration::from_secs(15 * MINUTE),
            channels: vec![ChannelKind::Chat, ChannelKind::Email],
            contacts: roles(&["admin", "dev_team"]),
            business_impact: "Major functionality degraded".to_string(),
            estimated_recovery_time: Duration::from_secs(15 * MINUTE),
        },
        Severity::Medium => BaseRule {
            severity,
            priority: Priority::P2,
            action: RecoveryAction::Monitor,
            auto_recovery_attempts: 1,
            escalation_timeout: Duration::from_secs(60 * MINUTE),
            channels: vec![ChannelKind::Chat],
            contacts: roles(&["dev_team"]),
            business_impact: "Partial degradation, workaround available".to_string(),
            estimated_recovery_time: Duration::from_secs(30 * MINUTE),
        },
        Severity::Low => BaseRule {
            severity,
            priority: Priority::P3,
            action: RecoveryAction::Monitor,
            auto_recovery_attempts: 0,
            escalation_timeout: Duration::from_secs(240 * MINUTE),
            channels: vec![ChannelKind::Email],
            contacts: roles(&["dev_team"]),
            business_impact: "Minor issue, no user impact".to_string(),
            estimated_recovery_time: Duration::from_secs(120 * MINUTE),
        },
    }
}

/// The default severity table, most severe first
pub fn default_base_rules() -> Vec<BaseRule> {
    Severity::ALL.into_iter().map(default_base_rule).collect()
}

/// Exactly one base rule per severity
#[derive(Debug, Clone, PartialEq)]
pub struct BaseRuleTable {
    critical: BaseRule,
    high: BaseRule,
    medium: BaseRule,
    low: BaseRule,
}

impl Default for BaseRuleTable {
    fn default() -> Self {
        Self {
            critical: default_base_rule(Severity::Critical),
            high: default_base_rule(Severity::High),
            medium: default_base_rule(Severity::Medium),
            low: default_base_rule(Severity::Low),
        }
    }
}

impl BaseRuleTable {
    pub fn get(&self, severity: Severity) -> &BaseRule {
        match severity {
            Severity::Critical => &self.critical,
            Severity::High => &self.high,
            Severity::Medium => &self.medium,
            Severity::Low => &self.low,
        }
    }

    /// Replace the rule for the severity `rule` is declared for
    pub fn insert(&mut self, rule: BaseRule) {
        let slot = match rule.severity {
            Severity::Critical => &mut self.critical,
            Severity::High => &mut self.high,
            Severity::Medium => &mut self.medium,
            Severity::Low => &mut self.low,
        };
        *slot = rule;
    }
}

/// Regex-matched override of the base plan
#[derive(Debug, Clone)]
pub struct PatternRule {
    pub name: String,
    pattern: Regex,
    pub priority: Priority,
    pub action: RecoveryAction,
    pub recovery_strategy: String,
    pub business_impact: String,
    /// Added to the base channels
    pub channels: Vec<ChannelKind>,
    /// Added to the base contacts
    pub contacts: Vec<String>,
    /// Applied to the base escalation timeout; values above 1.0 never lengthen it
    /// and values that are not finite and positive are ignored
    pub timeout_multiplier: f64,
    pub estimated_recovery_time: Option<Duration>,
}

impl PatternRule {
    /// Create a rule matching `pattern`
    ///
    /// # Errors
    ///
    /// Returns the regex error when `pattern` does not compile.
    pub fn new(
        name: impl Into<String>,
        pattern: &str,
        priority: Priority,
        action: RecoveryAction,
        recovery_strategy: impl Into<String>,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            name: name.into(),
            pattern: Regex::new(pattern)?,
            priority,
            action,
            recovery_strategy: recovery_strategy.into(),
            business_impact: String::new(),
            channels: Vec::new(),
            contacts: Vec::new(),
            timeout_multiplier: 1.0,
            estimated_recovery_time: None,
        })
    }

    pub fn with_impact(mut self, impact: impl Into<String>) -> Self {
        self.business_impact = impact.into();
        self
    }

    pub fn with_channels(mut self, channels: &[ChannelKind]) -> Self {
        self.channels = channels.to_vec();
        self
    }

    pub fn with_contacts(mut self, contacts: &[&str]) -> Self {
        self.contacts = roles(contacts);
        self
    }

    pub fn with_timeout_multiplier(mut self, multiplier: f64) -> Self {
        self.timeout_multiplier = multiplier;
        self
    }

    pub fn with_estimated_recovery(mut self, minutes: u64) -> Self {
        self.estimated_recovery_time = Some(Duration::from_secs(minutes * MINUTE));
        self
    }

    pub fn matches(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }
}

/// The default pattern table, in evaluation order
///
/// Rules whose expression fails to compile are logged and left out.
pub fn default_pattern_rules() -> Vec<PatternRule> {
    let rules = [
        PatternRule::new(
            "auth_failure",
            r"(?i)(unauthori[sz]ed|forbidden|authentication failed|invalid (api )?key|signature mismatch|\b40[13]\b)",
            Priority::P0,
            RecoveryAction::AutoRecover,
            "api_key_failover",
        )
        .map(|r| {
            r.with_impact("Exchange access lost, orders cannot be placed")
                .with_channels(&[ChannelKind::Sms])
                .with_contacts(&["admin"])
                .with_timeout_multiplier(0.5)
                .with_estimated_recovery(5)
        }),
        PatternRule::new(
            "rate_limit",
            r"(?i)(rate.?limit|too many requests|\b429\b|throttl)",
            Priority::P2,
            RecoveryAction::AutoRecover,
            "request_backoff",
        )
        .map(|r| {
            r.with_impact("Requests throttled, reduced throughput")
                .with_estimated_recovery(2)
        }),
        PatternRule::new(
            "server_error",
            r"(?i)(internal server error|bad gateway|service unavailable|gateway timeout|\b50[0-4]\b)",
            Priority::P1,
            RecoveryAction::AutoRecover,
            "reconnect",
        )
        .map(|r| {
            r.with_impact("Upstream service failing")
                .with_timeout_multiplier(0.75)
                .with_estimated_recovery(10)
        }),
        PatternRule::new(
            "data_corruption",
            r"(?i)(corrupt|checksum|malformed|integrity violation)",
            Priority::P0,
            RecoveryAction::AutoRecover,
            "restore_from_backup",
        )
        .map(|r| {
            r.with_impact("Decisions may be based on invalid data")
                .with_channels(&[ChannelKind::Email])
                .with_contacts(&["admin", "dev_team"])
                .with_timeout_multiplier(0.5)
                .with_estimated_recovery(20)
        }),
        PatternRule::new(
            "memory_exhaustion",
            r#"(?i)(out of memory|\boom\b|memory exhausted|memory usage|"resource_type":"memory")"#,
            Priority::P0,
            RecoveryAction::AutoRecover,
            "free_memory",
        )
        .map(|r| {
            r.with_impact("Process at risk of being killed")
                .with_contacts(&["system_admin"])
                .with_timeout_multiplier(0.5)
                .with_estimated_recovery(5)
        }),
        PatternRule::new(
            "calculation_error",
            r"(?i)(calculation|\bnan\b|overflow|divi(de|sion) by zero)",
            Priority::P1,
            RecoveryAction::AutoRecover,
            "disable_component",
        )
        .map(|r| {
            r.with_impact("Incorrect position sizing or pricing")
                .with_contacts(&["dev_team"])
                .with_estimated_recovery(30)
        }),
        PatternRule::new(
            "strategy_logic_error",
            r"(?i)(strategy|invalid signal|logic error)",
            Priority::P1,
            RecoveryAction::ManualIntervention,
            "enable_safe_mode",
        )
        .map(|r| {
            r.with_impact("Trading strategy behaving unexpectedly")
                .with_contacts(&["dev_team", "senior_dev"])
                .with_estimated_recovery(60)
        }),
        PatternRule::new(
            "timeout",
            r"(?i)(timed? ?out|deadline exceeded)",
            Priority::P2,
            RecoveryAction::AutoRecover,
            "reconnect",
        )
        .map(|r| {
            r.with_impact("Slow responses from dependency")
                .with_estimated_recovery(5)
        }),
    ];

    rules
        .into_iter()
        .filter_map(|rule| match rule {
            Ok(rule) => Some(rule),
            Err(e) => {
                warn!("Skipping pattern rule: {}", e);
                None
            }
        })
        .collect()
}

fn roles(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}
