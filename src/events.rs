//! Core record types flowing through the error-management pipeline
//!
//! This module defines the error events produced by detectors, the classification
//! attached to each event, the recovery attempts and notification messages derived
//! from it, and the system metrics sampled alongside.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Timestamp type for consistent time handling across the application
pub type Timestamp = DateTime<Utc>;

/// Structured, string-keyed details attached to events and recovery results
pub type Details = BTreeMap<String, serde_json::Value>;

/// Category of a detected error
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// External API calls failing or misbehaving
    ApiFailure,
    /// Data failing validation or showing signs of corruption
    DataIntegrity,
    /// CPU, memory or disk exhaustion
    ResourceShortage,
    /// Application logic producing invalid results
    LogicError,
    /// Latency or throughput below expectations
    PerformanceDegradation,
}

impl ErrorCategory {
    /// Every category, in declaration order
    pub const ALL: [ErrorCategory; 5] = [
        ErrorCategory::ApiFailure,
        ErrorCategory::DataIntegrity,
        ErrorCategory::ResourceShortage,
        ErrorCategory::LogicError,
        ErrorCategory::PerformanceDegradation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::ApiFailure => "api_failure",
            ErrorCategory::DataIntegrity => "data_integrity",
            ErrorCategory::ResourceShortage => "resource_shortage",
            ErrorCategory::LogicError => "logic_error",
            ErrorCategory::PerformanceDegradation => "performance_degradation",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of a detected error, ordered from least to most severe
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response priority; `P0` is the most urgent
///
/// The derived ordering follows the ordinal, so `P0 < P4` and "most severe wins"
/// is `min`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Priority {
    P0,
    P1,
    P2,
    P3,
    P4,
}

impl Priority {
    /// The next more urgent priority, saturating at `P0`
    pub fn raised(self) -> Priority {
        match self {
            Priority::P0 | Priority::P1 => Priority::P0,
            Priority::P2 => Priority::P1,
            Priority::P3 => Priority::P2,
            Priority::P4 => Priority::P3,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// What the pipeline should do about a classified error
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    /// Run the category's recovery strategy
    AutoRecover,
    /// Alert humans, no automated remediation
    ManualIntervention,
    /// Alert senior contacts immediately
    Escalate,
    /// Record and notify, no remediation
    Monitor,
    /// Record only
    Ignore,
}

/// Notification channel kinds
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// Instant messaging
    Chat,
    Email,
    Sms,
    Webhook,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Chat => "chat",
            ChannelKind::Email => "email",
            ChannelKind::Sms => "sms",
            ChannelKind::Webhook => "webhook",
        }
    }
}

impl std::str::FromStr for ChannelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "chat" => Ok(ChannelKind::Chat),
            "email" => Ok(ChannelKind::Email),
            "sms" => Ok(ChannelKind::Sms),
            "webhook" => Ok(ChannelKind::Webhook),
            other => Err(format!("unknown channel '{}'", other)),
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single detected abnormal condition
///
/// Events are immutable once built; the builder-style helpers consume and return
/// the event so they can only be used while it is still owned by its creator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorEvent {
    /// Unique identifier
    pub id: Uuid,
    /// When the condition was detected
    pub timestamp: Timestamp,
    pub category: ErrorCategory,
    pub severity: Severity,
    /// Human-readable description
    pub message: String,
    /// Structured context (resource type, component, rates, ...)
    pub details: Details,
    /// Name of the detector or hook that produced the event
    pub source: String,
}

impl ErrorEvent {
    /// Create a new event stamped with the current time
    pub fn new(
        category: ErrorCategory,
        severity: Severity,
        message: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            category,
            severity,
            message: message.into(),
            details: Details::new(),
            source: source.into(),
        }
    }

    /// Attach a detail value
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Override the detection timestamp
    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Key used for recovery mutual exclusion and escalation timers
    pub fn key(&self) -> ErrorKey {
        ErrorKey {
            category: self.category,
            error_id: self.id,
        }
    }

    /// Read a string detail, if present
    pub fn detail_str(&self, key: &str) -> Option<&str> {
        self.details.get(key).and_then(|v| v.as_str())
    }
}

/// Identity of an error for mutual exclusion and escalation: (category, error id)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ErrorKey {
    pub category: ErrorCategory,
    pub error_id: Uuid,
}

impl fmt::Display for ErrorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.category, self.error_id)
    }
}

/// Response plan derived for a single error event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassificationResult {
    pub priority: Priority,
    pub action: RecoveryAction,
    /// Maximum recovery attempts for the category within the budget window
    pub auto_recovery_attempts: u32,
    /// How long the error may stay unresolved before escalation
    pub escalation_timeout: Duration,
    pub notification_channels: Vec<ChannelKind>,
    pub business_impact: String,
    pub estimated_recovery_time: Duration,
    pub recovery_strategy: String,
    /// Directory role names to notify
    pub escalation_contacts: Vec<String>,
    /// Names of the rules that shaped this result, in application order
    pub applied_rules: Vec<String>,
}

/// Status of a recovery attempt
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStatus {
    Pending,
    InProgress,
    Success,
    Failed,
    Timeout,
    Skipped,
}

impl RecoveryStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RecoveryStatus::Success
                | RecoveryStatus::Failed
                | RecoveryStatus::Timeout
                | RecoveryStatus::Skipped
        )
    }
}

/// One execution (or refusal) of a recovery strategy for an event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecoveryAttempt {
    pub id: Uuid,
    pub error_id: Uuid,
    pub category: ErrorCategory,
    pub priority: Priority,
    pub status: RecoveryStatus,
    pub start_time: Timestamp,
    pub end_time: Option<Timestamp>,
    /// Name of the strategy step that produced the outcome
    pub method: String,
    pub result_details: Details,
    pub error_message: Option<String>,
}

impl RecoveryAttempt {
    /// Create a pending attempt for an event
    pub fn pending(event: &ErrorEvent, classification: &ClassificationResult) -> Self {
        Self {
            id: Uuid::new_v4(),
            error_id: event.id,
            category: event.category,
            priority: classification.priority,
            status: RecoveryStatus::Pending,
            start_time: Utc::now(),
            end_time: None,
            method: classification.recovery_strategy.clone(),
            result_details: Details::new(),
            error_message: None,
        }
    }

    /// Mark the attempt finished with a terminal status
    pub fn finish(&mut self, status: RecoveryStatus) {
        self.status = status;
        self.end_time = Some(Utc::now());
    }

    /// Wall-clock duration of a finished attempt
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.end_time.map(|end| end - self.start_time)
    }
}

/// Delivery status of a notification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Failed,
    /// Escalation message delivered
    Escalated,
}

/// A rendered alert for one (channel, recipient) pair
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationMessage {
    pub id: Uuid,
    pub error_id: Uuid,
    pub category: ErrorCategory,
    pub severity: Severity,
    pub channel: ChannelKind,
    pub recipient: String,
    pub text: String,
    pub priority: Priority,
    pub status: NotificationStatus,
    pub sent_time: Option<Timestamp>,
    /// Delivery attempts made so far
    pub retry_count: u32,
    pub max_retries: u32,
    /// Whether this is a timer-fired escalation message
    pub escalation: bool,
    /// Why the message was rejected or terminally failed
    pub failure_reason: Option<String>,
    /// Refused at admission (suppressed, rate limited, queue full or no
    /// recipient) and never handed to a channel
    #[serde(default)]
    pub rejected: bool,
    pub created_at: Timestamp,
}

/// Periodic (name, value, timestamp) system measurement
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemMetric {
    pub timestamp: Timestamp,
    pub name: String,
    pub value: f64,
}

impl SystemMetric {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            timestamp: Utc::now(),
            name: name.into(),
            value,
        }
    }
}
