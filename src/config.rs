//! Configuration loading and validation
//!
//! Configuration is read once at startup from a TOML file and passed by reference
//! into each component. Every section has defaults so a partial (or missing) file
//! still yields a usable configuration.

use crate::error::ConfigError;
use crate::events::ChannelKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upper bound on any escalation timeout multiplier and on their product
pub const MAX_TIMEOUT_FACTOR: f64 = 24.0;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub detectors: DetectorsConfig,
    pub classifier: ClassifierConfig,
    pub recovery: RecoveryConfig,
    pub notifications: NotificationsConfig,
    pub directory: DirectoryConfig,
    pub analytics: AnalyticsConfig,
    pub channels: ChannelsConfig,
    pub workers: WorkersConfig,
}

/// Per-detector polling and threshold settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetectorsConfig {
    pub api: ApiDetectorConfig,
    pub data_integrity: DataIntegrityDetectorConfig,
    pub resource: ResourceDetectorConfig,
    pub logic: LogicDetectorConfig,
    pub performance: PerformanceDetectorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiDetectorConfig {
    pub interval_seconds: u64,
    pub window_size: usize,
    pub window_seconds: i64,
    pub min_samples: usize,
    /// Failure ratio above which an API failure is reported
    pub failure_rate_threshold: f64,
    pub latency_threshold_ms: f64,
}

impl Default for ApiDetectorConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 30,
            window_size: 200,
            window_seconds: 300,
            min_samples: 5,
            failure_rate_threshold: 0.2,
            latency_threshold_ms: 2000.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DataIntegrityDetectorConfig {
    pub interval_seconds: u64,
    pub window_size: usize,
    pub window_seconds: i64,
    /// Validation failures per dataset that trigger a report
    pub failure_threshold: usize,
}

impl Default for DataIntegrityDetectorConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 60,
            window_size: 500,
            window_seconds: 600,
            failure_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResourceDetectorConfig {
    pub interval_seconds: u64,
    pub window_size: usize,
    pub window_seconds: i64,
    pub cpu_threshold_percent: f64,
    pub memory_threshold_percent: f64,
    pub disk_threshold_percent: f64,
}

impl Default for ResourceDetectorConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 30,
            window_size: 120,
            window_seconds: 300,
            cpu_threshold_percent: 90.0,
            memory_threshold_percent: 90.0,
            disk_threshold_percent: 90.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogicDetectorConfig {
    pub interval_seconds: u64,
    pub window_size: usize,
    pub window_seconds: i64,
    /// Logic errors per component that trigger a report
    pub error_threshold: usize,
}

impl Default for LogicDetectorConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 30,
            window_size: 200,
            window_seconds: 600,
            error_threshold: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PerformanceDetectorConfig {
    pub interval_seconds: u64,
    pub window_size: usize,
    pub window_seconds: i64,
    /// Metric name -> average value above which performance is degraded
    pub thresholds: BTreeMap<String, f64>,
}

impl Default for PerformanceDetectorConfig {
    fn default() -> Self {
        let mut thresholds = BTreeMap::new();
        thresholds.insert("order_latency_ms".to_string(), 500.0);
        thresholds.insert("queue_backlog".to_string(), 1000.0);
        Self {
            interval_seconds: 60,
            window_size: 300,
            window_seconds: 300,
            thresholds,
        }
    }
}

/// Classification rule tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Events remembered per category for the recurrence heuristic
    pub history_capacity: usize,
    /// Same-category events within the trailing hour above which the error escalates
    pub category_recurrence_threshold: usize,
    /// Lifetime occurrences of one pattern above which the error escalates
    pub pattern_lifetime_threshold: usize,
    /// Offset of the business timezone from UTC
    pub utc_offset_hours: i32,
    pub active_hours_start: u32,
    pub active_hours_end: u32,
    pub active_hours_multiplier: f64,
    pub weekend_multiplier: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            history_capacity: 1000,
            category_recurrence_threshold: 5,
            pattern_lifetime_threshold: 20,
            utc_offset_hours: 0,
            active_hours_start: 9,
            active_hours_end: 17,
            active_hours_multiplier: 0.5,
            weekend_multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Wall-clock budget for a single recovery attempt
    pub recovery_timeout_seconds: u64,
    /// Trailing window over which the per-category attempt budget applies
    pub budget_window_seconds: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            recovery_timeout_seconds: 60,
            budget_window_seconds: 600,
        }
    }
}

impl RecoveryConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_seconds)
    }

    pub fn budget_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.budget_window_seconds as i64)
    }
}

/// Rolling caps for one channel
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ChannelLimit {
    pub per_hour: usize,
    pub per_day: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NotificationsConfig {
    /// Identical notifications within this window are suppressed
    pub suppression_window_seconds: u64,
    /// Delivery attempts before a message is terminally failed
    pub max_retries: u32,
    /// Base delay before the first retry; doubles with each further retry
    pub retry_backoff_ms: u64,
    pub deliver_timeout_seconds: u64,
    pub max_queue_size: usize,
    /// Channel name -> caps
    pub limits: BTreeMap<String, ChannelLimit>,
    /// Roles that receive timer-fired escalations
    pub escalation_contacts: Vec<String>,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        let mut limits = BTreeMap::new();
        limits.insert(
            "chat".to_string(),
            ChannelLimit {
                per_hour: 60,
                per_day: 500,
            },
        );
        limits.insert(
            "email".to_string(),
            ChannelLimit {
                per_hour: 30,
                per_day: 200,
            },
        );
        limits.insert(
            "sms".to_string(),
            ChannelLimit {
                per_hour: 10,
                per_day: 50,
            },
        );
        limits.insert(
            "webhook".to_string(),
            ChannelLimit {
                per_hour: 120,
                per_day: 1000,
            },
        );
        Self {
            suppression_window_seconds: 300,
            max_retries: 3,
            retry_backoff_ms: 2000,
            deliver_timeout_seconds: 10,
            max_queue_size: 1000,
            limits,
            escalation_contacts: vec!["admin".to_string(), "senior_dev".to_string()],
        }
    }
}

impl NotificationsConfig {
    /// Caps for a channel; channels without an entry are unlimited
    pub fn limit_for(&self, channel: ChannelKind) -> Option<ChannelLimit> {
        self.limits.get(channel.as_str()).copied()
    }

    pub fn suppression_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.suppression_window_seconds as i64)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn deliver_timeout(&self) -> Duration {
        Duration::from_secs(self.deliver_timeout_seconds)
    }
}

/// Role -> channel name -> addresses
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DirectoryConfig {
    pub roles: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        let mut roles = BTreeMap::new();
        for role in ["admin", "dev_team", "senior_dev", "system_admin"] {
            let mut channels = BTreeMap::new();
            channels.insert("chat".to_string(), vec![format!("@{}", role)]);
            channels.insert("email".to_string(), vec![format!("{}@localhost", role)]);
            roles.insert(role.to_string(), channels);
        }
        Self { roles }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// JSON-lines file for durable records; in-memory when unset
    pub store_path: Option<PathBuf>,
    pub retention_days: i64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            store_path: None,
            retention_days: 90,
        }
    }
}

impl AnalyticsConfig {
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.retention_days)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChannelsConfig {
    /// Endpoint for the webhook channel; the channel is disabled when unset
    pub webhook_url: Option<String>,
    pub webhook_timeout_seconds: u64,
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            webhook_timeout_seconds: 10,
        }
    }
}

/// Background worker cadence
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkersConfig {
    pub drain_poll_ms: u64,
    pub notification_drain_ms: u64,
    pub metrics_interval_seconds: u64,
    pub retention_sweep_interval_seconds: u64,
    pub report_interval_seconds: u64,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            drain_poll_ms: 100,
            notification_drain_ms: 500,
            metrics_interval_seconds: 60,
            retention_sweep_interval_seconds: 3600,
            report_interval_seconds: 86400,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ReadError` when the file cannot be read, a parse error
    /// when it is not valid TOML for this schema, and `ConfigError::ValidationError`
    /// when a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges and cross-field consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        let intervals = [
            ("detectors.api.interval_seconds", self.detectors.api.interval_seconds),
            (
                "detectors.data_integrity.interval_seconds",
                self.detectors.data_integrity.interval_seconds,
            ),
            (
                "detectors.resource.interval_seconds",
                self.detectors.resource.interval_seconds,
            ),
            ("detectors.logic.interval_seconds", self.detectors.logic.interval_seconds),
            (
                "detectors.performance.interval_seconds",
                self.detectors.performance.interval_seconds,
            ),
            (
                "workers.metrics_interval_seconds",
                self.workers.metrics_interval_seconds,
            ),
            (
                "workers.retention_sweep_interval_seconds",
                self.workers.retention_sweep_interval_seconds,
            ),
            (
                "workers.report_interval_seconds",
                self.workers.report_interval_seconds,
            ),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "{} must be greater than 0",
                    name
                )));
            }
        }

        let windows = [
            ("detectors.api.window_size", self.detectors.api.window_size),
            (
                "detectors.data_integrity.window_size",
                self.detectors.data_integrity.window_size,
            ),
            ("detectors.resource.window_size", self.detectors.resource.window_size),
            ("detectors.logic.window_size", self.detectors.logic.window_size),
            (
                "detectors.performance.window_size",
                self.detectors.performance.window_size,
            ),
            ("classifier.history_capacity", self.classifier.history_capacity),
        ];
        for (name, value) in windows {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "{} must be greater than 0",
                    name
                )));
            }
        }

        if !(0.0..=1.0).contains(&self.detectors.api.failure_rate_threshold) {
            return Err(ConfigError::ValidationError(
                "detectors.api.failure_rate_threshold must be between 0 and 1".to_string(),
            ));
        }

        let classifier = &self.classifier;
        if classifier.active_hours_start > 23 || classifier.active_hours_end > 24 {
            return Err(ConfigError::ValidationError(
                "classifier active hours must be within 0-24".to_string(),
            ));
        }
        if classifier.active_hours_start >= classifier.active_hours_end {
            return Err(ConfigError::ValidationError(
                "classifier.active_hours_start must be before active_hours_end".to_string(),
            ));
        }
        if !(-12..=14).contains(&classifier.utc_offset_hours) {
            return Err(ConfigError::ValidationError(
                "classifier.utc_offset_hours must be between -12 and 14".to_string(),
            ));
        }
        for (name, multiplier) in [
            ("active_hours_multiplier", classifier.active_hours_multiplier),
            ("weekend_multiplier", classifier.weekend_multiplier),
        ] {
            if !(multiplier.is_finite() && multiplier > 0.0 && multiplier <= MAX_TIMEOUT_FACTOR) {
                return Err(ConfigError::ValidationError(format!(
                    "classifier.{} must be positive and at most {}",
                    name, MAX_TIMEOUT_FACTOR
                )));
            }
        }

        if self.recovery.recovery_timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "recovery.recovery_timeout_seconds must be greater than 0".to_string(),
            ));
        }

        let notifications = &self.notifications;
        if notifications.max_retries == 0 {
            return Err(ConfigError::ValidationError(
                "notifications.max_retries must be at least 1".to_string(),
            ));
        }
        if notifications.deliver_timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "notifications.deliver_timeout_seconds must be greater than 0".to_string(),
            ));
        }
        for (channel, limit) in &notifications.limits {
            channel
                .parse::<ChannelKind>()
                .map_err(|e| ConfigError::ValidationError(format!("notifications.limits: {}", e)))?;
            if limit.per_hour > limit.per_day {
                return Err(ConfigError::ValidationError(format!(
                    "notifications.limits.{}: per_hour exceeds per_day",
                    channel
                )));
            }
        }
        for role in &notifications.escalation_contacts {
            if !self.directory.roles.contains_key(role) {
                return Err(ConfigError::ValidationError(format!(
                    "escalation contact '{}' is not in the recipient directory",
                    role
                )));
            }
        }

        for (role, channels) in &self.directory.roles {
            for channel in channels.keys() {
                channel.parse::<ChannelKind>().map_err(|e| {
                    ConfigError::ValidationError(format!("directory.roles.{}: {}", role, e))
                })?;
            }
        }

        if self.analytics.retention_days <= 0 {
            return Err(ConfigError::ValidationError(
                "analytics.retention_days must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
