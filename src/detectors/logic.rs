use crate::config::LogicDetectorConfig;
use crate::detectors::{Detector, RollingWindow};
use crate::error::DetectorError;
use crate::events::{Details, ErrorCategory, ErrorEvent, Severity, Timestamp};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Error count per component at which a logic error is considered high severity
const HIGH_SEVERITY_COUNT: usize = 5;

/// One occurrence of an application logic error
#[derive(Debug, Clone, PartialEq)]
pub struct LogicErrorSample {
    /// Unit that produced the error (strategy, calculator, ...)
    pub component: String,
    pub error_type: String,
    pub message: String,
    pub details: Details,
}

impl LogicErrorSample {
    pub fn new(
        component: impl Into<String>,
        error_type: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            component: component.into(),
            error_type: error_type.into(),
            message: message.into(),
            details: Details::new(),
        }
    }
}

/// Detects components that keep producing logic errors
pub struct LogicErrorDetector {
    config: LogicDetectorConfig,
    window: Mutex<RollingWindow<LogicErrorSample>>,
}

impl LogicErrorDetector {
    pub fn new(config: LogicDetectorConfig) -> Self {
        let window = RollingWindow::new(
            config.window_size,
            chrono::Duration::seconds(config.window_seconds),
        );
        Self {
            config,
            window: Mutex::new(window),
        }
    }

    pub fn record_sample(&self, sample: LogicErrorSample) {
        self.record_sample_at(Utc::now(), sample);
    }

    pub fn record_sample_at(&self, timestamp: Timestamp, sample: LogicErrorSample) {
        let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        window.push_at(timestamp, sample);
    }

    /// Evaluate the window as of `now`, one event per offending component
    pub fn detect_at(&self, now: Timestamp) -> Result<Vec<ErrorEvent>, DetectorError> {
        let window = self
            .window
            .lock()
            .map_err(|_| DetectorError::PollFailed("logic window lock poisoned".to_string()))?;

        let mut per_component: BTreeMap<&str, (usize, &LogicErrorSample)> = BTreeMap::new();
        for sample in window.recent(now) {
            per_component
                .entry(sample.value.component.as_str())
                .and_modify(|(count, last)| {
                    *count += 1;
                    *last = &sample.value;
                })
                .or_insert((1, &sample.value));
        }

        let threshold = self.config.error_threshold.max(1);
        let events = per_component
            .into_iter()
            .filter(|(_, (count, _))| *count >= threshold)
            .map(|(component, (count, last))| {
                let severity = if count >= HIGH_SEVERITY_COUNT {
                    Severity::High
                } else {
                    Severity::Medium
                };
                let mut event = ErrorEvent::new(
                    ErrorCategory::LogicError,
                    severity,
                    format!(
                        "{} error(s) in component '{}' ({}): {}",
                        count, component, last.error_type, last.message
                    ),
                    self.name(),
                )
                .with_timestamp(now)
                .with_detail("component", component)
                .with_detail("error_type", last.error_type.clone())
                .with_detail("count", count as u64);
                for (key, value) in &last.details {
                    if !event.details.contains_key(key) {
                        event = event.with_detail(key.clone(), value.clone());
                    }
                }
                event
            })
            .collect();

        Ok(events)
    }
}

impl Detector for LogicErrorDetector {
    fn name(&self) -> &str {
        "logic_detector"
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(self.config.interval_seconds)
    }

    fn detect(&self) -> Result<Vec<ErrorEvent>, DetectorError> {
        self.detect_at(Utc::now())
    }
}
