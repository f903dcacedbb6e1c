use crate::config::ResourceDetectorConfig;
use crate::detectors::{Detector, RollingWindow};
use crate::error::DetectorError;
use crate::events::{ErrorCategory, ErrorEvent, Severity, Timestamp};
use chrono::Utc;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Usage level at or above which a shortage is critical
const CRITICAL_USAGE_PERCENT: f64 = 95.0;

/// Operating-system resource usage, all values in percent (0-100)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceSample {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
}

/// Detects CPU, memory and disk exhaustion from the latest sample
pub struct ResourceDetector {
    config: ResourceDetectorConfig,
    window: Mutex<RollingWindow<ResourceSample>>,
}

impl ResourceDetector {
    pub fn new(config: ResourceDetectorConfig) -> Self {
        let window = RollingWindow::new(
            config.window_size,
            chrono::Duration::seconds(config.window_seconds),
        );
        Self {
            config,
            window: Mutex::new(window),
        }
    }

    pub fn record_sample(&self, sample: ResourceSample) {
        self.record_sample_at(Utc::now(), sample);
    }

    pub fn record_sample_at(&self, timestamp: Timestamp, sample: ResourceSample) {
        let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        window.push_at(timestamp, sample);
    }

    /// Most recent sample still inside the window
    pub fn latest_sample(&self) -> Option<ResourceSample> {
        let window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        window.latest(Utc::now()).map(|s| s.value)
    }

    /// Evaluate the latest sample as of `now`, one event per exhausted resource
    pub fn detect_at(&self, now: Timestamp) -> Result<Vec<ErrorEvent>, DetectorError> {
        let window = self
            .window
            .lock()
            .map_err(|_| DetectorError::PollFailed("resource window lock poisoned".to_string()))?;

        let Some(latest) = window.latest(now) else {
            return Ok(Vec::new());
        };
        let sample = latest.value;

        let checks = [
            ("memory", sample.memory_percent, self.config.memory_threshold_percent),
            ("disk", sample.disk_percent, self.config.disk_threshold_percent),
            ("cpu", sample.cpu_percent, self.config.cpu_threshold_percent),
        ];

        let events = checks
            .into_iter()
            .filter(|(_, usage, threshold)| usage > threshold)
            .map(|(resource, usage, threshold)| {
                let severity = if usage >= CRITICAL_USAGE_PERCENT {
                    Severity::Critical
                } else {
                    Severity::High
                };
                ErrorEvent::new(
                    ErrorCategory::ResourceShortage,
                    severity,
                    format!(
                        "{} usage at {:.1}% (threshold {:.1}%)",
                        resource, usage, threshold
                    ),
                    self.name(),
                )
                .with_timestamp(now)
                .with_detail("resource_type", resource)
                .with_detail("usage_percent", usage)
                .with_detail("threshold_percent", threshold)
            })
            .collect();

        Ok(events)
    }
}

impl Detector for ResourceDetector {
    fn name(&self) -> &str {
        "resource_detector"
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(self.config.interval_seconds)
    }

    fn detect(&self) -> Result<Vec<ErrorEvent>, DetectorError> {
        self.detect_at(Utc::now())
    }
}
