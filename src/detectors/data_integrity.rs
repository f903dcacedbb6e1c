use crate::config::DataIntegrityDetectorConfig;
use crate::detectors::{Detector, RollingWindow};
use crate::error::DetectorError;
use crate::events::{ErrorCategory, ErrorEvent, Severity, Timestamp};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Result of validating one piece of incoming data
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationSample {
    /// Name of the dataset or feed being validated
    pub dataset: String,
    pub passed: bool,
    pub reason: Option<String>,
    /// The offending payload, kept for diagnostics
    pub payload: Option<serde_json::Value>,
}

impl ValidationSample {
    pub fn passed(dataset: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            passed: true,
            reason: None,
            payload: None,
        }
    }

    pub fn failed(
        dataset: impl Into<String>,
        reason: impl Into<String>,
        payload: Option<serde_json::Value>,
    ) -> Self {
        Self {
            dataset: dataset.into(),
            passed: false,
            reason: Some(reason.into()),
            payload,
        }
    }
}

#[derive(Default)]
struct DatasetTally<'a> {
    total: usize,
    failures: usize,
    last_failure: Option<&'a ValidationSample>,
}

/// Detects datasets that repeatedly fail validation
pub struct DataIntegrityDetector {
    config: DataIntegrityDetectorConfig,
    window: Mutex<RollingWindow<ValidationSample>>,
}

impl DataIntegrityDetector {
    pub fn new(config: DataIntegrityDetectorConfig) -> Self {
        let window = RollingWindow::new(
            config.window_size,
            chrono::Duration::seconds(config.window_seconds),
        );
        Self {
            config,
            window: Mutex::new(window),
        }
    }

    pub fn record_sample(&self, sample: ValidationSample) {
        self.record_sample_at(Utc::now(), sample);
    }

    pub fn record_sample_at(&self, timestamp: Timestamp, sample: ValidationSample) {
        let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        window.push_at(timestamp, sample);
    }

    /// Evaluate the window as of `now`, one event per failing dataset
    pub fn detect_at(&self, now: Timestamp) -> Result<Vec<ErrorEvent>, DetectorError> {
        let window = self.window.lock().map_err(|_| {
            DetectorError::PollFailed("data integrity window lock poisoned".to_string())
        })?;

        let mut tallies: BTreeMap<&str, DatasetTally> = BTreeMap::new();
        for sample in window.recent(now) {
            let tally = tallies.entry(sample.value.dataset.as_str()).or_default();
            tally.total += 1;
            if !sample.value.passed {
                tally.failures += 1;
                tally.last_failure = Some(&sample.value);
            }
        }

        let mut events = Vec::new();
        for (dataset, tally) in tallies {
            if tally.failures == 0 || tally.failures < self.config.failure_threshold {
                continue;
            }

            let failure_ratio = tally.failures as f64 / tally.total as f64;
            let severity = if failure_ratio > 0.5 {
                Severity::High
            } else {
                Severity::Medium
            };

            let reason = tally
                .last_failure
                .and_then(|s| s.reason.clone())
                .unwrap_or_else(|| "validation failed".to_string());

            let mut event = ErrorEvent::new(
                ErrorCategory::DataIntegrity,
                severity,
                format!(
                    "Data validation failed {}/{} times for '{}': {}",
                    tally.failures, tally.total, dataset, reason
                ),
                self.name(),
            )
            .with_timestamp(now)
            .with_detail("dataset", dataset)
            .with_detail("failures", tally.failures as u64)
            .with_detail("total", tally.total as u64)
            .with_detail("reason", reason);

            if let Some(payload) = tally.last_failure.and_then(|s| s.payload.clone()) {
                event = event.with_detail("payload", payload);
            }
            events.push(event);
        }

        Ok(events)
    }
}

impl Detector for DataIntegrityDetector {
    fn name(&self) -> &str {
        "data_integrity_detector"
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(self.config.interval_seconds)
    }

    fn detect(&self) -> Result<Vec<ErrorEvent>, DetectorError> {
        self.detect_at(Utc::now())
    }
}
