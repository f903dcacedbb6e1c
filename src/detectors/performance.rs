use crate::config::PerformanceDetectorConfig;
use crate::detectors::{Detector, RollingWindow};
use crate::error::DetectorError;
use crate::events::{ErrorCategory, ErrorEvent, Severity, Timestamp};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// One observation of a named performance metric
#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceSample {
    pub metric: String,
    pub value: f64,
}

impl PerformanceSample {
    pub fn new(metric: impl Into<String>, value: f64) -> Self {
        Self {
            metric: metric.into(),
            value,
        }
    }
}

/// Detects metrics whose window average exceeds their configured threshold
///
/// Metrics without a configured threshold are recorded but never reported.
pub struct PerformanceDetector {
    config: PerformanceDetectorConfig,
    window: Mutex<RollingWindow<PerformanceSample>>,
}

impl PerformanceDetector {
    pub fn new(config: PerformanceDetectorConfig) -> Self {
        let window = RollingWindow::new(
            config.window_size,
            chrono::Duration::seconds(config.window_seconds),
        );
        Self {
            config,
            window: Mutex::new(window),
        }
    }

    pub fn record_sample(&self, sample: PerformanceSample) {
        self.record_sample_at(Utc::now(), sample);
    }

    pub fn record_sample_at(&self, timestamp: Timestamp, sample: PerformanceSample) {
        let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        window.push_at(timestamp, sample);
    }

    pub fn detect_at(&self, now: Timestamp) -> Result<Vec<ErrorEvent>, DetectorError> {
        let window = self.window.lock().map_err(|_| {
            DetectorError::PollFailed("performance window lock poisoned".to_string())
        })?;

        let mut sums: BTreeMap<&str, (f64, usize)> = BTreeMap::new();
        for sample in window.recent(now) {
            let entry = sums.entry(sample.value.metric.as_str()).or_insert((0.0, 0));
            entry.0 += sample.value.value;
            entry.1 += 1;
        }

        let mut events = Vec::new();
        for (metric, (sum, count)) in sums {
            let Some(&threshold) = self.config.thresholds.get(metric) else {
                continue;
            };
            let average = sum / count as f64;
            if average <= threshold {
                continue;
            }

            let severity = if average >= threshold * 1.5 {
                Severity::High
            } else {
                Severity::Medium
            };
            events.push(
                ErrorEvent::new(
                    ErrorCategory::PerformanceDegradation,
                    severity,
                    format!(
                        "Performance metric '{}' averaged {:.1} over {} samples (threshold {:.1})",
                        metric, average, count, threshold
                    ),
                    self.name(),
                )
                .with_timestamp(now)
                .with_detail("metric", metric)
                .with_detail("average", average)
                .with_detail("threshold", threshold)
                .with_detail("samples", count as u64),
            );
        }

        Ok(events)
    }
}

impl Detector for PerformanceDetector {
    fn name(&self) -> &str {
        "performance_detector"
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(self.config.interval_seconds)
    }

    fn detect(&self) -> Result<Vec<ErrorEvent>, DetectorError> {
        self.detect_at(Utc::now())
    }
}
