use crate::config::ApiDetectorConfig;
use crate::detectors::{Detector, RollingWindow};
use crate::error::DetectorError;
use crate::events::{ErrorCategory, ErrorEvent, Severity, Timestamp};
use chrono::Utc;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Outcome of a single external API call
#[derive(Debug, Clone, PartialEq)]
pub struct ApiCallSample {
    pub endpoint: String,
    pub success: bool,
    pub latency: Duration,
    pub status_code: Option<u16>,
    pub error: Option<String>,
}

impl ApiCallSample {
    pub fn success(endpoint: impl Into<String>, latency: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            success: true,
            latency,
            status_code: Some(200),
            error: None,
        }
    }

    pub fn failure(
        endpoint: impl Into<String>,
        latency: Duration,
        status_code: Option<u16>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            success: false,
            latency,
            status_code,
            error: Some(error.into()),
        }
    }
}

/// Detects failing or slow external API calls
///
/// Reports an `ApiFailure` when the failure ratio over the window exceeds the
/// configured threshold and a `PerformanceDegradation` when the average latency is
/// above the latency threshold.
pub struct ApiDetector {
    config: ApiDetectorConfig,
    window: Mutex<RollingWindow<ApiCallSample>>,
}

impl ApiDetector {
    pub fn new(config: ApiDetectorConfig) -> Self {
        let window = RollingWindow::new(
            config.window_size,
            chrono::Duration::seconds(config.window_seconds),
        );
        Self {
            config,
            window: Mutex::new(window),
        }
    }

    /// Ingest one call outcome
    pub fn record_sample(&self, sample: ApiCallSample) {
        self.record_sample_at(Utc::now(), sample);
    }

    pub fn record_sample_at(&self, timestamp: Timestamp, sample: ApiCallSample) {
        let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        window.push_at(timestamp, sample);
    }

    /// Evaluate the window as of `now`
    pub fn detect_at(&self, now: Timestamp) -> Result<Vec<ErrorEvent>, DetectorError> {
        let window = self
            .window
            .lock()
            .map_err(|_| DetectorError::PollFailed("API window lock poisoned".to_string()))?;

        let samples: Vec<&ApiCallSample> = window.recent(now).map(|s| &s.value).collect();
        if samples.is_empty() || samples.len() < self.config.min_samples {
            return Ok(Vec::new());
        }

        let mut events = Vec::new();
        let total = samples.len();
        let failed: Vec<&&ApiCallSample> = samples.iter().filter(|s| !s.success).collect();
        let failure_rate = failed.len() as f64 / total as f64;

        if failure_rate > self.config.failure_rate_threshold {
            let severity = if failure_rate >= 0.5 {
                Severity::Critical
            } else if failure_rate >= 0.3 {
                Severity::High
            } else {
                Severity::Medium
            };

            let mut message = format!(
                "API failure rate {:.0}% over {} calls",
                failure_rate * 100.0,
                total
            );
            let mut event_details = Vec::new();
            if let Some(last) = failed.last() {
                if let Some(ref error) = last.error {
                    message.push_str(&format!(": {}", error));
                    event_details.push(("error", serde_json::Value::from(error.clone())));
                }
                event_details.push(("endpoint", serde_json::Value::from(last.endpoint.clone())));
                if let Some(code) = last.status_code {
                    event_details.push(("status_code", serde_json::Value::from(code)));
                }
            }

            let mut event = ErrorEvent::new(ErrorCategory::ApiFailure, severity, message, self.name())
                .with_timestamp(now)
                .with_detail("failure_rate", failure_rate)
                .with_detail("failed_calls", failed.len() as u64)
                .with_detail("total_calls", total as u64);
            for (key, value) in event_details {
                event = event.with_detail(key, value);
            }
            events.push(event);
        }

        let avg_latency_ms = samples
            .iter()
            .map(|s| s.latency.as_secs_f64() * 1000.0)
            .sum::<f64>()
            / total as f64;

        if avg_latency_ms > self.config.latency_threshold_ms {
            let severity = if avg_latency_ms >= self.config.latency_threshold_ms * 2.0 {
                Severity::High
            } else {
                Severity::Medium
            };
            events.push(
                ErrorEvent::new(
                    ErrorCategory::PerformanceDegradation,
                    severity,
                    format!(
                        "API latency averaged {:.0}ms over {} calls (threshold {:.0}ms)",
                        avg_latency_ms, total, self.config.latency_threshold_ms
                    ),
                    self.name(),
                )
                .with_timestamp(now)
                .with_detail("metric", "api_latency_ms")
                .with_detail("average", avg_latency_ms)
                .with_detail("threshold", self.config.latency_threshold_ms),
            );
        }

        Ok(events)
    }
}

impl Detector for ApiDetector {
    fn name(&self) -> &str {
        "api_detector"
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(self.config.interval_seconds)
    }

    fn detect(&self) -> Result<Vec<ErrorEvent>, DetectorError> {
        self.detect_at(Utc::now())
    }
}
