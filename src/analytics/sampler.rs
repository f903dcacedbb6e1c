//! Self-monitoring of the pipeline process
//!
//! The sampler keeps short rolling histories of processed events and
//! notification outcomes, and turns them together with point-in-time gauges
//! into `SystemMetric` records.

use crate::detectors::ResourceSample;
use crate::events::{SystemMetric, Timestamp};
use chrono::{Duration, Utc};
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

/// Resident memory above which a warning is logged
const HIGH_MEMORY_BYTES: u64 = 500 * 1024 * 1024;
/// Notification success percentage below which a warning is logged
const LOW_SUCCESS_PERCENT: f64 = 90.0;

/// Point-in-time pipeline gauges supplied by the caller at sampling time
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineGauges {
    pub queue_depth: usize,
    pub in_flight_recoveries: usize,
    pub active_escalations: usize,
    pub queued_notifications: usize,
    /// Latest host resource reading, if any
    pub resource: Option<ResourceSample>,
}

#[derive(Debug, Clone, Copy)]
struct NotificationResult {
    success: bool,
    timestamp: Timestamp,
}

/// Collects self-monitoring metrics for the running pipeline
#[derive(Debug, Clone)]
pub struct SystemMetricsSampler {
    notification_results: Arc<Mutex<VecDeque<NotificationResult>>>,
    processed_events: Arc<Mutex<VecDeque<Timestamp>>>,
    max_samples: usize,
    rate_window: Duration,
}

impl Default for SystemMetricsSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemMetricsSampler {
    pub fn new() -> Self {
        Self {
            notification_results: Arc::new(Mutex::new(VecDeque::new())),
            processed_events: Arc::new(Mutex::new(VecDeque::new())),
            max_samples: 10_000,
            rate_window: Duration::minutes(1),
        }
    }

    /// Note that the pipeline finished processing one event
    pub fn record_event_processed(&self) {
        self.record_event_processed_at(Utc::now());
    }

    pub fn record_event_processed_at(&self, timestamp: Timestamp) {
        let mut events = self
            .processed_events
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        events.push_back(timestamp);
        let cutoff = timestamp - self.rate_window;
        while events.front().is_some_and(|&t| t < cutoff) || events.len() > self.max_samples {
            events.pop_front();
        }
    }

    /// Note the final outcome of one notification delivery
    pub fn record_notification_result(&self, success: bool) {
        self.record_notification_result_at(success, Utc::now());
    }

    pub fn record_notification_result_at(&self, success: bool, timestamp: Timestamp) {
        let mut results = self
            .notification_results
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        results.push_back(NotificationResult { success, timestamp });
        let cutoff = timestamp - self.rate_window;
        while results.front().is_some_and(|r| r.timestamp < cutoff)
            || results.len() > self.max_samples
        {
            results.pop_front();
        }
    }

    /// Events processed in the minute before `now`
    pub fn events_per_minute_at(&self, now: Timestamp) -> usize {
        let cutoff = now - self.rate_window;
        self.processed_events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|&&t| t >= cutoff && t <= now)
            .count()
    }

    /// (successful, failed, success percentage) over the minute before `now`
    ///
    /// With no recent notifications the success rate is reported as 100%.
    pub fn notification_success_at(&self, now: Timestamp) -> (usize, usize, f64) {
        let cutoff = now - self.rate_window;
        let results = self
            .notification_results
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let recent: Vec<&NotificationResult> = results
            .iter()
            .filter(|r| r.timestamp >= cutoff && r.timestamp <= now)
            .collect();
        if recent.is_empty() {
            return (0, 0, 100.0);
        }

        let successful = recent.iter().filter(|r| r.success).count();
        let failed = recent.len() - successful;
        (
            successful,
            failed,
            successful as f64 / recent.len() as f64 * 100.0,
        )
    }

    /// Turn current gauges and rolling rates into metric records
    pub fn sample_at(&self, now: Timestamp, gauges: &PipelineGauges) -> Vec<SystemMetric> {
        debug!("Sampling system metrics");

        let memory_usage_bytes = resident_memory_bytes();
        let events_per_minute = self.events_per_minute_at(now);
        let (successful, failed, success_rate) = self.notification_success_at(now);

        let mut values = vec![
            ("memory_usage_mb", memory_usage_bytes as f64 / 1024.0 / 1024.0),
            ("queue_depth", gauges.queue_depth as f64),
            ("in_flight_recoveries", gauges.in_flight_recoveries as f64),
            ("active_escalations", gauges.active_escalations as f64),
            ("queued_notifications", gauges.queued_notifications as f64),
            ("notification_success_rate", success_rate),
            ("events_per_minute", events_per_minute as f64),
        ];
        if let Some(resource) = gauges.resource {
            values.push(("cpu_percent", resource.cpu_percent));
            values.push(("memory_percent", resource.memory_percent));
            values.push(("disk_percent", resource.disk_percent));
        }

        info!(
            "Self-monitoring: memory={}MB, events/min={}, queue={}, in_flight={}, escalations={}, notification_success={:.1}%",
            memory_usage_bytes / 1024 / 1024,
            events_per_minute,
            gauges.queue_depth,
            gauges.in_flight_recoveries,
            gauges.active_escalations,
            success_rate
        );

        if memory_usage_bytes > HIGH_MEMORY_BYTES {
            warn!(
                "High memory usage detected: {}MB",
                memory_usage_bytes / 1024 / 1024
            );
        }
        if success_rate < LOW_SUCCESS_PERCENT && successful + failed > 0 {
            warn!("Low notification success rate: {:.1}%", success_rate);
        }

        values
            .into_iter()
            .map(|(name, value)| SystemMetric {
                timestamp: now,
                name: name.to_string(),
                value,
            })
            .collect()
    }
}

/// Resident set size of this process in bytes; 0 when it cannot be determined
pub fn resident_memory_bytes() -> u64 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            let rss_kb = status
                .lines()
                .find(|line| line.starts_with("VmRSS:"))
                .and_then(|line| line.split_whitespace().nth(1))
                .and_then(|kb| kb.parse::<u64>().ok());
            if let Some(kb) = rss_kb {
                return kb * 1024;
            }
        }
    }

    #[cfg(unix)]
    {
        // Peak rather than current usage, but better than nothing
        let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
        if unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut usage) } == 0 {
            let max_rss = usage.ru_maxrss.max(0) as u64;
            // ru_maxrss is in KB on Linux, bytes on macOS
            return if cfg!(target_os = "macos") {
                max_rss
            } else {
                max_rss * 1024
            };
        }
    }

    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_per_minute() {
        let sampler = SystemMetricsSampler::new();
        let now = Utc::now();
        sampler.record_event_processed_at(now - Duration::seconds(90));
        sampler.record_event_processed_at(now - Duration::seconds(30));
        sampler.record_event_processed_at(now);
        assert_eq!(sampler.events_per_minute_at(now), 2);
    }

    #[test]
    fn test_notification_success_rate() {
        let sampler = SystemMetricsSampler::new();
        let now = Utc::now();
        assert_eq!(sampler.notification_success_at(now), (0, 0, 100.0));

        sampler.record_notification_result_at(true, now);
        sampler.record_notification_result_at(true, now);
        sampler.record_notification_result_at(true, now);
        sampler.record_notification_result_at(false, now);
        let (successful, failed, rate) = sampler.notification_success_at(now);
        assert_eq!((successful, failed), (3, 1));
        assert!((rate - 75.0).abs() < 1e-9);
    }

    #[test]
    fn test_sample_emits_gauges() {
        let sampler = SystemMetricsSampler::new();
        let now = Utc::now();
        let gauges = PipelineGauges {
            queue_depth: 4,
            in_flight_recoveries: 1,
            active_escalations: 2,
            queued_notifications: 3,
            resource: Some(ResourceSample {
                cpu_percent: 50.0,
                memory_percent: 85.0,
                disk_percent: 10.0,
            }),
        };

        let metrics = sampler.sample_at(now, &gauges);
        let value = |name: &str| {
            metrics
                .iter()
                .find(|m| m.name == name)
                .map(|m| m.value)
                .unwrap()
        };
        assert_eq!(value("queue_depth"), 4.0);
        assert_eq!(value("active_escalations"), 2.0);
        assert_eq!(value("memory_percent"), 85.0);
        assert_eq!(value("notification_success_rate"), 100.0);
        assert!(metrics.iter().all(|m| m.timestamp == now));
    }

    #[test]
    fn test_sample_without_resource_reading() {
        let metrics = SystemMetricsSampler::new().sample_at(Utc::now(), &PipelineGauges::default());
        assert!(!metrics.iter().any(|m| m.name == "cpu_percent"));
        assert!(metrics.iter().any(|m| m.name == "memory_usage_mb"));
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_resident_memory_is_reported() {
        assert!(resident_memory_bytes() > 0);
    }
}
