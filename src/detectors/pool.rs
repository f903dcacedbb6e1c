use crate::error::DetectorError;
use crate::events::ErrorEvent;
use crate::scheduling::ScheduledTask;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Duration;

/// A periodic health-signal detector
///
/// Detectors ingest raw samples through their own typed `record_sample` method and
/// expose `detect`, a read of the current window state against thresholds.
pub trait Detector: Send + Sync {
    /// Human-readable name, also used as the event source
    fn name(&self) -> &str;

    /// How often the pool should poll this detector
    fn interval(&self) -> Duration;

    /// Evaluate the current window and return zero or more error events
    fn detect(&self) -> Result<Vec<ErrorEvent>, DetectorError>;
}

/// Runs every registered detector on its own schedule
///
/// Each detector gets a dedicated `ScheduledTask`; all of them push onto the same
/// event queue. A failing detector is logged and backs off without affecting the
/// others or the consumer of the queue.
pub struct DetectorPool {
    detectors: Vec<Arc<dyn Detector>>,
    tasks: Vec<ScheduledTask>,
    emitted: Arc<AtomicU64>,
}

impl Default for DetectorPool {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorPool {
    pub fn new() -> Self {
        Self {
            detectors: Vec::new(),
            tasks: Vec::new(),
            emitted: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Register a detector; it starts polling on the next `start`
    pub fn add_detector(&mut self, detector: Arc<dyn Detector>) {
        self.detectors.push(detector);
    }

    pub fn detector_count(&self) -> usize {
        self.detectors.len()
    }

    /// Number of detector tasks whose threads are alive
    pub fn running_count(&self) -> usize {
        self.tasks.iter().filter(|task| task.is_running()).count()
    }

    /// Events forwarded to the queue since creation
    pub fn events_emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    /// Shared handle to the forwarded-events counter
    pub fn emitted_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.emitted)
    }

    /// Start one polling task per detector, all feeding `queue`
    pub fn start(&mut self, queue: Sender<ErrorEvent>) {
        if !self.tasks.is_empty() {
            info!("Detector pool already running, skipping start");
            return;
        }

        for detector in &self.detectors {
            let detector = Arc::clone(detector);
            let queue = queue.clone();
            let emitted = Arc::clone(&self.emitted);
            let interval = detector.interval();
            let name = format!("detector:{}", detector.name());
            let task = ScheduledTask::spawn(name, interval, move || {
                let count = poll_once(detector.as_ref(), &queue)?;
                emitted.fetch_add(count as u64, Ordering::Relaxed);
                Ok::<(), DetectorError>(())
            });
            self.tasks.push(task);
        }

        info!("Detector pool started {} detectors", self.tasks.len());
    }

    /// Stop every detector task and wait for them to exit
    pub fn stop(&mut self) {
        for task in &mut self.tasks {
            task.stop();
        }
        self.tasks.clear();
        info!("Detector pool stopped");
    }
}

/// Poll a detector once and forward its events to the queue
///
/// # Returns
///
/// Number of events forwarded
///
/// # Errors
///
/// Returns the detector's own error, or `DetectorError::QueueClosed` when the
/// receiving side of the queue has gone away.
pub fn poll_once(detector: &dyn Detector, queue: &Sender<ErrorEvent>) -> Result<usize, DetectorError> {
    let events = detector.detect()?;
    let count = events.len();

    for event in events {
        debug!(
            "Detector '{}' emitted {} / {}: {}",
            detector.name(),
            event.category,
            event.severity,
            event.message
        );
        queue.send(event).map_err(|_| {
            warn!("Event queue closed while '{}' was emitting", detector.name());
            DetectorError::QueueClosed
        })?;
    }

    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ErrorCategory, Severity};
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::thread;

    struct FixedDetector {
        name: String,
        events_per_poll: usize,
        polls: AtomicUsize,
    }

    impl FixedDetector {
        fn new(name: &str, events_per_poll: usize) -> Self {
            Self {
                name: name.to_string(),
                events_per_poll,
                polls: AtomicUsize::new(0),
            }
        }
    }

    impl Detector for FixedDetector {
        fn name(&self) -> &str {
            &self.name
        }

        fn interval(&self) -> Duration {
            Duration::from_millis(5)
        }

        fn detect(&self) -> Result<Vec<ErrorEvent>, DetectorError> {
            let poll = self.polls.fetch_add(1, Ordering::SeqCst);
            Ok((0..self.events_per_poll)
                .map(|i| {
                    ErrorEvent::new(
                        ErrorCategory::LogicError,
                        Severity::Low,
                        format!("{} poll {} event {}", self.name, poll, i),
                        self.name.clone(),
                    )
                })
                .collect())
        }
    }

    struct BrokenDetector {
        polls: AtomicUsize,
    }

    impl Detector for BrokenDetector {
        fn name(&self) -> &str {
            "broken"
        }

        fn interval(&self) -> Duration {
            Duration::from_millis(5)
        }

        fn detect(&self) -> Result<Vec<ErrorEvent>, DetectorError> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            Err(DetectorError::PollFailed("upstream unavailable".to_string()))
        }
    }

    #[test]
    fn test_poll_once_forwards_events() {
        let detector = FixedDetector::new("fixed", 3);
        let (tx, rx) = mpsc::channel();

        let count = poll_once(&detector, &tx).unwrap();
        assert_eq!(count, 3);
        assert_eq!(rx.try_iter().count(), 3);
    }

    #[test]
    fn test_poll_once_reports_closed_queue() {
        let detector = FixedDetector::new("fixed", 1);
        let (tx, rx) = mpsc::channel();
        drop(rx);

        assert!(matches!(
            poll_once(&detector, &tx),
            Err(DetectorError::QueueClosed)
        ));
    }

    #[test]
    fn test_failing_detector_does_not_stop_others() {
        let healthy = Arc::new(FixedDetector::new("healthy", 1));
        let broken = Arc::new(BrokenDetector {
            polls: AtomicUsize::new(0),
        });

        let mut pool = DetectorPool::new();
        pool.add_detector(healthy.clone());
        pool.add_detector(broken.clone());
        assert_eq!(pool.detector_count(), 2);

        let (tx, rx) = mpsc::channel();
        pool.start(tx);
        thread::sleep(Duration::from_millis(150));
        assert_eq!(pool.running_count(), 2);
        pool.stop();

        let events: Vec<ErrorEvent> = rx.try_iter().collect();
        assert!(events.len() >= 3);
        assert_eq!(pool.events_emitted(), events.len() as u64);
        assert!(events.iter().all(|e| e.source == "healthy"));
        // The broken detector keeps being polled (with back-off)
        assert!(broken.polls.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn test_events_fifo_within_detector() {
        let detector = Arc::new(FixedDetector::new("ordered", 2));
        let mut pool = DetectorPool::new();
        pool.add_detector(detector);

        let (tx, rx) = mpsc::channel();
        pool.start(tx);
        thread::sleep(Duration::from_millis(60));
        pool.stop();

        let messages: Vec<String> = rx.try_iter().map(|e| e.message).collect();
        assert!(messages.len() >= 2);
        for pair in messages.chunks(2).filter(|c| c.len() == 2) {
            assert!(pair[0].ends_with("event 0"));
            assert!(pair[1].ends_with("event 1"));
        }
    }
}
