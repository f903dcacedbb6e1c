//! Wiring of detectors, classifier, recovery, notifications and analytics
//!
//! `ErrorManagementSystem` owns one instance of every component and a fixed set
//! of worker threads: one per detector, the event drain running the pipeline,
//! the notification drain, the metric sampler, the retention sweep and the
//! report worker. Detectors and fire drills feed a single `mpsc` queue.

use crate::analytics::{
    health_score, ErrorAnalytics, HealthInputs, PipelineGauges, SystemMetricsSampler,
};
use crate::classifier::Classifier;
use crate::config::Config;
use crate::detectors::{
    ApiDetector, DataIntegrityDetector, DetectorPool, LogicErrorDetector, PerformanceDetector,
    ResourceDetector,
};
use crate::error::{DetectorError, StoreError};
use crate::events::{
    ClassificationResult, ErrorCategory, ErrorEvent, RecoveryAttempt, RecoveryStatus, Severity,
};
use crate::notifications::{ChannelTable, NotificationDispatcher, RecipientDirectory, SendReport};
use crate::recovery::{RecoveryOrchestrator, RemediationHooks};
use crate::scheduling::ScheduledTask;
use chrono::Utc;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::convert::Infallible;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Window over which the status health score is measured
const HEALTH_WINDOW_HOURS: i64 = 1;

/// Everything the pipeline produced for one event
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub classification: ClassificationResult,
    /// Always non-empty; the last attempt is terminal
    pub attempts: Vec<RecoveryAttempt>,
    pub notifications: SendReport,
    pub resolved: bool,
}

/// The classify -> recover -> notify -> persist sequence for single events
pub struct Pipeline {
    classifier: Classifier,
    recovery: RecoveryOrchestrator,
    dispatcher: NotificationDispatcher,
    analytics: Arc<ErrorAnalytics>,
    sampler: SystemMetricsSampler,
    events_processed: AtomicU64,
}

impl Pipeline {
    pub fn new(
        classifier: Classifier,
        recovery: RecoveryOrchestrator,
        dispatcher: NotificationDispatcher,
        analytics: Arc<ErrorAnalytics>,
        sampler: SystemMetricsSampler,
    ) -> Self {
        Self {
            classifier,
            recovery,
            dispatcher,
            analytics,
            sampler,
            events_processed: AtomicU64::new(0),
        }
    }

    /// Run one event through every stage
    ///
    /// A panic inside any stage is contained to that stage: classification
    /// falls back to the severity base rule, and the event still gets a terminal
    /// attempt, a notification outcome and is persisted.
    pub fn process(&self, event: &ErrorEvent) -> PipelineOutcome {
        let classification = match panic::catch_unwind(AssertUnwindSafe(|| {
            self.classifier.classify_and_record(event)
        })) {
            Ok(classification) => classification,
            Err(_) => {
                error!(
                    "Classification aborted for {}, using the base rule",
                    event.key()
                );
                self.classifier.base_classification(event)
            }
        };
        debug!(
            "Classified {} as {} / {:?} via [{}]",
            event.key(),
            classification.priority,
            classification.action,
            classification.applied_rules.join(", ")
        );

        let attempts = match panic::catch_unwind(AssertUnwindSafe(|| {
            self.recovery.recover(event, &classification)
        })) {
            Ok(attempts) if !attempts.is_empty() => attempts,
            Ok(_) | Err(_) => {
                error!("Recovery stage aborted for {}", event.key());
                let mut attempt = RecoveryAttempt::pending(event, &classification);
                attempt.error_message = Some("recovery stage aborted".to_string());
                attempt.finish(RecoveryStatus::Failed);
                vec![attempt]
            }
        };
        let last = attempts.last();

        let notifications = match panic::catch_unwind(AssertUnwindSafe(|| {
            self.dispatcher
                .send_notification(event, &classification, last)
        })) {
            Ok(report) => report,
            Err(_) => {
                error!("Notification stage aborted for {}", event.key());
                SendReport::default()
            }
        };

        let resolved = last.is_some_and(|attempt| attempt.status == RecoveryStatus::Success);
        if resolved {
            self.dispatcher.resolve(&event.key());
        }

        self.analytics.record_event(event);
        for attempt in &attempts {
            self.analytics.record_attempt(attempt);
        }

        self.events_processed.fetch_add(1, Ordering::Relaxed);
        self.sampler.record_event_processed();

        info!(
            "Processed {} {} ({}): {} recovery attempts, last {:?}, {} notifications",
            event.category,
            event.severity,
            event.id,
            attempts.len(),
            attempts.last().map(|a| a.status),
            notifications.accepted
        );

        PipelineOutcome {
            classification,
            attempts,
            notifications,
            resolved,
        }
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn recovery(&self) -> &RecoveryOrchestrator {
        &self.recovery
    }

    pub fn dispatcher(&self) -> &NotificationDispatcher {
        &self.dispatcher
    }

    pub fn analytics(&self) -> &Arc<ErrorAnalytics> {
        &self.analytics
    }

    pub fn events_processed(&self) -> u64 {
        self.events_processed.load(Ordering::Relaxed)
    }
}

/// Handles for feeding raw signals to the detectors
#[derive(Clone)]
pub struct DetectorHandles {
    pub api: Arc<ApiDetector>,
    pub data_integrity: Arc<DataIntegrityDetector>,
    pub resource: Arc<ResourceDetector>,
    pub logic: Arc<LogicErrorDetector>,
    pub performance: Arc<PerformanceDetector>,
}

/// Point-in-time view of the running system
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SystemStatus {
    pub running: bool,
    pub events_processed: u64,
    pub recoveries_attempted: u64,
    pub recoveries_succeeded: u64,
    pub notifications_accepted: u64,
    /// Events emitted but not yet picked up by the drain worker
    pub queue_depth: usize,
    pub queued_notifications: usize,
    pub in_flight_recoveries: usize,
    pub active_escalations: usize,
    pub health_score: f64,
    pub active_workers: usize,
}

#[derive(Debug)]
struct QueueCounters {
    emitted: Arc<AtomicU64>,
    injected: AtomicU64,
    dequeued: AtomicU64,
}

impl QueueCounters {
    fn depth(&self) -> usize {
        let sent = self.emitted.load(Ordering::Relaxed) + self.injected.load(Ordering::Relaxed);
        sent.saturating_sub(self.dequeued.load(Ordering::Relaxed)) as usize
    }
}

/// The error-management pipeline with its background workers
pub struct ErrorManagementSystem {
    config: Config,
    pipeline: Arc<Pipeline>,
    detectors: DetectorHandles,
    pool: DetectorPool,
    sender: Sender<ErrorEvent>,
    receiver: Arc<Mutex<Receiver<ErrorEvent>>>,
    counters: Arc<QueueCounters>,
    sampler: SystemMetricsSampler,
    tasks: Vec<ScheduledTask>,
    running: bool,
}

impl ErrorManagementSystem {
    /// Build every component from configuration
    ///
    /// # Arguments
    ///
    /// * `config` - Full application configuration
    /// * `hooks` - Host remediation capability used by recovery strategies
    /// * `channels` - Delivery transports per channel kind
    ///
    /// # Errors
    ///
    /// Fails when the configured analytics store cannot be opened.
    pub fn new(
        config: Config,
        hooks: Arc<dyn RemediationHooks>,
        channels: ChannelTable,
    ) -> Result<Self, StoreError> {
        let analytics = Arc::new(ErrorAnalytics::from_config(&config.analytics)?);
        let sampler = SystemMetricsSampler::new();

        let classifier = Classifier::new(config.classifier.clone());
        let recovery = RecoveryOrchestrator::new(&config.recovery, hooks);
        let dispatcher = NotificationDispatcher::new(
            config.notifications.clone(),
            RecipientDirectory::from_config(&config.directory),
            channels,
        )
        .with_analytics(Arc::clone(&analytics));

        let pipeline = Arc::new(Pipeline::new(
            classifier,
            recovery,
            dispatcher,
            analytics,
            sampler.clone(),
        ));

        let detectors = DetectorHandles {
            api: Arc::new(ApiDetector::new(config.detectors.api.clone())),
            data_integrity: Arc::new(DataIntegrityDetector::new(
                config.detectors.data_integrity.clone(),
            )),
            resource: Arc::new(ResourceDetector::new(config.detectors.resource.clone())),
            logic: Arc::new(LogicErrorDetector::new(config.detectors.logic.clone())),
            performance: Arc::new(PerformanceDetector::new(
                config.detectors.performance.clone(),
            )),
        };

        let mut pool = DetectorPool::new();
        pool.add_detector(detectors.api.clone());
        pool.add_detector(detectors.data_integrity.clone());
        pool.add_detector(detectors.resource.clone());
        pool.add_detector(detectors.logic.clone());
        pool.add_detector(detectors.performance.clone());

        let counters = Arc::new(QueueCounters {
            emitted: pool.emitted_counter(),
            injected: AtomicU64::new(0),
            dequeued: AtomicU64::new(0),
        });

        let (sender, receiver) = mpsc::channel();

        info!(
            "Error management system initialized with {} detectors",
            pool.detector_count()
        );

        Ok(Self {
            config,
            pipeline,
            detectors,
            pool,
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            counters,
            sampler,
            tasks: Vec::new(),
            running: false,
        })
    }

    /// Start the detectors and every background worker
    pub fn start(&mut self) {
        if self.running {
            info!("Error management system already running, skipping start");
            return;
        }
        info!("Starting error management system");

        let workers = self.config.workers.clone();

        let pipeline = Arc::clone(&self.pipeline);
        let receiver = Arc::clone(&self.receiver);
        let counters = Arc::clone(&self.counters);
        self.tasks.push(ScheduledTask::spawn(
            "event_drain",
            Duration::from_millis(workers.drain_poll_ms),
            move || drain_events(&pipeline, &receiver, &counters).map(|_| ()),
        ));

        let pipeline = Arc::clone(&self.pipeline);
        let sampler = self.sampler.clone();
        self.tasks.push(ScheduledTask::spawn(
            "notification_drain",
            Duration::from_millis(workers.notification_drain_ms),
            move || {
                let report = pipeline.dispatcher().process_queue();
                for _ in 0..report.delivered {
                    sampler.record_notification_result(true);
                }
                for _ in 0..report.failed {
                    sampler.record_notification_result(false);
                }
                Ok::<(), Infallible>(())
            },
        ));

        let pipeline = Arc::clone(&self.pipeline);
        let sampler = self.sampler.clone();
        let counters = Arc::clone(&self.counters);
        let resource = Arc::clone(&self.detectors.resource);
        self.tasks.push(ScheduledTask::spawn(
            "metrics_sampler",
            Duration::from_secs(workers.metrics_interval_seconds),
            move || {
                let gauges = gauges(&pipeline, &counters, &resource);
                for metric in sampler.sample_at(Utc::now(), &gauges) {
                    pipeline.analytics().record_metric(&metric);
                }
                Ok::<(), Infallible>(())
            },
        ));

        let analytics = Arc::clone(self.pipeline.analytics());
        let retention = self.config.analytics.retention();
        self.tasks.push(ScheduledTask::spawn(
            "retention_sweep",
            Duration::from_secs(workers.retention_sweep_interval_seconds),
            move || analytics.purge_older_than(retention).map(|_| ()),
        ));

        let analytics = Arc::clone(self.pipeline.analytics());
        self.tasks.push(ScheduledTask::spawn(
            "daily_report",
            Duration::from_secs(workers.report_interval_seconds),
            move || log_daily_report(&analytics),
        ));

        self.pool.start(self.sender.clone());
        self.running = true;
        info!(
            "Error management system started ({} workers)",
            self.active_workers()
        );
    }

    /// Stop every worker and wait for them to exit
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        info!("Stopping error management system");

        self.pool.stop();
        for task in &mut self.tasks {
            task.stop();
        }
        self.tasks.clear();
        // Nothing drains the notification queue from here on
        self.pipeline.dispatcher().cancel_escalations();
        self.running = false;

        let pending = self.counters.depth();
        if pending > 0 {
            warn!("{} queued events were not processed before shutdown", pending);
        }
        info!("Error management system stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Inject a synthetic event for fire drills
    ///
    /// # Errors
    ///
    /// Returns `DetectorError::QueueClosed` when the event queue is gone.
    pub fn trigger_test_error(
        &self,
        category: ErrorCategory,
        severity: Severity,
    ) -> Result<ErrorEvent, DetectorError> {
        let event = ErrorEvent::new(
            category,
            severity,
            format!("Fire drill: simulated {} error", category),
            "fire_drill",
        )
        .with_detail("fire_drill", true);

        self.sender
            .send(event.clone())
            .map_err(|_| DetectorError::QueueClosed)?;
        self.counters.injected.fetch_add(1, Ordering::Relaxed);
        warn!("Fire drill event {} injected ({} / {})", event.id, category, severity);
        Ok(event)
    }

    /// Process every queued event on the calling thread
    ///
    /// # Errors
    ///
    /// Returns `DetectorError::QueueClosed` when the event queue is gone.
    pub fn process_pending(&self) -> Result<usize, DetectorError> {
        drain_events(&self.pipeline, &self.receiver, &self.counters)
    }

    pub fn status(&self) -> SystemStatus {
        let now = Utc::now();
        let inputs = self
            .pipeline
            .analytics()
            .health_inputs(now, chrono::Duration::hours(HEALTH_WINDOW_HOURS))
            .unwrap_or_else(|e| {
                warn!("Health inputs unavailable: {}", e);
                HealthInputs::default()
            });
        let recovery = self.pipeline.recovery();
        let dispatcher = self.pipeline.dispatcher();

        SystemStatus {
            running: self.running,
            events_processed: self.pipeline.events_processed(),
            recoveries_attempted: recovery.attempts_started(),
            recoveries_succeeded: recovery.attempts_succeeded(),
            notifications_accepted: dispatcher.stats().accepted,
            queue_depth: self.counters.depth(),
            queued_notifications: dispatcher.queue_depth(),
            in_flight_recoveries: recovery.in_flight_count(),
            active_escalations: dispatcher.active_escalations(),
            health_score: health_score(&inputs),
            active_workers: self.active_workers(),
        }
    }

    /// Live detector and worker threads
    pub fn active_workers(&self) -> usize {
        self.pool.running_count() + self.tasks.iter().filter(|t| t.is_running()).count()
    }

    pub fn detectors(&self) -> &DetectorHandles {
        &self.detectors
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl Drop for ErrorManagementSystem {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Pop and process events until the queue is empty
fn drain_events(
    pipeline: &Pipeline,
    receiver: &Mutex<Receiver<ErrorEvent>>,
    counters: &QueueCounters,
) -> Result<usize, DetectorError> {
    let mut processed = 0;
    loop {
        // Release the receiver while the event runs through the pipeline
        let next = receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .try_recv();
        match next {
            Ok(event) => {
                counters.dequeued.fetch_add(1, Ordering::Relaxed);
                pipeline.process(&event);
                processed += 1;
            }
            Err(TryRecvError::Empty) => return Ok(processed),
            Err(TryRecvError::Disconnected) => return Err(DetectorError::QueueClosed),
        }
    }
}

fn gauges(
    pipeline: &Pipeline,
    counters: &QueueCounters,
    resource: &ResourceDetector,
) -> PipelineGauges {
    PipelineGauges {
        queue_depth: counters.depth(),
        in_flight_recoveries: pipeline.recovery().in_flight_count(),
        active_escalations: pipeline.dispatcher().active_escalations(),
        queued_notifications: pipeline.dispatcher().queue_depth(),
        resource: resource.latest_sample(),
    }
}

fn log_daily_report(analytics: &ErrorAnalytics) -> Result<(), StoreError> {
    let date = (Utc::now() - chrono::Duration::days(1)).date_naive();
    let report = analytics.daily_report(date)?;
    info!(
        "Daily report {}: {} events, {} recovery attempts ({} succeeded), {} insights, health {:.1}",
        report.date,
        report.total_events,
        report.recovery.attempted,
        report.recovery.succeeded,
        report.insights.len(),
        report.health_score
    );
    for insight in &report.insights {
        info!("Insight: {}", insight.message);
    }
    debug!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
