use crate::config::RecoveryConfig;
use crate::error::RecoveryError;
use crate::events::{
    ClassificationResult, ErrorCategory, ErrorEvent, ErrorKey, RecoveryAction, RecoveryAttempt,
    RecoveryStatus, Timestamp,
};
use crate::rate_limiter::WindowCounter;
use crate::recovery::hooks::RemediationHooks;
use crate::recovery::strategies::{default_strategies, RecoveryStrategy, StrategyTable};
use crate::scheduling::{run_with_timeout, TimeoutError};
use chrono::Utc;
use log::{debug, error, info, warn};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

type InFlightSet = Arc<Mutex<HashSet<ErrorKey>>>;

/// Marks an error key as being recovered; the mark is removed on drop
struct InFlightGuard {
    set: InFlightSet,
    key: ErrorKey,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut set = self.set.lock().unwrap_or_else(PoisonError::into_inner);
        set.remove(&self.key);
    }
}

/// Executes category-specific recovery strategies
///
/// At most one attempt runs per error key at a time, each category is limited to
/// the classification's attempt budget within the configured window, and every
/// attempt is time-boxed.
pub struct RecoveryOrchestrator {
    hooks: Arc<dyn RemediationHooks>,
    strategies: StrategyTable,
    timeout: Duration,
    in_flight: InFlightSet,
    budget: WindowCounter<ErrorCategory>,
    attempts_started: AtomicU64,
    attempts_succeeded: AtomicU64,
}

impl RecoveryOrchestrator {
    /// Create an orchestrator with the built-in strategies
    pub fn new(config: &RecoveryConfig, hooks: Arc<dyn RemediationHooks>) -> Self {
        Self::with_strategies(config, hooks, default_strategies())
    }

    pub fn with_strategies(
        config: &RecoveryConfig,
        hooks: Arc<dyn RemediationHooks>,
        strategies: StrategyTable,
    ) -> Self {
        Self {
            hooks,
            strategies,
            timeout: config.recovery_timeout(),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            budget: WindowCounter::new(config.budget_window()),
            attempts_started: AtomicU64::new(0),
            attempts_succeeded: AtomicU64::new(0),
        }
    }

    /// Override the per-attempt time budget
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Register or replace the strategy for its category
    pub fn register_strategy(&mut self, strategy: Arc<dyn RecoveryStrategy>) {
        self.strategies.insert(strategy.category(), strategy);
    }

    /// Make one recovery attempt for `event`
    ///
    /// Always returns a terminal attempt: `Skipped` when recovery is not permitted,
    /// already running or out of budget, otherwise the strategy's outcome.
    pub fn attempt_recovery(
        &self,
        event: &ErrorEvent,
        classification: &ClassificationResult,
    ) -> RecoveryAttempt {
        self.attempt_recovery_at(event, classification, Utc::now())
    }

    pub fn attempt_recovery_at(
        &self,
        event: &ErrorEvent,
        classification: &ClassificationResult,
        now: Timestamp,
    ) -> RecoveryAttempt {
        let mut attempt = RecoveryAttempt::pending(event, classification);

        if classification.action != RecoveryAction::AutoRecover {
            return skipped(
                attempt,
                format!(
                    "action {:?} does not permit automated recovery",
                    classification.action
                ),
            );
        }

        let Some(_guard) = self.begin(event.key()) else {
            return skipped(attempt, "recovery already in progress".to_string());
        };

        let budget = classification.auto_recovery_attempts as usize;
        if !self.budget.try_record_at(&event.category, now, budget) {
            return skipped(
                attempt,
                format!(
                    "recovery budget exhausted ({} attempts per window for {})",
                    budget, event.category
                ),
            );
        }

        self.attempts_started.fetch_add(1, Ordering::Relaxed);
        attempt.status = RecoveryStatus::InProgress;

        let Some(strategy) = self.strategies.get(&event.category).cloned() else {
            let e = RecoveryError::NoStrategy(event.category.to_string());
            error!("{}", e);
            attempt.error_message = Some(e.to_string());
            attempt.finish(RecoveryStatus::Failed);
            return attempt;
        };

        info!(
            "Running {} for {} (attempt {})",
            strategy.name(),
            event.key(),
            attempt.id
        );

        let hooks = Arc::clone(&self.hooks);
        let owned_event = event.clone();
        let owned_classification = classification.clone();
        let task_strategy = Arc::clone(&strategy);
        let result = run_with_timeout(self.timeout, move || {
            task_strategy.execute(&owned_event, &owned_classification, hooks.as_ref())
        });

        attempt
            .result_details
            .insert("strategy".to_string(), strategy.name().into());

        match result {
            Ok(outcome) => {
                if !outcome.method.is_empty() {
                    attempt.method = outcome.method;
                }
                attempt
                    .result_details
                    .insert("steps".to_string(), serde_json::json!(outcome.details));
                attempt.error_message = outcome.error_message;
                if outcome.success {
                    self.attempts_succeeded.fetch_add(1, Ordering::Relaxed);
                    attempt.finish(RecoveryStatus::Success);
                    info!("Recovery succeeded for {}", event.key());
                } else {
                    attempt.finish(RecoveryStatus::Failed);
                    warn!(
                        "Recovery failed for {}: {}",
                        event.key(),
                        attempt.error_message.as_deref().unwrap_or("unknown error")
                    );
                }
            }
            Err(TimeoutError::Elapsed) => {
                attempt.error_message = Some(format!(
                    "recovery exceeded its {}s time budget",
                    self.timeout.as_secs_f64()
                ));
                attempt.finish(RecoveryStatus::Timeout);
                warn!("Recovery timed out for {}", event.key());
            }
            Err(TimeoutError::Panicked) => {
                attempt.error_message = Some("recovery strategy panicked".to_string());
                attempt.finish(RecoveryStatus::Failed);
                error!("Recovery strategy {} panicked for {}", strategy.name(), event.key());
            }
        }

        attempt
    }

    /// Attempt recovery repeatedly until it succeeds or is skipped
    ///
    /// The budget bounds the number of real attempts, so the last attempt is
    /// either `Success` or a `Skipped` one recording why recovery stopped.
    pub fn recover(
        &self,
        event: &ErrorEvent,
        classification: &ClassificationResult,
    ) -> Vec<RecoveryAttempt> {
        let mut attempts = Vec::new();
        loop {
            let attempt = self.attempt_recovery(event, classification);
            let status = attempt.status;
            attempts.push(attempt);
            if matches!(status, RecoveryStatus::Success | RecoveryStatus::Skipped) {
                break;
            }
            debug!("Retrying recovery for {} after {:?}", event.key(), status);
        }
        attempts
    }

    pub fn is_in_flight(&self, key: &ErrorKey) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Attempts that actually ran a strategy
    pub fn attempts_started(&self) -> u64 {
        self.attempts_started.load(Ordering::Relaxed)
    }

    pub fn attempts_succeeded(&self) -> u64 {
        self.attempts_succeeded.load(Ordering::Relaxed)
    }

    /// Attempts charged to `category` in the current budget window
    pub fn budget_used_at(&self, category: ErrorCategory, now: Timestamp) -> usize {
        self.budget.count_at(&category, now)
    }

    fn begin(&self, key: ErrorKey) -> Option<InFlightGuard> {
        let mut set = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !set.insert(key) {
            return None;
        }
        Some(InFlightGuard {
            set: Arc::clone(&self.in_flight),
            key,
        })
    }
}

fn skipped(mut attempt: RecoveryAttempt, reason: String) -> RecoveryAttempt {
    debug!("Skipping recovery for {}: {}", attempt.error_id, reason);
    attempt.error_message = Some(reason);
    attempt.finish(RecoveryStatus::Skipped);
    attempt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{ClassificationHistory, Classifier};
    use crate::config::ClassifierConfig;
    use crate::events::{Details, Severity};
    use crate::recovery::hooks::{LoggingHooks, MockRemediationHooks, RemediationStep};
    use crate::recovery::strategies::RecoveryOutcome;
    use std::thread;

    fn classify(event: &ErrorEvent) -> ClassificationResult {
        Classifier::new(ClassifierConfig::default()).classify(event, &ClassificationHistory::default())
    }

    fn api_event() -> ErrorEvent {
        ErrorEvent::new(
            ErrorCategory::ApiFailure,
            Severity::High,
            "Exchange connection refused",
            "test",
        )
    }

    fn always_failing_hooks() -> Arc<dyn RemediationHooks> {
        let mut hooks = MockRemediationHooks::new();
        hooks.expect_run_step().returning(|step, _| {
            Err(RecoveryError::StepFailed {
                step: step.name().to_string(),
                reason: "still broken".to_string(),
            })
        });
        Arc::new(hooks)
    }

    struct SlowHooks(Duration);

    impl RemediationHooks for SlowHooks {
        fn run_step(
            &self,
            _step: &RemediationStep,
            _event: &ErrorEvent,
        ) -> Result<Details, RecoveryError> {
            thread::sleep(self.0);
            Ok(Details::new())
        }
    }

    struct PanickingStrategy;

    impl RecoveryStrategy for PanickingStrategy {
        fn name(&self) -> &str {
            "panicking"
        }

        fn category(&self) -> ErrorCategory {
            ErrorCategory::ApiFailure
        }

        fn execute(
            &self,
            _event: &ErrorEvent,
            _classification: &ClassificationResult,
            _hooks: &dyn RemediationHooks,
        ) -> RecoveryOutcome {
            panic!("strategy bug")
        }
    }

    #[test]
    fn test_monitor_action_is_skipped() {
        let orchestrator = RecoveryOrchestrator::new(&RecoveryConfig::default(), Arc::new(LoggingHooks));
        let event = ErrorEvent::new(ErrorCategory::DataIntegrity, Severity::Medium, "stale", "test");
        let classification = classify(&event);
        assert_eq!(classification.action, RecoveryAction::Monitor);

        let attempt = orchestrator.attempt_recovery(&event, &classification);
        assert_eq!(attempt.status, RecoveryStatus::Skipped);
        assert!(attempt
            .error_message
            .unwrap()
            .contains("does not permit automated recovery"));
        assert_eq!(orchestrator.attempts_started(), 0);
    }

    #[test]
    fn test_successful_recovery() {
        let orchestrator = RecoveryOrchestrator::new(&RecoveryConfig::default(), Arc::new(LoggingHooks));
        let event = api_event();
        let classification = classify(&event);

        let attempts = orchestrator.recover(&event, &classification);
        assert_eq!(attempts.len(), 1);
        let attempt = &attempts[0];
        assert_eq!(attempt.status, RecoveryStatus::Success);
        assert_eq!(attempt.error_id, event.id);
        assert_eq!(attempt.priority, classification.priority);
        assert_eq!(attempt.method, "backoff_requests");
        assert_eq!(attempt.result_details["strategy"], "api_recovery");
        assert!(attempt.end_time.is_some());
        assert_eq!(orchestrator.attempts_succeeded(), 1);
        assert_eq!(orchestrator.in_flight_count(), 0);
    }

    #[test]
    fn test_failing_strategy_exhausts_budget() {
        let orchestrator =
            RecoveryOrchestrator::new(&RecoveryConfig::default(), always_failing_hooks());
        let event = api_event();
        let classification = classify(&event);
        assert_eq!(classification.auto_recovery_attempts, 2);

        let attempts = orchestrator.recover(&event, &classification);
        let statuses: Vec<RecoveryStatus> = attempts.iter().map(|a| a.status).collect();
        assert_eq!(
            statuses,
            vec![
                RecoveryStatus::Failed,
                RecoveryStatus::Failed,
                RecoveryStatus::Skipped
            ]
        );
        assert!(attempts[2]
            .error_message
            .as_deref()
            .unwrap()
            .contains("recovery budget exhausted"));

        let again = orchestrator.attempt_recovery(&event, &classification);
        assert_eq!(again.status, RecoveryStatus::Skipped);
        assert_eq!(
            orchestrator.budget_used_at(ErrorCategory::ApiFailure, Utc::now()),
            2
        );
    }

    #[test]
    fn test_budget_window_expires() {
        let orchestrator =
            RecoveryOrchestrator::new(&RecoveryConfig::default(), always_failing_hooks());
        let event = api_event();
        let classification = classify(&event);
        let now = Utc::now();

        for _ in 0..2 {
            let attempt = orchestrator.attempt_recovery_at(&event, &classification, now);
            assert_eq!(attempt.status, RecoveryStatus::Failed);
        }
        let blocked = orchestrator.attempt_recovery_at(&event, &classification, now);
        assert_eq!(blocked.status, RecoveryStatus::Skipped);

        let later = now + chrono::Duration::minutes(11);
        let retried = orchestrator.attempt_recovery_at(&event, &classification, later);
        assert_eq!(retried.status, RecoveryStatus::Failed);
    }

    #[test]
    fn test_concurrent_attempt_is_skipped() {
        let orchestrator = Arc::new(RecoveryOrchestrator::new(
            &RecoveryConfig::default(),
            Arc::new(SlowHooks(Duration::from_millis(100))),
        ));
        let event = api_event();
        let classification = classify(&event);

        let first = {
            let orchestrator = Arc::clone(&orchestrator);
            let event = event.clone();
            let classification = classification.clone();
            thread::spawn(move || orchestrator.attempt_recovery(&event, &classification))
        };
        thread::sleep(Duration::from_millis(50));
        assert!(orchestrator.is_in_flight(&event.key()));

        let second = orchestrator.attempt_recovery(&event, &classification);
        assert_eq!(second.status, RecoveryStatus::Skipped);
        assert_eq!(
            second.error_message.as_deref(),
            Some("recovery already in progress")
        );

        let first = first.join().unwrap();
        assert_eq!(first.status, RecoveryStatus::Success);
        assert!(!orchestrator.is_in_flight(&event.key()));
        assert_eq!(orchestrator.attempts_started(), 1);
    }

    #[test]
    fn test_distinct_events_run_concurrently() {
        let orchestrator = Arc::new(RecoveryOrchestrator::new(
            &RecoveryConfig::default(),
            Arc::new(SlowHooks(Duration::from_millis(20))),
        ));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let orchestrator = Arc::clone(&orchestrator);
                thread::spawn(move || {
                    let event = api_event();
                    let classification = classify(&event);
                    orchestrator.attempt_recovery(&event, &classification).status
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), RecoveryStatus::Success);
        }
    }

    #[test]
    fn test_slow_strategy_times_out() {
        let orchestrator = RecoveryOrchestrator::new(
            &RecoveryConfig::default(),
            Arc::new(SlowHooks(Duration::from_millis(500))),
        )
        .with_timeout(Duration::from_millis(50));
        let event = api_event();
        let classification = classify(&event);

        let attempt = orchestrator.attempt_recovery(&event, &classification);
        assert_eq!(attempt.status, RecoveryStatus::Timeout);
        assert!(attempt.error_message.is_some());
        assert_eq!(orchestrator.in_flight_count(), 0);
    }

    #[test]
    fn test_panicking_strategy_is_failed() {
        let mut orchestrator =
            RecoveryOrchestrator::new(&RecoveryConfig::default(), Arc::new(LoggingHooks));
        orchestrator.register_strategy(Arc::new(PanickingStrategy));
        let event = api_event();
        let classification = classify(&event);

        let attempt = orchestrator.attempt_recovery(&event, &classification);
        assert_eq!(attempt.status, RecoveryStatus::Failed);
        assert_eq!(
            attempt.error_message.as_deref(),
            Some("recovery strategy panicked")
        );
        assert_eq!(orchestrator.in_flight_count(), 0);
    }

    #[test]
    fn test_missing_strategy_is_failed() {
        let orchestrator = RecoveryOrchestrator::with_strategies(
            &RecoveryConfig::default(),
            Arc::new(LoggingHooks),
            StrategyTable::new(),
        );
        let event = api_event();
        let classification = classify(&event);

        let attempt = orchestrator.attempt_recovery(&event, &classification);
        assert_eq!(attempt.status, RecoveryStatus::Failed);
        assert!(attempt.error_message.unwrap().contains("No recovery strategy"));
    }
}
