//! Category-specific recovery strategies
//!
//! Each strategy decides which remediation steps to run for an event and in what
//! order; the steps themselves are carried out by [`RemediationHooks`].

use crate::events::{ClassificationResult, Details, ErrorCategory, ErrorEvent};
use crate::recovery::hooks::{RemediationHooks, RemediationStep};
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::Arc;

/// Result of running a strategy once
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryOutcome {
    pub success: bool,
    /// Name of the step that decided the outcome
    pub method: String,
    /// Per-step results keyed by step name
    pub details: Details,
    pub error_message: Option<String>,
}

/// Remediation logic for one error category
pub trait RecoveryStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn category(&self) -> ErrorCategory;

    fn execute(
        &self,
        event: &ErrorEvent,
        classification: &ClassificationResult,
        hooks: &dyn RemediationHooks,
    ) -> RecoveryOutcome;
}

/// Runs steps against the hooks and accumulates their results
struct StepRunner<'a> {
    hooks: &'a dyn RemediationHooks,
    event: &'a ErrorEvent,
    method: String,
    details: Details,
    error_message: Option<String>,
}

impl<'a> StepRunner<'a> {
    fn new(hooks: &'a dyn RemediationHooks, event: &'a ErrorEvent) -> Self {
        Self {
            hooks,
            event,
            method: String::new(),
            details: Details::new(),
            error_message: None,
        }
    }

    /// Run one step; returns whether it succeeded
    fn run(&mut self, step: RemediationStep) -> bool {
        self.method = step.name().to_string();
        match self.hooks.run_step(&step, self.event) {
            Ok(result) => {
                debug!("Step {} succeeded for event {}", step, self.event.id);
                self.details.insert(
                    step.name().to_string(),
                    serde_json::json!({ "success": true, "result": result }),
                );
                true
            }
            Err(e) => {
                warn!("Step {} failed for event {}: {}", step, self.event.id, e);
                self.details.insert(
                    step.name().to_string(),
                    serde_json::json!({ "success": false, "error": e.to_string() }),
                );
                self.error_message = Some(e.to_string());
                false
            }
        }
    }

    /// Run steps in order, stopping at the first failure
    fn run_all(&mut self, steps: impl IntoIterator<Item = RemediationStep>) -> bool {
        steps.into_iter().all(|step| self.run(step))
    }

    /// Run steps in order until one succeeds
    fn run_first(&mut self, steps: impl IntoIterator<Item = RemediationStep>) -> bool {
        steps.into_iter().any(|step| self.run(step))
    }

    fn finish(self, success: bool) -> RecoveryOutcome {
        RecoveryOutcome {
            success,
            method: self.method,
            details: self.details,
            error_message: if success { None } else { self.error_message },
        }
    }
}

/// Connectivity check, key failover for auth failures, reconnect, request back-off
pub struct ApiRecovery;

impl RecoveryStrategy for ApiRecovery {
    fn name(&self) -> &str {
        "api_recovery"
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::ApiFailure
    }

    fn execute(
        &self,
        event: &ErrorEvent,
        classification: &ClassificationResult,
        hooks: &dyn RemediationHooks,
    ) -> RecoveryOutcome {
        let mut runner = StepRunner::new(hooks, event);

        if classification.recovery_strategy == "request_backoff" {
            let ok = runner.run(RemediationStep::BackoffRequests);
            return runner.finish(ok);
        }

        let mut steps = vec![RemediationStep::CheckConnectivity];
        if classification.recovery_strategy == "api_key_failover" {
            steps.push(RemediationStep::FailoverApiKey);
        }
        steps.push(RemediationStep::Reconnect);
        steps.push(RemediationStep::BackoffRequests);

        let ok = runner.run_all(steps);
        runner.finish(ok)
    }
}

/// Tighten validation, then restore, switch source or re-collect, whichever works first
pub struct DataIntegrityRecovery;

impl RecoveryStrategy for DataIntegrityRecovery {
    fn name(&self) -> &str {
        "data_integrity_recovery"
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::DataIntegrity
    }

    fn execute(
        &self,
        event: &ErrorEvent,
        _classification: &ClassificationResult,
        hooks: &dyn RemediationHooks,
    ) -> RecoveryOutcome {
        let mut runner = StepRunner::new(hooks, event);
        let ok = runner.run(RemediationStep::TightenValidation)
            && runner.run_first([
                RemediationStep::RestoreFromBackup,
                RemediationStep::SwitchDataSource,
                RemediationStep::RecollectData,
            ]);
        runner.finish(ok)
    }
}

/// Free whichever resource is exhausted (all of them when unknown)
pub struct ResourceRecovery;

impl RecoveryStrategy for ResourceRecovery {
    fn name(&self) -> &str {
        "resource_recovery"
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::ResourceShortage
    }

    fn execute(
        &self,
        event: &ErrorEvent,
        _classification: &ClassificationResult,
        hooks: &dyn RemediationHooks,
    ) -> RecoveryOutcome {
        let steps = match event.detail_str("resource_type") {
            Some("memory") => vec![RemediationStep::FreeMemory],
            Some("disk") => vec![RemediationStep::FreeDisk],
            Some("cpu") => vec![RemediationStep::ReduceCpuLoad],
            _ => vec![
                RemediationStep::FreeMemory,
                RemediationStep::FreeDisk,
                RemediationStep::ReduceCpuLoad,
            ],
        };

        let mut runner = StepRunner::new(hooks, event);
        let ok = runner.run_all(steps);
        runner.finish(ok)
    }
}

/// Disable the offending component, then enter safe mode
pub struct LogicRecovery;

impl RecoveryStrategy for LogicRecovery {
    fn name(&self) -> &str {
        "logic_recovery"
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::LogicError
    }

    fn execute(
        &self,
        event: &ErrorEvent,
        _classification: &ClassificationResult,
        hooks: &dyn RemediationHooks,
    ) -> RecoveryOutcome {
        let mut steps = Vec::new();
        if let Some(component) = event.detail_str("component") {
            steps.push(RemediationStep::DisableComponent(component.to_string()));
        }
        steps.push(RemediationStep::EnableSafeMode);

        let mut runner = StepRunner::new(hooks, event);
        let ok = runner.run_all(steps);
        runner.finish(ok)
    }
}

/// Clear caches, rebalance load, strengthen monitoring
pub struct PerformanceRecovery;

impl RecoveryStrategy for PerformanceRecovery {
    fn name(&self) -> &str {
        "performance_recovery"
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::PerformanceDegradation
    }

    fn execute(
        &self,
        event: &ErrorEvent,
        _classification: &ClassificationResult,
        hooks: &dyn RemediationHooks,
    ) -> RecoveryOutcome {
        let mut runner = StepRunner::new(hooks, event);
        let ok = runner.run_all([
            RemediationStep::ClearCaches,
            RemediationStep::RebalanceLoad,
            RemediationStep::StrengthenMonitoring,
        ]);
        runner.finish(ok)
    }
}

/// Category -> strategy lookup table
pub type StrategyTable = HashMap<ErrorCategory, Arc<dyn RecoveryStrategy>>;

/// One built-in strategy per category
pub fn default_strategies() -> StrategyTable {
    let strategies: [Arc<dyn RecoveryStrategy>; 5] = [
        Arc::new(ApiRecovery),
        Arc::new(DataIntegrityRecovery),
        Arc::new(ResourceRecovery),
        Arc::new(LogicRecovery),
        Arc::new(PerformanceRecovery),
    ];
    strategies
        .into_iter()
        .map(|strategy| (strategy.category(), strategy))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::Classifier;
    use crate::config::ClassifierConfig;
    use crate::error::RecoveryError;
    use crate::events::Severity;
    use crate::recovery::hooks::MockRemediationHooks;
    use mockall::predicate::eq;
    use mockall::Sequence;

    fn classify(event: &ErrorEvent) -> ClassificationResult {
        Classifier::new(ClassifierConfig::default())
            .classify(event, &crate::classifier::ClassificationHistory::default())
    }

    fn failing(step: &RemediationStep) -> Result<Details, RecoveryError> {
        Err(RecoveryError::StepFailed {
            step: step.name().to_string(),
            reason: "unavailable".to_string(),
        })
    }

    #[test]
    fn test_every_category_has_a_strategy() {
        let table = default_strategies();
        for category in ErrorCategory::ALL {
            assert_eq!(table[&category].category(), category);
        }
    }

    #[test]
    fn test_api_auth_failure_runs_failover_in_order() {
        let event = ErrorEvent::new(
            ErrorCategory::ApiFailure,
            Severity::High,
            "401 Unauthorized",
            "test",
        );
        let classification = classify(&event);
        assert_eq!(classification.recovery_strategy, "api_key_failover");

        let mut hooks = MockRemediationHooks::new();
        let mut seq = Sequence::new();
        for step in [
            RemediationStep::CheckConnectivity,
            RemediationStep::FailoverApiKey,
            RemediationStep::Reconnect,
            RemediationStep::BackoffRequests,
        ] {
            hooks
                .expect_run_step()
                .with(eq(step), mockall::predicate::always())
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_, _| Ok(Details::new()));
        }

        let outcome = ApiRecovery.execute(&event, &classification, &hooks);
        assert!(outcome.success);
        assert_eq!(outcome.method, "backoff_requests");
        assert_eq!(outcome.details.len(), 4);
    }

    #[test]
    fn test_rate_limit_goes_straight_to_backoff() {
        let event = ErrorEvent::new(
            ErrorCategory::ApiFailure,
            Severity::High,
            "429 Too Many Requests",
            "test",
        );
        let classification = classify(&event);

        let mut hooks = MockRemediationHooks::new();
        hooks
            .expect_run_step()
            .with(eq(RemediationStep::BackoffRequests), mockall::predicate::always())
            .times(1)
            .returning(|_, _| Ok(Details::new()));

        let outcome = ApiRecovery.execute(&event, &classification, &hooks);
        assert!(outcome.success);
        assert_eq!(outcome.method, "backoff_requests");
    }

    #[test]
    fn test_api_reconnect_failure_stops_chain() {
        let event = ErrorEvent::new(ErrorCategory::ApiFailure, Severity::High, "refused", "test");
        let classification = classify(&event);

        let mut hooks = MockRemediationHooks::new();
        hooks
            .expect_run_step()
            .withf(|step, _| *step == RemediationStep::Reconnect)
            .times(1)
            .returning(|step, _| failing(step));
        hooks
            .expect_run_step()
            .withf(|step, _| *step == RemediationStep::CheckConnectivity)
            .times(1)
            .returning(|_, _| Ok(Details::new()));

        let outcome = ApiRecovery.execute(&event, &classification, &hooks);
        assert!(!outcome.success);
        assert_eq!(outcome.method, "reconnect");
        assert!(outcome.error_message.unwrap().contains("unavailable"));
        assert!(!outcome.details.contains_key("backoff_requests"));
    }

    #[test]
    fn test_data_integrity_falls_back_to_next_source() {
        let event = ErrorEvent::new(ErrorCategory::DataIntegrity, Severity::High, "bad rows", "test");
        let classification = classify(&event);

        let mut hooks = MockRemediationHooks::new();
        hooks
            .expect_run_step()
            .withf(|step, _| *step == RemediationStep::RestoreFromBackup)
            .times(1)
            .returning(|step, _| failing(step));
        hooks
            .expect_run_step()
            .withf(|step, _| {
                matches!(
                    step,
                    RemediationStep::TightenValidation | RemediationStep::SwitchDataSource
                )
            })
            .times(2)
            .returning(|_, _| Ok(Details::new()));

        let outcome = DataIntegrityRecovery.execute(&event, &classification, &hooks);
        assert!(outcome.success);
        assert_eq!(outcome.method, "switch_data_source");
        assert!(outcome.error_message.is_none());
        assert!(!outcome.details.contains_key("recollect_data"));
    }

    #[test]
    fn test_resource_targets_reported_resource() {
        let event = ErrorEvent::new(ErrorCategory::ResourceShortage, Severity::High, "disk", "test")
            .with_detail("resource_type", "disk");
        let classification = classify(&event);

        let mut hooks = MockRemediationHooks::new();
        hooks
            .expect_run_step()
            .with(eq(RemediationStep::FreeDisk), mockall::predicate::always())
            .times(1)
            .returning(|_, _| Ok(Details::new()));

        assert!(ResourceRecovery.execute(&event, &classification, &hooks).success);
    }

    #[test]
    fn test_resource_without_type_frees_everything() {
        let event = ErrorEvent::new(ErrorCategory::ResourceShortage, Severity::High, "low", "test");
        let classification = classify(&event);

        let mut hooks = MockRemediationHooks::new();
        hooks
            .expect_run_step()
            .times(3)
            .returning(|_, _| Ok(Details::new()));

        let outcome = ResourceRecovery.execute(&event, &classification, &hooks);
        assert!(outcome.success);
        assert_eq!(outcome.details.len(), 3);
    }

    #[test]
    fn test_logic_disables_component() {
        let event = ErrorEvent::new(ErrorCategory::LogicError, Severity::High, "NaN", "test")
            .with_detail("component", "position_sizer");
        let classification = classify(&event);

        let mut hooks = MockRemediationHooks::new();
        let mut seq = Sequence::new();
        hooks
            .expect_run_step()
            .with(
                eq(RemediationStep::DisableComponent("position_sizer".to_string())),
                mockall::predicate::always(),
            )
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(Details::new()));
        hooks
            .expect_run_step()
            .with(eq(RemediationStep::EnableSafeMode), mockall::predicate::always())
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(Details::new()));

        assert!(LogicRecovery.execute(&event, &classification, &hooks).success);
    }

    #[test]
    fn test_performance_chain() {
        let event =
            ErrorEvent::new(ErrorCategory::PerformanceDegradation, Severity::Medium, "slow", "test");
        let classification = classify(&event);

        let mut hooks = MockRemediationHooks::new();
        hooks
            .expect_run_step()
            .withf(|step, _| *step == RemediationStep::RebalanceLoad)
            .returning(|step, _| failing(step));
        hooks
            .expect_run_step()
            .withf(|step, _| *step == RemediationStep::ClearCaches)
            .times(1)
            .returning(|_, _| Ok(Details::new()));

        let outcome = PerformanceRecovery.execute(&event, &classification, &hooks);
        assert!(!outcome.success);
        assert_eq!(outcome.method, "rebalance_load");
    }
}
