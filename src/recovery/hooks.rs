use crate::error::RecoveryError;
use crate::events::{Details, ErrorEvent};
use log::info;
use std::fmt;

/// A single remediation action a recovery strategy can ask the host to perform
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RemediationStep {
    CheckConnectivity,
    FailoverApiKey,
    Reconnect,
    BackoffRequests,
    TightenValidation,
    RestoreFromBackup,
    SwitchDataSource,
    RecollectData,
    FreeMemory,
    FreeDisk,
    ReduceCpuLoad,
    /// Disable the named component (strategy, calculator, ...)
    DisableComponent(String),
    EnableSafeMode,
    ClearCaches,
    RebalanceLoad,
    StrengthenMonitoring,
}

impl RemediationStep {
    pub fn name(&self) -> &'static str {
        match self {
            RemediationStep::CheckConnectivity => "check_connectivity",
            RemediationStep::FailoverApiKey => "failover_api_key",
            RemediationStep::Reconnect => "reconnect",
            RemediationStep::BackoffRequests => "backoff_requests",
            RemediationStep::TightenValidation => "tighten_validation",
            RemediationStep::RestoreFromBackup => "restore_from_backup",
            RemediationStep::SwitchDataSource => "switch_data_source",
            RemediationStep::RecollectData => "recollect_data",
            RemediationStep::FreeMemory => "free_memory",
            RemediationStep::FreeDisk => "free_disk",
            RemediationStep::ReduceCpuLoad => "reduce_cpu_load",
            RemediationStep::DisableComponent(_) => "disable_component",
            RemediationStep::EnableSafeMode => "enable_safe_mode",
            RemediationStep::ClearCaches => "clear_caches",
            RemediationStep::RebalanceLoad => "rebalance_load",
            RemediationStep::StrengthenMonitoring => "strengthen_monitoring",
        }
    }
}

impl fmt::Display for RemediationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemediationStep::DisableComponent(component) => {
                write!(f, "{}({})", self.name(), component)
            }
            _ => f.write_str(self.name()),
        }
    }
}

/// Remediation capability implemented by the host application
///
/// Recovery strategies decide *which* steps to run; the host decides *how*.
/// Implementations must be safe to call from the recovery worker thread while
/// detectors keep running.
#[cfg_attr(test, mockall::automock)]
pub trait RemediationHooks: Send + Sync {
    /// Perform one remediation step for `event`
    ///
    /// # Errors
    ///
    /// Returns `RecoveryError::StepFailed` when the step could not be completed.
    fn run_step(&self, step: &RemediationStep, event: &ErrorEvent) -> Result<Details, RecoveryError>;
}

/// Default hooks that log every step and report success
///
/// Used for fire drills and when the host registers no remediation of its own.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHooks;

impl RemediationHooks for LoggingHooks {
    fn run_step(&self, step: &RemediationStep, event: &ErrorEvent) -> Result<Details, RecoveryError> {
        info!(
            "Remediation step {} for {} event {}",
            step, event.category, event.id
        );
        let mut details = Details::new();
        details.insert("step".to_string(), step.to_string().into());
        details.insert("simulated".to_string(), true.into());
        Ok(details)
    }
}
