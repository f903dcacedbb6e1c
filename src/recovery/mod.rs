/// Remediation hooks implemented by the host application
pub mod hooks;

/// One recovery strategy per error category
pub mod strategies;

/// Mutual exclusion, budgets and time-boxing around strategy execution
pub mod orchestrator;

pub use hooks::{LoggingHooks, RemediationHooks, RemediationStep};
pub use orchestrator::RecoveryOrchestrator;
pub use strategies::{default_strategies, RecoveryOutcome, RecoveryStrategy, StrategyTable};
