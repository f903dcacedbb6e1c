/// Error types for every pipeline stage
pub mod error;

/// Shared event, classification, recovery and notification types
pub mod events;

/// Configuration management
pub mod config;

/// Periodic workers, cancellation and time-boxed execution
pub mod scheduling;

/// Sliding-window counters and per-channel rate limits
pub mod rate_limiter;

/// Error detectors and the pool that polls them
pub mod detectors;

/// Rule-based error classification
pub mod classifier;

/// Automated recovery strategies and their orchestration
pub mod recovery;

/// Notification routing, delivery and escalation
pub mod notifications;

/// Persistent records, trends, insights and self-monitoring
pub mod analytics;

/// Wiring of every component into the running pipeline
pub mod system;

// Re-export commonly used types
pub use error::{ConfigError, DeliveryError, DetectorError, RecoveryError, StoreError};
pub use system::{ErrorManagementSystem, PipelineOutcome, SystemStatus};
