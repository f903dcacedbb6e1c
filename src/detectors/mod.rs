/// Bounded rolling sample window shared by all detectors
pub mod window;

/// Detector trait and the pool that schedules detector polls
pub mod pool;

/// API call outcome and latency detector
pub mod api;

/// Data validation detector
pub mod data_integrity;

/// CPU / memory / disk usage detector
pub mod resource;

/// Application logic error detector
pub mod logic;

/// Generic performance metric detector
pub mod performance;

pub use api::{ApiCallSample, ApiDetector};
pub use data_integrity::{DataIntegrityDetector, ValidationSample};
pub use logic::{LogicErrorDetector, LogicErrorSample};
pub use performance::{PerformanceDetector, PerformanceSample};
pub use pool::{Detector, DetectorPool};
pub use resource::{ResourceDetector, ResourceSample};
pub use window::{RollingWindow, Timestamped};
