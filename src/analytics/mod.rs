/// Append-only record stores
pub mod store;

/// Trend, insight, health-score and report queries
pub mod analyzer;

/// Periodic self-monitoring metrics
pub mod sampler;

pub use analyzer::{
    health_score, ChannelPerformance, DailyReport, ErrorAnalytics, HealthInputs, Insight,
    InsightKind, RecoveryPerformance, Snapshot, TrendPoint,
};
pub use sampler::{PipelineGauges, SystemMetricsSampler};
pub use store::{JsonLinesStore, MemoryStore, Record, RecordStore};
