/// Error classification: severity, pattern, business-time and recurrence rules
pub mod engine;
pub mod history;
pub mod rules;

pub use engine::Classifier;
pub use history::{ClassificationHistory, HistoryEntry};
pub use rules::{
    default_base_rule, default_base_rules, default_pattern_rules, BaseRule, BaseRuleTable,
    PatternRule,
};
