/// Delivery transports
pub mod channel;

/// Role to address lookup
pub mod directory;

/// Admission, queueing, retries and escalation
pub mod dispatcher;

/// One-shot per-error escalation timers
pub mod escalation;

/// Duplicate notification suppression
pub mod suppression;

/// Message text rendering
pub mod templates;

pub use channel::{default_channels, Channel, ChannelTable, LogChannel, WebhookChannel};
pub use directory::RecipientDirectory;
pub use dispatcher::{DispatcherStats, NotificationDispatcher, ProcessReport, SendReport};
pub use escalation::EscalationTimers;
pub use suppression::{DuplicateSuppressor, SuppressionKey};
pub use templates::{truncate_text, TemplateKind};
