//! Notification text rendering
//!
//! The template is picked from the recovery outcome first and the priority
//! second. Titles and bodies are truncated on UTF-8 character boundaries so
//! rendered text always fits channel limits.

use crate::events::{
    ClassificationResult, ErrorEvent, Priority, RecoveryAttempt, RecoveryStatus,
};
use std::time::Duration;

/// Maximum title length in bytes
pub const MAX_TITLE_BYTES: usize = 256;
/// Maximum body length in bytes
pub const MAX_BODY_BYTES: usize = 2048;

/// Detail entries shown in a message body
const MAX_DETAILS_SHOWN: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    RecoverySuccess,
    RecoveryFailed,
    Critical,
    High,
    Standard,
    Escalation,
}

impl TemplateKind {
    /// Choose the template for an event outcome
    pub fn select(
        classification: &ClassificationResult,
        recovery: Option<&RecoveryAttempt>,
    ) -> Self {
        match recovery.map(|attempt| attempt.status) {
            Some(RecoveryStatus::Success) => TemplateKind::RecoverySuccess,
            Some(RecoveryStatus::Failed) | Some(RecoveryStatus::Timeout) => {
                TemplateKind::RecoveryFailed
            }
            _ => match classification.priority {
                Priority::P0 => TemplateKind::Critical,
                Priority::P1 => TemplateKind::High,
                _ => TemplateKind::Standard,
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TemplateKind::RecoverySuccess => "recovery_success",
            TemplateKind::RecoveryFailed => "recovery_failed",
            TemplateKind::Critical => "critical",
            TemplateKind::High => "high",
            TemplateKind::Standard => "standard",
            TemplateKind::Escalation => "escalation",
        }
    }
}

/// Render the notification text for an event
pub fn render(
    kind: TemplateKind,
    event: &ErrorEvent,
    classification: &ClassificationResult,
    recovery: Option<&RecoveryAttempt>,
) -> String {
    let title = match kind {
        TemplateKind::RecoverySuccess => format!("[RESOLVED] {}", event.message),
        TemplateKind::RecoveryFailed => format!("[RECOVERY FAILED] {}", event.message),
        TemplateKind::Critical => format!("[CRITICAL {}] {}", classification.priority, event.message),
        TemplateKind::High => format!("[HIGH {}] {}", classification.priority, event.message),
        TemplateKind::Standard => format!("[{}] {}", classification.priority, event.message),
        TemplateKind::Escalation => format!("[ESCALATION] {}", event.message),
    };

    let mut body = String::new();
    body.push_str(&format!(
        "Category: {}\nSeverity: {}\nPriority: {}\nAction: {:?}\n",
        event.category, event.severity, classification.priority, classification.action
    ));
    if !classification.business_impact.is_empty() {
        body.push_str(&format!("Impact: {}\n", classification.business_impact));
    }

    match kind {
        TemplateKind::RecoverySuccess | TemplateKind::RecoveryFailed => {
            if let Some(attempt) = recovery {
                body.push_str(&format!(
                    "Recovery: {:?} via {}\n",
                    attempt.status, attempt.method
                ));
                if let Some(ref message) = attempt.error_message {
                    body.push_str(&format!("Reason: {}\n", message));
                }
                if let Some(duration) = attempt.duration() {
                    body.push_str(&format!(
                        "Duration: {:.1}s\n",
                        duration.num_milliseconds() as f64 / 1000.0
                    ));
                }
            }
        }
        _ => {
            body.push_str(&format!(
                "Strategy: {}\nEstimated recovery: {}\nEscalates after: {}\n",
                classification.recovery_strategy,
                format_duration(classification.estimated_recovery_time),
                format_duration(classification.escalation_timeout)
            ));
        }
    }

    if !event.details.is_empty() {
        body.push_str("Details:\n");
        for (key, value) in event.details.iter().take(MAX_DETAILS_SHOWN) {
            body.push_str(&format!("  {}: {}\n", key, value));
        }
        if event.details.len() > MAX_DETAILS_SHOWN {
            body.push_str(&format!(
                "  ... and {} more\n",
                event.details.len() - MAX_DETAILS_SHOWN
            ));
        }
    }
    body.push_str(&format!(
        "Event: {} at {} ({})",
        event.id,
        event.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
        event.source
    ));

    compose(&title, &body)
}

/// Render the message sent when an error stays unresolved past its timeout
pub fn render_escalation(
    event: &ErrorEvent,
    classification: &ClassificationResult,
    unresolved_for: Duration,
) -> String {
    let title = format!("[ESCALATION] Unresolved {}: {}", event.category, event.message);
    let body = format!(
        "This error has been unresolved for {}.\nOriginal priority: {}\nSeverity: {}\nImpact: {}\nContacts: {}\nEvent: {} at {}",
        format_duration(unresolved_for),
        classification.priority,
        event.severity,
        classification.business_impact,
        classification.escalation_contacts.join(", "),
        event.id,
        event.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
    );
    compose(&title, &body)
}

fn compose(title: &str, body: &str) -> String {
    format!(
        "{}\n\n{}",
        truncate_text(title, MAX_TITLE_BYTES),
        truncate_text(body.trim(), MAX_BODY_BYTES)
    )
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 3600 && secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs >= 60 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

/// Truncate text to at most `max_length` bytes, ending with "..." when cut
///
/// Cuts only on UTF-8 character boundaries.
pub fn truncate_text(text: &str, max_length: usize) -> String {
    if text.len() <= max_length {
        return text.to_string();
    }
    if max_length < 3 {
        return ".".repeat(max_length);
    }

    let mut truncate_at = max_length - 3;
    while truncate_at > 0 && !text.is_char_boundary(truncate_at) {
        truncate_at -= 1;
    }
    format!("{}...", &text[..truncate_at])
}
