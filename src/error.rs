use crate::events::ChannelKind;
use thiserror::Error;

/// Errors that can occur while a detector polls its window
#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Detector poll failed: {0}")]
    PollFailed(String),

    #[error("Event queue closed")]
    QueueClosed,
}

/// Errors raised by recovery strategies and remediation hooks
#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("Remediation step '{step}' failed: {reason}")]
    StepFailed { step: String, reason: String },

    #[error("No recovery strategy registered for {0}")]
    NoStrategy(String),
}

/// Errors that can occur when delivering a notification through a channel
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("Delivery failed: {0}")]
    Failed(String),

    #[error("Delivery timed out")]
    Timeout,

    #[error("No channel configured for {0:?}")]
    ChannelUnavailable(ChannelKind),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors that can occur in the analytics record store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid configuration value: {0}")]
    ValidationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}
