//! Error types for Synheart Nudge

use thiserror::Error;

/// Errors that can occur while evaluating or dispatching insights
#[derive(Debug, Error)]
pub enum InsightError {
    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Date parse error: {0}")]
    DateParseError(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("History unavailable: {0}")]
    HistoryUnavailable(String),

    #[error("Environmental source '{source_name}' failed: {message}")]
    SourceFailed { source_name: String, message: String },

    #[error("Malformed reading from '{source_name}': {message}")]
    MalformedReading { source_name: String, message: String },

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Notification scheduling failed: {0}")]
    NotificationFailed(String),
}
