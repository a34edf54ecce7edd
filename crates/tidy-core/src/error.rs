//! Error types for tidy-core

use thiserror::Error;

/// Result type alias using tidy-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in tidy-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Notification or location permission was not granted
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Trigger time is in the past or could not be parsed
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// Network or platform call failed; safe to retry
    #[error("Transport failure: {0}")]
    Transport(String),

    /// A queued change used up every automatic retry
    #[error("Change {change_id} failed after {attempts} attempts: {reason}")]
    ExhaustedRetries {
        change_id: String,
        attempts: u32,
        reason: String,
    },

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the failure may succeed if the same operation is retried later.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}
