use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] tidy_core::Error),
    #[error(transparent)]
    Remote(#[from] tidy_core::sync::RemoteError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Alarm not found: {0}")]
    AlarmNotFound(i64),
    #[error("Geofence not found: {0}")]
    GeofenceNotFound(String),
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
    #[error("No user id given. Pass --user or run `tidy config init --user-id <ID>`.")]
    MissingUser,
}
