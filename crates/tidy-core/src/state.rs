//! Shared cross-platform state types.

use serde::Serialize;

/// Unified sync state shown by clients next to the sync indicator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Offline,
    Syncing,
    Error,
    Pending,
    Synced,
}

impl SyncState {
    /// Short human label for status lines.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Syncing => "syncing",
            Self::Error => "sync error",
            Self::Pending => "changes pending",
            Self::Synced => "synced",
        }
    }
}
