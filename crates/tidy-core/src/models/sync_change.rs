//! Offline change model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Locally generated, stable identifier of a queued change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncChangeId(Uuid);

impl SyncChangeId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for SyncChangeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SyncChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SyncChangeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s.trim())?))
    }
}

/// Kind of mutation waiting to be replayed against the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeKind {
    CreateElement,
    UpdateElement,
    DeleteElement,
    UpdateProfile,
    CreateMessage,
}

impl FromStr for ChangeKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "create-element" => Ok(Self::CreateElement),
            "update-element" => Ok(Self::UpdateElement),
            "delete-element" => Ok(Self::DeleteElement),
            "update-profile" | "update-user-profile" => Ok(Self::UpdateProfile),
            "create-message" => Ok(Self::CreateMessage),
            other => Err(Error::InvalidInput(format!("unknown change kind '{other}'"))),
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::CreateElement => "create-element",
            Self::UpdateElement => "update-element",
            Self::DeleteElement => "delete-element",
            Self::UpdateProfile => "update-profile",
            Self::CreateMessage => "create-message",
        };
        f.write_str(label)
    }
}

/// A mutation recorded while offline or after a failed write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncChange {
    pub id: SyncChangeId,
    pub user_id: String,
    pub kind: ChangeKind,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub synced: bool,
    /// Terminal failure; the change is kept but never retried automatically
    #[serde(default)]
    pub sync_error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub synced_at: Option<DateTime<Utc>>,
    /// Earliest time the next automatic attempt may run
    #[serde(default)]
    pub next_attempt_at: Option<DateTime<Utc>>,
}

impl SyncChange {
    /// Still waiting for an automatic attempt (not synced, no terminal error).
    pub const fn is_pending(&self) -> bool {
        !self.synced && self.sync_error.is_none()
    }

    /// Whether an automatic drain may attempt the change at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_pending() && self.next_attempt_at.map_or(true, |at| at <= now)
    }
}

/// Input for enqueuing a change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSyncChange {
    pub user_id: String,
    pub kind: ChangeKind,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub description: Option<String>,
}

impl NewSyncChange {
    /// Queue a created element (payload carries the caller-assigned id when known).
    pub fn create_element(user_id: impl Into<String>, element: serde_json::Value) -> Self {
        let description = describe_element("Create", &element);
        Self {
            user_id: user_id.into(),
            kind: ChangeKind::CreateElement,
            payload: element,
            description: Some(description),
        }
    }

    pub fn update_element(user_id: impl Into<String>, element: serde_json::Value) -> Self {
        let description = describe_element("Update", &element);
        Self {
            user_id: user_id.into(),
            kind: ChangeKind::UpdateElement,
            payload: element,
            description: Some(description),
        }
    }

    pub fn delete_element(user_id: impl Into<String>, element_id: i64) -> Self {
        Self {
            user_id: user_id.into(),
            kind: ChangeKind::DeleteElement,
            payload: serde_json::json!({ "id": element_id }),
            description: Some(format!("Delete element {element_id}")),
        }
    }

    pub fn update_profile(user_id: impl Into<String>, profile: serde_json::Value) -> Self {
        Self {
            user_id: user_id.into(),
            kind: ChangeKind::UpdateProfile,
            payload: profile,
            description: Some("Update user profile".to_string()),
        }
    }

    pub fn create_message(
        user_id: impl Into<String>,
        chat_id: impl Into<String>,
        message: serde_json::Value,
    ) -> Self {
        let chat_id = chat_id.into();
        Self {
            user_id: user_id.into(),
            kind: ChangeKind::CreateMessage,
            payload: serde_json::json!({ "chatId": chat_id, "message": message }),
            description: Some(format!("Send message in chat {chat_id}")),
        }
    }

    /// Turn the input into a fresh change with a new id.
    pub fn into_change(self, now: DateTime<Utc>) -> SyncChange {
        SyncChange {
            id: SyncChangeId::new(),
            user_id: self.user_id.trim().to_string(),
            kind: self.kind,
            payload: self.payload,
            description: self.description,
            attempts: 0,
            synced: false,
            sync_error: None,
            created_at: now,
            synced_at: None,
            next_attempt_at: None,
        }
    }
}

fn describe_element(verb: &str, element: &serde_json::Value) -> String {
    let kind = element
        .get("tipo")
        .and_then(serde_json::Value::as_str)
        .unwrap_or("element");
    let name = element
        .get("nombre")
        .and_then(serde_json::Value::as_str)
        .unwrap_or("untitled");
    format!("{verb} {kind}: {name}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn kind_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_string(&ChangeKind::CreateElement).unwrap(),
            "\"create-element\""
        );
        assert_eq!(
            "UPDATE_USER_PROFILE".parse::<ChangeKind>().unwrap(),
            ChangeKind::UpdateProfile
        );
    }

    #[test]
    fn due_respects_backoff_and_terminal_states() {
        let now = Utc::now();
        let mut change = NewSyncChange::delete_element("u1", 9).into_change(now);
        assert!(change.is_due(now));

        change.next_attempt_at = Some(now + Duration::seconds(2));
        assert!(!change.is_due(now));
        assert!(change.is_due(now + Duration::seconds(2)));

        change.sync_error = Some("boom".to_string());
        assert!(!change.is_due(now + Duration::seconds(10)));
        assert!(!change.is_pending());
    }

    #[test]
    fn element_descriptions_use_backend_fields() {
        let change = NewSyncChange::create_element(
            "u1",
            json!({ "id": 3, "tipo": "nota", "nombre": "Groceries" }),
        );
        assert_eq!(change.description.as_deref(), Some("Create nota: Groceries"));

        let fallback = NewSyncChange::update_element("u1", json!({ "id": 3 }));
        assert_eq!(
            fallback.description.as_deref(),
            Some("Update element: untitled")
        );
    }

    #[test]
    fn message_payload_carries_chat_id() {
        let change = NewSyncChange::create_message("u1", "chat-9", json!({ "text": "hi" }));
        assert_eq!(change.payload["chatId"], "chat-9");
        assert_eq!(change.payload["message"]["text"], "hi");
    }
}
