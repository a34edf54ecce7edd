//! Fire event model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Alarm, Geofence};

/// Source of a fire event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FireKind {
    Alarm,
    Geofence,
}

/// Broadcast to the UI whenever an alarm or geofence fires
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FireEvent {
    pub id: String,
    pub title: String,
    pub body: String,
    pub fired_at: DateTime<Utc>,
    pub kind: FireKind,
    /// Scheduled occurrence (alarms) in Unix ms
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurrence: Option<i64>,
    /// Transition direction (geofences)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entering: Option<bool>,
}

impl FireEvent {
    pub fn for_alarm(alarm: &Alarm, occurrence: i64, fired_at: DateTime<Utc>) -> Self {
        Self {
            id: alarm.id.to_string(),
            title: alarm.title.clone(),
            body: alarm.body.clone(),
            fired_at,
            kind: FireKind::Alarm,
            occurrence: Some(occurrence),
            entering: None,
        }
    }

    pub fn for_geofence(geofence: &Geofence, entering: bool, fired_at: DateTime<Utc>) -> Self {
        Self {
            id: geofence.id.to_string(),
            title: geofence.name.clone(),
            body: geofence.message_for(entering),
            fired_at,
            kind: FireKind::Geofence,
            occurrence: None,
            entering: Some(entering),
        }
    }
}
