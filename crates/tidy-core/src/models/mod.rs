//! Data models for Tidy

mod alarm;
mod event;
mod geofence;
mod sync_change;

pub use alarm::{
    Alarm, AlarmId, AlarmRequest, AlarmState, Backend, EventReminder, Recurrence,
    DEFAULT_REMINDER_LEAD, DEFAULT_REMINDER_MINUTES, FIRED_OCCURRENCE_HISTORY,
};
pub use event::{FireEvent, FireKind};
pub use geofence::{
    Geofence, GeofenceDraft, GeofenceId, GeofencePatch, Position, TriggerType,
};
pub use sync_change::{ChangeKind, NewSyncChange, SyncChange, SyncChangeId};
