//! Alarm model

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::util::parse_timestamp;

/// How many fired occurrences an alarm remembers for deduplication.
pub const FIRED_OCCURRENCE_HISTORY: usize = 16;

/// Lead times, in minutes, given to an event without explicit reminders.
pub const DEFAULT_REMINDER_MINUTES: [u32; 3] = [60, 15, 5];

/// Lead time of a single reminder when none is given.
pub const DEFAULT_REMINDER_LEAD: u32 = 15;

/// Low bits of a reminder id that hold its lead time.
const REMINDER_LEAD_BITS: u32 = 16;

/// Caller-assigned alarm identifier (the backend element id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlarmId(pub i64);

impl fmt::Display for AlarmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AlarmId {
    /// Id of the reminder that fires `minutes_before` an event starts.
    ///
    /// Reminder ids are negative so they never collide with element ids.
    pub fn reminder(event_id: i64, minutes_before: u32) -> Result<Self> {
        if event_id <= 0 {
            return Err(Error::InvalidInput(format!(
                "event id must be positive, got {event_id}"
            )));
        }
        if minutes_before >= 1 << REMINDER_LEAD_BITS {
            return Err(Error::InvalidInput(format!(
                "reminder lead of {minutes_before} minutes is too long"
            )));
        }
        let packed = event_id
            .checked_mul(1 << REMINDER_LEAD_BITS)
            .ok_or_else(|| Error::InvalidInput(format!("event id {event_id} is too large")))?;
        Ok(Self(-(packed | i64::from(minutes_before))))
    }

    /// `(event_id, minutes_before)` when this id names a reminder.
    pub fn reminder_parts(self) -> Option<(i64, u32)> {
        let packed = self.0.checked_neg().filter(|packed| *packed > 0)?;
        let minutes = u32::try_from(packed & ((1 << REMINDER_LEAD_BITS) - 1)).ok()?;
        let event_id = packed >> REMINDER_LEAD_BITS;
        (event_id > 0).then_some((event_id, minutes))
    }
}

impl FromStr for AlarmId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(s.trim().parse()?))
    }
}

/// Repetition period of an alarm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Recurrence {
    /// Fires once
    #[default]
    None,
    Minutely,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Recurrence {
    /// Whether the alarm produces more than one occurrence.
    pub const fn is_recurring(self) -> bool {
        !matches!(self, Self::None)
    }

    /// Next occurrence after `previous`, one period later.
    ///
    /// Always computed from the previous scheduled time so that firing latency
    /// never accumulates. Month and year steps clamp to the end of shorter
    /// months (Jan 31 + 1 month = Feb 28/29).
    pub fn advance(self, previous: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::None => None,
            Self::Minutely => previous.checked_add_signed(Duration::minutes(1)),
            Self::Hourly => previous.checked_add_signed(Duration::hours(1)),
            Self::Daily => previous.checked_add_signed(Duration::days(1)),
            Self::Weekly => previous.checked_add_signed(Duration::weeks(1)),
            Self::Monthly => previous.checked_add_months(Months::new(1)),
            Self::Yearly => previous.checked_add_months(Months::new(12)),
        }
    }

    /// First occurrence strictly after `now`, stepping from `previous`.
    pub fn next_after(self, previous: DateTime<Utc>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut next = self.advance(previous)?;
        while next <= now {
            next = self.advance(next)?;
        }
        Some(next)
    }
}

impl FromStr for Recurrence {
    type Err = Error;

    /// Accepts the English names plus the backend's Spanish frequency labels.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" | "ninguna" => Ok(Self::None),
            "minutely" | "cada_minuto" => Ok(Self::Minutely),
            "hourly" | "cada_hora" => Ok(Self::Hourly),
            "daily" | "diaria" => Ok(Self::Daily),
            "weekly" | "semanal" => Ok(Self::Weekly),
            "monthly" | "mensual" => Ok(Self::Monthly),
            "yearly" | "anual" => Ok(Self::Yearly),
            other => Err(Error::InvalidInput(format!(
                "unknown recurrence '{other}'"
            ))),
        }
    }
}

impl fmt::Display for Recurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::None => "none",
            Self::Minutely => "minutely",
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
        };
        f.write_str(label)
    }
}

/// Where an alarm currently is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlarmState {
    /// Known but not handed to any platform backend (polling only)
    #[default]
    Unscheduled,
    /// Handed to a platform backend
    Armed,
    /// Current occurrence fired and nothing follows it
    Fired,
    /// Occurrence left the polling window without being observed
    Expired,
}

impl fmt::Display for AlarmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Unscheduled => "unscheduled",
            Self::Armed => "armed",
            Self::Fired => "fired",
            Self::Expired => "expired",
        };
        f.write_str(label)
    }
}

/// Which notification backend holds an armed alarm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Platform exact-alarm facility, survives the process
    Exact,
    /// Generic local-notification facility
    Local,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact => f.write_str("exact"),
            Self::Local => f.write_str("local"),
        }
    }
}

/// A time-based alarm owned by the scheduler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alarm {
    pub id: AlarmId,
    pub title: String,
    pub body: String,
    /// Scheduled time of the current occurrence
    pub trigger_at: DateTime<Utc>,
    #[serde(default)]
    pub recurrence: Recurrence,
    #[serde(default = "default_active")]
    pub active: bool,
    /// Occurrence timestamps (Unix ms) already fired
    #[serde(default)]
    pub fired_occurrences: BTreeSet<i64>,
    #[serde(default)]
    pub state: AlarmState,
    #[serde(default)]
    pub armed_via: Option<Backend>,
}

const fn default_active() -> bool {
    true
}

impl Alarm {
    /// Create an active alarm that has not been scheduled yet.
    pub fn new(
        id: AlarmId,
        title: impl Into<String>,
        body: impl Into<String>,
        trigger_at: DateTime<Utc>,
        recurrence: Recurrence,
    ) -> Self {
        Self {
            id,
            title: title.into(),
            body: body.into(),
            trigger_at,
            recurrence,
            active: true,
            fired_occurrences: BTreeSet::new(),
            state: AlarmState::Unscheduled,
            armed_via: None,
        }
    }

    /// Occurrence key of the current trigger time.
    pub fn occurrence_key(&self) -> i64 {
        self.trigger_at.timestamp_millis()
    }

    /// Whether the given occurrence already produced a fire event.
    pub fn has_fired(&self, occurrence: i64) -> bool {
        self.fired_occurrences.contains(&occurrence)
    }

    /// Record an occurrence as fired.
    ///
    /// Returns `false` when it was already recorded; callers must treat that
    /// as "do not fire". Old entries are trimmed to a bounded history.
    pub fn mark_fired(&mut self, occurrence: i64) -> bool {
        if !self.fired_occurrences.insert(occurrence) {
            return false;
        }
        while self.fired_occurrences.len() > FIRED_OCCURRENCE_HISTORY {
            self.fired_occurrences.pop_first();
        }
        true
    }

    /// Whether this alarm may be handed to a platform backend at `now`.
    pub fn is_armable(&self, now: DateTime<Utc>) -> bool {
        self.active && self.trigger_at > now
    }
}

/// Schedule request coming from the domain stores
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmRequest {
    pub id: AlarmId,
    pub title: String,
    #[serde(default)]
    pub body: String,
    /// RFC 3339 or `YYYY-MM-DD HH:MM[:SS]`
    pub trigger_at: String,
    #[serde(default)]
    pub recurrence: Recurrence,
}

impl AlarmRequest {
    /// Validate the request and build the alarm it describes.
    ///
    /// Empty titles and bodies get the app's default wording.
    pub fn into_alarm(self) -> Result<Alarm> {
        let trigger_at = parse_timestamp(&self.trigger_at).ok_or_else(|| {
            Error::InvalidSchedule(format!("malformed trigger time '{}'", self.trigger_at))
        })?;
        let title = if self.title.trim().is_empty() {
            "Tidy alarm".to_string()
        } else {
            self.title.trim().to_string()
        };
        let body = if self.body.trim().is_empty() {
            "It's time for your alarm".to_string()
        } else {
            self.body.trim().to_string()
        };
        Ok(Alarm::new(self.id, title, body, trigger_at, self.recurrence))
    }
}

/// Calendar event that lead-time reminders are derived from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventReminder {
    pub event_id: i64,
    pub title: String,
    #[serde(default)]
    pub details: String,
    /// RFC 3339 or `YYYY-MM-DD HH:MM[:SS]`
    pub starts_at: String,
}

impl EventReminder {
    pub fn start_time(&self) -> Result<DateTime<Utc>> {
        parse_timestamp(&self.starts_at).ok_or_else(|| {
            Error::InvalidSchedule(format!(
                "malformed start time '{}' for event {}",
                self.starts_at, self.event_id
            ))
        })
    }

    /// One-shot alarm request for the reminder firing at `trigger_at`.
    pub fn reminder_request(
        &self,
        trigger_at: DateTime<Utc>,
        minutes_before: u32,
    ) -> Result<AlarmRequest> {
        let lead = match minutes_before {
            0 => "now".to_string(),
            60 => "in 1 hour".to_string(),
            minutes => format!("in {minutes} minutes"),
        };
        let mut body = format!("Your event starts {lead}");
        if !self.details.trim().is_empty() {
            body.push('\n');
            body.push_str(self.details.trim());
        }
        Ok(AlarmRequest {
            id: AlarmId::reminder(self.event_id, minutes_before)?,
            title: format!("Reminder: {}", self.title.trim()),
            body,
            trigger_at: trigger_at.to_rfc3339(),
            recurrence: Recurrence::None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn advance_adds_exactly_one_period() {
        let base = at(2025, 1, 10, 8, 0);
        assert_eq!(Recurrence::None.advance(base), None);
        assert_eq!(Recurrence::Minutely.advance(base), Some(at(2025, 1, 10, 8, 1)));
        assert_eq!(Recurrence::Hourly.advance(base), Some(at(2025, 1, 10, 9, 0)));
        assert_eq!(Recurrence::Daily.advance(base), Some(at(2025, 1, 11, 8, 0)));
        assert_eq!(Recurrence::Weekly.advance(base), Some(at(2025, 1, 17, 8, 0)));
        assert_eq!(Recurrence::Monthly.advance(base), Some(at(2025, 2, 10, 8, 0)));
        assert_eq!(Recurrence::Yearly.advance(base), Some(at(2026, 1, 10, 8, 0)));
    }

    #[test]
    fn monthly_advance_clamps_to_month_end() {
        let end_of_january = at(2025, 1, 31, 6, 0);
        assert_eq!(
            Recurrence::Monthly.advance(end_of_january),
            Some(at(2025, 2, 28, 6, 0))
        );
    }

    #[test]
    fn next_after_skips_missed_occurrences_without_drift() {
        let base = at(2025, 1, 1, 7, 0);
        let now = at(2025, 1, 4, 12, 0);
        assert_eq!(
            Recurrence::Daily.next_after(base, now),
            Some(at(2025, 1, 5, 7, 0))
        );
    }

    #[test]
    fn recurrence_parses_backend_labels() {
        assert_eq!("diaria".parse::<Recurrence>().unwrap(), Recurrence::Daily);
        assert_eq!("semanal".parse::<Recurrence>().unwrap(), Recurrence::Weekly);
        assert_eq!("cada_hora".parse::<Recurrence>().unwrap(), Recurrence::Hourly);
        assert_eq!("Monthly".parse::<Recurrence>().unwrap(), Recurrence::Monthly);
        assert!("fortnightly".parse::<Recurrence>().is_err());
    }

    #[test]
    fn mark_fired_reports_duplicates() {
        let mut alarm = Alarm::new(AlarmId(1), "t", "b", at(2025, 1, 1, 0, 0), Recurrence::None);
        let key = alarm.occurrence_key();
        assert!(alarm.mark_fired(key));
        assert!(!alarm.mark_fired(key));
        assert!(alarm.has_fired(key));
    }

    #[test]
    fn mark_fired_keeps_bounded_history() {
        let mut alarm = Alarm::new(AlarmId(1), "t", "b", at(2025, 1, 1, 0, 0), Recurrence::Minutely);
        for occurrence in 0..40 {
            alarm.mark_fired(occurrence);
        }
        assert_eq!(alarm.fired_occurrences.len(), FIRED_OCCURRENCE_HISTORY);
        assert!(alarm.has_fired(39));
        assert!(!alarm.has_fired(0));
    }

    #[test]
    fn request_rejects_malformed_time() {
        let request = AlarmRequest {
            id: AlarmId(7),
            title: "Standup".to_string(),
            body: String::new(),
            trigger_at: "not a date".to_string(),
            recurrence: Recurrence::None,
        };
        assert!(matches!(
            request.into_alarm(),
            Err(Error::InvalidSchedule(_))
        ));
    }

    #[test]
    fn request_fills_default_wording() {
        let request = AlarmRequest {
            id: AlarmId(7),
            title: "  ".to_string(),
            body: String::new(),
            trigger_at: "2030-05-01 09:00".to_string(),
            recurrence: Recurrence::Daily,
        };
        let alarm = request.into_alarm().unwrap();
        assert_eq!(alarm.title, "Tidy alarm");
        assert_eq!(alarm.body, "It's time for your alarm");
        assert_eq!(alarm.trigger_at, at(2030, 5, 1, 9, 0));
        assert!(alarm.active);
        assert_eq!(alarm.state, AlarmState::Unscheduled);
    }

    #[test]
    fn alarm_id_parses_from_text() {
        assert_eq!(" 42 ".parse::<AlarmId>().unwrap(), AlarmId(42));
        assert!("abc".parse::<AlarmId>().is_err());
    }

    #[test]
    fn reminder_ids_are_negative_and_decode() {
        let id = AlarmId::reminder(42, 15).unwrap();
        assert!(id.0 < 0);
        assert_eq!(id.reminder_parts(), Some((42, 15)));
        assert_ne!(AlarmId::reminder(42, 5).unwrap(), id);
        assert_eq!(AlarmId::reminder(1, 0).unwrap().reminder_parts(), Some((1, 0)));

        assert_eq!(AlarmId(42).reminder_parts(), None);
        assert_eq!(AlarmId(i64::MIN).reminder_parts(), None);
        assert!(AlarmId::reminder(0, 15).is_err());
        assert!(AlarmId::reminder(7, 70_000).is_err());
        assert!(AlarmId::reminder(i64::MAX, 5).is_err());
    }

    #[test]
    fn reminder_wording_follows_lead_time() {
        let event = EventReminder {
            event_id: 3,
            title: "Dentist".to_string(),
            details: "Bring the insurance card".to_string(),
            starts_at: "2025-03-10 09:00".to_string(),
        };
        let starts = event.start_time().unwrap();
        assert_eq!(starts, at(2025, 3, 10, 9, 0));

        let hour = event
            .reminder_request(starts - Duration::minutes(60), 60)
            .unwrap();
        assert_eq!(hour.title, "Reminder: Dentist");
        assert_eq!(hour.body, "Your event starts in 1 hour\nBring the insurance card");
        assert_eq!(hour.id.reminder_parts(), Some((3, 60)));

        let now = event.reminder_request(starts, 0).unwrap();
        assert!(now.body.starts_with("Your event starts now"));
        let five = event.reminder_request(starts, 5).unwrap();
        assert!(five.body.starts_with("Your event starts in 5 minutes"));

        let broken = EventReminder {
            starts_at: "tomorrow".to_string(),
            ..event
        };
        assert!(matches!(broken.start_time(), Err(Error::InvalidSchedule(_))));
    }
}
