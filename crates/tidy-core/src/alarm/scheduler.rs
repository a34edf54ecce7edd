//! Alarm catalogue, arming and the polling sweep.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::db::{load_json, save_json, KeyValueStore, ALARMS_KEY};
use crate::error::{Error, Result};
use crate::events::EventBus;
use crate::models::{
    Alarm, AlarmId, AlarmRequest, AlarmState, Backend, EventReminder, FireEvent,
};
use crate::notify::{ArmResult, NotificationBridge};

/// How a schedule request ended up being delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "backend")]
pub enum ScheduleOutcome {
    Armed(Backend),
    /// No backend took the alarm; only the polling sweep will fire it
    PollingOnly,
    /// Cancelled or replaced while the arm call was in flight
    Superseded,
}

impl fmt::Display for ScheduleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Armed(backend) => write!(f, "armed ({backend})"),
            Self::PollingOnly => f.write_str("polling only"),
            Self::Superseded => f.write_str("superseded"),
        }
    }
}

/// What has to happen at the platform after a fire or expiry
enum FollowUp {
    Nothing,
    Rearm,
    Disarm,
}

#[derive(Default)]
struct Catalogue {
    alarms: BTreeMap<AlarmId, Alarm>,
    /// Bumped on every arm, cancel and reschedule of an id
    generations: HashMap<AlarmId, u64>,
    next_generation: u64,
}

impl Catalogue {
    fn bump(&mut self, id: AlarmId) -> u64 {
        self.next_generation += 1;
        self.generations.insert(id, self.next_generation);
        self.next_generation
    }

    fn is_current(&self, id: AlarmId, generation: u64) -> bool {
        self.generations.get(&id) == Some(&generation)
    }

    fn alarm_mut(&mut self, id: AlarmId) -> Result<&mut Alarm> {
        self.alarms
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("alarm {id}")))
    }
}

struct Inner {
    bridge: Arc<NotificationBridge>,
    store: Arc<dyn KeyValueStore>,
    bus: EventBus,
    tolerance: Duration,
    catalogue: Mutex<Catalogue>,
    persist_lock: tokio::sync::Mutex<()>,
}

/// Owns the alarms and guarantees at most one fire per occurrence
#[derive(Clone)]
pub struct AlarmScheduler {
    inner: Arc<Inner>,
}

impl AlarmScheduler {
    pub fn new(
        bridge: Arc<NotificationBridge>,
        store: Arc<dyn KeyValueStore>,
        bus: EventBus,
        tolerance: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                bridge,
                store,
                bus,
                tolerance,
                catalogue: Mutex::new(Catalogue::default()),
                persist_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    fn catalogue(&self) -> Result<MutexGuard<'_, Catalogue>> {
        self.inner
            .catalogue
            .lock()
            .map_err(|_| Error::Database("alarm catalogue lock poisoned".to_string()))
    }

    pub fn bridge(&self) -> &NotificationBridge {
        &self.inner.bridge
    }

    /// Restore persisted alarms. A corrupted snapshot starts empty.
    pub async fn load(&self) -> Result<usize> {
        let alarms = match load_json::<Vec<Alarm>>(self.inner.store.as_ref(), ALARMS_KEY).await {
            Ok(alarms) => alarms.unwrap_or_default(),
            Err(Error::Serialization(error)) => {
                tracing::warn!("Discarding unreadable alarm snapshot: {}", error);
                Vec::new()
            }
            Err(error) => return Err(error),
        };

        let mut catalogue = self.catalogue()?;
        catalogue.alarms = alarms.into_iter().map(|alarm| (alarm.id, alarm)).collect();
        tracing::info!("Loaded {} alarms", catalogue.alarms.len());
        Ok(catalogue.alarms.len())
    }

    /// Validate, store and arm an alarm.
    ///
    /// A past trigger time fails before any platform call. When no backend
    /// accepts the alarm it is kept for the polling sweep.
    pub async fn schedule(&self, request: AlarmRequest) -> Result<ScheduleOutcome> {
        let alarm = request.into_alarm()?;
        let now = Utc::now();
        if alarm.trigger_at <= now {
            return Err(Error::InvalidSchedule(format!(
                "trigger time {} is not in the future",
                alarm.trigger_at.to_rfc3339()
            )));
        }

        let (generation, replaced) = {
            let mut catalogue = self.catalogue()?;
            let replaced = catalogue.alarms.insert(alarm.id, alarm.clone()).is_some();
            (catalogue.bump(alarm.id), replaced)
        };
        if replaced {
            self.inner.bridge.disarm(alarm.id).await;
        }
        self.persist().await?;

        tracing::info!(
            "Scheduling alarm {} for {} ({})",
            alarm.id,
            alarm.trigger_at.to_rfc3339(),
            alarm.recurrence
        );
        Ok(self.arm_current(alarm, generation).await)
    }

    /// Cancel and reschedule in one call.
    pub async fn update(&self, request: AlarmRequest) -> Result<ScheduleOutcome> {
        self.cancel(request.id).await?;
        self.schedule(request).await
    }

    /// Disarm and forget an alarm. Unknown ids are a no-op.
    pub async fn cancel(&self, id: AlarmId) -> Result<bool> {
        let existed = {
            let mut catalogue = self.catalogue()?;
            catalogue.generations.remove(&id);
            catalogue.alarms.remove(&id).is_some()
        };
        self.inner.bridge.disarm(id).await;
        if existed {
            self.persist().await?;
            tracing::info!("Cancelled alarm {}", id);
        }
        Ok(existed)
    }

    /// Enable or disable an alarm without forgetting it.
    pub async fn set_active(&self, id: AlarmId, active: bool) -> Result<()> {
        let now = Utc::now();
        let armable = {
            let mut catalogue = self.catalogue()?;
            let alarm = catalogue.alarm_mut(id)?;
            alarm.active = active;
            alarm.armed_via = None;
            if active {
                if alarm.trigger_at <= now && alarm.recurrence.is_recurring() {
                    if let Some(next) = alarm.recurrence.next_after(alarm.trigger_at, now) {
                        alarm.trigger_at = next;
                    }
                }
                if alarm.trigger_at > now {
                    alarm.state = AlarmState::Unscheduled;
                }
            } else {
                alarm.fired_occurrences.clear();
                if alarm.state == AlarmState::Armed {
                    alarm.state = AlarmState::Unscheduled;
                }
            }
            let snapshot = alarm.clone();
            let generation = catalogue.bump(id);
            snapshot
                .is_armable(now)
                .then_some((snapshot, generation))
        };

        if !active {
            self.inner.bridge.disarm(id).await;
        }
        self.persist().await?;
        if let Some((alarm, generation)) = armable {
            self.arm_current(alarm, generation).await;
        }
        Ok(())
    }

    /// Arm one reminder `minutes_before` an event starts.
    ///
    /// Returns `None` when that moment is already past.
    pub async fn schedule_reminder(
        &self,
        event: &EventReminder,
        minutes_before: u32,
    ) -> Result<Option<ScheduleOutcome>> {
        let starts_at = event.start_time()?;
        let trigger_at = starts_at - Duration::minutes(i64::from(minutes_before));
        if trigger_at <= Utc::now() {
            tracing::debug!(
                "Skipping reminder {} minutes before event {}, already past",
                minutes_before,
                event.event_id
            );
            return Ok(None);
        }
        let request = event.reminder_request(trigger_at, minutes_before)?;
        self.schedule(request).await.map(Some)
    }

    /// Replace an event's reminders with one per lead time.
    pub async fn schedule_reminders(
        &self,
        event: &EventReminder,
        lead_minutes: &[u32],
    ) -> Result<Vec<(AlarmId, ScheduleOutcome)>> {
        event.start_time()?;
        self.cancel_reminders(event.event_id).await?;

        let mut scheduled = Vec::new();
        let mut seen = BTreeSet::new();
        for &minutes in lead_minutes {
            if !seen.insert(minutes) {
                continue;
            }
            if let Some(outcome) = self.schedule_reminder(event, minutes).await? {
                scheduled.push((AlarmId::reminder(event.event_id, minutes)?, outcome));
            }
        }
        tracing::info!(
            "Scheduled {} reminders for event {}",
            scheduled.len(),
            event.event_id
        );
        Ok(scheduled)
    }

    /// Cancel every reminder of an event; returns how many existed.
    pub async fn cancel_reminders(&self, event_id: i64) -> Result<usize> {
        let ids = self.reminder_ids(|owner| owner == event_id)?;
        let mut cancelled = 0;
        for id in ids {
            if self.cancel(id).await? {
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }

    /// Drop all reminders and schedule fresh ones for `events`.
    ///
    /// An event with an unreadable start time is skipped.
    pub async fn reschedule_reminders(
        &self,
        events: &[EventReminder],
        lead_minutes: &[u32],
    ) -> Result<usize> {
        for id in self.reminder_ids(|_| true)? {
            self.cancel(id).await?;
        }

        let mut scheduled = 0;
        for event in events {
            match self.schedule_reminders(event, lead_minutes).await {
                Ok(reminders) => scheduled += reminders.len(),
                Err(Error::InvalidSchedule(reason) | Error::InvalidInput(reason)) => {
                    tracing::warn!("Skipping reminders for event {}: {}", event.event_id, reason);
                }
                Err(error) => return Err(error),
            }
        }
        Ok(scheduled)
    }

    fn reminder_ids(&self, owned_by: impl Fn(i64) -> bool) -> Result<Vec<AlarmId>> {
        Ok(self
            .catalogue()?
            .alarms
            .keys()
            .copied()
            .filter(|id| id.reminder_parts().is_some_and(|(event_id, _)| owned_by(event_id)))
            .collect())
    }

    /// Push an alarm back by `minutes` from its trigger time or from now,
    /// whichever is later.
    pub async fn snooze(&self, id: AlarmId, minutes: u32) -> Result<ScheduleOutcome> {
        if minutes == 0 {
            return Err(Error::InvalidInput("snooze needs at least one minute".to_string()));
        }
        let now = Utc::now();
        let (alarm, generation) = {
            let mut catalogue = self.catalogue()?;
            let alarm = catalogue.alarm_mut(id)?;
            let base = alarm.trigger_at.max(now);
            alarm.trigger_at = base + Duration::minutes(i64::from(minutes));
            alarm.active = true;
            alarm.state = AlarmState::Unscheduled;
            alarm.armed_via = None;
            let snapshot = alarm.clone();
            (snapshot, catalogue.bump(id))
        };

        self.inner.bridge.disarm(id).await;
        self.persist().await?;
        tracing::info!("Snoozed alarm {} until {}", id, alarm.trigger_at.to_rfc3339());
        Ok(self.arm_current(alarm, generation).await)
    }

    /// Re-arm every active alarm, typically at start-up.
    ///
    /// Recurring alarms whose occurrence is past the polling window advance
    /// to their next occurrence first. Returns how many were armed.
    pub async fn reschedule_all(&self) -> Result<usize> {
        let now = Utc::now();
        let tolerance = self.inner.tolerance;
        let work: Vec<(Alarm, u64)> = {
            let mut catalogue = self.catalogue()?;
            let mut ids = Vec::new();
            for alarm in catalogue.alarms.values_mut() {
                if !alarm.active
                    || matches!(alarm.state, AlarmState::Fired | AlarmState::Expired)
                {
                    continue;
                }
                if alarm.trigger_at <= now
                    && now - alarm.trigger_at >= tolerance
                    && alarm.recurrence.is_recurring()
                {
                    if let Some(next) = alarm.recurrence.next_after(alarm.trigger_at, now) {
                        alarm.trigger_at = next;
                        alarm.state = AlarmState::Unscheduled;
                    }
                }
                if alarm.trigger_at > now {
                    ids.push(alarm.id);
                }
            }
            ids.into_iter()
                .filter_map(|id| {
                    let alarm = catalogue.alarms.get(&id)?.clone();
                    Some((alarm, catalogue.bump(id)))
                })
                .collect()
        };

        self.persist().await?;
        let mut armed = 0;
        for (alarm, generation) in work {
            if matches!(
                self.arm_current(alarm, generation).await,
                ScheduleOutcome::Armed(_)
            ) {
                armed += 1;
            }
        }
        tracing::info!("Re-armed {} alarms", armed);
        Ok(armed)
    }

    /// Polling sweep at the current time.
    pub async fn poll_sweep(&self) -> Vec<FireEvent> {
        self.poll_sweep_at(Utc::now()).await
    }

    /// Fire every occurrence inside `[t, t + tolerance)` that has not fired yet.
    ///
    /// Occurrences already past the window expire (one-shot) or advance to
    /// the next future occurrence (recurring).
    pub async fn poll_sweep_at(&self, now: DateTime<Utc>) -> Vec<FireEvent> {
        let tolerance = self.inner.tolerance;
        let (events, rearm, disarm) = {
            let Ok(mut catalogue) = self.catalogue() else {
                tracing::error!("Alarm catalogue unavailable, skipping sweep");
                return Vec::new();
            };

            let mut events = Vec::new();
            let mut rearm_ids = Vec::new();
            let mut disarm = Vec::new();
            for alarm in catalogue.alarms.values_mut() {
                if !alarm.active
                    || matches!(alarm.state, AlarmState::Fired | AlarmState::Expired)
                    || now < alarm.trigger_at
                {
                    continue;
                }

                let latest = latest_occurrence(alarm, now);
                if now - latest < tolerance {
                    alarm.trigger_at = latest;
                    if let Some((event, follow_up)) = fire_occurrence(alarm, latest, now) {
                        events.push(event);
                        match follow_up {
                            FollowUp::Rearm => rearm_ids.push(alarm.id),
                            FollowUp::Disarm => disarm.push(alarm.id),
                            FollowUp::Nothing => {}
                        }
                    }
                } else if let Some(next) = alarm.recurrence.advance(latest) {
                    tracing::warn!(
                        "Alarm {} missed occurrence {}, advancing to {}",
                        alarm.id,
                        latest.to_rfc3339(),
                        next.to_rfc3339()
                    );
                    alarm.trigger_at = next;
                    alarm.state = AlarmState::Unscheduled;
                    alarm.armed_via = None;
                    rearm_ids.push(alarm.id);
                } else {
                    tracing::warn!("Alarm {} expired without firing", alarm.id);
                    alarm.state = AlarmState::Expired;
                    alarm.armed_via = None;
                    disarm.push(alarm.id);
                }
            }

            let rearm: Vec<(Alarm, u64)> = rearm_ids
                .into_iter()
                .filter_map(|id| {
                    let alarm = catalogue.alarms.get(&id)?.clone();
                    Some((alarm, catalogue.bump(id)))
                })
                .collect();
            (events, rearm, disarm)
        };

        let changed = !events.is_empty() || !rearm.is_empty() || !disarm.is_empty();
        for event in &events {
            self.inner.bus.publish(event.clone());
        }
        self.apply_follow_ups(rearm, disarm).await;
        if changed {
            if let Err(error) = self.persist().await {
                tracing::error!("Failed to persist alarms after sweep: {}", error);
            }
        }
        events
    }

    /// Callback path for a platform-delivered alarm.
    ///
    /// Shares the dedup set with the polling sweep, so whichever observes
    /// the occurrence second produces nothing.
    pub async fn on_platform_fired(
        &self,
        id: AlarmId,
        scheduled_at: DateTime<Utc>,
    ) -> Option<FireEvent> {
        let now = Utc::now();
        let (event, rearm, disarm) = {
            let mut catalogue = self.catalogue().ok()?;
            let alarm = catalogue.alarms.get_mut(&id)?;
            if !alarm.active {
                return None;
            }
            let (event, follow_up) = fire_occurrence(alarm, scheduled_at, now)?;
            match follow_up {
                FollowUp::Rearm => {
                    let snapshot = alarm.clone();
                    (event, vec![(snapshot, catalogue.bump(id))], Vec::new())
                }
                FollowUp::Disarm => (event, Vec::new(), vec![id]),
                FollowUp::Nothing => (event, Vec::new(), Vec::new()),
            }
        };

        self.inner.bus.publish(event.clone());
        self.apply_follow_ups(rearm, disarm).await;
        if let Err(error) = self.persist().await {
            tracing::error!("Failed to persist alarms after platform fire: {}", error);
        }
        Some(event)
    }

    /// Forget which occurrences of an alarm already fired.
    pub async fn clear_fired(&self, id: AlarmId) -> Result<()> {
        self.catalogue()?.alarm_mut(id)?.fired_occurrences.clear();
        self.persist().await
    }

    pub async fn clear_all_fired(&self) -> Result<()> {
        for alarm in self.catalogue()?.alarms.values_mut() {
            alarm.fired_occurrences.clear();
        }
        self.persist().await
    }

    /// Every alarm ordered by trigger time.
    pub fn list(&self) -> Vec<Alarm> {
        let mut alarms: Vec<Alarm> = self
            .catalogue()
            .map(|catalogue| catalogue.alarms.values().cloned().collect())
            .unwrap_or_default();
        alarms.sort_by_key(|alarm| (alarm.trigger_at, alarm.id));
        alarms
    }

    pub fn get(&self, id: AlarmId) -> Option<Alarm> {
        self.catalogue().ok()?.alarms.get(&id).cloned()
    }

    /// Alarms currently held by a platform backend.
    pub async fn list_armed(&self) -> Vec<Alarm> {
        self.inner.bridge.list_armed().await
    }

    async fn arm_current(&self, alarm: Alarm, generation: u64) -> ScheduleOutcome {
        let id = alarm.id;
        let result = self.inner.bridge.arm(&alarm).await;

        let still_wanted = {
            let Ok(mut catalogue) = self.catalogue() else {
                return ScheduleOutcome::Superseded;
            };
            let current = catalogue.is_current(id, generation);
            match catalogue.alarms.get_mut(&id) {
                Some(stored) if current && stored.active => {
                    match result {
                        ArmResult::Armed(backend) => {
                            stored.state = AlarmState::Armed;
                            stored.armed_via = Some(backend);
                        }
                        ArmResult::Rejected | ArmResult::Unavailable => {
                            stored.state = AlarmState::Unscheduled;
                            stored.armed_via = None;
                        }
                    }
                    Some(true)
                }
                Some(stored) if stored.active => Some(false),
                _ => None,
            }
        };

        match still_wanted {
            Some(true) => {
                if let Err(error) = self.persist().await {
                    tracing::error!("Failed to persist alarm {}: {}", id, error);
                }
                match result {
                    ArmResult::Armed(backend) => {
                        tracing::debug!("Alarm {} armed via {}", id, backend);
                        ScheduleOutcome::Armed(backend)
                    }
                    ArmResult::Rejected | ArmResult::Unavailable => {
                        tracing::warn!("Alarm {} relies on polling only", id);
                        ScheduleOutcome::PollingOnly
                    }
                }
            }
            // A newer arm owns the platform entry
            Some(false) => ScheduleOutcome::Superseded,
            None => {
                if matches!(result, ArmResult::Armed(_)) {
                    tracing::debug!("Alarm {} cancelled during arm, disarming", id);
                    self.inner.bridge.disarm(id).await;
                }
                ScheduleOutcome::Superseded
            }
        }
    }

    async fn apply_follow_ups(&self, rearm: Vec<(Alarm, u64)>, disarm: Vec<AlarmId>) {
        for id in disarm {
            self.inner.bridge.disarm(id).await;
        }
        for (alarm, generation) in rearm {
            self.arm_current(alarm, generation).await;
        }
    }

    async fn persist(&self) -> Result<()> {
        let _guard = self.inner.persist_lock.lock().await;
        let snapshot = self.list();
        save_json(self.inner.store.as_ref(), ALARMS_KEY, &snapshot).await
    }
}

/// Latest scheduled occurrence at or before `now`.
fn latest_occurrence(alarm: &Alarm, now: DateTime<Utc>) -> DateTime<Utc> {
    let mut occurrence = alarm.trigger_at;
    while let Some(next) = alarm.recurrence.advance(occurrence) {
        if next > now {
            break;
        }
        occurrence = next;
    }
    occurrence
}

/// Atomic check-and-insert on the fired set plus the lifecycle transition.
fn fire_occurrence(
    alarm: &mut Alarm,
    occurrence_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Option<(FireEvent, FollowUp)> {
    let key = occurrence_at.timestamp_millis();
    if !alarm.mark_fired(key) {
        tracing::debug!("Alarm {} occurrence {} already fired", alarm.id, key);
        return None;
    }
    let event = FireEvent::for_alarm(alarm, key, now);

    if occurrence_at != alarm.trigger_at {
        return Some((event, FollowUp::Nothing));
    }
    let follow_up = match alarm.recurrence.advance(occurrence_at) {
        Some(next) => {
            alarm.trigger_at = next;
            alarm.state = AlarmState::Unscheduled;
            alarm.armed_via = None;
            FollowUp::Rearm
        }
        None => {
            alarm.state = AlarmState::Fired;
            alarm.armed_via = None;
            FollowUp::Disarm
        }
    };
    Some((event, follow_up))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::Recurrence;
    use crate::test_support::{FakeExactPlatform, FakeLocalPlatform};
    use pretty_assertions::assert_eq;

    fn scheduler_with(bridge: NotificationBridge) -> (AlarmScheduler, EventBus) {
        let bus = EventBus::new();
        let scheduler = AlarmScheduler::new(
            Arc::new(bridge),
            Arc::new(MemoryStore::new()),
            bus.clone(),
            Duration::seconds(60),
        );
        (scheduler, bus)
    }

    fn request(id: i64, at: DateTime<Utc>, recurrence: Recurrence) -> AlarmRequest {
        AlarmRequest {
            id: AlarmId(id),
            title: format!("Alarm {id}"),
            body: "Time to go".to_string(),
            trigger_at: at.to_rfc3339(),
            recurrence,
        }
    }

    /// Second-aligned so RFC 3339 parsing round-trips exactly.
    fn in_seconds(seconds: i64) -> DateTime<Utc> {
        let now = Utc::now().timestamp();
        DateTime::from_timestamp(now + seconds, 0).unwrap()
    }

    #[tokio::test]
    async fn past_trigger_is_rejected_without_platform_call() {
        let exact = Arc::new(FakeExactPlatform::granted());
        let (scheduler, _) = scheduler_with(NotificationBridge::new(Some(exact.clone()), None));

        let result = scheduler
            .schedule(request(1, in_seconds(-30), Recurrence::None))
            .await;
        assert!(matches!(result, Err(Error::InvalidSchedule(_))));
        assert_eq!(exact.schedule_calls(), 0);
        assert!(scheduler.list().is_empty());
    }

    #[tokio::test]
    async fn schedule_arms_through_best_backend() {
        let exact = Arc::new(FakeExactPlatform::granted());
        let (scheduler, _) = scheduler_with(NotificationBridge::new(Some(exact.clone()), None));

        let outcome = scheduler
            .schedule(request(1, in_seconds(300), Recurrence::None))
            .await
            .unwrap();
        assert_eq!(outcome, ScheduleOutcome::Armed(Backend::Exact));

        let alarm = scheduler.get(AlarmId(1)).unwrap();
        assert_eq!(alarm.state, AlarmState::Armed);
        assert_eq!(alarm.armed_via, Some(Backend::Exact));
        assert!(exact.is_scheduled(AlarmId(1)));
    }

    #[tokio::test]
    async fn without_permission_alarm_stays_for_polling() {
        let (scheduler, _) = scheduler_with(NotificationBridge::new(
            None,
            Some(Arc::new(FakeLocalPlatform::denied())),
        ));

        let outcome = scheduler
            .schedule(request(1, in_seconds(300), Recurrence::None))
            .await
            .unwrap();
        assert_eq!(outcome, ScheduleOutcome::PollingOnly);
        assert_eq!(scheduler.get(AlarmId(1)).unwrap().state, AlarmState::Unscheduled);
    }

    #[tokio::test]
    async fn sweep_fires_once_inside_window_and_disarms() {
        let exact = Arc::new(FakeExactPlatform::granted());
        let (scheduler, bus) = scheduler_with(NotificationBridge::new(Some(exact.clone()), None));
        let mut events = bus.subscribe();

        let trigger = in_seconds(10);
        scheduler
            .schedule(request(1, trigger, Recurrence::None))
            .await
            .unwrap();
        assert_eq!(scheduler.list_armed().await.len(), 1);

        assert!(scheduler
            .poll_sweep_at(trigger - Duration::seconds(1))
            .await
            .is_empty());

        let fired = scheduler.poll_sweep_at(trigger + Duration::seconds(5)).await;
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].id, "1");
        assert!(scheduler
            .poll_sweep_at(trigger + Duration::seconds(50))
            .await
            .is_empty());

        assert_eq!(events.recv().await.unwrap().id, "1");
        assert!(events.try_recv().is_err());
        assert!(scheduler.list_armed().await.is_empty());
        assert_eq!(scheduler.get(AlarmId(1)).unwrap().state, AlarmState::Fired);
    }

    #[tokio::test]
    async fn sweep_and_platform_callback_fire_once() {
        let (scheduler, bus) = scheduler_with(NotificationBridge::polling_only());
        let mut events = bus.subscribe();
        let trigger = in_seconds(10);
        scheduler
            .schedule(request(1, trigger, Recurrence::Daily))
            .await
            .unwrap();

        assert_eq!(
            scheduler
                .poll_sweep_at(trigger + Duration::seconds(2))
                .await
                .len(),
            1
        );
        assert!(scheduler
            .on_platform_fired(AlarmId(1), trigger)
            .await
            .is_none());

        assert!(events.recv().await.is_ok());
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn platform_callback_first_then_sweep_is_deduplicated() {
        let (scheduler, _) = scheduler_with(NotificationBridge::polling_only());
        let trigger = in_seconds(10);
        scheduler
            .schedule(request(1, trigger, Recurrence::None))
            .await
            .unwrap();

        assert!(scheduler
            .on_platform_fired(AlarmId(1), trigger)
            .await
            .is_some());
        assert!(scheduler
            .poll_sweep_at(trigger + Duration::seconds(3))
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn recurring_alarm_advances_by_exact_period() {
        let (scheduler, _) = scheduler_with(NotificationBridge::polling_only());
        let trigger = in_seconds(10);
        scheduler
            .schedule(request(1, trigger, Recurrence::Hourly))
            .await
            .unwrap();

        // Fired 40 s late; the next occurrence still lands on the hour mark.
        scheduler
            .poll_sweep_at(trigger + Duration::seconds(40))
            .await;
        let alarm = scheduler.get(AlarmId(1)).unwrap();
        assert_eq!(alarm.trigger_at, trigger + Duration::hours(1));
        assert!(alarm.has_fired(trigger.timestamp_millis()));
    }

    #[tokio::test]
    async fn missed_one_shot_expires_without_firing() {
        let (scheduler, _) = scheduler_with(NotificationBridge::polling_only());
        let trigger = in_seconds(10);
        scheduler
            .schedule(request(1, trigger, Recurrence::None))
            .await
            .unwrap();

        let fired = scheduler
            .poll_sweep_at(trigger + Duration::seconds(61))
            .await;
        assert!(fired.is_empty());
        assert_eq!(scheduler.get(AlarmId(1)).unwrap().state, AlarmState::Expired);
        assert!(scheduler
            .poll_sweep_at(trigger + Duration::seconds(70))
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn missed_recurring_alarm_catches_up_without_drift() {
        let (scheduler, _) = scheduler_with(NotificationBridge::polling_only());
        let trigger = in_seconds(10);
        scheduler
            .schedule(request(1, trigger, Recurrence::Minutely))
            .await
            .unwrap();

        // Three and a half periods late: the occurrence at +3 min is 30 s old.
        let fired = scheduler
            .poll_sweep_at(trigger + Duration::seconds(210))
            .await;
        assert_eq!(fired.len(), 1);
        assert_eq!(
            fired[0].occurrence,
            Some((trigger + Duration::minutes(3)).timestamp_millis())
        );
        assert_eq!(
            scheduler.get(AlarmId(1)).unwrap().trigger_at,
            trigger + Duration::minutes(4)
        );
    }

    #[tokio::test]
    async fn cancel_is_safe_before_and_after_fire() {
        let exact = Arc::new(FakeExactPlatform::granted());
        let (scheduler, _) = scheduler_with(NotificationBridge::new(Some(exact.clone()), None));
        assert!(!scheduler.cancel(AlarmId(9)).await.unwrap());

        let trigger = in_seconds(10);
        scheduler
            .schedule(request(1, trigger, Recurrence::None))
            .await
            .unwrap();
        assert!(scheduler.cancel(AlarmId(1)).await.unwrap());
        assert!(!exact.is_scheduled(AlarmId(1)));
        assert!(scheduler
            .poll_sweep_at(trigger + Duration::seconds(1))
            .await
            .is_empty());
        assert!(!scheduler.cancel(AlarmId(1)).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancel_during_arm_still_disarms() {
        let exact = Arc::new(FakeExactPlatform::granted());
        exact.hold();
        let (scheduler, _) = scheduler_with(NotificationBridge::new(Some(exact.clone()), None));

        let pending = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move {
                scheduler
                    .schedule(request(1, in_seconds(300), Recurrence::None))
                    .await
            })
        };
        while exact.schedule_calls() == 0 {
            tokio::task::yield_now().await;
        }

        scheduler.cancel(AlarmId(1)).await.unwrap();
        exact.release();

        let outcome = pending.await.unwrap().unwrap();
        assert_eq!(outcome, ScheduleOutcome::Superseded);
        assert!(!exact.is_scheduled(AlarmId(1)));
        assert!(scheduler.get(AlarmId(1)).is_none());
    }

    #[tokio::test]
    async fn snooze_moves_from_later_of_trigger_and_now() {
        let (scheduler, _) = scheduler_with(NotificationBridge::polling_only());
        let trigger = in_seconds(600);
        scheduler
            .schedule(request(1, trigger, Recurrence::None))
            .await
            .unwrap();

        scheduler.snooze(AlarmId(1), 5).await.unwrap();
        assert_eq!(
            scheduler.get(AlarmId(1)).unwrap().trigger_at,
            trigger + Duration::minutes(5)
        );
        assert!(scheduler.snooze(AlarmId(1), 0).await.is_err());
        assert!(matches!(
            scheduler.snooze(AlarmId(2), 5).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn disabled_alarm_never_fires() {
        let local = Arc::new(FakeLocalPlatform::granted());
        let (scheduler, _) = scheduler_with(NotificationBridge::new(None, Some(local.clone())));
        let trigger = in_seconds(10);
        scheduler
            .schedule(request(1, trigger, Recurrence::None))
            .await
            .unwrap();

        scheduler.set_active(AlarmId(1), false).await.unwrap();
        assert!(scheduler.list_armed().await.is_empty());
        assert!(scheduler
            .poll_sweep_at(trigger + Duration::seconds(1))
            .await
            .is_empty());

        scheduler.set_active(AlarmId(1), true).await.unwrap();
        assert_eq!(scheduler.list_armed().await.len(), 1);
    }

    #[tokio::test]
    async fn reload_and_reschedule_all_rearms_future_alarms() {
        let store = Arc::new(MemoryStore::new());
        let first = AlarmScheduler::new(
            Arc::new(NotificationBridge::polling_only()),
            store.clone(),
            EventBus::new(),
            Duration::seconds(60),
        );
        first
            .schedule(request(1, in_seconds(300), Recurrence::None))
            .await
            .unwrap();
        first
            .schedule(request(2, in_seconds(600), Recurrence::Weekly))
            .await
            .unwrap();

        let exact = Arc::new(FakeExactPlatform::granted());
        let second = AlarmScheduler::new(
            Arc::new(NotificationBridge::new(Some(exact.clone()), None)),
            store,
            EventBus::new(),
            Duration::seconds(60),
        );
        assert_eq!(second.load().await.unwrap(), 2);
        assert_eq!(second.reschedule_all().await.unwrap(), 2);
        assert!(exact.is_scheduled(AlarmId(1)));
        assert!(exact.is_scheduled(AlarmId(2)));
    }

    #[tokio::test]
    async fn clear_fired_allows_refire_of_same_occurrence() {
        let (scheduler, _) = scheduler_with(NotificationBridge::polling_only());
        let trigger = in_seconds(10);
        scheduler
            .schedule(request(1, trigger, Recurrence::Daily))
            .await
            .unwrap();
        scheduler.on_platform_fired(AlarmId(1), trigger).await;
        assert!(scheduler.on_platform_fired(AlarmId(1), trigger).await.is_none());

        scheduler.clear_fired(AlarmId(1)).await.unwrap();
        assert!(scheduler.on_platform_fired(AlarmId(1), trigger).await.is_some());
    }

    #[tokio::test]
    async fn disabling_purges_fired_occurrences() {
        let (scheduler, _) = scheduler_with(NotificationBridge::polling_only());
        let trigger = in_seconds(10);
        scheduler
            .schedule(request(1, trigger, Recurrence::Daily))
            .await
            .unwrap();
        scheduler.on_platform_fired(AlarmId(1), trigger).await;
        assert!(!scheduler.get(AlarmId(1)).unwrap().fired_occurrences.is_empty());

        scheduler.set_active(AlarmId(1), false).await.unwrap();
        assert!(scheduler.get(AlarmId(1)).unwrap().fired_occurrences.is_empty());
    }

    fn event(event_id: i64, starts_in: i64) -> EventReminder {
        EventReminder {
            event_id,
            title: "Team sync".to_string(),
            details: String::new(),
            starts_at: in_seconds(starts_in).to_rfc3339(),
        }
    }

    #[tokio::test]
    async fn reminders_skip_past_lead_times_and_replace_previous_ones() {
        let (scheduler, _) = scheduler_with(NotificationBridge::polling_only());
        let meeting = event(7, 30 * 60);

        let scheduled = scheduler
            .schedule_reminders(&meeting, &crate::models::DEFAULT_REMINDER_MINUTES)
            .await
            .unwrap();
        let leads: Vec<u32> = scheduled
            .iter()
            .filter_map(|(id, _)| id.reminder_parts().map(|(_, minutes)| minutes))
            .collect();
        assert_eq!(leads, vec![15, 5]);

        let reminder = scheduler.get(AlarmId::reminder(7, 15).unwrap()).unwrap();
        assert_eq!(reminder.title, "Reminder: Team sync");
        assert_eq!(
            reminder.trigger_at,
            meeting.start_time().unwrap() - Duration::minutes(15)
        );

        scheduler.schedule_reminders(&meeting, &[10, 10]).await.unwrap();
        let ids: Vec<AlarmId> = scheduler.list().iter().map(|alarm| alarm.id).collect();
        assert_eq!(ids, vec![AlarmId::reminder(7, 10).unwrap()]);
    }

    #[tokio::test]
    async fn reminder_occurrence_fires_once() {
        let (scheduler, _) = scheduler_with(NotificationBridge::polling_only());
        let meeting = event(7, 20 * 60);
        scheduler
            .schedule_reminder(&meeting, crate::models::DEFAULT_REMINDER_LEAD)
            .await
            .unwrap()
            .unwrap();

        let id = AlarmId::reminder(7, 15).unwrap();
        let trigger = scheduler.get(id).unwrap().trigger_at;
        assert_eq!(
            scheduler
                .poll_sweep_at(trigger + Duration::seconds(1))
                .await
                .len(),
            1
        );
        assert!(scheduler.on_platform_fired(id, trigger).await.is_none());
        assert!(scheduler
            .schedule_reminder(&event(8, 60), 5)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn cancel_and_reschedule_reminders_leave_plain_alarms_alone() {
        let (scheduler, _) = scheduler_with(NotificationBridge::polling_only());
        scheduler
            .schedule(request(7, in_seconds(7_200), Recurrence::None))
            .await
            .unwrap();
        scheduler
            .schedule_reminders(&event(7, 7_200), &[60, 15])
            .await
            .unwrap();
        scheduler
            .schedule_reminders(&event(8, 7_200), &[60])
            .await
            .unwrap();

        assert_eq!(scheduler.cancel_reminders(7).await.unwrap(), 2);
        assert_eq!(scheduler.list().len(), 2);

        let broken = EventReminder {
            starts_at: "not a date".to_string(),
            ..event(9, 0)
        };
        let count = scheduler
            .reschedule_reminders(&[event(7, 7_200), broken], &[30])
            .await
            .unwrap();
        assert_eq!(count, 1);
        let mut ids: Vec<AlarmId> = scheduler.list().iter().map(|alarm| alarm.id).collect();
        ids.sort();
        assert_eq!(ids, vec![AlarmId::reminder(7, 30).unwrap(), AlarmId(7)]);
    }
}
