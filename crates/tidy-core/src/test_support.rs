//! In-process fakes of the platform seams, used by unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};

use crate::error::{Error, Result};
use crate::geofence::LocationProvider;
use crate::models::{Alarm, AlarmId, Position, SyncChange, SyncChangeId};
use crate::notify::{ExactAlarmPlatform, LocalNotificationPlatform};
use crate::sync::{RemoteApi, RemoteError, RemoteResult};

pub struct FakeExactPlatform {
    granted: AtomicBool,
    fail: AtomicBool,
    held: AtomicBool,
    release: Notify,
    probe_calls: AtomicUsize,
    schedule_calls: AtomicUsize,
    scheduled: Mutex<HashMap<AlarmId, Alarm>>,
}

impl FakeExactPlatform {
    fn with_permission(granted: bool) -> Self {
        Self {
            granted: AtomicBool::new(granted),
            fail: AtomicBool::new(false),
            held: AtomicBool::new(false),
            release: Notify::new(),
            probe_calls: AtomicUsize::new(0),
            schedule_calls: AtomicUsize::new(0),
            scheduled: Mutex::new(HashMap::new()),
        }
    }

    pub fn granted() -> Self {
        Self::with_permission(true)
    }

    pub fn denied() -> Self {
        Self::with_permission(false)
    }

    pub fn set_permission(&self, granted: bool) {
        self.granted.store(granted, Ordering::SeqCst);
    }

    pub fn fail_schedules(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Make `schedule` wait until `release` is called.
    pub fn hold(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.held.store(false, Ordering::SeqCst);
        self.release.notify_one();
    }

    pub fn probe_calls(&self) -> usize {
        self.probe_calls.load(Ordering::SeqCst)
    }

    pub fn schedule_calls(&self) -> usize {
        self.schedule_calls.load(Ordering::SeqCst)
    }

    pub fn is_scheduled(&self, id: AlarmId) -> bool {
        self.scheduled.lock().unwrap().contains_key(&id)
    }
}

#[async_trait]
impl ExactAlarmPlatform for FakeExactPlatform {
    async fn permission_granted(&self) -> bool {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        self.granted.load(Ordering::SeqCst)
    }

    async fn schedule(&self, alarm: &Alarm) -> Result<()> {
        self.schedule_calls.fetch_add(1, Ordering::SeqCst);
        if self.held.load(Ordering::SeqCst) {
            self.release.notified().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Transport("exact alarm service unavailable".to_string()));
        }
        self.scheduled.lock().unwrap().insert(alarm.id, alarm.clone());
        Ok(())
    }

    async fn cancel(&self, id: AlarmId) -> Result<bool> {
        Ok(self.scheduled.lock().unwrap().remove(&id).is_some())
    }
}

pub struct FakeLocalPlatform {
    granted: AtomicBool,
    schedule_calls: AtomicUsize,
    scheduled: Mutex<HashMap<AlarmId, Alarm>>,
}

impl FakeLocalPlatform {
    fn with_permission(granted: bool) -> Self {
        Self {
            granted: AtomicBool::new(granted),
            schedule_calls: AtomicUsize::new(0),
            scheduled: Mutex::new(HashMap::new()),
        }
    }

    pub fn granted() -> Self {
        Self::with_permission(true)
    }

    pub fn denied() -> Self {
        Self::with_permission(false)
    }

    pub fn schedule_calls(&self) -> usize {
        self.schedule_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocalNotificationPlatform for FakeLocalPlatform {
    async fn permission_granted(&self) -> bool {
        self.granted.load(Ordering::SeqCst)
    }

    async fn schedule(&self, alarm: &Alarm) -> Result<()> {
        self.schedule_calls.fetch_add(1, Ordering::SeqCst);
        self.scheduled.lock().unwrap().insert(alarm.id, alarm.clone());
        Ok(())
    }

    async fn cancel(&self, id: AlarmId) -> Result<bool> {
        Ok(self.scheduled.lock().unwrap().remove(&id).is_some())
    }

    async fn pending(&self) -> Result<Vec<Alarm>> {
        Ok(self.scheduled.lock().unwrap().values().cloned().collect())
    }
}

/// Scripted backend: succeeds unless a failure was queued for the change.
pub struct FakeRemote {
    failures: Mutex<HashMap<SyncChangeId, (u32, bool)>>,
    calls: Mutex<Vec<SyncChangeId>>,
    reachable: AtomicBool,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self {
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            reachable: AtomicBool::new(true),
        }
    }

    /// Fail the next `times` deliveries of `id`.
    pub fn fail_next(&self, id: SyncChangeId, times: u32, terminal: bool) {
        self.failures.lock().unwrap().insert(id, (times, terminal));
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<SyncChangeId> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteApi for FakeRemote {
    async fn apply(&self, change: &SyncChange) -> RemoteResult<()> {
        self.calls.lock().unwrap().push(change.id);
        let mut failures = self.failures.lock().unwrap();
        match failures.get_mut(&change.id) {
            Some((remaining, terminal)) if *remaining > 0 => {
                *remaining -= 1;
                if *terminal {
                    Err(RemoteError::Rejected {
                        status: 422,
                        message: "validation failed".to_string(),
                    })
                } else {
                    Err(RemoteError::Api {
                        status: 503,
                        message: "service unavailable".to_string(),
                    })
                }
            }
            _ => Ok(()),
        }
    }

    async fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }
}

pub struct FakeLocationProvider {
    granted: AtomicBool,
    current: Mutex<Option<Position>>,
    sink: Mutex<Option<mpsc::Sender<Position>>>,
    start_calls: AtomicUsize,
    stop_calls: AtomicUsize,
}

impl FakeLocationProvider {
    pub fn new(current: Option<Position>) -> Self {
        Self {
            granted: AtomicBool::new(true),
            current: Mutex::new(current),
            sink: Mutex::new(None),
            start_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
        }
    }

    pub fn denied() -> Self {
        let provider = Self::new(None);
        provider.granted.store(false, Ordering::SeqCst);
        provider
    }

    pub fn is_watching(&self) -> bool {
        self.sink.lock().unwrap().is_some()
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    /// Push a position into the active watch, if any.
    pub async fn emit(&self, position: Position) -> bool {
        let sink = self.sink.lock().unwrap().clone();
        match sink {
            Some(sink) => sink.send(position).await.is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl LocationProvider for FakeLocationProvider {
    async fn current_position(&self) -> Result<Position> {
        if !self.granted.load(Ordering::SeqCst) {
            return Err(Error::PermissionDenied("location".to_string()));
        }
        self.current
            .lock()
            .unwrap()
            .ok_or_else(|| Error::NotFound("no position fix".to_string()))
    }

    async fn start_watch(&self, sink: mpsc::Sender<Position>) -> Result<()> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        if !self.granted.load(Ordering::SeqCst) {
            return Err(Error::PermissionDenied("location".to_string()));
        }
        *self.sink.lock().unwrap() = Some(sink);
        Ok(())
    }

    async fn stop_watch(&self) -> Result<()> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        *self.sink.lock().unwrap() = None;
        Ok(())
    }
}
