//! Durable FIFO of changes waiting to reach the backend.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinHandle;

use super::api::RemoteApi;
use crate::config::EngineConfig;
use crate::db::{load_json, save_json, KeyValueStore, SYNC_CHANGES_KEY};
use crate::error::{Error, Result};
use crate::events::{EventBus, SyncNotice};
use crate::models::{NewSyncChange, SyncChange, SyncChangeId};
use crate::state::SyncState;

/// Bounded exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    pub const fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.sync_max_attempts, config.sync_base_delay())
    }

    /// Delay before the next attempt once `attempts` attempts have failed.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1 << exponent)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(2))
    }
}

/// Counters shown by hosts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub total: usize,
    pub pending: usize,
    pub errors: usize,
    pub synced_this_session: usize,
    pub online: bool,
    pub syncing: bool,
}

/// Summary of one drain pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub attempted: usize,
    pub synced: usize,
    pub rescheduled: usize,
    pub failed: usize,
    /// Another drain was running or the queue is offline
    pub skipped: bool,
}

enum AttemptOutcome {
    Synced,
    Retry(Duration),
    Failed(String),
    Cancelled,
}

#[derive(Default)]
struct QueueState {
    changes: Vec<SyncChange>,
    in_flight: HashSet<SyncChangeId>,
}

struct Inner {
    store: Arc<dyn KeyValueStore>,
    remote: Arc<dyn RemoteApi>,
    bus: EventBus,
    policy: RetryPolicy,
    state: Mutex<QueueState>,
    online: AtomicBool,
    draining: AtomicBool,
    synced_this_session: AtomicUsize,
    persist_lock: tokio::sync::Mutex<()>,
    retries: Mutex<HashMap<SyncChangeId, JoinHandle<()>>>,
}

/// Clears the draining flag when a drain pass ends, even on cancellation
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Offline change queue with per-change retry timers
#[derive(Clone)]
pub struct SyncQueue {
    inner: Arc<Inner>,
}

impl SyncQueue {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        remote: Arc<dyn RemoteApi>,
        bus: EventBus,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                remote,
                bus,
                policy,
                state: Mutex::new(QueueState::default()),
                online: AtomicBool::new(true),
                draining: AtomicBool::new(false),
                synced_this_session: AtomicUsize::new(0),
                persist_lock: tokio::sync::Mutex::new(()),
                retries: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, QueueState>> {
        self.inner
            .state
            .lock()
            .map_err(|_| Error::Database("sync queue lock poisoned".to_string()))
    }

    /// Restore persisted changes. A corrupted snapshot starts an empty queue.
    pub async fn load(&self) -> Result<usize> {
        let loaded = match load_json::<Vec<SyncChange>>(self.inner.store.as_ref(), SYNC_CHANGES_KEY)
            .await
        {
            Ok(changes) => changes.unwrap_or_default(),
            Err(Error::Serialization(error)) => {
                tracing::warn!("Discarding unreadable sync queue snapshot: {}", error);
                Vec::new()
            }
            Err(error) => return Err(error),
        };

        let count = {
            let mut state = self.state()?;
            state.changes = loaded.into_iter().filter(|change| !change.synced).collect();
            state.changes.len()
        };
        tracing::info!("Loaded {} queued changes", count);
        Ok(count)
    }

    /// Record a change and try to deliver it right away when online.
    pub async fn enqueue(&self, new_change: NewSyncChange) -> Result<SyncChange> {
        if new_change.user_id.trim().is_empty() {
            return Err(Error::InvalidInput(
                "a queued change needs a user id".to_string(),
            ));
        }

        let change = new_change.into_change(Utc::now());
        self.state()?.changes.push(change.clone());
        self.persist().await?;
        tracing::info!("Queued {} change {}", change.kind, change.id);

        if self.is_online() {
            self.drain().await;
        }
        Ok(change)
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    pub fn is_draining(&self) -> bool {
        self.inner.draining.load(Ordering::SeqCst)
    }

    /// Update connectivity; going back online drains the queue.
    pub async fn set_online(&self, online: bool) -> Option<DrainReport> {
        let was_online = self.inner.online.swap(online, Ordering::SeqCst);
        if online && !was_online {
            tracing::info!("Connectivity restored, draining sync queue");
            return Some(self.drain().await);
        }
        if !online && was_online {
            tracing::info!("Connectivity lost, queueing changes locally");
        }
        None
    }

    /// Attempt every due change in FIFO order.
    ///
    /// A drain that starts while another one runs returns immediately.
    pub async fn drain(&self) -> DrainReport {
        if !self.is_online() {
            return DrainReport {
                skipped: true,
                ..DrainReport::default()
            };
        }
        if self.inner.draining.swap(true, Ordering::SeqCst) {
            tracing::debug!("Drain already in progress");
            return DrainReport {
                skipped: true,
                ..DrainReport::default()
            };
        }
        let _guard = DrainGuard(&self.inner.draining);

        let mut report = DrainReport::default();
        let mut attempted: HashSet<SyncChangeId> = HashSet::new();
        while self.is_online() {
            let change = match self.claim_next(&attempted) {
                Ok(Some(change)) => change,
                Ok(None) => break,
                Err(error) => {
                    tracing::error!("Failed to read sync queue: {}", error);
                    break;
                }
            };

            attempted.insert(change.id);
            report.attempted += 1;
            match self.attempt(change).await {
                AttemptOutcome::Synced => report.synced += 1,
                AttemptOutcome::Retry(_) => report.rescheduled += 1,
                AttemptOutcome::Failed(_) => report.failed += 1,
                AttemptOutcome::Cancelled => {}
            }
        }

        if report.attempted > 0 {
            tracing::info!(
                "Drain finished: {} synced, {} rescheduled, {} failed",
                report.synced,
                report.rescheduled,
                report.failed
            );
        }
        if report.synced > 0 {
            let remaining = self.state().map(|state| state.changes.len()).unwrap_or(0);
            self.inner.bus.notify(SyncNotice::Drained {
                synced: report.synced,
                remaining,
            });
        }
        report
    }

    /// Mark the oldest due change in flight and return it.
    ///
    /// Only the change about to be sent is claimed, so stopping a drain
    /// early never strands the rest of the queue.
    fn claim_next(&self, exclude: &HashSet<SyncChangeId>) -> Result<Option<SyncChange>> {
        let now = Utc::now();
        let mut state = self.state()?;
        let QueueState {
            changes,
            in_flight,
        } = &mut *state;
        let next = changes
            .iter()
            .find(|change| {
                change.is_due(now) && !in_flight.contains(&change.id) && !exclude.contains(&change.id)
            })
            .cloned();
        if let Some(change) = &next {
            in_flight.insert(change.id);
        }
        Ok(next)
    }

    async fn attempt(&self, change: SyncChange) -> AttemptOutcome {
        tracing::debug!(
            "Syncing {} change {} (attempt {})",
            change.kind,
            change.id,
            change.attempts + 1
        );
        let result = self.inner.remote.apply(&change).await;
        let outcome = self.record_result(&change, result);

        if let Err(error) = self.persist().await {
            tracing::error!("Failed to persist sync queue: {}", error);
        }

        match &outcome {
            AttemptOutcome::Synced => {
                tracing::info!("Synced {} change {}", change.kind, change.id);
            }
            AttemptOutcome::Retry(delay) => {
                tracing::warn!(
                    "Change {} failed, retrying in {:?}",
                    change.id,
                    delay
                );
                self.schedule_retry(change.id, *delay);
            }
            AttemptOutcome::Failed(reason) => {
                tracing::error!("Change {} failed permanently: {}", change.id, reason);
                self.inner.bus.notify(SyncNotice::Failed {
                    change_id: change.id,
                    description: change.description.clone(),
                    reason: reason.clone(),
                });
            }
            AttemptOutcome::Cancelled => {
                tracing::debug!("Change {} was cancelled while in flight", change.id);
            }
        }
        outcome
    }

    fn record_result(
        &self,
        attempted: &SyncChange,
        result: super::api::RemoteResult<()>,
    ) -> AttemptOutcome {
        let Ok(mut state) = self.state() else {
            return AttemptOutcome::Cancelled;
        };
        state.in_flight.remove(&attempted.id);
        let Some(index) = state
            .changes
            .iter()
            .position(|change| change.id == attempted.id)
        else {
            return AttemptOutcome::Cancelled;
        };

        let now = Utc::now();
        match result {
            Ok(()) => {
                state.changes.remove(index);
                self.inner
                    .synced_this_session
                    .fetch_add(1, Ordering::SeqCst);
                AttemptOutcome::Synced
            }
            Err(error) => {
                let policy = self.inner.policy;
                let change = &mut state.changes[index];
                change.attempts += 1;
                if error.is_terminal() {
                    let reason = error.to_string();
                    change.sync_error = Some(reason.clone());
                    change.next_attempt_at = None;
                    AttemptOutcome::Failed(reason)
                } else if change.attempts >= policy.max_attempts {
                    let reason = Error::ExhaustedRetries {
                        change_id: change.id.to_string(),
                        attempts: change.attempts,
                        reason: error.to_string(),
                    }
                    .to_string();
                    change.sync_error = Some(reason.clone());
                    change.next_attempt_at = None;
                    AttemptOutcome::Failed(reason)
                } else {
                    let delay = policy.delay_for(change.attempts);
                    change.next_attempt_at = chrono::Duration::from_std(delay)
                        .ok()
                        .and_then(|delay| now.checked_add_signed(delay));
                    AttemptOutcome::Retry(delay)
                }
            }
        }
    }

    fn schedule_retry(&self, id: SyncChangeId, delay: Duration) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                SyncQueue { inner }.retry_change(id).await;
            }
        });
        if let Ok(mut retries) = self.inner.retries.lock() {
            if let Some(previous) = retries.insert(id, handle) {
                previous.abort();
            }
        }
    }

    /// Timer path: the backoff already elapsed, so only pending/in-flight is checked.
    async fn retry_change(&self, id: SyncChangeId) {
        if let Ok(mut retries) = self.inner.retries.lock() {
            retries.remove(&id);
        }
        if !self.is_online() {
            tracing::debug!("Offline, change {} waits for reconnect", id);
            return;
        }

        let claimed = self.state().ok().and_then(|mut state| {
            if state.in_flight.contains(&id) {
                return None;
            }
            let change = state
                .changes
                .iter()
                .find(|change| change.id == id && change.is_pending())
                .cloned()?;
            state.in_flight.insert(id);
            Some(change)
        });

        if let Some(change) = claimed {
            self.attempt(change).await;
        }
    }

    fn abort_retry(&self, id: SyncChangeId) {
        if let Ok(mut retries) = self.inner.retries.lock() {
            if let Some(handle) = retries.remove(&id) {
                handle.abort();
            }
        }
    }

    /// Remove a queued change; returns whether it existed.
    pub async fn cancel(&self, id: SyncChangeId) -> Result<bool> {
        let removed = {
            let mut state = self.state()?;
            let before = state.changes.len();
            state.changes.retain(|change| change.id != id);
            state.changes.len() != before
        };
        self.abort_retry(id);
        if removed {
            self.persist().await?;
            tracing::info!("Cancelled queued change {}", id);
        }
        Ok(removed)
    }

    /// Give failed changes a fresh set of attempts and drain.
    pub async fn retry_failed(&self) -> Result<usize> {
        let reset = {
            let mut state = self.state()?;
            let mut reset = 0;
            for change in state.changes.iter_mut().filter(|c| c.sync_error.is_some()) {
                change.sync_error = None;
                change.attempts = 0;
                change.next_attempt_at = None;
                reset += 1;
            }
            reset
        };
        if reset > 0 {
            self.persist().await?;
            tracing::info!("Retrying {} failed changes", reset);
        }
        self.drain().await;
        Ok(reset)
    }

    /// Drop failed changes and reset the session counter.
    pub async fn clear_history(&self) -> Result<usize> {
        let removed = {
            let mut state = self.state()?;
            let before = state.changes.len();
            state
                .changes
                .retain(|change| change.sync_error.is_none() && !change.synced);
            before - state.changes.len()
        };
        self.inner.synced_this_session.store(0, Ordering::SeqCst);
        if removed > 0 {
            self.persist().await?;
        }
        Ok(removed)
    }

    /// Snapshot of every queued change in FIFO order.
    pub fn list(&self) -> Vec<SyncChange> {
        self.state()
            .map(|state| state.changes.clone())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> SyncStats {
        let (total, pending, errors) = self
            .state()
            .map(|state| {
                let pending = state.changes.iter().filter(|c| c.is_pending()).count();
                let errors = state
                    .changes
                    .iter()
                    .filter(|c| c.sync_error.is_some())
                    .count();
                (state.changes.len(), pending, errors)
            })
            .unwrap_or_default();
        SyncStats {
            total,
            pending,
            errors,
            synced_this_session: self.inner.synced_this_session.load(Ordering::SeqCst),
            online: self.is_online(),
            syncing: self.is_draining(),
        }
    }

    pub fn status(&self) -> SyncState {
        let stats = self.stats();
        if !stats.online {
            SyncState::Offline
        } else if stats.syncing {
            SyncState::Syncing
        } else if stats.errors > 0 {
            SyncState::Error
        } else if stats.pending > 0 {
            SyncState::Pending
        } else {
            SyncState::Synced
        }
    }

    /// Probe the backend and update connectivity from the answer.
    pub async fn refresh_connectivity(&self) -> bool {
        let reachable = self.inner.remote.is_reachable().await;
        self.set_online(reachable).await;
        reachable
    }

    /// Abort pending retry timers.
    pub fn dispose(&self) {
        if let Ok(mut retries) = self.inner.retries.lock() {
            for (_, handle) in retries.drain() {
                handle.abort();
            }
        }
    }

    async fn persist(&self) -> Result<()> {
        let _guard = self.inner.persist_lock.lock().await;
        let snapshot = self.list();
        save_json(self.inner.store.as_ref(), SYNC_CHANGES_KEY, &snapshot).await
    }
}
