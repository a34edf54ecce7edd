//! Notification bridge over the platform alarm facilities.
//!
//! Hosts provide up to two backends: an exact-alarm facility that survives
//! the process, and a generic local-notification facility. The bridge probes
//! them once per session and picks the best one that has permission.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::OnceCell;

use crate::error::Result;
use crate::models::{Alarm, AlarmId, Backend};

/// Platform exact-alarm facility
#[async_trait]
pub trait ExactAlarmPlatform: Send + Sync {
    /// Whether the user granted exact-alarm permission
    async fn permission_granted(&self) -> bool;

    async fn schedule(&self, alarm: &Alarm) -> Result<()>;

    /// Cancel an alarm, returning whether it was scheduled
    async fn cancel(&self, id: AlarmId) -> Result<bool>;
}

/// Generic local-notification facility
#[async_trait]
pub trait LocalNotificationPlatform: Send + Sync {
    /// Whether the user granted display permission
    async fn permission_granted(&self) -> bool;

    async fn schedule(&self, alarm: &Alarm) -> Result<()>;

    async fn cancel(&self, id: AlarmId) -> Result<bool>;

    /// Notifications scheduled but not yet delivered
    async fn pending(&self) -> Result<Vec<Alarm>>;
}

/// Result of the one-time permission probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capability {
    /// Exact alarms are available and permitted
    pub exact: bool,
    /// Local notifications are available and permitted
    pub display: bool,
}

/// What happened to an arm request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmResult {
    Armed(Backend),
    /// Trigger time is not in the future; no platform call was made
    Rejected,
    /// No backend could take the alarm; the caller must poll
    Unavailable,
}

/// Chooses and drives the notification backend for alarms
pub struct NotificationBridge {
    exact: Option<Arc<dyn ExactAlarmPlatform>>,
    local: Option<Arc<dyn LocalNotificationPlatform>>,
    capability: OnceCell<Capability>,
    exact_demoted: AtomicBool,
    /// Alarms held by the exact backend, which cannot enumerate them
    exact_armed: Mutex<HashMap<AlarmId, Alarm>>,
}

impl NotificationBridge {
    pub fn new(
        exact: Option<Arc<dyn ExactAlarmPlatform>>,
        local: Option<Arc<dyn LocalNotificationPlatform>>,
    ) -> Self {
        Self {
            exact,
            local,
            capability: OnceCell::new(),
            exact_demoted: AtomicBool::new(false),
            exact_armed: Mutex::new(HashMap::new()),
        }
    }

    /// Bridge with no platform backend; every alarm relies on polling.
    pub fn polling_only() -> Self {
        Self::new(None, None)
    }

    /// Probe permissions once; later calls return the cached answer.
    pub async fn probe_capability(&self) -> Capability {
        *self
            .capability
            .get_or_init(|| async {
                let exact = match &self.exact {
                    Some(platform) => platform.permission_granted().await,
                    None => false,
                };
                let display_granted = match &self.local {
                    Some(platform) => platform.permission_granted().await,
                    None => false,
                };
                if !exact && !display_granted {
                    tracing::warn!("No notification permission granted, alarms rely on polling");
                } else {
                    tracing::info!(
                        "Notification capability: exact={}, display={}",
                        exact,
                        display_granted
                    );
                }
                Capability {
                    exact,
                    display: display_granted,
                }
            })
            .await
    }

    /// Backend new alarms go to, if any.
    pub async fn active_backend(&self) -> Option<Backend> {
        let capability = self.probe_capability().await;
        if capability.exact && !self.exact_demoted.load(Ordering::SeqCst) {
            Some(Backend::Exact)
        } else if capability.display {
            Some(Backend::Local)
        } else {
            None
        }
    }

    /// Hand an alarm to the best available backend.
    pub async fn arm(&self, alarm: &Alarm) -> ArmResult {
        self.arm_at(alarm, Utc::now()).await
    }

    pub async fn arm_at(&self, alarm: &Alarm, now: DateTime<Utc>) -> ArmResult {
        if alarm.trigger_at <= now {
            tracing::debug!("Rejected arm for alarm {}: trigger time has passed", alarm.id);
            return ArmResult::Rejected;
        }

        if self.active_backend().await == Some(Backend::Exact) {
            if let Some(exact) = &self.exact {
                match exact.schedule(alarm).await {
                    Ok(()) => {
                        if let Ok(mut armed) = self.exact_armed.lock() {
                            armed.insert(alarm.id, alarm.clone());
                        }
                        return ArmResult::Armed(Backend::Exact);
                    }
                    Err(error) => {
                        tracing::warn!(
                            "Exact alarm backend failed for {}, switching to local notifications: {}",
                            alarm.id,
                            error
                        );
                        self.exact_demoted.store(true, Ordering::SeqCst);
                    }
                }
            }
        }

        if !self.probe_capability().await.display {
            return ArmResult::Unavailable;
        }
        let Some(local) = &self.local else {
            return ArmResult::Unavailable;
        };
        match local.schedule(alarm).await {
            Ok(()) => ArmResult::Armed(Backend::Local),
            Err(error) => {
                tracing::warn!("Local notification failed for {}: {}", alarm.id, error);
                ArmResult::Unavailable
            }
        }
    }

    /// Cancel an alarm on every backend; returns whether any of them had it.
    pub async fn disarm(&self, id: AlarmId) -> bool {
        let mut found = self
            .exact_armed
            .lock()
            .map(|mut armed| armed.remove(&id).is_some())
            .unwrap_or(false);

        if let Some(exact) = &self.exact {
            match exact.cancel(id).await {
                Ok(had) => found |= had,
                Err(error) => tracing::warn!("Failed to cancel exact alarm {}: {}", id, error),
            }
        }
        if let Some(local) = &self.local {
            match local.cancel(id).await {
                Ok(had) => found |= had,
                Err(error) => tracing::warn!("Failed to cancel notification {}: {}", id, error),
            }
        }
        found
    }

    /// Alarms armed on a backend whose trigger time is still ahead.
    pub async fn list_armed(&self) -> Vec<Alarm> {
        self.list_armed_at(Utc::now()).await
    }

    pub async fn list_armed_at(&self, now: DateTime<Utc>) -> Vec<Alarm> {
        let mut by_id: HashMap<AlarmId, Alarm> = HashMap::new();
        if let Ok(mut armed) = self.exact_armed.lock() {
            armed.retain(|_, alarm| alarm.trigger_at > now);
            by_id.extend(armed.iter().map(|(id, alarm)| (*id, alarm.clone())));
        }

        if let Some(local) = &self.local {
            match local.pending().await {
                Ok(pending) => {
                    for alarm in pending.into_iter().filter(|alarm| alarm.trigger_at > now) {
                        by_id.entry(alarm.id).or_insert(alarm);
                    }
                }
                Err(error) => tracing::warn!("Failed to list pending notifications: {}", error),
            }
        }

        let mut alarms: Vec<Alarm> = by_id.into_values().collect();
        alarms.sort_by_key(|alarm| (alarm.trigger_at, alarm.id));
        alarms
    }

    /// Disarm every alarm known to any backend, returning how many were removed.
    pub async fn cancel_all(&self) -> usize {
        let mut ids: Vec<AlarmId> = self
            .exact_armed
            .lock()
            .map(|armed| armed.keys().copied().collect())
            .unwrap_or_default();
        if let Some(local) = &self.local {
            if let Ok(pending) = local.pending().await {
                ids.extend(pending.into_iter().map(|alarm| alarm.id));
            }
        }
        ids.sort_unstable();
        ids.dedup();

        let mut removed = 0;
        for id in ids {
            if self.disarm(id).await {
                removed += 1;
            }
        }
        removed
    }
}
