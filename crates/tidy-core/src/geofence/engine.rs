//! Geofence catalogue and the position watch that drives it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc;

use super::evaluate::evaluate_geofences;
use crate::db::{load_json, save_json, KeyValueStore, GEOFENCES_KEY};
use crate::error::{Error, Result};
use crate::events::EventBus;
use crate::models::{FireEvent, Geofence, GeofenceDraft, GeofenceId, GeofencePatch, Position};

/// Platform geolocation facility
#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// One-shot position fix
    async fn current_position(&self) -> Result<Position>;

    /// Start pushing position updates into `sink` until `stop_watch`
    async fn start_watch(&self, sink: mpsc::Sender<Position>) -> Result<()>;

    async fn stop_watch(&self) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MostTriggered {
    pub id: GeofenceId,
    pub name: String,
    pub fire_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeofenceStats {
    pub total: usize,
    pub active: usize,
    /// Geofences that fired at least once
    pub triggered: usize,
    pub most_triggered: Option<MostTriggered>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ImportReport {
    pub imported: usize,
    pub skipped: usize,
}

struct Inner {
    store: Arc<dyn KeyValueStore>,
    bus: EventBus,
    provider: Option<Arc<dyn LocationProvider>>,
    positions: mpsc::Sender<Position>,
    geofences: Mutex<Vec<Geofence>>,
    watching: AtomicBool,
    watch_lock: tokio::sync::Mutex<()>,
    persist_lock: tokio::sync::Mutex<()>,
}

/// Owns geofences, evaluates positions and keeps the watch running while
/// any geofence is active
#[derive(Clone)]
pub struct GeofenceEngine {
    inner: Arc<Inner>,
}

impl GeofenceEngine {
    /// `positions` is the channel the watch feeds; its receiver belongs to
    /// whoever calls `evaluate` for each update.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        bus: EventBus,
        provider: Option<Arc<dyn LocationProvider>>,
        positions: mpsc::Sender<Position>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                bus,
                provider,
                positions,
                geofences: Mutex::new(Vec::new()),
                watching: AtomicBool::new(false),
                watch_lock: tokio::sync::Mutex::new(()),
                persist_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    fn geofences(&self) -> Result<MutexGuard<'_, Vec<Geofence>>> {
        self.inner
            .geofences
            .lock()
            .map_err(|_| Error::Database("geofence catalogue lock poisoned".to_string()))
    }

    /// Restore persisted geofences. A corrupted snapshot starts empty.
    pub async fn load(&self) -> Result<usize> {
        let loaded =
            match load_json::<Vec<Geofence>>(self.inner.store.as_ref(), GEOFENCES_KEY).await {
                Ok(geofences) => geofences.unwrap_or_default(),
                Err(Error::Serialization(error)) => {
                    tracing::warn!("Discarding unreadable geofence snapshot: {}", error);
                    Vec::new()
                }
                Err(error) => return Err(error),
            };
        let count = loaded.len();
        *self.geofences()? = loaded;
        tracing::info!("Loaded {} geofences", count);
        Ok(count)
    }

    /// Seed containment from a one-shot fix, then start watching if needed.
    pub async fn init(&self) -> Result<()> {
        let has_active = self.list().iter().any(|geofence| geofence.active);
        if has_active {
            if let Some(provider) = &self.inner.provider {
                match provider.current_position().await {
                    Ok(position) => {
                        self.evaluate(position).await;
                    }
                    Err(error) => {
                        tracing::warn!("Could not get initial position: {}", error);
                    }
                }
            }
        }
        self.reconcile_watch().await;
        Ok(())
    }

    pub async fn create(&self, draft: GeofenceDraft) -> Result<Geofence> {
        let geofence = draft.into_geofence(Utc::now())?;
        self.geofences()?.push(geofence.clone());
        self.persist().await?;
        self.reconcile_watch().await;
        tracing::info!(
            "Created geofence {} '{}' ({} m, {})",
            geofence.id,
            geofence.name,
            geofence.radius_meters,
            geofence.trigger_type
        );
        Ok(geofence)
    }

    pub async fn update(&self, id: GeofenceId, patch: GeofencePatch) -> Result<Geofence> {
        let updated = {
            let mut geofences = self.geofences()?;
            let geofence = find_mut(&mut geofences, id)?;
            let mut candidate = geofence.clone();
            patch.apply(&mut candidate)?;
            *geofence = candidate.clone();
            candidate
        };
        self.persist().await?;
        self.reconcile_watch().await;
        Ok(updated)
    }

    /// Remove a geofence; returns whether it existed.
    pub async fn delete(&self, id: GeofenceId) -> Result<bool> {
        let removed = {
            let mut geofences = self.geofences()?;
            let before = geofences.len();
            geofences.retain(|geofence| geofence.id != id);
            geofences.len() != before
        };
        if removed {
            self.persist().await?;
            self.reconcile_watch().await;
            tracing::info!("Deleted geofence {}", id);
        }
        Ok(removed)
    }

    /// Reactivation forgets the old containment so it is re-seeded.
    pub async fn set_active(&self, id: GeofenceId, active: bool) -> Result<()> {
        {
            let mut geofences = self.geofences()?;
            let geofence = find_mut(&mut geofences, id)?;
            if active && !geofence.active {
                geofence.state_known = false;
                geofence.triggered = false;
            }
            geofence.active = active;
        }
        self.persist().await?;
        self.reconcile_watch().await;
        Ok(())
    }

    /// Run one position through every active geofence and announce fires.
    pub async fn evaluate(&self, position: Position) -> Vec<FireEvent> {
        let now = Utc::now();
        let (triggers, changed) = {
            let Ok(mut geofences) = self.geofences() else {
                tracing::error!("Geofence catalogue unavailable, skipping position");
                return Vec::new();
            };
            let before: Vec<(bool, bool)> = geofences
                .iter()
                .map(|geofence| (geofence.triggered, geofence.state_known))
                .collect();
            let triggers = evaluate_geofences(&mut geofences, &position, now);
            let changed = !triggers.is_empty()
                || geofences
                    .iter()
                    .zip(&before)
                    .any(|(geofence, state)| (geofence.triggered, geofence.state_known) != *state);
            (triggers, changed)
        };

        let events: Vec<FireEvent> = triggers
            .into_iter()
            .map(|trigger| {
                tracing::info!(
                    "Geofence {} {} at {:.0} m",
                    trigger.geofence_id,
                    if trigger.entering { "entered" } else { "exited" },
                    trigger.distance_meters
                );
                trigger.event
            })
            .collect();
        for event in &events {
            self.inner.bus.publish(event.clone());
        }
        if changed {
            if let Err(error) = self.persist().await {
                tracing::error!("Failed to persist geofences: {}", error);
            }
        }
        events
    }

    pub fn list(&self) -> Vec<Geofence> {
        self.geofences()
            .map(|geofences| geofences.clone())
            .unwrap_or_default()
    }

    pub fn get(&self, id: GeofenceId) -> Option<Geofence> {
        self.geofences()
            .ok()?
            .iter()
            .find(|geofence| geofence.id == id)
            .cloned()
    }

    pub fn stats(&self) -> GeofenceStats {
        let geofences = self.list();
        let most_triggered = geofences
            .iter()
            .filter(|geofence| geofence.fire_count > 0)
            .max_by_key(|geofence| geofence.fire_count)
            .map(|geofence| MostTriggered {
                id: geofence.id,
                name: geofence.name.clone(),
                fire_count: geofence.fire_count,
            });
        GeofenceStats {
            total: geofences.len(),
            active: geofences.iter().filter(|geofence| geofence.active).count(),
            triggered: geofences
                .iter()
                .filter(|geofence| geofence.fire_count > 0)
                .count(),
            most_triggered,
        }
    }

    /// Pretty JSON backup of every geofence.
    pub fn export_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.list())?)
    }

    /// Merge a backup produced by `export_json`.
    ///
    /// Entries replace geofences with the same id; malformed or invalid
    /// entries are skipped. A payload that is not a JSON array is an error.
    pub async fn import_json(&self, raw: &str) -> Result<ImportReport> {
        let entries: Vec<serde_json::Value> = serde_json::from_str(raw)
            .map_err(|error| Error::InvalidInput(format!("geofence backup must be a JSON array: {error}")))?;

        let mut report = ImportReport::default();
        let mut accepted = Vec::new();
        for entry in entries {
            match serde_json::from_value::<Geofence>(entry) {
                Ok(geofence) if geofence.validate().is_ok() => accepted.push(geofence),
                Ok(geofence) => {
                    tracing::warn!("Skipping invalid geofence {} in backup", geofence.id);
                    report.skipped += 1;
                }
                Err(error) => {
                    tracing::warn!("Skipping malformed geofence entry: {}", error);
                    report.skipped += 1;
                }
            }
        }

        {
            let mut geofences = self.geofences()?;
            for mut geofence in accepted {
                if geofence.repeat_limit > 0 && geofence.fire_count > geofence.repeat_limit {
                    geofence.fire_count = geofence.repeat_limit;
                }
                match geofences.iter_mut().find(|existing| existing.id == geofence.id) {
                    Some(existing) => *existing = geofence,
                    None => geofences.push(geofence),
                }
                report.imported += 1;
            }
        }

        self.persist().await?;
        self.reconcile_watch().await;
        tracing::info!(
            "Imported {} geofences ({} skipped)",
            report.imported,
            report.skipped
        );
        Ok(report)
    }

    pub fn is_watching(&self) -> bool {
        self.inner.watching.load(Ordering::SeqCst)
    }

    /// Start or stop the position watch to match the active geofences.
    pub async fn reconcile_watch(&self) {
        let Some(provider) = &self.inner.provider else {
            return;
        };
        let _guard = self.inner.watch_lock.lock().await;
        let wanted = self.list().iter().any(|geofence| geofence.active);
        let watching = self.is_watching();

        if wanted && !watching {
            match provider.start_watch(self.inner.positions.clone()).await {
                Ok(()) => {
                    self.inner.watching.store(true, Ordering::SeqCst);
                    tracing::info!("Started location watch");
                }
                Err(Error::PermissionDenied(reason)) => {
                    tracing::warn!("Location permission denied, geofencing paused: {}", reason);
                }
                Err(error) => tracing::warn!("Failed to start location watch: {}", error),
            }
        } else if !wanted && watching {
            if let Err(error) = provider.stop_watch().await {
                tracing::warn!("Failed to stop location watch: {}", error);
            }
            self.inner.watching.store(false, Ordering::SeqCst);
            tracing::info!("Stopped location watch");
        }
    }

    /// Stop the watch regardless of the catalogue.
    pub async fn dispose(&self) {
        let Some(provider) = &self.inner.provider else {
            return;
        };
        let _guard = self.inner.watch_lock.lock().await;
        if self.inner.watching.swap(false, Ordering::SeqCst) {
            if let Err(error) = provider.stop_watch().await {
                tracing::warn!("Failed to stop location watch: {}", error);
            }
        }
    }

    async fn persist(&self) -> Result<()> {
        let _guard = self.inner.persist_lock.lock().await;
        let snapshot = self.list();
        save_json(self.inner.store.as_ref(), GEOFENCES_KEY, &snapshot).await
    }
}

fn find_mut(geofences: &mut [Geofence], id: GeofenceId) -> Result<&mut Geofence> {
    geofences
        .iter_mut()
        .find(|geofence| geofence.id == id)
        .ok_or_else(|| Error::NotFound(format!("geofence {id}")))
}
