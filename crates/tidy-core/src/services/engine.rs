//! Explicit engine context shared by every host.

use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::alarm::AlarmScheduler;
use crate::config::EngineConfig;
use crate::db::KeyValueStore;
use crate::error::{Error, Result};
use crate::events::{EventBus, SyncNotice};
use crate::geofence::{GeofenceEngine, LocationProvider};
use crate::models::{FireEvent, Position};
use crate::notify::NotificationBridge;
use crate::sync::{RemoteApi, RetryPolicy, SyncQueue};

const POSITION_BUFFER: usize = 64;

/// Owns the scheduler, geofence engine and sync queue plus the background
/// tasks that drive them.
pub struct Engine {
    config: EngineConfig,
    bus: EventBus,
    alarms: AlarmScheduler,
    geofences: GeofenceEngine,
    sync: SyncQueue,
    positions: Mutex<Option<mpsc::Receiver<Position>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn KeyValueStore>,
        bridge: NotificationBridge,
        provider: Option<Arc<dyn LocationProvider>>,
        remote: Arc<dyn RemoteApi>,
    ) -> Self {
        let bus = EventBus::new();
        let (position_tx, position_rx) = mpsc::channel(POSITION_BUFFER);
        let alarms = AlarmScheduler::new(
            Arc::new(bridge),
            store.clone(),
            bus.clone(),
            config.fire_tolerance(),
        );
        let geofences = GeofenceEngine::new(store.clone(), bus.clone(), provider, position_tx);
        let sync = SyncQueue::new(store, remote, bus.clone(), RetryPolicy::from_config(&config));

        Self {
            config,
            bus,
            alarms,
            geofences,
            sync,
            positions: Mutex::new(Some(position_rx)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Restore persisted state, re-arm alarms and start background work.
    ///
    /// Can only run once per engine.
    pub async fn init(&self) -> Result<()> {
        let receiver = self
            .positions
            .lock()
            .map_err(|_| Error::Database("engine lock poisoned".to_string()))?
            .take()
            .ok_or_else(|| Error::InvalidInput("engine already initialized".to_string()))?;

        let alarms = self.alarms.load().await?;
        let geofences = self.geofences.load().await?;
        let changes = self.sync.load().await?;
        tracing::info!(
            "Engine state restored: {} alarms, {} geofences, {} queued changes",
            alarms,
            geofences,
            changes
        );

        let capability = self.alarms.bridge().probe_capability().await;
        tracing::info!(
            "Notification capability: exact={}, display={}",
            capability.exact,
            capability.display
        );
        let rearmed = self.alarms.reschedule_all().await?;
        tracing::debug!("Re-armed {} alarms", rearmed);

        self.geofences.init().await?;

        if !self.config.has_remote() {
            tracing::info!("No backend configured, sync queue stays offline");
            self.sync.set_online(false).await;
        }

        let handles = vec![
            self.spawn_sweep(),
            self.spawn_position_consumer(receiver),
            self.spawn_drain(),
        ];
        self.tasks
            .lock()
            .map_err(|_| Error::Database("engine lock poisoned".to_string()))?
            .extend(handles);
        Ok(())
    }

    /// Stop background work. Armed platform notifications stay armed.
    pub async fn dispose(&self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for handle in tasks.drain(..) {
                handle.abort();
            }
        }
        self.sync.dispose();
        self.geofences.dispose().await;
        tracing::info!("Engine stopped");
    }

    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub const fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub const fn alarms(&self) -> &AlarmScheduler {
        &self.alarms
    }

    pub const fn geofences(&self) -> &GeofenceEngine {
        &self.geofences
    }

    pub const fn sync(&self) -> &SyncQueue {
        &self.sync
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FireEvent> {
        self.bus.subscribe()
    }

    pub fn subscribe_sync(&self) -> broadcast::Receiver<SyncNotice> {
        self.bus.subscribe_sync()
    }

    /// Host connectivity signal.
    pub async fn set_online(&self, online: bool) {
        if online && !self.config.has_remote() {
            tracing::warn!("Ignoring online signal, no backend configured");
            return;
        }
        self.sync.set_online(online).await;
    }

    fn spawn_sweep(&self) -> JoinHandle<()> {
        let alarms = self.alarms.clone();
        let period = self.config.poll_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let fired = alarms.poll_sweep().await;
                if !fired.is_empty() {
                    tracing::debug!("Polling sweep fired {} alarms", fired.len());
                }
            }
        })
    }

    fn spawn_position_consumer(&self, mut receiver: mpsc::Receiver<Position>) -> JoinHandle<()> {
        let geofences = self.geofences.clone();
        tokio::spawn(async move {
            while let Some(position) = receiver.recv().await {
                geofences.evaluate(position).await;
            }
            tracing::debug!("Position stream closed");
        })
    }

    fn spawn_drain(&self) -> JoinHandle<()> {
        let sync = self.sync.clone();
        let period = self.config.sync_drain_interval();
        let probe = self.config.has_remote();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if !probe {
                    continue;
                }
                if sync.refresh_connectivity().await {
                    let report = sync.drain().await;
                    if report.attempted > 0 {
                        tracing::debug!(
                            "Periodic drain: {} attempted, {} synced",
                            report.attempted,
                            report.synced
                        );
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;

    use super::*;
    use crate::db::MemoryStore;
    use crate::geo::{offset_north, GeoPoint};
    use crate::models::{AlarmId, AlarmRequest, GeofenceDraft, NewSyncChange, Recurrence, TriggerType};
    use crate::sync::NullRemote;
    use crate::test_support::{FakeLocationProvider, FakeRemote};

    const CENTER: GeoPoint = GeoPoint::new(19.4326, -99.1332);

    fn remote_config() -> EngineConfig {
        EngineConfig {
            api_base_url: Some("https://api.example.com/api".to_string()),
            ..EngineConfig::default()
        }
    }

    #[tokio::test]
    async fn positions_from_the_watch_reach_subscribers() {
        let provider = Arc::new(FakeLocationProvider::new(None));
        let engine = Engine::new(
            EngineConfig::default(),
            Arc::new(MemoryStore::new()),
            NotificationBridge::polling_only(),
            Some(provider.clone()),
            Arc::new(NullRemote),
        );
        engine.init().await.unwrap();
        let mut events = engine.subscribe();

        engine
            .geofences()
            .create(GeofenceDraft::new(CENTER, 100.0, TriggerType::Enter))
            .await
            .unwrap();
        assert!(provider.is_watching());

        provider
            .emit(Position::new(offset_north(CENTER, 500.0), Utc::now()))
            .await;
        provider
            .emit(Position::new(offset_north(CENTER, 50.0), Utc::now()))
            .await;

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.entering, Some(true));

        engine.dispose().await;
        assert!(!provider.is_watching());
    }

    #[tokio::test]
    async fn init_restores_state_and_runs_once() {
        let store = Arc::new(MemoryStore::new());
        let first = Engine::new(
            EngineConfig::default(),
            store.clone(),
            NotificationBridge::polling_only(),
            None,
            Arc::new(NullRemote),
        );
        first.init().await.unwrap();
        first
            .alarms()
            .schedule(AlarmRequest {
                id: AlarmId(7),
                title: "Water plants".to_string(),
                body: String::new(),
                trigger_at: (Utc::now() + chrono::Duration::hours(1)).to_rfc3339(),
                recurrence: Recurrence::Daily,
            })
            .await
            .unwrap();
        assert!(first.init().await.is_err());
        first.dispose().await;

        let second = Engine::new(
            EngineConfig::default(),
            store,
            NotificationBridge::polling_only(),
            None,
            Arc::new(NullRemote),
        );
        second.init().await.unwrap();
        assert_eq!(second.alarms().list().len(), 1);
        second.dispose().await;
    }

    #[tokio::test]
    async fn without_backend_changes_stay_queued() {
        let engine = Engine::new(
            EngineConfig::default(),
            Arc::new(MemoryStore::new()),
            NotificationBridge::polling_only(),
            None,
            Arc::new(NullRemote),
        );
        engine.init().await.unwrap();
        assert!(!engine.sync().is_online());

        engine
            .sync()
            .enqueue(NewSyncChange::delete_element("user-1", 42))
            .await
            .unwrap();
        engine.set_online(true).await;
        assert!(!engine.sync().is_online());
        assert_eq!(engine.sync().stats().pending, 1);
        engine.dispose().await;
    }

    #[tokio::test]
    async fn going_online_drains_through_remote() {
        let remote = Arc::new(FakeRemote::new());
        remote.set_reachable(false);
        let engine = Engine::new(
            remote_config(),
            Arc::new(MemoryStore::new()),
            NotificationBridge::polling_only(),
            None,
            remote.clone(),
        );
        engine.init().await.unwrap();
        // let the startup connectivity probe mark the queue offline
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        assert!(!engine.sync().is_online());

        let change = engine
            .sync()
            .enqueue(NewSyncChange::delete_element("user-1", 42))
            .await
            .unwrap();
        assert!(remote.calls().is_empty());

        engine.set_online(true).await;
        assert_eq!(remote.calls(), vec![change.id]);
        assert_eq!(engine.sync().stats().pending, 0);
        engine.dispose().await;
    }
}
