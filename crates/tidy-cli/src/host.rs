//! Terminal implementations of the engine's platform seams.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tidy_core::config::EngineConfig;
use tidy_core::db::{Database, SqliteStore};
use tidy_core::geofence::LocationProvider;
use tidy_core::models::{Alarm, AlarmId, Position};
use tidy_core::notify::{LocalNotificationPlatform, NotificationBridge};
use tidy_core::sync::{HttpRemoteApi, NullRemote, RemoteApi};
use tidy_core::{Engine, Error};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::CliError;

/// Delay between replayed positions
const REPLAY_INTERVAL: Duration = Duration::from_secs(1);

/// Occurrence reported by a notification timer
pub type Delivery = (AlarmId, DateTime<Utc>);

/// In-process notification timers.
///
/// Each armed alarm gets a tokio timer that reports the occurrence back to
/// the engine when it elapses. Timers die with the process.
pub struct TimerNotifier {
    deliveries: mpsc::Sender<Delivery>,
    timers: Mutex<HashMap<AlarmId, (Alarm, JoinHandle<()>)>>,
}

impl TimerNotifier {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<Delivery>) {
        let (tx, rx) = mpsc::channel(buffer);
        (
            Self {
                deliveries: tx,
                timers: Mutex::new(HashMap::new()),
            },
            rx,
        )
    }

    #[cfg(test)]
    pub fn tracked(&self) -> usize {
        self.timers.lock().map(|timers| timers.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LocalNotificationPlatform for TimerNotifier {
    async fn permission_granted(&self) -> bool {
        true
    }

    async fn schedule(&self, alarm: &Alarm) -> tidy_core::Result<()> {
        let delay = (alarm.trigger_at - Utc::now()).to_std().unwrap_or_default();
        let deliveries = self.deliveries.clone();
        let occurrence = (alarm.id, alarm.trigger_at);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if deliveries.send(occurrence).await.is_err() {
                tracing::debug!("Notification for alarm {} had no listener", occurrence.0);
            }
        });

        let mut timers = self
            .timers
            .lock()
            .map_err(|_| Error::Transport("notification timers lock poisoned".to_string()))?;
        prune_finished(&mut timers);
        if let Some((_, previous)) = timers.insert(alarm.id, (alarm.clone(), handle)) {
            previous.abort();
        }
        Ok(())
    }

    async fn cancel(&self, id: AlarmId) -> tidy_core::Result<bool> {
        let removed = self
            .timers
            .lock()
            .map_err(|_| Error::Transport("notification timers lock poisoned".to_string()))?
            .remove(&id);
        Ok(removed.is_some_and(|(_, handle)| {
            handle.abort();
            true
        }))
    }

    async fn pending(&self) -> tidy_core::Result<Vec<Alarm>> {
        let mut timers = self
            .timers
            .lock()
            .map_err(|_| Error::Transport("notification timers lock poisoned".to_string()))?;
        prune_finished(&mut timers);
        Ok(timers.values().map(|(alarm, _)| alarm.clone()).collect())
    }
}

/// Drop timers that already delivered.
fn prune_finished(timers: &mut HashMap<AlarmId, (Alarm, JoinHandle<()>)>) {
    timers.retain(|_, (_, handle)| !handle.is_finished());
}

#[derive(Debug, Deserialize)]
struct PositionLine {
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    accuracy: Option<f64>,
}

/// Parse one JSON-lines entry such as `{"latitude": 19.43, "longitude": -99.13}`.
pub fn parse_position_line(line: &str, timestamp: DateTime<Utc>) -> Result<Position, CliError> {
    let parsed: PositionLine = serde_json::from_str(line)
        .map_err(|error| CliError::InvalidPayload(format!("bad position line: {error}")))?;
    Ok(Position {
        latitude: parsed.latitude,
        longitude: parsed.longitude,
        accuracy: parsed.accuracy,
        timestamp,
    })
}

/// Location stream replayed from a JSON-lines file
pub struct ReplayLocationProvider {
    positions: Vec<Position>,
    interval: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ReplayLocationProvider {
    pub fn from_path(path: &Path) -> Result<Self, CliError> {
        let raw = std::fs::read_to_string(path)?;
        let now = Utc::now();
        let positions = raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(|line| parse_position_line(line, now))
            .collect::<Result<Vec<_>, _>>()?;
        tracing::info!(
            "Loaded {} positions from {}",
            positions.len(),
            path.display()
        );
        Ok(Self {
            positions,
            interval: REPLAY_INTERVAL,
            task: Mutex::new(None),
        })
    }

    fn stop_task(&self) -> tidy_core::Result<()> {
        let mut task = self
            .task
            .lock()
            .map_err(|_| Error::Transport("replay lock poisoned".to_string()))?;
        if let Some(handle) = task.take() {
            handle.abort();
        }
        Ok(())
    }
}

#[async_trait]
impl LocationProvider for ReplayLocationProvider {
    /// The first replayed position stands in for the current fix.
    async fn current_position(&self) -> tidy_core::Result<Position> {
        self.positions
            .first()
            .map(|position| Position {
                timestamp: Utc::now(),
                ..*position
            })
            .ok_or_else(|| Error::NotFound("no positions to replay".to_string()))
    }

    async fn start_watch(&self, sink: mpsc::Sender<Position>) -> tidy_core::Result<()> {
        self.stop_task()?;
        let positions = self.positions.clone();
        let interval = self.interval;
        let handle = tokio::spawn(async move {
            for position in positions.into_iter().skip(1) {
                tokio::time::sleep(interval).await;
                let position = Position {
                    timestamp: Utc::now(),
                    ..position
                };
                if sink.send(position).await.is_err() {
                    return;
                }
            }
            tracing::info!("Position replay finished");
        });
        *self
            .task
            .lock()
            .map_err(|_| Error::Transport("replay lock poisoned".to_string()))? = Some(handle);
        Ok(())
    }

    async fn stop_watch(&self) -> tidy_core::Result<()> {
        self.stop_task()
    }
}

/// Everything a command needs to talk to the engine
pub struct Host {
    pub engine: Engine,
    pub deliveries: mpsc::Receiver<Delivery>,
}

/// Backend client for the config, or a stand-in that keeps changes queued.
pub fn build_remote(config: &EngineConfig, offline: bool) -> Result<Arc<dyn RemoteApi>, CliError> {
    if offline {
        return Ok(Arc::new(NullRemote));
    }
    match HttpRemoteApi::from_config(config)? {
        Some(remote) => {
            tracing::info!("Sync backend: {}", remote.base_url());
            Ok(Arc::new(remote))
        }
        None => Ok(Arc::new(NullRemote)),
    }
}

/// Open the database and build an initialized engine.
pub async fn open_host(
    config: EngineConfig,
    db_path: &Path,
    provider: Option<Arc<dyn LocationProvider>>,
    offline: bool,
) -> Result<Host, CliError> {
    let database = Arc::new(Database::open(db_path)?);
    let store = Arc::new(SqliteStore::new(database));
    let (notifier, deliveries) = TimerNotifier::new(32);
    let bridge = NotificationBridge::new(None, Some(Arc::new(notifier)));
    let remote = build_remote(&config, offline)?;

    let engine = Engine::new(config, store, bridge, provider, remote);
    engine.init().await?;
    if offline {
        engine.set_online(false).await;
    }
    Ok(Host { engine, deliveries })
}
