//! Process-wide event channels.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::models::{FireEvent, SyncChangeId};

const DEFAULT_CAPACITY: usize = 64;

/// Dismissible notice raised by the sync queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncNotice {
    /// A drain finished and delivered at least one change
    Drained { synced: usize, remaining: usize },
    /// A change reached a terminal failure
    Failed {
        change_id: SyncChangeId,
        description: Option<String>,
        reason: String,
    },
}

/// Broadcast fan-out for fire events and sync notices.
///
/// Publishing never blocks; with no subscriber the event is dropped and
/// slow subscribers observe `RecvError::Lagged`.
#[derive(Debug, Clone)]
pub struct EventBus {
    fires: broadcast::Sender<FireEvent>,
    notices: broadcast::Sender<SyncNotice>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (fires, _) = broadcast::channel(capacity);
        let (notices, _) = broadcast::channel(capacity);
        Self { fires, notices }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FireEvent> {
        self.fires.subscribe()
    }

    pub fn subscribe_sync(&self) -> broadcast::Receiver<SyncNotice> {
        self.notices.subscribe()
    }

    /// Publish a fire event, returning how many subscribers received it.
    pub fn publish(&self, event: FireEvent) -> usize {
        tracing::info!("Fire event {:?} {}: {}", event.kind, event.id, event.title);
        self.fires.send(event).unwrap_or(0)
    }

    pub fn notify(&self, notice: SyncNotice) -> usize {
        self.notices.send(notice).unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Alarm, AlarmId, Recurrence};
    use chrono::Utc;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        let now = Utc::now();
        let alarm = Alarm::new(AlarmId(1), "Wake", "up", now, Recurrence::None);
        let event = FireEvent::for_alarm(&alarm, alarm.occurrence_key(), now);
        assert_eq!(bus.publish(event.clone()), 2);

        assert_eq!(first.recv().await.unwrap(), event);
        assert_eq!(second.recv().await.unwrap(), event);
    }

    #[test]
    fn publishing_without_subscribers_is_not_an_error() {
        let bus = EventBus::new();
        assert_eq!(
            bus.notify(SyncNotice::Drained {
                synced: 1,
                remaining: 0
            }),
            0
        );
    }
}
