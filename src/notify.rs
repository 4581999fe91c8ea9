use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Lifecycle fan-out. Payment and notification services subscribe either to
/// one room or to the whole ledger; slow subscribers lag, they never block writers.
pub struct NotifyHub {
    rooms: DashMap<Ulid, broadcast::Sender<Event>>,
    all: broadcast::Sender<Event>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            all: broadcast::channel(CHANNEL_CAPACITY * 4).0,
        }
    }

    /// Subscribe to one room. Creates the channel if needed.
    pub fn subscribe(&self, room_id: Ulid) -> broadcast::Receiver<Event> {
        self.rooms
            .entry(room_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Subscribe to every event the ledger emits.
    pub fn subscribe_all(&self) -> broadcast::Receiver<Event> {
        self.all.subscribe()
    }

    /// Publish an event. No-op for channels nobody listens on.
    pub fn send(&self, event: &Event) {
        let room_id = event.room_id();
        if let Some(sender) = self.rooms.get(&room_id) {
            let _ = sender.send(event.clone());
        }
        let _ = self.all.send(event.clone());
    }
}
