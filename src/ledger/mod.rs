mod calendar;
mod conflict;
mod error;
mod mutations;
mod queries;

pub use calendar::{free_nights, merge_overlapping, subtract_stays};
pub use error::LedgerError;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use ulid::Ulid;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::policy::{CreationPolicy, RefundPolicy, TieredRefund};
use crate::wal::Wal;

pub(crate) type SharedRoomState = Arc<RwLock<RoomState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    /// One or more events that must land in the same flush.
    Append {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Vec<Event>, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Blocks for one append, drains whatever else is already
/// queued, then pays for a single fsync covering the whole batch.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (events, response) = match cmd {
            WalCommand::Append { events, response } => (events, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };

        let mut batch = vec![(events, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { events, response }) => batch.push((events, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        commit_batch(&mut wal, &mut batch);
        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
    tracing::debug!("WAL writer stopped");
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    let event_count: usize = batch.iter().map(|(events, _)| events.len()).sum();
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(event_count as f64);
    let flush_start = std::time::Instant::now();

    // Encode per caller so one unencodable request fails alone, then write the
    // rest in a single append that lands or rolls back as a whole.
    let mut frames = Vec::new();
    let mut committing = Vec::with_capacity(batch.len());
    for (events, tx) in batch.drain(..) {
        match Wal::encode_frames(&events) {
            Ok(encoded) => {
                frames.extend_from_slice(&encoded);
                committing.push((events.len() as u64, tx));
            }
            Err(e) => {
                tracing::warn!("WAL rejected {} events: {e}", events.len());
                let _ = tx.send(Err(e));
            }
        }
    }
    if committing.is_empty() {
        return;
    }
    let count = committing.iter().map(|(n, _)| n).sum();
    let result = wal.append_frames(&frames, count);

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush failed for {count} events: {e}");
    }

    for (_, tx) in committing {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            if result.is_ok() {
                metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
            }
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { events, response } => {
            let mut batch = vec![(events, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

/// The availability ledger: rooms, their reservations, and the rules that
/// keep two guests out of the same bed on the same night.
///
/// Every room sits behind its own `RwLock`. Anything that can change a room
/// (WAL append, in-memory apply, notification) happens under that room's
/// write lock, so the overlap re-check and the insert are one step for every
/// other caller targeting the same room, while other rooms proceed untouched.
pub struct Ledger {
    pub(super) rooms: DashMap<Ulid, SharedRoomState>,
    /// Serialises room registration against compaction snapshots.
    pub(super) registry: Mutex<()>,
    /// Reverse lookup: reservation id → room id.
    pub(super) reservation_room: DashMap<Ulid, Ulid>,
    pub(super) guest_reservations: DashMap<Ulid, Vec<Ulid>>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) refund_policy: Arc<dyn RefundPolicy>,
    pub(super) creation_policy: CreationPolicy,
    pub(super) pending_hold_ttl: chrono::Duration,
}

pub struct LedgerBuilder {
    wal_path: PathBuf,
    notify: Arc<NotifyHub>,
    clock: Arc<dyn Clock>,
    refund_policy: Arc<dyn RefundPolicy>,
    creation_policy: CreationPolicy,
    pending_hold_ttl: Duration,
}

impl LedgerBuilder {
    pub fn new(wal_path: PathBuf) -> Self {
        let defaults = Config::default();
        Self {
            wal_path,
            notify: Arc::new(NotifyHub::new()),
            clock: Arc::new(SystemClock),
            refund_policy: Arc::new(TieredRefund::default()),
            creation_policy: defaults.creation_policy,
            pending_hold_ttl: defaults.pending_hold_ttl,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.wal_path())
            .refund_policy(config.refund)
            .creation_policy(config.creation_policy)
            .pending_hold_ttl(config.pending_hold_ttl)
    }

    pub fn notify(mut self, notify: Arc<NotifyHub>) -> Self {
        self.notify = notify;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn refund_policy(mut self, policy: impl RefundPolicy + 'static) -> Self {
        self.refund_policy = Arc::new(policy);
        self
    }

    pub fn creation_policy(mut self, policy: CreationPolicy) -> Self {
        self.creation_policy = policy;
        self
    }

    pub fn pending_hold_ttl(mut self, ttl: Duration) -> Self {
        self.pending_hold_ttl = ttl;
        self
    }

    /// Replay the WAL and start the writer task. Must run inside a tokio runtime.
    pub fn open(self) -> io::Result<Ledger> {
        let events = Wal::recover(&self.wal_path)?;
        let wal = Wal::open(&self.wal_path)?;
        let pending_hold_ttl = chrono::Duration::from_std(self.pending_hold_ttl)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let ledger = Ledger {
            rooms: DashMap::new(),
            registry: Mutex::new(()),
            reservation_room: DashMap::new(),
            guest_reservations: DashMap::new(),
            wal_tx,
            notify: self.notify,
            clock: self.clock,
            refund_policy: self.refund_policy,
            creation_policy: self.creation_policy,
            pending_hold_ttl,
        };
        ledger.restore(&events);
        tracing::info!(
            "ledger opened from {}: {} events, {} rooms, {} reservations",
            self.wal_path.display(),
            events.len(),
            ledger.rooms.len(),
            ledger.reservation_room.len()
        );
        Ok(ledger)
    }
}

/// Apply an event to a room. Caller holds the room's write lock.
fn apply_to_room(
    rs: &mut RoomState,
    event: &Event,
    reservation_room: &DashMap<Ulid, Ulid>,
    guest_reservations: &DashMap<Ulid, Vec<Ulid>>,
) {
    match event {
        Event::ReservationCreated { reservation } | Event::ReservationRecorded { reservation } => {
            if let Some(existing) = rs.reservation_mut(reservation.id) {
                *existing = reservation.clone();
            } else {
                rs.insert_reservation(reservation.clone());
            }
            reservation_room.insert(reservation.id, rs.id);
            let mut ids = guest_reservations.entry(reservation.guest_id).or_default();
            if !ids.contains(&reservation.id) {
                ids.push(reservation.id);
            }
        }
        Event::ReservationTransitioned {
            id,
            to,
            at,
            cancellation,
            ..
        } => {
            if let Some(r) = rs.reservation_mut(*id) {
                r.status = *to;
                r.modified_at = *at;
                if *to != ReservationStatus::Pending {
                    r.hold_expires_at = None;
                }
                if cancellation.is_some() {
                    r.cancellation = cancellation.clone();
                }
            }
        }
        Event::PaymentStatusChanged { id, status, at, .. } => {
            if let Some(r) = rs.reservation_mut(*id) {
                r.payment_status = *status;
                r.modified_at = *at;
            }
        }
        Event::RoomActivityChanged { active, .. } => rs.active = *active,
        // Registration creates the room itself; handled by the caller.
        Event::RoomRegistered { .. } => {}
    }
}

impl Ledger {
    /// Open with default policies and the system clock.
    pub fn open(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        LedgerBuilder::new(wal_path).notify(notify).open()
    }

    pub fn builder(wal_path: PathBuf) -> LedgerBuilder {
        LedgerBuilder::new(wal_path)
    }

    /// Rebuild state from replayed events. Rooms are assembled unshared and
    /// only published once complete, so no lock is ever taken here.
    fn restore(&self, events: &[Event]) {
        let mut rooms: HashMap<Ulid, RoomState> = HashMap::new();
        for event in events {
            match event {
                Event::RoomRegistered { id, property_id, number, active } => {
                    rooms
                        .entry(*id)
                        .or_insert_with(|| RoomState::new(*id, *property_id, number.clone(), *active));
                }
                other => match rooms.get_mut(&other.room_id()) {
                    Some(rs) => apply_to_room(rs, other, &self.reservation_room, &self.guest_reservations),
                    None => tracing::warn!("replay: event for unknown room {}", other.room_id()),
                },
            }
        }
        for (id, rs) in rooms {
            self.rooms.insert(id, Arc::new(RwLock::new(rs)));
        }
        metrics::gauge!(crate::observability::ROOMS_TRACKED).set(self.rooms.len() as f64);
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), LedgerError> {
        self.wal_append_all(vec![event.clone()]).await
    }

    /// Write several events in one flush; they succeed or fail together.
    async fn wal_append_all(&self, events: Vec<Event>) -> Result<(), LedgerError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                events,
                response: tx,
            })
            .await
            .map_err(|_| LedgerError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| LedgerError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| LedgerError::Wal(e.to_string()))
    }

    pub(crate) fn get_room(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub(crate) fn room_for_reservation(&self, reservation_id: &Ulid) -> Option<Ulid> {
        self.reservation_room.get(reservation_id).map(|e| *e.value())
    }

    /// WAL-append, apply, notify. Nothing changes in memory unless the append succeeded.
    pub(super) async fn persist_and_apply(&self, rs: &mut RoomState, event: &Event) -> Result<(), LedgerError> {
        self.wal_append(event).await?;
        apply_to_room(rs, event, &self.reservation_room, &self.guest_reservations);
        self.notify.send(event);
        Ok(())
    }

    /// Lookup reservation → room, get room, acquire write lock.
    pub(super) async fn resolve_reservation_write(
        &self,
        reservation_id: &Ulid,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<RoomState>, LedgerError> {
        let room_id = self
            .room_for_reservation(reservation_id)
            .ok_or(LedgerError::NotFound(*reservation_id))?;
        let rs = self.get_room(&room_id).ok_or(LedgerError::NotFound(room_id))?;
        Ok(rs.write_owned().await)
    }
}
