use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{oneshot, RwLock};
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{check_no_conflict, validate_request};
use super::{apply_to_room, Ledger, LedgerError, WalCommand};

impl Ledger {
    pub async fn register_room(
        &self,
        id: Ulid,
        property_id: Ulid,
        number: Option<String>,
        active: bool,
    ) -> Result<(), LedgerError> {
        if number.as_ref().is_some_and(|n| n.len() > MAX_ROOM_NUMBER_LEN) {
            return Err(LedgerError::LimitExceeded("room number too long"));
        }
        let _registry = self.registry.lock().await;
        if self.rooms.len() >= MAX_ROOMS {
            return Err(LedgerError::LimitExceeded("too many rooms"));
        }
        if self.rooms.contains_key(&id) {
            return Err(LedgerError::AlreadyExists(id));
        }

        let event = Event::RoomRegistered { id, property_id, number: number.clone(), active };
        self.wal_append(&event).await?;
        let rs = RoomState::new(id, property_id, number, active);
        self.rooms.insert(id, Arc::new(RwLock::new(rs)));
        self.notify.send(&event);
        metrics::gauge!(observability::ROOMS_TRACKED).set(self.rooms.len() as f64);
        info!("room {id} registered in property {property_id}");
        Ok(())
    }

    /// Take a room out of (or back into) sale. Existing reservations are untouched;
    /// an inactive room only refuses new ones.
    pub async fn set_room_active(&self, id: Ulid, active: bool) -> Result<(), LedgerError> {
        let rs = self.get_room(&id).ok_or(LedgerError::NotFound(id))?;
        let mut guard = rs.write().await;
        if guard.active == active {
            return Ok(());
        }
        let event = Event::RoomActivityChanged { id, active };
        self.persist_and_apply(&mut guard, &event).await?;
        info!("room {id} active={active}");
        Ok(())
    }

    /// Book a room. The overlap check runs under the room's write lock, in the
    /// same critical section as the WAL append, so of any set of concurrent
    /// overlapping requests for one room exactly one gets through.
    pub async fn create_reservation(&self, request: ReservationRequest) -> Result<Reservation, LedgerError> {
        let started = Instant::now();
        let result = self.create_reservation_inner(request).await;
        observability::record("create_reservation", started, &result, LedgerError::kind);
        result
    }

    async fn create_reservation_inner(&self, request: ReservationRequest) -> Result<Reservation, LedgerError> {
        let stay = validate_request(&request)?;
        let rs = self
            .get_room(&request.room_id)
            .ok_or(LedgerError::NotFound(request.room_id))?;
        let mut guard = rs.write().await;
        if !guard.active {
            return Err(LedgerError::RoomUnavailable(request.room_id));
        }
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_ROOM {
            return Err(LedgerError::LimitExceeded("too many reservations on room"));
        }

        let now = self.clock.now();
        check_no_conflict(&guard, &stay, now, None)?;

        let reservation = self.new_reservation(request, stay)?;
        let event = Event::ReservationCreated { reservation: reservation.clone() };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(
            "reservation {} created on room {} for [{}, {}) as {}",
            reservation.id, reservation.room_id, stay.check_in, stay.check_out, reservation.status
        );
        Ok(reservation)
    }

    fn new_reservation(&self, request: ReservationRequest, stay: Stay) -> Result<Reservation, LedgerError> {
        let now = self.clock.now();
        let status = self.creation_policy.initial_status();
        let hold_expires_at = if status == ReservationStatus::Pending {
            let expires = now
                .checked_add_signed(self.pending_hold_ttl)
                .ok_or(LedgerError::LimitExceeded("pending hold expiry out of range"))?;
            Some(expires)
        } else {
            None
        };
        Ok(Reservation {
            id: Ulid::new(),
            room_id: request.room_id,
            guest_id: request.guest_id,
            stay,
            status,
            total_amount: request.total_amount,
            payment_status: request.payment_status,
            guests: request.guests,
            special_requests: request.special_requests,
            hold_expires_at,
            cancellation: None,
            created_at: now,
            modified_at: now,
        })
    }

    /// Group booking: every request succeeds or none does. Requests may target
    /// several rooms; they are checked against the ledger and against each other,
    /// then written to the WAL in a single flush.
    pub async fn create_reservations(
        &self,
        requests: Vec<ReservationRequest>,
    ) -> Result<Vec<Reservation>, LedgerError> {
        let started = Instant::now();
        let result = self.create_reservations_inner(requests).await;
        observability::record("create_reservations", started, &result, LedgerError::kind);
        result
    }

    async fn create_reservations_inner(
        &self,
        requests: Vec<ReservationRequest>,
    ) -> Result<Vec<Reservation>, LedgerError> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        if requests.len() > MAX_BATCH_SIZE {
            return Err(LedgerError::LimitExceeded("batch too large"));
        }
        let stays = requests
            .iter()
            .map(validate_request)
            .collect::<Result<Vec<_>, _>>()?;

        // Acquire write locks in sorted order to prevent deadlocks.
        let mut room_ids: Vec<Ulid> = requests.iter().map(|r| r.room_id).collect();
        room_ids.sort();
        room_ids.dedup();

        let mut guards = Vec::with_capacity(room_ids.len());
        let mut slot = HashMap::new();
        for room_id in &room_ids {
            let rs = self.get_room(room_id).ok_or(LedgerError::NotFound(*room_id))?;
            let guard = rs.write_owned().await;
            if !guard.active {
                return Err(LedgerError::RoomUnavailable(*room_id));
            }
            if guard.reservations.len() + requests.len() > MAX_RESERVATIONS_PER_ROOM {
                return Err(LedgerError::LimitExceeded("too many reservations on room"));
            }
            slot.insert(*room_id, guards.len());
            guards.push(guard);
        }

        // Phase 1: validate everything against current state and within the batch.
        let now = self.clock.now();
        let reservations: Vec<Reservation> = requests
            .into_iter()
            .zip(stays)
            .map(|(request, stay)| self.new_reservation(request, stay))
            .collect::<Result<_, _>>()?;

        for (i, r) in reservations.iter().enumerate() {
            check_no_conflict(&guards[slot[&r.room_id]], &r.stay, now, None)?;
            if let Some(other) = reservations[..i]
                .iter()
                .find(|o| o.room_id == r.room_id && o.stay.overlaps(&r.stay))
            {
                metrics::counter!(observability::CONFLICTS_TOTAL).increment(1);
                return Err(LedgerError::Conflict { reservation_id: other.id });
            }
        }

        // Phase 2: commit. Locks are still held, so nothing validated above can change.
        let events: Vec<Event> = reservations
            .iter()
            .map(|r| Event::ReservationCreated { reservation: r.clone() })
            .collect();
        self.wal_append_all(events.clone()).await?;
        for event in &events {
            let guard = &mut guards[slot[&event.room_id()]];
            apply_to_room(guard, event, &self.reservation_room, &self.guest_reservations);
            self.notify.send(event);
        }
        info!("group booking committed: {} reservations across {} rooms", reservations.len(), room_ids.len());
        Ok(reservations)
    }

    /// Drive the state machine. Cancellations through here record a generic reason;
    /// use `cancel_reservation` to supply one.
    pub async fn transition(&self, reservation_id: Ulid, event: StatusEvent) -> Result<Reservation, LedgerError> {
        let started = Instant::now();
        let result = self.transition_inner(reservation_id, event, None).await;
        observability::record(event.as_str(), started, &result, LedgerError::kind);
        result
    }

    /// Cancel with a reason; the refund comes from the ledger's refund policy,
    /// measured in days from today to check-in.
    pub async fn cancel_reservation(&self, reservation_id: Ulid, reason: &str) -> Result<Reservation, LedgerError> {
        if reason.len() > MAX_REASON_LEN {
            return Err(LedgerError::LimitExceeded("cancellation reason too long"));
        }
        let started = Instant::now();
        let result = self
            .transition_inner(reservation_id, StatusEvent::Cancel, Some(reason))
            .await;
        observability::record("cancel", started, &result, LedgerError::kind);
        result
    }

    async fn transition_inner(
        &self,
        reservation_id: Ulid,
        status_event: StatusEvent,
        reason: Option<&str>,
    ) -> Result<Reservation, LedgerError> {
        let mut guard = self.resolve_reservation_write(&reservation_id).await?;
        let now = self.clock.now();
        let today = now.date_naive();
        let current = guard
            .reservation(reservation_id)
            .cloned()
            .ok_or(LedgerError::NotFound(reservation_id))?;

        let invalid = LedgerError::InvalidStateTransition {
            from: current.status,
            event: status_event,
        };
        let to = current.status.apply(status_event).ok_or(invalid.clone())?;

        let mut cancellation = None;
        match status_event {
            // An expired hold may have lost its nights to someone else meanwhile.
            StatusEvent::Confirm => check_no_conflict(&guard, &current.stay, now, Some(reservation_id))?,
            StatusEvent::MarkNoShow if today <= current.stay.check_in => return Err(invalid),
            StatusEvent::Cancel => {
                let days_before = (current.stay.check_in - today).num_days();
                cancellation = Some(Cancellation {
                    reason: reason.unwrap_or("cancelled").to_string(),
                    cancelled_at: now,
                    refund_amount: self.refund_policy.refund(current.total_amount, days_before),
                });
            }
            _ => {}
        }

        let event = Event::ReservationTransitioned {
            id: reservation_id,
            room_id: current.room_id,
            from: current.status,
            to,
            at: now,
            cancellation,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(observability::TRANSITIONS_TOTAL, "to" => to.as_str()).increment(1);
        info!("reservation {reservation_id}: {} -> {to}", current.status);

        guard
            .reservation(reservation_id)
            .cloned()
            .ok_or(LedgerError::NotFound(reservation_id))
    }

    /// Record what the payment service reports. The ledger never interprets it.
    pub async fn update_payment_status(
        &self,
        reservation_id: Ulid,
        status: PaymentStatus,
    ) -> Result<Reservation, LedgerError> {
        let mut guard = self.resolve_reservation_write(&reservation_id).await?;
        let room_id = guard.id;
        if guard.reservation(reservation_id).is_none() {
            return Err(LedgerError::NotFound(reservation_id));
        }
        let event = Event::PaymentStatusChanged {
            id: reservation_id,
            room_id,
            status,
            at: self.clock.now(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        debug!("reservation {reservation_id}: payment {status:?}");
        guard
            .reservation(reservation_id)
            .cloned()
            .ok_or(LedgerError::NotFound(reservation_id))
    }

    /// Pending holds whose expiry has passed, as `(reservation_id, room_id)`.
    pub async fn collect_expired_holds(&self) -> Vec<(Ulid, Ulid)> {
        let now = self.clock.now();
        self.collect_matching(|r| {
            r.status == ReservationStatus::Pending && r.hold_expires_at.is_some_and(|exp| exp <= now)
        })
        .await
    }

    /// Confirmed reservations whose check-in day is over without a check-in.
    pub async fn collect_no_shows(&self) -> Vec<(Ulid, Ulid)> {
        let today = self.clock.today();
        self.collect_matching(|r| r.status == ReservationStatus::Confirmed && r.stay.check_in < today)
            .await
    }

    async fn collect_matching(&self, pred: impl Fn(&Reservation) -> bool) -> Vec<(Ulid, Ulid)> {
        let rooms: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut found = Vec::new();
        for rs in rooms {
            let guard = rs.read().await;
            found.extend(guard.reservations.iter().filter(|r| pred(r)).map(|r| (r.id, guard.id)));
        }
        found
    }

    /// Rewrite the WAL as a snapshot of current state.
    ///
    /// Holds the registry lock and every room's read lock until the writer has
    /// swapped files, so no append can land in the old log after the snapshot
    /// was taken. Read locks are taken in room-id order, like batch writes.
    pub async fn compact_wal(&self) -> Result<(), LedgerError> {
        let _registry = self.registry.lock().await;
        let mut rooms: Vec<_> = self.rooms.iter().map(|e| (*e.key(), e.value().clone())).collect();
        rooms.sort_by_key(|(id, _)| *id);

        let mut guards = Vec::with_capacity(rooms.len());
        for (_, rs) in &rooms {
            guards.push(rs.clone().read_owned().await);
        }

        let mut events = Vec::new();
        for guard in &guards {
            events.push(Event::RoomRegistered {
                id: guard.id,
                property_id: guard.property_id,
                number: guard.number.clone(),
                active: guard.active,
            });
            events.extend(
                guard
                    .reservations
                    .iter()
                    .map(|r| Event::ReservationRecorded { reservation: r.clone() }),
            );
        }
        let event_count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| LedgerError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| LedgerError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| LedgerError::Wal(e.to_string()))?;
        info!("WAL compacted to {event_count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
