use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Half-open stay `[check_in, check_out)`: the check-out day is free for the next guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Stay {
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
}

impl Stay {
    pub fn new(check_in: NaiveDate, check_out: NaiveDate) -> Self {
        debug_assert!(check_in < check_out, "Stay check_in must be before check_out");
        Self { check_in, check_out }
    }

    pub fn nights(&self) -> i64 {
        (self.check_out - self.check_in).num_days()
    }

    pub fn overlaps(&self, other: &Stay) -> bool {
        self.check_in < other.check_out && other.check_in < self.check_out
    }

    pub fn contains_night(&self, night: NaiveDate) -> bool {
        self.check_in <= night && night < self.check_out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    CheckedIn,
    CheckedOut,
    Completed,
    Cancelled,
    NoShow,
}

impl ReservationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::NoShow | Self::Completed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Confirmed => "CONFIRMED",
            Self::CheckedIn => "CHECKED_IN",
            Self::CheckedOut => "CHECKED_OUT",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
            Self::NoShow => "NO_SHOW",
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle events accepted by the reservation state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusEvent {
    Confirm,
    CheckIn,
    CheckOut,
    Complete,
    Cancel,
    MarkNoShow,
}

impl StatusEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Confirm => "confirm",
            Self::CheckIn => "check_in",
            Self::CheckOut => "check_out",
            Self::Complete => "complete",
            Self::Cancel => "cancel",
            Self::MarkNoShow => "mark_no_show",
        }
    }
}

impl std::fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ReservationStatus {
    /// The transition table. `None` means the event is not allowed from `self`.
    pub fn apply(self, event: StatusEvent) -> Option<ReservationStatus> {
        use ReservationStatus::*;
        use StatusEvent::*;
        match (self, event) {
            (Pending, Confirm) => Some(Confirmed),
            (Pending, Cancel) => Some(Cancelled),
            (Confirmed, CheckIn) => Some(CheckedIn),
            (Confirmed, Cancel) => Some(Cancelled),
            (Confirmed, MarkNoShow) => Some(NoShow),
            (CheckedIn, CheckOut) => Some(CheckedOut),
            (CheckedIn, Cancel) => Some(Cancelled),
            (CheckedOut, Complete) => Some(Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentStatus {
    Pending,
    Authorized,
    Paid,
    Refunded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancellation {
    pub reason: String,
    pub cancelled_at: DateTime<Utc>,
    pub refund_amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub room_id: Ulid,
    pub guest_id: Ulid,
    pub stay: Stay,
    pub status: ReservationStatus,
    pub total_amount: Decimal,
    pub payment_status: PaymentStatus,
    pub guests: u32,
    pub special_requests: Option<String>,
    /// Set while the reservation is a pending hold.
    pub hold_expires_at: Option<DateTime<Utc>>,
    pub cancellation: Option<Cancellation>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl Reservation {
    /// Whether this reservation keeps other guests out of the room at `now`.
    pub fn occupies(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            ReservationStatus::Confirmed | ReservationStatus::CheckedIn => true,
            ReservationStatus::Pending => self.hold_expires_at.is_none_or(|exp| exp > now),
            _ => false,
        }
    }
}

/// Input to `Ledger::create_reservation`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationRequest {
    pub room_id: Ulid,
    pub guest_id: Ulid,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub total_amount: Decimal,
    pub payment_status: PaymentStatus,
    pub guests: u32,
    pub special_requests: Option<String>,
}

impl ReservationRequest {
    pub fn new(room_id: Ulid, guest_id: Ulid, check_in: NaiveDate, check_out: NaiveDate, total_amount: Decimal) -> Self {
        Self {
            room_id,
            guest_id,
            check_in,
            check_out,
            total_amount,
            payment_status: PaymentStatus::Pending,
            guests: 1,
            special_requests: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RoomState {
    pub id: Ulid,
    pub property_id: Ulid,
    pub number: Option<String>,
    pub active: bool,
    /// Every reservation ever made on the room, sorted by `stay.check_in`.
    pub reservations: Vec<Reservation>,
}

impl RoomState {
    pub fn new(id: Ulid, property_id: Ulid, number: Option<String>, active: bool) -> Self {
        Self {
            id,
            property_id,
            number,
            active,
            reservations: Vec::new(),
        }
    }

    /// Insert reservation maintaining sort order by check-in.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .partition_point(|r| r.stay.check_in <= reservation.stay.check_in);
        self.reservations.insert(pos, reservation);
    }

    pub fn reservation(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    pub fn reservation_mut(&mut self, id: Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == id)
    }

    /// Reservations whose stay overlaps `query`, whatever their status.
    /// Skips everything checking in on or after `query.check_out` via binary search.
    pub fn overlapping(&self, query: &Stay) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.stay.check_in < query.check_out);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.stay.check_out > query.check_in)
    }
}

/// WAL record format. Reservation records carry the full row so replay and
/// compaction never need to re-run business rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomRegistered {
        id: Ulid,
        property_id: Ulid,
        number: Option<String>,
        active: bool,
    },
    RoomActivityChanged {
        id: Ulid,
        active: bool,
    },
    ReservationCreated {
        reservation: Reservation,
    },
    ReservationTransitioned {
        id: Ulid,
        room_id: Ulid,
        from: ReservationStatus,
        to: ReservationStatus,
        at: DateTime<Utc>,
        cancellation: Option<Cancellation>,
    },
    PaymentStatusChanged {
        id: Ulid,
        room_id: Ulid,
        status: PaymentStatus,
        at: DateTime<Utc>,
    },
    /// Snapshot form written by compaction.
    ReservationRecorded {
        reservation: Reservation,
    },
}

impl Event {
    pub fn room_id(&self) -> Ulid {
        match self {
            Event::RoomRegistered { id, .. } | Event::RoomActivityChanged { id, .. } => *id,
            Event::ReservationCreated { reservation } | Event::ReservationRecorded { reservation } => {
                reservation.room_id
            }
            Event::ReservationTransitioned { room_id, .. } | Event::PaymentStatusChanged { room_id, .. } => *room_id,
        }
    }

    /// JSON payload for downstream consumers (payment, notification).
    pub fn payload(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub id: Ulid,
    pub property_id: Ulid,
    pub number: Option<String>,
    pub active: bool,
}

/// Outcome of an availability query: free or not, and who is in the way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Availability {
    pub available: bool,
    pub conflicts: Vec<Ulid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, d).unwrap()
    }

    fn reservation(check_in: NaiveDate, check_out: NaiveDate, status: ReservationStatus) -> Reservation {
        let now = Utc::now();
        Reservation {
            id: Ulid::new(),
            room_id: Ulid::new(),
            guest_id: Ulid::new(),
            stay: Stay::new(check_in, check_out),
            status,
            total_amount: d("300.00"),
            payment_status: PaymentStatus::Pending,
            guests: 2,
            special_requests: None,
            hold_expires_at: None,
            cancellation: None,
            created_at: now,
            modified_at: now,
        }
    }

    #[test]
    fn stay_basics() {
        let s = Stay::new(date(12, 10), date(12, 15));
        assert_eq!(s.nights(), 5);
        assert!(s.contains_night(date(12, 10)));
        assert!(s.contains_night(date(12, 14)));
        assert!(!s.contains_night(date(12, 15))); // half-open
    }

    #[test]
    fn stay_overlap() {
        let a = Stay::new(date(12, 10), date(12, 15));
        let b = Stay::new(date(12, 12), date(12, 14));
        let c = Stay::new(date(12, 15), date(12, 18));
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c)); // back-to-back stays share no night
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn transition_table_allows_listed_edges() {
        use ReservationStatus::*;
        use StatusEvent::*;
        assert_eq!(Pending.apply(Confirm), Some(Confirmed));
        assert_eq!(Pending.apply(Cancel), Some(Cancelled));
        assert_eq!(Confirmed.apply(CheckIn), Some(CheckedIn));
        assert_eq!(Confirmed.apply(Cancel), Some(Cancelled));
        assert_eq!(Confirmed.apply(MarkNoShow), Some(NoShow));
        assert_eq!(CheckedIn.apply(CheckOut), Some(CheckedOut));
        assert_eq!(CheckedOut.apply(Complete), Some(Completed));
    }

    #[test]
    fn transition_table_is_closed() {
        use ReservationStatus::*;
        use StatusEvent::*;
        let statuses = [Pending, Confirmed, CheckedIn, CheckedOut, Completed, Cancelled, NoShow];
        let events = [Confirm, CheckIn, CheckOut, Complete, Cancel, MarkNoShow];
        let mut allowed = 0;
        for s in statuses {
            for e in events {
                if s.apply(e).is_some() {
                    allowed += 1;
                }
            }
        }
        assert_eq!(allowed, 8);
        for terminal in [Completed, Cancelled, NoShow] {
            assert!(terminal.is_terminal());
            assert!(events.iter().all(|e| terminal.apply(*e).is_none()));
        }
        assert_eq!(Pending.apply(CheckOut), None);
    }

    #[test]
    fn occupancy_by_status() {
        let now = Utc::now();
        let mut r = reservation(date(12, 1), date(12, 3), ReservationStatus::Confirmed);
        assert!(r.occupies(now));
        r.status = ReservationStatus::CheckedIn;
        assert!(r.occupies(now));
        r.status = ReservationStatus::Cancelled;
        assert!(!r.occupies(now));
        r.status = ReservationStatus::CheckedOut;
        assert!(!r.occupies(now));
    }

    #[test]
    fn pending_hold_stops_occupying_after_expiry() {
        let now = Utc::now();
        let mut r = reservation(date(12, 1), date(12, 3), ReservationStatus::Pending);
        r.hold_expires_at = Some(now + chrono::Duration::minutes(5));
        assert!(r.occupies(now));
        r.hold_expires_at = Some(now - chrono::Duration::seconds(1));
        assert!(!r.occupies(now));
    }

    #[test]
    fn reservations_stay_sorted() {
        let mut room = RoomState::new(Ulid::new(), Ulid::new(), Some("101".into()), true);
        room.insert_reservation(reservation(date(12, 20), date(12, 22), ReservationStatus::Confirmed));
        room.insert_reservation(reservation(date(12, 1), date(12, 3), ReservationStatus::Confirmed));
        room.insert_reservation(reservation(date(12, 10), date(12, 15), ReservationStatus::Cancelled));
        let starts: Vec<_> = room.reservations.iter().map(|r| r.stay.check_in).collect();
        assert_eq!(starts, vec![date(12, 1), date(12, 10), date(12, 20)]);
    }

    #[test]
    fn overlapping_skips_past_and_future() {
        let mut room = RoomState::new(Ulid::new(), Ulid::new(), None, true);
        room.insert_reservation(reservation(date(12, 1), date(12, 5), ReservationStatus::Confirmed));
        let hit = reservation(date(12, 8), date(12, 12), ReservationStatus::Confirmed);
        let hit_id = hit.id;
        room.insert_reservation(hit);
        room.insert_reservation(reservation(date(12, 20), date(12, 25), ReservationStatus::Confirmed));

        let query = Stay::new(date(12, 10), date(12, 15));
        let hits: Vec<_> = room.overlapping(&query).map(|r| r.id).collect();
        assert_eq!(hits, vec![hit_id]);
    }

    #[test]
    fn overlapping_adjacent_not_included() {
        let mut room = RoomState::new(Ulid::new(), Ulid::new(), None, true);
        room.insert_reservation(reservation(date(12, 10), date(12, 15), ReservationStatus::Confirmed));
        let before = Stay::new(date(12, 5), date(12, 10));
        let after = Stay::new(date(12, 15), date(12, 18));
        assert_eq!(room.overlapping(&before).count(), 0);
        assert_eq!(room.overlapping(&after).count(), 0);
    }

    #[test]
    fn overlapping_long_stay_spanning_query() {
        let mut room = RoomState::new(Ulid::new(), Ulid::new(), None, true);
        room.insert_reservation(reservation(date(1, 1), date(12, 31), ReservationStatus::CheckedIn));
        let query = Stay::new(date(6, 1), date(6, 2));
        assert_eq!(room.overlapping(&query).count(), 1);
    }

    #[test]
    fn event_payload_is_json() {
        let id = Ulid::new();
        let event = Event::RoomActivityChanged { id, active: false };
        let json: serde_json::Value = serde_json::from_str(&event.payload()).unwrap();
        assert_eq!(json["RoomActivityChanged"]["active"], serde_json::Value::Bool(false));
        assert_eq!(event.room_id(), id);
    }

    #[test]
    fn event_bincode_roundtrip_with_dates_and_money() {
        let event = Event::ReservationCreated {
            reservation: reservation(date(12, 10), date(12, 15), ReservationStatus::Pending),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
