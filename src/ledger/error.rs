use chrono::NaiveDate;
use thiserror::Error;
use ulid::Ulid;

use crate::model::{ReservationStatus, StatusEvent};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("invalid range: check-in {check_in} is not before check-out {check_out}")]
    InvalidRange {
        check_in: NaiveDate,
        check_out: NaiveDate,
    },
    #[error("room {0} is not bookable")]
    RoomUnavailable(Ulid),
    #[error("conflict with reservation: {reservation_id}")]
    Conflict { reservation_id: Ulid },
    #[error("cannot {event} a {from} reservation")]
    InvalidStateTransition {
        from: ReservationStatus,
        event: StatusEvent,
    },
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    Wal(String),
}

impl LedgerError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::InvalidRange { .. } => "invalid_range",
            LedgerError::RoomUnavailable(_) => "room_unavailable",
            LedgerError::Conflict { .. } => "conflict",
            LedgerError::InvalidStateTransition { .. } => "invalid_transition",
            LedgerError::NotFound(_) => "not_found",
            LedgerError::AlreadyExists(_) => "already_exists",
            LedgerError::LimitExceeded(_) => "limit_exceeded",
            LedgerError::Wal(_) => "wal",
        }
    }
}
