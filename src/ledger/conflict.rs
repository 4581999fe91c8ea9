use chrono::{DateTime, NaiveDate, Utc};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::LedgerError;

pub(crate) fn validate_stay(check_in: NaiveDate, check_out: NaiveDate) -> Result<Stay, LedgerError> {
    if check_in >= check_out {
        return Err(LedgerError::InvalidRange { check_in, check_out });
    }
    let stay = Stay::new(check_in, check_out);
    if stay.nights() > MAX_STAY_NIGHTS {
        return Err(LedgerError::LimitExceeded("stay too long"));
    }
    Ok(stay)
}

/// Like `validate_stay`, for read-side windows that may be wider than any stay.
pub(crate) fn validate_window(from: NaiveDate, to: NaiveDate) -> Result<Stay, LedgerError> {
    if from >= to {
        return Err(LedgerError::InvalidRange { check_in: from, check_out: to });
    }
    let window = Stay::new(from, to);
    if window.nights() > MAX_QUERY_WINDOW_DAYS {
        return Err(LedgerError::LimitExceeded("query window too wide"));
    }
    Ok(window)
}

pub(crate) fn validate_request(request: &ReservationRequest) -> Result<Stay, LedgerError> {
    let stay = validate_stay(request.check_in, request.check_out)?;
    if request
        .special_requests
        .as_ref()
        .is_some_and(|s| s.len() > MAX_SPECIAL_REQUESTS_LEN)
    {
        return Err(LedgerError::LimitExceeded("special requests too long"));
    }
    Ok(stay)
}

/// Reservations on `rs` that occupy the room at `now` and overlap `stay`.
/// `exclude` skips one reservation, so a pending hold never conflicts with itself.
pub(crate) fn conflicting<'a>(
    rs: &'a RoomState,
    stay: &'a Stay,
    now: DateTime<Utc>,
    exclude: Option<Ulid>,
) -> impl Iterator<Item = &'a Reservation> + 'a {
    rs.overlapping(stay)
        .filter(move |r| Some(r.id) != exclude && r.occupies(now))
}

pub(crate) fn check_no_conflict(
    rs: &RoomState,
    stay: &Stay,
    now: DateTime<Utc>,
    exclude: Option<Ulid>,
) -> Result<(), LedgerError> {
    match conflicting(rs, stay, now, exclude).next() {
        Some(existing) => {
            metrics::counter!(crate::observability::CONFLICTS_TOTAL).increment(1);
            tracing::debug!(
                "room {}: [{}, {}) conflicts with reservation {}",
                rs.id,
                stay.check_in,
                stay.check_out,
                existing.id
            );
            Err(LedgerError::Conflict { reservation_id: existing.id })
        }
        None => Ok(()),
    }
}
