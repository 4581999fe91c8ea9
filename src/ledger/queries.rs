use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::calendar::free_nights;
use super::conflict::{conflicting, validate_stay, validate_window};
use super::{Ledger, LedgerError};

impl Ledger {
    /// Is `room_id` free for `[check_in, check_out)` right now?
    ///
    /// A point-in-time answer: only `create_reservation` turns it into a guarantee.
    pub async fn check_availability(
        &self,
        room_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
    ) -> Result<bool, LedgerError> {
        Ok(self.find_conflicts(room_id, check_in, check_out).await?.available)
    }

    /// Same question as `check_availability`, naming the reservations in the way.
    pub async fn find_conflicts(
        &self,
        room_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
    ) -> Result<Availability, LedgerError> {
        let stay = validate_stay(check_in, check_out)?;
        let rs = self.get_room(&room_id).ok_or(LedgerError::NotFound(room_id))?;
        let guard = rs.read().await;
        let conflicts: Vec<Ulid> = conflicting(&guard, &stay, self.clock.now(), None)
            .map(|r| r.id)
            .collect();
        Ok(Availability {
            available: conflicts.is_empty(),
            conflicts,
        })
    }

    /// Active rooms of a property that are free for the whole stay.
    pub async fn available_rooms(
        &self,
        property_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
    ) -> Result<Vec<RoomInfo>, LedgerError> {
        let stay = validate_stay(check_in, check_out)?;
        let now = self.clock.now();
        let rooms: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();

        let mut free = Vec::new();
        for rs in rooms {
            let guard = rs.read().await;
            if guard.property_id != property_id || !guard.active {
                continue;
            }
            if conflicting(&guard, &stay, now, None).next().is_none() {
                free.push(room_info(&guard));
            }
        }
        free.sort_by(|a, b| a.number.cmp(&b.number).then(a.id.cmp(&b.id)));
        Ok(free)
    }

    /// Free sub-ranges of `[from, to)` on one room.
    pub async fn free_nights(&self, room_id: Ulid, from: NaiveDate, to: NaiveDate) -> Result<Vec<Stay>, LedgerError> {
        let window = validate_window(from, to)?;
        let rs = self.get_room(&room_id).ok_or(LedgerError::NotFound(room_id))?;
        let guard = rs.read().await;
        Ok(free_nights(&guard, &window, self.clock.now()))
    }

    pub async fn get_reservation(&self, reservation_id: Ulid) -> Result<Reservation, LedgerError> {
        let room_id = self
            .room_for_reservation(&reservation_id)
            .ok_or(LedgerError::NotFound(reservation_id))?;
        let rs = self.get_room(&room_id).ok_or(LedgerError::NotFound(room_id))?;
        let guard = rs.read().await;
        guard
            .reservation(reservation_id)
            .cloned()
            .ok_or(LedgerError::NotFound(reservation_id))
    }

    /// Every reservation on a room, in check-in order, cancelled ones included.
    pub async fn room_reservations(&self, room_id: Ulid) -> Result<Vec<Reservation>, LedgerError> {
        let rs = self.get_room(&room_id).ok_or(LedgerError::NotFound(room_id))?;
        let guard = rs.read().await;
        Ok(guard.reservations.clone())
    }

    /// A guest's reservations across all rooms, oldest first.
    pub async fn guest_reservations(&self, guest_id: Ulid) -> Vec<Reservation> {
        let ids = self
            .guest_reservations
            .get(&guest_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            if let Ok(r) = self.get_reservation(id).await {
                found.push(r);
            }
        }
        found.sort_by_key(|r| r.created_at);
        found
    }

    pub async fn list_rooms(&self) -> Vec<RoomInfo> {
        let rooms: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut infos = Vec::with_capacity(rooms.len());
        for rs in rooms {
            infos.push(room_info(&*rs.read().await));
        }
        infos
    }

    pub async fn room(&self, room_id: Ulid) -> Result<RoomInfo, LedgerError> {
        let rs = self.get_room(&room_id).ok_or(LedgerError::NotFound(room_id))?;
        let guard = rs.read().await;
        Ok(room_info(&guard))
    }
}

fn room_info(rs: &RoomState) -> RoomInfo {
    RoomInfo {
        id: rs.id,
        property_id: rs.property_id,
        number: rs.number.clone(),
        active: rs.active,
    }
}
