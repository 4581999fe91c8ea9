use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::ledger::Ledger;
use crate::model::StatusEvent;
use crate::observability;

pub const HOLD_EXPIRED_REASON: &str = "pending hold expired";

/// One sweep: cancel expired pending holds, then flag confirmed stays whose
/// check-in day passed without a check-in. Returns `(expired, no_shows)`.
pub async fn sweep(ledger: &Ledger) -> (usize, usize) {
    let mut expired = 0;
    for (id, room_id) in ledger.collect_expired_holds().await {
        match ledger.cancel_reservation(id, HOLD_EXPIRED_REASON).await {
            Ok(_) => {
                expired += 1;
                metrics::counter!(observability::HOLDS_EXPIRED_TOTAL).increment(1);
                info!("expired pending hold {id} on room {room_id}");
            }
            // Confirmed or cancelled between collection and now.
            Err(e) => debug!("hold reaper skip {id}: {e}"),
        }
    }

    let mut no_shows = 0;
    for (id, room_id) in ledger.collect_no_shows().await {
        match ledger.transition(id, StatusEvent::MarkNoShow).await {
            Ok(_) => {
                no_shows += 1;
                metrics::counter!(observability::NO_SHOWS_TOTAL).increment(1);
                info!("reservation {id} on room {room_id} marked no-show");
            }
            Err(e) => debug!("no-show sweeper skip {id}: {e}"),
        }
    }
    (expired, no_shows)
}

/// Background task that sweeps every `every`.
pub async fn run_reaper(ledger: Arc<Ledger>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        sweep(&ledger).await;
    }
}

/// Background task that compacts the WAL once enough appends pile up.
pub async fn run_compactor(ledger: Arc<Ledger>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        if ledger.wal_appends_since_compact().await < threshold {
            continue;
        }
        if let Err(e) = ledger.compact_wal().await {
            warn!("WAL compaction failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::model::*;
    use crate::policy::CreationPolicy;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("roomledger_test_reaper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, d).unwrap()
    }

    #[tokio::test]
    async fn sweep_cancels_expired_holds() {
        let clock = Arc::new(ManualClock::at_date(date(12, 1)));
        let ledger = Ledger::builder(test_wal_path("expire_holds.wal"))
            .clock(clock.clone())
            .creation_policy(CreationPolicy::Pending)
            .pending_hold_ttl(Duration::from_secs(600))
            .open()
            .unwrap();
        let room = Ulid::new();
        ledger.register_room(room, Ulid::new(), None, true).await.unwrap();
        let hold = ledger
            .create_reservation(ReservationRequest::new(room, Ulid::new(), date(12, 20), date(12, 22), Decimal::ONE_HUNDRED))
            .await
            .unwrap();

        assert_eq!(sweep(&ledger).await, (0, 0));

        clock.advance(chrono::Duration::minutes(11));
        assert_eq!(sweep(&ledger).await, (1, 0));
        let r = ledger.get_reservation(hold.id).await.unwrap();
        assert_eq!(r.status, ReservationStatus::Cancelled);
        assert_eq!(r.cancellation.unwrap().reason, HOLD_EXPIRED_REASON);
        assert!(ledger.collect_expired_holds().await.is_empty());
    }

    #[tokio::test]
    async fn sweep_marks_no_shows_after_check_in_day() {
        let clock = Arc::new(ManualClock::at_date(date(12, 1)));
        let ledger = Ledger::builder(test_wal_path("no_shows.wal"))
            .clock(clock.clone())
            .open()
            .unwrap();
        let room = Ulid::new();
        ledger.register_room(room, Ulid::new(), None, true).await.unwrap();
        let stay = ledger
            .create_reservation(ReservationRequest::new(room, Ulid::new(), date(12, 10), date(12, 12), Decimal::ONE_HUNDRED))
            .await
            .unwrap();
        let arrived = ledger
            .create_reservation(ReservationRequest::new(room, Ulid::new(), date(12, 3), date(12, 5), Decimal::ONE_HUNDRED))
            .await
            .unwrap();

        clock.set(date(12, 3).and_hms_opt(15, 0, 0).unwrap().and_utc());
        ledger.transition(arrived.id, StatusEvent::CheckIn).await.unwrap();

        clock.set(date(12, 10).and_hms_opt(23, 0, 0).unwrap().and_utc());
        assert_eq!(sweep(&ledger).await, (0, 0)); // still the check-in day

        clock.advance(chrono::Duration::hours(2));
        assert_eq!(sweep(&ledger).await, (0, 1));
        assert_eq!(
            ledger.get_reservation(stay.id).await.unwrap().status,
            ReservationStatus::NoShow
        );
        assert_eq!(
            ledger.get_reservation(arrived.id).await.unwrap().status,
            ReservationStatus::CheckedIn
        );
    }
}
