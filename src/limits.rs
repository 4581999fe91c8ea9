/// Rooms a single ledger will track.
pub const MAX_ROOMS: usize = 100_000;

/// Reservations retained per room, across all statuses.
pub const MAX_RESERVATIONS_PER_ROOM: usize = 50_000;

/// Longest stay accepted, in nights.
pub const MAX_STAY_NIGHTS: i64 = 365;

/// Widest window for calendar and availability queries, in days.
pub const MAX_QUERY_WINDOW_DAYS: i64 = 3 * 365;

/// Requests accepted by a single group booking.
pub const MAX_BATCH_SIZE: usize = 100;

pub const MAX_ROOM_NUMBER_LEN: usize = 32;
pub const MAX_REASON_LEN: usize = 1024;
pub const MAX_SPECIAL_REQUESTS_LEN: usize = 4096;

/// Largest encoded event the WAL writes or will read back.
pub const MAX_EVENT_BYTES: usize = 1024 * 1024;

/// Longest a pending hold may be configured to last.
pub const MAX_PENDING_HOLD_TTL_SECS: u64 = 30 * 24 * 3600;
