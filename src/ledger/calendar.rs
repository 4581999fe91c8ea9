use chrono::{DateTime, Utc};

use crate::model::*;

// ── Free-night calendar ────────────────────────────────────────

/// Sub-ranges of `window` where the room is free at `now`: the window minus
/// every occupying stay, clamped to the window.
pub fn free_nights(room: &RoomState, window: &Stay, now: DateTime<Utc>) -> Vec<Stay> {
    let mut occupied: Vec<Stay> = room
        .overlapping(window)
        .filter(|r| r.occupies(now))
        .map(|r| {
            Stay::new(
                r.stay.check_in.max(window.check_in),
                r.stay.check_out.min(window.check_out),
            )
        })
        .collect();
    if occupied.is_empty() {
        return vec![*window];
    }
    occupied.sort_by_key(|s| s.check_in);
    subtract_stays(&[*window], &merge_overlapping(&occupied))
}

/// Merge sorted overlapping/adjacent stays into disjoint ranges.
pub fn merge_overlapping(sorted: &[Stay]) -> Vec<Stay> {
    let mut merged: Vec<Stay> = Vec::new();
    for &stay in sorted {
        if let Some(last) = merged.last_mut()
            && stay.check_in <= last.check_out
        {
            last.check_out = last.check_out.max(stay.check_out);
            continue;
        }
        merged.push(stay);
    }
    merged
}

/// `base` minus `to_remove`; both sorted and internally disjoint.
pub fn subtract_stays(base: &[Stay], to_remove: &[Stay]) -> Vec<Stay> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current = b.check_in;

        while ri < to_remove.len() && to_remove[ri].check_out <= current {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].check_in < b.check_out {
            let r = &to_remove[j];
            if r.check_in > current {
                result.push(Stay::new(current, r.check_in));
            }
            current = current.max(r.check_out);
            j += 1;
        }

        if current < b.check_out {
            result.push(Stay::new(current, b.check_out));
        }
    }

    result
}
