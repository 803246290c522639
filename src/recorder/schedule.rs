use chrono::{Duration, NaiveDateTime, NaiveTime};

/// When a segment starting at `start` must be closed: the next local
/// midnight or `max_hours` after the start, whichever comes first.
///
/// Closing at midnight keeps every segment inside one date folder.
pub fn rollover_deadline(start: NaiveDateTime, max_hours: u32) -> NaiveDateTime {
    let next_midnight = start.date().and_time(NaiveTime::default()) + Duration::days(1);
    let max_end = start + Duration::hours(i64::from(max_hours.max(1)));
    next_midnight.min(max_end)
}
