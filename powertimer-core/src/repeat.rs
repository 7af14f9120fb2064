//! Weekday recurrence for repeating entries.
//!
//! Occurrences are computed in local wall-clock time so that a timer set for
//! 06:30 stays at 06:30 across daylight-saving changes.

use chrono::{Datelike, Days, NaiveDateTime, TimeZone};

use crate::types::weekdays;

/// Move `[begin, end)` forward by whole local days until it sits on a day in
/// `mask` and is not already over.
///
/// With `find_running` an occurrence that has begun but not ended is kept;
/// without it the occurrence must not have begun yet. Returns the window
/// unchanged when `mask` selects no weekday or the timestamps are out of
/// range for `tz`.
pub fn next_occurrence<Tz: TimeZone>(
    tz: &Tz,
    mask: u8,
    begin: i64,
    end: i64,
    now: i64,
    find_running: bool,
) -> (i64, i64) {
    if mask & weekdays::ALL == 0 {
        return (begin, end);
    }

    let (Some(mut local_begin), Some(mut local_end), Some(local_now)) = (
        to_local(tz, begin),
        to_local(tz, end),
        to_local(tz, now),
    ) else {
        return (begin, end);
    };

    // One pass per elapsed day plus a week is always enough.
    let limit = (now.saturating_sub(begin).max(0) / 86_400) as usize + 8;
    for _ in 0..limit {
        let on_day = weekdays::contains(mask, local_begin.weekday().num_days_from_monday());
        let over = if find_running {
            local_end < local_now
        } else {
            local_begin < local_now
        };
        if on_day && !over {
            break;
        }
        match (
            local_begin.checked_add_days(Days::new(1)),
            local_end.checked_add_days(Days::new(1)),
        ) {
            (Some(b), Some(e)) => {
                local_begin = b;
                local_end = e;
            }
            _ => return (begin, end),
        }
    }

    (
        from_local(tz, &local_begin).unwrap_or(begin),
        from_local(tz, &local_end).unwrap_or(end),
    )
}

fn to_local<Tz: TimeZone>(tz: &Tz, ts: i64) -> Option<NaiveDateTime> {
    tz.timestamp_opt(ts, 0).single().map(|dt| dt.naive_local())
}

fn from_local<Tz: TimeZone>(tz: &Tz, local: &NaiveDateTime) -> Option<i64> {
    tz.from_local_datetime(local)
        .earliest()
        .or_else(|| {
            // Inside a DST gap: use the first valid instant after it.
            let shifted = *local + chrono::Duration::hours(1);
            tz.from_local_datetime(&shifted).earliest()
        })
        .map(|dt| dt.timestamp())
}
