//! Free-slot computation.
//!
//! Turns the calendar's busy intervals into bookable candidate slots:
//! clamped to the requester's working hours (interpreted in their
//! timezone), padded by the adjacency buffer, aligned to quarter-hour
//! boundaries, and ordered earliest-first — which is exactly the
//! orchestrator's tie-break policy.

use chrono::{DateTime, Duration, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use stina_providers::{BusyInterval, TimeWindow};

/// Working hours in a specific timezone.  `start_hour..end_hour` on
/// every day of the window (day-of-week policy is the caller's concern).
#[derive(Debug, Clone, Copy)]
pub struct WorkingHours {
    pub start_hour: u8,
    pub end_hour: u8,
    pub timezone: Tz,
}

/// One bookable candidate slot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Slot {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

const ALIGN_MINUTES: i64 = 15;

/// Compute up to `max_slots` free slots of `duration_minutes` inside
/// `window`, avoiding `busy` intervals padded by `buffer_minutes` on
/// both sides.  Returned earliest-first.
pub fn free_slots(
    window: TimeWindow,
    duration_minutes: u32,
    busy: &[BusyInterval],
    hours: &WorkingHours,
    buffer_minutes: u32,
    max_slots: usize,
) -> Vec<Slot> {
    if duration_minutes == 0 || window.end <= window.start || max_slots == 0 {
        return Vec::new();
    }
    let duration = Duration::minutes(duration_minutes as i64);
    let blocked = merge_padded(busy, Duration::minutes(buffer_minutes as i64));

    let mut slots = Vec::new();
    for day_window in working_windows(window, hours) {
        let mut candidate = align_up(day_window.start);
        while candidate + duration <= day_window.end {
            if slots.len() >= max_slots {
                return slots;
            }
            let candidate_end = candidate + duration;
            match blocked
                .iter()
                .find(|b| b.start < candidate_end && candidate < b.end)
            {
                Some(block) => {
                    // Jump past the blocking interval.
                    candidate = align_up(block.end);
                }
                None => {
                    slots.push(Slot {
                        start: candidate,
                        end: candidate_end,
                    });
                    candidate = align_up(candidate_end);
                }
            }
        }
    }
    slots
}

/// Pad each busy interval by `buffer` on both sides, then merge overlaps.
fn merge_padded(busy: &[BusyInterval], buffer: Duration) -> Vec<BusyInterval> {
    let mut padded: Vec<BusyInterval> = busy
        .iter()
        .map(|b| BusyInterval {
            start: b.start - buffer,
            end: b.end + buffer,
        })
        .collect();
    padded.sort_by_key(|b| b.start);

    let mut merged: Vec<BusyInterval> = Vec::with_capacity(padded.len());
    for interval in padded {
        match merged.last_mut() {
            Some(last) if interval.start <= last.end => {
                if interval.end > last.end {
                    last.end = interval.end;
                }
            }
            _ => merged.push(interval),
        }
    }
    merged
}

/// The working-hour sub-windows of each day covered by `window`,
/// clamped to the window itself and expressed in UTC.
fn working_windows(window: TimeWindow, hours: &WorkingHours) -> Vec<TimeWindow> {
    let mut result = Vec::new();
    let mut day = window.start.with_timezone(&hours.timezone).date_naive();
    let last_day = window.end.with_timezone(&hours.timezone).date_naive();

    while day <= last_day {
        // Skip days that don't resolve (DST gaps at exactly these hours).
        let start_local = day.and_hms_opt(hours.start_hour as u32, 0, 0);
        let end_local = day.and_hms_opt(hours.end_hour as u32, 0, 0);
        if let (Some(start_local), Some(end_local)) = (start_local, end_local) {
            let start = hours.timezone.from_local_datetime(&start_local).earliest();
            let end = hours.timezone.from_local_datetime(&end_local).earliest();
            if let (Some(start), Some(end)) = (start, end) {
                let start = start.with_timezone(&Utc).max(window.start);
                let end = end.with_timezone(&Utc).min(window.end);
                if start < end {
                    result.push(TimeWindow { start, end });
                }
            }
        }
        day = match day.succ_opt() {
            Some(next) => next,
            None => break,
        };
    }
    result
}

/// Round up to the next quarter-hour boundary.
fn align_up(t: DateTime<Utc>) -> DateTime<Utc> {
    let step = ALIGN_MINUTES * 60;
    let secs = t.timestamp();
    let rem = secs.rem_euclid(step);
    if rem == 0 && t.timestamp_subsec_nanos() == 0 {
        t
    } else {
        DateTime::from_timestamp(secs - rem + step, 0).unwrap_or(t)
    }
}
