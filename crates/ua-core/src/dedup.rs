//! Same-day deduplication of status events.

use chrono::{DateTime, Utc};

use crate::time_of_day::{TimeOfDay, Tolerance};

/// Drops events that restate an already accepted event of the same UTC day.
///
/// An event is dropped when an accepted event on the same calendar date, at a
/// different instant, has a time of day within `tolerance` of it. Survivors
/// keep their input order, so which duplicate survives depends on the order
/// of appearance. Events at the exact same instant never deduplicate each
/// other.
pub fn dedup_same_day(events: &[DateTime<Utc>], tolerance: Tolerance) -> Vec<DateTime<Utc>> {
    let mut accepted: Vec<DateTime<Utc>> = Vec::with_capacity(events.len());

    for &event in events {
        let time = TimeOfDay::of(event);
        let restates_accepted = accepted.iter().any(|&previous| {
            previous.date_naive() == event.date_naive()
                && previous != event
                && TimeOfDay::of(previous).is_within(time, tolerance)
        });

        if restates_accepted {
            tracing::trace!(%event, "dropping same-day duplicate");
            continue;
        }
        accepted.push(event);
    }

    accepted
}
