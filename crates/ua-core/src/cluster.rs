//! Cross-day clustering of recurring events.
//!
//! Pairs up events from different calendar days whose times of day are close
//! and counts, per canonical time of day, how many such pairs were found.
//!
//! # Algorithm
//!
//! For every ordered pair `(i, j)` with `i < j`:
//! 1. Skip if event `j` was already consumed by an earlier pair
//! 2. Skip if both events fall on the same UTC date
//! 3. Pick the matching event: `i` if its time lies in `j`'s window, else `j`
//!    if its time lies in `i`'s window, else skip
//! 4. Resolve the key: the matching event's time of day, replaced by the
//!    first existing key (insertion order) within tolerance of it
//! 5. Consume event `j` and bump the key's frequency, overwriting
//!    `seen_today` with whether the matching event happened today
//!
//! The result depends on input order. `k` mutually close events yield a
//! frequency of `k - 1`, not `k * (k - 1) / 2`, because consumed events are
//! never used as the second element again.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::time_of_day::{TimeOfDay, Tolerance};

/// Recurrence statistics for one canonical time of day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Cluster {
    /// Number of cross-day pairs that resolved to this key.
    pub frequency: u32,
    /// Whether the most recent contributing pair matched on today's date.
    pub seen_today: bool,
}

/// Clusters keyed by canonical time of day, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterTable {
    entries: Vec<(TimeOfDay, Cluster)>,
}

impl ClusterTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: TimeOfDay) -> Option<&Cluster> {
        self.entries
            .iter()
            .find(|(existing, _)| *existing == key)
            .map(|(_, cluster)| cluster)
    }

    /// Iterates over `(key, cluster)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (TimeOfDay, &Cluster)> {
        self.entries.iter().map(|(key, cluster)| (*key, cluster))
    }

    pub fn keys(&self) -> impl Iterator<Item = TimeOfDay> + '_ {
        self.entries.iter().map(|(key, _)| *key)
    }

    /// Returns the first existing key within `tolerance` of `candidate`,
    /// or `candidate` itself when none is.
    pub fn canonical_key(&self, candidate: TimeOfDay, tolerance: Tolerance) -> TimeOfDay {
        self.keys()
            .find(|existing| existing.is_within(candidate, tolerance))
            .unwrap_or(candidate)
    }

    /// Counts one more match for `key`, overwriting its `seen_today` flag.
    pub fn record(&mut self, key: TimeOfDay, seen_today: bool) {
        if let Some((_, cluster)) = self.entries.iter_mut().find(|(existing, _)| *existing == key) {
            cluster.frequency += 1;
            cluster.seen_today = seen_today;
        } else {
            self.entries.push((
                key,
                Cluster {
                    frequency: 1,
                    seen_today,
                },
            ));
        }
    }
}

impl Serialize for ClusterTable {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, cluster) in &self.entries {
            map.serialize_entry(key, cluster)?;
        }
        map.end()
    }
}

/// Builds the cluster table for a deduplicated event list.
///
/// `now` decides which calendar date counts as today.
pub fn cluster_recurrences(
    events: &[DateTime<Utc>],
    tolerance: Tolerance,
    now: DateTime<Utc>,
) -> ClusterTable {
    let today = now.date_naive();
    let mut table = ClusterTable::new();
    // Keyed by instant: equal instants are the same event.
    let mut consumed: HashSet<DateTime<Utc>> = HashSet::new();

    for (i, &reference) in events.iter().enumerate() {
        for &candidate in &events[i + 1..] {
            if consumed.contains(&candidate) {
                continue;
            }

            let Some(matching) = matching_event(reference, candidate, tolerance) else {
                continue;
            };

            let seen_today = matching.date_naive() == today;
            let key = table.canonical_key(TimeOfDay::of(matching), tolerance);

            consumed.insert(candidate);
            table.record(key, seen_today);
        }
    }

    table
}

/// Returns the event of the pair that falls inside the other's window.
///
/// Events on the same date never match. When both fall inside each other's
/// window, `first` wins.
fn matching_event(
    first: DateTime<Utc>,
    second: DateTime<Utc>,
    tolerance: Tolerance,
) -> Option<DateTime<Utc>> {
    if first.date_naive() == second.date_naive() {
        return None;
    }

    let (first_time, second_time) = (TimeOfDay::of(first), TimeOfDay::of(second));
    if first_time.is_within(second_time, tolerance) {
        Some(first)
    } else if second_time.is_within(first_time, tolerance) {
        Some(second)
    } else {
        None
    }
}
