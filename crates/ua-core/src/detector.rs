//! Recurring-request detection pipeline.
//!
//! Runs deduplication, clustering and eligibility over one ticket's event
//! history. The detector holds no state between runs: every call recomputes
//! everything from the events it is given.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cluster::{ClusterTable, cluster_recurrences};
use crate::dedup::dedup_same_day;
use crate::eligibility::{EligibilityPolicy, eligible_keys};
use crate::time_of_day::{TimeOfDay, Tolerance};

/// Tuning for recurrence detection.
///
/// Values are plain `f64` so that unparsable configuration can flow through
/// as NaN; every comparison against a NaN value is false, which means no
/// notification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorConfig {
    /// Minutes two times of day may differ and still count as the same time.
    pub tolerance_minutes: f64,
    /// Minimum cluster frequency to notify.
    pub frequency_threshold: f64,
    /// Minutes after a cluster's time of day before notifying.
    pub time_to_wait_minutes: f64,
    /// Minutes the notification window stays open.
    pub timeout_minutes: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            tolerance_minutes: 30.0,
            frequency_threshold: 3.0,
            time_to_wait_minutes: 30.0,
            timeout_minutes: 30.0,
        }
    }
}

impl DetectorConfig {
    pub fn tolerance(&self) -> Tolerance {
        Tolerance::from_minutes(self.tolerance_minutes)
    }

    pub const fn policy(&self) -> EligibilityPolicy {
        EligibilityPolicy {
            threshold: self.frequency_threshold,
            time_to_wait_minutes: self.time_to_wait_minutes,
            timeout_minutes: self.timeout_minutes,
        }
    }
}

/// Anything that happened at a single UTC instant.
///
/// This trait lets the detector run over different event representations
/// (e.g., ticket statuses, or bare timestamps in tests).
pub trait TimestampedEvent {
    fn timestamp(&self) -> DateTime<Utc>;
}

impl TimestampedEvent for DateTime<Utc> {
    fn timestamp(&self) -> DateTime<Utc> {
        *self
    }
}

impl<T: TimestampedEvent + ?Sized> TimestampedEvent for &T {
    fn timestamp(&self) -> DateTime<Utc> {
        (**self).timestamp()
    }
}

/// Outcome of one detection run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Detection {
    /// Clusters found in the event history.
    pub clusters: ClusterTable,
    /// Cluster keys whose notification window is open right now.
    pub eligible: Vec<TimeOfDay>,
}

impl Detection {
    /// Returns true if the ticket's user should be notified now.
    pub fn should_notify(&self) -> bool {
        !self.eligible.is_empty()
    }
}

/// Detects requests a user repeats at about the same time of day.
#[derive(Debug, Clone, Copy, Default)]
pub struct Detector {
    config: DetectorConfig,
}

impl Detector {
    pub const fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    /// Analyzes an ordered event history as of `now`.
    ///
    /// `now` is used both to decide which events happened today and to place
    /// cluster keys on today's date, so a single run is self-consistent.
    pub fn analyze<E: TimestampedEvent>(&self, events: &[E], now: DateTime<Utc>) -> Detection {
        let tolerance = self.config.tolerance();
        let instants: Vec<DateTime<Utc>> = events.iter().map(TimestampedEvent::timestamp).collect();

        let deduped = dedup_same_day(&instants, tolerance);
        let clusters = cluster_recurrences(&deduped, tolerance, now);
        let eligible = eligible_keys(&clusters, self.config.policy(), now);

        tracing::trace!(
            events = instants.len(),
            deduped = deduped.len(),
            clusters = clusters.len(),
            eligible = eligible.len(),
            "analyzed event history"
        );

        Detection { clusters, eligible }
    }
}
