//! Notification eligibility for recurring clusters.

use chrono::{DateTime, Utc};

use crate::cluster::ClusterTable;
use crate::time_of_day::{TimeOfDay, minutes_to_duration};

/// When a recurring cluster may trigger a notification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EligibilityPolicy {
    /// Minimum cluster frequency.
    pub threshold: f64,
    /// Minutes after the cluster's time of day before the window opens.
    pub time_to_wait_minutes: f64,
    /// Minutes the window stays open once it has opened.
    pub timeout_minutes: f64,
}

impl Default for EligibilityPolicy {
    fn default() -> Self {
        Self {
            threshold: 3.0,
            time_to_wait_minutes: 30.0,
            timeout_minutes: 30.0,
        }
    }
}

impl EligibilityPolicy {
    /// Returns true if a cluster at `key` with these stats should fire at `now`.
    ///
    /// The key is placed on `now`'s UTC date. The window is open strictly
    /// after `key + wait` and strictly before `key + wait + timeout`.
    pub fn allows(self, key: TimeOfDay, frequency: u32, seen_today: bool, now: DateTime<Utc>) -> bool {
        // NaN thresholds compare false and never fire.
        let meets_threshold = f64::from(frequency) >= self.threshold;
        if seen_today || !meets_threshold {
            return false;
        }

        let anchor = key.on(now.date_naive());
        let opens = minutes_to_duration(self.time_to_wait_minutes)
            .and_then(|wait| anchor.checked_add_signed(wait));
        let closes = minutes_to_duration(self.time_to_wait_minutes + self.timeout_minutes)
            .and_then(|until| anchor.checked_add_signed(until));

        match (opens, closes) {
            (Some(opens), Some(closes)) => opens < now && now < closes,
            _ => false,
        }
    }
}

/// Returns the keys of `table` that are eligible to notify at `now`,
/// in table order.
pub fn eligible_keys(
    table: &ClusterTable,
    policy: EligibilityPolicy,
    now: DateTime<Utc>,
) -> Vec<TimeOfDay> {
    table
        .iter()
        .filter(|(key, cluster)| policy.allows(*key, cluster.frequency, cluster.seen_today, now))
        .map(|(key, _)| key)
        .collect()
}
