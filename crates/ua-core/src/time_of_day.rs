//! Wall-clock projection of UTC instants.
//!
//! A [`TimeOfDay`] drops the calendar date so that events from different days
//! can be compared by the time they happened. Comparisons are done on
//! seconds since midnight and never wrap: 23:50 and 00:10 are far apart.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const KEY_FORMAT: &str = "%H:%M:%S";
const MS_PER_MINUTE: f64 = 60_000.0;

/// A wall-clock time with second precision, independent of the date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimeOfDay(NaiveTime);

impl TimeOfDay {
    /// Projects a UTC instant onto its time of day, truncating sub-seconds.
    pub fn of(instant: DateTime<Utc>) -> Self {
        let time = instant.time();
        let seconds = time.num_seconds_from_midnight();
        Self(NaiveTime::from_num_seconds_from_midnight_opt(seconds, 0).unwrap_or(time))
    }

    /// Builds a time of day from its components.
    pub fn from_hms(hour: u32, minute: u32, second: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, minute, second).map(Self)
    }

    /// Places this time of day on the given UTC calendar date.
    pub fn on(self, date: NaiveDate) -> DateTime<Utc> {
        date.and_time(self.0).and_utc()
    }

    /// Returns true if `self` lies strictly inside `tolerance` around `center`.
    pub fn is_within(self, center: Self, tolerance: Tolerance) -> bool {
        let Some(window) = tolerance.0 else {
            return false;
        };
        let window = i128::from(window.num_milliseconds());
        let center = center.millis_since_midnight();
        let value = self.millis_since_midnight();
        center - window < value && value < center + window
    }

    fn millis_since_midnight(self) -> i128 {
        i128::from(self.0.num_seconds_from_midnight()) * 1000
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(KEY_FORMAT))
    }
}

/// Error for strings that are not `HH:MM:SS`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid time of day {0:?}, expected HH:MM:SS")]
pub struct InvalidTimeOfDay(String);

impl FromStr for TimeOfDay {
    type Err = InvalidTimeOfDay;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveTime::parse_from_str(s, KEY_FORMAT)
            .map(Self)
            .map_err(|_| InvalidTimeOfDay(s.to_string()))
    }
}

impl Serialize for TimeOfDay {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeOfDay {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A symmetric tolerance window, in minutes, around a time of day.
///
/// Windows built from NaN, infinite or out-of-range minute counts are empty:
/// nothing is ever within them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tolerance(Option<Duration>);

impl Tolerance {
    pub fn from_minutes(minutes: f64) -> Self {
        Self(minutes_to_duration(minutes))
    }

    pub const fn duration(&self) -> Option<Duration> {
        self.0
    }
}

/// Converts a possibly invalid minute count into a duration.
///
/// Returns `None` for NaN, infinities and values chrono cannot represent.
pub(crate) fn minutes_to_duration(minutes: f64) -> Option<Duration> {
    if !minutes.is_finite() {
        return None;
    }
    let millis = (minutes * MS_PER_MINUTE).trunc();
    #[expect(
        clippy::cast_precision_loss,
        reason = "bound check only needs to be approximately i64::MAX"
    )]
    let limit = i64::MAX as f64;
    if millis.abs() >= limit {
        return None;
    }
    #[expect(
        clippy::cast_possible_truncation,
        reason = "value is finite, already truncated and within i64 range"
    )]
    Duration::try_milliseconds(millis as i64)
}
