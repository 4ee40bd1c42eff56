//! Core domain logic for usage analytics.
//!
//! This crate contains the fundamental types and logic for:
//! - Recurrence detection: finding requests a user repeats at about the same
//!   time of day, and deciding whether to nudge them now
//! - Tickets: resources, their tickets and the status history of each ticket
//! - Notifications: the records and push subscriptions used to reach users

mod cluster;
mod dedup;
mod detector;
mod eligibility;
pub mod notification;
pub mod ticket;
mod time_of_day;
pub mod types;

pub use cluster::{Cluster, ClusterTable, cluster_recurrences};
pub use dedup::dedup_same_day;
pub use detector::{Detection, Detector, DetectorConfig, TimestampedEvent};
pub use eligibility::{EligibilityPolicy, eligible_keys};
pub use time_of_day::{InvalidTimeOfDay, TimeOfDay, Tolerance};
