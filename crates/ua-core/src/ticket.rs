//! Resources, tickets and ticket status history.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::detector::TimestampedEvent;
use crate::types::{ResourceId, UserId, ValidationError};

/// Lifecycle state of a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatusCode {
    Initialized,
    Requesting,
    /// The user holds the resource.
    Active,
    AwaitingConfirmation,
    Queued,
    Inactive,
    Revoked,
}

impl TicketStatusCode {
    /// String representation for database storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Initialized => "INITIALIZED",
            Self::Requesting => "REQUESTING",
            Self::Active => "ACTIVE",
            Self::AwaitingConfirmation => "AWAITING_CONFIRMATION",
            Self::Queued => "QUEUED",
            Self::Inactive => "INACTIVE",
            Self::Revoked => "REVOKED",
        }
    }
}

impl fmt::Display for TicketStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatusCode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INITIALIZED" => Ok(Self::Initialized),
            "REQUESTING" => Ok(Self::Requesting),
            "ACTIVE" => Ok(Self::Active),
            "AWAITING_CONFIRMATION" => Ok(Self::AwaitingConfirmation),
            "QUEUED" => Ok(Self::Queued),
            "INACTIVE" => Ok(Self::Inactive),
            "REVOKED" => Ok(Self::Revoked),
            _ => Err(ValidationError::InvalidStatusCode {
                value: s.to_string(),
            }),
        }
    }
}

/// A status change recorded on a ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketStatus {
    pub status_code: TicketStatusCode,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<i64>,
}

impl TimestampedEvent for TicketStatus {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// The user a ticket belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketUser {
    pub id: UserId,
    #[serde(default)]
    pub username: String,
}

/// One user's ticket on a resource, with its status history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub user: TicketUser,
    #[serde(default)]
    pub statuses: Vec<TicketStatus>,
}

/// A shared resource and the tickets users hold on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<TicketUser>,
    #[serde(default)]
    pub tickets: Vec<Ticket>,
}

/// Returns the statuses with the given code, preserving their order.
pub fn statuses_with_code(statuses: &[TicketStatus], code: TicketStatusCode) -> Vec<&TicketStatus> {
    statuses
        .iter()
        .filter(|status| status.status_code == code)
        .collect()
}

/// Returns the most recent status, or `None` for an empty history.
///
/// Ties keep the earliest entry in the list.
pub fn last_status(statuses: &[TicketStatus]) -> Option<&TicketStatus> {
    statuses
        .iter()
        .reduce(|latest, current| if current.timestamp > latest.timestamp { current } else { latest })
}
