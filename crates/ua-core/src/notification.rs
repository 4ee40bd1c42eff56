//! Usage-analytics notification records and push subscriptions.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::ticket::{Resource, TicketStatusCode, TicketUser};
use crate::types::{NotificationId, ResourceId};

/// Translation key for the notification title.
pub const USAGE_ANALYTICS: &str = "USAGE_ANALYTICS";
/// Translation key for the notification body.
pub const USAGE_ANALYTICS_DESCRIPTION: &str = "USAGE_ANALYTICS_DESCRIPTION";

/// A browser push subscription registered by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushSubscription {
    pub endpoint: String,
    pub keys: SubscriptionKeys,
}

/// Client keys of a push subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionKeys {
    pub p256dh: String,
    pub auth: String,
}

/// The resource a notification refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSummary {
    pub id: ResourceId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<TicketUser>,
}

/// A notification shown to a user in-app, kept only for a short period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: NotificationId,
    pub ticket_status: TicketStatusCode,
    pub user: TicketUser,
    pub title_ref: String,
    pub description_ref: String,
    pub resource: ResourceSummary,
    pub timestamp: DateTime<Utc>,
    /// When the record should be purged.
    pub expires_at: DateTime<Utc>,
}

impl NotificationRecord {
    /// Builds the "you usually request this resource now" notification.
    ///
    /// Returns `None` if `timestamp + retention` is not a representable date.
    pub fn usage_analytics(
        id: NotificationId,
        resource: &Resource,
        user: &TicketUser,
        timestamp: DateTime<Utc>,
        retention: Duration,
    ) -> Option<Self> {
        let expires_at = timestamp.checked_add_signed(retention)?;
        Some(Self {
            id,
            // Not meaningful for usage analytics.
            ticket_status: TicketStatusCode::Active,
            user: user.clone(),
            title_ref: USAGE_ANALYTICS.to_string(),
            description_ref: USAGE_ANALYTICS_DESCRIPTION.to_string(),
            resource: ResourceSummary {
                id: resource.id.clone(),
                name: resource.name.clone(),
                created_by: resource.created_by.clone(),
            },
            timestamp,
            expires_at,
        })
    }
}
