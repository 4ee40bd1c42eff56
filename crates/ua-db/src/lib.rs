//! Storage layer for usage analytics.
//!
//! Provides persistence for resources, tickets, users, push subscriptions
//! and notification records using `rusqlite`.
//!
//! # Thread Safety
//!
//! The [`Database`] type wraps a `rusqlite::Connection`, which is `Send` but not `Sync`.
//! A `Database` instance can be moved between threads but cannot be shared
//! across threads without external synchronization.
//!
//! # Schema
//!
//! ## Timestamp Format
//!
//! Timestamps are stored as TEXT in RFC 3339 format with millisecond precision
//! (e.g., `2024-01-15T10:30:00.000Z`). Every writer uses the same format, so
//! lexicographic ordering matches chronological ordering.
//!
//! ## Status History
//!
//! Ticket statuses are returned in insertion order. The recurrence detector
//! is sensitive to event order, so history must be appended as it happens.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;

use ua_core::notification::{NotificationRecord, PushSubscription, ResourceSummary, SubscriptionKeys};
use ua_core::ticket::{Resource, Ticket, TicketStatus, TicketStatusCode, TicketUser};
use ua_core::types::{NotificationId, ResourceId, UserId, ValidationError};

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Failed to parse a stored timestamp.
    #[error("invalid timestamp for {context}: {timestamp}")]
    TimestampParse {
        context: String,
        timestamp: String,
        #[source]
        source: chrono::ParseError,
    },
    /// A stored value failed domain validation.
    #[error("invalid stored data for {context}: {source}")]
    InvalidData {
        context: String,
        #[source]
        source: ValidationError,
    },
}

/// Row counts per table, for status reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreSummary {
    pub users: usize,
    pub subscriptions: usize,
    pub resources: usize,
    pub tickets: usize,
    pub statuses: usize,
    pub notifications: usize,
}

/// Database connection wrapper.
///
/// See the [module documentation](self) for thread safety considerations.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Opens a database at the given path, creating it if necessary.
    ///
    /// The database schema is automatically initialized on first open.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Opens an in-memory database.
    ///
    /// Useful for testing. The database is destroyed when the connection closes.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Initializes the database schema.
    ///
    /// This is idempotent - safe to call on an already-initialized database.
    fn init(&self) -> Result<(), DbError> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL DEFAULT ''
            );

            CREATE TABLE IF NOT EXISTS push_subscriptions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                endpoint TEXT NOT NULL,
                p256dh TEXT NOT NULL,
                auth TEXT NOT NULL,
                UNIQUE (user_id, endpoint),
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS resources (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                created_by_id TEXT,
                created_by_username TEXT
            );

            CREATE TABLE IF NOT EXISTS tickets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                resource_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                username TEXT NOT NULL DEFAULT '',
                UNIQUE (resource_id, user_id),
                FOREIGN KEY (resource_id) REFERENCES resources(id) ON DELETE CASCADE
            );

            -- Status history per ticket, in insertion order (id)
            CREATE TABLE IF NOT EXISTS ticket_statuses (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ticket_id INTEGER NOT NULL,
                status_code TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                queue_position INTEGER,
                UNIQUE (ticket_id, status_code, timestamp),
                FOREIGN KEY (ticket_id) REFERENCES tickets(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_ticket_statuses_ticket ON ticket_statuses(ticket_id);

            -- Short-lived in-app notifications
            CREATE TABLE IF NOT EXISTS notifications (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                username TEXT NOT NULL,
                resource_id TEXT NOT NULL,
                resource_name TEXT NOT NULL,
                resource_created_by_id TEXT,
                resource_created_by_username TEXT,
                title_ref TEXT NOT NULL,
                description_ref TEXT NOT NULL,
                ticket_status TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                expires_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_notifications_expires ON notifications(expires_at);
            ",
        )?;
        Ok(())
    }

    /// Inserts or renames a user.
    pub fn upsert_user(&mut self, user: &TicketUser) -> Result<(), DbError> {
        self.conn.execute(
            "
            INSERT INTO users (id, username) VALUES (?, ?)
            ON CONFLICT (id) DO UPDATE SET username = excluded.username
            ",
            params![user.id.as_str(), user.username],
        )?;
        Ok(())
    }

    /// Fetches a user by ID.
    pub fn get_user(&self, id: &UserId) -> Result<Option<TicketUser>, DbError> {
        let username: Option<String> = self
            .conn
            .query_row(
                "SELECT username FROM users WHERE id = ?",
                [id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(username.map(|username| TicketUser {
            id: id.clone(),
            username,
        }))
    }

    /// Registers a push subscription, ignoring duplicates.
    ///
    /// Returns whether a new subscription was stored. The user must exist.
    pub fn add_subscription(
        &mut self,
        user_id: &UserId,
        subscription: &PushSubscription,
    ) -> Result<bool, DbError> {
        let inserted = self.conn.execute(
            "
            INSERT OR IGNORE INTO push_subscriptions (user_id, endpoint, p256dh, auth)
            VALUES (?, ?, ?, ?)
            ",
            params![
                user_id.as_str(),
                subscription.endpoint,
                subscription.keys.p256dh,
                subscription.keys.auth,
            ],
        )?;
        Ok(inserted > 0)
    }

    /// Lists a user's push subscriptions in registration order.
    pub fn list_subscriptions(&self, user_id: &UserId) -> Result<Vec<PushSubscription>, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT endpoint, p256dh, auth
            FROM push_subscriptions
            WHERE user_id = ?
            ORDER BY id ASC
            ",
        )?;
        let rows = stmt.query_map([user_id.as_str()], |row| {
            Ok(PushSubscription {
                endpoint: row.get(0)?,
                keys: SubscriptionKeys {
                    p256dh: row.get(1)?,
                    auth: row.get(2)?,
                },
            })
        })?;
        let mut subscriptions = Vec::new();
        for row in rows {
            subscriptions.push(row?);
        }
        Ok(subscriptions)
    }

    /// Removes a subscription, returning whether it existed.
    pub fn remove_subscription(&mut self, user_id: &UserId, endpoint: &str) -> Result<bool, DbError> {
        let removed = self.conn.execute(
            "DELETE FROM push_subscriptions WHERE user_id = ? AND endpoint = ?",
            params![user_id.as_str(), endpoint],
        )?;
        Ok(removed > 0)
    }

    /// Stores a resource with its tickets and status history.
    ///
    /// Existing rows are updated, and statuses already recorded for a ticket
    /// (same code and timestamp) are skipped. Returns the number of new
    /// statuses.
    pub fn upsert_resource(&mut self, resource: &Resource) -> Result<usize, DbError> {
        let tx = self.conn.transaction()?;
        let creator = resource.created_by.as_ref();
        tx.execute(
            "
            INSERT INTO resources (id, name, created_by_id, created_by_username)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                name = excluded.name,
                created_by_id = excluded.created_by_id,
                created_by_username = excluded.created_by_username
            ",
            params![
                resource.id.as_str(),
                resource.name,
                creator.map(|user| user.id.as_str()),
                creator.map(|user| user.username.as_str()),
            ],
        )?;

        let mut inserted = 0;
        for ticket in &resource.tickets {
            let ticket_id = ensure_ticket(&tx, &resource.id, &ticket.user)?;
            for status in &ticket.statuses {
                inserted += insert_status(&tx, ticket_id, status)?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// Lists all resources with their tickets and status histories.
    ///
    /// Resources are ordered by ID; tickets and statuses by insertion order.
    pub fn list_resources(&self) -> Result<Vec<Resource>, DbError> {
        let mut statuses_by_ticket: HashMap<i64, Vec<TicketStatus>> = HashMap::new();
        {
            let mut stmt = self.conn.prepare(
                "
                SELECT ticket_id, status_code, timestamp, queue_position
                FROM ticket_statuses
                ORDER BY id ASC
                ",
            )?;
            let rows = stmt.query_map([], |row| {
                let ticket_id: i64 = row.get(0)?;
                let code: String = row.get(1)?;
                let timestamp: String = row.get(2)?;
                let queue_position: Option<i64> = row.get(3)?;
                Ok((ticket_id, code, timestamp, queue_position))
            })?;
            for row in rows {
                let (ticket_id, code, timestamp, queue_position) = row?;
                let context = format!("ticket {ticket_id} status");
                let status = TicketStatus {
                    status_code: parse_status_code(&code, &context)?,
                    timestamp: parse_timestamp(&timestamp, &context)?,
                    queue_position,
                };
                statuses_by_ticket.entry(ticket_id).or_default().push(status);
            }
        }

        let mut tickets_by_resource: HashMap<String, Vec<Ticket>> = HashMap::new();
        {
            let mut stmt = self.conn.prepare(
                "
                SELECT id, resource_id, user_id, username
                FROM tickets
                ORDER BY id ASC
                ",
            )?;
            let rows = stmt.query_map([], |row| {
                let id: i64 = row.get(0)?;
                let resource_id: String = row.get(1)?;
                let user_id: String = row.get(2)?;
                let username: String = row.get(3)?;
                Ok((id, resource_id, user_id, username))
            })?;
            for row in rows {
                let (id, resource_id, user_id, username) = row?;
                let ticket = Ticket {
                    user: TicketUser {
                        id: parse_user_id(user_id, &format!("ticket {id}"))?,
                        username,
                    },
                    statuses: statuses_by_ticket.remove(&id).unwrap_or_default(),
                };
                tickets_by_resource.entry(resource_id).or_default().push(ticket);
            }
        }

        let mut stmt = self.conn.prepare(
            "
            SELECT id, name, created_by_id, created_by_username
            FROM resources
            ORDER BY id ASC
            ",
        )?;
        let rows = stmt.query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let created_by_id: Option<String> = row.get(2)?;
            let created_by_username: Option<String> = row.get(3)?;
            Ok((id, name, created_by_id, created_by_username))
        })?;
        let mut resources = Vec::new();
        for row in rows {
            let (id, name, created_by_id, created_by_username) = row?;
            let context = format!("resource {id}");
            let created_by = created_by_id
                .map(|user_id| {
                    Ok::<_, DbError>(TicketUser {
                        id: parse_user_id(user_id, &context)?,
                        username: created_by_username.unwrap_or_default(),
                    })
                })
                .transpose()?;
            let tickets = tickets_by_resource.remove(&id).unwrap_or_default();
            resources.push(Resource {
                id: ResourceId::new(id).map_err(|source| DbError::InvalidData {
                    context: context.clone(),
                    source,
                })?,
                name,
                created_by,
                tickets,
            });
        }
        Ok(resources)
    }

    /// Stores a notification record.
    pub fn insert_notification(&mut self, record: &NotificationRecord) -> Result<(), DbError> {
        let creator = record.resource.created_by.as_ref();
        self.conn.execute(
            "
            INSERT INTO notifications
            (id, user_id, username, resource_id, resource_name, resource_created_by_id,
             resource_created_by_username, title_ref, description_ref, ticket_status,
             timestamp, expires_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
            params![
                record.id.as_str(),
                record.user.id.as_str(),
                record.user.username,
                record.resource.id.as_str(),
                record.resource.name,
                creator.map(|user| user.id.as_str()),
                creator.map(|user| user.username.as_str()),
                record.title_ref,
                record.description_ref,
                record.ticket_status.as_str(),
                format_timestamp(record.timestamp),
                format_timestamp(record.expires_at),
            ],
        )?;
        Ok(())
    }

    /// Lists notification records ordered by timestamp then ID.
    pub fn list_notifications(&self) -> Result<Vec<NotificationRecord>, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT id, user_id, username, resource_id, resource_name, resource_created_by_id,
                   resource_created_by_username, title_ref, description_ref, ticket_status,
                   timestamp, expires_at
            FROM notifications
            ORDER BY timestamp ASC, id ASC
            ",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(NotificationRow {
                id: row.get(0)?,
                user_id: row.get(1)?,
                username: row.get(2)?,
                resource_id: row.get(3)?,
                resource_name: row.get(4)?,
                created_by_id: row.get(5)?,
                created_by_username: row.get(6)?,
                title_ref: row.get(7)?,
                description_ref: row.get(8)?,
                ticket_status: row.get(9)?,
                timestamp: row.get(10)?,
                expires_at: row.get(11)?,
            })
        })?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?.into_record()?);
        }
        Ok(records)
    }

    /// Deletes a notification record, returning whether it existed.
    pub fn delete_notification(&mut self, id: &NotificationId) -> Result<bool, DbError> {
        let removed = self
            .conn
            .execute("DELETE FROM notifications WHERE id = ?", [id.as_str()])?;
        Ok(removed > 0)
    }

    /// Deletes notification records that expired at or before `now`.
    pub fn purge_expired_notifications(&mut self, now: DateTime<Utc>) -> Result<usize, DbError> {
        let removed = self.conn.execute(
            "DELETE FROM notifications WHERE expires_at <= ?",
            [format_timestamp(now)],
        )?;
        Ok(removed)
    }

    /// Counts rows in every table.
    pub fn summary(&self) -> Result<StoreSummary, DbError> {
        Ok(StoreSummary {
            users: self.count("users")?,
            subscriptions: self.count("push_subscriptions")?,
            resources: self.count("resources")?,
            tickets: self.count("tickets")?,
            statuses: self.count("ticket_statuses")?,
            notifications: self.count("notifications")?,
        })
    }

    fn count(&self, table: &'static str) -> Result<usize, DbError> {
        let count: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

/// Raw notification columns before validation.
struct NotificationRow {
    id: String,
    user_id: String,
    username: String,
    resource_id: String,
    resource_name: String,
    created_by_id: Option<String>,
    created_by_username: Option<String>,
    title_ref: String,
    description_ref: String,
    ticket_status: String,
    timestamp: String,
    expires_at: String,
}

impl NotificationRow {
    fn into_record(self) -> Result<NotificationRecord, DbError> {
        let context = format!("notification {}", self.id);
        let invalid = |source| DbError::InvalidData {
            context: context.clone(),
            source,
        };
        let created_by = match self.created_by_id {
            Some(id) => Some(TicketUser {
                id: UserId::new(id).map_err(invalid)?,
                username: self.created_by_username.unwrap_or_default(),
            }),
            None => None,
        };
        Ok(NotificationRecord {
            ticket_status: parse_status_code(&self.ticket_status, &context)?,
            timestamp: parse_timestamp(&self.timestamp, &context)?,
            expires_at: parse_timestamp(&self.expires_at, &context)?,
            id: NotificationId::new(self.id).map_err(invalid)?,
            user: TicketUser {
                id: UserId::new(self.user_id).map_err(invalid)?,
                username: self.username,
            },
            title_ref: self.title_ref,
            description_ref: self.description_ref,
            resource: ResourceSummary {
                id: ResourceId::new(self.resource_id).map_err(invalid)?,
                name: self.resource_name,
                created_by,
            },
        })
    }
}

/// Returns the ticket row ID for `(resource, user)`, creating it if needed.
fn ensure_ticket(conn: &Connection, resource_id: &ResourceId, user: &TicketUser) -> Result<i64, DbError> {
    conn.execute(
        "
        INSERT INTO tickets (resource_id, user_id, username) VALUES (?, ?, ?)
        ON CONFLICT (resource_id, user_id) DO UPDATE SET username = excluded.username
        ",
        params![resource_id.as_str(), user.id.as_str(), user.username],
    )?;
    let id = conn.query_row(
        "SELECT id FROM tickets WHERE resource_id = ? AND user_id = ?",
        params![resource_id.as_str(), user.id.as_str()],
        |row| row.get(0),
    )?;
    Ok(id)
}

fn insert_status(conn: &Connection, ticket_id: i64, status: &TicketStatus) -> Result<usize, DbError> {
    let inserted = conn.execute(
        "
        INSERT OR IGNORE INTO ticket_statuses (ticket_id, status_code, timestamp, queue_position)
        VALUES (?, ?, ?, ?)
        ",
        params![
            ticket_id,
            status.status_code.as_str(),
            format_timestamp(status.timestamp),
            status.queue_position,
        ],
    )?;
    Ok(inserted)
}

fn parse_timestamp(timestamp: &str, context: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(timestamp)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|source| DbError::TimestampParse {
            context: context.to_string(),
            timestamp: timestamp.to_string(),
            source,
        })
}

fn parse_status_code(code: &str, context: &str) -> Result<TicketStatusCode, DbError> {
    code.parse().map_err(|source| DbError::InvalidData {
        context: context.to_string(),
        source,
    })
}

fn parse_user_id(id: String, context: &str) -> Result<UserId, DbError> {
    UserId::new(id).map_err(|source| DbError::InvalidData {
        context: context.to_string(),
        source,
    })
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}
