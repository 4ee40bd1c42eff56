//! Import command for loading resources, users and push subscriptions.
//!
//! Reads a JSON document of the form
//! `{"users": [{"id", "username", "subscriptions": [...]}], "resources": [...]}`.
//! Importing the same document twice is a no-op.

use std::io::Write;

use anyhow::{Context, Result};
use serde::Deserialize;

use ua_core::notification::PushSubscription;
use ua_core::ticket::{Resource, TicketUser};
use ua_core::types::UserId;
use ua_db::Database;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ImportDocument {
    users: Vec<ImportUser>,
    resources: Vec<Resource>,
}

#[derive(Debug, Deserialize)]
struct ImportUser {
    id: UserId,
    #[serde(default)]
    username: String,
    #[serde(default)]
    subscriptions: Vec<PushSubscription>,
}

/// Counts of newly stored rows.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportResult {
    pub users: usize,
    pub subscriptions: usize,
    pub resources: usize,
    pub statuses: usize,
}

/// Imports a JSON document into the database.
pub fn import_document(db: &mut Database, content: &str) -> Result<ImportResult> {
    let document: ImportDocument =
        serde_json::from_str(content).context("failed to parse import document")?;

    let mut result = ImportResult::default();
    for user in &document.users {
        let ticket_user = TicketUser {
            id: user.id.clone(),
            username: user.username.clone(),
        };
        db.upsert_user(&ticket_user)?;
        result.users += 1;
        for subscription in &user.subscriptions {
            if db.add_subscription(&user.id, subscription)? {
                result.subscriptions += 1;
            }
        }
    }

    for resource in &document.resources {
        result.statuses += db
            .upsert_resource(resource)
            .with_context(|| format!("failed to import resource {}", resource.id))?;
        result.resources += 1;
    }

    tracing::debug!(?result, "import complete");
    Ok(result)
}

pub fn run<W: Write>(writer: &mut W, db: &mut Database, content: &str) -> Result<()> {
    let result = import_document(db, content)?;
    writeln!(
        writer,
        "Imported {} users, {} new subscriptions, {} resources, {} new statuses",
        result.users, result.subscriptions, result.resources, result.statuses
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use insta::assert_snapshot;

    const DOCUMENT: &str = r#"{
        "users": [
            {
                "id": "u1",
                "username": "ana",
                "subscriptions": [
                    {"endpoint": "https://push.example/1", "keys": {"p256dh": "BKey", "auth": "secret"}}
                ]
            }
        ],
        "resources": [
            {
                "id": "printer",
                "name": "Printer",
                "tickets": [
                    {
                        "user": {"id": "u1", "username": "ana"},
                        "statuses": [
                            {"status_code": "ACTIVE", "timestamp": "2023-01-01T10:00:00Z"},
                            {"status_code": "INACTIVE", "timestamp": "2023-01-01T10:20:00Z"},
                            {"status_code": "ACTIVE", "timestamp": "2023-01-02T10:10:00Z"}
                        ]
                    }
                ]
            }
        ]
    }"#;

    #[test]
    fn import_reports_counts() {
        let mut db = Database::open_in_memory().unwrap();
        let mut output = Vec::new();
        run(&mut output, &mut db, DOCUMENT).unwrap();

        assert_snapshot!(
            String::from_utf8(output).unwrap(),
            @"Imported 1 users, 1 new subscriptions, 1 resources, 3 new statuses"
        );
    }

    #[test]
    fn reimport_adds_nothing_new() {
        let mut db = Database::open_in_memory().unwrap();
        import_document(&mut db, DOCUMENT).unwrap();
        let again = import_document(&mut db, DOCUMENT).unwrap();

        assert_eq!(again.subscriptions, 0);
        assert_eq!(again.statuses, 0);
        let summary = db.summary().unwrap();
        assert_eq!(summary.subscriptions, 1);
        assert_eq!(summary.statuses, 3);
    }

    #[test]
    fn blank_ids_are_rejected() {
        let mut db = Database::open_in_memory().unwrap();
        let err = import_document(&mut db, r#"{"users": [{"id": "  "}]}"#).unwrap_err();
        assert!(err.to_string().contains("failed to parse import document"));
    }
}
