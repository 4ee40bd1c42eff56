//! Purge command for deleting expired notification records.

use std::io::Write;

use anyhow::Result;
use chrono::{DateTime, Utc};

use ua_db::Database;

pub fn run<W: Write>(writer: &mut W, db: &mut Database, now: DateTime<Utc>) -> Result<()> {
    let purged = db.purge_expired_notifications(now)?;
    tracing::debug!(purged, %now, "purged expired notifications");
    writeln!(writer, "Purged {purged} expired notifications")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{Duration, TimeZone};
    use insta::assert_snapshot;
    use ua_core::notification::NotificationRecord;
    use ua_core::ticket::{Resource, TicketUser};
    use ua_core::types::{NotificationId, ResourceId, UserId};

    #[test]
    fn purge_removes_only_expired_records() {
        let mut db = Database::open_in_memory().unwrap();
        let user = TicketUser {
            id: UserId::new("u1").unwrap(),
            username: "ana".to_string(),
        };
        let resource = Resource {
            id: ResourceId::new("printer").unwrap(),
            name: "Printer".to_string(),
            created_by: None,
            tickets: Vec::new(),
        };
        let start = Utc.with_ymd_and_hms(2023, 1, 3, 10, 31, 0).unwrap();
        for (id, offset) in [("n1", 0), ("n2", 60)] {
            let record = NotificationRecord::usage_analytics(
                NotificationId::new(id).unwrap(),
                &resource,
                &user,
                start + Duration::seconds(offset),
                Duration::seconds(10),
            )
            .unwrap();
            db.insert_notification(&record).unwrap();
        }

        let mut output = Vec::new();
        run(&mut output, &mut db, start + Duration::seconds(30)).unwrap();

        assert_snapshot!(String::from_utf8(output).unwrap(), @"Purged 1 expired notifications");
        let remaining = db.list_notifications().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id.as_str(), "n2");
    }
}
