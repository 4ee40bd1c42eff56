//! Status command for showing what the database holds.

use std::io::Write;
use std::path::Path;

use anyhow::Result;

use ua_db::Database;

pub fn run<W: Write>(writer: &mut W, db: &Database, database_path: &Path) -> Result<()> {
    let summary = db.summary()?;

    writeln!(writer, "Usage analytics status")?;
    writeln!(writer, "Database: {}", database_path.display())?;

    if summary.resources == 0 {
        writeln!(writer, "No resources recorded.")?;
        return Ok(());
    }

    writeln!(writer, "Users: {}", summary.users)?;
    writeln!(writer, "Push subscriptions: {}", summary.subscriptions)?;
    writeln!(writer, "Resources: {}", summary.resources)?;
    writeln!(writer, "Tickets: {}", summary.tickets)?;
    writeln!(writer, "Statuses: {}", summary.statuses)?;
    writeln!(writer, "Pending notifications: {}", summary.notifications)?;
    Ok(())
}
