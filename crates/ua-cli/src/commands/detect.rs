//! Detect command: runs recurrence detection over raw timestamps.

use std::io::Write;
use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;

use ua_core::{Detection, Detector};

#[derive(Debug, Args)]
pub struct DetectArgs {
    /// File with one RFC 3339 timestamp per line (defaults to stdin).
    #[arg(long)]
    pub input: Option<PathBuf>,

    /// Reference time (ISO 8601 or relative, e.g. "2 hours ago").
    #[arg(long)]
    pub now: Option<String>,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

pub fn run<W: Write>(
    writer: &mut W,
    detector: &Detector,
    timestamps: &[DateTime<Utc>],
    now: DateTime<Utc>,
    json: bool,
) -> Result<()> {
    let detection = detector.analyze(timestamps, now);

    if json {
        writeln!(writer, "{}", serde_json::to_string_pretty(&detection)?)?;
    } else {
        write_text(writer, &detection, timestamps.len())?;
    }
    Ok(())
}

fn write_text<W: Write>(writer: &mut W, detection: &Detection, events: usize) -> Result<()> {
    writeln!(writer, "Events: {events}")?;
    if detection.clusters.is_empty() {
        writeln!(writer, "No recurring times found.")?;
        return Ok(());
    }

    writeln!(writer, "Recurring times:")?;
    for (key, cluster) in detection.clusters.iter() {
        let seen = if cluster.seen_today { "yes" } else { "no" };
        writeln!(
            writer,
            "- {key}  frequency {}  seen today: {seen}",
            cluster.frequency
        )?;
    }

    if detection.eligible.is_empty() {
        writeln!(writer, "Notify: no")?;
    } else {
        let keys: Vec<String> = detection.eligible.iter().map(ToString::to_string).collect();
        writeln!(writer, "Notify: yes ({})", keys.join(", "))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use insta::assert_snapshot;
    use ua_core::DetectorConfig;

    use crate::commands::util::parse_timestamp_lines;

    const HISTORY: &str = "\
# printer requests
2023-01-01T10:00:00Z
2023-01-02T10:10:00Z
2023-01-03T09:50:00Z
";

    fn detector() -> Detector {
        Detector::new(DetectorConfig {
            frequency_threshold: 2.0,
            ..DetectorConfig::default()
        })
    }

    fn now(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn render(now_str: &str, json: bool) -> String {
        let timestamps = parse_timestamp_lines(HISTORY).unwrap();
        let mut output = Vec::new();
        run(&mut output, &detector(), &timestamps, now(now_str), json).unwrap();
        String::from_utf8(output).unwrap()
    }

    #[test]
    fn detect_text_inside_window() {
        assert_snapshot!(render("2023-01-03T10:31:00Z", false), @r"
        Events: 3
        Recurring times:
        - 10:00:00  frequency 2  seen today: no
        Notify: yes (10:00:00)
        ");
    }

    #[test]
    fn detect_text_before_window() {
        assert_snapshot!(render("2023-01-03T10:30:00Z", false), @r"
        Events: 3
        Recurring times:
        - 10:00:00  frequency 2  seen today: no
        Notify: no
        ");
    }

    #[test]
    fn detect_json() {
        assert_snapshot!(render("2023-01-03T10:31:00Z", true), @r#"
        {
          "clusters": {
            "10:00:00": {
              "frequency": 2,
              "seen_today": false
            }
          },
          "eligible": [
            "10:00:00"
          ]
        }
        "#);
    }

    #[test]
    fn detect_without_history() {
        let mut output = Vec::new();
        run(&mut output, &detector(), &[], now("2023-01-03T10:31:00Z"), false).unwrap();
        assert_snapshot!(String::from_utf8(output).unwrap(), @r"
        Events: 0
        No recurring times found.
        ");
    }
}
