//! Analyze command: finds users late for their usual request time and
//! reminds them.
//!
//! Every ticket's `ACTIVE` history is run through the detector. For each
//! ticket that should be notified, a short-lived notification record is
//! stored and a push message is sent to each of the user's subscriptions.

use std::io::Write;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use clap::Args;
use rayon::prelude::*;
use tokio::runtime::Runtime;

use ua_core::notification::NotificationRecord;
use ua_core::ticket::{
    Resource, Ticket, TicketStatusCode, TicketUser, last_status, statuses_with_code,
};
use ua_core::types::NotificationId;
use ua_core::{Detector, TimeOfDay};
use ua_db::Database;
use ua_push::{PushTransport, WebPushClient, deliver};

use crate::Config;
use crate::commands::util::resolve_now;

#[derive(Debug, Args)]
pub struct AnalyzeArgs {
    /// Reference time (ISO 8601 or relative, e.g. "2 hours ago").
    #[arg(long)]
    pub now: Option<String>,

    /// List who would be notified without recording or sending anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Leave notification records for the next run to purge.
    #[arg(long)]
    pub no_wait: bool,
}

/// A ticket whose owner is late for one of their usual request times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate<'a> {
    pub resource: &'a Resource,
    pub user: &'a TicketUser,
    pub keys: Vec<TimeOfDay>,
}

/// Counts reported at the end of a run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AnalyzeSummary {
    pub tickets: usize,
    pub candidates: usize,
    pub recorded: usize,
    pub delivered: usize,
    pub failed: usize,
    pub pruned: usize,
    pub purged: usize,
}

/// How a notifying run treats the records it creates.
#[derive(Debug, Clone, Copy)]
pub struct NotifyOptions {
    pub now: DateTime<Utc>,
    pub retention: Duration,
    /// Wait out the retention period and delete this run's records.
    pub wait: bool,
}

/// Runs detection over every ticket, in parallel.
///
/// Candidates are returned in resource then ticket order.
pub fn find_candidates<'a>(
    resources: &'a [Resource],
    detector: &Detector,
    now: DateTime<Utc>,
) -> Vec<Candidate<'a>> {
    let tickets: Vec<(&Resource, &Ticket)> = resources
        .iter()
        .flat_map(|resource| resource.tickets.iter().map(move |ticket| (resource, ticket)))
        .collect();

    tickets
        .par_iter()
        .filter_map(|&(resource, ticket)| {
            let active = statuses_with_code(&ticket.statuses, TicketStatusCode::Active);
            let detection = detector.analyze(&active, now);
            tracing::debug!(
                resource = %resource.id,
                user = %ticket.user.id,
                current = ?last_status(&ticket.statuses).map(|status| status.status_code),
                requests = active.len(),
                clusters = detection.clusters.len(),
                notify = detection.should_notify(),
                "analyzed ticket"
            );
            detection.should_notify().then(|| Candidate {
                resource,
                user: &ticket.user,
                keys: detection.eligible,
            })
        })
        .collect()
}

pub fn run<W: Write>(
    writer: &mut W,
    db: &mut Database,
    config: &Config,
    args: &AnalyzeArgs,
) -> Result<()> {
    let now = resolve_now(args.now.as_deref())?;
    let detector = Detector::new(config.detector());

    if args.dry_run {
        return run_dry(writer, db, &detector, now);
    }

    let vapid = config.vapid()?;
    let client = WebPushClient::new(&vapid).context("failed to create push client")?;
    let options = NotifyOptions {
        now,
        retention: config.retention()?,
        wait: !args.no_wait,
    };
    run_with_transport(writer, db, &client, &detector, options)?;
    Ok(())
}

fn run_dry<W: Write>(
    writer: &mut W,
    db: &Database,
    detector: &Detector,
    now: DateTime<Utc>,
) -> Result<()> {
    let resources = db.list_resources()?;
    let candidates = find_candidates(&resources, detector, now);

    if candidates.is_empty() {
        writeln!(writer, "No reminders due at {}", now.to_rfc3339())?;
        return Ok(());
    }

    writeln!(writer, "Reminders due at {}:", now.to_rfc3339())?;
    for candidate in &candidates {
        let keys: Vec<String> = candidate.keys.iter().map(ToString::to_string).collect();
        writeln!(
            writer,
            "- {} ({}) for {} [{}]",
            candidate.resource.name,
            candidate.resource.id,
            display_user(candidate.user),
            keys.join(", ")
        )?;
    }
    Ok(())
}

/// Full notifying run against any push transport.
pub fn run_with_transport<W: Write, T: PushTransport>(
    writer: &mut W,
    db: &mut Database,
    transport: &T,
    detector: &Detector,
    options: NotifyOptions,
) -> Result<AnalyzeSummary> {
    let mut summary = AnalyzeSummary {
        purged: db.purge_expired_notifications(options.now)?,
        ..AnalyzeSummary::default()
    };

    let resources = db.list_resources()?;
    summary.tickets = resources.iter().map(|resource| resource.tickets.len()).sum();
    let candidates = find_candidates(&resources, detector, options.now);
    summary.candidates = candidates.len();

    let runtime = Runtime::new().context("failed to initialize tokio runtime")?;
    let mut recorded = Vec::new();
    for candidate in &candidates {
        let record = NotificationRecord::usage_analytics(
            new_notification_id()?,
            candidate.resource,
            candidate.user,
            options.now,
            options.retention,
        )
        .context("notification expiry is out of range")?;
        db.insert_notification(&record)?;
        recorded.push(record.id);
        tracing::info!(
            resource = %candidate.resource.id,
            user = %candidate.user.id,
            "recorded usage reminder"
        );

        if db.get_user(&candidate.user.id)?.is_none() {
            tracing::debug!(user = %candidate.user.id, "user not registered, skipping push");
            continue;
        }

        let subscriptions = db.list_subscriptions(&candidate.user.id)?;
        let report = runtime.block_on(deliver(transport, &subscriptions));
        summary.delivered += report.delivered;
        summary.failed += report.failed;
        for endpoint in &report.gone {
            if db.remove_subscription(&candidate.user.id, endpoint)? {
                summary.pruned += 1;
            }
        }
    }
    summary.recorded = recorded.len();

    if options.wait && !recorded.is_empty() {
        if let Ok(pause) = options.retention.to_std() {
            tracing::debug!(seconds = pause.as_secs(), "waiting before removing reminders");
            std::thread::sleep(pause);
        }
        for id in &recorded {
            db.delete_notification(id)?;
        }
    }

    writeln!(
        writer,
        "Analyzed {} tickets: {} reminders sent ({} delivered, {} failed, {} stale subscriptions removed)",
        summary.tickets, summary.recorded, summary.delivered, summary.failed, summary.pruned
    )?;
    Ok(summary)
}

fn new_notification_id() -> Result<NotificationId> {
    NotificationId::new(uuid::Uuid::new_v4().to_string()).context("failed to create notification id")
}

fn display_user(user: &TicketUser) -> &str {
    if user.username.is_empty() {
        user.id.as_str()
    } else {
        &user.username
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    use insta::assert_snapshot;
    use ua_core::DetectorConfig;
    use ua_core::notification::{PushSubscription, SubscriptionKeys};
    use ua_core::ticket::TicketStatus;
    use ua_core::types::{ResourceId, UserId};
    use ua_push::{DeliveryOutcome, PushError};

    const GONE: &str = "https://push.example/gone";

    #[derive(Default)]
    struct FakeTransport {
        sent: Mutex<Vec<String>>,
    }

    impl PushTransport for FakeTransport {
        async fn send(&self, subscription: &PushSubscription) -> Result<DeliveryOutcome, PushError> {
            self.sent.lock().unwrap().push(subscription.endpoint.clone());
            if subscription.endpoint == GONE {
                Ok(DeliveryOutcome::Gone)
            } else {
                Ok(DeliveryOutcome::Delivered)
            }
        }
    }

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn user(id: &str, username: &str) -> TicketUser {
        TicketUser {
            id: UserId::new(id).unwrap(),
            username: username.to_string(),
        }
    }

    fn active(ts: &str) -> TicketStatus {
        TicketStatus {
            status_code: TicketStatusCode::Active,
            timestamp: at(ts),
            queue_position: None,
        }
    }

    fn subscription(endpoint: &str) -> PushSubscription {
        PushSubscription {
            endpoint: endpoint.to_string(),
            keys: SubscriptionKeys {
                p256dh: "BKey".to_string(),
                auth: "secret".to_string(),
            },
        }
    }

    fn detector() -> Detector {
        Detector::new(DetectorConfig {
            frequency_threshold: 2.0,
            ..DetectorConfig::default()
        })
    }

    /// Ana uses the printer around 10:00 daily; Ben used it once.
    fn seeded_db() -> Database {
        let mut db = Database::open_in_memory().unwrap();
        let ana = user("u1", "ana");
        db.upsert_user(&ana).unwrap();
        db.add_subscription(&ana.id, &subscription("https://push.example/ana"))
            .unwrap();
        db.add_subscription(&ana.id, &subscription(GONE)).unwrap();

        let resource = Resource {
            id: ResourceId::new("printer").unwrap(),
            name: "Printer".to_string(),
            created_by: Some(ana.clone()),
            tickets: vec![
                Ticket {
                    user: ana,
                    statuses: vec![
                        active("2023-01-01T10:00:00Z"),
                        TicketStatus {
                            status_code: TicketStatusCode::Inactive,
                            timestamp: at("2023-01-01T10:20:00Z"),
                            queue_position: None,
                        },
                        active("2023-01-02T10:10:00Z"),
                        active("2023-01-03T09:50:00Z"),
                    ],
                },
                Ticket {
                    user: user("u2", "ben"),
                    statuses: vec![active("2023-01-01T14:00:00Z")],
                },
            ],
        };
        db.upsert_resource(&resource).unwrap();
        db
    }

    #[test]
    fn candidates_follow_active_history_only() {
        let db = seeded_db();
        let resources = db.list_resources().unwrap();

        let candidates = find_candidates(&resources, &detector(), at("2023-01-03T10:31:00Z"));
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].user.username, "ana");
        assert_eq!(candidates[0].keys, ["10:00:00".parse::<TimeOfDay>().unwrap()]);

        let later = find_candidates(&resources, &detector(), at("2023-01-03T11:00:00Z"));
        assert!(later.is_empty());
    }

    #[test]
    fn dry_run_lists_reminders_without_recording() {
        let db = seeded_db();
        let mut output = Vec::new();
        run_dry(&mut output, &db, &detector(), at("2023-01-03T10:31:00Z")).unwrap();

        assert_snapshot!(String::from_utf8(output).unwrap(), @r"
        Reminders due at 2023-01-03T10:31:00+00:00:
        - Printer (printer) for ana [10:00:00]
        ");
        assert_eq!(db.summary().unwrap().notifications, 0);
    }

    #[test]
    fn notifying_run_records_delivers_and_prunes() {
        let mut db = seeded_db();
        let transport = FakeTransport::default();
        let options = NotifyOptions {
            now: at("2023-01-03T10:31:00Z"),
            retention: Duration::seconds(10),
            wait: false,
        };

        let mut output = Vec::new();
        let summary =
            run_with_transport(&mut output, &mut db, &transport, &detector(), options).unwrap();

        assert_snapshot!(
            String::from_utf8(output).unwrap(),
            @"Analyzed 2 tickets: 1 reminders sent (1 delivered, 0 failed, 1 stale subscriptions removed)"
        );
        assert_eq!(summary.candidates, 1);
        assert_eq!(transport.sent.lock().unwrap().len(), 2);

        let remaining = db.list_subscriptions(&UserId::new("u1").unwrap()).unwrap();
        assert_eq!(remaining, [subscription("https://push.example/ana")]);

        let records = db.list_notifications().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].user.username, "ana");
        assert_eq!(records[0].resource.name, "Printer");
        assert_eq!(records[0].expires_at, at("2023-01-03T10:31:10Z"));
    }

    #[test]
    fn next_run_purges_expired_records() {
        let mut db = seeded_db();
        let transport = FakeTransport::default();
        let first = NotifyOptions {
            now: at("2023-01-03T10:31:00Z"),
            retention: Duration::seconds(10),
            wait: false,
        };
        run_with_transport(&mut Vec::new(), &mut db, &transport, &detector(), first).unwrap();

        let second = NotifyOptions {
            now: at("2023-01-03T10:45:00Z"),
            ..first
        };
        let summary =
            run_with_transport(&mut Vec::new(), &mut db, &transport, &detector(), second).unwrap();

        assert_eq!(summary.purged, 1);
        // Still inside the window, so a fresh reminder is recorded.
        assert_eq!(db.list_notifications().unwrap().len(), 1);
    }

    #[test]
    fn waiting_run_removes_its_own_records() {
        let mut db = seeded_db();
        let options = NotifyOptions {
            now: at("2023-01-03T10:31:00Z"),
            retention: Duration::zero(),
            wait: true,
        };
        let summary = run_with_transport(
            &mut Vec::new(),
            &mut db,
            &FakeTransport::default(),
            &detector(),
            options,
        )
        .unwrap();

        assert_eq!(summary.recorded, 1);
        assert!(db.list_notifications().unwrap().is_empty());
    }

    #[test]
    fn unrepresentable_retention_fails_without_recording() {
        let mut db = seeded_db();
        let options = NotifyOptions {
            now: at("2023-01-03T10:31:00Z"),
            retention: Duration::MAX,
            wait: false,
        };
        let err = run_with_transport(
            &mut Vec::new(),
            &mut db,
            &FakeTransport::default(),
            &detector(),
            options,
        )
        .unwrap_err();

        assert!(err.to_string().contains("out of range"));
        assert!(db.list_notifications().unwrap().is_empty());
    }

    #[test]
    fn unregistered_users_get_a_record_but_no_push() {
        let mut db = Database::open_in_memory().unwrap();
        let resource = Resource {
            id: ResourceId::new("room").unwrap(),
            name: "Room".to_string(),
            created_by: None,
            tickets: vec![Ticket {
                user: user("ghost", ""),
                statuses: vec![
                    active("2023-01-01T10:00:00Z"),
                    active("2023-01-02T10:00:00Z"),
                    active("2023-01-03T09:55:00Z"),
                ],
            }],
        };
        db.upsert_resource(&resource).unwrap();
        let transport = FakeTransport::default();
        let options = NotifyOptions {
            now: at("2023-01-03T10:31:00Z"),
            retention: Duration::seconds(10),
            wait: false,
        };

        let summary =
            run_with_transport(&mut Vec::new(), &mut db, &transport, &detector(), options).unwrap();

        assert_eq!(summary.recorded, 1);
        assert!(transport.sent.lock().unwrap().is_empty());
    }
}
