//! Background delivery of due reminders.
//!
//! Every tick takes PENDING reminders whose `scheduled_at` has passed, sends
//! them to each live stakeholder of the task on every channel the
//! stakeholder has an address for, and records one log row per attempt.
//! The database lock is released while messages are in flight.

use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use tokio::time::interval;
use uuid::Uuid;

use taskflow_api::{
    Channel, DeliveryStatus, Reminder, ReminderStatus, ReminderType, Stakeholder, TaskSummary, db,
    db::reminders::{REMINDER_COLUMNS, TASK_SUMMARY_COLUMNS},
    service,
};

use crate::notify::templates::{self, ReminderContext};
use crate::notify::{Delivery, Notifier};
use crate::storage::{
    Db, reminder_at, sq_execute, sq_query_map, sq_query_row, task_link_from_row,
    task_summary_at, user_from_row,
};

/// Maximum reminders handled per tick.
pub const DISPATCH_BATCH: u64 = 100;

const FALLBACK_SENDER: &str = "TaskFlow Pro";
const SKIPPED_NOTE: &str = "skipped: provider not configured";

/// Counters for one dispatch pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSummary {
    pub reminders: usize,
    pub sent: usize,
    pub failed: usize,
    pub attempts: usize,
}

struct DueReminder {
    reminder: Reminder,
    task: TaskSummary,
    task_description: Option<String>,
    owner_id: String,
}

struct Attempt {
    stakeholder_id: String,
    channel: Channel,
    status: DeliveryStatus,
    error: Option<String>,
}

/// Run the dispatcher on a fixed interval until the runtime shuts down.
pub fn spawn<N>(db: Db, notifier: N, every: Duration) -> tokio::task::JoinHandle<()>
where
    N: Notifier + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval(every);
        loop {
            ticker.tick().await;
            match dispatch_due(&db, &notifier, Utc::now()).await {
                Ok(summary) if summary.reminders > 0 => tracing::info!(
                    "dispatched {} reminders ({} sent, {} failed, {} deliveries)",
                    summary.reminders,
                    summary.sent,
                    summary.failed,
                    summary.attempts
                ),
                Ok(_) => {}
                Err(e) => tracing::error!("reminder dispatch failed: {e:#}"),
            }
        }
    })
}

/// Deliver every reminder due at `now`.
pub async fn dispatch_due<N: Notifier>(
    db: &Db,
    notifier: &N,
    now: DateTime<Utc>,
) -> anyhow::Result<DispatchSummary> {
    let now_ts = service::format_ts(now);
    let due = {
        let conn = db.conn();
        sq_query_map(&conn, db::reminders::due(&now_ts, DISPATCH_BATCH), |row| {
            let description_at = REMINDER_COLUMNS + TASK_SUMMARY_COLUMNS;
            Ok(DueReminder {
                reminder: reminder_at(row, 0)?,
                task: task_summary_at(row, REMINDER_COLUMNS)?,
                task_description: row.get(description_at)?,
                owner_id: row.get(description_at + 1)?,
            })
        })
        .context("loading due reminders")?
    };

    let mut summary = DispatchSummary::default();
    for item in due {
        // A storage error on one reminder leaves it PENDING for the next tick.
        let status = match deliver(db, notifier, &item, now, &mut summary).await {
            Ok(status) => status,
            Err(e) => {
                tracing::error!("delivering reminder {}: {e:#}", item.reminder.id);
                continue;
            }
        };
        summary.reminders += 1;
        match status {
            ReminderStatus::Sent => summary.sent += 1,
            _ => summary.failed += 1,
        }
    }
    Ok(summary)
}

async fn deliver<N: Notifier>(
    db: &Db,
    notifier: &N,
    item: &DueReminder,
    now: DateTime<Utc>,
    summary: &mut DispatchSummary,
) -> anyhow::Result<ReminderStatus> {
    let reminder = &item.reminder;
    let (recipients, sender_name) = {
        let conn = db.conn();
        let links = sq_query_map(
            &conn,
            db::tasks::links_for_tasks(std::slice::from_ref(&reminder.task_id)),
            task_link_from_row,
        )
        .context("loading recipients")?;
        let owner = sq_query_row(&conn, db::users::get_active(&item.owner_id), user_from_row)
            .optional()
            .context("loading reminder owner")?;
        let sender = owner
            .map(|u| format!("{} {}", u.first_name, u.last_name).trim().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| FALLBACK_SENDER.to_string());
        let recipients: Vec<Stakeholder> = links.into_iter().map(|l| l.stakeholder).collect();
        (recipients, sender)
    };

    let text = reminder
        .message
        .clone()
        .unwrap_or_else(|| default_message(reminder.reminder_type, &item.task.title));

    let mut attempts = Vec::new();
    for stakeholder in &recipients {
        let recipient_name = stakeholder.full_name();
        let message = templates::task_reminder(&ReminderContext {
            recipient_name: &recipient_name,
            sender_name: &sender_name,
            task_title: &item.task.title,
            task_description: item.task_description.as_deref(),
            due_date: item.task.due_date.as_deref(),
            priority: item.task.priority,
            message: &text,
        });
        for &channel in &reminder.channels {
            let Some(address) = address_for(stakeholder, channel) else {
                continue;
            };
            let (status, error) = match notifier.send(channel, address, &message).await {
                Ok(Delivery::Sent) => (DeliveryStatus::Sent, None),
                Ok(Delivery::Skipped) => (DeliveryStatus::Sent, Some(SKIPPED_NOTE.to_string())),
                Err(e) => {
                    tracing::warn!(
                        "reminder {} via {channel} to {address} failed: {e}",
                        reminder.id
                    );
                    (DeliveryStatus::Failed, Some(e.to_string()))
                }
            };
            attempts.push(Attempt {
                stakeholder_id: stakeholder.id.clone(),
                channel,
                status,
                error,
            });
        }
    }
    summary.attempts += attempts.len();

    let outcome = if attempts.is_empty() || attempts.iter().any(|a| a.status == DeliveryStatus::Sent)
    {
        ReminderStatus::Sent
    } else {
        ReminderStatus::Failed
    };
    record(db, item, &attempts, outcome, now)?;
    Ok(outcome)
}

/// Persist the attempts, the reminder's outcome and its next occurrence in
/// one transaction. The next occurrence is the first one after `at`.
fn record(
    db: &Db,
    item: &DueReminder,
    attempts: &[Attempt],
    outcome: ReminderStatus,
    at: DateTime<Utc>,
) -> anyhow::Result<()> {
    let reminder = &item.reminder;
    let now = service::format_ts(at);
    let mut conn = db.conn();
    let tx = conn.transaction().context("begin reminder outcome")?;
    for attempt in attempts {
        sq_execute(
            &tx,
            db::reminders::insert_log(
                &Uuid::new_v4().to_string(),
                &reminder.id,
                Some(&attempt.stakeholder_id),
                attempt.channel,
                attempt.status,
                attempt.error.as_deref(),
                &now,
            ),
        )
        .context("insert reminder log")?;
    }
    let sent_at = (outcome == ReminderStatus::Sent).then_some(now.as_str());
    sq_execute(&tx, db::reminders::set_status(&reminder.id, outcome, sent_at, &now))
        .context("update reminder status")?;

    if let Some(pattern) = reminder.recurring_pattern.filter(|_| reminder.is_recurring) {
        let next = service::parse_stored(&reminder.scheduled_at)
            .and_then(|scheduled| service::next_occurrence(scheduled, pattern, at));
        match next {
            Some(next) => {
                let next_ts = service::format_ts(next);
                sq_execute(
                    &tx,
                    db::reminders::insert(&db::reminders::InsertParams {
                        id: &Uuid::new_v4().to_string(),
                        task_id: &reminder.task_id,
                        reminder_type: reminder.reminder_type,
                        scheduled_at: &next_ts,
                        message: reminder.message.as_deref(),
                        channels: &reminder.channels,
                        is_recurring: true,
                        recurring_pattern: Some(pattern),
                        now: &now,
                    }),
                )
                .context("schedule next occurrence")?;
                tracing::debug!("reminder {} recurs at {next_ts}", reminder.id);
            }
            None => tracing::warn!(
                "reminder {} has an unusable schedule '{}', not recurring",
                reminder.id,
                reminder.scheduled_at
            ),
        }
    }
    tx.commit().context("commit reminder outcome")?;
    Ok(())
}

fn address_for(stakeholder: &Stakeholder, channel: Channel) -> Option<&str> {
    match channel {
        Channel::Email => stakeholder.email.as_deref(),
        Channel::Sms | Channel::Whatsapp => stakeholder.phone.as_deref(),
    }
}

fn default_message(kind: ReminderType, title: &str) -> String {
    match kind {
        ReminderType::TaskDue => format!("Task \"{title}\" is due soon"),
        ReminderType::TaskOverdue => format!("Task \"{title}\" is overdue"),
        ReminderType::TaskAssigned => format!("You have been assigned to task \"{title}\""),
        ReminderType::Custom => format!("Reminder about task \"{title}\""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::notify::{NotifyError, OutboundMessage};
    use crate::storage::{log_from_row, reminder_from_row};
    use crate::test_support::TestApp;
    use taskflow_api::{RecurrencePattern, ReminderLog};

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(Channel, String, String)>>,
        fail: Option<Channel>,
    }

    impl Notifier for RecordingNotifier {
        async fn send(
            &self,
            channel: Channel,
            to: &str,
            message: &OutboundMessage,
        ) -> Result<Delivery, NotifyError> {
            if self.fail == Some(channel) {
                return Err(NotifyError::Rejected {
                    provider: "fake",
                    message: "boom".into(),
                });
            }
            self.sent
                .lock()
                .expect("lock")
                .push((channel, to.to_string(), message.text.clone()));
            Ok(Delivery::Sent)
        }
    }

    fn schedule(
        app: &TestApp,
        task_id: &str,
        at: &str,
        channels: &[Channel],
        pattern: Option<RecurrencePattern>,
    ) -> String {
        let id = Uuid::new_v4().to_string();
        let conn = app.db.conn();
        sq_execute(
            &conn,
            db::reminders::insert(&db::reminders::InsertParams {
                id: &id,
                task_id,
                reminder_type: ReminderType::TaskDue,
                scheduled_at: at,
                message: None,
                channels,
                is_recurring: pattern.is_some(),
                recurring_pattern: pattern,
                now: &service::now_ts(),
            }),
        )
        .expect("insert reminder");
        id
    }

    fn reminders_of(app: &TestApp, task_id: &str) -> Vec<Reminder> {
        let conn = app.db.conn();
        sq_query_map(&conn, db::reminders::for_task(task_id), reminder_from_row).expect("reminders")
    }

    fn logs_of(app: &TestApp, reminder_id: &str) -> Vec<ReminderLog> {
        let conn = app.db.conn();
        sq_query_map(
            &conn,
            db::reminders::logs_for_reminders(&[reminder_id.to_string()]),
            log_from_row,
        )
        .expect("logs")
    }

    fn at(raw: &str) -> DateTime<Utc> {
        service::parse_stored(raw).expect("timestamp")
    }

    #[tokio::test]
    async fn delivers_to_every_addressable_channel() {
        let app = TestApp::new();
        let user = app.user("owner@example.com");
        let task = app.task(&user, "Ship report", None);
        let both = app.stakeholder(&user, "Bob", Some("bob@example.com"), Some("+919876543210"));
        let email_only = app.stakeholder(&user, "Eve", Some("eve@example.com"), None);
        app.link(&task, &both);
        app.link(&task, &email_only);
        let id = schedule(
            &app,
            &task.id,
            "2025-03-10T09:00:00Z",
            &[Channel::Email, Channel::Sms],
            None,
        );

        let notifier = RecordingNotifier::default();
        let summary = dispatch_due(&app.db, &notifier, at("2025-03-10T09:00:30Z"))
            .await
            .expect("dispatch");
        assert_eq!(summary.reminders, 1);
        assert_eq!(summary.sent, 1);
        assert_eq!(summary.attempts, 3);

        let sent = notifier.sent.lock().expect("lock").clone();
        assert_eq!(sent.len(), 3);
        assert!(sent.iter().all(|(_, _, text)| text.contains("Task \"Ship report\" is due soon")));

        let reminder = &reminders_of(&app, &task.id)[0];
        assert_eq!(reminder.status, ReminderStatus::Sent);
        assert!(reminder.sent_at.is_some());
        assert_eq!(logs_of(&app, &id).len(), 3);
    }

    #[tokio::test]
    async fn future_and_deleted_task_reminders_wait() {
        let app = TestApp::new();
        let user = app.user("owner@example.com");
        let task = app.task(&user, "later", None);
        let gone = app.task(&user, "gone", None);
        schedule(&app, &task.id, "2025-03-11T09:00:00Z", &[Channel::Email], None);
        schedule(&app, &gone.id, "2025-03-10T09:00:00Z", &[Channel::Email], None);
        {
            let conn = app.db.conn();
            sq_execute(
                &conn,
                db::tasks::soft_delete(&gone.id, &user.user_id, &service::now_ts()),
            )
            .expect("delete task");
        }

        let summary = dispatch_due(&app.db, &RecordingNotifier::default(), at("2025-03-10T10:00:00Z"))
            .await
            .expect("dispatch");
        assert_eq!(summary, DispatchSummary::default());
        assert_eq!(reminders_of(&app, &task.id)[0].status, ReminderStatus::Pending);
    }

    #[tokio::test]
    async fn all_attempts_failing_marks_failed() {
        let app = TestApp::new();
        let user = app.user("owner@example.com");
        let task = app.task(&user, "t", None);
        let bob = app.stakeholder(&user, "Bob", Some("bob@example.com"), None);
        app.link(&task, &bob);
        let id = schedule(&app, &task.id, "2025-03-10T09:00:00Z", &[Channel::Email], None);

        let notifier = RecordingNotifier {
            fail: Some(Channel::Email),
            ..Default::default()
        };
        let summary = dispatch_due(&app.db, &notifier, at("2025-03-10T09:05:00Z"))
            .await
            .expect("dispatch");
        assert_eq!(summary.failed, 1);

        let reminder = &reminders_of(&app, &task.id)[0];
        assert_eq!(reminder.status, ReminderStatus::Failed);
        assert!(reminder.sent_at.is_none());
        let logs = logs_of(&app, &id);
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, DeliveryStatus::Failed);
        assert_eq!(logs[0].error.as_deref(), Some("fake rejected the message: boom"));
    }

    #[tokio::test]
    async fn reminder_without_recipients_is_sent() {
        let app = TestApp::new();
        let user = app.user("owner@example.com");
        let task = app.task(&user, "solo", None);
        schedule(&app, &task.id, "2025-03-10T09:00:00Z", &[Channel::Email], None);

        let summary = dispatch_due(&app.db, &RecordingNotifier::default(), at("2025-03-10T09:00:00Z"))
            .await
            .expect("dispatch");
        assert_eq!(summary.sent, 1);
        assert_eq!(summary.attempts, 0);
        assert_eq!(reminders_of(&app, &task.id)[0].status, ReminderStatus::Sent);
    }

    #[tokio::test]
    async fn recurring_reminders_schedule_the_next_occurrence() {
        let app = TestApp::new();
        let user = app.user("owner@example.com");
        let task = app.task(&user, "standup", None);
        schedule(
            &app,
            &task.id,
            "2025-01-31T09:00:00Z",
            &[Channel::Email],
            Some(RecurrencePattern::Monthly),
        );

        dispatch_due(&app.db, &RecordingNotifier::default(), at("2025-01-31T09:00:00Z"))
            .await
            .expect("dispatch");

        let reminders = reminders_of(&app, &task.id);
        assert_eq!(reminders.len(), 2);
        assert_eq!(reminders[0].status, ReminderStatus::Sent);
        assert_eq!(reminders[1].status, ReminderStatus::Pending);
        assert_eq!(reminders[1].scheduled_at, "2025-02-28T09:00:00Z");
        assert_eq!(reminders[1].recurring_pattern, Some(RecurrencePattern::Monthly));

        // The new occurrence is not due yet.
        let summary = dispatch_due(&app.db, &RecordingNotifier::default(), at("2025-02-01T09:00:00Z"))
            .await
            .expect("dispatch");
        assert_eq!(summary.reminders, 0);
    }

    #[tokio::test]
    async fn backlogged_recurring_reminder_sends_once() {
        let app = TestApp::new();
        let user = app.user("owner@example.com");
        let task = app.task(&user, "daily digest", None);
        let bob = app.stakeholder(&user, "Bob", Some("bob@example.com"), None);
        app.link(&task, &bob);
        schedule(
            &app,
            &task.id,
            "2025-01-01T09:00:00Z",
            &[Channel::Email],
            Some(RecurrencePattern::Daily),
        );

        let notifier = RecordingNotifier::default();
        let now = at("2025-01-31T12:00:00Z");
        for _ in 0..5 {
            dispatch_due(&app.db, &notifier, now).await.expect("dispatch");
        }
        assert_eq!(notifier.sent.lock().expect("lock").len(), 1);

        let reminders = reminders_of(&app, &task.id);
        assert_eq!(reminders.len(), 2);
        let next = reminders
            .iter()
            .find(|r| r.status == ReminderStatus::Pending)
            .expect("next occurrence");
        assert_eq!(next.scheduled_at, "2025-02-01T09:00:00Z");
        assert!(at(&next.scheduled_at) > now);
    }

    #[test]
    fn default_messages_name_the_task() {
        assert_eq!(
            default_message(ReminderType::TaskOverdue, "Pay rent"),
            "Task \"Pay rent\" is overdue"
        );
    }
}
