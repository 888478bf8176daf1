//! Demo account for local development (`TASKFLOW_SEED_DEMO=1`).

use anyhow::Context;
use chrono::{Duration, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use taskflow_api::{Channel, Priority, ReminderType, TaskStatus, crypto, db, service};

use crate::storage::{Db, sq_execute, sq_query_row};

pub const DEMO_EMAIL: &str = "demo@taskflowpro.com";
pub const DEMO_PASSWORD: &str = "Demo123!";

struct DemoContact {
    first_name: &'static str,
    last_name: &'static str,
    email: &'static str,
    phone: Option<&'static str>,
    organization: &'static str,
    tags: &'static [&'static str],
}

const CONTACTS: [DemoContact; 3] = [
    DemoContact {
        first_name: "John",
        last_name: "Smith",
        email: "john.smith@company.com",
        phone: Some("+1987654321"),
        organization: "Acme Corporation",
        tags: &["client", "vip"],
    },
    DemoContact {
        first_name: "Sarah",
        last_name: "Johnson",
        email: "sarah.johnson@partner.com",
        phone: Some("+1555123456"),
        organization: "Partner Solutions",
        tags: &["partner", "project-manager"],
    },
    DemoContact {
        first_name: "Mike",
        last_name: "Davis",
        email: "mike.davis@vendor.com",
        phone: None,
        organization: "Tech Vendor Inc",
        tags: &["vendor", "technical"],
    },
];

struct DemoTask {
    title: &'static str,
    description: &'static str,
    priority: Priority,
    status: TaskStatus,
    due_in_days: i64,
    /// (index into `CONTACTS`, role)
    links: &'static [(usize, &'static str)],
    voice_metadata: Option<&'static str>,
}

const TASKS: [DemoTask; 4] = [
    DemoTask {
        title: "Complete Q1 Project Proposal",
        description: "Finalize the project proposal document and send to all stakeholders for review",
        priority: Priority::High,
        status: TaskStatus::InProgress,
        due_in_days: 7,
        links: &[(0, "reviewer"), (1, "assignee")],
        voice_metadata: None,
    },
    DemoTask {
        title: "Schedule Team Meeting",
        description: "Organize a team meeting to discuss project timeline and deliverables",
        priority: Priority::Medium,
        status: TaskStatus::Pending,
        due_in_days: 3,
        links: &[(1, "attendee"), (2, "attendee")],
        voice_metadata: None,
    },
    DemoTask {
        title: "Review Technical Specifications",
        description: "Review and approve the technical specifications document",
        priority: Priority::High,
        status: TaskStatus::Completed,
        due_in_days: -2,
        links: &[(2, "reviewer")],
        voice_metadata: None,
    },
    DemoTask {
        title: "Prepare Monthly Report",
        description: "Compile and prepare the monthly progress report for management",
        priority: Priority::Low,
        status: TaskStatus::Pending,
        due_in_days: 14,
        links: &[],
        voice_metadata: Some(
            r#"{"original_transcript":"Create a low priority task to prepare monthly report due in two weeks","confidence":0.92,"language":"en-US","processing_time":1150}"#,
        ),
    },
];

/// Create the demo user with contacts, tasks, reminders and events.
/// Returns `false` when the demo user already exists.
pub fn seed_demo(db: &Db) -> anyhow::Result<bool> {
    // Hash before taking the lock.
    let (password_hash, password_salt) =
        crypto::hash_password(DEMO_PASSWORD).context("hashing demo password")?;

    let mut conn = db.conn();
    let exists: bool = sq_query_row(&conn, db::users::email_exists(DEMO_EMAIL), |row| row.get(0))
        .context("checking for demo user")?;
    if exists {
        tracing::debug!("demo user already present, skipping seed");
        return Ok(false);
    }

    let tx = conn.transaction().context("begin demo seed")?;
    let user_id = Uuid::new_v4().to_string();
    let now = Utc::now();
    let now_ts = service::format_ts(now);

    sq_execute(
        &tx,
        db::users::insert(&db::users::InsertParams {
            id: &user_id,
            email: DEMO_EMAIL,
            phone: Some("+1234567890"),
            first_name: "Demo",
            last_name: "User",
            password_hash: &password_hash,
            password_salt: &password_salt,
        }),
    )
    .context("insert demo user")?;
    sq_execute(&tx, db::users::set_email_verified(&user_id, &now_ts))?;
    sq_execute(&tx, db::users::set_phone_verified(&user_id, &now_ts))?;

    let mut contact_ids = Vec::with_capacity(CONTACTS.len());
    for contact in &CONTACTS {
        let id = Uuid::new_v4().to_string();
        let tags = serde_json::to_string(contact.tags)?;
        sq_execute(
            &tx,
            db::stakeholders::insert(&db::stakeholders::InsertParams {
                id: &id,
                user_id: &user_id,
                first_name: contact.first_name,
                last_name: contact.last_name,
                email: Some(contact.email),
                phone: contact.phone,
                organization: Some(contact.organization),
                tags: &tags,
                now: &now_ts,
            }),
        )
        .context("insert demo contact")?;
        contact_ids.push(id);
    }

    let mut task_ids = Vec::with_capacity(TASKS.len());
    for task in &TASKS {
        let id = Uuid::new_v4().to_string();
        let due = service::format_ts(now + Duration::days(task.due_in_days));
        insert_task(&tx, &user_id, &id, task, &due, &now_ts)?;
        for &(contact, role) in task.links {
            sq_execute(
                &tx,
                db::tasks::insert_link(&Uuid::new_v4().to_string(), &id, &contact_ids[contact], role),
            )
            .context("link demo contact")?;
        }
        task_ids.push((id, due));
    }

    for (task_idx, days, message) in [
        (0, 6, "Project proposal is due tomorrow!"),
        (1, 2, "Don't forget to schedule the team meeting"),
    ] {
        let at = service::format_ts(now + Duration::days(days));
        sq_execute(
            &tx,
            db::reminders::insert(&db::reminders::InsertParams {
                id: &Uuid::new_v4().to_string(),
                task_id: &task_ids[task_idx].0,
                reminder_type: ReminderType::TaskDue,
                scheduled_at: &at,
                message: Some(message),
                channels: &[Channel::Email],
                is_recurring: false,
                recurring_pattern: None,
                now: &now_ts,
            }),
        )
        .context("insert demo reminder")?;
    }

    let deadline = service::all_day_window(&task_ids[0].1)?;
    let standup_start = service::format_ts(now + Duration::days(1));
    let standup_end = service::format_ts(now + Duration::days(1) + Duration::hours(1));
    let events = [
        (
            Some(task_ids[0].0.as_str()),
            "Project Proposal Deadline",
            "Final deadline for Q1 project proposal submission",
            deadline.start.as_str(),
            deadline.end.as_str(),
            true,
            None,
        ),
        (
            None,
            "Weekly Standup",
            "Regular team standup meeting",
            standup_start.as_str(),
            standup_end.as_str(),
            false,
            Some("Conference Room A"),
        ),
    ];
    for (task_id, title, description, start_date, end_date, is_all_day, location) in events {
        sq_execute(
            &tx,
            db::calendar::insert(&db::calendar::InsertParams {
                id: &Uuid::new_v4().to_string(),
                user_id: &user_id,
                task_id,
                title,
                description: Some(description),
                start_date,
                end_date,
                is_all_day,
                location,
                now: &now_ts,
            }),
        )
        .context("insert demo event")?;
    }

    tx.commit().context("commit demo seed")?;
    tracing::info!("seeded demo account {DEMO_EMAIL} (password {DEMO_PASSWORD})");
    Ok(true)
}

fn insert_task(
    conn: &Connection,
    user_id: &str,
    id: &str,
    task: &DemoTask,
    due: &str,
    now: &str,
) -> anyhow::Result<()> {
    sq_execute(
        conn,
        db::tasks::insert(&db::tasks::InsertParams {
            id,
            user_id,
            title: task.title,
            description: Some(task.description),
            priority: task.priority,
            due_date: Some(due),
            is_voice_created: task.voice_metadata.is_some(),
            voice_metadata: task.voice_metadata,
            now,
        }),
    )
    .context("insert demo task")?;
    if task.status != TaskStatus::Pending {
        let patch = db::tasks::TaskPatch {
            status: Some(task.status),
            completed_at: Some(service::completed_at_for(task.status, now)),
            ..Default::default()
        };
        sq_execute(conn, db::tasks::update(id, user_id, &patch, now))
            .context("set demo task status")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::init_in_memory;

    #[test]
    fn seeding_is_idempotent() {
        let db = init_in_memory().expect("db");
        assert!(seed_demo(&db).expect("first seed"));
        assert!(!seed_demo(&db).expect("second seed"));

        let conn = db.conn();
        let (user_id, _): (String, String) = sq_query_row(
            &conn,
            db::users::get_active_by_email(DEMO_EMAIL),
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .expect("demo user");
        let (total, completed, _, contacts): (i64, i64, i64, i64) =
            sq_query_row(&conn, db::users::stats(&user_id), |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })
            .expect("stats");
        assert_eq!(total, 4);
        assert_eq!(completed, 1);
        assert_eq!(contacts, 3);
    }
}
