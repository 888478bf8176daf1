use anyhow::{Context, Result};
use rusqlite::types::{Type, Value as SqlValue};
use rusqlite::{Connection, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};

use taskflow_api::db::Built;
use taskflow_api::db::migrations::MIGRATIONS;
use taskflow_api::db::reminders::REMINDER_COLUMNS;
use taskflow_api::db::stakeholders::STAKEHOLDER_COLUMNS;
use taskflow_api::db::tasks::LINK_COLUMNS;
use taskflow_api::{
    CalendarEvent, CalendarEventWithTask, Channel, DeliveryStatus, Priority, RecurrencePattern,
    Reminder, ReminderLog, ReminderStatus, ReminderType, Stakeholder, StakeholderSummary, Task,
    TaskStakeholder, TaskStatus, TaskSummary, UserProfile,
};

/// Shared database state
#[derive(Clone)]
pub struct Db {
    conn: Arc<Mutex<Connection>>,
}

impl Db {
    pub fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    /// Round-trip a trivial query. Used by the health check.
    pub fn ping(&self) -> rusqlite::Result<()> {
        self.conn().query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }
}

/// Initialize the database: open connection, enable WAL, run migrations
pub fn init_db(data_dir: &Path) -> Result<Db> {
    std::fs::create_dir_all(data_dir)?;
    let db_path = data_dir.join("taskflow.db");
    let conn = Connection::open(&db_path).context("opening SQLite database")?;

    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;

    run_migrations(&conn)?;

    Ok(Db {
        conn: Arc::new(Mutex::new(conn)),
    })
}

/// Fresh migrated database that lives only as long as the returned handle.
#[cfg(test)]
pub fn init_in_memory() -> Result<Db> {
    let conn = Connection::open_in_memory().context("opening in-memory database")?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;
    run_migrations(&conn)?;
    Ok(Db {
        conn: Arc::new(Mutex::new(conn)),
    })
}

fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    for (name, sql) in MIGRATIONS {
        let already_applied: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM _migrations WHERE name = ?1",
                [name],
                |row| row.get(0),
            )
            .unwrap_or(false);

        if !already_applied {
            conn.execute_batch(sql)
                .with_context(|| format!("running migration {name}"))?;
            conn.execute("INSERT INTO _migrations (name) VALUES (?1)", [name])?;
            tracing::info!("Applied migration: {name}");
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// sea-query execution
// ---------------------------------------------------------------------------

fn bind_values(values: &sea_query::Values) -> Vec<SqlValue> {
    values
        .0
        .iter()
        .map(|v| match v {
            sea_query::Value::Bool(Some(b)) => SqlValue::Integer(i64::from(*b)),
            sea_query::Value::TinyInt(Some(i)) => SqlValue::Integer(i64::from(*i)),
            sea_query::Value::SmallInt(Some(i)) => SqlValue::Integer(i64::from(*i)),
            sea_query::Value::Int(Some(i)) => SqlValue::Integer(i64::from(*i)),
            sea_query::Value::BigInt(Some(i)) => SqlValue::Integer(*i),
            sea_query::Value::TinyUnsigned(Some(i)) => SqlValue::Integer(i64::from(*i)),
            sea_query::Value::SmallUnsigned(Some(i)) => SqlValue::Integer(i64::from(*i)),
            sea_query::Value::Unsigned(Some(i)) => SqlValue::Integer(i64::from(*i)),
            sea_query::Value::BigUnsigned(Some(i)) => {
                SqlValue::Integer(i64::try_from(*i).unwrap_or(i64::MAX))
            }
            sea_query::Value::Float(Some(f)) => SqlValue::Real(f64::from(*f)),
            sea_query::Value::Double(Some(f)) => SqlValue::Real(*f),
            sea_query::Value::String(Some(s)) => SqlValue::Text(s.as_ref().clone()),
            sea_query::Value::Char(Some(c)) => SqlValue::Text(c.to_string()),
            sea_query::Value::Bytes(Some(b)) => SqlValue::Blob(b.as_ref().clone()),
            _ => SqlValue::Null,
        })
        .collect()
}

/// Execute a built statement, returning the number of affected rows.
pub fn sq_execute(conn: &Connection, (sql, values): Built) -> rusqlite::Result<usize> {
    conn.execute(&sql, rusqlite::params_from_iter(bind_values(&values)))
}

pub fn sq_query_row<T, F>(conn: &Connection, (sql, values): Built, f: F) -> rusqlite::Result<T>
where
    F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
{
    conn.query_row(&sql, rusqlite::params_from_iter(bind_values(&values)), f)
}

pub fn sq_query_map<T, F>(conn: &Connection, (sql, values): Built, f: F) -> rusqlite::Result<Vec<T>>
where
    F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
{
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(bind_values(&values)), f)?;
    rows.collect()
}

/// True when a write failed on a UNIQUE / constraint check.
pub fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

// ---------------------------------------------------------------------------
// Row mappers
// ---------------------------------------------------------------------------

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, msg.into())
}

fn enum_at<T>(row: &Row<'_>, idx: usize, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    parse(&raw).ok_or_else(|| conversion_error(idx, format!("unexpected enum value '{raw}'")))
}

fn opt_enum_at<T>(
    row: &Row<'_>,
    idx: usize,
    parse: fn(&str) -> Option<T>,
) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|raw| {
        parse(&raw).ok_or_else(|| conversion_error(idx, format!("unexpected enum value '{raw}'")))
    })
    .transpose()
}

fn json_at<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, e.to_string()))
}

fn opt_json_at<T: serde::de::DeserializeOwned>(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|raw| serde_json::from_str(&raw).map_err(|e| conversion_error(idx, e.to_string())))
        .transpose()
}

/// Map a profile row (see `db::users::get_active`).
pub fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserProfile> {
    Ok(UserProfile {
        id: row.get(0)?,
        email: row.get(1)?,
        phone: row.get(2)?,
        first_name: row.get(3)?,
        last_name: row.get(4)?,
        is_email_verified: row.get(5)?,
        is_phone_verified: row.get(6)?,
        is_active: row.get(7)?,
        last_login_at: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

pub fn task_at(row: &Row<'_>, o: usize) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(o)?,
        user_id: row.get(o + 1)?,
        title: row.get(o + 2)?,
        description: row.get(o + 3)?,
        priority: enum_at(row, o + 4, Priority::parse)?,
        status: enum_at(row, o + 5, TaskStatus::parse)?,
        due_date: row.get(o + 6)?,
        completed_at: row.get(o + 7)?,
        is_voice_created: row.get(o + 8)?,
        voice_metadata: opt_json_at(row, o + 9)?,
        created_at: row.get(o + 10)?,
        updated_at: row.get(o + 11)?,
    })
}

pub fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    task_at(row, 0)
}

/// Task summary columns (id, title, status, priority, due_date) at `o`.
pub fn task_summary_at(row: &Row<'_>, o: usize) -> rusqlite::Result<TaskSummary> {
    Ok(TaskSummary {
        id: row.get(o)?,
        title: row.get(o + 1)?,
        status: enum_at(row, o + 2, TaskStatus::parse)?,
        priority: enum_at(row, o + 3, Priority::parse)?,
        due_date: row.get(o + 4)?,
    })
}

pub fn stakeholder_at(row: &Row<'_>, o: usize) -> rusqlite::Result<Stakeholder> {
    Ok(Stakeholder {
        id: row.get(o)?,
        user_id: row.get(o + 1)?,
        first_name: row.get(o + 2)?,
        last_name: row.get(o + 3)?,
        email: row.get(o + 4)?,
        phone: row.get(o + 5)?,
        organization: row.get(o + 6)?,
        tags: json_at(row, o + 7)?,
        is_active: row.get(o + 8)?,
        created_at: row.get(o + 9)?,
        updated_at: row.get(o + 10)?,
    })
}

pub fn stakeholder_from_row(row: &Row<'_>) -> rusqlite::Result<Stakeholder> {
    stakeholder_at(row, 0)
}

/// Listing row: stakeholder columns followed by `task_count`.
pub fn stakeholder_summary_from_row(row: &Row<'_>) -> rusqlite::Result<StakeholderSummary> {
    Ok(StakeholderSummary {
        stakeholder: stakeholder_at(row, 0)?,
        task_count: row.get(STAKEHOLDER_COLUMNS)?,
    })
}

/// Join row followed by the stakeholder (see `db::tasks::links_for_tasks`).
pub fn task_link_from_row(row: &Row<'_>) -> rusqlite::Result<TaskStakeholder> {
    Ok(TaskStakeholder {
        id: row.get(0)?,
        task_id: row.get(1)?,
        stakeholder_id: row.get(2)?,
        role: row.get(3)?,
        created_at: row.get(4)?,
        stakeholder: stakeholder_at(row, LINK_COLUMNS)?,
    })
}

pub fn reminder_at(row: &Row<'_>, o: usize) -> rusqlite::Result<Reminder> {
    Ok(Reminder {
        id: row.get(o)?,
        task_id: row.get(o + 1)?,
        reminder_type: enum_at(row, o + 2, ReminderType::parse)?,
        status: enum_at(row, o + 3, ReminderStatus::parse)?,
        scheduled_at: row.get(o + 4)?,
        message: row.get(o + 5)?,
        channels: json_at::<Vec<Channel>>(row, o + 6)?,
        is_recurring: row.get(o + 7)?,
        recurring_pattern: opt_enum_at(row, o + 8, RecurrencePattern::parse)?,
        sent_at: row.get(o + 9)?,
        created_at: row.get(o + 10)?,
        updated_at: row.get(o + 11)?,
    })
}

pub fn reminder_from_row(row: &Row<'_>) -> rusqlite::Result<Reminder> {
    reminder_at(row, 0)
}

/// Reminder columns followed by the task summary.
pub fn reminder_with_task_from_row(row: &Row<'_>) -> rusqlite::Result<(Reminder, TaskSummary)> {
    Ok((
        reminder_at(row, 0)?,
        task_summary_at(row, REMINDER_COLUMNS)?,
    ))
}

pub fn log_from_row(row: &Row<'_>) -> rusqlite::Result<ReminderLog> {
    Ok(ReminderLog {
        id: row.get(0)?,
        reminder_id: row.get(1)?,
        stakeholder_id: row.get(2)?,
        channel: enum_at(row, 3, Channel::parse)?,
        status: enum_at(row, 4, DeliveryStatus::parse)?,
        error: row.get(5)?,
        created_at: row.get(6)?,
    })
}

pub fn event_from_row(row: &Row<'_>) -> rusqlite::Result<CalendarEvent> {
    Ok(CalendarEvent {
        id: row.get(0)?,
        user_id: row.get(1)?,
        task_id: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        start_date: row.get(5)?,
        end_date: row.get(6)?,
        is_all_day: row.get(7)?,
        location: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

/// Event columns followed by the (LEFT JOINed) live task summary.
pub fn event_with_task_from_row(row: &Row<'_>) -> rusqlite::Result<CalendarEventWithTask> {
    let event = event_from_row(row)?;
    let task_id: Option<String> = row.get(taskflow_api::db::calendar::EVENT_COLUMNS)?;
    let task = match task_id {
        Some(_) => Some(task_summary_at(row, taskflow_api::db::calendar::EVENT_COLUMNS)?),
        None => None,
    };
    Ok(CalendarEventWithTask { event, task })
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskflow_api::db;

    #[test]
    fn migrations_are_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        init_db(dir.path()).expect("first open");
        let db = init_db(dir.path()).expect("second open");
        let conn = db.conn();
        let applied: i64 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |row| row.get(0))
            .expect("count migrations");
        assert_eq!(applied, MIGRATIONS.len() as i64);
    }

    #[test]
    fn built_statements_bind_and_map() {
        let db = init_in_memory().expect("db");
        let conn = db.conn();
        sq_execute(
            &conn,
            db::users::insert(&db::users::InsertParams {
                id: "u1",
                email: "ada@example.com",
                phone: None,
                first_name: "Ada",
                last_name: "Lovelace",
                password_hash: "h",
                password_salt: "s",
            }),
        )
        .expect("insert user");

        let profile = sq_query_row(&conn, db::users::get_active("u1"), user_from_row)
            .expect("profile");
        assert_eq!(profile.email, "ada@example.com");
        assert!(profile.is_active);
        assert!(!profile.is_email_verified);

        let exists: bool = sq_query_row(&conn, db::users::email_exists("ada@example.com"), |r| {
            r.get(0)
        })
        .expect("exists");
        assert!(exists);
    }

    #[test]
    fn duplicate_email_is_a_constraint_violation() {
        let db = init_in_memory().expect("db");
        let conn = db.conn();
        let params = db::users::InsertParams {
            id: "u1",
            email: "dup@example.com",
            phone: None,
            first_name: "A",
            last_name: "B",
            password_hash: "h",
            password_salt: "s",
        };
        sq_execute(&conn, db::users::insert(&params)).expect("first insert");
        let err = sq_execute(
            &conn,
            db::users::insert(&db::users::InsertParams { id: "u2", ..params }),
        )
        .expect_err("second insert must fail");
        assert!(is_constraint_violation(&err));
    }
}
