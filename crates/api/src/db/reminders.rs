//! Reminder and reminder-log query builders.
//!
//! Reminders are owned through their task: every user-facing query joins
//! `tasks` and filters by owner and `is_deleted = 0`.

use sea_query::{
    Alias, Asterisk, Expr, Func, JoinType, Order, Query, SelectStatement, SimpleExpr,
    SqliteQueryBuilder,
};

use super::tables::{ReminderLogs, Reminders, Tasks};
use super::{Built, BuiltListQuery};
use crate::service::ReminderSort;
use crate::{
    Channel, DeliveryStatus, RecurrencePattern, ReminderStatus, ReminderType, page_window,
};

/// Number of columns emitted by [`reminder_columns`].
pub const REMINDER_COLUMNS: usize = 12;

/// Number of task summary columns following the reminder columns.
pub const TASK_SUMMARY_COLUMNS: usize = 5;

// ── Helpers ────────────────────────────────────────────────────────────────

/// Reminder columns in `Reminder` field order:
/// id, task_id, type, status, scheduled_at, message, channels,
/// is_recurring, recurring_pattern, sent_at, created_at, updated_at.
fn reminder_columns(q: &mut SelectStatement) -> &mut SelectStatement {
    q.column((Reminders::Table, Reminders::Id))
        .column((Reminders::Table, Reminders::TaskId))
        .column((Reminders::Table, Reminders::Type))
        .column((Reminders::Table, Reminders::Status))
        .column((Reminders::Table, Reminders::ScheduledAt))
        .column((Reminders::Table, Reminders::Message))
        .column((Reminders::Table, Reminders::Channels))
        .column((Reminders::Table, Reminders::IsRecurring))
        .column((Reminders::Table, Reminders::RecurringPattern))
        .column((Reminders::Table, Reminders::SentAt))
        .column((Reminders::Table, Reminders::CreatedAt))
        .column((Reminders::Table, Reminders::UpdatedAt))
}

/// Task summary: id, title, status, priority, due_date.
fn task_summary_columns(q: &mut SelectStatement) -> &mut SelectStatement {
    q.column((Tasks::Table, Tasks::Id))
        .column((Tasks::Table, Tasks::Title))
        .column((Tasks::Table, Tasks::Status))
        .column((Tasks::Table, Tasks::Priority))
        .column((Tasks::Table, Tasks::DueDate))
}

/// Log columns in `ReminderLog` field order:
/// id, reminder_id, stakeholder_id, channel, status, error, created_at.
fn log_columns(q: &mut SelectStatement) -> &mut SelectStatement {
    q.column((ReminderLogs::Table, ReminderLogs::Id))
        .column((ReminderLogs::Table, ReminderLogs::ReminderId))
        .column((ReminderLogs::Table, ReminderLogs::StakeholderId))
        .column((ReminderLogs::Table, ReminderLogs::Channel))
        .column((ReminderLogs::Table, ReminderLogs::Status))
        .column((ReminderLogs::Table, ReminderLogs::Error))
        .column((ReminderLogs::Table, ReminderLogs::CreatedAt))
}

fn join_live_task(q: &mut SelectStatement) -> &mut SelectStatement {
    q.join(
        JoinType::InnerJoin,
        Tasks::Table,
        Expr::col((Tasks::Table, Tasks::Id)).equals((Reminders::Table, Reminders::TaskId)),
    )
    .and_where(Expr::col((Tasks::Table, Tasks::IsDeleted)).eq(false))
}

/// Reminder + task summary columns over the reminders ⋈ live tasks join.
fn select_with_task() -> SelectStatement {
    let mut q = Query::select();
    reminder_columns(&mut q);
    task_summary_columns(&mut q).from(Reminders::Table);
    join_live_task(&mut q);
    q
}

fn owned_by(user_id: &str) -> SimpleExpr {
    Expr::col((Tasks::Table, Tasks::UserId)).eq(user_id)
}

/// JSON array text for a channel list.
pub fn channels_json(channels: &[Channel]) -> String {
    let names: Vec<&str> = channels.iter().map(Channel::as_str).collect();
    serde_json::to_string(&names).unwrap_or_else(|_| "[\"EMAIL\"]".to_string())
}

// ── Reminders ──────────────────────────────────────────────────────────────

pub struct InsertParams<'a> {
    pub id: &'a str,
    pub task_id: &'a str,
    pub reminder_type: ReminderType,
    pub scheduled_at: &'a str,
    pub message: Option<&'a str>,
    pub channels: &'a [Channel],
    pub is_recurring: bool,
    pub recurring_pattern: Option<RecurrencePattern>,
    pub now: &'a str,
}

pub fn insert(p: &InsertParams<'_>) -> Built {
    Query::insert()
        .into_table(Reminders::Table)
        .columns([
            Reminders::Id,
            Reminders::TaskId,
            Reminders::Type,
            Reminders::Status,
            Reminders::ScheduledAt,
            Reminders::Message,
            Reminders::Channels,
            Reminders::IsRecurring,
            Reminders::RecurringPattern,
            Reminders::CreatedAt,
            Reminders::UpdatedAt,
        ])
        .values_panic([
            p.id.into(),
            p.task_id.into(),
            p.reminder_type.as_str().into(),
            ReminderStatus::Pending.as_str().into(),
            p.scheduled_at.into(),
            p.message.map(str::to_string).into(),
            channels_json(p.channels).into(),
            p.is_recurring.into(),
            p.recurring_pattern.map(|r| r.as_str().to_string()).into(),
            p.now.into(),
            p.now.into(),
        ])
        .build(SqliteQueryBuilder)
}

/// Reminder + task summary, if the reminder's live task belongs to `user_id`.
pub fn get(id: &str, user_id: &str) -> Built {
    select_with_task()
        .and_where(owned_by(user_id))
        .and_where(Expr::col((Reminders::Table, Reminders::Id)).eq(id))
        .build(SqliteQueryBuilder)
}

#[derive(Debug, Default)]
pub struct ListFilter<'a> {
    pub status: Option<ReminderStatus>,
    pub reminder_type: Option<ReminderType>,
    pub task_id: Option<&'a str>,
    pub sort: ReminderSort,
    pub ascending: bool,
    pub page: u32,
    pub limit: u32,
}

/// Paginated listing of reminder + task summary rows.
pub fn list(user_id: &str, f: &ListFilter<'_>) -> BuiltListQuery {
    let (page, limit, offset) = page_window(f.page, f.limit);

    let mut count_q = Query::select()
        .expr_as(Func::count(Expr::col(Asterisk)), Alias::new("count"))
        .from(Reminders::Table)
        .to_owned();
    join_live_task(&mut count_q);
    let mut select_q = select_with_task();

    let mut conds = vec![owned_by(user_id)];
    if let Some(status) = f.status {
        conds.push(Expr::col((Reminders::Table, Reminders::Status)).eq(status.as_str()));
    }
    if let Some(kind) = f.reminder_type {
        conds.push(Expr::col((Reminders::Table, Reminders::Type)).eq(kind.as_str()));
    }
    if let Some(task_id) = f.task_id {
        conds.push(Expr::col((Reminders::Table, Reminders::TaskId)).eq(task_id));
    }
    for cond in conds {
        count_q.and_where(cond.clone());
        select_q.and_where(cond);
    }

    let col = match f.sort {
        ReminderSort::ScheduledAt => Reminders::ScheduledAt,
        ReminderSort::CreatedAt => Reminders::CreatedAt,
        ReminderSort::UpdatedAt => Reminders::UpdatedAt,
        ReminderSort::Type => Reminders::Type,
        ReminderSort::Status => Reminders::Status,
    };
    let order = if f.ascending { Order::Asc } else { Order::Desc };
    select_q
        .order_by((Reminders::Table, col), order)
        .order_by((Reminders::Table, Reminders::Id), Order::Asc)
        .limit(u64::from(limit))
        .offset(offset);

    BuiltListQuery {
        count_query: count_q.build(SqliteQueryBuilder),
        select_query: select_q.build(SqliteQueryBuilder),
        page,
        limit,
    }
}

/// PENDING reminders of a user scheduled at or before `until`, soonest first.
pub fn pending_until(user_id: &str, until: &str) -> Built {
    select_with_task()
        .and_where(owned_by(user_id))
        .and_where(Expr::col((Reminders::Table, Reminders::Status)).eq(ReminderStatus::Pending.as_str()))
        .and_where(Expr::col((Reminders::Table, Reminders::ScheduledAt)).lte(until))
        .order_by((Reminders::Table, Reminders::ScheduledAt), Order::Asc)
        .build(SqliteQueryBuilder)
}

/// `status, COUNT(*)` of a user's reminders on live tasks.
pub fn count_by_status(user_id: &str) -> Built {
    let mut q = Query::select();
    q.column((Reminders::Table, Reminders::Status))
        .expr(Func::count(Expr::col(Asterisk)))
        .from(Reminders::Table);
    join_live_task(&mut q)
        .and_where(owned_by(user_id))
        .group_by_col((Reminders::Table, Reminders::Status));
    q.build(SqliteQueryBuilder)
}

/// Reminders of one task, by schedule.
pub fn for_task(task_id: &str) -> Built {
    let mut q = Query::select();
    reminder_columns(&mut q)
        .from(Reminders::Table)
        .and_where(Expr::col((Reminders::Table, Reminders::TaskId)).eq(task_id))
        .order_by((Reminders::Table, Reminders::ScheduledAt), Order::Asc);
    q.build(SqliteQueryBuilder)
}

/// PENDING reminders due at `now` on live tasks, across all users.
/// Rows carry the task summary plus the task's description and owner id.
pub fn due(now: &str, batch: u64) -> Built {
    let mut q = select_with_task();
    q.column((Tasks::Table, Tasks::Description))
        .column((Tasks::Table, Tasks::UserId))
        .and_where(Expr::col((Reminders::Table, Reminders::Status)).eq(ReminderStatus::Pending.as_str()))
        .and_where(Expr::col((Reminders::Table, Reminders::ScheduledAt)).lte(now))
        .order_by((Reminders::Table, Reminders::ScheduledAt), Order::Asc)
        .limit(batch);
    q.build(SqliteQueryBuilder)
}

#[derive(Debug, Default)]
pub struct ReminderPatch {
    pub reminder_type: Option<ReminderType>,
    pub scheduled_at: Option<String>,
    pub message: Option<Option<String>>,
    pub channels: Option<Vec<Channel>>,
    pub is_recurring: Option<bool>,
    pub recurring_pattern: Option<Option<RecurrencePattern>>,
}

/// Update a PENDING reminder. Ownership is checked by the caller.
pub fn update(id: &str, patch: &ReminderPatch, now: &str) -> Built {
    let mut q = Query::update();
    q.table(Reminders::Table).value(Reminders::UpdatedAt, now);
    if let Some(kind) = patch.reminder_type {
        q.value(Reminders::Type, kind.as_str());
    }
    if let Some(at) = &patch.scheduled_at {
        q.value(Reminders::ScheduledAt, at.as_str());
    }
    if let Some(message) = &patch.message {
        q.value(Reminders::Message, message.clone());
    }
    if let Some(channels) = &patch.channels {
        q.value(Reminders::Channels, channels_json(channels));
    }
    if let Some(is_recurring) = patch.is_recurring {
        q.value(Reminders::IsRecurring, is_recurring);
    }
    if let Some(pattern) = patch.recurring_pattern {
        q.value(
            Reminders::RecurringPattern,
            pattern.map(|p| p.as_str().to_string()),
        );
    }
    q.and_where(Expr::col(Reminders::Id).eq(id))
        .and_where(Expr::col(Reminders::Status).eq(ReminderStatus::Pending.as_str()))
        .build(SqliteQueryBuilder)
}

/// Record the outcome of a delivery run or a cancellation.
pub fn set_status(id: &str, status: ReminderStatus, sent_at: Option<&str>, now: &str) -> Built {
    let mut q = Query::update();
    q.table(Reminders::Table)
        .value(Reminders::Status, status.as_str())
        .value(Reminders::UpdatedAt, now);
    if let Some(sent_at) = sent_at {
        q.value(Reminders::SentAt, sent_at);
    }
    q.and_where(Expr::col(Reminders::Id).eq(id))
        .build(SqliteQueryBuilder)
}

// ── Logs ───────────────────────────────────────────────────────────────────

pub fn insert_log(
    id: &str,
    reminder_id: &str,
    stakeholder_id: Option<&str>,
    channel: Channel,
    status: DeliveryStatus,
    error: Option<&str>,
    now: &str,
) -> Built {
    Query::insert()
        .into_table(ReminderLogs::Table)
        .columns([
            ReminderLogs::Id,
            ReminderLogs::ReminderId,
            ReminderLogs::StakeholderId,
            ReminderLogs::Channel,
            ReminderLogs::Status,
            ReminderLogs::Error,
            ReminderLogs::CreatedAt,
        ])
        .values_panic([
            id.into(),
            reminder_id.into(),
            stakeholder_id.map(str::to_string).into(),
            channel.as_str().into(),
            status.as_str().into(),
            error.map(str::to_string).into(),
            now.into(),
        ])
        .build(SqliteQueryBuilder)
}

/// Logs of the given reminders, newest first.
pub fn logs_for_reminders(reminder_ids: &[String]) -> Built {
    let mut q = Query::select();
    log_columns(&mut q)
        .from(ReminderLogs::Table)
        .and_where(
            Expr::col((ReminderLogs::Table, ReminderLogs::ReminderId))
                .is_in(reminder_ids.iter().map(String::as_str)),
        )
        .order_by((ReminderLogs::Table, ReminderLogs::CreatedAt), Order::Desc)
        .order_by((ReminderLogs::Table, ReminderLogs::Id), Order::Desc);
    q.build(SqliteQueryBuilder)
}

/// Most recent delivery attempts to one stakeholder, on the owner's live tasks.
pub fn logs_for_stakeholder(stakeholder_id: &str, user_id: &str, limit: u64) -> Built {
    let mut q = Query::select();
    log_columns(&mut q)
        .from(ReminderLogs::Table)
        .join(
            JoinType::InnerJoin,
            Reminders::Table,
            Expr::col((Reminders::Table, Reminders::Id))
                .equals((ReminderLogs::Table, ReminderLogs::ReminderId)),
        );
    join_live_task(&mut q)
        .and_where(owned_by(user_id))
        .and_where(Expr::col((ReminderLogs::Table, ReminderLogs::StakeholderId)).eq(stakeholder_id))
        .order_by((ReminderLogs::Table, ReminderLogs::CreatedAt), Order::Desc)
        .order_by((ReminderLogs::Table, ReminderLogs::Id), Order::Desc)
        .limit(limit);
    q.build(SqliteQueryBuilder)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channels_serialize_as_json_array() {
        assert_eq!(
            channels_json(&[Channel::Email, Channel::Whatsapp]),
            r#"["EMAIL","WHATSAPP"]"#
        );
    }

    #[test]
    fn listing_is_scoped_through_the_task() {
        let filter = ListFilter {
            status: Some(ReminderStatus::Pending),
            ascending: true,
            page: 1,
            limit: 10,
            ..Default::default()
        };
        let built = list("u1", &filter);
        for (sql, _) in [&built.count_query, &built.select_query] {
            assert!(sql.contains(r#"INNER JOIN "tasks""#));
            assert!(sql.contains(r#""tasks"."user_id" = ?"#));
            assert!(sql.contains(r#""tasks"."is_deleted" = ?"#));
        }
        assert!(built.select_query.0.contains(r#"ORDER BY "reminders"."scheduled_at" ASC"#));
    }

    #[test]
    fn update_is_guarded_by_pending_status() {
        let patch = ReminderPatch {
            message: Some(None),
            ..Default::default()
        };
        let (sql, values) = update("r1", &patch, "2025-01-01T00:00:00Z");
        assert!(sql.contains(r#""message" = ?"#));
        assert!(sql.contains(r#""status" = ?"#));
        assert!(values.0.contains(&"PENDING".into()));
    }

    #[test]
    fn due_batch_spans_all_users() {
        let (sql, _) = due("2025-01-01T00:00:00Z", 50);
        assert!(!sql.contains(r#""tasks"."user_id" = ?"#));
        assert!(sql.contains(r#""reminders"."scheduled_at" <= ?"#));
    }
}
