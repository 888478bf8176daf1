//! Calendar event query builders.

use sea_query::{Expr, JoinType, Order, Query, SelectStatement, SqliteQueryBuilder};

use super::Built;
use super::tables::{CalendarEvents, Tasks};

/// Number of columns emitted by [`event_columns`].
pub const EVENT_COLUMNS: usize = 11;

/// Event columns in `CalendarEvent` field order:
/// id, user_id, task_id, title, description, start_date, end_date,
/// is_all_day, location, created_at, updated_at.
fn event_columns(q: &mut SelectStatement) -> &mut SelectStatement {
    q.column((CalendarEvents::Table, CalendarEvents::Id))
        .column((CalendarEvents::Table, CalendarEvents::UserId))
        .column((CalendarEvents::Table, CalendarEvents::TaskId))
        .column((CalendarEvents::Table, CalendarEvents::Title))
        .column((CalendarEvents::Table, CalendarEvents::Description))
        .column((CalendarEvents::Table, CalendarEvents::StartDate))
        .column((CalendarEvents::Table, CalendarEvents::EndDate))
        .column((CalendarEvents::Table, CalendarEvents::IsAllDay))
        .column((CalendarEvents::Table, CalendarEvents::Location))
        .column((CalendarEvents::Table, CalendarEvents::CreatedAt))
        .column((CalendarEvents::Table, CalendarEvents::UpdatedAt))
}

/// Event columns followed by the linked live task's summary
/// (id, title, status, priority, due_date), all NULL when unlinked.
fn select_with_task(user_id: &str) -> SelectStatement {
    let mut q = Query::select();
    event_columns(&mut q)
        .column((Tasks::Table, Tasks::Id))
        .column((Tasks::Table, Tasks::Title))
        .column((Tasks::Table, Tasks::Status))
        .column((Tasks::Table, Tasks::Priority))
        .column((Tasks::Table, Tasks::DueDate))
        .from(CalendarEvents::Table)
        .join(
            JoinType::LeftJoin,
            Tasks::Table,
            Expr::col((Tasks::Table, Tasks::Id))
                .equals((CalendarEvents::Table, CalendarEvents::TaskId))
                .and(Expr::col((Tasks::Table, Tasks::IsDeleted)).eq(false)),
        )
        .and_where(Expr::col((CalendarEvents::Table, CalendarEvents::UserId)).eq(user_id));
    q
}

pub struct InsertParams<'a> {
    pub id: &'a str,
    pub user_id: &'a str,
    pub task_id: Option<&'a str>,
    pub title: &'a str,
    pub description: Option<&'a str>,
    pub start_date: &'a str,
    pub end_date: &'a str,
    pub is_all_day: bool,
    pub location: Option<&'a str>,
    pub now: &'a str,
}

pub fn insert(p: &InsertParams<'_>) -> Built {
    Query::insert()
        .into_table(CalendarEvents::Table)
        .columns([
            CalendarEvents::Id,
            CalendarEvents::UserId,
            CalendarEvents::TaskId,
            CalendarEvents::Title,
            CalendarEvents::Description,
            CalendarEvents::StartDate,
            CalendarEvents::EndDate,
            CalendarEvents::IsAllDay,
            CalendarEvents::Location,
            CalendarEvents::CreatedAt,
            CalendarEvents::UpdatedAt,
        ])
        .values_panic([
            p.id.into(),
            p.user_id.into(),
            p.task_id.map(str::to_string).into(),
            p.title.into(),
            p.description.map(str::to_string).into(),
            p.start_date.into(),
            p.end_date.into(),
            p.is_all_day.into(),
            p.location.map(str::to_string).into(),
            p.now.into(),
            p.now.into(),
        ])
        .build(SqliteQueryBuilder)
}

pub fn get(id: &str, user_id: &str) -> Built {
    select_with_task(user_id)
        .and_where(Expr::col((CalendarEvents::Table, CalendarEvents::Id)).eq(id))
        .build(SqliteQueryBuilder)
}

/// Events overlapping `[start, end]` (either bound optional), by start date.
pub fn overlapping(
    user_id: &str,
    start: Option<&str>,
    end: Option<&str>,
    task_id: Option<&str>,
) -> Built {
    let mut q = select_with_task(user_id);
    if let Some(end) = end {
        q.and_where(Expr::col((CalendarEvents::Table, CalendarEvents::StartDate)).lte(end));
    }
    if let Some(start) = start {
        q.and_where(Expr::col((CalendarEvents::Table, CalendarEvents::EndDate)).gte(start));
    }
    if let Some(task_id) = task_id {
        q.and_where(Expr::col((CalendarEvents::Table, CalendarEvents::TaskId)).eq(task_id));
    }
    q.order_by((CalendarEvents::Table, CalendarEvents::StartDate), Order::Asc)
        .order_by((CalendarEvents::Table, CalendarEvents::Id), Order::Asc)
        .build(SqliteQueryBuilder)
}

/// Plain events linked to a task.
pub fn for_task(task_id: &str, user_id: &str) -> Built {
    let mut q = Query::select();
    event_columns(&mut q)
        .from(CalendarEvents::Table)
        .and_where(Expr::col((CalendarEvents::Table, CalendarEvents::TaskId)).eq(task_id))
        .and_where(Expr::col((CalendarEvents::Table, CalendarEvents::UserId)).eq(user_id))
        .order_by((CalendarEvents::Table, CalendarEvents::StartDate), Order::Asc);
    q.build(SqliteQueryBuilder)
}

/// The all-day event mirroring a task, if one was synced before.
pub fn find_task_mirror(task_id: &str, user_id: &str) -> Built {
    Query::select()
        .column(CalendarEvents::Id)
        .from(CalendarEvents::Table)
        .and_where(Expr::col(CalendarEvents::TaskId).eq(task_id))
        .and_where(Expr::col(CalendarEvents::UserId).eq(user_id))
        .and_where(Expr::col(CalendarEvents::IsAllDay).eq(true))
        .order_by(CalendarEvents::CreatedAt, Order::Asc)
        .limit(1)
        .build(SqliteQueryBuilder)
}

/// Partial update. Inner `None` clears a nullable column.
#[derive(Debug, Default)]
pub struct EventPatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub is_all_day: Option<bool>,
    pub location: Option<Option<String>>,
    pub task_id: Option<Option<String>>,
}

pub fn update(id: &str, user_id: &str, patch: &EventPatch, now: &str) -> Built {
    let mut q = Query::update();
    q.table(CalendarEvents::Table)
        .value(CalendarEvents::UpdatedAt, now);
    if let Some(v) = &patch.title {
        q.value(CalendarEvents::Title, v.as_str());
    }
    if let Some(v) = &patch.description {
        q.value(CalendarEvents::Description, v.clone());
    }
    if let Some(v) = &patch.start_date {
        q.value(CalendarEvents::StartDate, v.as_str());
    }
    if let Some(v) = &patch.end_date {
        q.value(CalendarEvents::EndDate, v.as_str());
    }
    if let Some(v) = patch.is_all_day {
        q.value(CalendarEvents::IsAllDay, v);
    }
    if let Some(v) = &patch.location {
        q.value(CalendarEvents::Location, v.clone());
    }
    if let Some(v) = &patch.task_id {
        q.value(CalendarEvents::TaskId, v.clone());
    }
    q.and_where(Expr::col(CalendarEvents::Id).eq(id))
        .and_where(Expr::col(CalendarEvents::UserId).eq(user_id))
        .build(SqliteQueryBuilder)
}

pub fn delete(id: &str, user_id: &str) -> Built {
    Query::delete()
        .from_table(CalendarEvents::Table)
        .and_where(Expr::col(CalendarEvents::Id).eq(id))
        .and_where(Expr::col(CalendarEvents::UserId).eq(user_id))
        .build(SqliteQueryBuilder)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlap_compares_opposite_bounds() {
        let (sql, values) = overlapping(
            "u1",
            Some("2025-03-01T00:00:00Z"),
            Some("2025-03-31T23:59:59Z"),
            None,
        );
        assert!(sql.contains(r#""calendar_events"."start_date" <= ?"#));
        assert!(sql.contains(r#""calendar_events"."end_date" >= ?"#));
        assert!(sql.contains(r#"LEFT JOIN "tasks""#));
        assert!(values.0.contains(&"2025-03-31T23:59:59Z".into()));
    }

    #[test]
    fn unbounded_listing_only_scopes_by_owner() {
        let (sql, _) = overlapping("u1", None, None, None);
        assert!(!sql.contains(r#""start_date" <= ?"#));
        assert!(sql.contains(r#""calendar_events"."user_id" = ?"#));
    }
}
