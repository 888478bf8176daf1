//! Task query builders.
//!
//! Every query is scoped by owner and excludes soft-deleted tasks.

use sea_query::{
    Alias, Asterisk, Expr, Func, JoinType, Order, Query, SelectStatement, SimpleExpr,
    SqliteQueryBuilder,
};

use super::stakeholders::stakeholder_columns;
use super::tables::{Stakeholders, TaskStakeholders, Tasks};
use super::{Built, BuiltListQuery, contains_pattern};
use crate::service::TaskSort;
use crate::{Priority, TaskStatus, page_window};

/// Number of columns emitted by [`task_columns`].
pub const TASK_COLUMNS: usize = 12;

/// Number of columns emitted by [`link_columns`] before the stakeholder columns.
pub const LINK_COLUMNS: usize = 5;

// ── Helpers ────────────────────────────────────────────────────────────────

/// Task columns in `Task` field order:
/// id, user_id, title, description, priority, status, due_date,
/// completed_at, is_voice_created, voice_metadata, created_at, updated_at.
pub fn task_columns(q: &mut SelectStatement) -> &mut SelectStatement {
    q.column((Tasks::Table, Tasks::Id))
        .column((Tasks::Table, Tasks::UserId))
        .column((Tasks::Table, Tasks::Title))
        .column((Tasks::Table, Tasks::Description))
        .column((Tasks::Table, Tasks::Priority))
        .column((Tasks::Table, Tasks::Status))
        .column((Tasks::Table, Tasks::DueDate))
        .column((Tasks::Table, Tasks::CompletedAt))
        .column((Tasks::Table, Tasks::IsVoiceCreated))
        .column((Tasks::Table, Tasks::VoiceMetadata))
        .column((Tasks::Table, Tasks::CreatedAt))
        .column((Tasks::Table, Tasks::UpdatedAt))
}

/// Join-row columns (id, task_id, stakeholder_id, role, created_at)
/// followed by the stakeholder's own columns.
fn link_columns(q: &mut SelectStatement) -> &mut SelectStatement {
    q.column((TaskStakeholders::Table, TaskStakeholders::Id))
        .column((TaskStakeholders::Table, TaskStakeholders::TaskId))
        .column((TaskStakeholders::Table, TaskStakeholders::StakeholderId))
        .column((TaskStakeholders::Table, TaskStakeholders::Role))
        .column((TaskStakeholders::Table, TaskStakeholders::CreatedAt));
    stakeholder_columns(q)
}

fn owned_live(user_id: &str) -> [SimpleExpr; 2] {
    [
        Expr::col((Tasks::Table, Tasks::UserId)).eq(user_id),
        Expr::col((Tasks::Table, Tasks::IsDeleted)).eq(false),
    ]
}

fn open_statuses() -> SimpleExpr {
    Expr::col((Tasks::Table, Tasks::Status))
        .is_not_in([TaskStatus::Completed.as_str(), TaskStatus::Cancelled.as_str()])
}

/// `CASE` expression ranking priorities by severity.
fn priority_rank() -> SimpleExpr {
    let arms: String = Priority::ALL
        .iter()
        .map(|p| format!(" WHEN '{}' THEN {}", p.as_str(), p.rank()))
        .collect();
    Expr::cust(format!(r#"CASE "tasks"."priority"{arms} END"#))
}

fn base_select() -> SelectStatement {
    let mut q = Query::select();
    task_columns(&mut q).from(Tasks::Table);
    q
}

fn select_tasks(user_id: &str) -> SelectStatement {
    let mut q = base_select();
    for cond in owned_live(user_id) {
        q.and_where(cond);
    }
    q
}

// ── Queries ────────────────────────────────────────────────────────────────

pub struct InsertParams<'a> {
    pub id: &'a str,
    pub user_id: &'a str,
    pub title: &'a str,
    pub description: Option<&'a str>,
    pub priority: Priority,
    pub due_date: Option<&'a str>,
    pub is_voice_created: bool,
    pub voice_metadata: Option<&'a str>,
    pub now: &'a str,
}

pub fn insert(p: &InsertParams<'_>) -> Built {
    Query::insert()
        .into_table(Tasks::Table)
        .columns([
            Tasks::Id,
            Tasks::UserId,
            Tasks::Title,
            Tasks::Description,
            Tasks::Priority,
            Tasks::Status,
            Tasks::DueDate,
            Tasks::IsVoiceCreated,
            Tasks::VoiceMetadata,
            Tasks::CreatedAt,
            Tasks::UpdatedAt,
        ])
        .values_panic([
            p.id.into(),
            p.user_id.into(),
            p.title.into(),
            p.description.map(str::to_string).into(),
            p.priority.as_str().into(),
            TaskStatus::Pending.as_str().into(),
            p.due_date.map(str::to_string).into(),
            p.is_voice_created.into(),
            p.voice_metadata.map(str::to_string).into(),
            p.now.into(),
            p.now.into(),
        ])
        .build(SqliteQueryBuilder)
}

/// A live task owned by `user_id`.
pub fn get(id: &str, user_id: &str) -> Built {
    select_tasks(user_id)
        .and_where(Expr::col((Tasks::Table, Tasks::Id)).eq(id))
        .build(SqliteQueryBuilder)
}

/// Filters for [`list`]. Dates are already in storage format.
#[derive(Debug, Default)]
pub struct ListFilter<'a> {
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    pub search: Option<&'a str>,
    pub due_from: Option<&'a str>,
    pub due_to: Option<&'a str>,
    pub sort: TaskSort,
    pub ascending: bool,
    pub page: u32,
    pub limit: u32,
}

/// Paginated task listing with filters and a whitelisted sort column.
pub fn list(user_id: &str, f: &ListFilter<'_>) -> BuiltListQuery {
    let (page, limit, offset) = page_window(f.page, f.limit);

    let mut count_q = Query::select()
        .expr_as(Func::count(Expr::col(Asterisk)), Alias::new("count"))
        .from(Tasks::Table)
        .to_owned();
    let mut select_q = base_select();

    let mut conds: Vec<SimpleExpr> = owned_live(user_id).into();
    if let Some(status) = f.status {
        conds.push(Expr::col((Tasks::Table, Tasks::Status)).eq(status.as_str()));
    }
    if let Some(priority) = f.priority {
        conds.push(Expr::col((Tasks::Table, Tasks::Priority)).eq(priority.as_str()));
    }
    if let Some(search) = f.search.map(str::trim).filter(|s| !s.is_empty()) {
        let like = contains_pattern(search);
        conds.push(
            Expr::col((Tasks::Table, Tasks::Title))
                .like(like.clone())
                .or(Expr::col((Tasks::Table, Tasks::Description)).like(like.clone())),
        );
    }
    if let Some(from) = f.due_from {
        conds.push(Expr::col((Tasks::Table, Tasks::DueDate)).gte(from));
    }
    if let Some(to) = f.due_to {
        conds.push(Expr::col((Tasks::Table, Tasks::DueDate)).lte(to));
    }
    for cond in conds {
        count_q.and_where(cond.clone());
        select_q.and_where(cond);
    }

    let order = if f.ascending { Order::Asc } else { Order::Desc };
    match f.sort {
        TaskSort::Priority => {
            select_q.order_by_expr(priority_rank(), order);
        }
        other => {
            let col = match other {
                TaskSort::UpdatedAt => Tasks::UpdatedAt,
                TaskSort::DueDate => Tasks::DueDate,
                TaskSort::Title => Tasks::Title,
                TaskSort::Status => Tasks::Status,
                _ => Tasks::CreatedAt,
            };
            select_q.order_by((Tasks::Table, col), order);
        }
    }
    select_q
        .order_by((Tasks::Table, Tasks::Id), Order::Asc)
        .limit(u64::from(limit))
        .offset(offset);

    BuiltListQuery {
        count_query: count_q.build(SqliteQueryBuilder),
        select_query: select_q.build(SqliteQueryBuilder),
        page,
        limit,
    }
}

/// `status, COUNT(*)` of live tasks.
pub fn count_by_status(user_id: &str) -> Built {
    let mut q = Query::select();
    q.column(Tasks::Status)
        .expr(Func::count(Expr::col(Asterisk)))
        .from(Tasks::Table)
        .and_where(Expr::col(Tasks::UserId).eq(user_id))
        .and_where(Expr::col(Tasks::IsDeleted).eq(false))
        .group_by_col(Tasks::Status);
    q.build(SqliteQueryBuilder)
}

/// Flip open tasks past their due date to OVERDUE.
pub fn mark_overdue(user_id: &str, now: &str) -> Built {
    Query::update()
        .table(Tasks::Table)
        .value(Tasks::Status, TaskStatus::Overdue.as_str())
        .value(Tasks::UpdatedAt, now)
        .and_where(Expr::col(Tasks::UserId).eq(user_id))
        .and_where(Expr::col(Tasks::IsDeleted).eq(false))
        .and_where(Expr::col(Tasks::DueDate).lt(now))
        .and_where(Expr::col(Tasks::Status).is_in([
            TaskStatus::Pending.as_str(),
            TaskStatus::InProgress.as_str(),
        ]))
        .build(SqliteQueryBuilder)
}

/// Open tasks past their due date, oldest first.
pub fn overdue(user_id: &str, now: &str) -> Built {
    select_tasks(user_id)
        .and_where(Expr::col((Tasks::Table, Tasks::DueDate)).lt(now))
        .and_where(open_statuses())
        .order_by((Tasks::Table, Tasks::DueDate), Order::Asc)
        .build(SqliteQueryBuilder)
}

/// Open tasks due within `[from, to]`, soonest first.
pub fn upcoming(user_id: &str, from: &str, to: &str) -> Built {
    select_tasks(user_id)
        .and_where(Expr::col((Tasks::Table, Tasks::DueDate)).gte(from))
        .and_where(Expr::col((Tasks::Table, Tasks::DueDate)).lte(to))
        .and_where(open_statuses())
        .order_by((Tasks::Table, Tasks::DueDate), Order::Asc)
        .build(SqliteQueryBuilder)
}

/// Partial task update. Inner `None` clears a nullable column.
#[derive(Debug, Default)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub priority: Option<Priority>,
    pub status: Option<TaskStatus>,
    pub completed_at: Option<Option<String>>,
    pub due_date: Option<Option<String>>,
}

pub fn update(id: &str, user_id: &str, patch: &TaskPatch, now: &str) -> Built {
    let mut q = Query::update();
    q.table(Tasks::Table).value(Tasks::UpdatedAt, now);
    if let Some(title) = &patch.title {
        q.value(Tasks::Title, title.as_str());
    }
    if let Some(description) = &patch.description {
        q.value(Tasks::Description, description.clone());
    }
    if let Some(priority) = patch.priority {
        q.value(Tasks::Priority, priority.as_str());
    }
    if let Some(status) = patch.status {
        q.value(Tasks::Status, status.as_str());
    }
    if let Some(completed_at) = &patch.completed_at {
        q.value(Tasks::CompletedAt, completed_at.clone());
    }
    if let Some(due_date) = &patch.due_date {
        q.value(Tasks::DueDate, due_date.clone());
    }
    q.and_where(Expr::col(Tasks::Id).eq(id))
        .and_where(Expr::col(Tasks::UserId).eq(user_id))
        .and_where(Expr::col(Tasks::IsDeleted).eq(false))
        .build(SqliteQueryBuilder)
}

pub fn soft_delete(id: &str, user_id: &str, now: &str) -> Built {
    Query::update()
        .table(Tasks::Table)
        .value(Tasks::IsDeleted, true)
        .value(Tasks::DeletedAt, now)
        .value(Tasks::UpdatedAt, now)
        .and_where(Expr::col(Tasks::Id).eq(id))
        .and_where(Expr::col(Tasks::UserId).eq(user_id))
        .and_where(Expr::col(Tasks::IsDeleted).eq(false))
        .build(SqliteQueryBuilder)
}

// ── Stakeholder links ──────────────────────────────────────────────────────

/// Link a stakeholder to a task. Re-linking is a no-op.
pub fn insert_link(id: &str, task_id: &str, stakeholder_id: &str, role: &str) -> Built {
    let sql = concat!(
        "INSERT OR IGNORE INTO \"task_stakeholders\" ",
        "(\"id\", \"task_id\", \"stakeholder_id\", \"role\") VALUES (?, ?, ?, ?)",
    )
    .to_string();
    let values = sea_query::Values(vec![
        id.into(),
        task_id.into(),
        stakeholder_id.into(),
        role.into(),
    ]);
    (sql, values)
}

pub fn delete_links(task_id: &str) -> Built {
    Query::delete()
        .from_table(TaskStakeholders::Table)
        .and_where(Expr::col(TaskStakeholders::TaskId).eq(task_id))
        .build(SqliteQueryBuilder)
}

/// Links (with live stakeholder rows) for a set of tasks.
pub fn links_for_tasks(task_ids: &[String]) -> Built {
    let mut q = Query::select();
    link_columns(&mut q)
        .from(TaskStakeholders::Table)
        .join(
            JoinType::InnerJoin,
            Stakeholders::Table,
            Expr::col((Stakeholders::Table, Stakeholders::Id))
                .equals((TaskStakeholders::Table, TaskStakeholders::StakeholderId)),
        )
        .and_where(
            Expr::col((TaskStakeholders::Table, TaskStakeholders::TaskId))
                .is_in(task_ids.iter().map(String::as_str)),
        )
        .and_where(Expr::col((Stakeholders::Table, Stakeholders::DeletedAt)).is_null())
        .order_by((TaskStakeholders::Table, TaskStakeholders::CreatedAt), Order::Asc)
        .order_by((TaskStakeholders::Table, TaskStakeholders::Id), Order::Asc)
        .build(SqliteQueryBuilder)
}

/// Live tasks linked to a stakeholder, newest first.
pub fn for_stakeholder(stakeholder_id: &str, user_id: &str) -> Built {
    select_tasks(user_id)
        .join(
            JoinType::InnerJoin,
            TaskStakeholders::Table,
            Expr::col((TaskStakeholders::Table, TaskStakeholders::TaskId))
                .equals((Tasks::Table, Tasks::Id)),
        )
        .and_where(
            Expr::col((TaskStakeholders::Table, TaskStakeholders::StakeholderId))
                .eq(stakeholder_id),
        )
        .order_by((Tasks::Table, Tasks::CreatedAt), Order::Desc)
        .build(SqliteQueryBuilder)
}

/// Task counters for one stakeholder: total, completed, pending, overdue.
/// Pending and overdue are disjoint: an open task past due counts as overdue only.
pub fn stakeholder_stats(stakeholder_id: &str, user_id: &str, now: &str) -> Built {
    let sql = concat!(
        "SELECT COUNT(*), ",
        "COALESCE(SUM(CASE WHEN t.\"status\" = 'COMPLETED' THEN 1 ELSE 0 END), 0), ",
        "COALESCE(SUM(CASE WHEN t.\"status\" IN ('PENDING', 'IN_PROGRESS') ",
        "AND (t.\"due_date\" IS NULL OR t.\"due_date\" >= ?) THEN 1 ELSE 0 END), 0), ",
        "COALESCE(SUM(CASE WHEN t.\"status\" = 'OVERDUE' OR (t.\"status\" NOT IN ('COMPLETED', 'CANCELLED') ",
        "AND t.\"due_date\" < ?) THEN 1 ELSE 0 END), 0) ",
        "FROM \"tasks\" t ",
        "INNER JOIN \"task_stakeholders\" ts ON ts.\"task_id\" = t.\"id\" ",
        "WHERE ts.\"stakeholder_id\" = ? AND t.\"user_id\" = ? AND t.\"is_deleted\" = 0",
    )
    .to_string();
    let values = sea_query::Values(vec![
        now.into(),
        now.into(),
        stakeholder_id.into(),
        user_id.into(),
    ]);
    (sql, values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_applies_filters_to_count_and_select() {
        let filter = ListFilter {
            status: Some(TaskStatus::Pending),
            search: Some("report"),
            page: 2,
            limit: 5,
            ..Default::default()
        };
        let built = list("u1", &filter);
        let (count_sql, count_values) = &built.count_query;
        let (select_sql, select_values) = &built.select_query;

        assert!(count_sql.contains(r#""tasks"."status" = ?"#));
        assert!(select_sql.contains(r#""tasks"."title" LIKE ?"#));
        assert_eq!(count_values.0.len(), select_values.0.len() - 2);
        assert!(select_sql.contains("LIMIT ? OFFSET ?") || select_sql.contains("LIMIT 5 OFFSET 5"));
        assert_eq!((built.page, built.limit), (2, 5));
    }

    #[test]
    fn priority_sort_uses_severity_rank() {
        let filter = ListFilter {
            sort: TaskSort::Priority,
            ascending: false,
            page: 1,
            limit: 10,
            ..Default::default()
        };
        let (sql, _) = list("u1", &filter).select_query;
        assert!(sql.contains(r#"ORDER BY CASE "tasks"."priority" WHEN 'LOW' THEN 0"#));
        assert!(sql.contains("WHEN 'URGENT' THEN 3 END DESC"));
    }

    #[test]
    fn overdue_flip_only_touches_open_tasks() {
        let (sql, values) = mark_overdue("u1", "2025-01-01T00:00:00Z");
        assert!(sql.contains(r#""status" IN (?, ?)"#));
        assert!(sql.contains(r#""due_date" < ?"#));
        assert!(values.0.contains(&"PENDING".into()));
        assert!(values.0.contains(&"IN_PROGRESS".into()));
        assert!(!values.0.contains(&"COMPLETED".into()));
    }

    #[test]
    fn patch_sets_only_present_columns() {
        let patch = TaskPatch {
            status: Some(TaskStatus::Completed),
            completed_at: Some(Some("2025-01-01T00:00:00Z".into())),
            ..Default::default()
        };
        let (sql, _) = update("t1", "u1", &patch, "2025-01-01T00:00:00Z");
        assert!(sql.contains(r#""status" = ?"#));
        assert!(sql.contains(r#""completed_at" = ?"#));
        assert!(!sql.contains(r#""title" = ?"#));
        assert!(sql.contains(r#""user_id" = ?"#));
    }
}
