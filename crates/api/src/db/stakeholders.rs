//! Stakeholder (contact) query builders.

use sea_query::{
    Alias, Asterisk, Expr, Func, Order, Query, SelectStatement, SimpleExpr, SqliteQueryBuilder,
};

use super::tables::Stakeholders;
use super::{Built, BuiltListQuery, contains_pattern};
use crate::page_window;
use crate::service::StakeholderSort;

/// Number of columns emitted by [`stakeholder_columns`].
pub const STAKEHOLDER_COLUMNS: usize = 11;

// ── Helpers ────────────────────────────────────────────────────────────────

/// Stakeholder columns in `Stakeholder` field order:
/// id, user_id, first_name, last_name, email, phone, organization, tags,
/// is_active, created_at, updated_at.
pub fn stakeholder_columns(q: &mut SelectStatement) -> &mut SelectStatement {
    q.column((Stakeholders::Table, Stakeholders::Id))
        .column((Stakeholders::Table, Stakeholders::UserId))
        .column((Stakeholders::Table, Stakeholders::FirstName))
        .column((Stakeholders::Table, Stakeholders::LastName))
        .column((Stakeholders::Table, Stakeholders::Email))
        .column((Stakeholders::Table, Stakeholders::Phone))
        .column((Stakeholders::Table, Stakeholders::Organization))
        .column((Stakeholders::Table, Stakeholders::Tags))
        .column((Stakeholders::Table, Stakeholders::IsActive))
        .column((Stakeholders::Table, Stakeholders::CreatedAt))
        .column((Stakeholders::Table, Stakeholders::UpdatedAt))
}

fn owned_live(user_id: &str) -> [SimpleExpr; 2] {
    [
        Expr::col((Stakeholders::Table, Stakeholders::UserId)).eq(user_id),
        Expr::col((Stakeholders::Table, Stakeholders::DeletedAt)).is_null(),
    ]
}

fn select_stakeholders(user_id: &str) -> SelectStatement {
    let mut q = Query::select();
    stakeholder_columns(&mut q).from(Stakeholders::Table);
    for cond in owned_live(user_id) {
        q.and_where(cond);
    }
    q
}

/// Number of live tasks linked to the current stakeholder row.
fn task_count() -> SimpleExpr {
    Expr::cust(concat!(
        "(SELECT COUNT(*) FROM \"task_stakeholders\" ts ",
        "INNER JOIN \"tasks\" t ON t.\"id\" = ts.\"task_id\" ",
        "WHERE ts.\"stakeholder_id\" = \"stakeholders\".\"id\" AND t.\"is_deleted\" = 0)",
    ))
}

/// Matches stakeholders carrying any of `tags` (JSON array column).
fn has_any_tag(tags: &[String]) -> SimpleExpr {
    let placeholders = vec!["?"; tags.len()].join(", ");
    Expr::cust_with_values::<_, sea_query::Value, _>(
        format!(
            "EXISTS (SELECT 1 FROM json_each(\"stakeholders\".\"tags\") WHERE json_each.value IN ({placeholders}))"
        ),
        tags.iter().map(|t| t.as_str().into()),
    )
}

// ── Queries ────────────────────────────────────────────────────────────────

pub struct InsertParams<'a> {
    pub id: &'a str,
    pub user_id: &'a str,
    pub first_name: &'a str,
    pub last_name: &'a str,
    pub email: Option<&'a str>,
    pub phone: Option<&'a str>,
    pub organization: Option<&'a str>,
    /// JSON array text.
    pub tags: &'a str,
    pub now: &'a str,
}

pub fn insert(p: &InsertParams<'_>) -> Built {
    Query::insert()
        .into_table(Stakeholders::Table)
        .columns([
            Stakeholders::Id,
            Stakeholders::UserId,
            Stakeholders::FirstName,
            Stakeholders::LastName,
            Stakeholders::Email,
            Stakeholders::Phone,
            Stakeholders::Organization,
            Stakeholders::Tags,
            Stakeholders::CreatedAt,
            Stakeholders::UpdatedAt,
        ])
        .values_panic([
            p.id.into(),
            p.user_id.into(),
            p.first_name.into(),
            p.last_name.into(),
            p.email.map(str::to_string).into(),
            p.phone.map(str::to_string).into(),
            p.organization.map(str::to_string).into(),
            p.tags.into(),
            p.now.into(),
            p.now.into(),
        ])
        .build(SqliteQueryBuilder)
}

/// A live stakeholder owned by `user_id`.
pub fn get(id: &str, user_id: &str) -> Built {
    select_stakeholders(user_id)
        .and_where(Expr::col((Stakeholders::Table, Stakeholders::Id)).eq(id))
        .build(SqliteQueryBuilder)
}

/// Every live stakeholder of a user, oldest first.
pub fn all_live(user_id: &str) -> Built {
    select_stakeholders(user_id)
        .order_by((Stakeholders::Table, Stakeholders::CreatedAt), Order::Asc)
        .build(SqliteQueryBuilder)
}

/// Ids among `ids` that are live stakeholders of `user_id`.
pub fn live_ids_in(user_id: &str, ids: &[String]) -> Built {
    let mut q = Query::select();
    q.column((Stakeholders::Table, Stakeholders::Id))
        .from(Stakeholders::Table)
        .and_where(
            Expr::col((Stakeholders::Table, Stakeholders::Id))
                .is_in(ids.iter().map(String::as_str)),
        );
    for cond in owned_live(user_id) {
        q.and_where(cond);
    }
    q.build(SqliteQueryBuilder)
}

#[derive(Debug, Default)]
pub struct ListFilter<'a> {
    pub search: Option<&'a str>,
    pub organization: Option<&'a str>,
    pub tags: &'a [String],
    pub sort: StakeholderSort,
    pub ascending: bool,
    pub page: u32,
    pub limit: u32,
}

/// Paginated listing. Each row is the stakeholder columns plus `task_count`.
pub fn list(user_id: &str, f: &ListFilter<'_>) -> BuiltListQuery {
    let (page, limit, offset) = page_window(f.page, f.limit);

    let mut count_q = Query::select()
        .expr_as(Func::count(Expr::col(Asterisk)), Alias::new("count"))
        .from(Stakeholders::Table)
        .to_owned();
    let mut select_q = Query::select();
    stakeholder_columns(&mut select_q)
        .expr_as(task_count(), Alias::new("task_count"))
        .from(Stakeholders::Table);

    let mut conds: Vec<SimpleExpr> = owned_live(user_id).into();
    if let Some(search) = f.search.map(str::trim).filter(|s| !s.is_empty()) {
        let like = contains_pattern(search);
        conds.push(
            Expr::col((Stakeholders::Table, Stakeholders::FirstName))
                .like(like.clone())
                .or(Expr::col((Stakeholders::Table, Stakeholders::LastName)).like(like.clone()))
                .or(Expr::col((Stakeholders::Table, Stakeholders::Email)).like(like.clone()))
                .or(Expr::col((Stakeholders::Table, Stakeholders::Phone)).like(like.clone())),
        );
    }
    if let Some(org) = f.organization.map(str::trim).filter(|s| !s.is_empty()) {
        conds.push(Expr::col((Stakeholders::Table, Stakeholders::Organization)).eq(org));
    }
    if !f.tags.is_empty() {
        conds.push(has_any_tag(f.tags));
    }
    for cond in conds {
        count_q.and_where(cond.clone());
        select_q.and_where(cond);
    }

    let col = match f.sort {
        StakeholderSort::CreatedAt => Stakeholders::CreatedAt,
        StakeholderSort::UpdatedAt => Stakeholders::UpdatedAt,
        StakeholderSort::FirstName => Stakeholders::FirstName,
        StakeholderSort::LastName => Stakeholders::LastName,
        StakeholderSort::Organization => Stakeholders::Organization,
    };
    let order = if f.ascending { Order::Asc } else { Order::Desc };
    select_q
        .order_by((Stakeholders::Table, col), order)
        .order_by((Stakeholders::Table, Stakeholders::Id), Order::Asc)
        .limit(u64::from(limit))
        .offset(offset);

    BuiltListQuery {
        count_query: count_q.build(SqliteQueryBuilder),
        select_query: select_q.build(SqliteQueryBuilder),
        page,
        limit,
    }
}

/// Tag arrays (JSON text) of every live stakeholder.
pub fn tag_lists(user_id: &str) -> Built {
    let mut q = Query::select();
    q.column((Stakeholders::Table, Stakeholders::Tags))
        .from(Stakeholders::Table);
    for cond in owned_live(user_id) {
        q.and_where(cond);
    }
    q.build(SqliteQueryBuilder)
}

/// Distinct non-empty organizations, sorted.
pub fn organizations(user_id: &str) -> Built {
    let mut q = Query::select();
    q.distinct()
        .column((Stakeholders::Table, Stakeholders::Organization))
        .from(Stakeholders::Table)
        .and_where(Expr::col((Stakeholders::Table, Stakeholders::Organization)).is_not_null())
        .and_where(Expr::col((Stakeholders::Table, Stakeholders::Organization)).ne(""))
        .order_by((Stakeholders::Table, Stakeholders::Organization), Order::Asc);
    for cond in owned_live(user_id) {
        q.and_where(cond);
    }
    q.build(SqliteQueryBuilder)
}

/// Exact contact lookup: email (case-insensitive) or phone, at most 10.
pub fn find_by_contact(user_id: &str, email_lower: &str, phone: &str) -> Built {
    select_stakeholders(user_id)
        .and_where(
            Expr::expr(Func::lower(Expr::col((Stakeholders::Table, Stakeholders::Email))))
                .eq(email_lower)
                .or(Expr::col((Stakeholders::Table, Stakeholders::Phone)).eq(phone)),
        )
        .order_by((Stakeholders::Table, Stakeholders::CreatedAt), Order::Asc)
        .limit(10)
        .build(SqliteQueryBuilder)
}

/// Partial update. Inner `None` clears a nullable column.
#[derive(Debug, Default)]
pub struct StakeholderPatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<Option<String>>,
    pub phone: Option<Option<String>>,
    pub organization: Option<Option<String>>,
    /// JSON array text.
    pub tags: Option<String>,
}

pub fn update(id: &str, user_id: &str, patch: &StakeholderPatch, now: &str) -> Built {
    let mut q = Query::update();
    q.table(Stakeholders::Table)
        .value(Stakeholders::UpdatedAt, now);
    if let Some(v) = &patch.first_name {
        q.value(Stakeholders::FirstName, v.as_str());
    }
    if let Some(v) = &patch.last_name {
        q.value(Stakeholders::LastName, v.as_str());
    }
    if let Some(v) = &patch.email {
        q.value(Stakeholders::Email, v.clone());
    }
    if let Some(v) = &patch.phone {
        q.value(Stakeholders::Phone, v.clone());
    }
    if let Some(v) = &patch.organization {
        q.value(Stakeholders::Organization, v.clone());
    }
    if let Some(v) = &patch.tags {
        q.value(Stakeholders::Tags, v.as_str());
    }
    q.and_where(Expr::col(Stakeholders::Id).eq(id))
        .and_where(Expr::col(Stakeholders::UserId).eq(user_id))
        .and_where(Expr::col(Stakeholders::DeletedAt).is_null())
        .build(SqliteQueryBuilder)
}

pub fn soft_delete(id: &str, user_id: &str, now: &str) -> Built {
    Query::update()
        .table(Stakeholders::Table)
        .value(Stakeholders::IsActive, false)
        .value(Stakeholders::DeletedAt, now)
        .value(Stakeholders::UpdatedAt, now)
        .and_where(Expr::col(Stakeholders::Id).eq(id))
        .and_where(Expr::col(Stakeholders::UserId).eq(user_id))
        .and_where(Expr::col(Stakeholders::DeletedAt).is_null())
        .build(SqliteQueryBuilder)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_filter_binds_each_tag() {
        let tags = vec!["vip".to_string(), "client".to_string()];
        let filter = ListFilter {
            tags: &tags,
            page: 1,
            limit: 10,
            ..Default::default()
        };
        let built = list("u1", &filter);
        let (sql, values) = &built.count_query;
        assert!(sql.contains("json_each(\"stakeholders\".\"tags\")"));
        assert!(sql.contains("IN (?, ?)"));
        assert!(values.0.contains(&"vip".into()));
        assert!(values.0.contains(&"client".into()));
    }

    #[test]
    fn listing_carries_live_task_count() {
        let (sql, _) = list("u1", &ListFilter { page: 1, limit: 10, ..Default::default() }).select_query;
        assert!(sql.contains("AS \"task_count\""));
        assert!(sql.contains("t.\"is_deleted\" = 0"));
        assert!(sql.contains("\"stakeholders\".\"deleted_at\" IS NULL"));
    }

    #[test]
    fn contact_search_is_bounded() {
        let (sql, values) = find_by_contact("u1", "ann@x.com", "ann@x.com");
        assert!(sql.contains("LOWER(\"stakeholders\".\"email\")"));
        assert!(sql.contains("LIMIT"));
        assert!(values.0.len() >= 4);
    }
}
