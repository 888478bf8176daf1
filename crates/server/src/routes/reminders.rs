use std::collections::HashMap;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::{Duration, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use taskflow_api::service::{self, MESSAGE_MAX, PENDING_HORIZON_HOURS, ReminderSort};
use taskflow_api::{
    CreateReminderRequest, MessageResponse, Pagination, Reminder, ReminderDetail,
    ReminderListItem, ReminderListQuery, ReminderListResponse, ReminderLog, ReminderStats,
    ReminderStatus, SortOrder, TaskSummary, UpdateReminderRequest, db,
};

use crate::error::ApiErr;
use crate::routes::auth::AuthUser;
use crate::routes::tasks::{load_task, with_stakeholders};
use crate::storage::{
    Db, log_from_row, reminder_with_task_from_row, sq_execute, sq_query_map, sq_query_row,
};

/// Logs attached to each listing item.
const RECENT_LOGS: usize = 3;

fn load_reminder(
    conn: &Connection,
    id: &str,
    user_id: &str,
) -> Result<(Reminder, TaskSummary), ApiErr> {
    sq_query_row(conn, db::reminders::get(id, user_id), reminder_with_task_from_row)
        .map_err(ApiErr::missing_or_db("reminder not found", "get reminder"))
}

/// Logs of the given reminders, newest first, grouped by reminder id.
fn logs_by_reminder(
    conn: &Connection,
    ids: &[String],
) -> Result<HashMap<String, Vec<ReminderLog>>, ApiErr> {
    let mut grouped: HashMap<String, Vec<ReminderLog>> = HashMap::new();
    if ids.is_empty() {
        return Ok(grouped);
    }
    let logs = sq_query_map(conn, db::reminders::logs_for_reminders(ids), log_from_row)
        .map_err(ApiErr::from_db("load reminder logs"))?;
    for log in logs {
        grouped.entry(log.reminder_id.clone()).or_default().push(log);
    }
    Ok(grouped)
}

fn with_task(rows: Vec<(Reminder, TaskSummary)>) -> Vec<ReminderListItem> {
    rows.into_iter()
        .map(|(reminder, task)| ReminderListItem {
            reminder,
            task,
            recent_logs: Vec::new(),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

/// POST /api/v1/reminders — schedule a reminder on one of the caller's tasks.
pub async fn create(
    State(db): State<Db>,
    user: AuthUser,
    Json(req): Json<CreateReminderRequest>,
) -> Result<(StatusCode, Json<Reminder>), ApiErr> {
    let scheduled_at = service::normalize_datetime("scheduled_at", &req.scheduled_at)?;
    let message = service::validate_optional("message", req.message.as_deref(), MESSAGE_MAX)?;
    let channels = service::normalize_channels(req.channels.as_deref())?;
    let is_recurring = req.is_recurring.unwrap_or(false);
    let recurring_pattern = service::validate_recurrence(is_recurring, req.recurring_pattern)?;

    let id = Uuid::new_v4().to_string();
    let conn = db.conn();
    load_task(&conn, &req.task_id, &user.user_id)?;
    sq_execute(
        &conn,
        db::reminders::insert(&db::reminders::InsertParams {
            id: &id,
            task_id: &req.task_id,
            reminder_type: req.reminder_type,
            scheduled_at: &scheduled_at,
            message: message.as_deref(),
            channels: &channels,
            is_recurring,
            recurring_pattern,
            now: &service::now_ts(),
        }),
    )
    .map_err(ApiErr::from_db("insert reminder"))?;

    let (reminder, _) = load_reminder(&conn, &id, &user.user_id)?;
    tracing::debug!("scheduled reminder {id} for {scheduled_at}");
    Ok((StatusCode::CREATED, Json(reminder)))
}

// ---------------------------------------------------------------------------
// Listings
// ---------------------------------------------------------------------------

/// GET /api/v1/reminders — paginated listing with each reminder's latest logs.
pub async fn list(
    State(db): State<Db>,
    user: AuthUser,
    Query(q): Query<ReminderListQuery>,
) -> Result<Json<ReminderListResponse>, ApiErr> {
    let sort = ReminderSort::parse(q.sort_by.as_deref())?;
    let filter = db::reminders::ListFilter {
        status: q.status,
        reminder_type: q.reminder_type,
        task_id: q.task_id.as_deref().filter(|id| !id.is_empty()),
        sort,
        ascending: service::is_ascending(q.sort_order, SortOrder::Asc),
        page: q.page,
        limit: q.limit,
    };
    let built = db::reminders::list(&user.user_id, &filter);

    let conn = db.conn();
    let total: i64 = sq_query_row(&conn, built.count_query, |row| row.get(0))
        .map_err(ApiErr::from_db("count reminders"))?;
    let rows = sq_query_map(&conn, built.select_query, reminder_with_task_from_row)
        .map_err(ApiErr::from_db("list reminders"))?;

    let ids: Vec<String> = rows.iter().map(|(r, _)| r.id.clone()).collect();
    let mut logs = logs_by_reminder(&conn, &ids)?;
    let mut reminders = with_task(rows);
    for item in &mut reminders {
        let mut recent = logs.remove(&item.reminder.id).unwrap_or_default();
        recent.truncate(RECENT_LOGS);
        item.recent_logs = recent;
    }

    Ok(Json(ReminderListResponse {
        reminders,
        pagination: Pagination::new(built.page, built.limit, total),
    }))
}

/// GET /api/v1/reminders/pending — PENDING reminders due within the next 24 hours.
pub async fn pending(
    State(db): State<Db>,
    user: AuthUser,
) -> Result<Json<Vec<ReminderListItem>>, ApiErr> {
    let until = service::format_ts(Utc::now() + Duration::hours(PENDING_HORIZON_HOURS));
    let conn = db.conn();
    let rows = sq_query_map(
        &conn,
        db::reminders::pending_until(&user.user_id, &until),
        reminder_with_task_from_row,
    )
    .map_err(ApiErr::from_db("list pending reminders"))?;
    Ok(Json(with_task(rows)))
}

/// GET /api/v1/reminders/stats
pub async fn stats(State(db): State<Db>, user: AuthUser) -> Result<Json<ReminderStats>, ApiErr> {
    let conn = db.conn();
    let rows: Vec<(String, i64)> = sq_query_map(
        &conn,
        db::reminders::count_by_status(&user.user_id),
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .map_err(ApiErr::from_db("count reminders by status"))?;

    let count = |status: ReminderStatus| {
        rows.iter()
            .find(|(s, _)| s == status.as_str())
            .map_or(0, |(_, n)| *n)
    };
    let total_reminders = rows.iter().map(|(_, n)| n).sum();
    let sent_reminders = count(ReminderStatus::Sent);
    Ok(Json(ReminderStats {
        total_reminders,
        sent_reminders,
        pending_reminders: count(ReminderStatus::Pending),
        failed_reminders: count(ReminderStatus::Failed),
        success_rate: service::rate(sent_reminders, total_reminders),
    }))
}

// ---------------------------------------------------------------------------
// Single reminder
// ---------------------------------------------------------------------------

/// GET /api/v1/reminders/{id} — reminder, its task with stakeholders, all logs.
pub async fn get(
    State(db): State<Db>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<ReminderDetail>, ApiErr> {
    let conn = db.conn();
    let (reminder, summary) = load_reminder(&conn, &id, &user.user_id)?;
    let task = load_task(&conn, &summary.id, &user.user_id)?;
    let task = with_stakeholders(&conn, vec![task])?
        .pop()
        .ok_or_else(|| ApiErr::not_found("reminder not found"))?;
    let logs = logs_by_reminder(&conn, std::slice::from_ref(&reminder.id))?
        .remove(&reminder.id)
        .unwrap_or_default();

    Ok(Json(ReminderDetail {
        reminder,
        task,
        logs,
    }))
}

/// PATCH /api/v1/reminders/{id} — only PENDING reminders can change.
pub async fn update(
    State(db): State<Db>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateReminderRequest>,
) -> Result<Json<Reminder>, ApiErr> {
    let mut patch = db::reminders::ReminderPatch {
        reminder_type: req.reminder_type,
        ..Default::default()
    };
    if let Some(raw) = req.scheduled_at.as_deref() {
        patch.scheduled_at = Some(service::normalize_datetime("scheduled_at", raw)?);
    }
    if let Some(message) = req.message.as_deref() {
        patch.message = Some(service::validate_optional(
            "message",
            Some(message),
            MESSAGE_MAX,
        )?);
    }
    if let Some(channels) = req.channels.as_deref() {
        patch.channels = Some(service::normalize_channels(Some(channels))?);
    }

    let conn = db.conn();
    let (current, _) = load_reminder(&conn, &id, &user.user_id)?;
    if current.status != ReminderStatus::Pending {
        return Err(ApiErr::conflict("only pending reminders can be updated"));
    }
    if req.is_recurring.is_some() || req.recurring_pattern.is_some() {
        let is_recurring = req.is_recurring.unwrap_or(current.is_recurring);
        let pattern = req.recurring_pattern.or(current.recurring_pattern);
        patch.recurring_pattern = Some(service::validate_recurrence(is_recurring, pattern)?);
        patch.is_recurring = Some(is_recurring);
    }

    let affected = sq_execute(&conn, db::reminders::update(&id, &patch, &service::now_ts()))
        .map_err(ApiErr::from_db("update reminder"))?;
    if affected == 0 {
        return Err(ApiErr::conflict("only pending reminders can be updated"));
    }
    let (reminder, _) = load_reminder(&conn, &id, &user.user_id)?;
    Ok(Json(reminder))
}

/// DELETE /api/v1/reminders/{id} — cancels; logs are kept.
pub async fn delete(
    State(db): State<Db>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiErr> {
    let conn = db.conn();
    load_reminder(&conn, &id, &user.user_id)?;
    sq_execute(
        &conn,
        db::reminders::set_status(&id, ReminderStatus::Cancelled, None, &service::now_ts()),
    )
    .map_err(ApiErr::from_db("cancel reminder"))?;
    Ok(Json(MessageResponse::new("reminder cancelled")))
}
