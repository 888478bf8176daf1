use std::collections::{BTreeMap, HashMap, HashSet};

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::Utc;
use rusqlite::Connection;
use uuid::Uuid;

use taskflow_api::service::{self, DESCRIPTION_MAX, TITLE_MAX, TaskSort};
use taskflow_api::{
    CreateTaskRequest, MessageResponse, Pagination, SortOrder, Task, TaskDetail, TaskListQuery,
    TaskListResponse, TaskStakeholder, TaskStatsResponse, TaskStatus, TaskWithStakeholders,
    UpcomingQuery, UpdateTaskRequest, VoiceTaskRequest, db,
};

use crate::error::ApiErr;
use crate::routes::auth::AuthUser;
use crate::storage::{
    Db, event_from_row, reminder_from_row, sq_execute, sq_query_map, sq_query_row,
    task_from_row, task_link_from_row,
};

const DEFAULT_ROLE: &str = "assignee";

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// A live task owned by `user_id`, or 404.
pub(crate) fn load_task(conn: &Connection, task_id: &str, user_id: &str) -> Result<Task, ApiErr> {
    sq_query_row(conn, db::tasks::get(task_id, user_id), task_from_row)
        .map_err(ApiErr::missing_or_db("task not found", "get task"))
}

/// Attach live stakeholder links to each task, preserving order.
pub(crate) fn with_stakeholders(
    conn: &Connection,
    tasks: Vec<Task>,
) -> Result<Vec<TaskWithStakeholders>, ApiErr> {
    if tasks.is_empty() {
        return Ok(Vec::new());
    }
    let ids: Vec<String> = tasks.iter().map(|t| t.id.clone()).collect();
    let links = sq_query_map(conn, db::tasks::links_for_tasks(&ids), task_link_from_row)
        .map_err(ApiErr::from_db("load task stakeholders"))?;

    let mut by_task: HashMap<String, Vec<TaskStakeholder>> = HashMap::new();
    for link in links {
        by_task.entry(link.task_id.clone()).or_default().push(link);
    }
    Ok(tasks
        .into_iter()
        .map(|task| {
            let stakeholders = by_task.remove(&task.id).unwrap_or_default();
            TaskWithStakeholders { task, stakeholders }
        })
        .collect())
}

/// De-duplicate requested stakeholder ids and check they are the caller's
/// live contacts.
fn checked_stakeholder_ids(
    conn: &Connection,
    user_id: &str,
    requested: &[String],
) -> Result<Vec<String>, ApiErr> {
    let ids = service::dedupe_ids(requested);
    if ids.is_empty() {
        return Ok(ids);
    }
    let found: HashSet<String> = sq_query_map(
        conn,
        db::stakeholders::live_ids_in(user_id, &ids),
        |row| row.get(0),
    )
    .map_err(ApiErr::from_db("check stakeholders"))?
    .into_iter()
    .collect();

    let unknown: Vec<&str> = ids
        .iter()
        .filter(|id| !found.contains(*id))
        .map(String::as_str)
        .collect();
    if !unknown.is_empty() {
        return Err(ApiErr::bad_request(format!(
            "unknown stakeholder ids: {}",
            unknown.join(", ")
        )));
    }
    Ok(ids)
}

fn replace_links(conn: &Connection, task_id: &str, stakeholder_ids: &[String]) -> Result<(), ApiErr> {
    sq_execute(conn, db::tasks::delete_links(task_id))
        .map_err(ApiErr::from_db("clear task stakeholders"))?;
    for stakeholder_id in stakeholder_ids {
        sq_execute(
            conn,
            db::tasks::insert_link(
                &Uuid::new_v4().to_string(),
                task_id,
                stakeholder_id,
                DEFAULT_ROLE,
            ),
        )
        .map_err(ApiErr::from_db("link stakeholder"))?;
    }
    Ok(())
}

fn load_detail(conn: &Connection, task_id: &str, user_id: &str) -> Result<TaskDetail, ApiErr> {
    let task = load_task(conn, task_id, user_id)?;
    let stakeholders = with_stakeholders(conn, vec![task])?
        .pop()
        .map(|t| (t.task, t.stakeholders));
    let Some((task, stakeholders)) = stakeholders else {
        return Err(ApiErr::not_found("task not found"));
    };
    let reminders = sq_query_map(conn, db::reminders::for_task(task_id), reminder_from_row)
        .map_err(ApiErr::from_db("load task reminders"))?;
    let calendar_events = sq_query_map(
        conn,
        db::calendar::for_task(task_id, user_id),
        event_from_row,
    )
    .map_err(ApiErr::from_db("load task events"))?;

    Ok(TaskDetail {
        task,
        stakeholders,
        reminders,
        calendar_events,
    })
}

fn normalize_due_date(raw: Option<&str>) -> Result<Option<String>, ApiErr> {
    Ok(raw
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| service::normalize_datetime("due_date", v))
        .transpose()?)
}

fn insert_task(
    db: &Db,
    user: &AuthUser,
    req: CreateTaskRequest,
    voice_metadata: Option<serde_json::Value>,
) -> Result<TaskDetail, ApiErr> {
    let title = service::validate_required("title", &req.title, TITLE_MAX)?;
    let description =
        service::validate_optional("description", req.description.as_deref(), DESCRIPTION_MAX)?;
    let due_date = normalize_due_date(req.due_date.as_deref())?;
    let is_voice_created = voice_metadata.is_some();
    let voice_metadata = voice_metadata
        .map(|meta| serde_json::to_string(&meta))
        .transpose()
        .map_err(ApiErr::from_db("encode voice metadata"))?;

    let task_id = Uuid::new_v4().to_string();
    let now = service::now_ts();
    let mut conn = db.conn();
    let stakeholder_ids = checked_stakeholder_ids(
        &conn,
        &user.user_id,
        req.stakeholder_ids.as_deref().unwrap_or_default(),
    )?;

    let tx = conn
        .transaction()
        .map_err(ApiErr::from_db("begin create task"))?;
    sq_execute(
        &tx,
        db::tasks::insert(&db::tasks::InsertParams {
            id: &task_id,
            user_id: &user.user_id,
            title: &title,
            description: description.as_deref(),
            priority: req.priority.unwrap_or_default(),
            due_date: due_date.as_deref(),
            is_voice_created,
            voice_metadata: voice_metadata.as_deref(),
            now: &now,
        }),
    )
    .map_err(ApiErr::from_db("insert task"))?;
    replace_links(&tx, &task_id, &stakeholder_ids)?;
    tx.commit().map_err(ApiErr::from_db("commit create task"))?;

    load_detail(&conn, &task_id, &user.user_id)
}

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

/// POST /api/v1/tasks — create a task, optionally linking stakeholders.
pub async fn create(
    State(db): State<Db>,
    user: AuthUser,
    Json(req): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<TaskDetail>), ApiErr> {
    let detail = insert_task(&db, &user, req, None)?;
    Ok((StatusCode::CREATED, Json(detail)))
}

/// POST /api/v1/tasks/voice — create a task dictated through the voice UI.
pub async fn create_voice(
    State(db): State<Db>,
    user: AuthUser,
    Json(req): Json<VoiceTaskRequest>,
) -> Result<(StatusCode, Json<TaskDetail>), ApiErr> {
    let metadata = match req.voice_metadata {
        Some(meta) if !meta.is_object() => {
            return Err(ApiErr::bad_request("voice_metadata must be an object"));
        }
        Some(meta) => meta,
        None => serde_json::Value::Object(serde_json::Map::new()),
    };
    let detail = insert_task(&db, &user, req.task, Some(metadata))?;
    Ok((StatusCode::CREATED, Json(detail)))
}

// ---------------------------------------------------------------------------
// Listings
// ---------------------------------------------------------------------------

/// GET /api/v1/tasks — paginated, filtered and sorted listing.
pub async fn list(
    State(db): State<Db>,
    user: AuthUser,
    Query(q): Query<TaskListQuery>,
) -> Result<Json<TaskListResponse>, ApiErr> {
    let sort = TaskSort::parse(q.sort_by.as_deref())?;
    let due_from = normalize_due_date(q.due_date_from.as_deref())?;
    let due_to = normalize_due_date(q.due_date_to.as_deref())?;
    let filter = db::tasks::ListFilter {
        status: q.status,
        priority: q.priority,
        search: q.search.as_deref().map(str::trim).filter(|s| !s.is_empty()),
        due_from: due_from.as_deref(),
        due_to: due_to.as_deref(),
        sort,
        ascending: service::is_ascending(q.sort_order, SortOrder::Desc),
        page: q.page,
        limit: q.limit,
    };
    let built = db::tasks::list(&user.user_id, &filter);

    let conn = db.conn();
    let total: i64 = sq_query_row(&conn, built.count_query, |row| row.get(0))
        .map_err(ApiErr::from_db("count tasks"))?;
    let tasks = sq_query_map(&conn, built.select_query, task_from_row)
        .map_err(ApiErr::from_db("list tasks"))?;

    Ok(Json(TaskListResponse {
        tasks: with_stakeholders(&conn, tasks)?,
        pagination: Pagination::new(built.page, built.limit, total),
    }))
}

/// GET /api/v1/tasks/stats — live task count per status.
pub async fn stats(
    State(db): State<Db>,
    user: AuthUser,
) -> Result<Json<TaskStatsResponse>, ApiErr> {
    let conn = db.conn();
    let rows: Vec<(String, i64)> = sq_query_map(
        &conn,
        db::tasks::count_by_status(&user.user_id),
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .map_err(ApiErr::from_db("count tasks by status"))?;

    let mut by_status: BTreeMap<TaskStatus, i64> =
        TaskStatus::ALL.iter().map(|s| (*s, 0)).collect();
    for (status, count) in rows {
        if let Some(status) = TaskStatus::parse(&status) {
            by_status.insert(status, count);
        }
    }
    let total = by_status.values().sum();
    Ok(Json(TaskStatsResponse { by_status, total }))
}

/// GET /api/v1/tasks/overdue — open tasks past due. Flips them to OVERDUE.
pub async fn overdue(
    State(db): State<Db>,
    user: AuthUser,
) -> Result<Json<Vec<TaskWithStakeholders>>, ApiErr> {
    let now = service::now_ts();
    let conn = db.conn();
    let flipped = sq_execute(&conn, db::tasks::mark_overdue(&user.user_id, &now))
        .map_err(ApiErr::from_db("mark overdue"))?;
    if flipped > 0 {
        tracing::debug!("marked {flipped} tasks overdue for {}", user.user_id);
    }
    let tasks = sq_query_map(&conn, db::tasks::overdue(&user.user_id, &now), task_from_row)
        .map_err(ApiErr::from_db("list overdue tasks"))?;
    Ok(Json(with_stakeholders(&conn, tasks)?))
}

/// GET /api/v1/tasks/upcoming — open tasks due within the next `days` days.
pub async fn upcoming(
    State(db): State<Db>,
    user: AuthUser,
    Query(q): Query<UpcomingQuery>,
) -> Result<Json<Vec<TaskWithStakeholders>>, ApiErr> {
    let (from, to) = service::upcoming_window(Utc::now(), q.days);
    let conn = db.conn();
    let tasks = sq_query_map(
        &conn,
        db::tasks::upcoming(&user.user_id, &from, &to),
        task_from_row,
    )
    .map_err(ApiErr::from_db("list upcoming tasks"))?;
    Ok(Json(with_stakeholders(&conn, tasks)?))
}

// ---------------------------------------------------------------------------
// Single task
// ---------------------------------------------------------------------------

/// GET /api/v1/tasks/{id}
pub async fn get(
    State(db): State<Db>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<TaskDetail>, ApiErr> {
    let conn = db.conn();
    Ok(Json(load_detail(&conn, &id, &user.user_id)?))
}

/// PATCH /api/v1/tasks/{id} — partial update. Blank description or due date
/// clears the field; `stakeholder_ids` replaces the whole link set.
pub async fn update(
    State(db): State<Db>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateTaskRequest>,
) -> Result<Json<TaskDetail>, ApiErr> {
    let now = service::now_ts();
    let mut patch = db::tasks::TaskPatch {
        priority: req.priority,
        ..Default::default()
    };
    if let Some(title) = req.title.as_deref() {
        patch.title = Some(service::validate_required("title", title, TITLE_MAX)?);
    }
    if let Some(description) = req.description.as_deref() {
        patch.description = Some(service::validate_optional(
            "description",
            Some(description),
            DESCRIPTION_MAX,
        )?);
    }
    if let Some(status) = req.status {
        patch.status = Some(status);
        patch.completed_at = Some(service::completed_at_for(status, &now));
    }
    if let Some(due_date) = req.due_date.as_deref() {
        patch.due_date = Some(normalize_due_date(Some(due_date))?);
    }

    let mut conn = db.conn();
    load_task(&conn, &id, &user.user_id)?;
    let stakeholder_ids = req
        .stakeholder_ids
        .as_deref()
        .map(|ids| checked_stakeholder_ids(&conn, &user.user_id, ids))
        .transpose()?;

    let tx = conn
        .transaction()
        .map_err(ApiErr::from_db("begin update task"))?;
    sq_execute(&tx, db::tasks::update(&id, &user.user_id, &patch, &now))
        .map_err(ApiErr::from_db("update task"))?;
    if let Some(ids) = &stakeholder_ids {
        replace_links(&tx, &id, ids)?;
    }
    tx.commit().map_err(ApiErr::from_db("commit update task"))?;

    Ok(Json(load_detail(&conn, &id, &user.user_id)?))
}

/// DELETE /api/v1/tasks/{id} — soft delete.
pub async fn delete(
    State(db): State<Db>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiErr> {
    let conn = db.conn();
    let affected = sq_execute(
        &conn,
        db::tasks::soft_delete(&id, &user.user_id, &service::now_ts()),
    )
    .map_err(ApiErr::from_db("delete task"))?;
    if affected == 0 {
        return Err(ApiErr::not_found("task not found"));
    }
    Ok(Json(MessageResponse::new("task deleted")))
}
