use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use taskflow_api::service::{self, DESCRIPTION_MAX, DateRange, LOCATION_MAX, TITLE_MAX};
use taskflow_api::{
    CalendarEventWithTask, CalendarQuery, CreateCalendarEventRequest, DayQuery, DayView,
    MessageResponse, MonthView, UpdateCalendarEventRequest, WeekQuery, WeekView, db,
};

use crate::error::ApiErr;
use crate::routes::auth::AuthUser;
use crate::routes::tasks::load_task;
use crate::storage::{Db, event_with_task_from_row, sq_execute, sq_query_map, sq_query_row};

fn load_event(conn: &Connection, id: &str, user_id: &str) -> Result<CalendarEventWithTask, ApiErr> {
    sq_query_row(conn, db::calendar::get(id, user_id), event_with_task_from_row)
        .map_err(ApiErr::missing_or_db("event not found", "get event"))
}

fn events_in(
    conn: &Connection,
    user_id: &str,
    range: &DateRange,
) -> Result<Vec<CalendarEventWithTask>, ApiErr> {
    sq_query_map(
        conn,
        db::calendar::overlapping(user_id, Some(&range.start), Some(&range.end), None),
        event_with_task_from_row,
    )
    .map_err(ApiErr::from_db("load events"))
}

fn count(events: usize) -> u32 {
    u32::try_from(events).unwrap_or(u32::MAX)
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// POST /api/v1/calendar/events
pub async fn create(
    State(db): State<Db>,
    user: AuthUser,
    Json(req): Json<CreateCalendarEventRequest>,
) -> Result<(StatusCode, Json<CalendarEventWithTask>), ApiErr> {
    let title = service::validate_required("title", &req.title, TITLE_MAX)?;
    let description =
        service::validate_optional("description", req.description.as_deref(), DESCRIPTION_MAX)?;
    let location = service::validate_optional("location", req.location.as_deref(), LOCATION_MAX)?;
    let start_date = service::normalize_datetime("start_date", &req.start_date)?;
    let end_date = service::normalize_datetime("end_date", &req.end_date)?;
    service::validate_event_range(&start_date, &end_date)?;
    let task_id = req.task_id.as_deref().filter(|id| !id.is_empty());

    let id = Uuid::new_v4().to_string();
    let conn = db.conn();
    if let Some(task_id) = task_id {
        load_task(&conn, task_id, &user.user_id)?;
    }
    sq_execute(
        &conn,
        db::calendar::insert(&db::calendar::InsertParams {
            id: &id,
            user_id: &user.user_id,
            task_id,
            title: &title,
            description: description.as_deref(),
            start_date: &start_date,
            end_date: &end_date,
            is_all_day: req.is_all_day.unwrap_or(false),
            location: location.as_deref(),
            now: &service::now_ts(),
        }),
    )
    .map_err(ApiErr::from_db("insert event"))?;

    Ok((StatusCode::CREATED, Json(load_event(&conn, &id, &user.user_id)?)))
}

/// GET /api/v1/calendar/events — events overlapping the requested window.
pub async fn list(
    State(db): State<Db>,
    user: AuthUser,
    Query(q): Query<CalendarQuery>,
) -> Result<Json<Vec<CalendarEventWithTask>>, ApiErr> {
    let (start, end) = service::listing_range(q.start_date.as_deref(), q.end_date.as_deref())?;
    let conn = db.conn();
    let events = sq_query_map(
        &conn,
        db::calendar::overlapping(
            &user.user_id,
            start.as_deref(),
            end.as_deref(),
            q.task_id.as_deref().filter(|id| !id.is_empty()),
        ),
        event_with_task_from_row,
    )
    .map_err(ApiErr::from_db("list events"))?;
    Ok(Json(events))
}

/// GET /api/v1/calendar/events/{id}
pub async fn get(
    State(db): State<Db>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<CalendarEventWithTask>, ApiErr> {
    let conn = db.conn();
    Ok(Json(load_event(&conn, &id, &user.user_id)?))
}

/// PATCH /api/v1/calendar/events/{id} — the merged window must stay ordered.
pub async fn update(
    State(db): State<Db>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateCalendarEventRequest>,
) -> Result<Json<CalendarEventWithTask>, ApiErr> {
    let patch = db::calendar::EventPatch {
        title: req
            .title
            .as_deref()
            .map(|v| service::validate_required("title", v, TITLE_MAX))
            .transpose()?,
        description: req
            .description
            .as_deref()
            .map(|v| service::validate_optional("description", Some(v), DESCRIPTION_MAX))
            .transpose()?,
        start_date: req
            .start_date
            .as_deref()
            .map(|v| service::normalize_datetime("start_date", v))
            .transpose()?,
        end_date: req
            .end_date
            .as_deref()
            .map(|v| service::normalize_datetime("end_date", v))
            .transpose()?,
        is_all_day: req.is_all_day,
        location: req
            .location
            .as_deref()
            .map(|v| service::validate_optional("location", Some(v), LOCATION_MAX))
            .transpose()?,
        // Blank unlinks the event from its task.
        task_id: req
            .task_id
            .as_deref()
            .map(|v| Some(v.trim().to_string()).filter(|v| !v.is_empty())),
    };

    let conn = db.conn();
    let current = load_event(&conn, &id, &user.user_id)?.event;
    let start = patch.start_date.as_deref().unwrap_or(&current.start_date);
    let end = patch.end_date.as_deref().unwrap_or(&current.end_date);
    service::validate_event_range(start, end)?;
    if let Some(Some(task_id)) = &patch.task_id {
        load_task(&conn, task_id, &user.user_id)?;
    }

    sq_execute(
        &conn,
        db::calendar::update(&id, &user.user_id, &patch, &service::now_ts()),
    )
    .map_err(ApiErr::from_db("update event"))?;
    Ok(Json(load_event(&conn, &id, &user.user_id)?))
}

/// DELETE /api/v1/calendar/events/{id} — hard delete.
pub async fn delete(
    State(db): State<Db>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiErr> {
    let conn = db.conn();
    let affected = sq_execute(&conn, db::calendar::delete(&id, &user.user_id))
        .map_err(ApiErr::from_db("delete event"))?;
    if affected == 0 {
        return Err(ApiErr::not_found("event not found"));
    }
    Ok(Json(MessageResponse::new("event deleted")))
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

/// GET /api/v1/calendar/month/{year}/{month} — events grouped by start day.
pub async fn month(
    State(db): State<Db>,
    user: AuthUser,
    Path((year, month)): Path<(i32, u32)>,
) -> Result<Json<MonthView>, ApiErr> {
    let range = service::month_range(year, month)?;
    let conn = db.conn();
    let events = events_in(&conn, &user.user_id, &range)?;
    let total_events = count(events.len());
    Ok(Json(MonthView {
        year,
        month,
        events: service::group_by_day(events, &range, |e| e.event.start_date.as_str()),
        total_events,
    }))
}

/// GET /api/v1/calendar/week?start_date= — seven days from `start_date`.
pub async fn week(
    State(db): State<Db>,
    user: AuthUser,
    Query(q): Query<WeekQuery>,
) -> Result<Json<WeekView>, ApiErr> {
    let range = service::week_range(&q.start_date)?;
    let conn = db.conn();
    let events = events_in(&conn, &user.user_id, &range)?;
    Ok(Json(WeekView {
        total_events: count(events.len()),
        start_date: range.start,
        end_date: range.end,
        events,
    }))
}

/// GET /api/v1/calendar/day?date=
pub async fn day(
    State(db): State<Db>,
    user: AuthUser,
    Query(q): Query<DayQuery>,
) -> Result<Json<DayView>, ApiErr> {
    let range = service::day_range(&q.date)?;
    let conn = db.conn();
    let events = events_in(&conn, &user.user_id, &range)?;
    Ok(Json(DayView {
        date: range.start.get(..10).unwrap_or(&range.start).to_string(),
        total_events: count(events.len()),
        events,
    }))
}

// ---------------------------------------------------------------------------
// Task sync
// ---------------------------------------------------------------------------

/// POST /api/v1/calendar/sync-task/{task_id} — upsert the all-day event that
/// mirrors a task's due date.
pub async fn sync_task(
    State(db): State<Db>,
    user: AuthUser,
    Path(task_id): Path<String>,
) -> Result<Json<CalendarEventWithTask>, ApiErr> {
    let conn = db.conn();
    let task = load_task(&conn, &task_id, &user.user_id)?;
    let Some(due_date) = task.due_date.as_deref() else {
        return Err(ApiErr::not_found("task has no due date"));
    };
    let window = service::all_day_window(due_date)?;
    let now = service::now_ts();

    let existing: Option<String> = sq_query_row(
        &conn,
        db::calendar::find_task_mirror(&task.id, &user.user_id),
        |row| row.get(0),
    )
    .optional()
    .map_err(ApiErr::from_db("find task event"))?;

    let event_id = match existing {
        Some(event_id) => {
            let patch = db::calendar::EventPatch {
                title: Some(task.title.clone()),
                description: Some(task.description.clone()),
                start_date: Some(window.start),
                end_date: Some(window.end),
                is_all_day: Some(true),
                ..Default::default()
            };
            sq_execute(&conn, db::calendar::update(&event_id, &user.user_id, &patch, &now))
                .map_err(ApiErr::from_db("update task event"))?;
            event_id
        }
        None => {
            let event_id = Uuid::new_v4().to_string();
            sq_execute(
                &conn,
                db::calendar::insert(&db::calendar::InsertParams {
                    id: &event_id,
                    user_id: &user.user_id,
                    task_id: Some(&task.id),
                    title: &task.title,
                    description: task.description.as_deref(),
                    start_date: &window.start,
                    end_date: &window.end,
                    is_all_day: true,
                    location: None,
                    now: &now,
                }),
            )
            .map_err(ApiErr::from_db("insert task event"))?;
            event_id
        }
    };
    tracing::debug!("synced task {} to event {event_id}", task.id);
    Ok(Json(load_event(&conn, &event_id, &user.user_id)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::test_support::TestApp;

    fn event(title: &str, start: &str, end: &str) -> CreateCalendarEventRequest {
        CreateCalendarEventRequest {
            title: title.into(),
            description: None,
            start_date: start.into(),
            end_date: end.into(),
            is_all_day: None,
            location: None,
            task_id: None,
        }
    }

    async fn add(app: &TestApp, user: &AuthUser, req: CreateCalendarEventRequest) -> String {
        let (_, Json(created)) = create(State(app.db.clone()), user.clone(), Json(req))
            .await
            .expect("create event");
        created.event.id
    }

    #[tokio::test]
    async fn end_before_start_is_rejected() {
        let app = TestApp::new();
        let user = app.user("owner@example.com");
        let err = create(
            State(app.db.clone()),
            user,
            Json(event("backwards", "2025-03-10T10:00:00Z", "2025-03-10T09:00:00Z")),
        )
        .await
        .expect_err("invalid window");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn listing_includes_events_spanning_the_boundary() {
        let app = TestApp::new();
        let user = app.user("owner@example.com");
        let spanning = add(
            &app,
            &user,
            event("offsite", "2025-02-27T09:00:00Z", "2025-03-02T17:00:00Z"),
        )
        .await;
        add(&app, &user, event("before", "2025-02-01T09:00:00Z", "2025-02-01T10:00:00Z")).await;

        let Json(events) = list(
            State(app.db.clone()),
            user,
            Query(CalendarQuery {
                start_date: Some("2025-03-01".into()),
                end_date: Some("2025-03-31".into()),
                task_id: None,
            }),
        )
        .await
        .expect("list");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.id, spanning);
    }

    #[tokio::test]
    async fn month_view_groups_by_day_and_clips_to_the_month() {
        let app = TestApp::new();
        let user = app.user("owner@example.com");
        add(&app, &user, event("spill", "2025-02-28T09:00:00Z", "2025-03-01T10:00:00Z")).await;
        add(&app, &user, event("a", "2025-03-10T09:00:00Z", "2025-03-10T10:00:00Z")).await;
        add(&app, &user, event("b", "2025-03-10T15:00:00Z", "2025-03-10T16:00:00Z")).await;
        add(&app, &user, event("april", "2025-04-01T09:00:00Z", "2025-04-01T10:00:00Z")).await;

        let Json(view) = month(State(app.db.clone()), user, Path((2025, 3)))
            .await
            .expect("month");
        assert_eq!(view.total_events, 3);
        assert_eq!(view.events["2025-03-01"].len(), 1);
        assert_eq!(view.events["2025-03-10"].len(), 2);
        assert!(!view.events.contains_key("2025-02-28"));
    }

    #[tokio::test]
    async fn month_out_of_range_is_bad_request() {
        let app = TestApp::new();
        let user = app.user("owner@example.com");
        let err = month(State(app.db.clone()), user, Path((2025, 13)))
            .await
            .expect_err("month 13");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn week_ends_on_the_seventh_day() {
        let app = TestApp::new();
        let user = app.user("owner@example.com");
        add(&app, &user, event("last", "2025-03-16T23:00:00Z", "2025-03-16T23:30:00Z")).await;
        add(&app, &user, event("next", "2025-03-17T00:00:00Z", "2025-03-17T01:00:00Z")).await;

        let Json(view) = week(
            State(app.db.clone()),
            user,
            Query(WeekQuery {
                start_date: "2025-03-10".into(),
            }),
        )
        .await
        .expect("week");
        assert_eq!(view.end_date, "2025-03-16T23:59:59Z");
        assert_eq!(view.total_events, 1);
        assert_eq!(view.events[0].event.title, "last");
    }

    #[tokio::test]
    async fn sync_task_upserts_one_all_day_event() {
        let app = TestApp::new();
        let user = app.user("owner@example.com");
        let task = app.task(&user, "launch", Some("2025-03-10T17:00:00Z"));

        let Json(first) = sync_task(State(app.db.clone()), user.clone(), Path(task.id.clone()))
            .await
            .expect("sync");
        assert!(first.event.is_all_day);
        assert_eq!(first.event.start_date, "2025-03-10T00:00:00Z");
        assert_eq!(first.event.end_date, "2025-03-10T23:59:59Z");
        assert_eq!(first.task.as_ref().map(|t| t.id.as_str()), Some(task.id.as_str()));

        let Json(second) = sync_task(State(app.db.clone()), user.clone(), Path(task.id.clone()))
            .await
            .expect("resync");
        assert_eq!(second.event.id, first.event.id);

        let Json(day_view) = day(
            State(app.db.clone()),
            user,
            Query(DayQuery {
                date: "2025-03-10".into(),
            }),
        )
        .await
        .expect("day");
        assert_eq!(day_view.date, "2025-03-10");
        assert_eq!(day_view.total_events, 1);
    }

    #[tokio::test]
    async fn sync_without_due_date_is_not_found() {
        let app = TestApp::new();
        let user = app.user("owner@example.com");
        let task = app.task(&user, "someday", None);
        let err = sync_task(State(app.db.clone()), user, Path(task.id))
            .await
            .expect_err("no due date");
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn other_users_events_are_hidden() {
        let app = TestApp::new();
        let owner = app.user("owner@example.com");
        let other = app.user("other@example.com");
        let id = add(&app, &owner, event("mine", "2025-03-10T09:00:00Z", "2025-03-10T10:00:00Z")).await;

        let err = get(State(app.db.clone()), other.clone(), Path(id.clone()))
            .await
            .expect_err("hidden");
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        let err = delete(State(app.db.clone()), other, Path(id))
            .await
            .expect_err("hidden");
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn patch_keeps_window_ordered() {
        let app = TestApp::new();
        let user = app.user("owner@example.com");
        let id = add(&app, &user, event("call", "2025-03-10T09:00:00Z", "2025-03-10T10:00:00Z")).await;

        let err = update(
            State(app.db.clone()),
            user.clone(),
            Path(id.clone()),
            Json(UpdateCalendarEventRequest {
                start_date: Some("2025-03-10T11:00:00Z".into()),
                ..Default::default()
            }),
        )
        .await
        .expect_err("start after end");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let Json(moved) = update(
            State(app.db.clone()),
            user,
            Path(id),
            Json(UpdateCalendarEventRequest {
                start_date: Some("2025-03-10T11:00:00Z".into()),
                end_date: Some("2025-03-10T12:00:00Z".into()),
                location: Some("Room 4".into()),
                ..Default::default()
            }),
        )
        .await
        .expect("move");
        assert_eq!(moved.event.start_date, "2025-03-10T11:00:00Z");
        assert_eq!(moved.event.location.as_deref(), Some("Room 4"));
    }
}
