use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use rusqlite::Connection;
use uuid::Uuid;

use taskflow_api::service::{
    self, ContactFields, ImportAction, NAME_MAX, ORGANIZATION_MAX, StakeholderSort,
};
use taskflow_api::{
    BulkCreateStakeholdersRequest, BulkImportResponse, ContactSearchQuery,
    CreateStakeholderRequest, MessageResponse, Pagination, SortOrder, Stakeholder,
    StakeholderDetail, StakeholderListQuery, StakeholderListResponse, StakeholderStats, Task,
    UpdateStakeholderRequest, db,
};

use crate::error::ApiErr;
use crate::routes::auth::AuthUser;
use crate::storage::{
    Db, log_from_row, sq_execute, sq_query_map, sq_query_row, stakeholder_from_row,
    stakeholder_summary_from_row, task_from_row,
};

const DETAIL_LOG_LIMIT: u64 = 10;

fn load_stakeholder(conn: &Connection, id: &str, user_id: &str) -> Result<Stakeholder, ApiErr> {
    sq_query_row(conn, db::stakeholders::get(id, user_id), stakeholder_from_row)
        .map_err(ApiErr::missing_or_db("stakeholder not found", "get stakeholder"))
}

fn tags_json(tags: &[String]) -> Result<String, ApiErr> {
    serde_json::to_string(tags).map_err(ApiErr::from_db("encode tags"))
}

fn insert_contact(
    conn: &Connection,
    user_id: &str,
    fields: &ContactFields,
    now: &str,
) -> Result<String, ApiErr> {
    let id = Uuid::new_v4().to_string();
    let tags = tags_json(&fields.tags)?;
    sq_execute(
        conn,
        db::stakeholders::insert(&db::stakeholders::InsertParams {
            id: &id,
            user_id,
            first_name: &fields.first_name,
            last_name: &fields.last_name,
            email: fields.email.as_deref(),
            phone: fields.phone.as_deref(),
            organization: fields.organization.as_deref(),
            tags: &tags,
            now,
        }),
    )
    .map_err(ApiErr::from_db("insert stakeholder"))?;
    Ok(id)
}

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

/// POST /api/v1/stakeholders
pub async fn create(
    State(db): State<Db>,
    user: AuthUser,
    Json(req): Json<CreateStakeholderRequest>,
) -> Result<(StatusCode, Json<Stakeholder>), ApiErr> {
    let fields = ContactFields::validate(&req)?;
    let conn = db.conn();
    let id = insert_contact(&conn, &user.user_id, &fields, &service::now_ts())?;
    let stakeholder = load_stakeholder(&conn, &id, &user.user_id)?;
    Ok((StatusCode::CREATED, Json(stakeholder)))
}

/// POST /api/v1/stakeholders/bulk — contact import.
///
/// Entries are matched by email, then phone, against live contacts and the
/// rest of the batch; matches are merged instead of duplicated. Invalid
/// entries come back in `skipped` and do not abort the import.
pub async fn bulk_create(
    State(db): State<Db>,
    user: AuthUser,
    Json(req): Json<BulkCreateStakeholdersRequest>,
) -> Result<Json<BulkImportResponse>, ApiErr> {
    if req.stakeholders.is_empty() {
        return Err(ApiErr::bad_request("stakeholders must not be empty"));
    }
    let now = service::now_ts();
    let mut conn = db.conn();
    let existing = sq_query_map(
        &conn,
        db::stakeholders::all_live(&user.user_id),
        stakeholder_from_row,
    )
    .map_err(ApiErr::from_db("load stakeholders"))?;
    let plan = service::plan_bulk_import(&existing, &req.stakeholders);

    let tx = conn
        .transaction()
        .map_err(ApiErr::from_db("begin import"))?;
    let mut created_ids = Vec::new();
    let mut updated_ids = Vec::new();
    for action in &plan.actions {
        match action {
            ImportAction::Create(fields) => {
                created_ids.push(insert_contact(&tx, &user.user_id, fields, &now)?);
            }
            ImportAction::Update {
                stakeholder_id,
                fields,
            } => {
                let patch = db::stakeholders::StakeholderPatch {
                    first_name: Some(fields.first_name.clone()),
                    last_name: Some(fields.last_name.clone()),
                    email: Some(fields.email.clone()),
                    phone: Some(fields.phone.clone()),
                    organization: Some(fields.organization.clone()),
                    tags: Some(tags_json(&fields.tags)?),
                };
                sq_execute(
                    &tx,
                    db::stakeholders::update(stakeholder_id, &user.user_id, &patch, &now),
                )
                .map_err(ApiErr::from_db("merge stakeholder"))?;
                updated_ids.push(stakeholder_id.clone());
            }
        }
    }
    tx.commit().map_err(ApiErr::from_db("commit import"))?;

    let reload = |ids: &[String]| -> Result<Vec<Stakeholder>, ApiErr> {
        ids.iter()
            .map(|id| load_stakeholder(&conn, id, &user.user_id))
            .collect()
    };
    let response = BulkImportResponse {
        created: reload(&created_ids)?,
        updated: reload(&updated_ids)?,
        skipped: plan.skipped,
    };
    tracing::info!(
        "contact import for {}: {} created, {} updated, {} skipped",
        user.user_id,
        response.created.len(),
        response.updated.len(),
        response.skipped.len()
    );
    Ok(Json(response))
}

// ---------------------------------------------------------------------------
// Listings
// ---------------------------------------------------------------------------

/// GET /api/v1/stakeholders
pub async fn list(
    State(db): State<Db>,
    user: AuthUser,
    Query(q): Query<StakeholderListQuery>,
) -> Result<Json<StakeholderListResponse>, ApiErr> {
    let sort = StakeholderSort::parse(q.sort_by.as_deref())?;
    let tags = service::parse_tag_filter(q.tags.as_deref());
    let filter = db::stakeholders::ListFilter {
        search: q.search.as_deref().map(str::trim).filter(|s| !s.is_empty()),
        organization: q
            .organization
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty()),
        tags: &tags,
        sort,
        ascending: service::is_ascending(q.sort_order, SortOrder::Desc),
        page: q.page,
        limit: q.limit,
    };
    let built = db::stakeholders::list(&user.user_id, &filter);

    let conn = db.conn();
    let total: i64 = sq_query_row(&conn, built.count_query, |row| row.get(0))
        .map_err(ApiErr::from_db("count stakeholders"))?;
    let stakeholders = sq_query_map(&conn, built.select_query, stakeholder_summary_from_row)
        .map_err(ApiErr::from_db("list stakeholders"))?;

    Ok(Json(StakeholderListResponse {
        stakeholders,
        pagination: Pagination::new(built.page, built.limit, total),
    }))
}

/// GET /api/v1/stakeholders/tags
pub async fn tags(State(db): State<Db>, user: AuthUser) -> Result<Json<Vec<String>>, ApiErr> {
    let conn = db.conn();
    let raw: Vec<String> = sq_query_map(&conn, db::stakeholders::tag_lists(&user.user_id), |row| {
        row.get(0)
    })
    .map_err(ApiErr::from_db("load tags"))?;
    let lists = raw.iter().map(|json| {
        serde_json::from_str::<Vec<String>>(json).unwrap_or_else(|e| {
            tracing::warn!("ignoring malformed tag list: {e}");
            Vec::new()
        })
    });
    Ok(Json(service::collect_tags(lists)))
}

/// GET /api/v1/stakeholders/organizations
pub async fn organizations(
    State(db): State<Db>,
    user: AuthUser,
) -> Result<Json<Vec<String>>, ApiErr> {
    let conn = db.conn();
    let orgs = sq_query_map(
        &conn,
        db::stakeholders::organizations(&user.user_id),
        |row| row.get(0),
    )
    .map_err(ApiErr::from_db("load organizations"))?;
    Ok(Json(orgs))
}

/// GET /api/v1/stakeholders/search?contact= — exact email or phone match.
pub async fn search_by_contact(
    State(db): State<Db>,
    user: AuthUser,
    Query(q): Query<ContactSearchQuery>,
) -> Result<Json<Vec<Stakeholder>>, ApiErr> {
    let contact = q.contact.trim();
    if contact.is_empty() {
        return Err(ApiErr::bad_request("contact is required"));
    }
    // Stored phones are normalized, so normalize the probe the same way.
    let phone = service::validate_phone(contact).unwrap_or_else(|_| contact.to_string());
    let conn = db.conn();
    let found = sq_query_map(
        &conn,
        db::stakeholders::find_by_contact(&user.user_id, &contact.to_lowercase(), &phone),
        stakeholder_from_row,
    )
    .map_err(ApiErr::from_db("search stakeholders"))?;
    Ok(Json(found))
}

// ---------------------------------------------------------------------------
// Single stakeholder
// ---------------------------------------------------------------------------

/// GET /api/v1/stakeholders/{id} — contact plus linked tasks and recent deliveries.
pub async fn get(
    State(db): State<Db>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<StakeholderDetail>, ApiErr> {
    let conn = db.conn();
    let stakeholder = load_stakeholder(&conn, &id, &user.user_id)?;
    let tasks = sq_query_map(
        &conn,
        db::tasks::for_stakeholder(&id, &user.user_id),
        task_from_row,
    )
    .map_err(ApiErr::from_db("load stakeholder tasks"))?;
    let reminder_logs = sq_query_map(
        &conn,
        db::reminders::logs_for_stakeholder(&id, &user.user_id, DETAIL_LOG_LIMIT),
        log_from_row,
    )
    .map_err(ApiErr::from_db("load stakeholder logs"))?;

    Ok(Json(StakeholderDetail {
        stakeholder,
        tasks,
        reminder_logs,
    }))
}

/// GET /api/v1/stakeholders/{id}/tasks
pub async fn tasks(
    State(db): State<Db>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Vec<Task>>, ApiErr> {
    let conn = db.conn();
    load_stakeholder(&conn, &id, &user.user_id)?;
    let tasks = sq_query_map(
        &conn,
        db::tasks::for_stakeholder(&id, &user.user_id),
        task_from_row,
    )
    .map_err(ApiErr::from_db("load stakeholder tasks"))?;
    Ok(Json(tasks))
}

/// GET /api/v1/stakeholders/{id}/stats
pub async fn stats(
    State(db): State<Db>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<StakeholderStats>, ApiErr> {
    let conn = db.conn();
    load_stakeholder(&conn, &id, &user.user_id)?;
    let (total_tasks, completed_tasks, pending_tasks, overdue_tasks) = sq_query_row(
        &conn,
        db::tasks::stakeholder_stats(&id, &user.user_id, &service::now_ts()),
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
    )
    .map_err(ApiErr::from_db("stakeholder stats"))?;

    Ok(Json(StakeholderStats {
        total_tasks,
        completed_tasks,
        pending_tasks,
        overdue_tasks,
        completion_rate: service::rate(completed_tasks, total_tasks),
    }))
}

/// PATCH /api/v1/stakeholders/{id} — blank optional fields clear them.
pub async fn update(
    State(db): State<Db>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateStakeholderRequest>,
) -> Result<Json<Stakeholder>, ApiErr> {
    let patch = db::stakeholders::StakeholderPatch {
        first_name: req
            .first_name
            .as_deref()
            .map(|v| service::validate_required("first_name", v, NAME_MAX))
            .transpose()?,
        last_name: req
            .last_name
            .as_deref()
            .map(|v| service::validate_required("last_name", v, NAME_MAX))
            .transpose()?,
        email: req
            .email
            .as_deref()
            .map(|v| service::validate_optional_email(Some(v)))
            .transpose()?,
        phone: req
            .phone
            .as_deref()
            .map(|v| service::validate_optional_phone(Some(v)))
            .transpose()?,
        organization: req
            .organization
            .as_deref()
            .map(|v| service::validate_optional("organization", Some(v), ORGANIZATION_MAX))
            .transpose()?,
        tags: req
            .tags
            .as_deref()
            .map(service::normalize_tags)
            .transpose()?
            .map(|tags| tags_json(&tags))
            .transpose()?,
    };

    let conn = db.conn();
    let affected = sq_execute(
        &conn,
        db::stakeholders::update(&id, &user.user_id, &patch, &service::now_ts()),
    )
    .map_err(ApiErr::from_db("update stakeholder"))?;
    if affected == 0 {
        return Err(ApiErr::not_found("stakeholder not found"));
    }
    Ok(Json(load_stakeholder(&conn, &id, &user.user_id)?))
}

/// DELETE /api/v1/stakeholders/{id} — soft delete.
pub async fn delete(
    State(db): State<Db>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiErr> {
    let conn = db.conn();
    let affected = sq_execute(
        &conn,
        db::stakeholders::soft_delete(&id, &user.user_id, &service::now_ts()),
    )
    .map_err(ApiErr::from_db("delete stakeholder"))?;
    if affected == 0 {
        return Err(ApiErr::not_found("stakeholder not found"));
    }
    Ok(Json(MessageResponse::new("stakeholder deleted")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestApp;
    use taskflow_api::TaskStatus;

    fn contact(first: &str, email: Option<&str>, phone: Option<&str>) -> CreateStakeholderRequest {
        CreateStakeholderRequest {
            first_name: first.into(),
            last_name: "Doe".into(),
            email: email.map(Into::into),
            phone: phone.map(Into::into),
            organization: None,
            tags: None,
        }
    }

    #[tokio::test]
    async fn create_normalizes_contact_fields() {
        let app = TestApp::new();
        let user = app.user("owner@example.com");
        let (status, Json(created)) = create(
            State(app.db.clone()),
            user,
            Json(CreateStakeholderRequest {
                organization: Some("  Acme ".into()),
                tags: Some(vec!["vip".into(), " vip ".into(), "".into()]),
                ..contact("Jane", Some("Jane@Example.com"), Some("+91 98765 43210"))
            }),
        )
        .await
        .expect("create");
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created.email.as_deref(), Some("jane@example.com"));
        assert_eq!(created.phone.as_deref(), Some("+919876543210"));
        assert_eq!(created.organization.as_deref(), Some("Acme"));
        assert_eq!(created.tags, vec!["vip".to_string()]);
    }

    #[tokio::test]
    async fn bulk_import_never_duplicates_an_email() {
        let app = TestApp::new();
        let user = app.user("owner@example.com");
        let existing = app.stakeholder(&user, "Old", Some("known@example.com"), None);

        let Json(result) = bulk_create(
            State(app.db.clone()),
            user.clone(),
            Json(BulkCreateStakeholdersRequest {
                stakeholders: vec![
                    contact("Known", Some("KNOWN@example.com"), None),
                    contact("New", Some("new@example.com"), None),
                    contact("Again", Some("new@example.com"), Some("+919876543210")),
                    contact("", Some("bad@example.com"), None),
                ],
            }),
        )
        .await
        .expect("bulk import");

        assert_eq!(result.created.len(), 1);
        assert_eq!(result.created[0].phone.as_deref(), Some("+919876543210"));
        assert_eq!(result.updated.len(), 1);
        assert_eq!(result.updated[0].id, existing.id);
        assert_eq!(result.updated[0].first_name, "Known");
        let skipped: Vec<u32> = result.skipped.iter().map(|s| s.index).collect();
        assert_eq!(skipped, vec![2, 3]);

        let Json(listing) = list(
            State(app.db.clone()),
            user,
            Query(StakeholderListQuery {
                page: 1,
                limit: 50,
                ..Default::default()
            }),
        )
        .await
        .expect("list");
        assert_eq!(listing.pagination.total, 2);
    }

    #[tokio::test]
    async fn listing_counts_only_live_tasks() {
        let app = TestApp::new();
        let user = app.user("owner@example.com");
        let bob = app.stakeholder(&user, "Bob", None, None);
        let live = app.task(&user, "live", None);
        let gone = app.task(&user, "gone", None);
        app.link(&live, &bob);
        app.link(&gone, &bob);
        {
            let conn = app.db.conn();
            sq_execute(
                &conn,
                db::tasks::soft_delete(&gone.id, &user.user_id, &service::now_ts()),
            )
            .expect("delete task");
        }

        let Json(listing) = list(
            State(app.db.clone()),
            user.clone(),
            Query(StakeholderListQuery {
                page: 1,
                limit: 10,
                ..Default::default()
            }),
        )
        .await
        .expect("list");
        assert_eq!(listing.stakeholders[0].task_count, 1);

        let Json(linked) = tasks(State(app.db.clone()), user, Path(bob.id))
            .await
            .expect("tasks");
        assert_eq!(linked.len(), 1);
        assert_eq!(linked[0].id, live.id);
    }

    #[tokio::test]
    async fn tags_and_organizations_are_sorted_and_unique() {
        let app = TestApp::new();
        let user = app.user("owner@example.com");
        for (name, org, tags) in [
            ("A", Some("Zeta"), vec!["team", "vip"]),
            ("B", Some("Acme"), vec!["vip"]),
            ("C", None, vec!["alpha"]),
        ] {
            let (_, Json(_)) = create(
                State(app.db.clone()),
                user.clone(),
                Json(CreateStakeholderRequest {
                    organization: org.map(Into::into),
                    tags: Some(tags.into_iter().map(Into::into).collect()),
                    ..contact(name, None, None)
                }),
            )
            .await
            .expect("create");
        }

        let Json(all_tags) = tags(State(app.db.clone()), user.clone())
            .await
            .expect("tags");
        assert_eq!(all_tags, vec!["alpha", "team", "vip"]);
        let Json(orgs) = organizations(State(app.db.clone()), user)
            .await
            .expect("organizations");
        assert_eq!(orgs, vec!["Acme", "Zeta"]);
    }

    #[tokio::test]
    async fn contact_search_matches_email_case_insensitively() {
        let app = TestApp::new();
        let user = app.user("owner@example.com");
        let jane = app.stakeholder(&user, "Jane", Some("jane@example.com"), None);
        let phil = app.stakeholder(&user, "Phil", None, Some("+919876543210"));

        let Json(by_email) = search_by_contact(
            State(app.db.clone()),
            user.clone(),
            Query(ContactSearchQuery {
                contact: "JANE@example.com".into(),
            }),
        )
        .await
        .expect("search");
        assert_eq!(by_email.len(), 1);
        assert_eq!(by_email[0].id, jane.id);

        let Json(by_phone) = search_by_contact(
            State(app.db.clone()),
            user,
            Query(ContactSearchQuery {
                contact: "+91 98765 43210".into(),
            }),
        )
        .await
        .expect("search");
        assert_eq!(by_phone.len(), 1);
        assert_eq!(by_phone[0].id, phil.id);
    }

    #[tokio::test]
    async fn stats_keep_overdue_out_of_pending() {
        let app = TestApp::new();
        let user = app.user("owner@example.com");
        let bob = app.stakeholder(&user, "Bob", None, None);
        let late = app.task(&user, "late", Some("2020-01-01T00:00:00Z"));
        let done = app.task(&user, "done", None);
        let open = app.task(&user, "open", None);
        let later = app.task(&user, "later", Some("2999-01-01T00:00:00Z"));
        for task in [&late, &done, &open, &later] {
            app.link(task, &bob);
        }
        {
            let conn = app.db.conn();
            let patch = db::tasks::TaskPatch {
                status: Some(TaskStatus::Completed),
                ..Default::default()
            };
            sq_execute(
                &conn,
                db::tasks::update(&done.id, &user.user_id, &patch, &service::now_ts()),
            )
            .expect("complete");
        }

        let Json(stats) = stats(State(app.db.clone()), user, Path(bob.id))
            .await
            .expect("stats");
        assert_eq!(stats.total_tasks, 4);
        assert_eq!(stats.completed_tasks, 1);
        assert_eq!(stats.pending_tasks, 2);
        assert_eq!(stats.overdue_tasks, 1);
        assert_eq!(
            stats.completed_tasks + stats.pending_tasks + stats.overdue_tasks,
            stats.total_tasks
        );
        assert_eq!(stats.completion_rate, 25.0);
    }

    #[tokio::test]
    async fn deleted_stakeholders_disappear() {
        let app = TestApp::new();
        let user = app.user("owner@example.com");
        let bob = app.stakeholder(&user, "Bob", None, None);

        let Json(_) = delete(State(app.db.clone()), user.clone(), Path(bob.id.clone()))
            .await
            .expect("delete");
        let err = get(State(app.db.clone()), user.clone(), Path(bob.id.clone()))
            .await
            .expect_err("gone");
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        let err = delete(State(app.db.clone()), user, Path(bob.id))
            .await
            .expect_err("already gone");
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn update_clears_blank_fields() {
        let app = TestApp::new();
        let user = app.user("owner@example.com");
        let bob = app.stakeholder(&user, "Bob", Some("bob@example.com"), None);

        let Json(updated) = update(
            State(app.db.clone()),
            user,
            Path(bob.id),
            Json(UpdateStakeholderRequest {
                last_name: Some("Builder".into()),
                email: Some("  ".into()),
                ..Default::default()
            }),
        )
        .await
        .expect("update");
        assert_eq!(updated.last_name, "Builder");
        assert!(updated.email.is_none());
    }
}
