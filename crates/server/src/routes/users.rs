use axum::{Json, extract::State};
use rusqlite::OptionalExtension;

use taskflow_api::service::{self, NAME_MAX};
use taskflow_api::{MessageResponse, UpdateUserRequest, UserProfile, UserStats, db};

use crate::error::ApiErr;
use crate::routes::auth::AuthUser;
use crate::storage::{Db, is_constraint_violation, sq_execute, sq_query_row, user_from_row};

/// GET /api/v1/users/me — the caller's profile.
pub async fn me(user: AuthUser) -> Json<UserProfile> {
    Json(user.profile)
}

/// PATCH /api/v1/users/me — update name or phone. A blank phone clears it.
pub async fn update_me(
    State(db): State<Db>,
    user: AuthUser,
    Json(req): Json<UpdateUserRequest>,
) -> Result<Json<UserProfile>, ApiErr> {
    let first_name = req
        .first_name
        .as_deref()
        .map(|v| service::validate_required("first_name", v, NAME_MAX))
        .transpose()?;
    let last_name = req
        .last_name
        .as_deref()
        .map(|v| service::validate_required("last_name", v, NAME_MAX))
        .transpose()?;
    // Re-submitting the current number must not reset its verification.
    let phone = req
        .phone
        .as_deref()
        .map(|raw| service::validate_optional_phone(Some(raw)))
        .transpose()?
        .filter(|phone| phone.as_deref() != user.profile.phone.as_deref());

    let conn = db.conn();
    if let Some(Some(phone)) = &phone {
        let taken: bool = sq_query_row(
            &conn,
            db::users::phone_exists(phone, Some(&user.user_id)),
            |row| row.get(0),
        )
        .map_err(ApiErr::from_db("check phone"))?;
        if taken {
            return Err(ApiErr::conflict("phone number already registered"));
        }
    }

    let patch = db::users::ProfilePatch {
        phone: phone.as_ref().map(|p| p.as_deref()),
        first_name: first_name.as_deref(),
        last_name: last_name.as_deref(),
    };
    sq_execute(
        &conn,
        db::users::update_profile(&user.user_id, &patch, &service::now_ts()),
    )
    .map_err(|e| {
        if is_constraint_violation(&e) {
            ApiErr::conflict("phone number already registered")
        } else {
            ApiErr::from_db("update profile")(e)
        }
    })?;

    let profile = sq_query_row(&conn, db::users::get_active(&user.user_id), user_from_row)
        .map_err(ApiErr::from_db("reload profile"))?;
    Ok(Json(profile))
}

/// DELETE /api/v1/users/me — deactivate the account and revoke its sessions.
pub async fn delete_me(
    State(db): State<Db>,
    user: AuthUser,
) -> Result<Json<MessageResponse>, ApiErr> {
    let now = service::now_ts();
    let mut conn = db.conn();
    let tx = conn
        .transaction()
        .map_err(ApiErr::from_db("begin deactivate"))?;
    sq_execute(&tx, db::users::deactivate(&user.user_id, &now))
        .map_err(ApiErr::from_db("deactivate user"))?;
    sq_execute(&tx, db::users::delete_refresh_tokens_for_user(&user.user_id))
        .map_err(ApiErr::from_db("revoke refresh tokens"))?;
    tx.commit().map_err(ApiErr::from_db("commit deactivate"))?;

    tracing::info!("deactivated user {}", user.user_id);
    Ok(Json(MessageResponse::new("account deactivated")))
}

/// GET /api/v1/users/me/stats — dashboard counters.
pub async fn stats(State(db): State<Db>, user: AuthUser) -> Result<Json<UserStats>, ApiErr> {
    let conn = db.conn();
    let counts: Option<(i64, i64, i64, i64)> =
        sq_query_row(&conn, db::users::stats(&user.user_id), |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })
        .optional()
        .map_err(ApiErr::from_db("user stats"))?;
    let (total_tasks, completed_tasks, pending_tasks, total_stakeholders) =
        counts.unwrap_or_default();

    Ok(Json(UserStats {
        total_tasks,
        completed_tasks,
        pending_tasks,
        total_stakeholders,
        completion_rate: service::rate(completed_tasks, total_tasks),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestApp;
    use axum::http::StatusCode;
    use taskflow_api::crypto;

    #[tokio::test]
    async fn profile_update_changes_names_and_phone() {
        let app = TestApp::new();
        let user = app.user("ada@example.com");

        let Json(updated) = update_me(
            State(app.db.clone()),
            user,
            Json(UpdateUserRequest {
                first_name: Some("  Ada ".into()),
                phone: Some("+91 98765 43210".into()),
                ..Default::default()
            }),
        )
        .await
        .expect("update");
        assert_eq!(updated.first_name, "Ada");
        assert_eq!(updated.last_name, "User");
        assert_eq!(updated.phone.as_deref(), Some("+919876543210"));
        assert!(!updated.is_phone_verified);
    }

    #[tokio::test]
    async fn taken_phone_is_a_conflict() {
        let app = TestApp::new();
        let first = app.user("first@example.com");
        let second = app.user("second@example.com");
        let Json(_) = update_me(
            State(app.db.clone()),
            first,
            Json(UpdateUserRequest {
                phone: Some("+919876543210".into()),
                ..Default::default()
            }),
        )
        .await
        .expect("first claims the number");

        let err = update_me(
            State(app.db.clone()),
            second,
            Json(UpdateUserRequest {
                phone: Some("+919876543210".into()),
                ..Default::default()
            }),
        )
        .await
        .expect_err("number taken");
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn deactivated_accounts_fail_authentication() {
        let app = TestApp::new();
        let user = app.user("gone@example.com");
        let token = crypto::sign_jwt(&user.user_id, &app.config.jwt_secret, service::now_unix());
        app.extract_user(&token).await.expect("active user authenticates");

        let Json(_) = delete_me(State(app.db.clone()), user)
            .await
            .expect("deactivate");
        let err = app
            .extract_user(&token)
            .await
            .expect_err("deactivated user rejected");
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn stats_ignore_deleted_tasks() {
        let app = TestApp::new();
        let user = app.user("stats@example.com");
        app.task(&user, "one", None);
        let doomed = app.task(&user, "two", None);
        app.stakeholder(&user, "Bob", None, None);
        {
            let conn = app.db.conn();
            sq_execute(
                &conn,
                db::tasks::soft_delete(&doomed.id, &user.user_id, &service::now_ts()),
            )
            .expect("delete");
        }

        let Json(stats) = stats(State(app.db.clone()), user).await.expect("stats");
        assert_eq!(stats.total_tasks, 1);
        assert_eq!(stats.pending_tasks, 1);
        assert_eq!(stats.completed_tasks, 0);
        assert_eq!(stats.total_stakeholders, 1);
        assert_eq!(stats.completion_rate, 0.0);
    }
}
