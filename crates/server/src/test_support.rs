//! Fixtures for handler tests: an in-memory database plus rows inserted
//! straight through the query builders.

use std::time::Instant;

use axum::extract::FromRequestParts;
use axum::http::{Request, header, request::Parts};
use uuid::Uuid;

use taskflow_api::{Priority, Stakeholder, Task, db, service};

use crate::AppState;
use crate::config::AppConfig;
use crate::error::ApiErr;
use crate::notify::NotificationService;
use crate::routes::auth::AuthUser;
use crate::storage::{
    Db, init_in_memory, sq_execute, sq_query_row, stakeholder_from_row, task_from_row,
    user_from_row,
};

pub struct TestApp {
    pub db: Db,
    pub config: AppConfig,
    pub notifier: NotificationService,
}

impl TestApp {
    pub fn new() -> Self {
        let config = AppConfig::for_tests();
        Self {
            db: init_in_memory().expect("in-memory db"),
            notifier: NotificationService::new(&config).expect("notification service"),
            config,
        }
    }

    pub fn state(&self) -> AppState {
        AppState {
            db: self.db.clone(),
            config: self.config.clone(),
            notifier: self.notifier.clone(),
            started: Instant::now(),
        }
    }

    /// Active user with an unusable password, returned as an authenticated caller.
    pub fn user(&self, email: &str) -> AuthUser {
        let user_id = Uuid::new_v4().to_string();
        let conn = self.db.conn();
        sq_execute(
            &conn,
            db::users::insert(&db::users::InsertParams {
                id: &user_id,
                email,
                phone: None,
                first_name: "Test",
                last_name: "User",
                password_hash: "-",
                password_salt: "-",
            }),
        )
        .expect("insert user");
        let profile =
            sq_query_row(&conn, db::users::get_active(&user_id), user_from_row).expect("profile");
        AuthUser { user_id, profile }
    }

    pub fn task(&self, user: &AuthUser, title: &str, due_date: Option<&str>) -> Task {
        let id = Uuid::new_v4().to_string();
        let now = service::now_ts();
        let conn = self.db.conn();
        sq_execute(
            &conn,
            db::tasks::insert(&db::tasks::InsertParams {
                id: &id,
                user_id: &user.user_id,
                title,
                description: None,
                priority: Priority::Medium,
                due_date,
                is_voice_created: false,
                voice_metadata: None,
                now: &now,
            }),
        )
        .expect("insert task");
        sq_query_row(&conn, db::tasks::get(&id, &user.user_id), task_from_row).expect("task")
    }

    pub fn stakeholder(
        &self,
        user: &AuthUser,
        first_name: &str,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> Stakeholder {
        let id = Uuid::new_v4().to_string();
        let now = service::now_ts();
        let conn = self.db.conn();
        sq_execute(
            &conn,
            db::stakeholders::insert(&db::stakeholders::InsertParams {
                id: &id,
                user_id: &user.user_id,
                first_name,
                last_name: "Contact",
                email,
                phone,
                organization: None,
                tags: "[]",
                now: &now,
            }),
        )
        .expect("insert stakeholder");
        sq_query_row(
            &conn,
            db::stakeholders::get(&id, &user.user_id),
            stakeholder_from_row,
        )
        .expect("stakeholder")
    }

    pub fn link(&self, task: &Task, stakeholder: &Stakeholder) {
        let conn = self.db.conn();
        sq_execute(
            &conn,
            db::tasks::insert_link(
                &Uuid::new_v4().to_string(),
                &task.id,
                &stakeholder.id,
                "assignee",
            ),
        )
        .expect("link stakeholder");
    }

    /// Run the bearer-token extractor against this app's state.
    pub async fn extract_user(&self, token: &str) -> Result<AuthUser, ApiErr> {
        let mut parts = request_with_bearer(token);
        AuthUser::from_request_parts(&mut parts, &self.state()).await
    }
}

pub fn request_with_bearer(token: &str) -> Parts {
    let (parts, _) = Request::builder()
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(())
        .expect("request")
        .into_parts();
    parts
}
