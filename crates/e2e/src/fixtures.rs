use chrono::{Duration, SecondsFormat, Utc};
use uuid::Uuid;

use taskflow_api::{CreateStakeholderRequest, CreateTaskRequest, Priority};

/// A task due `due_in_days` from now.
pub fn task(title: &str, due_in_days: i64) -> CreateTaskRequest {
    CreateTaskRequest {
        title: title.to_string(),
        description: Some("created by the e2e suite".into()),
        priority: Some(Priority::High),
        due_date: Some(
            (Utc::now() + Duration::days(due_in_days)).to_rfc3339_opts(SecondsFormat::Secs, true),
        ),
        stakeholder_ids: None,
    }
}

/// A contact with a unique email.
pub fn stakeholder(first_name: &str) -> CreateStakeholderRequest {
    CreateStakeholderRequest {
        first_name: first_name.to_string(),
        last_name: "Tester".into(),
        email: Some(format!("{}@contacts.e2e.local", Uuid::new_v4().simple())),
        organization: Some("E2E Ltd".into()),
        tags: Some(vec!["e2e".into()]),
        ..Default::default()
    }
}
