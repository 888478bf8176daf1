use anyhow::{Result, ensure};
use serde_json::json;

use taskflow_api::{
    Stakeholder, StakeholderDetail, TaskDetail, TaskListResponse, TaskStatsResponse, TaskStatus,
};

use crate::client::TestContext;
use crate::fixtures;

/// Create → read → update → delete; a deleted task is gone.
pub async fn task_lifecycle(ctx: &TestContext) -> Result<()> {
    let user = ctx.register_user().await?;
    let token = &user.access_token;

    let resp = ctx
        .post_json_authed("/tasks", token, &fixtures::task("Ship the release", 3))
        .await?;
    ensure!(resp.status() == 201, "expected 201, got {}", resp.status());
    let created: TaskDetail = resp.json().await?;
    ensure!(created.task.status == TaskStatus::Pending);
    ensure!(created.task.user_id == user.user_id);
    let path = format!("/tasks/{}", created.task.id);

    let resp = ctx
        .patch_json_authed(&path, token, &json!({ "status": "COMPLETED" }))
        .await?;
    ensure!(resp.status() == 200, "expected 200, got {}", resp.status());
    let updated: TaskDetail = resp.json().await?;
    ensure!(updated.task.status == TaskStatus::Completed);
    ensure!(updated.task.completed_at.is_some(), "expected completed_at");

    let resp = ctx.get_authed("/tasks/stats", token).await?;
    let stats: TaskStatsResponse = resp.json().await?;
    ensure!(stats.total == 1);
    ensure!(stats.by_status.get(&TaskStatus::Completed) == Some(&1));

    let resp = ctx.delete_authed(&path, token).await?;
    ensure!(resp.status() == 200, "expected 200, got {}", resp.status());

    let resp = ctx.get_authed(&path, token).await?;
    ensure!(resp.status() == 404, "expected 404, got {}", resp.status());
    Ok(())
}

/// Linked stakeholders show up on the task and the task on the stakeholder.
pub async fn task_with_stakeholders(ctx: &TestContext) -> Result<()> {
    let user = ctx.register_user().await?;
    let token = &user.access_token;

    let resp = ctx
        .post_json_authed("/stakeholders", token, &fixtures::stakeholder("Ada"))
        .await?;
    ensure!(resp.status() == 201, "expected 201, got {}", resp.status());
    let contact: Stakeholder = resp.json().await?;

    let mut req = fixtures::task("Review contract", 5);
    req.stakeholder_ids = Some(vec![contact.id.clone()]);
    let resp = ctx.post_json_authed("/tasks", token, &req).await?;
    ensure!(resp.status() == 201, "expected 201, got {}", resp.status());
    let task: TaskDetail = resp.json().await?;
    ensure!(task.stakeholders.len() == 1);
    ensure!(task.stakeholders[0].stakeholder_id == contact.id);

    let resp = ctx
        .get_authed(&format!("/stakeholders/{}", contact.id), token)
        .await?;
    ensure!(resp.status() == 200, "expected 200, got {}", resp.status());
    let detail: StakeholderDetail = resp.json().await?;
    ensure!(detail.tasks.iter().any(|t| t.id == task.task.id));

    // Unknown stakeholder ids are rejected outright.
    let mut bad = fixtures::task("Dangling link", 1);
    bad.stakeholder_ids = Some(vec!["00000000-0000-0000-0000-000000000000".into()]);
    let resp = ctx.post_json_authed("/tasks", token, &bad).await?;
    ensure!(resp.status() == 400, "expected 400, got {}", resp.status());
    Ok(())
}

/// Status filter and title search narrow the listing.
pub async fn task_filters(ctx: &TestContext) -> Result<()> {
    let user = ctx.register_user().await?;
    let token = &user.access_token;

    for title in ["Write quarterly report", "Book flights", "Renew passport"] {
        let resp = ctx
            .post_json_authed("/tasks", token, &fixtures::task(title, 10))
            .await?;
        ensure!(resp.status() == 201, "expected 201, got {}", resp.status());
    }

    let resp = ctx.get_authed("/tasks?search=flights", token).await?;
    let list: TaskListResponse = resp.json().await?;
    ensure!(list.pagination.total == 1, "expected 1 match, got {}", list.pagination.total);
    ensure!(list.tasks[0].task.title == "Book flights");

    let resp = ctx.get_authed("/tasks?status=COMPLETED", token).await?;
    let list: TaskListResponse = resp.json().await?;
    ensure!(list.tasks.is_empty(), "expected no completed tasks");

    let resp = ctx.get_authed("/tasks?limit=2", token).await?;
    let list: TaskListResponse = resp.json().await?;
    ensure!(list.tasks.len() == 2);
    ensure!(list.pagination.pages == 2);
    Ok(())
}

/// Another user's task is indistinguishable from a missing one.
pub async fn other_users_tasks_are_hidden(ctx: &TestContext) -> Result<()> {
    let owner = ctx.register_user().await?;
    let other = ctx.register_user().await?;

    let resp = ctx
        .post_json_authed("/tasks", &owner.access_token, &fixtures::task("Private", 2))
        .await?;
    let task: TaskDetail = resp.json().await?;
    let path = format!("/tasks/{}", task.task.id);

    let resp = ctx.get_authed(&path, &other.access_token).await?;
    ensure!(resp.status() == 404, "expected 404, got {}", resp.status());

    let resp = ctx
        .patch_json_authed(&path, &other.access_token, &json!({ "title": "Mine now" }))
        .await?;
    ensure!(resp.status() == 404, "expected 404, got {}", resp.status());

    let resp = ctx.delete_authed(&path, &other.access_token).await?;
    ensure!(resp.status() == 404, "expected 404, got {}", resp.status());

    let resp = ctx.get_authed("/tasks", &other.access_token).await?;
    let list: TaskListResponse = resp.json().await?;
    ensure!(list.pagination.total == 0);
    Ok(())
}
