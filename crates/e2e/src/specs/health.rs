use anyhow::{Result, ensure};

use taskflow_api::HealthResponse;

use crate::client::TestContext;

pub async fn health_check(ctx: &TestContext) -> Result<()> {
    let resp = ctx.get("/health").await?;
    ensure!(resp.status() == 200, "expected 200, got {}", resp.status());

    let body: HealthResponse = resp.json().await?;
    ensure!(body.status == "ok", "expected status=ok, got {}", body.status);
    ensure!(body.checks.database.status == "ok", "database probe failed");
    ensure!(!body.version.is_empty(), "expected version string");
    Ok(())
}
