use axum::{Json, extract::State};

use taskflow_api::{CheckStatus, HealthChecks, HealthResponse, service};

use crate::AppState;

/// GET /api/v1/health — liveness plus a database probe. Always 200; a failed
/// probe shows up as `status: "error"` in the body.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = match state.db.ping() {
        Ok(()) => CheckStatus {
            status: "ok".into(),
            error: None,
        },
        Err(e) => {
            tracing::error!("health check: database unreachable: {e}");
            CheckStatus {
                status: "error".into(),
                error: Some(e.to_string()),
            }
        }
    };
    let status = if database.status == "ok" { "ok" } else { "error" };

    Json(HealthResponse {
        status: status.into(),
        timestamp: service::now_ts(),
        uptime_seconds: state.started.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        environment: state.config.environment.as_str().to_string(),
        checks: HealthChecks { database },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestApp;

    #[tokio::test]
    async fn reports_database_ok() {
        let app = TestApp::new();
        let Json(res) = health(State(app.state())).await;
        assert_eq!(res.status, "ok");
        assert_eq!(res.checks.database.status, "ok");
        assert!(res.checks.database.error.is_none());
        assert_eq!(res.environment, "test");
        assert_eq!(res.version, env!("CARGO_PKG_VERSION"));
    }
}
