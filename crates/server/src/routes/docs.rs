use axum::{
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};

use crate::config::AppConfig;
use crate::notify::templates::escape_html;

const DOCS_MD: &str = include_str!("../../../../docs.md");

const LLMS_TXT: &str = "\
# TaskFlow Pro

> Task-management API: tasks, stakeholders, reminders over email/SMS/WhatsApp, and a calendar.

## Docs

- [API reference](/docs): full reference (also available as `Accept: text/markdown`)

## API

Base URL: `/api/v1`, bearer JWT from `POST /api/v1/auth/login`.

- `GET /api/v1/tasks` — List tasks
- `POST /api/v1/tasks` — Create a task
- `GET /api/v1/stakeholders` — List contacts
- `POST /api/v1/reminders` — Schedule a reminder
- `GET /api/v1/calendar/month/{year}/{month}` — Month view
- `GET /api/v1/health` — Health check
";

/// GET /docs — markdown for agents, a minimal HTML page for browsers.
/// Not served in production.
pub async fn handle(State(config): State<AppConfig>, headers: HeaderMap) -> Response {
    if config.environment.is_production() {
        return StatusCode::NOT_FOUND.into_response();
    }

    let accept = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if accept.contains("text/markdown") {
        return (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "text/markdown; charset=utf-8"),
                (header::CACHE_CONTROL, "public, max-age=3600"),
            ],
            DOCS_MD,
        )
            .into_response();
    }

    let html = format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n\
<title>TaskFlow Pro API</title>\n</head>\n<body>\n<pre>{}</pre>\n</body>\n</html>\n",
        escape_html(DOCS_MD)
    );
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        html,
    )
        .into_response()
}

pub async fn llms_txt() -> impl IntoResponse {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/markdown; charset=utf-8"),
            (header::CACHE_CONTROL, "public, max-age=3600"),
        ],
        LLMS_TXT,
    )
}
