mod config;
mod dispatcher;
mod error;
mod notify;
mod routes;
mod seed;
mod storage;
#[cfg(test)]
mod test_support;

use std::time::{Duration, Instant};

use anyhow::Context;
use axum::{
    Router,
    extract::FromRef,
    http::HeaderValue,
    routing::{get, post, put},
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::AppConfig;
use notify::NotificationService;
use storage::Db;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub config: AppConfig,
    pub notifier: NotificationService,
    pub started: Instant,
}

impl FromRef<AppState> for Db {
    fn from_ref(state: &AppState) -> Self {
        state.db.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}

impl FromRef<AppState> for NotificationService {
    fn from_ref(state: &AppState) -> Self {
        state.notifier.clone()
    }
}

fn api_routes() -> Router<AppState> {
    use routes::{auth, calendar, health, notifications, reminders, stakeholders, tasks, users};

    Router::new()
        // Health
        .route("/health", get(health::health))
        // Auth
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/refresh", post(auth::refresh))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/verify", post(auth::verify))
        .route(
            "/auth/request-password-reset",
            post(auth::request_password_reset),
        )
        .route("/auth/reset-password", post(auth::reset_password))
        .route("/auth/password", put(auth::change_password))
        // Users
        .route(
            "/users/me",
            get(users::me).patch(users::update_me).delete(users::delete_me),
        )
        .route("/users/me/stats", get(users::stats))
        // Tasks
        .route("/tasks", post(tasks::create).get(tasks::list))
        .route("/tasks/voice", post(tasks::create_voice))
        .route("/tasks/stats", get(tasks::stats))
        .route("/tasks/overdue", get(tasks::overdue))
        .route("/tasks/upcoming", get(tasks::upcoming))
        .route(
            "/tasks/{id}",
            get(tasks::get).patch(tasks::update).delete(tasks::delete),
        )
        // Stakeholders
        .route(
            "/stakeholders",
            post(stakeholders::create).get(stakeholders::list),
        )
        .route("/stakeholders/bulk", post(stakeholders::bulk_create))
        .route("/stakeholders/tags", get(stakeholders::tags))
        .route(
            "/stakeholders/organizations",
            get(stakeholders::organizations),
        )
        .route("/stakeholders/search", get(stakeholders::search_by_contact))
        .route(
            "/stakeholders/{id}",
            get(stakeholders::get)
                .patch(stakeholders::update)
                .delete(stakeholders::delete),
        )
        .route("/stakeholders/{id}/tasks", get(stakeholders::tasks))
        .route("/stakeholders/{id}/stats", get(stakeholders::stats))
        // Reminders
        .route("/reminders", post(reminders::create).get(reminders::list))
        .route("/reminders/pending", get(reminders::pending))
        .route("/reminders/stats", get(reminders::stats))
        .route(
            "/reminders/{id}",
            get(reminders::get)
                .patch(reminders::update)
                .delete(reminders::delete),
        )
        // Calendar
        .route(
            "/calendar/events",
            post(calendar::create).get(calendar::list),
        )
        .route(
            "/calendar/events/{id}",
            get(calendar::get)
                .patch(calendar::update)
                .delete(calendar::delete),
        )
        .route("/calendar/month/{year}/{month}", get(calendar::month))
        .route("/calendar/week", get(calendar::week))
        .route("/calendar/day", get(calendar::day))
        .route("/calendar/sync-task/{task_id}", post(calendar::sync_task))
        // Notification tests
        .route("/test/email", post(notifications::test_email))
        .route("/test/sms", post(notifications::test_sms))
        .route("/test/whatsapp", post(notifications::test_whatsapp))
        .route("/test/sms-balance", get(notifications::sms_balance))
        .route("/test/status", get(notifications::status))
}

fn cors_layer(frontend_url: &str) -> CorsLayer {
    let origin = match HeaderValue::from_str(frontend_url) {
        Ok(origin) => AllowOrigin::exact(origin),
        Err(_) => {
            tracing::warn!("FRONTEND_URL '{frontend_url}' is not a valid origin; allowing any");
            AllowOrigin::any()
        }
    };
    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "taskflow_server=info,tower_http=info".into()),
        )
        .init();

    let config = AppConfig::from_env().context("loading configuration")?;
    tracing::info!(
        "environment: {}, data directory: {}",
        config.environment.as_str(),
        config.data_dir.display()
    );

    let db = storage::init_db(&config.data_dir)?;
    tracing::info!("database initialized");

    if config.seed_demo {
        seed::seed_demo(&db).context("seeding demo data")?;
    }

    let notifier = NotificationService::new(&config)?;

    if config.reminder_poll_secs > 0 {
        dispatcher::spawn(
            db.clone(),
            notifier.clone(),
            Duration::from_secs(config.reminder_poll_secs),
        );
        tracing::info!(
            "reminder dispatcher running every {}s",
            config.reminder_poll_secs
        );
    } else {
        tracing::warn!("REMINDER_POLL_SECS=0; reminders will not be delivered");
    }

    let port = config.port;
    let cors = cors_layer(&config.frontend_url);
    let state = AppState {
        db,
        config,
        notifier,
        started: Instant::now(),
    };

    let app = Router::new()
        .nest("/api/v1", api_routes())
        // Docs (content negotiation: markdown for AI agents, HTML for browsers)
        .route("/docs", get(routes::docs::handle))
        .route("/llms.txt", get(routes::docs::llms_txt))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding port {port}"))?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
