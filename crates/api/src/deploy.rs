//! Deployment profile flags read by the server at startup.

/// Env var naming the deployment environment (`development`, `production`, `test`).
pub const ENV_ENVIRONMENT: &str = "TASKFLOW_ENV";

/// Env var enabling demo data seeding on startup.
pub const ENV_SEED_DEMO: &str = "TASKFLOW_SEED_DEMO";

/// Deployment environment. Unknown values fall back to development.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Production,
    Test,
}

impl Environment {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("production" | "prod") => Self::Production,
            Some("test") => Self::Test,
            _ => Self::Development,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Parse a human-friendly boolean env flag value.
///
/// Accepted truthy values:
/// - `1`
/// - `true`
/// - `yes`
/// - `on`
pub fn parse_bool_flag(raw: Option<&str>, default: bool) -> bool {
    raw.map(|value| {
        matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
    .unwrap_or(default)
}
