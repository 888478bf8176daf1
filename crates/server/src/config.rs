use anyhow::{Context, Result};
use std::path::PathBuf;

use taskflow_api::deploy::{self, Environment};

pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_FRONTEND_URL: &str = "http://localhost:3000";
pub const DEFAULT_FROM_EMAIL: &str = "noreply@taskflowpro.com";
pub const DEFAULT_REMINDER_POLL_SECS: u64 = 60;

/// Server configuration loaded from environment variables.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub data_dir: PathBuf,
    pub environment: Environment,
    pub jwt_secret: String,
    /// CORS origin and base of links in outgoing emails.
    pub frontend_url: String,
    pub brevo_api_key: Option<String>,
    pub from_email: String,
    pub fast2sms_api_key: Option<String>,
    /// Dispatcher interval; `0` disables the dispatcher.
    pub reminder_poll_secs: u64,
    pub seed_demo: bool,
}

impl AppConfig {
    /// Read the process environment. `main` loads `.env` before calling this.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Empty values count as unset.
    pub fn from_lookup<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let port = match var("PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .with_context(|| format!("PORT must be a port number, got '{raw}'"))?,
            None => DEFAULT_PORT,
        };
        let reminder_poll_secs = match var("REMINDER_POLL_SECS") {
            Some(raw) => raw
                .parse::<u64>()
                .with_context(|| format!("REMINDER_POLL_SECS must be a number, got '{raw}'"))?,
            None => DEFAULT_REMINDER_POLL_SECS,
        };

        let jwt_secret = match var("JWT_SECRET") {
            Some(secret) => secret,
            None => {
                tracing::warn!(
                    "JWT_SECRET not set; using a random secret, tokens will not survive a restart"
                );
                taskflow_api::crypto::generate_token()?
            }
        };

        Ok(Self {
            port,
            data_dir: var("TASKFLOW_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data")),
            environment: Environment::parse(var(deploy::ENV_ENVIRONMENT).as_deref()),
            jwt_secret,
            frontend_url: var("FRONTEND_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_FRONTEND_URL.into()),
            brevo_api_key: var("BREVO_API_KEY"),
            from_email: var("FROM_EMAIL").unwrap_or_else(|| DEFAULT_FROM_EMAIL.into()),
            fast2sms_api_key: var("FAST2SMS_API_KEY"),
            reminder_poll_secs,
            seed_demo: deploy::parse_bool_flag(var(deploy::ENV_SEED_DEMO).as_deref(), false),
        })
    }

    /// Configuration for handler tests: no providers, fixed secret.
    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            port: 0,
            data_dir: PathBuf::from("data"),
            environment: Environment::Test,
            jwt_secret: "test-secret".into(),
            frontend_url: DEFAULT_FRONTEND_URL.into(),
            brevo_api_key: None,
            from_email: DEFAULT_FROM_EMAIL.into(),
            fast2sms_api_key: None,
            reminder_poll_secs: 0,
            seed_demo: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = AppConfig::from_lookup(lookup(&[])).expect("config");
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.data_dir, PathBuf::from("data"));
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.frontend_url, DEFAULT_FRONTEND_URL);
        assert_eq!(config.from_email, DEFAULT_FROM_EMAIL);
        assert_eq!(config.reminder_poll_secs, DEFAULT_REMINDER_POLL_SECS);
        assert!(config.brevo_api_key.is_none());
        assert!(!config.seed_demo);
        assert_eq!(config.jwt_secret.len(), 64);
    }

    #[test]
    fn explicit_values_override_defaults() {
        let config = AppConfig::from_lookup(lookup(&[
            ("PORT", "8080"),
            ("TASKFLOW_ENV", "production"),
            ("JWT_SECRET", "s3cret"),
            ("FRONTEND_URL", "https://app.example.com/"),
            ("BREVO_API_KEY", "  "),
            ("FAST2SMS_API_KEY", "key"),
            ("REMINDER_POLL_SECS", "0"),
            ("TASKFLOW_SEED_DEMO", "yes"),
        ]))
        .expect("config");
        assert_eq!(config.port, 8080);
        assert!(config.environment.is_production());
        assert_eq!(config.jwt_secret, "s3cret");
        assert_eq!(config.frontend_url, "https://app.example.com");
        assert!(config.brevo_api_key.is_none());
        assert_eq!(config.fast2sms_api_key.as_deref(), Some("key"));
        assert_eq!(config.reminder_poll_secs, 0);
        assert!(config.seed_demo);
    }

    #[test]
    fn invalid_port_is_rejected() {
        assert!(AppConfig::from_lookup(lookup(&[("PORT", "not-a-port")])).is_err());
    }
}
