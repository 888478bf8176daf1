//! Outbound notifications: email through Brevo, SMS and WhatsApp through
//! Fast2SMS.
//!
//! Providers without an API key skip the message with a warning instead of
//! failing, so a development server runs without any credentials.

pub mod email;
pub mod sms;
pub mod templates;

use std::future::Future;
use std::time::Duration;

use anyhow::Context;
use taskflow_api::{Channel, ProviderStatus};

use crate::config::AppConfig;
use email::EmailClient;
use sms::SmsClient;

const HTTP_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),
    #[error("{0} is not configured")]
    NotConfigured(&'static str),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{provider} rejected the message: {message}")]
    Rejected {
        provider: &'static str,
        message: String,
    },
}

/// Result of a send that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// The provider has no credentials; nothing left the server.
    Skipped,
}

/// A rendered message. Email uses `subject` + `html`; SMS and WhatsApp use `text`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// Delivers a rendered message over one channel.
pub trait Notifier: Send + Sync {
    fn send(
        &self,
        channel: Channel,
        to: &str,
        message: &OutboundMessage,
    ) -> impl Future<Output = Result<Delivery, NotifyError>> + Send;
}

/// Provider clients shared by handlers and the reminder dispatcher.
#[derive(Clone)]
pub struct NotificationService {
    email: EmailClient,
    sms: SmsClient,
}

impl NotificationService {
    pub fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .user_agent(concat!("taskflow-server/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("building notification HTTP client")?;

        if config.brevo_api_key.is_none() {
            tracing::warn!("BREVO_API_KEY not set; emails will be skipped");
        }
        if config.fast2sms_api_key.is_none() {
            tracing::warn!("FAST2SMS_API_KEY not set; SMS and WhatsApp messages will be skipped");
        }

        Ok(Self {
            email: EmailClient::new(
                http.clone(),
                config.brevo_api_key.clone(),
                config.from_email.clone(),
            ),
            sms: SmsClient::new(http, config.fast2sms_api_key.clone()),
        })
    }

    pub fn email(&self) -> &EmailClient {
        &self.email
    }

    pub fn sms(&self) -> &SmsClient {
        &self.sms
    }

    /// Which channels have credentials.
    pub fn statuses(&self) -> Vec<ProviderStatus> {
        vec![
            ProviderStatus {
                channel: Channel::Email,
                provider: "brevo".into(),
                configured: self.email.is_configured(),
            },
            ProviderStatus {
                channel: Channel::Sms,
                provider: "fast2sms".into(),
                configured: self.sms.is_configured(),
            },
            ProviderStatus {
                channel: Channel::Whatsapp,
                provider: "fast2sms".into(),
                configured: self.sms.is_configured(),
            },
        ]
    }

    /// Send an email in the background. Failures are logged, never returned.
    pub fn spawn_email(&self, to: String, message: OutboundMessage) {
        let email = self.email.clone();
        tokio::spawn(async move {
            match email.send(&to, &message.subject, &message.html).await {
                Ok(Delivery::Sent) => tracing::info!("email '{}' sent to {to}", message.subject),
                Ok(Delivery::Skipped) => {}
                Err(e) => tracing::error!("failed to send email to {to}: {e}"),
            }
        });
    }
}

impl Notifier for NotificationService {
    async fn send(
        &self,
        channel: Channel,
        to: &str,
        message: &OutboundMessage,
    ) -> Result<Delivery, NotifyError> {
        match channel {
            Channel::Email => self.email.send(to, &message.subject, &message.html).await,
            Channel::Sms => self.sms.send_sms(to, &message.text).await,
            Channel::Whatsapp => self.sms.send_whatsapp(to, &message.text).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_reflect_configured_keys() {
        let mut config = AppConfig::for_tests();
        config.fast2sms_api_key = Some("key".into());
        let service = NotificationService::new(&config).expect("service");
        let statuses = service.statuses();
        assert_eq!(statuses.len(), 3);
        assert!(!statuses[0].configured);
        assert!(statuses[1].configured);
        assert!(statuses[2].configured);
    }

    #[tokio::test]
    async fn unconfigured_providers_skip() {
        let service = NotificationService::new(&AppConfig::for_tests()).expect("service");
        let message = templates::notification("hello");
        for channel in Channel::ALL {
            let delivery = service
                .send(*channel, "+919876543210", &message)
                .await
                .expect("skips without error");
            assert_eq!(delivery, Delivery::Skipped);
        }
    }
}
