use serde::Serialize;

use super::{Delivery, NotifyError};

const BREVO_SEND_URL: &str = "https://api.brevo.com/v3/smtp/email";
const SENDER_NAME: &str = "TaskFlow Pro";

/// Brevo transactional email client.
#[derive(Clone)]
pub struct EmailClient {
    http: reqwest::Client,
    api_key: Option<String>,
    from_email: String,
}

#[derive(Debug, Serialize)]
struct Address<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    email: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BrevoPayload<'a> {
    sender: Address<'a>,
    to: Vec<Address<'a>>,
    subject: &'a str,
    html_content: &'a str,
}

impl EmailClient {
    pub fn new(http: reqwest::Client, api_key: Option<String>, from_email: String) -> Self {
        Self {
            http,
            api_key,
            from_email,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn payload<'a>(&'a self, to: &'a str, subject: &'a str, html: &'a str) -> BrevoPayload<'a> {
        BrevoPayload {
            sender: Address {
                name: Some(SENDER_NAME),
                email: &self.from_email,
            },
            to: vec![Address {
                name: None,
                email: to,
            }],
            subject,
            html_content: html,
        }
    }

    pub async fn send(&self, to: &str, subject: &str, html: &str) -> Result<Delivery, NotifyError> {
        let Some(api_key) = &self.api_key else {
            tracing::warn!("Brevo API key not configured, email to {to} not sent");
            return Ok(Delivery::Skipped);
        };
        if !to.contains('@') {
            return Err(NotifyError::InvalidRecipient(to.to_string()));
        }

        let response = self
            .http
            .post(BREVO_SEND_URL)
            .header("api-key", api_key)
            .json(&self.payload(to, subject, html))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                provider: "brevo",
                message: format!("status {}: {body}", status.as_u16()),
            });
        }

        let body: serde_json::Value = response.json().await.unwrap_or_default();
        tracing::info!(
            "email sent via Brevo: {}",
            body.get("messageId").and_then(|v| v.as_str()).unwrap_or("-")
        );
        Ok(Delivery::Sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_matches_brevo_shape() {
        let client = EmailClient::new(
            reqwest::Client::new(),
            Some("key".into()),
            "noreply@taskflowpro.com".into(),
        );
        let json = serde_json::to_value(client.payload("ada@example.com", "Hi", "<p>Hi</p>"))
            .expect("serialize");
        assert_eq!(json["sender"]["name"], "TaskFlow Pro");
        assert_eq!(json["sender"]["email"], "noreply@taskflowpro.com");
        assert_eq!(json["to"][0]["email"], "ada@example.com");
        assert!(json["to"][0].get("name").is_none());
        assert_eq!(json["htmlContent"], "<p>Hi</p>");
    }

    #[tokio::test]
    async fn configured_client_rejects_non_email_recipients() {
        let client = EmailClient::new(reqwest::Client::new(), Some("key".into()), "a@b.c".into());
        let err = client
            .send("+919876543210", "s", "b")
            .await
            .expect_err("phone is not an email");
        assert!(matches!(err, NotifyError::InvalidRecipient(_)));
    }
}
