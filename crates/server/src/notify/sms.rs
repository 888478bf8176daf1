use serde::Serialize;

use super::{Delivery, NotifyError};

const FAST2SMS_SMS_URL: &str = "https://www.fast2sms.com/dev/bulkV2";
const FAST2SMS_WHATSAPP_URL: &str = "https://www.fast2sms.com/dev/wa";
const FAST2SMS_WALLET_URL: &str = "https://www.fast2sms.com/dev/wallet";

/// Fast2SMS client for SMS, WhatsApp and wallet balance.
#[derive(Clone)]
pub struct SmsClient {
    http: reqwest::Client,
    api_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct SmsPayload<'a> {
    route: &'static str,
    message: &'a str,
    language: &'static str,
    flash: u8,
    numbers: String,
}

#[derive(Debug, Serialize)]
struct WhatsAppPayload<'a> {
    route: &'static str,
    message: &'a str,
    numbers: String,
}

/// Normalize to a 10-digit Indian mobile number (`[6-9]XXXXXXXXX`).
///
/// Separators are ignored and a leading `91` country code is dropped.
pub fn format_indian_mobile(phone: &str) -> Result<String, NotifyError> {
    let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
    let local = match digits.strip_prefix("91") {
        Some(rest) if digits.len() == 12 => rest,
        _ => digits.as_str(),
    };
    if local.len() == 10 && local.starts_with(['6', '7', '8', '9']) {
        Ok(local.to_string())
    } else {
        Err(NotifyError::InvalidRecipient(format!(
            "not an Indian mobile number: {phone}"
        )))
    }
}

/// WhatsApp wants the country code: `91XXXXXXXXXX`.
pub fn format_whatsapp_number(phone: &str) -> Result<String, NotifyError> {
    format_indian_mobile(phone).map(|local| format!("91{local}"))
}

impl SmsClient {
    pub fn new(http: reqwest::Client, api_key: Option<String>) -> Self {
        Self { http, api_key }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    pub async fn send_sms(&self, to: &str, message: &str) -> Result<Delivery, NotifyError> {
        let Some(api_key) = &self.api_key else {
            tracing::warn!("Fast2SMS API key not configured, SMS to {to} not sent");
            return Ok(Delivery::Skipped);
        };
        let payload = SmsPayload {
            route: "q",
            message,
            language: "english",
            flash: 0,
            numbers: format_indian_mobile(to)?,
        };
        self.post(FAST2SMS_SMS_URL, api_key, &payload).await
    }

    pub async fn send_whatsapp(&self, to: &str, message: &str) -> Result<Delivery, NotifyError> {
        let Some(api_key) = &self.api_key else {
            tracing::warn!("Fast2SMS API key not configured, WhatsApp message to {to} not sent");
            return Ok(Delivery::Skipped);
        };
        let payload = WhatsAppPayload {
            route: "wa",
            message,
            numbers: format_whatsapp_number(to)?,
        };
        self.post(FAST2SMS_WHATSAPP_URL, api_key, &payload).await
    }

    /// Raw wallet response from Fast2SMS.
    pub async fn balance(&self) -> Result<serde_json::Value, NotifyError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(NotifyError::NotConfigured("FAST2SMS_API_KEY"))?;
        let response = self
            .http
            .get(FAST2SMS_WALLET_URL)
            .header("authorization", api_key)
            .send()
            .await?;
        Ok(response.json().await?)
    }

    async fn post<T: Serialize>(
        &self,
        url: &str,
        api_key: &str,
        payload: &T,
    ) -> Result<Delivery, NotifyError> {
        let response = self
            .http
            .post(url)
            .header("authorization", api_key)
            .json(payload)
            .send()
            .await?;
        let body: serde_json::Value = response.json().await?;
        check_response(&body)?;
        tracing::info!(
            "message accepted by Fast2SMS: {}",
            body.get("request_id").and_then(|v| v.as_str()).unwrap_or("-")
        );
        Ok(Delivery::Sent)
    }
}

/// Fast2SMS answers `{"return": true, ...}` on success.
fn check_response(body: &serde_json::Value) -> Result<(), NotifyError> {
    if body.get("return").and_then(|v| v.as_bool()) == Some(true) {
        return Ok(());
    }
    let message = match body.get("message") {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => body.to_string(),
    };
    Err(NotifyError::Rejected {
        provider: "fast2sms",
        message,
    })
}
