//! Provider smoke tests. Delivery failures come back in the body with
//! `success: false`; only malformed input is an HTTP error.

use axum::{Json, extract::State};

use taskflow_api::service;
use taskflow_api::{
    Channel, NotificationStatusResponse, SmsBalanceResponse, TestEmailRequest,
    TestMessageRequest, TestSendResponse,
};

use crate::error::ApiErr;
use crate::notify::{Delivery, NotificationService, Notifier, NotifyError, OutboundMessage, templates};
use crate::routes::auth::AuthUser;

const DEFAULT_TEST_TEXT: &str = "This is a test message from TaskFlow Pro.";

async fn send_test<N: Notifier>(
    notifier: &N,
    channel: Channel,
    to: &str,
    message: &OutboundMessage,
) -> Result<TestSendResponse, ApiErr> {
    match notifier.send(channel, to, message).await {
        Ok(Delivery::Sent) => Ok(TestSendResponse {
            success: true,
            message: Some(format!("test {} sent to {to}", label(channel))),
            error: None,
        }),
        Ok(Delivery::Skipped) => Ok(TestSendResponse {
            success: true,
            message: Some(format!(
                "{} provider is not configured; message skipped",
                label(channel)
            )),
            error: None,
        }),
        Err(NotifyError::InvalidRecipient(reason)) => Err(ApiErr::bad_request(reason)),
        Err(e) => {
            tracing::warn!("test {} to {to} failed: {e}", label(channel));
            Ok(TestSendResponse {
                success: false,
                message: None,
                error: Some(e.to_string()),
            })
        }
    }
}

fn label(channel: Channel) -> &'static str {
    match channel {
        Channel::Email => "email",
        Channel::Sms => "SMS",
        Channel::Whatsapp => "WhatsApp",
    }
}

fn test_text(req: &TestMessageRequest) -> String {
    req.message
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .unwrap_or(DEFAULT_TEST_TEXT)
        .to_string()
}

/// POST /api/v1/test/email
pub async fn test_email(
    State(notifier): State<NotificationService>,
    _user: AuthUser,
    Json(req): Json<TestEmailRequest>,
) -> Result<Json<TestSendResponse>, ApiErr> {
    let to = service::validate_email(&req.to)?;
    let mut message = templates::notification(DEFAULT_TEST_TEXT);
    if let Some(subject) = req.subject.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        message.subject = subject.to_string();
    }
    Ok(Json(send_test(&notifier, Channel::Email, &to, &message).await?))
}

/// POST /api/v1/test/sms
pub async fn test_sms(
    State(notifier): State<NotificationService>,
    _user: AuthUser,
    Json(req): Json<TestMessageRequest>,
) -> Result<Json<TestSendResponse>, ApiErr> {
    let message = templates::notification(&test_text(&req));
    Ok(Json(send_test(&notifier, Channel::Sms, &req.to, &message).await?))
}

/// POST /api/v1/test/whatsapp
pub async fn test_whatsapp(
    State(notifier): State<NotificationService>,
    _user: AuthUser,
    Json(req): Json<TestMessageRequest>,
) -> Result<Json<TestSendResponse>, ApiErr> {
    let message = templates::notification(&test_text(&req));
    Ok(Json(
        send_test(&notifier, Channel::Whatsapp, &req.to, &message).await?,
    ))
}

/// GET /api/v1/test/sms-balance — Fast2SMS wallet.
pub async fn sms_balance(
    State(notifier): State<NotificationService>,
    _user: AuthUser,
) -> Json<SmsBalanceResponse> {
    match notifier.sms().balance().await {
        Ok(balance) => Json(SmsBalanceResponse {
            success: true,
            balance: Some(balance),
            error: None,
        }),
        Err(e) => {
            tracing::warn!("SMS balance lookup failed: {e}");
            Json(SmsBalanceResponse {
                success: false,
                balance: None,
                error: Some(e.to_string()),
            })
        }
    }
}

/// GET /api/v1/test/status — which providers have credentials.
pub async fn status(
    State(notifier): State<NotificationService>,
    _user: AuthUser,
) -> Json<NotificationStatusResponse> {
    Json(NotificationStatusResponse {
        services: notifier.statuses(),
    })
}
