//! Email formatting and the SMTP transport seam.
//!
//! The service formats a complete RFC-2822 message (headers included) and
//! hands it to an [`EmailTransport`]. Transports are injected at
//! construction: production deployments bind their SMTP submission wrapper,
//! tests use [`RecordingTransport`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::channels::DeliveryError;
use crate::config::SmtpConfig;
use crate::service::NotificationRequest;

/// A fully-formatted outbound email.
#[derive(Debug, Clone, PartialEq)]
pub struct EmailMessage {
    /// Envelope and header From.
    pub from: String,
    /// Recipient list.
    pub to: Vec<String>,
    /// Subject line (`[SEVERITY] title`).
    pub subject: String,
    /// Plain-text body.
    pub body: String,
    /// Date header value.
    pub date: DateTime<Utc>,
    /// Message-ID header value.
    pub message_id: String,
}

impl EmailMessage {
    /// Render the full RFC-2822 message: headers, blank line, body.
    pub fn to_rfc2822(&self) -> String {
        format!(
            "From: {}\r\nTo: {}\r\nSubject: {}\r\nDate: {}\r\nMessage-ID: {}\r\nMIME-Version: 1.0\r\nContent-Type: text/plain; charset=UTF-8\r\n\r\n{}",
            self.from,
            self.to.join(", "),
            self.subject,
            self.date.to_rfc2822(),
            self.message_id,
            self.body,
        )
    }
}

/// Build the message for a notification request.
///
/// Recipients come from the channel's `recipients` list; `from` may be
/// overridden per channel, otherwise the SMTP default applies.
pub fn build_email(
    request: &NotificationRequest,
    smtp: &SmtpConfig,
) -> Result<EmailMessage, DeliveryError> {
    let recipients: Vec<String> = request
        .channel_config
        .get("recipients")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default();
    if recipients.is_empty() {
        return Err(DeliveryError::MissingConfig("recipients"));
    }

    let from = request
        .channel_config
        .get("from")
        .and_then(|v| v.as_str())
        .unwrap_or(&smtp.from_email)
        .to_string();

    Ok(EmailMessage {
        from,
        to: recipients,
        subject: format!(
            "[{}] {}",
            request.alert.severity.as_upper(),
            request.alert.title
        ),
        body: request.alert.message.clone(),
        date: Utc::now(),
        message_id: format!("<{}@{}>", Uuid::new_v4(), smtp.host),
    })
}

/// Async seam to the external SMTP submission wrapper.
#[async_trait]
pub trait EmailTransport: Send + Sync {
    /// Submit one message.
    async fn send(&self, config: &SmtpConfig, message: &EmailMessage)
        -> Result<(), DeliveryError>;
}

/// Transport double that records every message; failure can be toggled to
/// exercise the retry path.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<EmailMessage>>,
    fail_with: Mutex<Option<String>>,
}

impl RecordingTransport {
    /// New transport that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent sends fail with the given error text.
    pub async fn fail_with(&self, error: &str) {
        *self.fail_with.lock().await = Some(error.to_string());
    }

    /// Accept sends again.
    pub async fn recover(&self) {
        *self.fail_with.lock().await = None;
    }

    /// Everything submitted so far.
    pub async fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl EmailTransport for RecordingTransport {
    async fn send(
        &self,
        _config: &SmtpConfig,
        message: &EmailMessage,
    ) -> Result<(), DeliveryError> {
        if let Some(error) = self.fail_with.lock().await.clone() {
            return Err(DeliveryError::Smtp(error));
        }
        self.sent.lock().await.push(message.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_types::{AlertPayload, ChannelType, Severity};
    use serde_json::json;

    fn request(config: serde_json::Value) -> NotificationRequest {
        NotificationRequest {
            notification_id: "notif_TEST".into(),
            incident_id: Uuid::new_v4(),
            channel_id: Uuid::new_v4(),
            channel_type: ChannelType::Email,
            channel_config: config,
            alert: AlertPayload {
                title: "volume spike".into(),
                message: "too many transactions".into(),
                severity: Severity::Critical,
                data: json!({}),
            },
            retry_count: 0,
            scheduled_at: Utc::now(),
        }
    }

    #[test]
    fn message_carries_required_headers() {
        let message = build_email(
            &request(json!({"recipients": ["ops@example.com", "risk@example.com"]})),
            &SmtpConfig::default(),
        )
        .unwrap();

        let raw = message.to_rfc2822();
        assert!(raw.contains("To: ops@example.com, risk@example.com"));
        assert!(raw.contains("From: alerts@sentinel.local"));
        assert!(raw.contains("Subject: [CRITICAL] volume spike"));
        assert!(raw.contains("MIME-Version: 1.0"));
        assert!(raw.contains("Content-Type: text/plain; charset=UTF-8"));
        assert!(raw.contains("Message-ID: <"));
        assert!(raw.contains("Date: "));
        assert!(raw.ends_with("too many transactions"));
    }

    #[test]
    fn missing_recipients_is_a_config_error() {
        assert!(matches!(
            build_email(&request(json!({})), &SmtpConfig::default()),
            Err(DeliveryError::MissingConfig("recipients"))
        ));
    }

    #[test]
    fn channel_from_overrides_smtp_default() {
        let message = build_email(
            &request(json!({"recipients": ["ops@example.com"], "from": "noreply@corp.example"})),
            &SmtpConfig::default(),
        )
        .unwrap();
        assert_eq!(message.from, "noreply@corp.example");
    }
}
