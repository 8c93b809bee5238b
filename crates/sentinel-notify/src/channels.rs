//! Per-channel payload formatters and HTTP deliverers.
//!
//! One formatter and one deliverer per channel variant. HTTP deliverers
//! share a `reqwest::Client` and classify outcomes: 2xx is success, 4xx is
//! permanent, 5xx and transport errors are transient.

use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use sentinel_secrets::SecretCipher;
use sentinel_types::Severity;

use crate::service::NotificationRequest;

/// PagerDuty Events API v2 endpoint; channels may override it with an
/// `api_url` entry for testing.
const PAGERDUTY_EVENTS_URL: &str = "https://events.pagerduty.com/v2/enqueue";

/// SMS bodies are truncated to a single segment.
const SMS_MAX_LEN: usize = 160;

/// A delivery failure, classified for the retry policy.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The channel configuration lacks a required field. Permanent.
    #[error("channel configuration missing `{0}`")]
    MissingConfig(&'static str),
    /// The configured URL could not be used. Permanent.
    #[error("invalid channel url: {0}")]
    InvalidUrl(String),
    /// Non-2xx HTTP response.
    #[error("HTTP error: {0}")]
    HttpStatus(u16),
    /// Network-level failure. Transient.
    #[error("transport error: {0}")]
    Transport(String),
    /// SMTP submission failure. Transient.
    #[error("smtp error: {0}")]
    Smtp(String),
    /// An encrypted configuration value failed to decrypt. Permanent.
    #[error("secret decryption failed: {0}")]
    Secret(String),
}

impl DeliveryError {
    /// Transient failures are retried with backoff; permanent ones are
    /// terminal on the first attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            DeliveryError::HttpStatus(code) => *code >= 500,
            DeliveryError::Transport(_) | DeliveryError::Smtp(_) => true,
            DeliveryError::MissingConfig(_)
            | DeliveryError::InvalidUrl(_)
            | DeliveryError::Secret(_) => false,
        }
    }
}

/// Check a channel configuration document against its channel type.
///
/// Runs at the API boundary when channels are created so malformed
/// configurations never reach a delivery worker.
pub fn validate_channel_config(
    channel_type: sentinel_types::ChannelType,
    config: &Value,
) -> Result<(), crate::NotifyError> {
    use sentinel_types::ChannelType::*;

    let invalid =
        |message: String| Err(crate::NotifyError::InvalidChannelConfig(message));
    let require_url = |key: &str| -> Result<(), crate::NotifyError> {
        match config.get(key).and_then(|v| v.as_str()) {
            Some(url) if reqwest::Url::parse(url).is_ok() => Ok(()),
            Some(url) => Err(crate::NotifyError::InvalidChannelConfig(format!(
                "`{key}` is not a valid url: {url}"
            ))),
            None => Err(crate::NotifyError::InvalidChannelConfig(format!(
                "missing field `{key}`"
            ))),
        }
    };
    let require_str = |key: &str| -> Result<(), crate::NotifyError> {
        match config.get(key).and_then(|v| v.as_str()) {
            Some(value) if !value.is_empty() => Ok(()),
            _ => Err(crate::NotifyError::InvalidChannelConfig(format!(
                "missing field `{key}`"
            ))),
        }
    };

    match channel_type {
        Email => {
            let recipients = config
                .get("recipients")
                .and_then(|v| v.as_array())
                .map(|a| a.iter().filter(|v| v.is_string()).count())
                .unwrap_or(0);
            if recipients == 0 {
                return invalid("`recipients` must be a non-empty list".to_string());
            }
        }
        Webhook => require_url("url")?,
        Slack => require_url("webhook_url")?,
        Sms => {
            require_url("api_url")?;
            require_str("api_key")?;
            require_str("recipient")?;
        }
        Pagerduty => require_str("integration_key")?,
    }
    Ok(())
}

//─────────────────────────────
//  Formatters
//─────────────────────────────

/// Webhook envelope: the alert plus identifiers, extended by the channel's
/// `custom_fields`.
pub fn format_webhook_payload(request: &NotificationRequest) -> Value {
    let mut payload = json!({
        "alert": request.alert,
        "incident_id": request.incident_id,
        "notification_id": request.notification_id,
        "timestamp": chrono::Utc::now().timestamp().to_string(),
    });
    if let Some(custom) = request
        .channel_config
        .get("custom_fields")
        .and_then(|v| v.as_object())
    {
        for (key, value) in custom {
            payload[key] = value.clone();
        }
    }
    payload
}

/// Slack message with a severity-colored attachment.
pub fn format_slack_payload(request: &NotificationRequest) -> Value {
    let color = match request.alert.severity {
        Severity::Critical => "danger",
        Severity::High => "warning",
        _ => "good",
    };
    let mut payload = json!({
        "text": request.alert.title,
        "attachments": [{
            "color": color,
            "fields": [
                {"title": "Severity", "value": request.alert.severity.as_str(), "short": true},
                {"title": "Incident ID", "value": request.incident_id.to_string(), "short": true},
                {"title": "Message", "value": request.alert.message, "short": false},
            ],
        }],
    });
    for key in ["channel", "username", "icon_emoji"] {
        if let Some(value) = request.channel_config.get(key) {
            payload[key] = value.clone();
        }
    }
    payload
}

/// SMS body, truncated to one 160-character segment.
pub fn format_sms_message(request: &NotificationRequest) -> String {
    let message = format!(
        "[{}] {}\nIncident: {}",
        request.alert.severity.as_upper(),
        request.alert.title,
        request.incident_id,
    );
    if message.len() > SMS_MAX_LEN {
        let mut truncated: String = message.chars().take(SMS_MAX_LEN - 3).collect();
        truncated.push_str("...");
        truncated
    } else {
        message
    }
}

/// PagerDuty v2 event; the routing key is attached by the deliverer.
pub fn format_pagerduty_payload(request: &NotificationRequest) -> Value {
    json!({
        "event_action": "trigger",
        "payload": {
            "summary": request.alert.title,
            "source": "Sentinel Compliance Platform",
            "severity": if request.alert.severity == Severity::Critical { "critical" } else { "error" },
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "custom_details": request.alert,
        },
    })
}

//─────────────────────────────
//  Deliverers
//─────────────────────────────

fn config_str<'a>(
    request: &'a NotificationRequest,
    key: &'static str,
) -> Result<&'a str, DeliveryError> {
    request
        .channel_config
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or(DeliveryError::MissingConfig(key))
}

/// Resolve a possibly-encrypted configuration value. Values produced by
/// `sentinel-secrets` are decrypted when a cipher is configured; everything
/// else passes through unchanged.
fn resolve_secret(
    value: &str,
    cipher: Option<&SecretCipher>,
) -> Result<String, DeliveryError> {
    match cipher {
        Some(cipher) if value.starts_with("enc:") => cipher
            .decrypt(value.trim_start_matches("enc:"))
            .map_err(|e| DeliveryError::Secret(e.to_string())),
        _ => Ok(value.to_string()),
    }
}

async fn post_json(
    client: &Client,
    url: &str,
    payload: &Value,
    headers: &[(String, String)],
) -> Result<(), DeliveryError> {
    if reqwest::Url::parse(url).is_err() {
        return Err(DeliveryError::InvalidUrl(url.to_string()));
    }
    let mut builder = client.post(url).json(payload);
    for (key, value) in headers {
        builder = builder.header(key.as_str(), value.as_str());
    }
    let response = builder
        .send()
        .await
        .map_err(|e| DeliveryError::Transport(e.to_string()))?;

    let status = response.status();
    if status.is_success() {
        debug!(url, status = status.as_u16(), "notification POST accepted");
        Ok(())
    } else {
        Err(DeliveryError::HttpStatus(status.as_u16()))
    }
}

/// Generic webhook: POST the envelope to the channel's `url` with its
/// configured headers.
pub async fn send_webhook(
    client: &Client,
    request: &NotificationRequest,
    cipher: Option<&SecretCipher>,
) -> Result<(), DeliveryError> {
    let url = config_str(request, "url")?;
    let mut headers = Vec::new();
    if let Some(configured) = request
        .channel_config
        .get("headers")
        .and_then(|v| v.as_object())
    {
        for (key, value) in configured {
            if let Some(value) = value.as_str() {
                headers.push((key.clone(), resolve_secret(value, cipher)?));
            }
        }
    }
    post_json(client, url, &format_webhook_payload(request), &headers).await
}

/// Slack incoming webhook: POST the attachment payload to `webhook_url`.
pub async fn send_slack(
    client: &Client,
    request: &NotificationRequest,
) -> Result<(), DeliveryError> {
    let url = config_str(request, "webhook_url")?;
    post_json(client, url, &format_slack_payload(request), &[]).await
}

/// Carrier SMS: POST `{to, body}` to the channel's `api_url`, bearer-authed
/// with its `api_key`.
pub async fn send_sms(
    client: &Client,
    request: &NotificationRequest,
    cipher: Option<&SecretCipher>,
) -> Result<(), DeliveryError> {
    let url = config_str(request, "api_url")?;
    let api_key = resolve_secret(config_str(request, "api_key")?, cipher)?;
    let recipient = config_str(request, "recipient")?;

    let payload = json!({
        "to": recipient,
        "body": format_sms_message(request),
    });
    let headers = vec![("Authorization".to_string(), format!("Bearer {api_key}"))];
    post_json(client, url, &payload, &headers).await
}

/// PagerDuty: POST the v2 event with the channel's integration key as the
/// routing key.
pub async fn send_pagerduty(
    client: &Client,
    request: &NotificationRequest,
    cipher: Option<&SecretCipher>,
) -> Result<(), DeliveryError> {
    let integration_key = resolve_secret(config_str(request, "integration_key")?, cipher)?;
    let url = request
        .channel_config
        .get("api_url")
        .and_then(|v| v.as_str())
        .unwrap_or(PAGERDUTY_EVENTS_URL);

    let mut payload = format_pagerduty_payload(request);
    payload["routing_key"] = Value::String(integration_key);
    post_json(client, url, &payload, &[]).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sentinel_types::{AlertPayload, ChannelType};
    use uuid::Uuid;

    fn request(severity: Severity, config: Value) -> NotificationRequest {
        NotificationRequest {
            notification_id: "notif_TEST".into(),
            incident_id: Uuid::new_v4(),
            channel_id: Uuid::new_v4(),
            channel_type: ChannelType::Webhook,
            channel_config: config,
            alert: AlertPayload {
                title: "volume spike".into(),
                message: "too many transactions in window".into(),
                severity,
                data: json!({"current_value": 42}),
            },
            retry_count: 0,
            scheduled_at: Utc::now(),
        }
    }

    #[test]
    fn webhook_payload_merges_custom_fields() {
        let req = request(
            Severity::High,
            json!({"custom_fields": {"team": "compliance", "env": "prod"}}),
        );
        let payload = format_webhook_payload(&req);
        assert_eq!(payload["team"], "compliance");
        assert_eq!(payload["env"], "prod");
        assert_eq!(payload["notification_id"], "notif_TEST");
        assert_eq!(payload["alert"]["title"], "volume spike");
    }

    #[test]
    fn slack_color_tracks_severity() {
        for (severity, color) in [
            (Severity::Low, "good"),
            (Severity::Medium, "good"),
            (Severity::High, "warning"),
            (Severity::Critical, "danger"),
        ] {
            let payload = format_slack_payload(&request(severity, json!({})));
            assert_eq!(payload["attachments"][0]["color"], color);
        }
    }

    #[test]
    fn slack_payload_carries_optional_overrides() {
        let payload = format_slack_payload(&request(
            Severity::High,
            json!({"channel": "#alerts", "username": "sentinel"}),
        ));
        assert_eq!(payload["channel"], "#alerts");
        assert_eq!(payload["username"], "sentinel");
    }

    #[test]
    fn sms_is_truncated_to_one_segment() {
        let mut req = request(Severity::Critical, json!({}));
        req.alert.title = "x".repeat(300);
        let message = format_sms_message(&req);
        assert_eq!(message.chars().count(), 160);
        assert!(message.ends_with("..."));
    }

    #[test]
    fn pagerduty_maps_non_critical_to_error() {
        let payload = format_pagerduty_payload(&request(Severity::Medium, json!({})));
        assert_eq!(payload["payload"]["severity"], "error");
        let payload = format_pagerduty_payload(&request(Severity::Critical, json!({})));
        assert_eq!(payload["payload"]["severity"], "critical");
        assert_eq!(payload["event_action"], "trigger");
    }

    #[test]
    fn channel_config_validation_per_type() {
        use sentinel_types::ChannelType::*;

        assert!(validate_channel_config(
            Email,
            &json!({"recipients": ["ops@example.com"]})
        )
        .is_ok());
        assert!(validate_channel_config(Email, &json!({"recipients": []})).is_err());
        assert!(validate_channel_config(Email, &json!({})).is_err());

        assert!(validate_channel_config(Webhook, &json!({"url": "https://example.com/h"})).is_ok());
        assert!(validate_channel_config(Webhook, &json!({"url": "not a url"})).is_err());
        assert!(validate_channel_config(Webhook, &json!({})).is_err());

        assert!(validate_channel_config(
            Slack,
            &json!({"webhook_url": "https://hooks.slack.com/services/x"})
        )
        .is_ok());

        assert!(validate_channel_config(
            Sms,
            &json!({"api_url": "https://carrier.example/sms", "api_key": "k", "recipient": "+1"})
        )
        .is_ok());
        assert!(validate_channel_config(
            Sms,
            &json!({"api_url": "https://carrier.example/sms", "recipient": "+1"})
        )
        .is_err());

        assert!(validate_channel_config(Pagerduty, &json!({"integration_key": "pd"})).is_ok());
        assert!(validate_channel_config(Pagerduty, &json!({})).is_err());
    }

    #[test]
    fn error_classification() {
        assert!(DeliveryError::HttpStatus(502).is_transient());
        assert!(DeliveryError::Transport("reset".into()).is_transient());
        assert!(!DeliveryError::HttpStatus(404).is_transient());
        assert!(!DeliveryError::MissingConfig("url").is_transient());
        assert!(!DeliveryError::InvalidUrl("nope".into()).is_transient());
    }
}
