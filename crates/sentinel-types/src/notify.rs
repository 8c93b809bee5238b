//! Notification channels and delivery attempts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{ParseEnumError, Severity};

//─────────────────────────────
//  Enumerations
//─────────────────────────────

/// Delivery mechanism for a notification channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    /// SMTP submission.
    Email,
    /// Generic HTTP POST of a JSON envelope.
    Webhook,
    /// Slack incoming webhook with attachment formatting.
    Slack,
    /// Carrier HTTP API with a 160-character text body.
    Sms,
    /// PagerDuty Events API v2.
    Pagerduty,
}

impl ChannelType {
    /// Wire representation, matching the `channel_type` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::Email => "email",
            ChannelType::Webhook => "webhook",
            ChannelType::Slack => "slack",
            ChannelType::Sms => "sms",
            ChannelType::Pagerduty => "pagerduty",
        }
    }

    /// Parse the wire representation.
    pub fn parse(s: &str) -> Result<Self, ParseEnumError> {
        match s {
            "email" => Ok(ChannelType::Email),
            "webhook" => Ok(ChannelType::Webhook),
            "slack" => Ok(ChannelType::Slack),
            "sms" => Ok(ChannelType::Sms),
            "pagerduty" => Ok(ChannelType::Pagerduty),
            other => Err(ParseEnumError::new("channel type", other)),
        }
    }
}

/// Delivery state of a single notification attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Created, not yet dispatched.
    Pending,
    /// Handed to the transport; confirmation pending.
    Sent,
    /// Confirmed delivered.
    Delivered,
    /// Delivery failed; may be retried until the retry ceiling.
    Failed,
    /// The receiving side rejected the message permanently.
    Bounced,
    /// A retry has been scheduled.
    Retrying,
}

impl DeliveryStatus {
    /// Wire representation, matching the `delivery_status` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Bounced => "bounced",
            DeliveryStatus::Retrying => "retrying",
        }
    }

    /// Parse the wire representation.
    pub fn parse(s: &str) -> Result<Self, ParseEnumError> {
        match s {
            "pending" => Ok(DeliveryStatus::Pending),
            "sent" => Ok(DeliveryStatus::Sent),
            "delivered" => Ok(DeliveryStatus::Delivered),
            "failed" => Ok(DeliveryStatus::Failed),
            "bounced" => Ok(DeliveryStatus::Bounced),
            "retrying" => Ok(DeliveryStatus::Retrying),
            other => Err(ParseEnumError::new("delivery status", other)),
        }
    }
}

//─────────────────────────────
//  Entities
//─────────────────────────────

/// An operator-configured delivery endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationChannel {
    /// Stable identifier, referenced from alert rules.
    pub channel_id: Uuid,
    /// Delivery mechanism.
    pub channel_type: ChannelType,
    /// Display name.
    pub channel_name: String,
    /// Type-specific configuration (url, webhook_url, recipients,
    /// integration_key, headers, custom_fields, …). Secret values may be
    /// stored in the encrypted envelope format of `sentinel-secrets`.
    pub configuration: serde_json::Value,
    /// Disabled channels reject sends.
    pub is_enabled: bool,
    /// When the channel was last probed with `test_channel`.
    pub last_tested_at: Option<DateTime<Utc>>,
    /// Outcome of the last probe (`success` / `failed`).
    pub test_status: Option<String>,
}

/// One persisted delivery attempt for an incident on a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationAttempt {
    /// Identifier in the `notif_<16 alnum>` form.
    pub notification_id: String,
    /// Incident being notified.
    pub incident_id: Uuid,
    /// Channel delivered through.
    pub channel_id: Uuid,
    /// Current delivery state.
    pub delivery_status: DeliveryStatus,
    /// How many retries have been attempted; never exceeds the configured
    /// ceiling.
    pub retry_count: u32,
    /// Last transport error, if any.
    pub error_message: Option<String>,
    /// When the attempt row was created.
    pub sent_at: DateTime<Utc>,
    /// When the next retry becomes due.
    pub next_retry_at: Option<DateTime<Utc>>,
}

/// The alert content a notification carries, independent of channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertPayload {
    /// Incident title (`[SEVERITY] rule name`).
    pub title: String,
    /// Incident message body.
    pub message: String,
    /// Incident severity; drives Slack colors and PagerDuty mapping.
    pub severity: Severity,
    /// Evaluator firing context, forwarded verbatim.
    #[serde(default)]
    pub data: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_type_round_trips() {
        for s in ["email", "webhook", "slack", "sms", "pagerduty"] {
            assert_eq!(ChannelType::parse(s).unwrap().as_str(), s);
        }
        assert!(ChannelType::parse("carrier-pigeon").is_err());
    }

    #[test]
    fn delivery_status_serializes_snake_case() {
        let s = serde_json::to_string(&DeliveryStatus::Retrying).unwrap();
        assert_eq!(s, "\"retrying\"");
    }
}
