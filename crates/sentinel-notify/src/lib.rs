#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! **sentinel-notify** – Multi-channel notification delivery for Sentinel.
//!
//! Accepts notification requests for alert incidents and delivers them
//! through any configured channel: email (SMTP), generic webhooks, Slack,
//! SMS carriers, and PagerDuty. Channel types are a tagged variant with one
//! formatter and one deliverer each, not a class hierarchy.
//!
//! Delivery runs on a pool of worker tasks fed by a bounded queue. Every
//! attempt is persisted; transient failures are retried by a background
//! task with exponential backoff and ±25 % jitter until the configured
//! ceiling, after which the attempt is terminally `failed`. Permanent
//! failures (4xx, malformed configuration) are never retried.

use async_trait::async_trait;
use uuid::Uuid;

use sentinel_alerts::NotificationSink;
use sentinel_store::{ChannelStore, NotificationStore};
use sentinel_types::{AlertIncident, AlertPayload};

pub mod channels;
pub mod config;
pub mod email;
pub mod service;

pub use channels::{validate_channel_config, DeliveryError};
pub use config::{NotifyConfig, SmtpConfig};
pub use email::{EmailMessage, EmailTransport, RecordingTransport};
pub use service::{NotificationMetrics, NotificationRequest, NotificationService};

/// The store slices the notification service needs.
pub trait NotifyStore: ChannelStore + NotificationStore + Send + Sync {}

impl<T> NotifyStore for T where T: ChannelStore + NotificationStore + Send + Sync {}

/// Errors surfaced by the notification API boundary.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// The channel does not exist or is disabled.
    #[error("notification channel not found or disabled: {0}")]
    ChannelUnavailable(Uuid),
    /// The channel configuration is malformed for its type.
    #[error("invalid channel configuration: {0}")]
    InvalidChannelConfig(String),
    /// Unknown notification id.
    #[error("notification not found: {0}")]
    NotificationNotFound(String),
    /// The notification already reached `delivered`; re-delivery is
    /// rejected.
    #[error("notification {0} was already delivered")]
    AlreadyDelivered(String),
    /// The service has been stopped and accepts no new work.
    #[error("notification service is not running")]
    NotRunning,
    /// The persistence store failed.
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[async_trait]
impl NotificationSink for NotificationService {
    async fn send_alert(
        &self,
        incident: &AlertIncident,
        channels: &[Uuid],
        payload: AlertPayload,
    ) -> anyhow::Result<()> {
        for channel_id in channels {
            if let Err(e) = self
                .send_notification_async(incident.incident_id, *channel_id, payload.clone())
                .await
            {
                tracing::error!(
                    incident = %incident.incident_id,
                    channel = %channel_id,
                    error = %e,
                    "failed to enqueue notification"
                );
            }
        }
        Ok(())
    }

    async fn retry_due(&self) -> anyhow::Result<()> {
        self.run_retry_pass().await;
        Ok(())
    }
}
