//! The notification service: worker pool, retry task, and metrics.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rand::Rng;
use reqwest::Client;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use sentinel_secrets::SecretCipher;
use sentinel_store::RetryCandidate;
use sentinel_types::{AlertPayload, ChannelType, DeliveryStatus};

use crate::channels::{self, DeliveryError};
use crate::config::{NotifyConfig, SmtpConfig};
use crate::email::{build_email, EmailTransport};
use crate::{NotifyError, NotifyStore};

/// One unit of delivery work, carried from the API boundary to a worker.
#[derive(Debug, Clone)]
pub struct NotificationRequest {
    /// Persisted attempt identifier.
    pub notification_id: String,
    /// Incident being notified.
    pub incident_id: Uuid,
    /// Channel to deliver through.
    pub channel_id: Uuid,
    /// Channel type, resolved at enqueue time.
    pub channel_type: ChannelType,
    /// Channel configuration, resolved at enqueue time.
    pub channel_config: serde_json::Value,
    /// Alert content.
    pub alert: AlertPayload,
    /// Retries already attempted for this notification.
    pub retry_count: u32,
    /// When the request was created or became due.
    pub scheduled_at: DateTime<Utc>,
}

/// Service-wide delivery counters.
#[derive(Debug, Clone, Default)]
pub struct NotificationMetrics {
    /// First-pass deliveries attempted (retries not included).
    pub total_sent: u64,
    /// Successful deliveries, retries included.
    pub successful_deliveries: u64,
    /// Failed deliveries, retries included.
    pub failed_deliveries: u64,
    /// Retry deliveries attempted.
    pub retries_attempted: u64,
    /// Success counts per channel type.
    pub deliveries_by_channel: HashMap<String, u64>,
    /// Failure counts per channel type.
    pub failures_by_channel: HashMap<String, u64>,
    /// Rolling average first-pass delivery time in milliseconds.
    pub avg_delivery_time_ms: f64,
    /// When the service last finished a delivery.
    pub last_notification_time: Option<DateTime<Utc>>,
}

/// Exponential backoff with ±25 % jitter: `base · 2^retry_count`, jittered.
pub fn retry_delay(base: Duration, retry_count: u32) -> Duration {
    let exponential = base.as_secs_f64() * 2f64.powi(retry_count.min(16) as i32);
    let jitter = rand::thread_rng().gen_range(-0.25..=0.25);
    Duration::from_secs_f64(exponential * (1.0 + jitter))
}

fn generate_notification_id() -> String {
    const CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..16)
        .map(|_| CHARS[rng.gen_range(0..CHARS.len())] as char)
        .collect();
    format!("notif_{suffix}")
}

struct Core {
    store: Arc<dyn NotifyStore>,
    http: Client,
    email: Arc<dyn EmailTransport>,
    smtp: SmtpConfig,
    cipher: Option<SecretCipher>,
    config: NotifyConfig,
    metrics: Mutex<NotificationMetrics>,
}

/// Concurrent multi-channel notification dispatcher.
pub struct NotificationService {
    core: Arc<Core>,
    tx: mpsc::Sender<NotificationRequest>,
    rx: Arc<Mutex<mpsc::Receiver<NotificationRequest>>>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl NotificationService {
    /// Build a service over the given store and email transport. The
    /// cipher, when present, is used to open encrypted channel secrets.
    pub fn new(
        store: Arc<dyn NotifyStore>,
        email: Arc<dyn EmailTransport>,
        smtp: SmtpConfig,
        cipher: Option<SecretCipher>,
        config: NotifyConfig,
    ) -> anyhow::Result<Self> {
        let http = Client::builder().timeout(config.http_timeout).build()?;
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        Ok(Self {
            core: Arc::new(Core {
                store,
                http,
                email,
                smtp,
                cipher,
                config,
                metrics: Mutex::new(NotificationMetrics::default()),
            }),
            tx,
            rx: Arc::new(Mutex::new(rx)),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Start the delivery workers and the retry task. A second call is a
    /// logged no-op.
    pub async fn start(&self) {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            warn!("notification service is already running");
            return;
        }

        for worker in 0..self.core.config.workers {
            let core = Arc::clone(&self.core);
            let rx = Arc::clone(&self.rx);
            let cancel = self.cancel.clone();
            tasks.push(tokio::spawn(async move {
                debug!(worker, "notification worker started");
                loop {
                    let request = {
                        let mut rx = rx.lock().await;
                        tokio::select! {
                            _ = cancel.cancelled() => None,
                            request = rx.recv() => request,
                        }
                    };
                    match request {
                        Some(request) => {
                            core.deliver_and_record(request, false).await;
                        }
                        None => break,
                    }
                }
                debug!(worker, "notification worker ended");
            }));
        }

        {
            let core = Arc::clone(&self.core);
            let cancel = self.cancel.clone();
            let interval = self.core.config.retry_check_interval;
            tasks.push(tokio::spawn(async move {
                debug!("retry worker started");
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(interval) => {}
                    }
                    core.run_retry_pass().await;
                }
                debug!("retry worker ended");
            }));
        }

        info!(
            workers = self.core.config.workers,
            "notification service started"
        );
    }

    /// Stop all workers; in-flight deliveries finish first.
    pub async fn stop(&self) {
        self.cancel.cancel();
        for task in self.tasks.lock().await.drain(..) {
            let _ = task.await;
        }
        info!("notification service stopped");
    }

    /// Deliver synchronously and return the notification id. The attempt
    /// row records the outcome either way.
    pub async fn send_notification(
        &self,
        incident_id: Uuid,
        channel_id: Uuid,
        alert: AlertPayload,
    ) -> Result<String, NotifyError> {
        let request = self.prepare_request(incident_id, channel_id, alert).await?;
        let notification_id = request.notification_id.clone();
        self.core.deliver_and_record(request, false).await;
        Ok(notification_id)
    }

    /// Enqueue for asynchronous delivery and return immediately.
    pub async fn send_notification_async(
        &self,
        incident_id: Uuid,
        channel_id: Uuid,
        alert: AlertPayload,
    ) -> Result<String, NotifyError> {
        let request = self.prepare_request(incident_id, channel_id, alert).await?;
        let notification_id = request.notification_id.clone();
        self.tx
            .send(request)
            .await
            .map_err(|_| NotifyError::NotRunning)?;
        debug!(notification_id, "enqueued async notification");
        Ok(notification_id)
    }

    /// Enqueue a batch; unknown or disabled channels are logged and
    /// skipped. Returns the ids that were enqueued.
    pub async fn send_notifications_batch(
        &self,
        requests: Vec<(Uuid, Uuid, AlertPayload)>,
    ) -> Vec<String> {
        let mut ids = Vec::with_capacity(requests.len());
        let total = requests.len();
        for (incident_id, channel_id, alert) in requests {
            match self
                .send_notification_async(incident_id, channel_id, alert)
                .await
            {
                Ok(id) => ids.push(id),
                Err(e) => warn!(%incident_id, %channel_id, error = %e, "skipped batch entry"),
            }
        }
        info!(enqueued = ids.len(), total, "enqueued notification batch");
        ids
    }

    /// Validate and persist a new channel.
    pub async fn create_channel(
        &self,
        channel_type: ChannelType,
        channel_name: &str,
        configuration: serde_json::Value,
    ) -> Result<sentinel_types::NotificationChannel, NotifyError> {
        channels::validate_channel_config(channel_type, &configuration)?;
        let channel = sentinel_types::NotificationChannel {
            channel_id: Uuid::new_v4(),
            channel_type,
            channel_name: channel_name.to_string(),
            configuration,
            is_enabled: true,
            last_tested_at: None,
            test_status: None,
        };
        self.core.store.insert_channel(&channel).await?;
        info!(channel = %channel.channel_id, kind = channel_type.as_str(), "created notification channel");
        Ok(channel)
    }

    /// Probe a channel with a synthetic payload and record the outcome on
    /// the channel row. Works on disabled channels.
    pub async fn test_channel(
        &self,
        channel_id: Uuid,
        alert: AlertPayload,
    ) -> Result<bool, NotifyError> {
        let channel = self
            .core
            .store
            .channel(channel_id)
            .await?
            .ok_or(NotifyError::ChannelUnavailable(channel_id))?;

        let request = NotificationRequest {
            notification_id: generate_notification_id(),
            incident_id: Uuid::nil(),
            channel_id,
            channel_type: channel.channel_type,
            channel_config: channel.configuration,
            alert,
            retry_count: 0,
            scheduled_at: Utc::now(),
        };
        let outcome = self.core.deliver(&request).await;
        let success = outcome.is_ok();
        self.core
            .store
            .record_channel_test(
                channel_id,
                if success { "success" } else { "failed" },
                Utc::now(),
            )
            .await?;
        if let Err(e) = outcome {
            debug!(channel = %channel_id, error = %e, "channel test failed");
        }
        Ok(success)
    }

    /// Queue a failed notification for another delivery. Rejected when the
    /// notification already reached `delivered`.
    pub async fn redeliver(&self, notification_id: &str) -> Result<(), NotifyError> {
        let attempt = self
            .core
            .store
            .attempt(notification_id)
            .await?
            .ok_or_else(|| NotifyError::NotificationNotFound(notification_id.to_string()))?;
        if attempt.delivery_status == DeliveryStatus::Delivered {
            return Err(NotifyError::AlreadyDelivered(notification_id.to_string()));
        }
        self.core
            .store
            .schedule_attempt_retry(notification_id, attempt.retry_count, Utc::now())
            .await?;
        Ok(())
    }

    /// Run one retry pass inline; the background retry task uses the same
    /// path on its interval.
    pub async fn run_retry_pass(&self) {
        self.core.run_retry_pass().await;
    }

    /// Snapshot of the delivery counters.
    pub async fn metrics(&self) -> NotificationMetrics {
        self.core.metrics.lock().await.clone()
    }

    /// Zero all counters.
    pub async fn reset_metrics(&self) {
        *self.core.metrics.lock().await = NotificationMetrics::default();
    }

    async fn prepare_request(
        &self,
        incident_id: Uuid,
        channel_id: Uuid,
        alert: AlertPayload,
    ) -> Result<NotificationRequest, NotifyError> {
        let channel = self
            .core
            .store
            .enabled_channel(channel_id)
            .await?
            .ok_or(NotifyError::ChannelUnavailable(channel_id))?;

        let request = NotificationRequest {
            notification_id: generate_notification_id(),
            incident_id,
            channel_id,
            channel_type: channel.channel_type,
            channel_config: channel.configuration,
            alert,
            retry_count: 0,
            scheduled_at: Utc::now(),
        };
        self.core
            .store
            .insert_attempt(&sentinel_types::NotificationAttempt {
                notification_id: request.notification_id.clone(),
                incident_id,
                channel_id,
                delivery_status: DeliveryStatus::Pending,
                retry_count: 0,
                error_message: None,
                sent_at: request.scheduled_at,
                next_retry_at: None,
            })
            .await?;
        Ok(request)
    }
}

impl Core {
    /// Dispatch on the channel variant. Success maps to `sent` for email
    /// (SMTP gives no delivery confirmation) and `delivered` for HTTP
    /// channels.
    async fn deliver(
        &self,
        request: &NotificationRequest,
    ) -> Result<DeliveryStatus, DeliveryError> {
        match request.channel_type {
            ChannelType::Email => {
                let message = build_email(request, &self.smtp)?;
                self.email.send(&self.smtp, &message).await?;
                Ok(DeliveryStatus::Sent)
            }
            ChannelType::Webhook => {
                channels::send_webhook(&self.http, request, self.cipher.as_ref()).await?;
                Ok(DeliveryStatus::Delivered)
            }
            ChannelType::Slack => {
                channels::send_slack(&self.http, request).await?;
                Ok(DeliveryStatus::Delivered)
            }
            ChannelType::Sms => {
                channels::send_sms(&self.http, request, self.cipher.as_ref()).await?;
                Ok(DeliveryStatus::Delivered)
            }
            ChannelType::Pagerduty => {
                channels::send_pagerduty(&self.http, request, self.cipher.as_ref()).await?;
                Ok(DeliveryStatus::Delivered)
            }
        }
    }

    async fn deliver_and_record(&self, request: NotificationRequest, is_retry: bool) {
        let started = Instant::now();
        let outcome = self.deliver(&request).await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        let channel_key = request.channel_type.as_str().to_string();

        {
            let mut metrics = self.metrics.lock().await;
            if is_retry {
                metrics.retries_attempted += 1;
            } else {
                metrics.total_sent += 1;
                let n = metrics.total_sent as f64;
                metrics.avg_delivery_time_ms =
                    (metrics.avg_delivery_time_ms * (n - 1.0) + elapsed_ms) / n;
            }
            match &outcome {
                Ok(_) => {
                    metrics.successful_deliveries += 1;
                    *metrics.deliveries_by_channel.entry(channel_key).or_insert(0) += 1;
                }
                Err(_) => {
                    metrics.failed_deliveries += 1;
                    *metrics.failures_by_channel.entry(channel_key).or_insert(0) += 1;
                }
            }
            metrics.last_notification_time = Some(Utc::now());
        }

        match outcome {
            Ok(status) => {
                if let Err(e) = self
                    .store
                    .update_attempt_status(&request.notification_id, status, None)
                    .await
                {
                    error!(notification = %request.notification_id, error = %e, "failed to record delivery");
                }
                info!(
                    notification = %request.notification_id,
                    channel = %request.channel_type.as_str(),
                    retry = is_retry,
                    "notification delivered"
                );
            }
            Err(e) => {
                warn!(
                    notification = %request.notification_id,
                    channel = %request.channel_type.as_str(),
                    error = %e,
                    "notification delivery failed"
                );
                if let Err(se) = self
                    .store
                    .update_attempt_status(
                        &request.notification_id,
                        DeliveryStatus::Failed,
                        Some(&e.to_string()),
                    )
                    .await
                {
                    error!(notification = %request.notification_id, error = %se, "failed to record failure");
                }
                self.handle_failure(&request, &e).await;
            }
        }
    }

    async fn handle_failure(&self, request: &NotificationRequest, error: &DeliveryError) {
        let max = self.config.max_retry_attempts;
        let result = if error.is_transient() && request.retry_count < max {
            let delay = retry_delay(self.config.base_retry_delay, request.retry_count);
            let next_retry_at = Utc::now()
                + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
            debug!(
                notification = %request.notification_id,
                attempt = request.retry_count + 1,
                delay_secs = delay.as_secs(),
                "scheduled notification retry"
            );
            self.store
                .schedule_attempt_retry(&request.notification_id, request.retry_count + 1, next_retry_at)
                .await
        } else if error.is_transient() {
            self.store
                .update_attempt_status(
                    &request.notification_id,
                    DeliveryStatus::Failed,
                    Some("Max retry attempts exceeded"),
                )
                .await
        } else {
            // Permanent failure: pin the counter at the ceiling so the
            // reclaim pass never picks the row up.
            self.store
                .schedule_attempt_retry(&request.notification_id, max, Utc::now())
                .await
        };
        if let Err(e) = result {
            error!(notification = %request.notification_id, error = %e, "failed to record retry state");
        }
    }

    async fn run_retry_pass(&self) {
        let due = match self
            .store
            .attempts_due_for_retry(
                self.config.max_retry_attempts,
                self.config.retry_batch_limit,
                Utc::now(),
            )
            .await
        {
            Ok(due) => due,
            Err(e) => {
                warn!(error = %e, "failed to reclaim notifications for retry");
                return;
            }
        };
        if due.is_empty() {
            return;
        }
        debug!(count = due.len(), "reclaimed notifications for retry");

        for candidate in due {
            let RetryCandidate {
                attempt,
                channel,
                alert,
            } = candidate;
            if let Err(e) = self
                .store
                .update_attempt_status(&attempt.notification_id, DeliveryStatus::Retrying, None)
                .await
            {
                error!(notification = %attempt.notification_id, error = %e, "failed to mark retry in flight");
                continue;
            }
            let request = NotificationRequest {
                notification_id: attempt.notification_id.clone(),
                incident_id: attempt.incident_id,
                channel_id: attempt.channel_id,
                channel_type: channel.channel_type,
                channel_config: channel.configuration,
                alert,
                retry_count: attempt.retry_count,
                scheduled_at: Utc::now(),
            };
            self.deliver_and_record(request, true).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::email::RecordingTransport;
    use sentinel_store::{ChannelStore, MemoryStore, NotificationStore};
    use sentinel_types::{NotificationChannel, Severity};
    use serde_json::json;

    fn alert() -> AlertPayload {
        AlertPayload {
            title: "volume spike".into(),
            message: "too many transactions".into(),
            severity: Severity::High,
            data: json!({}),
        }
    }

    fn email_channel() -> NotificationChannel {
        NotificationChannel {
            channel_id: Uuid::new_v4(),
            channel_type: ChannelType::Email,
            channel_name: "ops email".into(),
            configuration: json!({"recipients": ["ops@example.com"]}),
            is_enabled: true,
            last_tested_at: None,
            test_status: None,
        }
    }

    async fn service_with(
        store: &MemoryStore,
        transport: Arc<RecordingTransport>,
        config: NotifyConfig,
    ) -> NotificationService {
        NotificationService::new(
            Arc::new(store.clone()),
            transport,
            SmtpConfig::default(),
            None,
            config,
        )
        .unwrap()
    }

    fn zero_delay_config() -> NotifyConfig {
        NotifyConfig {
            base_retry_delay: Duration::from_secs(0),
            ..NotifyConfig::default()
        }
    }

    #[tokio::test]
    async fn email_delivery_marks_sent() {
        let store = MemoryStore::new();
        let channel = email_channel();
        store.insert_channel(&channel).await.unwrap();
        let transport = Arc::new(RecordingTransport::new());
        let service = service_with(&store, Arc::clone(&transport), NotifyConfig::default()).await;

        let id = service
            .send_notification(Uuid::new_v4(), channel.channel_id, alert())
            .await
            .unwrap();

        assert!(id.starts_with("notif_"));
        let attempt = store.attempt(&id).await.unwrap().unwrap();
        assert_eq!(attempt.delivery_status, DeliveryStatus::Sent);
        assert_eq!(transport.sent().await.len(), 1);
        let metrics = service.metrics().await;
        assert_eq!(metrics.total_sent, 1);
        assert_eq!(metrics.deliveries_by_channel["email"], 1);
    }

    #[tokio::test]
    async fn disabled_channel_is_rejected() {
        let store = MemoryStore::new();
        let mut channel = email_channel();
        channel.is_enabled = false;
        store.insert_channel(&channel).await.unwrap();
        let service = service_with(
            &store,
            Arc::new(RecordingTransport::new()),
            NotifyConfig::default(),
        )
        .await;

        assert!(matches!(
            service
                .send_notification(Uuid::new_v4(), channel.channel_id, alert())
                .await,
            Err(NotifyError::ChannelUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn transient_failure_retries_and_recovers() {
        let store = MemoryStore::new();
        let channel = email_channel();
        store.insert_channel(&channel).await.unwrap();
        let transport = Arc::new(RecordingTransport::new());
        transport.fail_with("451 greylisted").await;
        let service = service_with(&store, Arc::clone(&transport), zero_delay_config()).await;

        let id = service
            .send_notification(Uuid::new_v4(), channel.channel_id, alert())
            .await
            .unwrap();
        let attempt = store.attempt(&id).await.unwrap().unwrap();
        assert_eq!(attempt.delivery_status, DeliveryStatus::Failed);
        assert_eq!(attempt.retry_count, 1);
        assert!(attempt.next_retry_at.is_some());

        transport.recover().await;
        service.run_retry_pass().await;

        let attempt = store.attempt(&id).await.unwrap().unwrap();
        assert_eq!(attempt.delivery_status, DeliveryStatus::Sent);
        let metrics = service.metrics().await;
        assert_eq!(metrics.retries_attempted, 1);
        assert_eq!(metrics.successful_deliveries, 1);
        assert_eq!(metrics.failed_deliveries, 1);
    }

    #[tokio::test]
    async fn retry_ceiling_is_terminal() {
        let store = MemoryStore::new();
        let channel = email_channel();
        store.insert_channel(&channel).await.unwrap();
        let transport = Arc::new(RecordingTransport::new());
        transport.fail_with("connection refused").await;
        let service = service_with(
            &store,
            Arc::clone(&transport),
            NotifyConfig {
                max_retry_attempts: 2,
                base_retry_delay: Duration::from_secs(0),
                ..NotifyConfig::default()
            },
        )
        .await;

        let id = service
            .send_notification(Uuid::new_v4(), channel.channel_id, alert())
            .await
            .unwrap();

        // Drain every eligible retry; the counter never exceeds the ceiling.
        for _ in 0..5 {
            service.run_retry_pass().await;
        }

        let attempt = store.attempt(&id).await.unwrap().unwrap();
        assert_eq!(attempt.delivery_status, DeliveryStatus::Failed);
        assert_eq!(attempt.retry_count, 2);
        assert_eq!(service.metrics().await.retries_attempted, 1);
    }

    #[tokio::test]
    async fn permanent_failure_is_never_retried() {
        let store = MemoryStore::new();
        let channel = NotificationChannel {
            channel_id: Uuid::new_v4(),
            channel_type: ChannelType::Webhook,
            channel_name: "bad hook".into(),
            // No `url`, so the first delivery fails permanently.
            configuration: json!({}),
            is_enabled: true,
            last_tested_at: None,
            test_status: None,
        };
        store.insert_channel(&channel).await.unwrap();
        let service = service_with(
            &store,
            Arc::new(RecordingTransport::new()),
            zero_delay_config(),
        )
        .await;

        let id = service
            .send_notification(Uuid::new_v4(), channel.channel_id, alert())
            .await
            .unwrap();
        service.run_retry_pass().await;

        let attempt = store.attempt(&id).await.unwrap().unwrap();
        assert_eq!(attempt.delivery_status, DeliveryStatus::Failed);
        assert_eq!(attempt.retry_count, 5);
        assert_eq!(service.metrics().await.retries_attempted, 0);
    }

    #[tokio::test]
    async fn redelivering_a_delivered_notification_is_rejected() {
        let store = MemoryStore::new();
        let channel = email_channel();
        store.insert_channel(&channel).await.unwrap();
        let service = service_with(
            &store,
            Arc::new(RecordingTransport::new()),
            NotifyConfig::default(),
        )
        .await;

        let id = service
            .send_notification(Uuid::new_v4(), channel.channel_id, alert())
            .await
            .unwrap();
        store
            .update_attempt_status(&id, DeliveryStatus::Delivered, None)
            .await
            .unwrap();

        assert!(matches!(
            service.redeliver(&id).await,
            Err(NotifyError::AlreadyDelivered(_))
        ));
    }

    #[tokio::test]
    async fn workers_drain_the_async_queue() {
        let store = MemoryStore::new();
        let channel = email_channel();
        store.insert_channel(&channel).await.unwrap();
        let transport = Arc::new(RecordingTransport::new());
        let service = service_with(&store, Arc::clone(&transport), NotifyConfig::default()).await;
        service.start().await;

        let incident = Uuid::new_v4();
        let batch = (0..3)
            .map(|_| (incident, channel.channel_id, alert()))
            .collect();
        let ids = service.send_notifications_batch(batch).await;
        assert_eq!(ids.len(), 3);

        tokio::time::sleep(Duration::from_millis(100)).await;
        service.stop().await;

        assert_eq!(transport.sent().await.len(), 3);
        assert_eq!(service.metrics().await.total_sent, 3);
    }

    #[test]
    fn backoff_delay_stays_within_jitter_bounds() {
        let base = Duration::from_secs(60);
        for retry_count in 0..5 {
            let expected = 60.0 * 2f64.powi(retry_count as i32);
            for _ in 0..50 {
                let delay = retry_delay(base, retry_count).as_secs_f64();
                assert!(delay >= expected * 0.75 - f64::EPSILON);
                assert!(delay <= expected * 1.25 + f64::EPSILON);
            }
        }
    }
}
