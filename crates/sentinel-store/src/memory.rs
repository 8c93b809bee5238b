//! In-memory store driver.
//!
//! All maps live behind one `tokio::sync::Mutex`, which is what makes the
//! scan-job claim atomic: two workers racing on `claim_next_job` serialize
//! on the lock and only one sees the job in `queued`.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use sentinel_types::{
    AlertIncident, AlertPayload, AlertRule, AssistanceRequest, CollaborationSession, DeliveryStatus,
    FraudAlert, FraudRule, HumanUser, IncidentFilter, IncidentStatistics, MetricBaseline,
    MetricSample, NotificationAttempt, NotificationChannel, ScanFilters, ScanJob, ScanStatus,
    SubscriptionFilter, TransactionRecord,
};

use crate::{
    ChannelStore, FraudRuleStore, IncidentStore, MetricsSource, NotificationStore, RetryCandidate,
    RuleStore, ScanStore, SessionStore, SubscriptionStore, TransactionSource,
};

#[derive(Default)]
struct Inner {
    rules: HashMap<Uuid, AlertRule>,
    incidents: HashMap<Uuid, AlertIncident>,
    channels: HashMap<Uuid, NotificationChannel>,
    attempts: HashMap<String, NotificationAttempt>,
    metrics: HashMap<String, MetricSample>,
    baselines: HashMap<String, MetricBaseline>,
    subscriptions: HashMap<String, SubscriptionFilter>,
    jobs: HashMap<Uuid, ScanJob>,
    transactions: Vec<TransactionRecord>,
    fraud_rules: HashMap<Uuid, FraudRule>,
    fraud_alerts: Vec<FraudAlert>,
    sessions: HashMap<Uuid, CollaborationSession>,
    users: HashMap<String, HumanUser>,
    requests: HashMap<Uuid, AssistanceRequest>,
}

/// In-memory driver implementing the full [`crate::Store`] surface.
///
/// Cloning is cheap and shares state, so one instance can back several
/// components in a test or a single-process deployment.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    //─────────────────────────────
    //  Data injection (tests, single-process deployments)
    //─────────────────────────────

    /// Set the current sample for a named metric.
    pub async fn set_metric_sample(&self, sample: MetricSample) {
        let mut inner = self.inner.lock().await;
        inner.metrics.insert(sample.metric.clone(), sample);
    }

    /// Set the trailing baseline for a named metric.
    pub async fn set_metric_baseline(&self, metric: &str, baseline: MetricBaseline) {
        let mut inner = self.inner.lock().await;
        inner.baselines.insert(metric.to_string(), baseline);
    }

    /// Append transactions for scan workers to stream.
    pub async fn add_transactions(&self, transactions: Vec<TransactionRecord>) {
        let mut inner = self.inner.lock().await;
        inner.transactions.extend(transactions);
    }

    /// Snapshot of every fraud alert raised so far.
    pub async fn fraud_alerts(&self) -> Vec<FraudAlert> {
        self.inner.lock().await.fraud_alerts.clone()
    }

    /// Snapshot of every notification attempt row.
    pub async fn attempts(&self) -> Vec<NotificationAttempt> {
        self.inner.lock().await.attempts.values().cloned().collect()
    }

    /// Snapshot of every incident row.
    pub async fn incidents(&self) -> Vec<AlertIncident> {
        self.inner.lock().await.incidents.values().cloned().collect()
    }
}

#[async_trait]
impl RuleStore for MemoryStore {
    async fn enabled_rules(&self) -> Result<Vec<AlertRule>> {
        let inner = self.inner.lock().await;
        let mut rules: Vec<_> = inner
            .rules
            .values()
            .filter(|r| r.is_enabled)
            .cloned()
            .collect();
        rules.sort_by_key(|r| r.created_at);
        Ok(rules)
    }

    async fn rule(&self, rule_id: Uuid) -> Result<Option<AlertRule>> {
        Ok(self.inner.lock().await.rules.get(&rule_id).cloned())
    }

    async fn insert_rule(&self, rule: &AlertRule) -> Result<()> {
        self.inner
            .lock()
            .await
            .rules
            .insert(rule.rule_id, rule.clone());
        Ok(())
    }

    async fn set_rule_last_triggered(&self, rule_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(rule) = inner.rules.get_mut(&rule_id) {
            rule.last_triggered_at = Some(at);
            rule.updated_at = at;
        }
        Ok(())
    }

    async fn delete_rule(&self, rule_id: Uuid) -> Result<()> {
        self.inner.lock().await.rules.remove(&rule_id);
        Ok(())
    }
}

#[async_trait]
impl IncidentStore for MemoryStore {
    async fn insert_incident(&self, incident: &AlertIncident) -> Result<()> {
        self.inner
            .lock()
            .await
            .incidents
            .insert(incident.incident_id, incident.clone());
        Ok(())
    }

    async fn incident(&self, incident_id: Uuid) -> Result<Option<AlertIncident>> {
        Ok(self.inner.lock().await.incidents.get(&incident_id).cloned())
    }

    async fn update_incident(&self, incident: &AlertIncident) -> Result<()> {
        self.inner
            .lock()
            .await
            .incidents
            .insert(incident.incident_id, incident.clone());
        Ok(())
    }

    async fn incidents_for_rule(&self, rule_id: Uuid) -> Result<Vec<AlertIncident>> {
        let inner = self.inner.lock().await;
        let mut incidents: Vec<_> = inner
            .incidents
            .values()
            .filter(|i| i.rule_id == rule_id)
            .cloned()
            .collect();
        incidents.sort_by(|a, b| b.triggered_at.cmp(&a.triggered_at));
        Ok(incidents)
    }

    async fn open_incidents_for_rule(&self, rule_id: Uuid) -> Result<Vec<AlertIncident>> {
        let all = self.incidents_for_rule(rule_id).await?;
        Ok(all.into_iter().filter(|i| !i.status.is_terminal()).collect())
    }

    async fn list_incidents(&self, filter: &IncidentFilter) -> Result<Vec<AlertIncident>> {
        let inner = self.inner.lock().await;
        let mut incidents: Vec<_> = inner
            .incidents
            .values()
            .filter(|i| filter.matches(i))
            .cloned()
            .collect();
        incidents.sort_by(|a, b| b.triggered_at.cmp(&a.triggered_at));
        if let Some(limit) = filter.limit {
            incidents.truncate(limit);
        }
        Ok(incidents)
    }

    async fn incident_statistics(&self) -> Result<IncidentStatistics> {
        let inner = self.inner.lock().await;
        let mut stats = IncidentStatistics::default();
        for incident in inner.incidents.values() {
            stats.total += 1;
            *stats
                .by_status
                .entry(incident.status.as_str().to_string())
                .or_insert(0) += 1;
            *stats
                .by_severity
                .entry(incident.severity.as_str().to_string())
                .or_insert(0) += 1;
        }
        Ok(stats)
    }
}

#[async_trait]
impl ChannelStore for MemoryStore {
    async fn channel(&self, channel_id: Uuid) -> Result<Option<NotificationChannel>> {
        Ok(self.inner.lock().await.channels.get(&channel_id).cloned())
    }

    async fn enabled_channel(&self, channel_id: Uuid) -> Result<Option<NotificationChannel>> {
        Ok(self
            .inner
            .lock()
            .await
            .channels
            .get(&channel_id)
            .filter(|c| c.is_enabled)
            .cloned())
    }

    async fn insert_channel(&self, channel: &NotificationChannel) -> Result<()> {
        self.inner
            .lock()
            .await
            .channels
            .insert(channel.channel_id, channel.clone());
        Ok(())
    }

    async fn record_channel_test(
        &self,
        channel_id: Uuid,
        status: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(channel) = inner.channels.get_mut(&channel_id) {
            channel.last_tested_at = Some(at);
            channel.test_status = Some(status.to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn insert_attempt(&self, attempt: &NotificationAttempt) -> Result<()> {
        self.inner
            .lock()
            .await
            .attempts
            .insert(attempt.notification_id.clone(), attempt.clone());
        Ok(())
    }

    async fn attempt(&self, notification_id: &str) -> Result<Option<NotificationAttempt>> {
        Ok(self.inner.lock().await.attempts.get(notification_id).cloned())
    }

    async fn update_attempt_status(
        &self,
        notification_id: &str,
        status: DeliveryStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(attempt) = inner.attempts.get_mut(notification_id) {
            attempt.delivery_status = status;
            attempt.error_message = error.map(|e| e.to_string());
        }
        Ok(())
    }

    async fn schedule_attempt_retry(
        &self,
        notification_id: &str,
        retry_count: u32,
        next_retry_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(attempt) = inner.attempts.get_mut(notification_id) {
            attempt.retry_count = retry_count;
            attempt.next_retry_at = Some(next_retry_at);
            attempt.delivery_status = DeliveryStatus::Failed;
        }
        Ok(())
    }

    async fn attempts_due_for_retry(
        &self,
        max_retries: u32,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<RetryCandidate>> {
        let inner = self.inner.lock().await;
        let mut due: Vec<&NotificationAttempt> = inner
            .attempts
            .values()
            .filter(|a| {
                a.delivery_status == DeliveryStatus::Failed
                    && a.retry_count < max_retries
                    && a.next_retry_at.map_or(true, |at| at <= now)
            })
            .collect();
        due.sort_by_key(|a| a.sent_at);

        let mut candidates = Vec::new();
        for attempt in due.into_iter().take(limit) {
            let channel = match inner.channels.get(&attempt.channel_id) {
                Some(c) => c.clone(),
                None => continue,
            };
            let incident = match inner.incidents.get(&attempt.incident_id) {
                Some(i) => i,
                None => continue,
            };
            candidates.push(RetryCandidate {
                attempt: attempt.clone(),
                channel,
                alert: AlertPayload {
                    title: incident.title.clone(),
                    message: incident.message.clone(),
                    severity: incident.severity,
                    data: incident.incident_data.clone(),
                },
            });
        }
        Ok(candidates)
    }
}

#[async_trait]
impl MetricsSource for MemoryStore {
    async fn metric_sample(&self, metric: &str) -> Result<Option<MetricSample>> {
        Ok(self.inner.lock().await.metrics.get(metric).cloned())
    }

    async fn metric_baseline(&self, metric: &str) -> Result<Option<MetricBaseline>> {
        Ok(self.inner.lock().await.baselines.get(metric).copied())
    }
}

#[async_trait]
impl SubscriptionStore for MemoryStore {
    async fn upsert_subscription(&self, agent_id: &str, filter: &SubscriptionFilter) -> Result<()> {
        self.inner
            .lock()
            .await
            .subscriptions
            .insert(agent_id.to_string(), filter.clone());
        Ok(())
    }

    async fn delete_subscription(&self, agent_id: &str) -> Result<()> {
        self.inner.lock().await.subscriptions.remove(agent_id);
        Ok(())
    }

    async fn subscriptions(&self) -> Result<Vec<(String, SubscriptionFilter)>> {
        Ok(self
            .inner
            .lock()
            .await
            .subscriptions
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[async_trait]
impl ScanStore for MemoryStore {
    async fn enqueue_job(&self, job: &ScanJob) -> Result<()> {
        self.inner.lock().await.jobs.insert(job.job_id, job.clone());
        Ok(())
    }

    async fn claim_next_job(
        &self,
        worker_id: &str,
        stale_after: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<ScanJob>> {
        let mut inner = self.inner.lock().await;
        let claimable = |job: &ScanJob| match job.status {
            ScanStatus::Queued => true,
            ScanStatus::Processing => job
                .claimed_at
                .map_or(false, |claimed| now - claimed > stale_after),
            _ => false,
        };
        let next = inner
            .jobs
            .values()
            .filter(|j| claimable(j))
            .max_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then_with(|| b.created_at.cmp(&a.created_at))
            })
            .map(|j| j.job_id);

        Ok(next.and_then(|job_id| {
            inner.jobs.get_mut(&job_id).map(|job| {
                job.status = ScanStatus::Processing;
                job.worker_id = Some(worker_id.to_string());
                job.claimed_at = Some(now);
                job.started_at = Some(now);
                job.clone()
            })
        }))
    }

    async fn set_job_total(&self, job_id: Uuid, total: i64) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(job) = inner.jobs.get_mut(&job_id) {
            job.transactions_total = total;
        }
        Ok(())
    }

    async fn update_job_progress(
        &self,
        job_id: Uuid,
        progress: i32,
        processed: i64,
        flagged: i64,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(job) = inner.jobs.get_mut(&job_id) {
            job.progress = progress;
            job.transactions_processed = processed;
            job.transactions_flagged = flagged;
        }
        Ok(())
    }

    async fn finalize_job(
        &self,
        job_id: Uuid,
        status: ScanStatus,
        error: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(job) = inner.jobs.get_mut(&job_id) {
            job.status = status;
            job.error_message = error.map(|e| e.to_string());
            job.completed_at = Some(at);
        }
        Ok(())
    }

    async fn job(&self, job_id: Uuid) -> Result<Option<ScanJob>> {
        Ok(self.inner.lock().await.jobs.get(&job_id).cloned())
    }
}

#[async_trait]
impl TransactionSource for MemoryStore {
    async fn transactions_matching(&self, filters: &ScanFilters) -> Result<Vec<TransactionRecord>> {
        Ok(self
            .inner
            .lock()
            .await
            .transactions
            .iter()
            .filter(|t| filters.matches(t))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl FraudRuleStore for MemoryStore {
    async fn enabled_fraud_rules(&self) -> Result<Vec<FraudRule>> {
        let inner = self.inner.lock().await;
        let mut rules: Vec<_> = inner
            .fraud_rules
            .values()
            .filter(|r| r.is_enabled)
            .cloned()
            .collect();
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(rules)
    }

    async fn insert_fraud_rule(&self, rule: &FraudRule) -> Result<()> {
        self.inner
            .lock()
            .await
            .fraud_rules
            .insert(rule.rule_id, rule.clone());
        Ok(())
    }

    async fn insert_fraud_alert(&self, alert: &FraudAlert) -> Result<()> {
        self.inner.lock().await.fraud_alerts.push(alert.clone());
        Ok(())
    }

    async fn record_rule_trigger(&self, rule_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(rule) = inner.fraud_rules.get_mut(&rule_id) {
            rule.alert_count += 1;
            rule.last_triggered_at = Some(at);
        }
        Ok(())
    }

    async fn fraud_alerts_for_transaction(&self, transaction_id: &str) -> Result<Vec<FraudAlert>> {
        Ok(self
            .inner
            .lock()
            .await
            .fraud_alerts
            .iter()
            .filter(|a| a.transaction_id == transaction_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn persist_session(&self, session: &CollaborationSession) -> Result<()> {
        self.inner
            .lock()
            .await
            .sessions
            .insert(session.session_id, session.clone());
        Ok(())
    }

    async fn load_session(&self, session_id: Uuid) -> Result<Option<CollaborationSession>> {
        Ok(self.inner.lock().await.sessions.get(&session_id).cloned())
    }

    async fn persist_user(&self, user: &HumanUser) -> Result<()> {
        self.inner
            .lock()
            .await
            .users
            .insert(user.user_id.clone(), user.clone());
        Ok(())
    }

    async fn load_user(&self, user_id: &str) -> Result<Option<HumanUser>> {
        Ok(self.inner.lock().await.users.get(user_id).cloned())
    }

    async fn persist_request(&self, request: &AssistanceRequest) -> Result<()> {
        self.inner
            .lock()
            .await
            .requests
            .insert(request.request_id, request.clone());
        Ok(())
    }

    async fn delete_request(&self, request_id: Uuid) -> Result<()> {
        self.inner.lock().await.requests.remove(&request_id);
        Ok(())
    }

    async fn load_pending_requests(&self, agent_id: &str) -> Result<Vec<AssistanceRequest>> {
        Ok(self
            .inner
            .lock()
            .await
            .requests
            .values()
            .filter(|r| r.agent_id == agent_id)
            .cloned()
            .collect())
    }
}
