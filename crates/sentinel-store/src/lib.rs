#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **sentinel-store** – Storage trait surface and drivers for Sentinel.
//!
//! The persistence store is the source of truth for every subsystem: rules,
//! incidents, notification attempts, subscriptions, scan jobs, and sessions
//! all live here. This crate defines one small async trait per concern so a
//! component depends only on the slices it touches, plus two drivers:
//!
//! - [`MemoryStore`] – tokio-mutex-guarded maps; atomic claim semantics come
//!   from the single lock. Used by component tests and small deployments.
//! - [`PostgresStore`] – the relational driver over `sqlx`, using row-level
//!   locking (`FOR UPDATE SKIP LOCKED`) for cross-process work handoff.
//!
//! Worker loops own no durable state beyond their scheduling cursors; all
//! cross-task state flows through these traits.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use sentinel_types::{
    AlertIncident, AlertPayload, AlertRule, AssistanceRequest, CollaborationSession, DeliveryStatus,
    FraudAlert, FraudRule, HumanUser, IncidentFilter, IncidentStatistics, MetricBaseline,
    MetricSample, NotificationAttempt, NotificationChannel, ScanFilters, ScanJob, ScanStatus,
    SubscriptionFilter, TransactionRecord,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::{PostgresConfig, PostgresStore};

//─────────────────────────────
//  Alert rules and incidents
//─────────────────────────────

/// Access to alert rule rows.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// All enabled rules, ordered by creation time.
    async fn enabled_rules(&self) -> Result<Vec<AlertRule>>;

    /// Look up a single rule.
    async fn rule(&self, rule_id: Uuid) -> Result<Option<AlertRule>>;

    /// Create a rule.
    async fn insert_rule(&self, rule: &AlertRule) -> Result<()>;

    /// Stamp the rule's last firing time.
    async fn set_rule_last_triggered(&self, rule_id: Uuid, at: DateTime<Utc>) -> Result<()>;

    /// Delete a rule. Callers must first verify no open incidents remain.
    async fn delete_rule(&self, rule_id: Uuid) -> Result<()>;
}

/// Access to alert incident rows.
#[async_trait]
pub trait IncidentStore: Send + Sync {
    /// Persist a freshly-created incident.
    async fn insert_incident(&self, incident: &AlertIncident) -> Result<()>;

    /// Look up a single incident.
    async fn incident(&self, incident_id: Uuid) -> Result<Option<AlertIncident>>;

    /// Replace an incident row after a lifecycle transition.
    async fn update_incident(&self, incident: &AlertIncident) -> Result<()>;

    /// Incidents belonging to a rule, newest first.
    async fn incidents_for_rule(&self, rule_id: Uuid) -> Result<Vec<AlertIncident>>;

    /// Non-terminal incidents belonging to a rule.
    async fn open_incidents_for_rule(&self, rule_id: Uuid) -> Result<Vec<AlertIncident>>;

    /// Incidents passing the filter, newest first, capped by its limit.
    async fn list_incidents(&self, filter: &IncidentFilter) -> Result<Vec<AlertIncident>>;

    /// Aggregate counts by status and severity.
    async fn incident_statistics(&self) -> Result<IncidentStatistics>;
}

//─────────────────────────────
//  Notification channels and attempts
//─────────────────────────────

/// Access to notification channel rows.
#[async_trait]
pub trait ChannelStore: Send + Sync {
    /// Look up a channel regardless of enablement (used by channel tests).
    async fn channel(&self, channel_id: Uuid) -> Result<Option<NotificationChannel>>;

    /// Look up a channel only if it is enabled (used by sends).
    async fn enabled_channel(&self, channel_id: Uuid) -> Result<Option<NotificationChannel>>;

    /// Create a channel.
    async fn insert_channel(&self, channel: &NotificationChannel) -> Result<()>;

    /// Record the outcome of a `test_channel` probe.
    async fn record_channel_test(
        &self,
        channel_id: Uuid,
        status: &str,
        at: DateTime<Utc>,
    ) -> Result<()>;
}

/// A failed attempt reclaimed for retry, joined with the channel and the
/// alert content needed to rebuild the delivery request.
#[derive(Debug, Clone)]
pub struct RetryCandidate {
    /// The persisted attempt row.
    pub attempt: NotificationAttempt,
    /// The channel to redeliver through.
    pub channel: NotificationChannel,
    /// Alert content reconstructed from the incident.
    pub alert: AlertPayload,
}

/// Access to notification attempt rows.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Persist a new delivery attempt.
    async fn insert_attempt(&self, attempt: &NotificationAttempt) -> Result<()>;

    /// Look up an attempt by its notification id.
    async fn attempt(&self, notification_id: &str) -> Result<Option<NotificationAttempt>>;

    /// Update delivery status and error detail.
    async fn update_attempt_status(
        &self,
        notification_id: &str,
        status: DeliveryStatus,
        error: Option<&str>,
    ) -> Result<()>;

    /// Schedule a retry: bumps the retry count, stamps `next_retry_at`, and
    /// moves the attempt to `retrying`.
    async fn schedule_attempt_retry(
        &self,
        notification_id: &str,
        retry_count: u32,
        next_retry_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Failed attempts whose retry is due, below the retry ceiling, oldest
    /// first, at most `limit` rows, joined with channel and incident.
    async fn attempts_due_for_retry(
        &self,
        max_retries: u32,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<RetryCandidate>>;
}

//─────────────────────────────
//  Metrics
//─────────────────────────────

/// Live metric readings and trailing baselines for rule evaluation.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Current sample of a named metric, if data exists.
    async fn metric_sample(&self, metric: &str) -> Result<Option<MetricSample>>;

    /// Trailing 24-hour baseline of a named metric, if enough history exists.
    async fn metric_baseline(&self, metric: &str) -> Result<Option<MetricBaseline>>;
}

//─────────────────────────────
//  Regulatory subscriptions
//─────────────────────────────

/// Durable subscription filters (callbacks are never persisted).
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Insert or update the filter for an agent.
    async fn upsert_subscription(&self, agent_id: &str, filter: &SubscriptionFilter) -> Result<()>;

    /// Remove an agent's subscription.
    async fn delete_subscription(&self, agent_id: &str) -> Result<()>;

    /// All persisted subscriptions.
    async fn subscriptions(&self) -> Result<Vec<(String, SubscriptionFilter)>>;
}

//─────────────────────────────
//  Fraud scanning
//─────────────────────────────

/// The scan job queue.
#[async_trait]
pub trait ScanStore: Send + Sync {
    /// Queue a job.
    async fn enqueue_job(&self, job: &ScanJob) -> Result<()>;

    /// Atomically claim the highest-priority queued job for `worker_id`,
    /// also reclaiming `processing` jobs whose claim is older than
    /// `stale_after`. Returns `None` when nothing is claimable.
    async fn claim_next_job(
        &self,
        worker_id: &str,
        stale_after: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<ScanJob>>;

    /// Write the total transaction count once the filters are resolved.
    async fn set_job_total(&self, job_id: Uuid, total: i64) -> Result<()>;

    /// Update progress counters.
    async fn update_job_progress(
        &self,
        job_id: Uuid,
        progress: i32,
        processed: i64,
        flagged: i64,
    ) -> Result<()>;

    /// Move a job to a terminal state.
    async fn finalize_job(
        &self,
        job_id: Uuid,
        status: ScanStatus,
        error: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Look up a job.
    async fn job(&self, job_id: Uuid) -> Result<Option<ScanJob>>;
}

/// Read access to the transactions a scan evaluates.
#[async_trait]
pub trait TransactionSource: Send + Sync {
    /// Transactions passing the job's filter predicates.
    async fn transactions_matching(&self, filters: &ScanFilters) -> Result<Vec<TransactionRecord>>;
}

/// Access to fraud rules and the alerts they raise.
#[async_trait]
pub trait FraudRuleStore: Send + Sync {
    /// Enabled fraud rules, highest priority first.
    async fn enabled_fraud_rules(&self) -> Result<Vec<FraudRule>>;

    /// Create a fraud rule.
    async fn insert_fraud_rule(&self, rule: &FraudRule) -> Result<()>;

    /// Persist an alert raised by a firing rule.
    async fn insert_fraud_alert(&self, alert: &FraudAlert) -> Result<()>;

    /// Bump the rule's alert counter and last-triggered stamp.
    async fn record_rule_trigger(&self, rule_id: Uuid, at: DateTime<Utc>) -> Result<()>;

    /// Alerts recorded for a transaction (triage and test visibility).
    async fn fraud_alerts_for_transaction(&self, transaction_id: &str) -> Result<Vec<FraudAlert>>;
}

//─────────────────────────────
//  Collaboration
//─────────────────────────────

/// Durable session, user, and assistance-request state.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert or replace a session snapshot.
    async fn persist_session(&self, session: &CollaborationSession) -> Result<()>;

    /// Load a session snapshot.
    async fn load_session(&self, session_id: Uuid) -> Result<Option<CollaborationSession>>;

    /// Insert or replace a user.
    async fn persist_user(&self, user: &HumanUser) -> Result<()>;

    /// Load a user.
    async fn load_user(&self, user_id: &str) -> Result<Option<HumanUser>>;

    /// Insert or replace an assistance request.
    async fn persist_request(&self, request: &AssistanceRequest) -> Result<()>;

    /// Remove an assistance request (answered or expired).
    async fn delete_request(&self, request_id: Uuid) -> Result<()>;

    /// Pending persisted requests for an agent.
    async fn load_pending_requests(&self, agent_id: &str) -> Result<Vec<AssistanceRequest>>;
}

/// The full store surface; both drivers implement every slice.
pub trait Store:
    RuleStore
    + IncidentStore
    + ChannelStore
    + NotificationStore
    + MetricsSource
    + SubscriptionStore
    + ScanStore
    + TransactionSource
    + FraudRuleStore
    + SessionStore
{
}

impl<T> Store for T where
    T: RuleStore
        + IncidentStore
        + ChannelStore
        + NotificationStore
        + MetricsSource
        + SubscriptionStore
        + ScanStore
        + TransactionSource
        + FraudRuleStore
        + SessionStore
{
}
