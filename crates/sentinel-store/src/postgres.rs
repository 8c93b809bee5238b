//! Relational store driver over Postgres.
//!
//! Connects via `sqlx`, creates the logical schema on open, and implements
//! the full trait surface with row-level locking for work handoff. The scan
//! claim uses `FOR UPDATE SKIP LOCKED` so concurrent workers never
//! double-process a job.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::{PgPool, QueryBuilder, Row};
use tracing::{info, warn};
use uuid::Uuid;

use sentinel_types::{
    AlertIncident, AlertPayload, AlertRule, AssistanceRequest, ChannelType, CollaborationSession,
    DeliveryStatus, FraudAlert, FraudRule, FraudRuleType, HumanUser, IncidentFilter,
    IncidentStatistics, IncidentStatus, MetricBaseline, MetricSample, NotificationAttempt,
    NotificationChannel, RuleType, ScanFilters, ScanJob, ScanStatus, Severity, SubscriptionFilter,
    TransactionRecord,
};

use crate::{
    ChannelStore, FraudRuleStore, IncidentStore, MetricsSource, NotificationStore, RetryCandidate,
    RuleStore, ScanStore, SessionStore, SubscriptionStore, TransactionSource,
};

/// Connection settings, read from the `DB_*` environment variables.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Database host.
    pub host: String,
    /// Database port.
    pub port: u16,
    /// Database name.
    pub database: String,
    /// User name.
    pub user: String,
    /// Password.
    pub password: String,
    /// Maximum pool size.
    pub max_connections: u32,
}

impl PostgresConfig {
    /// Read configuration from `DB_HOST`, `DB_PORT`, `DB_NAME`, `DB_USER`,
    /// and `DB_PASSWORD`, with conventional defaults.
    pub fn from_env() -> Result<Self> {
        let var = |key: &str, default: &str| {
            std::env::var(key).unwrap_or_else(|_| default.to_string())
        };
        let port: u16 = var("DB_PORT", "5432")
            .parse()
            .context("DB_PORT is not a valid port number")?;
        Ok(Self {
            host: var("DB_HOST", "localhost"),
            port,
            database: var("DB_NAME", "sentinel"),
            user: var("DB_USER", "sentinel"),
            password: std::env::var("DB_PASSWORD").unwrap_or_default(),
            max_connections: 10,
        })
    }
}

/// Postgres driver implementing the full [`crate::Store`] surface.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect with the given configuration and run migrations.
    pub async fn connect(config: &PostgresConfig) -> Result<Self> {
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.database)
            .username(&config.user)
            .password(&config.password);
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .context("failed to connect to Postgres")?;
        Self::from_pool(pool).await
    }

    /// Build a store from an existing pool (shared pools, tests).
    pub async fn from_pool(pool: PgPool) -> Result<Self> {
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        const TABLES: &[&str] = &[
            r#"
            CREATE TABLE IF NOT EXISTS alert_rules (
                rule_id UUID PRIMARY KEY,
                rule_name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                rule_type TEXT NOT NULL,
                severity TEXT NOT NULL,
                condition JSONB NOT NULL,
                notification_channels JSONB NOT NULL DEFAULT '[]',
                notification_config JSONB NOT NULL DEFAULT '{}',
                cooldown_minutes BIGINT NOT NULL DEFAULT 0,
                is_enabled BOOLEAN NOT NULL DEFAULT TRUE,
                created_by TEXT NOT NULL DEFAULT '',
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                last_triggered_at TIMESTAMPTZ
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS alert_incidents (
                incident_id UUID PRIMARY KEY,
                rule_id UUID NOT NULL,
                severity TEXT NOT NULL,
                title TEXT NOT NULL,
                message TEXT NOT NULL,
                incident_data JSONB NOT NULL DEFAULT '{}',
                status TEXT NOT NULL DEFAULT 'active',
                triggered_at TIMESTAMPTZ NOT NULL,
                acknowledged_at TIMESTAMPTZ,
                acknowledged_by TEXT,
                resolved_at TIMESTAMPTZ,
                resolved_by TEXT,
                resolution_notes TEXT
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS notification_channels (
                channel_id UUID PRIMARY KEY,
                channel_type TEXT NOT NULL,
                channel_name TEXT NOT NULL,
                configuration JSONB NOT NULL DEFAULT '{}',
                is_enabled BOOLEAN NOT NULL DEFAULT TRUE,
                last_tested_at TIMESTAMPTZ,
                test_status TEXT
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS alert_notifications (
                notification_id TEXT PRIMARY KEY,
                incident_id UUID NOT NULL,
                channel_id UUID NOT NULL,
                sent_at TIMESTAMPTZ NOT NULL,
                delivery_status TEXT NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                next_retry_at TIMESTAMPTZ
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS regulatory_subscriptions (
                agent_id TEXT PRIMARY KEY,
                filter_criteria JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS fraud_scan_job_queue (
                job_id UUID PRIMARY KEY,
                status TEXT NOT NULL DEFAULT 'queued',
                priority INTEGER NOT NULL DEFAULT 0,
                filters JSONB NOT NULL DEFAULT '{}',
                created_by TEXT NOT NULL DEFAULT '',
                worker_id TEXT,
                claimed_at TIMESTAMPTZ,
                started_at TIMESTAMPTZ,
                completed_at TIMESTAMPTZ,
                progress INTEGER NOT NULL DEFAULT 0,
                transactions_total BIGINT NOT NULL DEFAULT 0,
                transactions_processed BIGINT NOT NULL DEFAULT 0,
                transactions_flagged BIGINT NOT NULL DEFAULT 0,
                error_message TEXT,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS fraud_rules (
                rule_id UUID PRIMARY KEY,
                rule_name TEXT NOT NULL,
                rule_definition TEXT NOT NULL,
                rule_type TEXT NOT NULL,
                severity TEXT NOT NULL,
                priority INTEGER NOT NULL DEFAULT 0,
                is_enabled BOOLEAN NOT NULL DEFAULT TRUE,
                alert_count BIGINT NOT NULL DEFAULT 0,
                last_triggered_at TIMESTAMPTZ
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS fraud_alerts (
                alert_id UUID PRIMARY KEY,
                transaction_id TEXT NOT NULL,
                rule_id UUID NOT NULL,
                severity TEXT NOT NULL,
                alert_status TEXT NOT NULL DEFAULT 'active',
                flagged_amount DOUBLE PRECISION NOT NULL,
                flagged_currency TEXT NOT NULL,
                from_account TEXT NOT NULL,
                to_account TEXT NOT NULL,
                transaction_type TEXT NOT NULL,
                alert_message TEXT NOT NULL,
                detected_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS transactions (
                transaction_id TEXT PRIMARY KEY,
                amount DOUBLE PRECISION NOT NULL,
                currency TEXT NOT NULL,
                from_account TEXT NOT NULL,
                to_account TEXT NOT NULL,
                transaction_type TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                metadata JSONB NOT NULL DEFAULT '{}'
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS metric_history (
                metric_name TEXT NOT NULL,
                value DOUBLE PRECISION NOT NULL,
                details JSONB NOT NULL DEFAULT '{}',
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS collaboration_sessions (
                session_id UUID PRIMARY KEY,
                user_id TEXT NOT NULL,
                agent_id TEXT NOT NULL,
                state TEXT NOT NULL,
                last_activity TIMESTAMPTZ NOT NULL,
                snapshot JSONB NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS human_users (
                user_id TEXT PRIMARY KEY,
                snapshot JSONB NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS assistance_requests (
                request_id UUID PRIMARY KEY,
                agent_id TEXT NOT NULL,
                expires_at TIMESTAMPTZ NOT NULL,
                snapshot JSONB NOT NULL
            )
            "#,
        ];
        const INDEXES: &[&str] = &[
            "CREATE INDEX IF NOT EXISTS idx_incidents_rule ON alert_incidents(rule_id)",
            "CREATE INDEX IF NOT EXISTS idx_notifications_status ON alert_notifications(delivery_status, next_retry_at)",
            "CREATE INDEX IF NOT EXISTS idx_scan_queue_status ON fraud_scan_job_queue(status, priority)",
            "CREATE INDEX IF NOT EXISTS idx_metric_history_name ON metric_history(metric_name, created_at)",
            "CREATE INDEX IF NOT EXISTS idx_transactions_created ON transactions(created_at)",
            "CREATE INDEX IF NOT EXISTS idx_requests_agent ON assistance_requests(agent_id)",
        ];
        for statement in TABLES.iter().chain(INDEXES) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("postgres schema ready");
        Ok(())
    }
}

//─────────────────────────────
//  Row mapping
//─────────────────────────────

fn rule_from_row(row: &PgRow) -> Result<AlertRule> {
    let channels: serde_json::Value = row.try_get("notification_channels")?;
    Ok(AlertRule {
        rule_id: row.try_get("rule_id")?,
        rule_name: row.try_get("rule_name")?,
        description: row.try_get("description")?,
        rule_type: RuleType::parse(row.try_get::<String, _>("rule_type")?.as_str())?,
        severity: Severity::parse(row.try_get::<String, _>("severity")?.as_str())?,
        condition: row.try_get("condition")?,
        notification_channels: serde_json::from_value(channels)?,
        notification_config: row.try_get("notification_config")?,
        cooldown_minutes: row.try_get("cooldown_minutes")?,
        is_enabled: row.try_get("is_enabled")?,
        created_by: row.try_get("created_by")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        last_triggered_at: row.try_get("last_triggered_at")?,
    })
}

fn incident_from_row(row: &PgRow) -> Result<AlertIncident> {
    Ok(AlertIncident {
        incident_id: row.try_get("incident_id")?,
        rule_id: row.try_get("rule_id")?,
        severity: Severity::parse(row.try_get::<String, _>("severity")?.as_str())?,
        title: row.try_get("title")?,
        message: row.try_get("message")?,
        incident_data: row.try_get("incident_data")?,
        status: IncidentStatus::parse(row.try_get::<String, _>("status")?.as_str())?,
        triggered_at: row.try_get("triggered_at")?,
        acknowledged_at: row.try_get("acknowledged_at")?,
        acknowledged_by: row.try_get("acknowledged_by")?,
        resolved_at: row.try_get("resolved_at")?,
        resolved_by: row.try_get("resolved_by")?,
        resolution_notes: row.try_get("resolution_notes")?,
    })
}

fn channel_from_row(row: &PgRow) -> Result<NotificationChannel> {
    Ok(NotificationChannel {
        channel_id: row.try_get("channel_id")?,
        channel_type: ChannelType::parse(row.try_get::<String, _>("channel_type")?.as_str())?,
        channel_name: row.try_get("channel_name")?,
        configuration: row.try_get("configuration")?,
        is_enabled: row.try_get("is_enabled")?,
        last_tested_at: row.try_get("last_tested_at")?,
        test_status: row.try_get("test_status")?,
    })
}

fn attempt_from_row(row: &PgRow) -> Result<NotificationAttempt> {
    Ok(NotificationAttempt {
        notification_id: row.try_get("notification_id")?,
        incident_id: row.try_get("incident_id")?,
        channel_id: row.try_get("channel_id")?,
        delivery_status: DeliveryStatus::parse(
            row.try_get::<String, _>("delivery_status")?.as_str(),
        )?,
        retry_count: row.try_get::<i32, _>("retry_count")?.max(0) as u32,
        error_message: row.try_get("error_message")?,
        sent_at: row.try_get("sent_at")?,
        next_retry_at: row.try_get("next_retry_at")?,
    })
}

fn scan_job_from_row(row: &PgRow) -> Result<ScanJob> {
    Ok(ScanJob {
        job_id: row.try_get("job_id")?,
        status: ScanStatus::parse(row.try_get::<String, _>("status")?.as_str())?,
        priority: row.try_get("priority")?,
        filters: row.try_get("filters")?,
        created_by: row.try_get("created_by")?,
        worker_id: row.try_get("worker_id")?,
        claimed_at: row.try_get("claimed_at")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        progress: row.try_get("progress")?,
        transactions_total: row.try_get("transactions_total")?,
        transactions_processed: row.try_get("transactions_processed")?,
        transactions_flagged: row.try_get("transactions_flagged")?,
        error_message: row.try_get("error_message")?,
        created_at: row.try_get("created_at")?,
    })
}

fn fraud_rule_from_row(row: &PgRow) -> Result<FraudRule> {
    Ok(FraudRule {
        rule_id: row.try_get("rule_id")?,
        rule_name: row.try_get("rule_name")?,
        rule_definition: row.try_get("rule_definition")?,
        rule_type: FraudRuleType::parse(row.try_get::<String, _>("rule_type")?.as_str())?,
        severity: Severity::parse(row.try_get::<String, _>("severity")?.as_str())?,
        priority: row.try_get("priority")?,
        is_enabled: row.try_get("is_enabled")?,
        alert_count: row.try_get("alert_count")?,
        last_triggered_at: row.try_get("last_triggered_at")?,
    })
}

fn transaction_from_row(row: &PgRow) -> Result<TransactionRecord> {
    Ok(TransactionRecord {
        transaction_id: row.try_get("transaction_id")?,
        amount: row.try_get("amount")?,
        currency: row.try_get("currency")?,
        from_account: row.try_get("from_account")?,
        to_account: row.try_get("to_account")?,
        transaction_type: row.try_get("transaction_type")?,
        status: row.try_get("status")?,
        created_at: row.try_get("created_at")?,
        metadata: row.try_get("metadata")?,
    })
}

fn fraud_alert_from_row(row: &PgRow) -> Result<FraudAlert> {
    Ok(FraudAlert {
        alert_id: row.try_get("alert_id")?,
        transaction_id: row.try_get("transaction_id")?,
        rule_id: row.try_get("rule_id")?,
        severity: Severity::parse(row.try_get::<String, _>("severity")?.as_str())?,
        alert_status: row.try_get("alert_status")?,
        flagged_amount: row.try_get("flagged_amount")?,
        flagged_currency: row.try_get("flagged_currency")?,
        from_account: row.try_get("from_account")?,
        to_account: row.try_get("to_account")?,
        transaction_type: row.try_get("transaction_type")?,
        alert_message: row.try_get("alert_message")?,
        detected_at: row.try_get("detected_at")?,
    })
}

//─────────────────────────────
//  Trait implementations
//─────────────────────────────

#[async_trait]
impl RuleStore for PostgresStore {
    async fn enabled_rules(&self) -> Result<Vec<AlertRule>> {
        let rows = sqlx::query(
            "SELECT * FROM alert_rules WHERE is_enabled = TRUE ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(rule_from_row).collect()
    }

    async fn rule(&self, rule_id: Uuid) -> Result<Option<AlertRule>> {
        let row = sqlx::query("SELECT * FROM alert_rules WHERE rule_id = $1")
            .bind(rule_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(rule_from_row).transpose()
    }

    async fn insert_rule(&self, rule: &AlertRule) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO alert_rules (
                rule_id, rule_name, description, rule_type, severity, condition,
                notification_channels, notification_config, cooldown_minutes,
                is_enabled, created_by, created_at, updated_at, last_triggered_at
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14)
            "#,
        )
        .bind(rule.rule_id)
        .bind(&rule.rule_name)
        .bind(&rule.description)
        .bind(rule.rule_type.as_str())
        .bind(rule.severity.as_str())
        .bind(&rule.condition)
        .bind(serde_json::to_value(&rule.notification_channels)?)
        .bind(&rule.notification_config)
        .bind(rule.cooldown_minutes)
        .bind(rule.is_enabled)
        .bind(&rule.created_by)
        .bind(rule.created_at)
        .bind(rule.updated_at)
        .bind(rule.last_triggered_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_rule_last_triggered(&self, rule_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE alert_rules SET last_triggered_at = $1, updated_at = $1 WHERE rule_id = $2",
        )
        .bind(at)
        .bind(rule_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_rule(&self, rule_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM alert_rules WHERE rule_id = $1")
            .bind(rule_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl IncidentStore for PostgresStore {
    async fn insert_incident(&self, incident: &AlertIncident) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO alert_incidents (
                incident_id, rule_id, severity, title, message, incident_data,
                status, triggered_at, acknowledged_at, acknowledged_by,
                resolved_at, resolved_by, resolution_notes
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13)
            "#,
        )
        .bind(incident.incident_id)
        .bind(incident.rule_id)
        .bind(incident.severity.as_str())
        .bind(&incident.title)
        .bind(&incident.message)
        .bind(&incident.incident_data)
        .bind(incident.status.as_str())
        .bind(incident.triggered_at)
        .bind(incident.acknowledged_at)
        .bind(&incident.acknowledged_by)
        .bind(incident.resolved_at)
        .bind(&incident.resolved_by)
        .bind(&incident.resolution_notes)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn incident(&self, incident_id: Uuid) -> Result<Option<AlertIncident>> {
        let row = sqlx::query("SELECT * FROM alert_incidents WHERE incident_id = $1")
            .bind(incident_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(incident_from_row).transpose()
    }

    async fn update_incident(&self, incident: &AlertIncident) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE alert_incidents SET
                status = $2, acknowledged_at = $3, acknowledged_by = $4,
                resolved_at = $5, resolved_by = $6, resolution_notes = $7
            WHERE incident_id = $1
            "#,
        )
        .bind(incident.incident_id)
        .bind(incident.status.as_str())
        .bind(incident.acknowledged_at)
        .bind(&incident.acknowledged_by)
        .bind(incident.resolved_at)
        .bind(&incident.resolved_by)
        .bind(&incident.resolution_notes)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn incidents_for_rule(&self, rule_id: Uuid) -> Result<Vec<AlertIncident>> {
        let rows = sqlx::query(
            "SELECT * FROM alert_incidents WHERE rule_id = $1 ORDER BY triggered_at DESC",
        )
        .bind(rule_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(incident_from_row).collect()
    }

    async fn open_incidents_for_rule(&self, rule_id: Uuid) -> Result<Vec<AlertIncident>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM alert_incidents
            WHERE rule_id = $1 AND status IN ('active', 'acknowledged')
            ORDER BY triggered_at DESC
            "#,
        )
        .bind(rule_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(incident_from_row).collect()
    }

    async fn list_incidents(&self, filter: &IncidentFilter) -> Result<Vec<AlertIncident>> {
        let mut builder =
            QueryBuilder::<sqlx::Postgres>::new("SELECT * FROM alert_incidents WHERE 1=1");
        if !filter.statuses.is_empty() {
            builder.push(" AND status IN (");
            let mut separated = builder.separated(", ");
            for status in &filter.statuses {
                separated.push_bind(status.as_str());
            }
            builder.push(")");
        }
        if !filter.severities.is_empty() {
            builder.push(" AND severity IN (");
            let mut separated = builder.separated(", ");
            for severity in &filter.severities {
                separated.push_bind(severity.as_str());
            }
            builder.push(")");
        }
        if let Some(rule_id) = filter.rule_id {
            builder.push(" AND rule_id = ").push_bind(rule_id);
        }
        if let Some(from) = filter.from {
            builder.push(" AND triggered_at >= ").push_bind(from);
        }
        if let Some(to) = filter.to {
            builder.push(" AND triggered_at <= ").push_bind(to);
        }
        builder.push(" ORDER BY triggered_at DESC");
        if let Some(limit) = filter.limit {
            builder.push(" LIMIT ").push_bind(limit as i64);
        }

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(incident_from_row).collect()
    }

    async fn incident_statistics(&self) -> Result<IncidentStatistics> {
        let rows = sqlx::query(
            "SELECT status, severity, COUNT(*) AS count FROM alert_incidents GROUP BY status, severity",
        )
        .fetch_all(&self.pool)
        .await?;
        let mut stats = IncidentStatistics::default();
        for row in &rows {
            let status: String = row.try_get("status")?;
            let severity: String = row.try_get("severity")?;
            let count: i64 = row.try_get("count")?;
            stats.total += count as u64;
            *stats.by_status.entry(status).or_insert(0) += count as u64;
            *stats.by_severity.entry(severity).or_insert(0) += count as u64;
        }
        Ok(stats)
    }
}

#[async_trait]
impl ChannelStore for PostgresStore {
    async fn channel(&self, channel_id: Uuid) -> Result<Option<NotificationChannel>> {
        let row = sqlx::query("SELECT * FROM notification_channels WHERE channel_id = $1")
            .bind(channel_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(channel_from_row).transpose()
    }

    async fn enabled_channel(&self, channel_id: Uuid) -> Result<Option<NotificationChannel>> {
        let row = sqlx::query(
            "SELECT * FROM notification_channels WHERE channel_id = $1 AND is_enabled = TRUE",
        )
        .bind(channel_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(channel_from_row).transpose()
    }

    async fn insert_channel(&self, channel: &NotificationChannel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO notification_channels (
                channel_id, channel_type, channel_name, configuration,
                is_enabled, last_tested_at, test_status
            ) VALUES ($1,$2,$3,$4,$5,$6,$7)
            "#,
        )
        .bind(channel.channel_id)
        .bind(channel.channel_type.as_str())
        .bind(&channel.channel_name)
        .bind(&channel.configuration)
        .bind(channel.is_enabled)
        .bind(channel.last_tested_at)
        .bind(&channel.test_status)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_channel_test(
        &self,
        channel_id: Uuid,
        status: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE notification_channels SET last_tested_at = $1, test_status = $2 WHERE channel_id = $3",
        )
        .bind(at)
        .bind(status)
        .bind(channel_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl NotificationStore for PostgresStore {
    async fn insert_attempt(&self, attempt: &NotificationAttempt) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO alert_notifications (
                notification_id, incident_id, channel_id, sent_at,
                delivery_status, retry_count, error_message, next_retry_at
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8)
            "#,
        )
        .bind(&attempt.notification_id)
        .bind(attempt.incident_id)
        .bind(attempt.channel_id)
        .bind(attempt.sent_at)
        .bind(attempt.delivery_status.as_str())
        .bind(attempt.retry_count as i32)
        .bind(&attempt.error_message)
        .bind(attempt.next_retry_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn attempt(&self, notification_id: &str) -> Result<Option<NotificationAttempt>> {
        let row = sqlx::query("SELECT * FROM alert_notifications WHERE notification_id = $1")
            .bind(notification_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(attempt_from_row).transpose()
    }

    async fn update_attempt_status(
        &self,
        notification_id: &str,
        status: DeliveryStatus,
        error: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE alert_notifications SET delivery_status = $1, error_message = $2 WHERE notification_id = $3",
        )
        .bind(status.as_str())
        .bind(error)
        .bind(notification_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn schedule_attempt_retry(
        &self,
        notification_id: &str,
        retry_count: u32,
        next_retry_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE alert_notifications
            SET retry_count = $1, next_retry_at = $2, delivery_status = 'failed'
            WHERE notification_id = $3
            "#,
        )
        .bind(retry_count as i32)
        .bind(next_retry_at)
        .bind(notification_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn attempts_due_for_retry(
        &self,
        max_retries: u32,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<RetryCandidate>> {
        let rows = sqlx::query(
            r#"
            SELECT n.notification_id, n.incident_id, n.channel_id, n.sent_at,
                   n.delivery_status, n.retry_count, n.error_message, n.next_retry_at,
                   c.channel_type, c.channel_name, c.configuration, c.is_enabled,
                   c.last_tested_at, c.test_status,
                   a.title, a.message, a.severity AS incident_severity, a.incident_data
            FROM alert_notifications n
            JOIN notification_channels c ON n.channel_id = c.channel_id
            JOIN alert_incidents a ON n.incident_id = a.incident_id
            WHERE n.delivery_status = 'failed'
              AND (n.next_retry_at IS NULL OR n.next_retry_at <= $1)
              AND n.retry_count < $2
            ORDER BY n.sent_at ASC
            LIMIT $3
            "#,
        )
        .bind(now)
        .bind(max_retries as i32)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut candidates = Vec::with_capacity(rows.len());
        for row in &rows {
            let attempt = attempt_from_row(row)?;
            let channel = channel_from_row(row)?;
            let alert = AlertPayload {
                title: row.try_get("title")?,
                message: row.try_get("message")?,
                severity: Severity::parse(
                    row.try_get::<String, _>("incident_severity")?.as_str(),
                )?,
                data: row.try_get("incident_data")?,
            };
            candidates.push(RetryCandidate {
                attempt,
                channel,
                alert,
            });
        }
        Ok(candidates)
    }
}

#[async_trait]
impl MetricsSource for PostgresStore {
    async fn metric_sample(&self, metric: &str) -> Result<Option<MetricSample>> {
        match metric {
            // Transaction volume is computed live from the transactions
            // table over the trailing five minutes.
            "transaction_volume" => {
                let row = sqlx::query(
                    r#"
                    SELECT COUNT(*) AS count, AVG(amount) AS avg_amount, MAX(amount) AS max_amount
                    FROM transactions WHERE created_at >= $1
                    "#,
                )
                .bind(Utc::now() - Duration::minutes(5))
                .fetch_one(&self.pool)
                .await?;
                let count: i64 = row.try_get("count")?;
                let avg: Option<f64> = row.try_get("avg_amount")?;
                let max: Option<f64> = row.try_get("max_amount")?;
                Ok(Some(MetricSample {
                    metric: metric.to_string(),
                    value: count as f64,
                    details: serde_json::json!({
                        "avg_amount": avg.unwrap_or(0.0),
                        "max_amount": max.unwrap_or(0.0),
                    }),
                    timestamp: Utc::now(),
                }))
            }
            "system_load" | "compliance_score" | "response_time" => {
                let row = sqlx::query(
                    r#"
                    SELECT value, details, created_at FROM metric_history
                    WHERE metric_name = $1 ORDER BY created_at DESC LIMIT 1
                    "#,
                )
                .bind(metric)
                .fetch_optional(&self.pool)
                .await?;
                Ok(match row {
                    Some(row) => Some(MetricSample {
                        metric: metric.to_string(),
                        value: row.try_get("value")?,
                        details: row.try_get("details")?,
                        timestamp: row.try_get("created_at")?,
                    }),
                    None => None,
                })
            }
            other => {
                warn!(metric = other, "unknown metric name");
                Ok(None)
            }
        }
    }

    async fn metric_baseline(&self, metric: &str) -> Result<Option<MetricBaseline>> {
        let row = sqlx::query(
            r#"
            SELECT AVG(value) AS mean, STDDEV(value) AS std_dev
            FROM metric_history
            WHERE metric_name = $1 AND created_at >= $2
            "#,
        )
        .bind(metric)
        .bind(Utc::now() - Duration::hours(24))
        .fetch_one(&self.pool)
        .await?;
        let mean: Option<f64> = row.try_get("mean")?;
        let std_dev: Option<f64> = row.try_get("std_dev")?;
        Ok(match (mean, std_dev) {
            (Some(mean), Some(std_dev)) if std_dev > 0.0 => {
                Some(MetricBaseline { mean, std_dev })
            }
            _ => None,
        })
    }
}

#[async_trait]
impl SubscriptionStore for PostgresStore {
    async fn upsert_subscription(&self, agent_id: &str, filter: &SubscriptionFilter) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO regulatory_subscriptions (agent_id, filter_criteria, created_at, updated_at)
            VALUES ($1, $2, NOW(), NOW())
            ON CONFLICT (agent_id)
            DO UPDATE SET filter_criteria = $2, updated_at = NOW()
            "#,
        )
        .bind(agent_id)
        .bind(serde_json::to_value(filter)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_subscription(&self, agent_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM regulatory_subscriptions WHERE agent_id = $1")
            .bind(agent_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn subscriptions(&self) -> Result<Vec<(String, SubscriptionFilter)>> {
        let rows = sqlx::query("SELECT agent_id, filter_criteria FROM regulatory_subscriptions")
            .fetch_all(&self.pool)
            .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let agent_id: String = row.try_get("agent_id")?;
            let criteria: serde_json::Value = row.try_get("filter_criteria")?;
            out.push((agent_id, serde_json::from_value(criteria)?));
        }
        Ok(out)
    }
}

#[async_trait]
impl ScanStore for PostgresStore {
    async fn enqueue_job(&self, job: &ScanJob) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO fraud_scan_job_queue (
                job_id, status, priority, filters, created_by, worker_id,
                claimed_at, started_at, completed_at, progress,
                transactions_total, transactions_processed, transactions_flagged,
                error_message, created_at
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15)
            "#,
        )
        .bind(job.job_id)
        .bind(job.status.as_str())
        .bind(job.priority)
        .bind(&job.filters)
        .bind(&job.created_by)
        .bind(&job.worker_id)
        .bind(job.claimed_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.progress)
        .bind(job.transactions_total)
        .bind(job.transactions_processed)
        .bind(job.transactions_flagged)
        .bind(&job.error_message)
        .bind(job.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn claim_next_job(
        &self,
        worker_id: &str,
        stale_after: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<ScanJob>> {
        let row = sqlx::query(
            r#"
            UPDATE fraud_scan_job_queue
            SET status = 'processing', worker_id = $1, claimed_at = $2, started_at = $2
            WHERE job_id = (
                SELECT job_id FROM fraud_scan_job_queue
                WHERE status = 'queued'
                   OR (status = 'processing' AND claimed_at < $3)
                ORDER BY priority DESC, created_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(worker_id)
        .bind(now)
        .bind(now - stale_after)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(scan_job_from_row).transpose()
    }

    async fn set_job_total(&self, job_id: Uuid, total: i64) -> Result<()> {
        sqlx::query("UPDATE fraud_scan_job_queue SET transactions_total = $1 WHERE job_id = $2")
            .bind(total)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_job_progress(
        &self,
        job_id: Uuid,
        progress: i32,
        processed: i64,
        flagged: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE fraud_scan_job_queue
            SET progress = $1, transactions_processed = $2, transactions_flagged = $3
            WHERE job_id = $4
            "#,
        )
        .bind(progress)
        .bind(processed)
        .bind(flagged)
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn finalize_job(
        &self,
        job_id: Uuid,
        status: ScanStatus,
        error: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE fraud_scan_job_queue
            SET status = $1, error_message = $2, completed_at = $3
            WHERE job_id = $4
            "#,
        )
        .bind(status.as_str())
        .bind(error)
        .bind(at)
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn job(&self, job_id: Uuid) -> Result<Option<ScanJob>> {
        let row = sqlx::query("SELECT * FROM fraud_scan_job_queue WHERE job_id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(scan_job_from_row).transpose()
    }
}

#[async_trait]
impl TransactionSource for PostgresStore {
    async fn transactions_matching(&self, filters: &ScanFilters) -> Result<Vec<TransactionRecord>> {
        let mut builder = QueryBuilder::<sqlx::Postgres>::new(
            "SELECT transaction_id, amount, currency, from_account, to_account, \
             transaction_type, status, created_at, metadata FROM transactions WHERE 1=1",
        );
        if let Some(from) = filters.date_from {
            builder.push(" AND created_at >= ").push_bind(from);
        }
        if let Some(to) = filters.date_to {
            builder.push(" AND created_at <= ").push_bind(to);
        }
        if let Some(min) = filters.amount_min {
            builder.push(" AND amount >= ").push_bind(min);
        }
        if let Some(max) = filters.amount_max {
            builder.push(" AND amount <= ").push_bind(max);
        }
        if let Some(status) = &filters.status {
            builder.push(" AND status = ").push_bind(status.clone());
        }
        builder.push(" ORDER BY created_at ASC");

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(transaction_from_row).collect()
    }
}

#[async_trait]
impl FraudRuleStore for PostgresStore {
    async fn enabled_fraud_rules(&self) -> Result<Vec<FraudRule>> {
        let rows = sqlx::query(
            "SELECT * FROM fraud_rules WHERE is_enabled = TRUE ORDER BY priority DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(fraud_rule_from_row).collect()
    }

    async fn insert_fraud_rule(&self, rule: &FraudRule) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO fraud_rules (
                rule_id, rule_name, rule_definition, rule_type, severity,
                priority, is_enabled, alert_count, last_triggered_at
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)
            "#,
        )
        .bind(rule.rule_id)
        .bind(&rule.rule_name)
        .bind(&rule.rule_definition)
        .bind(match rule.rule_type {
            FraudRuleType::Threshold => "threshold",
            FraudRuleType::Pattern => "pattern",
            FraudRuleType::Velocity => "velocity",
        })
        .bind(rule.severity.as_str())
        .bind(rule.priority)
        .bind(rule.is_enabled)
        .bind(rule.alert_count)
        .bind(rule.last_triggered_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_fraud_alert(&self, alert: &FraudAlert) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO fraud_alerts (
                alert_id, transaction_id, rule_id, severity, alert_status,
                flagged_amount, flagged_currency, from_account, to_account,
                transaction_type, alert_message, detected_at
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12)
            "#,
        )
        .bind(alert.alert_id)
        .bind(&alert.transaction_id)
        .bind(alert.rule_id)
        .bind(alert.severity.as_str())
        .bind(&alert.alert_status)
        .bind(alert.flagged_amount)
        .bind(&alert.flagged_currency)
        .bind(&alert.from_account)
        .bind(&alert.to_account)
        .bind(&alert.transaction_type)
        .bind(&alert.alert_message)
        .bind(alert.detected_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_rule_trigger(&self, rule_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE fraud_rules SET alert_count = alert_count + 1, last_triggered_at = $1 WHERE rule_id = $2",
        )
        .bind(at)
        .bind(rule_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fraud_alerts_for_transaction(&self, transaction_id: &str) -> Result<Vec<FraudAlert>> {
        let rows = sqlx::query(
            "SELECT * FROM fraud_alerts WHERE transaction_id = $1 ORDER BY detected_at",
        )
        .bind(transaction_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(fraud_alert_from_row).collect()
    }
}

#[async_trait]
impl SessionStore for PostgresStore {
    async fn persist_session(&self, session: &CollaborationSession) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO collaboration_sessions (session_id, user_id, agent_id, state, last_activity, snapshot)
            VALUES ($1,$2,$3,$4,$5,$6)
            ON CONFLICT (session_id)
            DO UPDATE SET state = $4, last_activity = $5, snapshot = $6
            "#,
        )
        .bind(session.session_id)
        .bind(&session.user_id)
        .bind(&session.agent_id)
        .bind(session.state.as_str())
        .bind(session.last_activity)
        .bind(serde_json::to_value(session)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_session(&self, session_id: Uuid) -> Result<Option<CollaborationSession>> {
        let row = sqlx::query("SELECT snapshot FROM collaboration_sessions WHERE session_id = $1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some(row) => {
                let snapshot: serde_json::Value = row.try_get("snapshot")?;
                Some(serde_json::from_value(snapshot)?)
            }
            None => None,
        })
    }

    async fn persist_user(&self, user: &HumanUser) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO human_users (user_id, snapshot) VALUES ($1, $2)
            ON CONFLICT (user_id) DO UPDATE SET snapshot = $2
            "#,
        )
        .bind(&user.user_id)
        .bind(serde_json::to_value(user)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_user(&self, user_id: &str) -> Result<Option<HumanUser>> {
        let row = sqlx::query("SELECT snapshot FROM human_users WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some(row) => {
                let snapshot: serde_json::Value = row.try_get("snapshot")?;
                Some(serde_json::from_value(snapshot)?)
            }
            None => None,
        })
    }

    async fn persist_request(&self, request: &AssistanceRequest) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO assistance_requests (request_id, agent_id, expires_at, snapshot)
            VALUES ($1,$2,$3,$4)
            ON CONFLICT (request_id) DO UPDATE SET expires_at = $3, snapshot = $4
            "#,
        )
        .bind(request.request_id)
        .bind(&request.agent_id)
        .bind(request.expires_at)
        .bind(serde_json::to_value(request)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_request(&self, request_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM assistance_requests WHERE request_id = $1")
            .bind(request_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn load_pending_requests(&self, agent_id: &str) -> Result<Vec<AssistanceRequest>> {
        let rows = sqlx::query("SELECT snapshot FROM assistance_requests WHERE agent_id = $1")
            .bind(agent_id)
            .fetch_all(&self.pool)
            .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let snapshot: serde_json::Value = row.try_get("snapshot")?;
            out.push(serde_json::from_value(snapshot)?);
        }
        Ok(out)
    }
}
