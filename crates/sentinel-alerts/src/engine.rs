//! The evaluation loop.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use sentinel_types::{AlertIncident, AlertPayload, AlertRule};

use crate::{evaluators, AlertsError, NotificationSink, SharedAlertStore};

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How often a pass runs when nothing triggers one manually.
    pub evaluation_interval: std::time::Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            evaluation_interval: std::time::Duration::from_secs(30),
        }
    }
}

/// Counters describing engine behavior since start (or the last reset).
#[derive(Debug, Clone, Default)]
pub struct EvaluationMetrics {
    /// Completed evaluation passes.
    pub total_evaluations: u64,
    /// Rules examined across all passes.
    pub rules_evaluated: u64,
    /// Incidents created.
    pub alerts_triggered: u64,
    /// Rule-local evaluation failures.
    pub evaluation_errors: u64,
    /// Wall-clock duration of the most recent pass.
    pub last_evaluation_duration: std::time::Duration,
    /// When the most recent pass finished.
    pub last_evaluation_time: Option<DateTime<Utc>>,
}

struct Core {
    store: SharedAlertStore,
    sink: Arc<dyn NotificationSink>,
    metrics: Mutex<EvaluationMetrics>,
    pass_guard: Mutex<()>,
}

/// Periodic evaluator of all enabled alert rules.
pub struct RuleEvaluationEngine {
    core: Arc<Core>,
    config: EngineConfig,
    trigger: Arc<Notify>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RuleEvaluationEngine {
    /// Build an engine over the given store and notification sink.
    pub fn new(
        store: SharedAlertStore,
        sink: Arc<dyn NotificationSink>,
        config: EngineConfig,
    ) -> Self {
        Self {
            core: Arc::new(Core {
                store,
                sink,
                metrics: Mutex::new(EvaluationMetrics::default()),
                pass_guard: Mutex::new(()),
            }),
            config,
            trigger: Arc::new(Notify::new()),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Start the evaluation loop. A second call is a logged no-op.
    pub async fn start(&self) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            warn!("rule evaluation engine is already running");
            return;
        }

        let core = Arc::clone(&self.core);
        let trigger = Arc::clone(&self.trigger);
        let cancel = self.cancel.clone();
        let interval = self.config.evaluation_interval;

        *task = Some(tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "alert evaluation loop started");
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                core.run_pass().await;
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = trigger.notified() => {}
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            info!("alert evaluation loop ended");
        }));
        info!("rule evaluation engine started");
    }

    /// Stop the loop and join the task.
    pub async fn stop(&self) {
        self.cancel.cancel();
        self.trigger.notify_one();
        if let Some(task) = self.task.lock().await.take() {
            let _ = task.await;
        }
        info!("rule evaluation engine stopped");
    }

    /// Whether the loop task is running.
    pub async fn is_running(&self) -> bool {
        self.task.lock().await.is_some() && !self.cancel.is_cancelled()
    }

    /// Wake the loop for an immediate pass. Idempotent while a pass is in
    /// flight: the in-flight pass satisfies the trigger.
    pub fn trigger_evaluation(&self) {
        debug!("manual evaluation triggered");
        self.trigger.notify_one();
    }

    /// Run a single evaluation pass inline. Used by tests and callers that
    /// need synchronous completion; the background loop uses the same path.
    pub async fn run_evaluation_pass(&self) {
        self.core.run_pass().await;
    }

    /// Snapshot of the engine counters.
    pub async fn metrics(&self) -> EvaluationMetrics {
        self.core.metrics.lock().await.clone()
    }

    /// Zero all counters.
    pub async fn reset_metrics(&self) {
        *self.core.metrics.lock().await = EvaluationMetrics::default();
    }
}

impl Core {
    async fn run_pass(&self) {
        // A pass already in flight makes a second concurrent request a no-op.
        let _guard = match self.pass_guard.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("evaluation pass already in flight");
                return;
            }
        };
        let started = Instant::now();

        match self.store.enabled_rules().await {
            Err(e) => {
                error!(error = %e, "failed to fetch alert rules");
                self.metrics.lock().await.evaluation_errors += 1;
            }
            Ok(rules) => {
                debug!(count = rules.len(), "evaluating alert rules");
                for rule in &rules {
                    let outcome = self.evaluate_one(rule).await;
                    let mut metrics = self.metrics.lock().await;
                    metrics.rules_evaluated += 1;
                    match outcome {
                        Ok(true) => metrics.alerts_triggered += 1,
                        Ok(false) => {}
                        Err(e) => {
                            drop(metrics);
                            error!(rule = %rule.rule_name, error = %e, "error evaluating rule");
                            self.metrics.lock().await.evaluation_errors += 1;
                        }
                    }
                }
            }
        }

        {
            let mut metrics = self.metrics.lock().await;
            metrics.total_evaluations += 1;
            metrics.last_evaluation_duration = started.elapsed();
            metrics.last_evaluation_time = Some(Utc::now());
        }

        if let Err(e) = self.sink.retry_due().await {
            warn!(error = %e, "failed to re-queue due notification retries");
        }
    }

    /// Returns `Ok(true)` when the rule fired and an incident was created.
    async fn evaluate_one(&self, rule: &AlertRule) -> Result<bool, AlertsError> {
        // Re-read the rule so the cooldown check sees the latest firing
        // stamp. An unreachable store fails safe: treated as in cooldown.
        let current = match self.store.rule(rule.rule_id).await {
            Ok(Some(current)) => current,
            Ok(None) => return Ok(false),
            Err(e) => {
                warn!(rule = %rule.rule_name, error = %e, "cooldown check failed; skipping rule");
                return Ok(false);
            }
        };
        let now = Utc::now();
        if current.in_cooldown(now) {
            debug!(rule = %current.rule_name, "rule is in cooldown period");
            return Ok(false);
        }

        let data = match evaluators::evaluate_rule(self.store.as_ref(), &current).await? {
            Some(data) => data,
            None => return Ok(false),
        };

        let incident = AlertIncident::new(&current, data, now);
        self.store.insert_incident(&incident).await?;
        self.store
            .set_rule_last_triggered(current.rule_id, now)
            .await?;
        info!(
            incident = %incident.incident_id,
            rule = %current.rule_name,
            "created alert incident"
        );

        let payload = AlertPayload {
            title: incident.title.clone(),
            message: incident.message.clone(),
            severity: incident.severity,
            data: incident.incident_data.clone(),
        };
        if let Err(e) = self
            .sink
            .send_alert(&incident, &current.notification_channels, payload)
            .await
        {
            // Notification failure never rolls back the incident.
            error!(incident = %incident.incident_id, error = %e, "notification fan-out failed");
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sentinel_store::{MemoryStore, RuleStore};
    use sentinel_types::{MetricSample, RuleType, Severity};
    use serde_json::json;
    use uuid::Uuid;

    struct RecordingSink {
        sent: Mutex<Vec<(Uuid, Vec<Uuid>)>>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn send_alert(
            &self,
            incident: &AlertIncident,
            channels: &[Uuid],
            _payload: AlertPayload,
        ) -> anyhow::Result<()> {
            self.sent
                .lock()
                .await
                .push((incident.incident_id, channels.to_vec()));
            Ok(())
        }
    }

    fn threshold_rule(cooldown_minutes: i64) -> AlertRule {
        let now = Utc::now();
        AlertRule {
            rule_id: Uuid::new_v4(),
            rule_name: "transaction volume spike".into(),
            description: String::new(),
            rule_type: RuleType::Threshold,
            severity: Severity::High,
            condition: json!({"metric": "transaction_volume", "operator": "gt", "threshold": 10.0}),
            notification_channels: vec![Uuid::new_v4()],
            notification_config: json!({}),
            cooldown_minutes,
            is_enabled: true,
            created_by: "ops".into(),
            created_at: now,
            updated_at: now,
            last_triggered_at: None,
        }
    }

    async fn set_metric(store: &MemoryStore, value: f64) {
        store
            .set_metric_sample(MetricSample {
                metric: "transaction_volume".into(),
                value,
                details: json!({}),
                timestamp: Utc::now(),
            })
            .await;
    }

    fn engine(store: &MemoryStore, sink: Arc<RecordingSink>) -> RuleEvaluationEngine {
        RuleEvaluationEngine::new(
            Arc::new(store.clone()),
            sink,
            EngineConfig {
                evaluation_interval: std::time::Duration::from_secs(30),
            },
        )
    }

    #[tokio::test]
    async fn threshold_fires_then_cooldown_holds() {
        let store = MemoryStore::new();
        let sink = RecordingSink::new();
        let rule = threshold_rule(5);
        store.insert_rule(&rule).await.unwrap();

        // T=0: metric exceeds threshold, one incident.
        set_metric(&store, 12.0).await;
        let eng = engine(&store, Arc::clone(&sink));
        eng.run_evaluation_pass().await;
        assert_eq!(store.incidents().await.len(), 1);

        // One minute in: still hot, still within cooldown, no new incident.
        set_metric(&store, 20.0).await;
        store
            .set_rule_last_triggered(rule.rule_id, Utc::now() - chrono::Duration::minutes(1))
            .await
            .unwrap();
        eng.run_evaluation_pass().await;
        assert_eq!(store.incidents().await.len(), 1);

        // Cooldown exactly elapsed: fires again.
        store
            .set_rule_last_triggered(rule.rule_id, Utc::now() - chrono::Duration::minutes(5))
            .await
            .unwrap();
        eng.run_evaluation_pass().await;
        assert_eq!(store.incidents().await.len(), 2);

        let metrics = eng.metrics().await;
        assert_eq!(metrics.total_evaluations, 3);
        assert_eq!(metrics.alerts_triggered, 2);
        assert_eq!(metrics.evaluation_errors, 0);
        assert_eq!(sink.sent.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn rule_errors_do_not_abort_the_pass() {
        let store = MemoryStore::new();
        let sink = RecordingSink::new();

        let mut broken = threshold_rule(5);
        broken.condition = json!({"metric": "transaction_volume"});
        broken.created_at = Utc::now() - chrono::Duration::seconds(10);
        store.insert_rule(&broken).await.unwrap();

        let good = threshold_rule(5);
        store.insert_rule(&good).await.unwrap();
        set_metric(&store, 50.0).await;

        let eng = engine(&store, Arc::clone(&sink));
        eng.run_evaluation_pass().await;

        let metrics = eng.metrics().await;
        assert_eq!(metrics.evaluation_errors, 1);
        assert_eq!(metrics.alerts_triggered, 1);
        assert_eq!(metrics.rules_evaluated, 2);
        assert_eq!(store.incidents().await.len(), 1);
    }

    #[tokio::test]
    async fn incident_carries_rule_severity_and_title() {
        let store = MemoryStore::new();
        let sink = RecordingSink::new();
        store.insert_rule(&threshold_rule(5)).await.unwrap();
        set_metric(&store, 11.0).await;

        engine(&store, sink).run_evaluation_pass().await;

        let incidents = store.incidents().await;
        assert_eq!(incidents[0].title, "[HIGH] transaction volume spike");
        assert_eq!(incidents[0].severity, Severity::High);
        assert_eq!(incidents[0].status, sentinel_types::IncidentStatus::Active);
    }

    #[tokio::test]
    async fn start_and_stop_join_cleanly() {
        let store = MemoryStore::new();
        let sink = RecordingSink::new();
        store.insert_rule(&threshold_rule(60)).await.unwrap();
        set_metric(&store, 99.0).await;

        let eng = RuleEvaluationEngine::new(
            Arc::new(store.clone()),
            sink,
            EngineConfig {
                evaluation_interval: std::time::Duration::from_millis(20),
            },
        );
        eng.start().await;
        assert!(eng.is_running().await);
        tokio::time::sleep(std::time::Duration::from_millis(60)).await;
        eng.stop().await;

        assert!(!eng.is_running().await);
        assert!(eng.metrics().await.total_evaluations >= 1);
        assert_eq!(store.incidents().await.len(), 1);
    }
}
