//! The scan worker pool.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use sentinel_types::{FraudAlert, ScanFilters, ScanJob, ScanStatus};

use crate::rules::evaluate_fraud_rule;
use crate::{FraudError, FraudStore};

/// Pool sizing and cadence.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker tasks.
    pub workers: usize,
    /// Worker id prefix; ids are `{prefix}-{index}`.
    pub worker_id_prefix: String,
    /// Sleep when the queue is empty.
    pub idle_sleep: Duration,
    /// `processing` jobs whose claim is older than this may be re-claimed.
    pub stale_claim_after: chrono::Duration,
    /// Progress is written every this many transactions.
    pub progress_interval: i64,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            worker_id_prefix: "scan-worker".to_string(),
            idle_sleep: Duration::from_secs(5),
            stale_claim_after: chrono::Duration::minutes(30),
            progress_interval: 100,
        }
    }
}

fn progress_pct(processed: i64, total: i64) -> i32 {
    if total <= 0 {
        0
    } else {
        ((processed * 100 / total) as i32).min(100)
    }
}

/// Claims queued scan jobs and runs them to completion.
pub struct FraudScanWorkerPool {
    store: Arc<dyn FraudStore>,
    config: WorkerPoolConfig,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl FraudScanWorkerPool {
    /// Build a pool over the given store.
    pub fn new(store: Arc<dyn FraudStore>, config: WorkerPoolConfig) -> Self {
        Self {
            store,
            config,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Start the worker tasks.
    pub async fn start(self: &Arc<Self>) -> Result<(), FraudError> {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            warn!("scan worker pool already running");
            return Err(FraudError::AlreadyRunning);
        }
        for index in 0..self.config.workers {
            let this = Arc::clone(self);
            let worker_id = format!("{}-{}", self.config.worker_id_prefix, index);
            let cancel = self.cancel.clone();
            tasks.push(tokio::spawn(async move {
                debug!(worker_id, "scan worker started");
                loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    match this.claim_and_process(&worker_id).await {
                        Ok(Some(job_id)) => {
                            debug!(worker_id, job = %job_id, "scan job finished");
                        }
                        Ok(None) => {
                            tokio::select! {
                                _ = cancel.cancelled() => break,
                                _ = tokio::time::sleep(this.config.idle_sleep) => {}
                            }
                        }
                        Err(e) => {
                            error!(worker_id, error = %e, "scan worker iteration failed");
                            tokio::select! {
                                _ = cancel.cancelled() => break,
                                _ = tokio::time::sleep(this.config.idle_sleep) => {}
                            }
                        }
                    }
                }
                debug!(worker_id, "scan worker ended");
            }));
        }
        info!(workers = self.config.workers, "scan worker pool started");
        Ok(())
    }

    /// Stop the pool. Workers finish their current batch; unfinished jobs
    /// stay `processing` and are re-claimed after the stale timeout.
    pub async fn stop(&self) {
        self.cancel.cancel();
        for task in self.tasks.lock().await.drain(..) {
            let _ = task.await;
        }
        info!("scan worker pool stopped");
    }

    /// Claim at most one job and run it. Returns the processed job id, or
    /// `None` when the queue had nothing claimable.
    pub async fn claim_and_process(&self, worker_id: &str) -> Result<Option<Uuid>, FraudError> {
        let job = self
            .store
            .claim_next_job(worker_id, self.config.stale_claim_after, Utc::now())
            .await?;
        let Some(job) = job else {
            return Ok(None);
        };
        let job_id = job.job_id;
        info!(worker_id, job = %job_id, priority = job.priority, "claimed scan job");

        if let Err(e) = self.process_job(&job).await {
            error!(job = %job_id, error = %e, "scan job failed");
            self.store
                .finalize_job(job_id, ScanStatus::Failed, Some(&e.to_string()), Utc::now())
                .await?;
        }
        Ok(Some(job_id))
    }

    async fn process_job(&self, job: &ScanJob) -> anyhow::Result<()> {
        let filters = ScanFilters::from_value(&job.filters);
        let transactions = self.store.transactions_matching(&filters).await?;
        let total = transactions.len() as i64;
        self.store.set_job_total(job.job_id, total).await?;

        let mut processed = 0i64;
        let mut flagged = 0i64;

        for txn in &transactions {
            let rules = self.store.enabled_fraud_rules().await?;
            let mut txn_flagged = false;
            for rule in &rules {
                if evaluate_fraud_rule(rule, txn) {
                    let alert = FraudAlert::for_rule(rule, txn, Utc::now());
                    self.store.insert_fraud_alert(&alert).await?;
                    self.store.record_rule_trigger(rule.rule_id, Utc::now()).await?;
                    txn_flagged = true;
                }
            }
            if txn_flagged {
                flagged += 1;
            }
            processed += 1;

            if processed % self.config.progress_interval == 0 {
                self.store
                    .update_job_progress(
                        job.job_id,
                        progress_pct(processed, total),
                        processed,
                        flagged,
                    )
                    .await?;
                // Cancellation is honored between batches, never mid-batch.
                if self.cancel.is_cancelled() {
                    warn!(job = %job.job_id, processed, "scan interrupted; job left processing");
                    return Ok(());
                }
            }
        }

        self.store
            .update_job_progress(job.job_id, progress_pct(processed, total), processed, flagged)
            .await?;
        self.store
            .finalize_job(job.job_id, ScanStatus::Completed, None, Utc::now())
            .await?;
        info!(job = %job.job_id, processed, flagged, "scan job completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_store::{FraudRuleStore, MemoryStore, ScanStore};
    use sentinel_types::{FraudRule, FraudRuleType, Severity, TransactionRecord};

    fn txn(id: usize, amount: f64) -> TransactionRecord {
        TransactionRecord {
            transaction_id: format!("t-{id}"),
            amount,
            currency: "USD".into(),
            from_account: format!("from-{id}"),
            to_account: format!("to-{id}"),
            transaction_type: "domestic".into(),
            status: "settled".into(),
            created_at: Utc::now(),
            metadata: serde_json::json!({}),
        }
    }

    fn threshold_rule(threshold: &str) -> FraudRule {
        FraudRule {
            rule_id: Uuid::new_v4(),
            rule_name: "large amount".into(),
            rule_definition: format!("amount > {threshold}"),
            rule_type: FraudRuleType::Threshold,
            severity: Severity::High,
            priority: 10,
            is_enabled: true,
            alert_count: 0,
            last_triggered_at: None,
        }
    }

    fn pool(store: &MemoryStore, workers: usize) -> Arc<FraudScanWorkerPool> {
        Arc::new(FraudScanWorkerPool::new(
            Arc::new(store.clone()),
            WorkerPoolConfig {
                workers,
                idle_sleep: Duration::from_millis(10),
                ..WorkerPoolConfig::default()
            },
        ))
    }

    #[tokio::test]
    async fn job_runs_to_completion_with_progress() {
        let store = MemoryStore::new();
        store
            .add_transactions((0..250).map(|i| txn(i, if i % 10 == 0 { 2000.0 } else { 50.0 })).collect())
            .await;
        store
            .insert_fraud_rule(&threshold_rule("1000"))
            .await
            .unwrap();
        let job = ScanJob::queued(serde_json::json!({}), 10, "ops");
        store.enqueue_job(&job).await.unwrap();

        let pool = pool(&store, 1);
        let processed = pool.claim_and_process("w-1").await.unwrap();
        assert_eq!(processed, Some(job.job_id));

        let job = store.job(job.job_id).await.unwrap().unwrap();
        assert_eq!(job.status, ScanStatus::Completed);
        assert_eq!(job.transactions_total, 250);
        assert_eq!(job.transactions_processed, 250);
        assert_eq!(job.transactions_flagged, 25);
        assert_eq!(job.progress, 100);
        assert!(job.completed_at.is_some());
        assert_eq!(store.fraud_alerts().await.len(), 25);
    }

    #[tokio::test]
    async fn one_queued_job_is_claimed_by_exactly_one_worker() {
        let store = MemoryStore::new();
        store.add_transactions(vec![txn(1, 10.0)]).await;
        let job = ScanJob::queued(serde_json::json!({}), 10, "ops");
        store.enqueue_job(&job).await.unwrap();

        let pool = pool(&store, 2);
        let (a, b) = tokio::join!(
            pool.claim_and_process("w-1"),
            pool.claim_and_process("w-2"),
        );
        let outcomes = [a.unwrap(), b.unwrap()];
        assert_eq!(outcomes.iter().filter(|o| o.is_some()).count(), 1);

        let job = store.job(job.job_id).await.unwrap().unwrap();
        assert_eq!(job.status, ScanStatus::Completed);
        assert_eq!(job.transactions_processed, job.transactions_total);
    }

    #[tokio::test]
    async fn filters_restrict_the_scanned_set() {
        let store = MemoryStore::new();
        store
            .add_transactions(vec![txn(1, 50.0), txn(2, 500.0), txn(3, 5000.0)])
            .await;
        let job = ScanJob::queued(serde_json::json!({"amount_min": 100.0}), 5, "ops");
        store.enqueue_job(&job).await.unwrap();

        let pool = pool(&store, 1);
        pool.claim_and_process("w-1").await.unwrap();

        let job = store.job(job.job_id).await.unwrap().unwrap();
        assert_eq!(job.transactions_total, 2);
        assert_eq!(job.transactions_processed, 2);
    }

    #[tokio::test]
    async fn rule_counters_track_firings() {
        let store = MemoryStore::new();
        store.add_transactions(vec![txn(1, 9000.0), txn(2, 8000.0)]).await;
        let rule = threshold_rule("1000");
        store.insert_fraud_rule(&rule).await.unwrap();
        let job = ScanJob::queued(serde_json::json!({}), 1, "ops");
        store.enqueue_job(&job).await.unwrap();

        pool(&store, 1).claim_and_process("w-1").await.unwrap();

        let rules = store.enabled_fraud_rules().await.unwrap();
        assert_eq!(rules[0].alert_count, 2);
        assert!(rules[0].last_triggered_at.is_some());
        let alerts = store.fraud_alerts().await;
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].alert_message, "Transaction flagged by rule: large amount");
    }

    #[tokio::test]
    async fn pool_start_stop_drains_the_queue() {
        let store = MemoryStore::new();
        store.add_transactions((0..20).map(|i| txn(i, 10.0)).collect()).await;
        let jobs: Vec<ScanJob> = (0..3)
            .map(|i| ScanJob::queued(serde_json::json!({}), i, "ops"))
            .collect();
        for job in &jobs {
            store.enqueue_job(job).await.unwrap();
        }

        let pool = pool(&store, 2);
        pool.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        pool.stop().await;

        for job in &jobs {
            let job = store.job(job.job_id).await.unwrap().unwrap();
            assert_eq!(job.status, ScanStatus::Completed);
            assert!(job.worker_id.is_some());
        }
    }

    #[test]
    fn progress_is_clamped() {
        assert_eq!(progress_pct(0, 0), 0);
        assert_eq!(progress_pct(50, 200), 25);
        assert_eq!(progress_pct(200, 200), 100);
        assert_eq!(progress_pct(300, 200), 100);
    }
}
