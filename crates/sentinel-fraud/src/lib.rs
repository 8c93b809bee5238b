#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! **sentinel-fraud** – Batch fraud scanning for Sentinel.
//!
//! A pool of workers claims queued scan jobs atomically from the store
//! (one worker per job, enforced by row-level locking or the memory
//! driver's single lock), streams the matching transactions through the
//! enabled fraud rules, raises `FraudAlert`s for firing rules, and reports
//! progress every hundred rows. Cancellation is honored between batches,
//! never mid-batch; unfinished jobs stay `processing` and become
//! reclaimable once their claim goes stale.

use sentinel_store::{FraudRuleStore, ScanStore, TransactionSource};

pub mod rules;
pub mod worker;

pub use rules::evaluate_fraud_rule;
pub use worker::{FraudScanWorkerPool, WorkerPoolConfig};

/// The store slices the scan workers need.
pub trait FraudStore: ScanStore + TransactionSource + FraudRuleStore + Send + Sync {}

impl<T> FraudStore for T where T: ScanStore + TransactionSource + FraudRuleStore + Send + Sync {}

/// Errors surfaced by the scan pool.
#[derive(Debug, thiserror::Error)]
pub enum FraudError {
    /// The pool is already running.
    #[error("scan worker pool already running")]
    AlreadyRunning,
    /// The persistence store failed.
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}
