#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! **sentinel-alerts** – Rule evaluation engine for Sentinel.
//!
//! Periodically evaluates every enabled alert rule against live metric data
//! and emits incidents when a rule fires. Four evaluator families are
//! supported (threshold, pattern, anomaly, scheduled), each expressed as a
//! tagged dispatch rather than a class hierarchy. Cooldown suppresses alert
//! storms: a rule never fires twice within its `cooldown_minutes` window.
//!
//! The engine owns one long-lived evaluation task. Rule evaluation passes
//! never overlap within one engine instance, and errors inside a single
//! rule are local: they are logged, counted, and the pass moves on.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sentinel_alerts::{EngineConfig, NullSink, RuleEvaluationEngine};
//! use sentinel_store::MemoryStore;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let store = Arc::new(MemoryStore::new());
//! let engine = RuleEvaluationEngine::new(store, Arc::new(NullSink), EngineConfig::default());
//!
//! engine.start().await;
//! engine.trigger_evaluation();
//! engine.stop().await;
//! # }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use sentinel_store::{IncidentStore, MetricsSource, RuleStore};
use sentinel_types::{AlertIncident, AlertPayload};
use uuid::Uuid;

pub mod engine;
pub mod evaluators;
pub mod incidents;
pub mod rules;
pub mod schedule;

pub use engine::{EngineConfig, EvaluationMetrics, RuleEvaluationEngine};
pub use incidents::IncidentManager;
pub use rules::{create_rule, validate_condition, RuleDraft};
pub use schedule::Schedule;

/// The store slices the engine needs.
pub trait AlertStore: RuleStore + IncidentStore + MetricsSource + Send + Sync {}

impl<T> AlertStore for T where T: RuleStore + IncidentStore + MetricsSource + Send + Sync {}

/// Downstream receiver for fired incidents.
///
/// The notification service implements this; the engine only knows the
/// seam, keeping the dependency explicit and one-way.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Fan one incident out to the rule's configured channels.
    async fn send_alert(
        &self,
        incident: &AlertIncident,
        channels: &[Uuid],
        payload: AlertPayload,
    ) -> anyhow::Result<()>;

    /// Re-queue failed notifications whose retry is due. Called once after
    /// each evaluation pass; implementations with their own retry loop may
    /// leave this as the default no-op.
    async fn retry_due(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Sink that drops everything; useful for deployments that only record
/// incidents and for tests.
pub struct NullSink;

#[async_trait]
impl NotificationSink for NullSink {
    async fn send_alert(
        &self,
        _incident: &AlertIncident,
        _channels: &[Uuid],
        _payload: AlertPayload,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Errors surfaced by alert operations.
#[derive(Debug, thiserror::Error)]
pub enum AlertsError {
    /// Unknown incident id.
    #[error("incident not found: {0}")]
    IncidentNotFound(Uuid),
    /// Unknown rule id.
    #[error("rule not found: {0}")]
    RuleNotFound(Uuid),
    /// The requested status change violates the monotonic lifecycle.
    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition {
        /// Current status.
        from: &'static str,
        /// Requested status.
        to: &'static str,
    },
    /// A rule cannot be deleted while incidents remain open.
    #[error("rule {0} still has {1} open incident(s)")]
    RuleHasOpenIncidents(Uuid, usize),
    /// A rule condition document is missing or malformed.
    #[error("invalid rule condition: {0}")]
    InvalidCondition(String),
    /// The persistence store failed.
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Shared handle type for the engine's store dependency.
pub type SharedAlertStore = Arc<dyn AlertStore>;
