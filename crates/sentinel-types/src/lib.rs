#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **sentinel-types** – Shared domain models for the Sentinel platform.
//!
//! This crate sits at the bottom of the crate graph so that every other
//! crate can depend on it without causing cycles. It carries the entity
//! types of the alert and event fabric (rules, incidents, channels,
//! notification attempts, regulatory events, activity events, sessions,
//! scan jobs) together with their string round-trips and the small pieces
//! of domain logic that belong to the data itself: status transition
//! guards, filter matching, severity ordering.
//!
//! It intentionally makes no assumptions about I/O, persistence, or
//! transport.

pub mod activity;
pub mod alert;
pub mod collab;
pub mod notify;
pub mod regulatory;
pub mod scan;

pub use activity::{
    ActivityFilter, ActivitySeverity, ActivityType, AgentActivityEvent, AgentActivityStats,
    ExportFormat,
};
pub use alert::{
    AlertIncident, AlertRule, IncidentFilter, IncidentStatistics, IncidentStatus, MetricBaseline,
    MetricSample, RuleType, Severity, ThresholdOp,
};
pub use collab::{
    AssistanceRequest, CollabAction, CollaborationSession, HumanUser, SessionFeedback,
    SessionIntervention, SessionMessage, SessionState, UserRole,
};
pub use notify::{AlertPayload, ChannelType, DeliveryStatus, NotificationAttempt, NotificationChannel};
pub use regulatory::{RegulatoryEvent, SubscriptionFilter};
pub use scan::{
    FraudAlert, FraudRule, FraudRuleType, ScanFilters, ScanJob, ScanStatus, TransactionRecord,
};

/// Error raised when parsing one of the domain enums from its wire string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseEnumError {
    /// Which enum failed to parse.
    pub kind: &'static str,
    /// The offending input.
    pub value: String,
}

impl ParseEnumError {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
