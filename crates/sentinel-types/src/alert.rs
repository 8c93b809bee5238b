//! Alert rules, incidents, and the metric samples they evaluate against.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ParseEnumError;

/// Tolerance used when comparing floating-point metric values for equality.
pub const FLOAT_EPSILON: f64 = 1e-4;

//─────────────────────────────
//  Enumerations
//─────────────────────────────

/// How a rule decides whether to fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    /// Compare a live metric against a fixed threshold.
    Threshold,
    /// Run a regex over a serialized data slice.
    Pattern,
    /// Compare a live metric against a trailing statistical baseline.
    Anomaly,
    /// Fire when the current time matches a schedule expression.
    Scheduled,
}

impl RuleType {
    /// Wire representation, matching the `rule_type` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleType::Threshold => "threshold",
            RuleType::Pattern => "pattern",
            RuleType::Anomaly => "anomaly",
            RuleType::Scheduled => "scheduled",
        }
    }

    /// Parse the wire representation.
    pub fn parse(s: &str) -> Result<Self, ParseEnumError> {
        match s {
            "threshold" => Ok(RuleType::Threshold),
            "pattern" => Ok(RuleType::Pattern),
            "anomaly" => Ok(RuleType::Anomaly),
            "scheduled" => Ok(RuleType::Scheduled),
            other => Err(ParseEnumError::new("rule type", other)),
        }
    }
}

/// Alert severity, ordered from least to most urgent.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational; no operator action expected.
    Low,
    /// Worth a look during business hours.
    Medium,
    /// Needs prompt attention.
    High,
    /// Page somebody.
    Critical,
}

impl Severity {
    /// Wire representation, matching the `severity` columns.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// Upper-case form used in titles and subjects (`[HIGH] …`).
    pub fn as_upper(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }

    /// Parse the wire representation.
    pub fn parse(s: &str) -> Result<Self, ParseEnumError> {
        match s {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(ParseEnumError::new("severity", other)),
        }
    }
}

/// Lifecycle state of an alert incident.
///
/// Transitions are monotonic: `active → acknowledged → resolved`, with
/// `false_positive` reachable from `active` or `acknowledged` only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    /// Fired and awaiting triage.
    Active,
    /// An operator has seen it.
    Acknowledged,
    /// The underlying condition has been addressed.
    Resolved,
    /// Triage determined the firing was spurious.
    FalsePositive,
}

impl IncidentStatus {
    /// Wire representation, matching the `status` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentStatus::Active => "active",
            IncidentStatus::Acknowledged => "acknowledged",
            IncidentStatus::Resolved => "resolved",
            IncidentStatus::FalsePositive => "false_positive",
        }
    }

    /// Parse the wire representation.
    pub fn parse(s: &str) -> Result<Self, ParseEnumError> {
        match s {
            "active" => Ok(IncidentStatus::Active),
            "acknowledged" => Ok(IncidentStatus::Acknowledged),
            "resolved" => Ok(IncidentStatus::Resolved),
            "false_positive" => Ok(IncidentStatus::FalsePositive),
            other => Err(ParseEnumError::new("incident status", other)),
        }
    }

    /// Whether moving from `self` to `next` respects the monotonic lifecycle.
    pub fn can_transition_to(&self, next: IncidentStatus) -> bool {
        use IncidentStatus::*;
        match (self, next) {
            (Active, Acknowledged) | (Active, Resolved) | (Acknowledged, Resolved) => true,
            (Active, FalsePositive) | (Acknowledged, FalsePositive) => true,
            _ => false,
        }
    }

    /// Terminal states never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, IncidentStatus::Resolved | IncidentStatus::FalsePositive)
    }
}

/// Comparison operator for threshold rule conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdOp {
    /// Strictly greater than.
    Gt,
    /// Greater than or equal.
    Gte,
    /// Strictly less than.
    Lt,
    /// Less than or equal.
    Lte,
    /// Equal within [`FLOAT_EPSILON`].
    Eq,
    /// Not equal within [`FLOAT_EPSILON`].
    Ne,
}

impl ThresholdOp {
    /// Parse the wire representation.
    pub fn parse(s: &str) -> Result<Self, ParseEnumError> {
        match s {
            "gt" => Ok(ThresholdOp::Gt),
            "gte" => Ok(ThresholdOp::Gte),
            "lt" => Ok(ThresholdOp::Lt),
            "lte" => Ok(ThresholdOp::Lte),
            "eq" => Ok(ThresholdOp::Eq),
            "ne" => Ok(ThresholdOp::Ne),
            other => Err(ParseEnumError::new("threshold operator", other)),
        }
    }

    /// Wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ThresholdOp::Gt => "gt",
            ThresholdOp::Gte => "gte",
            ThresholdOp::Lt => "lt",
            ThresholdOp::Lte => "lte",
            ThresholdOp::Eq => "eq",
            ThresholdOp::Ne => "ne",
        }
    }

    /// Apply the comparison to a live value and a threshold.
    pub fn compare(&self, current: f64, threshold: f64) -> bool {
        match self {
            ThresholdOp::Gt => current > threshold,
            ThresholdOp::Gte => current >= threshold,
            ThresholdOp::Lt => current < threshold,
            ThresholdOp::Lte => current <= threshold,
            ThresholdOp::Eq => (current - threshold).abs() < FLOAT_EPSILON,
            ThresholdOp::Ne => (current - threshold).abs() >= FLOAT_EPSILON,
        }
    }
}

//─────────────────────────────
//  Entities
//─────────────────────────────

/// An operator-authored alerting rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    /// Stable identifier.
    pub rule_id: Uuid,
    /// Display name, used in incident titles.
    pub rule_name: String,
    /// Free-form description.
    pub description: String,
    /// Evaluator family.
    pub rule_type: RuleType,
    /// Severity stamped onto incidents this rule creates.
    pub severity: Severity,
    /// Evaluator-specific condition document (metric, operator, threshold,
    /// pattern, schedule, sensitivity, …).
    pub condition: serde_json::Value,
    /// Channels to fan notifications out to when the rule fires.
    pub notification_channels: Vec<Uuid>,
    /// Channel-independent notification overrides.
    pub notification_config: serde_json::Value,
    /// Minimum number of minutes between successive firings.
    pub cooldown_minutes: i64,
    /// Disabled rules are skipped entirely.
    pub is_enabled: bool,
    /// Operator that created the rule.
    pub created_by: String,
    /// Creation timestamp; evaluation order follows it.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
    /// When the rule last fired, if ever.
    pub last_triggered_at: Option<DateTime<Utc>>,
}

impl AlertRule {
    /// Whether the rule is still inside its cooldown window at `now`.
    ///
    /// A rule whose cooldown has exactly elapsed is out of cooldown and may
    /// fire again.
    pub fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        match self.last_triggered_at {
            None => false,
            Some(last) => now - last < chrono::Duration::minutes(self.cooldown_minutes),
        }
    }
}

/// A concrete firing of a rule; the unit of work for notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertIncident {
    /// Stable identifier.
    pub incident_id: Uuid,
    /// Rule that fired.
    pub rule_id: Uuid,
    /// Severity inherited from the rule at firing time.
    pub severity: Severity,
    /// `[SEVERITY] rule name`.
    pub title: String,
    /// Human-readable summary with the evaluation context attached.
    pub message: String,
    /// Evaluator-specific firing context.
    pub incident_data: serde_json::Value,
    /// Lifecycle state.
    pub status: IncidentStatus,
    /// When the rule fired.
    pub triggered_at: DateTime<Utc>,
    /// When an operator acknowledged, if they have.
    pub acknowledged_at: Option<DateTime<Utc>>,
    /// Who acknowledged.
    pub acknowledged_by: Option<String>,
    /// When the incident was resolved, if it has been.
    pub resolved_at: Option<DateTime<Utc>>,
    /// Who resolved.
    pub resolved_by: Option<String>,
    /// Free-form resolution notes.
    pub resolution_notes: Option<String>,
}

impl AlertIncident {
    /// Create a fresh, active incident for a rule firing at `triggered_at`.
    pub fn new(
        rule: &AlertRule,
        incident_data: serde_json::Value,
        triggered_at: DateTime<Utc>,
    ) -> Self {
        let title = format!("[{}] {}", rule.severity.as_upper(), rule.rule_name);
        let message = format!(
            "Alert triggered for rule: {}\nData: {}",
            rule.rule_name, incident_data
        );
        Self {
            incident_id: Uuid::new_v4(),
            rule_id: rule.rule_id,
            severity: rule.severity,
            title,
            message,
            incident_data,
            status: IncidentStatus::Active,
            triggered_at,
            acknowledged_at: None,
            acknowledged_by: None,
            resolved_at: None,
            resolved_by: None,
            resolution_notes: None,
        }
    }
}

/// Query predicate over incidents. Populated fields combine with AND;
/// empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IncidentFilter {
    /// Restrict to these statuses.
    #[serde(default)]
    pub statuses: Vec<IncidentStatus>,
    /// Restrict to these severities.
    #[serde(default)]
    pub severities: Vec<Severity>,
    /// Restrict to one rule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<Uuid>,
    /// Only incidents triggered at or after this time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<DateTime<Utc>>,
    /// Only incidents triggered at or before this time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<DateTime<Utc>>,
    /// Cap on results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl IncidentFilter {
    /// Whether `incident` passes this filter.
    pub fn matches(&self, incident: &AlertIncident) -> bool {
        if !self.statuses.is_empty() && !self.statuses.contains(&incident.status) {
            return false;
        }
        if !self.severities.is_empty() && !self.severities.contains(&incident.severity) {
            return false;
        }
        if let Some(rule_id) = self.rule_id {
            if incident.rule_id != rule_id {
                return false;
            }
        }
        if let Some(from) = self.from {
            if incident.triggered_at < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if incident.triggered_at > to {
                return false;
            }
        }
        true
    }
}

/// Aggregate incident counts for operator dashboards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IncidentStatistics {
    /// All incidents on record.
    pub total: u64,
    /// Counts keyed by status wire name.
    pub by_status: std::collections::HashMap<String, u64>,
    /// Counts keyed by severity wire name.
    pub by_severity: std::collections::HashMap<String, u64>,
}

//─────────────────────────────
//  Metric samples
//─────────────────────────────

/// A point-in-time reading of a named metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// Metric name (`transaction_volume`, `system_load`, …).
    pub metric: String,
    /// Scalar value compared against thresholds and baselines.
    pub value: f64,
    /// Supplementary readings (averages, maxima) carried into incident data
    /// and pattern matching.
    pub details: serde_json::Value,
    /// When the sample was taken.
    pub timestamp: DateTime<Utc>,
}

/// Trailing-window statistics used by anomaly rules.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricBaseline {
    /// Mean over the trailing window.
    pub mean: f64,
    /// Standard deviation over the trailing window.
    pub std_dev: f64,
}

impl MetricBaseline {
    /// Z-score of `value` against this baseline.
    pub fn z_score(&self, value: f64) -> f64 {
        ((value - self.mean) / self.std_dev).abs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_orders_low_to_critical() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn incident_status_transitions_are_monotonic() {
        use IncidentStatus::*;
        assert!(Active.can_transition_to(Acknowledged));
        assert!(Acknowledged.can_transition_to(Resolved));
        assert!(Active.can_transition_to(FalsePositive));
        assert!(Acknowledged.can_transition_to(FalsePositive));

        assert!(!Resolved.can_transition_to(Active));
        assert!(!Resolved.can_transition_to(Acknowledged));
        assert!(!FalsePositive.can_transition_to(Resolved));
        assert!(!Acknowledged.can_transition_to(Active));
    }

    #[test]
    fn threshold_eq_uses_epsilon() {
        assert!(ThresholdOp::Eq.compare(10.00005, 10.0));
        assert!(!ThresholdOp::Eq.compare(10.001, 10.0));
        assert!(ThresholdOp::Ne.compare(10.001, 10.0));
    }

    #[test]
    fn cooldown_boundary_allows_firing() {
        let now = Utc::now();
        let rule = AlertRule {
            rule_id: Uuid::new_v4(),
            rule_name: "volume".into(),
            description: String::new(),
            rule_type: RuleType::Threshold,
            severity: Severity::High,
            condition: serde_json::json!({}),
            notification_channels: vec![],
            notification_config: serde_json::json!({}),
            cooldown_minutes: 5,
            is_enabled: true,
            created_by: "ops".into(),
            created_at: now,
            updated_at: now,
            last_triggered_at: Some(now - chrono::Duration::minutes(5)),
        };
        // Exactly at the boundary the rule may fire again.
        assert!(!rule.in_cooldown(now));

        let mut inside = rule.clone();
        inside.last_triggered_at = Some(now - chrono::Duration::minutes(4));
        assert!(inside.in_cooldown(now));
    }

    #[test]
    fn enum_round_trips() {
        for s in ["threshold", "pattern", "anomaly", "scheduled"] {
            assert_eq!(RuleType::parse(s).unwrap().as_str(), s);
        }
        for s in ["active", "acknowledged", "resolved", "false_positive"] {
            assert_eq!(IncidentStatus::parse(s).unwrap().as_str(), s);
        }
        assert!(Severity::parse("urgent").is_err());
    }
}
