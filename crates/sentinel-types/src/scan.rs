//! Fraud scan jobs, fraud rules, and the transactions they evaluate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{ParseEnumError, Severity};

//─────────────────────────────
//  Enumerations
//─────────────────────────────

/// Lifecycle state of a scan job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    /// Waiting for a worker.
    Queued,
    /// Claimed by exactly one worker.
    Processing,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
}

impl ScanStatus {
    /// Wire representation, matching the `status` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Queued => "queued",
            ScanStatus::Processing => "processing",
            ScanStatus::Completed => "completed",
            ScanStatus::Failed => "failed",
        }
    }

    /// Parse the wire representation.
    pub fn parse(s: &str) -> Result<Self, ParseEnumError> {
        match s {
            "queued" => Ok(ScanStatus::Queued),
            "processing" => Ok(ScanStatus::Processing),
            "completed" => Ok(ScanStatus::Completed),
            "failed" => Ok(ScanStatus::Failed),
            other => Err(ParseEnumError::new("scan status", other)),
        }
    }
}

/// How a fraud rule definition is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FraudRuleType {
    /// `"amount > X"` comparisons.
    Threshold,
    /// Named structural patterns (`same_account`, …).
    Pattern,
    /// Frequency heuristics (current-row approximation).
    Velocity,
}

impl FraudRuleType {
    /// Parse the wire representation.
    pub fn parse(s: &str) -> Result<Self, ParseEnumError> {
        match s {
            "threshold" => Ok(FraudRuleType::Threshold),
            "pattern" => Ok(FraudRuleType::Pattern),
            "velocity" => Ok(FraudRuleType::Velocity),
            other => Err(ParseEnumError::new("fraud rule type", other)),
        }
    }
}

//─────────────────────────────
//  Entities
//─────────────────────────────

/// A queued or running batch fraud scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanJob {
    /// Stable identifier.
    pub job_id: Uuid,
    /// Lifecycle state.
    pub status: ScanStatus,
    /// Higher priority jobs are claimed first.
    pub priority: i32,
    /// Raw filter document supplied when the job was queued.
    pub filters: serde_json::Value,
    /// Operator that queued the job.
    pub created_by: String,
    /// Worker currently holding the claim, if any.
    pub worker_id: Option<String>,
    /// When the claim was taken.
    pub claimed_at: Option<DateTime<Utc>>,
    /// When processing began.
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// Percentage complete, 0-100.
    pub progress: i32,
    /// Total transactions matched by the filters.
    pub transactions_total: i64,
    /// Transactions evaluated so far.
    pub transactions_processed: i64,
    /// Transactions that triggered at least one rule.
    pub transactions_flagged: i64,
    /// Failure detail for `failed` jobs.
    pub error_message: Option<String>,
    /// When the job was queued.
    pub created_at: DateTime<Utc>,
}

impl ScanJob {
    /// Queue a new job with the given filters and priority.
    pub fn queued(filters: serde_json::Value, priority: i32, created_by: impl Into<String>) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            status: ScanStatus::Queued,
            priority,
            filters,
            created_by: created_by.into(),
            worker_id: None,
            claimed_at: None,
            started_at: None,
            completed_at: None,
            progress: 0,
            transactions_total: 0,
            transactions_processed: 0,
            transactions_flagged: 0,
            error_message: None,
            created_at: Utc::now(),
        }
    }
}

/// Parsed scan filter predicates.
///
/// Unparseable fields are ignored rather than failing the job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanFilters {
    /// Only transactions created at or after this time.
    pub date_from: Option<DateTime<Utc>>,
    /// Only transactions created at or before this time.
    pub date_to: Option<DateTime<Utc>>,
    /// Minimum amount, inclusive.
    pub amount_min: Option<f64>,
    /// Maximum amount, inclusive.
    pub amount_max: Option<f64>,
    /// Exact transaction status.
    pub status: Option<String>,
}

impl ScanFilters {
    /// Parse the job's raw filter document, tolerating malformed input the
    /// way the scan queue always has: anything unreadable means no filter.
    pub fn from_value(value: &serde_json::Value) -> Self {
        let date = |key: &str| -> Option<DateTime<Utc>> {
            value
                .get(key)
                .and_then(|v| v.as_str())
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc))
        };
        Self {
            date_from: date("date_from"),
            date_to: date("date_to"),
            amount_min: value.get("amount_min").and_then(|v| v.as_f64()),
            amount_max: value.get("amount_max").and_then(|v| v.as_f64()),
            status: value
                .get("status")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
        }
    }

    /// Whether `txn` passes every populated predicate.
    pub fn matches(&self, txn: &TransactionRecord) -> bool {
        if let Some(from) = self.date_from {
            if txn.created_at < from {
                return false;
            }
        }
        if let Some(to) = self.date_to {
            if txn.created_at > to {
                return false;
            }
        }
        if let Some(min) = self.amount_min {
            if txn.amount < min {
                return false;
            }
        }
        if let Some(max) = self.amount_max {
            if txn.amount > max {
                return false;
            }
        }
        if let Some(status) = &self.status {
            if txn.status != *status {
                return false;
            }
        }
        true
    }
}

/// A transaction row as seen by the scan worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Stable identifier.
    pub transaction_id: String,
    /// Transaction amount.
    pub amount: f64,
    /// ISO currency code.
    pub currency: String,
    /// Source account.
    pub from_account: String,
    /// Destination account.
    pub to_account: String,
    /// `domestic`, `international`, …
    pub transaction_type: String,
    /// Settlement status.
    pub status: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Auxiliary data, forwarded verbatim.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// A fraud detection rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FraudRule {
    /// Stable identifier.
    pub rule_id: Uuid,
    /// Display name, used in alert messages.
    pub rule_name: String,
    /// Textual definition interpreted per `rule_type`.
    pub rule_definition: String,
    /// How the definition is interpreted.
    pub rule_type: FraudRuleType,
    /// Severity stamped onto alerts.
    pub severity: Severity,
    /// Evaluation order, highest first.
    pub priority: i32,
    /// Disabled rules are skipped.
    pub is_enabled: bool,
    /// How many alerts the rule has raised.
    pub alert_count: i64,
    /// When the rule last fired.
    pub last_triggered_at: Option<DateTime<Utc>>,
}

/// A transaction flagged by a fraud rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FraudAlert {
    /// Stable identifier.
    pub alert_id: Uuid,
    /// Flagged transaction.
    pub transaction_id: String,
    /// Rule that fired.
    pub rule_id: Uuid,
    /// Severity inherited from the rule.
    pub severity: Severity,
    /// Triage state; alerts are created `active`.
    pub alert_status: String,
    /// Amount of the flagged transaction.
    pub flagged_amount: f64,
    /// Currency of the flagged transaction.
    pub flagged_currency: String,
    /// Source account.
    pub from_account: String,
    /// Destination account.
    pub to_account: String,
    /// Transaction type.
    pub transaction_type: String,
    /// `Transaction flagged by rule: <name>`.
    pub alert_message: String,
    /// Detection time.
    pub detected_at: DateTime<Utc>,
}

impl FraudAlert {
    /// Build an alert for `rule` firing on `txn` at `detected_at`.
    pub fn for_rule(rule: &FraudRule, txn: &TransactionRecord, detected_at: DateTime<Utc>) -> Self {
        Self {
            alert_id: Uuid::new_v4(),
            transaction_id: txn.transaction_id.clone(),
            rule_id: rule.rule_id,
            severity: rule.severity,
            alert_status: "active".to_string(),
            flagged_amount: txn.amount,
            flagged_currency: txn.currency.clone(),
            from_account: txn.from_account.clone(),
            to_account: txn.to_account.clone(),
            transaction_type: txn.transaction_type.clone(),
            alert_message: format!("Transaction flagged by rule: {}", rule.rule_name),
            detected_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txn(amount: f64, status: &str) -> TransactionRecord {
        TransactionRecord {
            transaction_id: "t-1".into(),
            amount,
            currency: "USD".into(),
            from_account: "a".into(),
            to_account: "b".into(),
            transaction_type: "domestic".into(),
            status: status.into(),
            created_at: Utc::now(),
            metadata: serde_json::json!({}),
        }
    }

    #[test]
    fn filters_parse_tolerantly() {
        let filters = ScanFilters::from_value(&serde_json::json!({
            "date_from": "not a date",
            "amount_min": 100.0,
            "status": "settled",
        }));
        assert!(filters.date_from.is_none());
        assert_eq!(filters.amount_min, Some(100.0));
        assert_eq!(filters.status.as_deref(), Some("settled"));
    }

    #[test]
    fn filters_match_amount_and_status() {
        let filters = ScanFilters {
            amount_min: Some(50.0),
            status: Some("settled".into()),
            ..Default::default()
        };
        assert!(filters.matches(&txn(60.0, "settled")));
        assert!(!filters.matches(&txn(40.0, "settled")));
        assert!(!filters.matches(&txn(60.0, "pending")));
    }
}
