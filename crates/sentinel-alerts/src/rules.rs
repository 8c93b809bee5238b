//! Rule authoring: validation at the API boundary.
//!
//! A malformed condition document is rejected here with a validation error
//! and never reaches the evaluation loop.

use chrono::Utc;
use regex::RegexBuilder;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use sentinel_types::{AlertRule, RuleType, Severity, ThresholdOp};

use crate::{AlertsError, Schedule, SharedAlertStore};

/// Operator input for a new alert rule.
#[derive(Debug, Clone)]
pub struct RuleDraft {
    /// Display name.
    pub rule_name: String,
    /// Free-form description.
    pub description: String,
    /// Evaluator family.
    pub rule_type: RuleType,
    /// Severity stamped onto incidents.
    pub severity: Severity,
    /// Evaluator-specific condition document.
    pub condition: Value,
    /// Channels to notify on firing.
    pub notification_channels: Vec<Uuid>,
    /// Minimum minutes between firings.
    pub cooldown_minutes: i64,
    /// Operator creating the rule.
    pub created_by: String,
}

/// Check a condition document against its rule type.
pub fn validate_condition(rule_type: RuleType, condition: &Value) -> Result<(), AlertsError> {
    let invalid = |message: String| Err(AlertsError::InvalidCondition(message));
    let require_str = |key: &str| -> Result<&str, AlertsError> {
        condition
            .get(key)
            .and_then(|v| v.as_str())
            .ok_or_else(|| AlertsError::InvalidCondition(format!("missing field `{key}`")))
    };

    match rule_type {
        RuleType::Threshold => {
            require_str("metric")?;
            ThresholdOp::parse(require_str("operator")?)
                .map_err(|e| AlertsError::InvalidCondition(e.to_string()))?;
            if condition.get("threshold").and_then(|v| v.as_f64()).is_none() {
                return invalid("missing field `threshold`".to_string());
            }
        }
        RuleType::Pattern => {
            let pattern = require_str("pattern")?;
            if let Err(e) = RegexBuilder::new(pattern).case_insensitive(true).build() {
                return invalid(format!("invalid regex pattern: {e}"));
            }
            match require_str("data_source")? {
                "transactions" | "system" | "compliance" => {}
                other => return invalid(format!("unknown data source `{other}`")),
            }
        }
        RuleType::Anomaly => {
            require_str("metric")?;
            if let Some(sensitivity) = condition.get("sensitivity") {
                match sensitivity.as_f64() {
                    Some(s) if s > 0.0 => {}
                    _ => return invalid("`sensitivity` must be a positive number".to_string()),
                }
            }
        }
        RuleType::Scheduled => {
            Schedule::parse(require_str("schedule")?)
                .map_err(|e| AlertsError::InvalidCondition(e.to_string()))?;
        }
    }
    Ok(())
}

/// Validate a draft and persist it as an enabled rule.
pub async fn create_rule(
    store: &SharedAlertStore,
    draft: RuleDraft,
) -> Result<AlertRule, AlertsError> {
    if draft.rule_name.trim().is_empty() {
        return Err(AlertsError::InvalidCondition(
            "rule name cannot be empty".to_string(),
        ));
    }
    if draft.cooldown_minutes < 0 {
        return Err(AlertsError::InvalidCondition(
            "cooldown cannot be negative".to_string(),
        ));
    }
    validate_condition(draft.rule_type, &draft.condition)?;

    let now = Utc::now();
    let rule = AlertRule {
        rule_id: Uuid::new_v4(),
        rule_name: draft.rule_name,
        description: draft.description,
        rule_type: draft.rule_type,
        severity: draft.severity,
        condition: draft.condition,
        notification_channels: draft.notification_channels,
        notification_config: serde_json::json!({}),
        cooldown_minutes: draft.cooldown_minutes,
        is_enabled: true,
        created_by: draft.created_by,
        created_at: now,
        updated_at: now,
        last_triggered_at: None,
    };
    store.insert_rule(&rule).await?;
    info!(rule = %rule.rule_id, name = %rule.rule_name, "created alert rule");
    Ok(rule)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_store::MemoryStore;
    use serde_json::json;
    use std::sync::Arc;

    fn draft(rule_type: RuleType, condition: Value) -> RuleDraft {
        RuleDraft {
            rule_name: "volume".into(),
            description: String::new(),
            rule_type,
            severity: Severity::High,
            condition,
            notification_channels: vec![],
            cooldown_minutes: 5,
            created_by: "ops".into(),
        }
    }

    #[test]
    fn threshold_conditions_require_all_fields() {
        let ok = json!({"metric": "transaction_volume", "operator": "gt", "threshold": 10.0});
        assert!(validate_condition(RuleType::Threshold, &ok).is_ok());

        for broken in [
            json!({"operator": "gt", "threshold": 10.0}),
            json!({"metric": "m", "threshold": 10.0}),
            json!({"metric": "m", "operator": "between", "threshold": 10.0}),
            json!({"metric": "m", "operator": "gt", "threshold": "ten"}),
        ] {
            assert!(matches!(
                validate_condition(RuleType::Threshold, &broken),
                Err(AlertsError::InvalidCondition(_))
            ));
        }
    }

    #[test]
    fn pattern_conditions_reject_bad_regex_and_sources() {
        let ok = json!({"pattern": "suspicious", "data_source": "transactions"});
        assert!(validate_condition(RuleType::Pattern, &ok).is_ok());

        assert!(validate_condition(
            RuleType::Pattern,
            &json!({"pattern": "([unclosed", "data_source": "system"})
        )
        .is_err());
        assert!(validate_condition(
            RuleType::Pattern,
            &json!({"pattern": "x", "data_source": "weather"})
        )
        .is_err());
    }

    #[test]
    fn anomaly_sensitivity_must_be_positive() {
        assert!(validate_condition(RuleType::Anomaly, &json!({"metric": "m"})).is_ok());
        assert!(validate_condition(
            RuleType::Anomaly,
            &json!({"metric": "m", "sensitivity": 3.0})
        )
        .is_ok());
        assert!(validate_condition(
            RuleType::Anomaly,
            &json!({"metric": "m", "sensitivity": -1.0})
        )
        .is_err());
    }

    #[test]
    fn scheduled_conditions_must_parse() {
        assert!(
            validate_condition(RuleType::Scheduled, &json!({"schedule": "daily at 09:00"})).is_ok()
        );
        assert!(validate_condition(
            RuleType::Scheduled,
            &json!({"schedule": "whenever convenient"})
        )
        .is_err());
    }

    #[tokio::test]
    async fn create_rule_persists_valid_drafts() {
        let store: SharedAlertStore = Arc::new(MemoryStore::new());
        let rule = create_rule(
            &store,
            draft(
                RuleType::Threshold,
                json!({"metric": "transaction_volume", "operator": "gt", "threshold": 10.0}),
            ),
        )
        .await
        .unwrap();

        assert!(rule.is_enabled);
        assert!(store.rule(rule.rule_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn create_rule_rejects_invalid_drafts_before_persisting() {
        let store: SharedAlertStore = Arc::new(MemoryStore::new());
        let result = create_rule(&store, draft(RuleType::Threshold, json!({}))).await;
        assert!(matches!(result, Err(AlertsError::InvalidCondition(_))));

        let mut negative = draft(
            RuleType::Threshold,
            json!({"metric": "m", "operator": "gt", "threshold": 1.0}),
        );
        negative.cooldown_minutes = -5;
        assert!(create_rule(&store, negative).await.is_err());
    }
}
