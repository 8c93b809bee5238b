//! Per-type rule evaluators.
//!
//! Every evaluator returns `Ok(Some(incident_data))` when the rule fires,
//! `Ok(None)` when it does not (including the no-data and invalid-regex
//! cases, which are logged and never abort a pass), and `Err` only for a
//! malformed condition document.

use chrono::Utc;
use regex::RegexBuilder;
use serde_json::json;
use tracing::{error, warn};

use sentinel_types::{AlertRule, ThresholdOp};

use crate::{AlertStore, AlertsError};

/// Evaluate one rule against current data, dispatching on its type.
pub async fn evaluate_rule(
    store: &dyn AlertStore,
    rule: &AlertRule,
) -> Result<Option<serde_json::Value>, AlertsError> {
    match rule.rule_type {
        sentinel_types::RuleType::Threshold => evaluate_threshold(store, rule).await,
        sentinel_types::RuleType::Pattern => evaluate_pattern(store, rule).await,
        sentinel_types::RuleType::Anomaly => evaluate_anomaly(store, rule).await,
        sentinel_types::RuleType::Scheduled => evaluate_scheduled(rule),
    }
}

fn condition_str<'a>(rule: &'a AlertRule, key: &str) -> Result<&'a str, AlertsError> {
    rule.condition
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| AlertsError::InvalidCondition(format!("missing field `{key}`")))
}

fn condition_f64(rule: &AlertRule, key: &str) -> Result<f64, AlertsError> {
    rule.condition
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| AlertsError::InvalidCondition(format!("missing field `{key}`")))
}

async fn evaluate_threshold(
    store: &dyn AlertStore,
    rule: &AlertRule,
) -> Result<Option<serde_json::Value>, AlertsError> {
    let metric = condition_str(rule, "metric")?;
    let operator = ThresholdOp::parse(condition_str(rule, "operator")?)
        .map_err(|e| AlertsError::InvalidCondition(e.to_string()))?;
    let threshold = condition_f64(rule, "threshold")?;

    let sample = match store.metric_sample(metric).await? {
        Some(sample) => sample,
        None => {
            warn!(metric, rule = %rule.rule_name, "no data available for metric");
            return Ok(None);
        }
    };

    if operator.compare(sample.value, threshold) {
        Ok(Some(json!({
            "metric": metric,
            "current_value": sample.value,
            "threshold": threshold,
            "operator": operator.as_str(),
            "evaluated_at": Utc::now().to_rfc3339(),
        })))
    } else {
        Ok(None)
    }
}

async fn evaluate_pattern(
    store: &dyn AlertStore,
    rule: &AlertRule,
) -> Result<Option<serde_json::Value>, AlertsError> {
    let pattern = condition_str(rule, "pattern")?;
    let data_source = condition_str(rule, "data_source")?;

    let metric = match data_source {
        "transactions" => "transaction_volume",
        "system" => "system_load",
        "compliance" => "compliance_score",
        other => {
            warn!(data_source = other, rule = %rule.rule_name, "unknown data source for pattern rule");
            return Ok(None);
        }
    };
    let sample = match store.metric_sample(metric).await? {
        Some(sample) => sample,
        None => {
            warn!(metric, rule = %rule.rule_name, "no data available for pattern rule");
            return Ok(None);
        }
    };

    // The pattern runs over the JSON-serialized sample, case-insensitive.
    let regex = match RegexBuilder::new(pattern).case_insensitive(true).build() {
        Ok(regex) => regex,
        Err(e) => {
            error!(pattern, error = %e, "invalid regex pattern");
            return Ok(None);
        }
    };
    let haystack = serde_json::to_string(&sample).unwrap_or_default();

    if regex.is_match(&haystack) {
        Ok(Some(json!({
            "pattern": pattern,
            "data_source": data_source,
            "matched_data": sample,
            "evaluated_at": Utc::now().to_rfc3339(),
        })))
    } else {
        Ok(None)
    }
}

async fn evaluate_anomaly(
    store: &dyn AlertStore,
    rule: &AlertRule,
) -> Result<Option<serde_json::Value>, AlertsError> {
    let metric = condition_str(rule, "metric")?;
    let sensitivity = rule
        .condition
        .get("sensitivity")
        .and_then(|v| v.as_f64())
        .unwrap_or(2.0);

    let sample = match store.metric_sample(metric).await? {
        Some(sample) => sample,
        None => {
            warn!(metric, rule = %rule.rule_name, "no data available for anomaly detection");
            return Ok(None);
        }
    };
    let baseline = match store.metric_baseline(metric).await? {
        Some(baseline) => baseline,
        None => {
            warn!(metric, rule = %rule.rule_name, "no baseline data available for anomaly detection");
            return Ok(None);
        }
    };

    if baseline.z_score(sample.value) > sensitivity {
        Ok(Some(json!({
            "metric": metric,
            "current_value": sample.value,
            "baseline_mean": baseline.mean,
            "baseline_std_dev": baseline.std_dev,
            "sensitivity": sensitivity,
            "evaluated_at": Utc::now().to_rfc3339(),
        })))
    } else {
        Ok(None)
    }
}

fn evaluate_scheduled(rule: &AlertRule) -> Result<Option<serde_json::Value>, AlertsError> {
    let expr = condition_str(rule, "schedule")?;
    let schedule = match crate::Schedule::parse(expr) {
        Ok(schedule) => schedule,
        Err(e) => {
            error!(schedule = expr, error = %e, rule = %rule.rule_name, "invalid schedule expression");
            return Ok(None);
        }
    };

    let now = chrono::Local::now();
    if schedule.matches(&now) {
        Ok(Some(json!({
            "schedule": expr,
            "triggered_at": Utc::now().to_rfc3339(),
            "evaluated_at": Utc::now().to_rfc3339(),
        })))
    } else {
        Ok(None)
    }
}
