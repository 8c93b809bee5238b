//! Typed fraud rule evaluation.
//!
//! Rule definitions are short textual forms interpreted per rule type:
//! threshold rules parse `"amount > X"`, pattern rules name structural
//! idioms, velocity rules carry a current-row heuristic standing in for
//! true historical windowing. Parser errors never fire and never abort the
//! scan.

use tracing::debug;

use sentinel_types::{FraudRule, FraudRuleType, TransactionRecord};

/// Evaluate one rule against one transaction.
pub fn evaluate_fraud_rule(rule: &FraudRule, txn: &TransactionRecord) -> bool {
    let definition = rule.rule_definition.as_str();

    match rule.rule_type {
        FraudRuleType::Threshold => {
            if let Some(rest) = definition.split_once("amount >").map(|(_, rest)| rest) {
                return match rest.trim().parse::<f64>() {
                    Ok(threshold) => txn.amount > threshold,
                    Err(_) => {
                        debug!(rule = %rule.rule_name, definition, "unparseable threshold definition");
                        false
                    }
                };
            }
        }
        FraudRuleType::Pattern => {
            if definition.contains("same_account") {
                return txn.from_account == txn.to_account;
            }
            if definition.contains("international_high_value") {
                return txn.transaction_type == "international" && txn.amount > 5000.0;
            }
            if definition.contains("unusual_currency") {
                return txn.currency != "USD" && txn.amount > 1000.0;
            }
        }
        FraudRuleType::Velocity => {
            // Current-row stand-in for a historical frequency window.
            if definition.contains("multiple_large") {
                return txn.amount > 5000.0;
            }
        }
    }

    // Legacy free-form conditions kept for older rule rows.
    if definition.contains("amount > 10000") && txn.amount > 10000.0 {
        return true;
    }
    if definition.contains("from_account == to_account") && txn.from_account == txn.to_account {
        return true;
    }
    false
}
