//! Regulatory change events and subscription filters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A regulatory change reported by the upstream monitor.
///
/// Immutable once produced; the subscriber deduplicates on `change_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegulatoryEvent {
    /// Event identifier; mirrors `change_id`.
    pub event_id: String,
    /// Monitor-assigned change identifier, used for dedup and paging.
    pub change_id: String,
    /// Originating source (`SEC Release`, `FCA Handbook`, …).
    pub source_name: String,
    /// Title of the affected regulation.
    pub regulation_title: String,
    /// `NEW_RULE`, `AMENDMENT`, `GUIDANCE`, …
    pub change_type: String,
    /// Narrative description of the change.
    pub change_description: String,
    /// Monitor-assigned severity (`HIGH`, `MEDIUM`, `LOW`).
    pub severity: String,
    /// ISO-8601 effective date, as reported.
    pub effective_date: String,
    /// When this process first saw the event.
    pub detected_at: DateTime<Utc>,
    /// Monitor impact assessment, forwarded verbatim.
    pub impact_assessment: serde_json::Value,
    /// Entities extracted by the monitor, forwarded verbatim.
    pub extracted_entities: serde_json::Value,
}

impl RegulatoryEvent {
    /// Build an event from one element of the monitor's `/changes` array,
    /// tolerating absent fields the way the wire format allows.
    pub fn from_wire(item: &serde_json::Value, detected_at: DateTime<Utc>) -> Self {
        let text = |key: &str| -> String {
            item.get(key)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };
        let object = |key: &str| -> serde_json::Value {
            item.get(key)
                .cloned()
                .unwrap_or_else(|| serde_json::json!({}))
        };
        let change_id = text("change_id");
        Self {
            event_id: change_id.clone(),
            change_id,
            source_name: text("source_name"),
            regulation_title: text("regulation_title"),
            change_type: text("change_type"),
            change_description: text("change_description"),
            severity: item
                .get("severity")
                .and_then(|v| v.as_str())
                .unwrap_or("MEDIUM")
                .to_string(),
            effective_date: text("effective_date"),
            detected_at,
            impact_assessment: object("impact_assessment"),
            extracted_entities: object("extracted_entities"),
        }
    }
}

/// What a subscriber wants to hear about.
///
/// Empty lists match everything; non-empty lists are OR within a field and
/// AND across fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionFilter {
    /// Source names, matched by substring (`"SEC"` matches `"SEC Release"`).
    #[serde(default)]
    pub sources: Vec<String>,
    /// Change types, matched exactly.
    #[serde(default)]
    pub change_types: Vec<String>,
    /// Severities, matched exactly.
    #[serde(default)]
    pub severities: Vec<String>,
    /// Jurisdictions, matched exactly when present in the event entities.
    #[serde(default)]
    pub jurisdictions: Vec<String>,
    /// Minimum effective date (ISO-8601), when supplied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_effective_date: Option<String>,
}

impl SubscriptionFilter {
    /// Whether `event` passes this filter.
    pub fn matches(&self, event: &RegulatoryEvent) -> bool {
        if !self.sources.is_empty()
            && !self
                .sources
                .iter()
                .any(|s| event.source_name.contains(s.as_str()))
        {
            return false;
        }
        if !self.change_types.is_empty()
            && !self.change_types.iter().any(|t| event.change_type == *t)
        {
            return false;
        }
        if !self.severities.is_empty() && !self.severities.iter().any(|s| event.severity == *s) {
            return false;
        }
        true
    }
}
