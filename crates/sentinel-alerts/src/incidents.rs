//! Incident lifecycle operations.
//!
//! Status moves are monotonic (`active → acknowledged → resolved`;
//! `false_positive` only from `active` or `acknowledged`) and terminal
//! states never change again. Acknowledging twice is a no-op that returns
//! the original acknowledgement time.

use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use sentinel_types::{AlertIncident, IncidentStatus};

use crate::{AlertsError, SharedAlertStore};

/// Operator-facing incident and rule lifecycle API.
pub struct IncidentManager {
    store: SharedAlertStore,
}

impl IncidentManager {
    /// Build a manager over the given store.
    pub fn new(store: SharedAlertStore) -> Self {
        Self { store }
    }

    async fn load(&self, incident_id: Uuid) -> Result<AlertIncident, AlertsError> {
        self.store
            .incident(incident_id)
            .await?
            .ok_or(AlertsError::IncidentNotFound(incident_id))
    }

    /// Acknowledge an incident. Idempotent: acknowledging an already
    /// acknowledged incident returns its prior acknowledgement time.
    pub async fn acknowledge(
        &self,
        incident_id: Uuid,
        actor: &str,
    ) -> Result<DateTime<Utc>, AlertsError> {
        let mut incident = self.load(incident_id).await?;
        if incident.status == IncidentStatus::Acknowledged {
            if let Some(at) = incident.acknowledged_at {
                return Ok(at);
            }
        }
        if !incident
            .status
            .can_transition_to(IncidentStatus::Acknowledged)
        {
            return Err(AlertsError::InvalidTransition {
                from: incident.status.as_str(),
                to: IncidentStatus::Acknowledged.as_str(),
            });
        }

        let now = Utc::now();
        incident.status = IncidentStatus::Acknowledged;
        incident.acknowledged_at = Some(now);
        incident.acknowledged_by = Some(actor.to_string());
        self.store.update_incident(&incident).await?;
        info!(incident = %incident_id, actor, "incident acknowledged");
        Ok(now)
    }

    /// Resolve an incident from `active` or `acknowledged`.
    pub async fn resolve(
        &self,
        incident_id: Uuid,
        actor: &str,
        notes: Option<&str>,
    ) -> Result<AlertIncident, AlertsError> {
        let mut incident = self.load(incident_id).await?;
        if !incident.status.can_transition_to(IncidentStatus::Resolved) {
            return Err(AlertsError::InvalidTransition {
                from: incident.status.as_str(),
                to: IncidentStatus::Resolved.as_str(),
            });
        }

        incident.status = IncidentStatus::Resolved;
        incident.resolved_at = Some(Utc::now());
        incident.resolved_by = Some(actor.to_string());
        incident.resolution_notes = notes.map(|n| n.to_string());
        self.store.update_incident(&incident).await?;
        info!(incident = %incident_id, actor, "incident resolved");
        Ok(incident)
    }

    /// Mark an incident as a false positive, from `active` or
    /// `acknowledged` only.
    pub async fn mark_false_positive(
        &self,
        incident_id: Uuid,
        actor: &str,
    ) -> Result<AlertIncident, AlertsError> {
        let mut incident = self.load(incident_id).await?;
        if !incident
            .status
            .can_transition_to(IncidentStatus::FalsePositive)
        {
            return Err(AlertsError::InvalidTransition {
                from: incident.status.as_str(),
                to: IncidentStatus::FalsePositive.as_str(),
            });
        }

        incident.status = IncidentStatus::FalsePositive;
        incident.resolved_at = Some(Utc::now());
        incident.resolved_by = Some(actor.to_string());
        self.store.update_incident(&incident).await?;
        info!(incident = %incident_id, actor, "incident marked false positive");
        Ok(incident)
    }

    /// Incidents passing the filter, newest first.
    pub async fn list_incidents(
        &self,
        filter: &sentinel_types::IncidentFilter,
    ) -> Result<Vec<AlertIncident>, AlertsError> {
        Ok(self.store.list_incidents(filter).await?)
    }

    /// Aggregate incident counts for dashboards.
    pub async fn statistics(&self) -> Result<sentinel_types::IncidentStatistics, AlertsError> {
        Ok(self.store.incident_statistics().await?)
    }

    /// Delete a rule. Rejected while the rule still has open incidents.
    pub async fn delete_rule(&self, rule_id: Uuid) -> Result<(), AlertsError> {
        if self.store.rule(rule_id).await?.is_none() {
            return Err(AlertsError::RuleNotFound(rule_id));
        }
        let open = self.store.open_incidents_for_rule(rule_id).await?;
        if !open.is_empty() {
            return Err(AlertsError::RuleHasOpenIncidents(rule_id, open.len()));
        }
        self.store.delete_rule(rule_id).await?;
        info!(rule = %rule_id, "alert rule deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_store::{IncidentStore, MemoryStore, RuleStore};
    use sentinel_types::{AlertRule, RuleType, Severity};
    use serde_json::json;
    use std::sync::Arc;

    fn rule() -> AlertRule {
        let now = Utc::now();
        AlertRule {
            rule_id: Uuid::new_v4(),
            rule_name: "volume".into(),
            description: String::new(),
            rule_type: RuleType::Threshold,
            severity: Severity::Medium,
            condition: json!({}),
            notification_channels: vec![],
            notification_config: json!({}),
            cooldown_minutes: 5,
            is_enabled: true,
            created_by: "ops".into(),
            created_at: now,
            updated_at: now,
            last_triggered_at: None,
        }
    }

    async fn setup() -> (MemoryStore, IncidentManager, AlertRule, AlertIncident) {
        let store = MemoryStore::new();
        let rule = rule();
        store.insert_rule(&rule).await.unwrap();
        let incident = AlertIncident::new(&rule, json!({"value": 12}), Utc::now());
        store.insert_incident(&incident).await.unwrap();
        let manager = IncidentManager::new(Arc::new(store.clone()));
        (store, manager, rule, incident)
    }

    #[tokio::test]
    async fn acknowledge_is_idempotent() {
        let (_store, manager, _rule, incident) = setup().await;
        let first = manager
            .acknowledge(incident.incident_id, "alice")
            .await
            .unwrap();
        let second = manager
            .acknowledge(incident.incident_id, "bob")
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn resolve_then_acknowledge_is_rejected() {
        let (_store, manager, _rule, incident) = setup().await;
        manager
            .resolve(incident.incident_id, "alice", Some("fixed"))
            .await
            .unwrap();
        assert!(matches!(
            manager.acknowledge(incident.incident_id, "bob").await,
            Err(AlertsError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn false_positive_only_from_active_or_acknowledged() {
        let (_store, manager, _rule, incident) = setup().await;
        manager
            .acknowledge(incident.incident_id, "alice")
            .await
            .unwrap();
        manager
            .mark_false_positive(incident.incident_id, "alice")
            .await
            .unwrap();
        // Terminal now; a second transition fails.
        assert!(manager
            .mark_false_positive(incident.incident_id, "bob")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn rule_deletion_requires_no_open_incidents() {
        let (store, manager, rule, incident) = setup().await;
        assert!(matches!(
            manager.delete_rule(rule.rule_id).await,
            Err(AlertsError::RuleHasOpenIncidents(_, 1))
        ));

        manager
            .resolve(incident.incident_id, "alice", None)
            .await
            .unwrap();
        manager.delete_rule(rule.rule_id).await.unwrap();
        assert!(store.rule(rule.rule_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn listing_filters_by_status_and_counts_aggregate() {
        let (store, manager, rule, incident) = setup().await;
        let second = AlertIncident::new(&rule, json!({"value": 99}), Utc::now());
        store.insert_incident(&second).await.unwrap();
        manager
            .acknowledge(incident.incident_id, "alice")
            .await
            .unwrap();

        let acknowledged = manager
            .list_incidents(&sentinel_types::IncidentFilter {
                statuses: vec![sentinel_types::IncidentStatus::Acknowledged],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(acknowledged.len(), 1);
        assert_eq!(acknowledged[0].incident_id, incident.incident_id);

        let stats = manager.statistics().await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_status["acknowledged"], 1);
        assert_eq!(stats.by_status["active"], 1);
        assert_eq!(stats.by_severity["medium"], 2);
    }

    #[tokio::test]
    async fn unknown_incident_is_reported() {
        let (_store, manager, _rule, _incident) = setup().await;
        assert!(matches!(
            manager.acknowledge(Uuid::new_v4(), "alice").await,
            Err(AlertsError::IncidentNotFound(_))
        ));
    }
}
