//! Agent activity events, per-agent statistics, and feed filters.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ParseEnumError;

//─────────────────────────────
//  Enumerations
//─────────────────────────────

/// What kind of agent lifecycle or decision event occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    /// Agent process came up.
    AgentStarted,
    /// Agent process went down cleanly.
    AgentStopped,
    /// Agent hit an error.
    AgentError,
    /// Agent produced a decision.
    DecisionMade,
    /// Agent began a task.
    TaskStarted,
    /// Agent finished a task.
    TaskCompleted,
    /// Agent failed a task.
    TaskFailed,
    /// Agent received an external event.
    EventReceived,
    /// Agent changed state.
    StateChanged,
}

impl ActivityType {
    /// Wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::AgentStarted => "agent_started",
            ActivityType::AgentStopped => "agent_stopped",
            ActivityType::AgentError => "agent_error",
            ActivityType::DecisionMade => "decision_made",
            ActivityType::TaskStarted => "task_started",
            ActivityType::TaskCompleted => "task_completed",
            ActivityType::TaskFailed => "task_failed",
            ActivityType::EventReceived => "event_received",
            ActivityType::StateChanged => "state_changed",
        }
    }
}

/// Severity of an activity event.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ActivitySeverity {
    /// Routine lifecycle noise.
    Info,
    /// Something worth flagging.
    Warning,
    /// A failure.
    Error,
    /// A failure needing immediate attention.
    Critical,
}

impl ActivitySeverity {
    /// Wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivitySeverity::Info => "info",
            ActivitySeverity::Warning => "warning",
            ActivitySeverity::Error => "error",
            ActivitySeverity::Critical => "critical",
        }
    }
}

/// Supported export encodings for feed snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// Pretty-printed JSON array.
    Json,
    /// Header row plus one line per event.
    Csv,
    /// `<activities><activity>…` elements.
    Xml,
}

impl ExportFormat {
    /// Parse the user-supplied format name.
    pub fn parse(s: &str) -> Result<Self, ParseEnumError> {
        match s {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            "xml" => Ok(ExportFormat::Xml),
            other => Err(ParseEnumError::new("export format", other)),
        }
    }
}

//─────────────────────────────
//  Entities
//─────────────────────────────

/// One immutable activity record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentActivityEvent {
    /// Stable identifier.
    pub event_id: Uuid,
    /// Agent the event belongs to.
    pub agent_id: String,
    /// Event kind.
    pub activity_type: ActivityType,
    /// Event severity.
    pub severity: ActivitySeverity,
    /// Short title.
    pub title: String,
    /// Narrative description.
    pub description: String,
    /// Small key/value annotations (task ids, error messages, …).
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Attached decision payload for [`ActivityType::DecisionMade`] events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<serde_json::Value>,
    /// When the event occurred.
    pub occurred_at: DateTime<Utc>,
}

impl AgentActivityEvent {
    /// Base constructor; the `activity_events` helpers below cover the
    /// standard lifecycle shapes.
    pub fn new(
        agent_id: impl Into<String>,
        activity_type: ActivityType,
        severity: ActivitySeverity,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            agent_id: agent_id.into(),
            activity_type,
            severity,
            title: title.into(),
            description: description.into(),
            metadata: HashMap::new(),
            decision: None,
            occurred_at: Utc::now(),
        }
    }

    /// Attach a metadata entry, builder-style.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Incrementally-maintained per-agent aggregates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentActivityStats {
    /// Agent the aggregates describe.
    pub agent_id: String,
    /// Total events ever ingested for the agent.
    pub total_events: u64,
    /// Event counts keyed by activity type wire name.
    pub events_by_type: HashMap<String, u64>,
    /// Event counts keyed by severity wire name.
    pub events_by_severity: HashMap<String, u64>,
    /// Timestamp of the most recent event.
    pub last_seen: Option<DateTime<Utc>>,
}

impl AgentActivityStats {
    /// Fold one event into the aggregates.
    pub fn absorb(&mut self, event: &AgentActivityEvent) {
        self.total_events += 1;
        *self
            .events_by_type
            .entry(event.activity_type.as_str().to_string())
            .or_insert(0) += 1;
        *self
            .events_by_severity
            .entry(event.severity.as_str().to_string())
            .or_insert(0) += 1;
        self.last_seen = Some(match self.last_seen {
            Some(seen) if seen > event.occurred_at => seen,
            _ => event.occurred_at,
        });
    }
}

/// Query / subscription predicate over activity events.
///
/// Populated fields combine with AND; empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityFilter {
    /// Restrict to these agents.
    #[serde(default)]
    pub agent_ids: Vec<String>,
    /// Restrict to these activity types.
    #[serde(default)]
    pub activity_types: Vec<ActivityType>,
    /// Restrict to these severities.
    #[serde(default)]
    pub severities: Vec<ActivitySeverity>,
    /// Only events at or after this time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<DateTime<Utc>>,
    /// Only events at or before this time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<DateTime<Utc>>,
    /// Case-insensitive substring over title and description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_text: Option<String>,
    /// Cap on query results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_results: Option<usize>,
}

impl ActivityFilter {
    /// Whether `event` passes this filter.
    pub fn matches(&self, event: &AgentActivityEvent) -> bool {
        if !self.agent_ids.is_empty() && !self.agent_ids.contains(&event.agent_id) {
            return false;
        }
        if !self.activity_types.is_empty() && !self.activity_types.contains(&event.activity_type) {
            return false;
        }
        if !self.severities.is_empty() && !self.severities.contains(&event.severity) {
            return false;
        }
        if let Some(from) = self.from {
            if event.occurred_at < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if event.occurred_at > to {
                return false;
            }
        }
        if let Some(needle) = &self.search_text {
            let needle = needle.to_lowercase();
            if !event.title.to_lowercase().contains(&needle)
                && !event.description.to_lowercase().contains(&needle)
            {
                return false;
            }
        }
        true
    }
}

//─────────────────────────────
//  Standard event constructors
//─────────────────────────────

/// Helpers producing the standard lifecycle events agents emit.
pub mod activity_events {
    use super::*;

    /// Agent came up.
    pub fn agent_started(agent_id: &str, agent_type: &str) -> AgentActivityEvent {
        AgentActivityEvent::new(
            agent_id,
            ActivityType::AgentStarted,
            ActivitySeverity::Info,
            "Agent Started",
            format!("Agent {agent_id} ({agent_type}) has started successfully"),
        )
    }

    /// Agent went down.
    pub fn agent_stopped(agent_id: &str) -> AgentActivityEvent {
        AgentActivityEvent::new(
            agent_id,
            ActivityType::AgentStopped,
            ActivitySeverity::Info,
            "Agent Stopped",
            format!("Agent {agent_id} has stopped"),
        )
    }

    /// Agent hit an error.
    pub fn agent_error(agent_id: &str, error_msg: &str) -> AgentActivityEvent {
        AgentActivityEvent::new(
            agent_id,
            ActivityType::AgentError,
            ActivitySeverity::Error,
            "Agent Error",
            error_msg,
        )
        .with_metadata("error_message", error_msg)
    }

    /// Agent produced a decision.
    pub fn decision_made(agent_id: &str, decision: serde_json::Value) -> AgentActivityEvent {
        let mut event = AgentActivityEvent::new(
            agent_id,
            ActivityType::DecisionMade,
            ActivitySeverity::Info,
            "Decision Made",
            "Agent made a decision",
        );
        event.decision = Some(decision);
        event
    }

    /// Agent began a task.
    pub fn task_started(agent_id: &str, task_id: &str, event_id: &str) -> AgentActivityEvent {
        AgentActivityEvent::new(
            agent_id,
            ActivityType::TaskStarted,
            ActivitySeverity::Info,
            "Task Started",
            format!("Agent started processing task {task_id} for event {event_id}"),
        )
        .with_metadata("task_id", task_id)
        .with_metadata("event_id", event_id)
    }

    /// Agent finished a task.
    pub fn task_completed(
        agent_id: &str,
        task_id: &str,
        processing_ms: u64,
    ) -> AgentActivityEvent {
        AgentActivityEvent::new(
            agent_id,
            ActivityType::TaskCompleted,
            ActivitySeverity::Info,
            "Task Completed",
            format!("Agent completed task {task_id}"),
        )
        .with_metadata("task_id", task_id)
        .with_metadata("processing_time_ms", processing_ms.to_string())
    }

    /// Agent failed a task.
    pub fn task_failed(agent_id: &str, task_id: &str, error_msg: &str) -> AgentActivityEvent {
        AgentActivityEvent::new(
            agent_id,
            ActivityType::TaskFailed,
            ActivitySeverity::Error,
            "Task Failed",
            format!("Agent failed to process task {task_id}: {error_msg}"),
        )
        .with_metadata("task_id", task_id)
        .with_metadata("error_message", error_msg)
    }

    /// Agent received an external event.
    pub fn event_received(agent_id: &str, event_id: &str, event_type: &str) -> AgentActivityEvent {
        AgentActivityEvent::new(
            agent_id,
            ActivityType::EventReceived,
            ActivitySeverity::Info,
            "Event Received",
            format!("Agent received event {event_id} of type {event_type}"),
        )
        .with_metadata("event_id", event_id)
        .with_metadata("event_type", event_type)
    }

    /// Agent changed state.
    pub fn state_changed(agent_id: &str, old_state: &str, new_state: &str) -> AgentActivityEvent {
        AgentActivityEvent::new(
            agent_id,
            ActivityType::StateChanged,
            ActivitySeverity::Info,
            "State Changed",
            format!("Agent state changed from {old_state} to {new_state}"),
        )
        .with_metadata("old_state", old_state)
        .with_metadata("new_state", new_state)
    }
}
