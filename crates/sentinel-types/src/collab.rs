//! Collaboration sessions, assistance requests, users, and permissions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ParseEnumError;

//─────────────────────────────
//  Enumerations
//─────────────────────────────

/// Lifecycle state of a collaboration session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Open for messages.
    Active,
    /// Temporarily suspended by the user.
    Paused,
    /// Ended normally.
    Completed,
    /// Ended by the user or at shutdown.
    Cancelled,
    /// Ended by the inactivity cleanup task.
    Timeout,
}

impl SessionState {
    /// Wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Active => "active",
            SessionState::Paused => "paused",
            SessionState::Completed => "completed",
            SessionState::Cancelled => "cancelled",
            SessionState::Timeout => "timeout",
        }
    }

    /// Terminal sessions never receive new messages.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Cancelled | SessionState::Timeout
        )
    }
}

/// Role of a registered human user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    /// Full access.
    Administrator,
    /// Can override, intervene, give feedback, query, chat.
    Supervisor,
    /// Can give feedback, approve, reject, chat.
    Operator,
    /// Can query and view.
    Analyst,
    /// Read-only.
    Viewer,
}

impl UserRole {
    /// Parse the wire representation.
    pub fn parse(s: &str) -> Result<Self, ParseEnumError> {
        match s {
            "administrator" => Ok(UserRole::Administrator),
            "supervisor" => Ok(UserRole::Supervisor),
            "operator" => Ok(UserRole::Operator),
            "analyst" => Ok(UserRole::Analyst),
            "viewer" => Ok(UserRole::Viewer),
            other => Err(ParseEnumError::new("user role", other)),
        }
    }

    /// Role-based permission check; agent authorization is layered on top
    /// by the session manager.
    pub fn permits(&self, action: CollabAction) -> bool {
        use CollabAction::*;
        match self {
            UserRole::Administrator => true,
            UserRole::Supervisor => {
                matches!(action, Override | Intervene | Feedback | Query | Chat)
            }
            UserRole::Operator => matches!(action, Feedback | Approve | Reject | Chat),
            UserRole::Analyst => matches!(action, Query | View),
            UserRole::Viewer => matches!(action, View),
        }
    }
}

/// Actions governed by the role matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollabAction {
    /// Override an agent decision.
    Override,
    /// Intervene in a running agent.
    Intervene,
    /// Submit feedback on a decision.
    Feedback,
    /// Approve an assistance request.
    Approve,
    /// Reject an assistance request.
    Reject,
    /// Query agent state.
    Query,
    /// Exchange messages in a session.
    Chat,
    /// Read-only access.
    View,
}

impl CollabAction {
    /// Parse the wire representation used by permission checks.
    pub fn parse(s: &str) -> Result<Self, ParseEnumError> {
        match s {
            "override" => Ok(CollabAction::Override),
            "intervene" => Ok(CollabAction::Intervene),
            "feedback" => Ok(CollabAction::Feedback),
            "approve" => Ok(CollabAction::Approve),
            "reject" => Ok(CollabAction::Reject),
            "query" => Ok(CollabAction::Query),
            "chat" => Ok(CollabAction::Chat),
            "view" => Ok(CollabAction::View),
            other => Err(ParseEnumError::new("collaboration action", other)),
        }
    }
}

//─────────────────────────────
//  Entities
//─────────────────────────────

/// A registered human user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanUser {
    /// Stable identifier.
    pub user_id: String,
    /// Display name.
    pub username: String,
    /// Contact address.
    pub email: String,
    /// Role driving the permission matrix.
    pub role: UserRole,
    /// Agents this user may interact with. Administrators are authorized
    /// for every agent regardless of this list.
    pub allowed_agents: Vec<String>,
}

impl HumanUser {
    /// Whether the user may interact with `agent_id`.
    pub fn can_interact_with_agent(&self, agent_id: &str) -> bool {
        self.role == UserRole::Administrator || self.allowed_agents.iter().any(|a| a == agent_id)
    }
}

/// One chat message inside a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMessage {
    /// Stable identifier.
    pub message_id: Uuid,
    /// Session the message belongs to; must match the addressed session.
    pub session_id: Uuid,
    /// User or agent id of the sender.
    pub sender_id: String,
    /// Message body.
    pub content: String,
    /// When the message was sent.
    pub sent_at: DateTime<Utc>,
}

/// Operator feedback on an agent decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionFeedback {
    /// Stable identifier.
    pub feedback_id: Uuid,
    /// Session the feedback belongs to.
    pub session_id: Uuid,
    /// Agent whose decision is rated.
    pub agent_id: String,
    /// Decision being rated.
    pub decision_id: String,
    /// Score, positive is good.
    pub score: i32,
    /// Free-form comment.
    pub comment: String,
    /// User who submitted.
    pub submitted_by: String,
    /// Submission time.
    pub submitted_at: DateTime<Utc>,
}

/// A human intervention in a running agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionIntervention {
    /// Stable identifier.
    pub intervention_id: Uuid,
    /// Session the intervention belongs to.
    pub session_id: Uuid,
    /// Agent intervened upon.
    pub agent_id: String,
    /// What was done (`pause`, `override_decision`, …).
    pub action: String,
    /// Why.
    pub reason: String,
    /// User who intervened.
    pub performed_by: String,
    /// When.
    pub performed_at: DateTime<Utc>,
}

/// A stateful user↔agent conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollaborationSession {
    /// Stable identifier.
    pub session_id: Uuid,
    /// Owning user.
    pub user_id: String,
    /// Counterpart agent.
    pub agent_id: String,
    /// Display title.
    pub title: String,
    /// Lifecycle state.
    pub state: SessionState,
    /// Message history, oldest first.
    pub messages: Vec<SessionMessage>,
    /// Feedback history.
    pub feedback: Vec<SessionFeedback>,
    /// Intervention history.
    pub interventions: Vec<SessionIntervention>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last message/feedback/intervention time; never before `created_at`.
    pub last_activity: DateTime<Utc>,
}

impl CollaborationSession {
    /// Open a fresh active session.
    pub fn new(user_id: impl Into<String>, agent_id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4(),
            user_id: user_id.into(),
            agent_id: agent_id.into(),
            title: title.into(),
            state: SessionState::Active,
            messages: Vec::new(),
            feedback: Vec::new(),
            interventions: Vec::new(),
            created_at: now,
            last_activity: now,
        }
    }

    /// Record activity now.
    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    /// Move to a terminal state.
    pub fn complete(&mut self, final_state: SessionState) {
        self.state = final_state;
        self.touch();
    }
}

/// A short-lived, operator-answerable question raised by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistanceRequest {
    /// Stable identifier.
    pub request_id: Uuid,
    /// Agent asking for help.
    pub agent_id: String,
    /// Kind of help wanted (`approval`, `clarification`, `guidance`, …).
    pub kind: String,
    /// Request context shown to the operator.
    pub payload: serde_json::Value,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Hard expiry; expired requests are dropped unanswered.
    pub expires_at: DateTime<Utc>,
}

impl AssistanceRequest {
    /// Whether the request has expired as of `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}
