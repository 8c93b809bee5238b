//! The collaboration manager.
//!
//! Lock order is fixed throughout: sessions, then users, then requests.
//! No lock is held across a store round trip except where the snapshot
//! being persisted must stay consistent with the map.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use sentinel_store::SessionStore;
use sentinel_types::{
    AssistanceRequest, CollabAction, CollaborationSession, HumanUser, SessionFeedback,
    SessionIntervention, SessionMessage, SessionState,
};

use crate::{CollabConfig, CollabError};

/// System-wide collaboration aggregates.
#[derive(Debug, Clone, Default)]
pub struct CollaborationStats {
    /// Sessions currently in the active map.
    pub active_sessions: usize,
    /// Pending assistance requests.
    pub pending_requests: usize,
    /// Registered users.
    pub registered_users: usize,
    /// Session counts by state wire name.
    pub sessions_by_state: HashMap<String, usize>,
}

/// Per-user aggregates.
#[derive(Debug, Clone, Default)]
pub struct UserStats {
    /// User the aggregates describe.
    pub user_id: String,
    /// Sessions currently active for the user.
    pub active_sessions: usize,
    /// Messages across the user's live sessions.
    pub total_messages: usize,
    /// Feedback entries across the user's live sessions.
    pub total_feedback: usize,
}

/// Manages sessions, users, assistance requests, and permissions.
pub struct CollaborationManager {
    config: CollabConfig,
    store: Arc<dyn SessionStore>,
    sessions: Mutex<HashMap<Uuid, CollaborationSession>>,
    users: Mutex<HashMap<String, HumanUser>>,
    requests: Mutex<HashMap<Uuid, AssistanceRequest>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl CollaborationManager {
    /// Build a manager over the given store.
    pub fn new(store: Arc<dyn SessionStore>, config: CollabConfig) -> Self {
        info!(
            max_sessions = config.max_sessions_per_user,
            require_auth = config.require_auth,
            "collaboration manager initialized"
        );
        Self {
            config,
            store,
            sessions: Mutex::new(HashMap::new()),
            users: Mutex::new(HashMap::new()),
            requests: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Start the background cleanup task.
    pub async fn start(self: &Arc<Self>) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            warn!("collaboration cleanup task already running");
            return;
        }
        let this = Arc::clone(self);
        let cancel = self.cancel.clone();
        let interval = self.config.cleanup_interval;
        *task = Some(tokio::spawn(async move {
            debug!("collaboration cleanup task started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                let (timed_out, expired) = this.cleanup_expired().await;
                if timed_out > 0 || expired > 0 {
                    info!(timed_out, expired, "collaboration cleanup pass");
                }
            }
            debug!("collaboration cleanup task ended");
        }));
        info!("collaboration manager started");
    }

    /// Stop the cleanup task and cancel all remaining active sessions.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(task) = self.task.lock().await.take() {
            let _ = task.await;
        }

        let drained: Vec<CollaborationSession> = {
            let mut sessions = self.sessions.lock().await;
            sessions
                .drain()
                .map(|(_, mut session)| {
                    session.complete(SessionState::Cancelled);
                    session
                })
                .collect()
        };
        for session in &drained {
            self.persist_session(session).await;
        }
        info!("collaboration manager shutdown complete");
    }

    //─────────────────────────────
    //  User registry
    //─────────────────────────────

    /// Register a user. Idempotent on an identical payload; a different
    /// payload under the same id is rejected.
    pub async fn register_user(&self, user: HumanUser) -> Result<(), CollabError> {
        {
            let mut users = self.users.lock().await;
            match users.get(&user.user_id) {
                Some(existing) if *existing == user => return Ok(()),
                Some(_) => return Err(CollabError::UserExists(user.user_id.clone())),
                None => {
                    users.insert(user.user_id.clone(), user.clone());
                }
            }
        }
        if self.config.enable_persistence {
            self.store.persist_user(&user).await?;
        }
        info!(user = %user.user_id, "registered human user");
        Ok(())
    }

    /// Look a user up, falling back to the store when persistence is on.
    pub async fn get_user(&self, user_id: &str) -> Result<Option<HumanUser>, CollabError> {
        if let Some(user) = self.users.lock().await.get(user_id) {
            return Ok(Some(user.clone()));
        }
        if self.config.enable_persistence {
            if let Some(user) = self.store.load_user(user_id).await? {
                self.users
                    .lock()
                    .await
                    .insert(user.user_id.clone(), user.clone());
                return Ok(Some(user));
            }
        }
        Ok(None)
    }

    /// Replace an existing user's details.
    pub async fn update_user(&self, user: HumanUser) -> Result<(), CollabError> {
        {
            let mut users = self.users.lock().await;
            if !users.contains_key(&user.user_id) {
                return Err(CollabError::UserNotFound(user.user_id.clone()));
            }
            users.insert(user.user_id.clone(), user.clone());
        }
        if self.config.enable_persistence {
            self.store.persist_user(&user).await?;
        }
        Ok(())
    }

    /// Role matrix plus per-agent authorization.
    pub async fn can_user_perform_action(
        &self,
        user_id: &str,
        action: &str,
        agent_id: Option<&str>,
    ) -> bool {
        let Ok(Some(user)) = self.get_user(user_id).await else {
            return false;
        };
        let Ok(action) = CollabAction::parse(action) else {
            return false;
        };
        if !user.role.permits(action) {
            return false;
        }
        match agent_id {
            Some(agent) => user.can_interact_with_agent(agent),
            None => true,
        }
    }

    //─────────────────────────────
    //  Sessions
    //─────────────────────────────

    /// Open a session between a user and an agent.
    pub async fn create_session(
        &self,
        user_id: &str,
        agent_id: &str,
        title: &str,
    ) -> Result<Uuid, CollabError> {
        if self.config.require_auth {
            let user = self
                .get_user(user_id)
                .await?
                .ok_or_else(|| CollabError::UserNotFound(user_id.to_string()))?;
            if !user.can_interact_with_agent(agent_id) {
                return Err(CollabError::NotAuthorizedForAgent {
                    user: user_id.to_string(),
                    agent: agent_id.to_string(),
                });
            }
        }

        let session = {
            let mut sessions = self.sessions.lock().await;
            let active_for_user = sessions
                .values()
                .filter(|s| s.user_id == user_id && s.state == SessionState::Active)
                .count();
            if active_for_user >= self.config.max_sessions_per_user {
                return Err(CollabError::SessionLimitReached(
                    self.config.max_sessions_per_user,
                ));
            }
            let session = CollaborationSession::new(user_id, agent_id, title);
            sessions.insert(session.session_id, session.clone());
            session
        };
        self.persist_session(&session).await;

        info!(session = %session.session_id, user = user_id, agent = agent_id, "created collaboration session");
        Ok(session.session_id)
    }

    /// Look a session up, falling back to persisted snapshots for ended
    /// sessions.
    pub async fn get_session(
        &self,
        session_id: Uuid,
    ) -> Result<Option<CollaborationSession>, CollabError> {
        if let Some(session) = self.sessions.lock().await.get(&session_id) {
            return Ok(Some(session.clone()));
        }
        if self.config.enable_persistence {
            return Ok(self.store.load_session(session_id).await?);
        }
        Ok(None)
    }

    /// All live sessions belonging to a user.
    pub async fn get_user_sessions(&self, user_id: &str) -> Vec<CollaborationSession> {
        self.sessions
            .lock()
            .await
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect()
    }

    /// End a session. It leaves the active map but stays loadable from the
    /// store when persistence is on.
    pub async fn end_session(
        &self,
        session_id: Uuid,
        final_state: SessionState,
    ) -> Result<(), CollabError> {
        let session = {
            let mut sessions = self.sessions.lock().await;
            let mut session = sessions
                .remove(&session_id)
                .ok_or(CollabError::SessionNotFound(session_id))?;
            session.complete(final_state);
            session
        };
        self.persist_session(&session).await;
        info!(session = %session_id, state = final_state.as_str(), "ended collaboration session");
        Ok(())
    }

    /// Append a message to a session.
    pub async fn send_message(
        &self,
        session_id: Uuid,
        message: SessionMessage,
    ) -> Result<(), CollabError> {
        let snapshot = {
            let mut sessions = self.sessions.lock().await;
            let session = sessions
                .get_mut(&session_id)
                .ok_or(CollabError::SessionNotFound(session_id))?;
            if message.session_id != session_id {
                return Err(CollabError::SessionMismatch);
            }
            if session.state.is_terminal() {
                return Err(CollabError::SessionClosed(session_id));
            }
            if session.messages.len() >= self.config.max_messages_per_session {
                return Err(CollabError::MessageLimitReached(
                    self.config.max_messages_per_session,
                ));
            }
            debug!(session = %session_id, sender = %message.sender_id, "added session message");
            session.messages.push(message);
            session.touch();
            session.clone()
        };
        self.persist_session(&snapshot).await;
        Ok(())
    }

    /// The last `limit` messages of a session, oldest first.
    pub async fn get_session_messages(
        &self,
        session_id: Uuid,
        limit: usize,
    ) -> Result<Vec<SessionMessage>, CollabError> {
        let session = self
            .get_session(session_id)
            .await?
            .ok_or(CollabError::SessionNotFound(session_id))?;
        let skip = session.messages.len().saturating_sub(limit);
        Ok(session.messages[skip..].to_vec())
    }

    /// Record operator feedback on an agent decision.
    pub async fn submit_feedback(&self, feedback: SessionFeedback) -> Result<(), CollabError> {
        let snapshot = {
            let mut sessions = self.sessions.lock().await;
            let session = sessions
                .get_mut(&feedback.session_id)
                .ok_or(CollabError::SessionNotFound(feedback.session_id))?;
            info!(session = %feedback.session_id, agent = %feedback.agent_id,
                  decision = %feedback.decision_id, "submitted feedback");
            session.feedback.push(feedback);
            session.touch();
            session.clone()
        };
        self.persist_session(&snapshot).await;
        Ok(())
    }

    /// Feedback history for a session.
    pub async fn get_session_feedback(
        &self,
        session_id: Uuid,
    ) -> Result<Vec<SessionFeedback>, CollabError> {
        Ok(self
            .get_session(session_id)
            .await?
            .ok_or(CollabError::SessionNotFound(session_id))?
            .feedback)
    }

    /// Record a human intervention on a running agent.
    pub async fn record_intervention(
        &self,
        intervention: SessionIntervention,
    ) -> Result<(), CollabError> {
        let snapshot = {
            let mut sessions = self.sessions.lock().await;
            let session = sessions
                .get_mut(&intervention.session_id)
                .ok_or(CollabError::SessionNotFound(intervention.session_id))?;
            info!(session = %intervention.session_id, agent = %intervention.agent_id,
                  reason = %intervention.reason, "recorded intervention");
            session.interventions.push(intervention);
            session.touch();
            session.clone()
        };
        self.persist_session(&snapshot).await;
        Ok(())
    }

    /// Intervention history for a session.
    pub async fn get_session_interventions(
        &self,
        session_id: Uuid,
    ) -> Result<Vec<SessionIntervention>, CollabError> {
        Ok(self
            .get_session(session_id)
            .await?
            .ok_or(CollabError::SessionNotFound(session_id))?
            .interventions)
    }

    //─────────────────────────────
    //  Assistance requests
    //─────────────────────────────

    /// Raise an assistance request on behalf of an agent.
    pub async fn create_assistance_request(
        &self,
        request: AssistanceRequest,
    ) -> Result<Uuid, CollabError> {
        {
            let mut requests = self.requests.lock().await;
            if requests.len() >= self.config.max_active_requests {
                return Err(CollabError::RequestLimitReached(
                    self.config.max_active_requests,
                ));
            }
            requests.insert(request.request_id, request.clone());
        }
        if self.config.enable_persistence {
            self.store.persist_request(&request).await?;
        }
        info!(request = %request.request_id, agent = %request.agent_id, "created assistance request");
        Ok(request.request_id)
    }

    /// Non-expired requests for an agent; expired ones are removed as a
    /// side effect.
    pub async fn get_pending_requests(&self, agent_id: &str) -> Vec<AssistanceRequest> {
        let now = Utc::now();
        let (pending, expired) = {
            let mut requests = self.requests.lock().await;
            let expired: Vec<Uuid> = requests
                .values()
                .filter(|r| r.agent_id == agent_id && r.is_expired(now))
                .map(|r| r.request_id)
                .collect();
            for request_id in &expired {
                requests.remove(request_id);
            }
            let pending = requests
                .values()
                .filter(|r| r.agent_id == agent_id)
                .cloned()
                .collect();
            (pending, expired)
        };
        for request_id in expired {
            debug!(request = %request_id, "dropped expired assistance request");
            self.delete_persisted_request(request_id).await;
        }
        pending
    }

    /// Answer a request; it is consumed on success and dropped when it
    /// turns out to be expired.
    pub async fn respond_to_request(
        &self,
        request_id: Uuid,
        response: serde_json::Value,
        user_id: &str,
    ) -> Result<AssistanceRequest, CollabError> {
        let request = {
            let mut requests = self.requests.lock().await;
            let request = requests
                .get(&request_id)
                .ok_or(CollabError::RequestNotFound(request_id))?
                .clone();
            if request.is_expired(Utc::now()) {
                requests.remove(&request_id);
                drop(requests);
                self.delete_persisted_request(request_id).await;
                return Err(CollabError::RequestExpired(request_id));
            }
            requests.remove(&request_id);
            request
        };
        self.delete_persisted_request(request_id).await;
        info!(request = %request_id, user = user_id, kind = %request.kind,
              response = %response, "assistance request answered");
        Ok(request)
    }

    //─────────────────────────────
    //  Cleanup and statistics
    //─────────────────────────────

    /// Time out inactive sessions and drop expired requests. Returns
    /// `(sessions_timed_out, requests_expired)`.
    pub async fn cleanup_expired(&self) -> (usize, usize) {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.session_timeout)
                .unwrap_or_else(|_| chrono::Duration::hours(24));

        let timed_out: Vec<CollaborationSession> = {
            let mut sessions = self.sessions.lock().await;
            let stale: Vec<Uuid> = sessions
                .values()
                .filter(|s| s.last_activity < cutoff)
                .map(|s| s.session_id)
                .collect();
            stale
                .into_iter()
                .filter_map(|id| sessions.remove(&id))
                .map(|mut session| {
                    info!(session = %session.session_id, "session timed out");
                    session.complete(SessionState::Timeout);
                    session
                })
                .collect()
        };
        for session in &timed_out {
            self.persist_session(session).await;
        }

        let now = Utc::now();
        let expired: Vec<Uuid> = {
            let mut requests = self.requests.lock().await;
            let expired: Vec<Uuid> = requests
                .values()
                .filter(|r| r.is_expired(now))
                .map(|r| r.request_id)
                .collect();
            for request_id in &expired {
                requests.remove(request_id);
            }
            expired
        };
        for request_id in &expired {
            self.delete_persisted_request(*request_id).await;
        }

        (timed_out.len(), expired.len())
    }

    /// System-wide aggregates.
    pub async fn collaboration_stats(&self) -> CollaborationStats {
        let sessions = self.sessions.lock().await;
        let users = self.users.lock().await;
        let requests = self.requests.lock().await;

        let mut by_state: HashMap<String, usize> = HashMap::new();
        for session in sessions.values() {
            *by_state.entry(session.state.as_str().to_string()).or_insert(0) += 1;
        }
        CollaborationStats {
            active_sessions: sessions.len(),
            pending_requests: requests.len(),
            registered_users: users.len(),
            sessions_by_state: by_state,
        }
    }

    /// Per-user aggregates over live sessions.
    pub async fn user_stats(&self, user_id: &str) -> UserStats {
        let sessions = self.sessions.lock().await;
        let mut stats = UserStats {
            user_id: user_id.to_string(),
            ..Default::default()
        };
        for session in sessions.values().filter(|s| s.user_id == user_id) {
            if session.state == SessionState::Active {
                stats.active_sessions += 1;
            }
            stats.total_messages += session.messages.len();
            stats.total_feedback += session.feedback.len();
        }
        stats
    }

    /// Export live sessions (optionally for one user) as pretty JSON.
    pub async fn export_sessions(&self, user_id: Option<&str>) -> String {
        let sessions = self.sessions.lock().await;
        let selected: Vec<&CollaborationSession> = sessions
            .values()
            .filter(|s| user_id.map_or(true, |u| s.user_id == u))
            .collect();
        serde_json::to_string_pretty(&selected).unwrap_or_else(|_| "[]".to_string())
    }

    async fn persist_session(&self, session: &CollaborationSession) {
        if !self.config.enable_persistence {
            return;
        }
        if let Err(e) = self.store.persist_session(session).await {
            error!(session = %session.session_id, error = %e, "failed to persist session");
        }
    }

    async fn delete_persisted_request(&self, request_id: Uuid) {
        if !self.config.enable_persistence {
            return;
        }
        if let Err(e) = self.store.delete_request(request_id).await {
            error!(request = %request_id, error = %e, "failed to delete persisted request");
        }
    }
}
