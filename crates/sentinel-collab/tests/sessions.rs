//! Session, request, and permission lifecycle tests.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use sentinel_collab::{CollabConfig, CollabError, CollaborationManager};
use sentinel_store::{MemoryStore, SessionStore};
use sentinel_types::{
    AssistanceRequest, HumanUser, SessionMessage, SessionState, UserRole,
};

fn user(user_id: &str, role: UserRole, allowed: &[&str]) -> HumanUser {
    HumanUser {
        user_id: user_id.into(),
        username: user_id.into(),
        email: format!("{user_id}@example.com"),
        role,
        allowed_agents: allowed.iter().map(|a| a.to_string()).collect(),
    }
}

fn message(session_id: Uuid, sender: &str, content: &str) -> SessionMessage {
    SessionMessage {
        message_id: Uuid::new_v4(),
        session_id,
        sender_id: sender.into(),
        content: content.into(),
        sent_at: Utc::now(),
    }
}

fn request(agent_id: &str, ttl_secs: i64) -> AssistanceRequest {
    let now = Utc::now();
    AssistanceRequest {
        request_id: Uuid::new_v4(),
        agent_id: agent_id.into(),
        kind: "approval".into(),
        payload: serde_json::json!({"question": "approve the filing?"}),
        created_at: now,
        expires_at: now + chrono::Duration::seconds(ttl_secs),
    }
}

fn manager(store: &MemoryStore, config: CollabConfig) -> Arc<CollaborationManager> {
    Arc::new(CollaborationManager::new(Arc::new(store.clone()), config))
}

async fn manager_with_operator(store: &MemoryStore, config: CollabConfig) -> Arc<CollaborationManager> {
    let mgr = manager(store, config);
    mgr.register_user(user("alice", UserRole::Operator, &["agent-1"]))
        .await
        .unwrap();
    mgr
}

#[tokio::test]
async fn session_lifecycle_with_messages() {
    let store = MemoryStore::new();
    let mgr = manager_with_operator(&store, CollabConfig::default()).await;

    let session_id = mgr.create_session("alice", "agent-1", "KYC review").await.unwrap();
    mgr.send_message(session_id, message(session_id, "alice", "hello"))
        .await
        .unwrap();
    mgr.send_message(session_id, message(session_id, "agent-1", "hi"))
        .await
        .unwrap();

    let messages = mgr.get_session_messages(session_id, 50).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].content, "hello");

    mgr.end_session(session_id, SessionState::Completed).await.unwrap();

    // Ended sessions leave the active map; sending fails as not-found.
    assert!(matches!(
        mgr.send_message(session_id, message(session_id, "alice", "late"))
            .await,
        Err(CollabError::SessionNotFound(_))
    ));
    // But the persisted snapshot is still loadable.
    let persisted = mgr.get_session(session_id).await.unwrap().unwrap();
    assert_eq!(persisted.state, SessionState::Completed);
    assert_eq!(persisted.messages.len(), 2);
}

#[tokio::test]
async fn create_session_enforces_auth_and_caps() {
    let store = MemoryStore::new();
    let mgr = manager_with_operator(
        &store,
        CollabConfig {
            max_sessions_per_user: 2,
            ..CollabConfig::default()
        },
    )
    .await;

    assert!(matches!(
        mgr.create_session("nobody", "agent-1", "x").await,
        Err(CollabError::UserNotFound(_))
    ));
    assert!(matches!(
        mgr.create_session("alice", "agent-9", "x").await,
        Err(CollabError::NotAuthorizedForAgent { .. })
    ));

    mgr.create_session("alice", "agent-1", "one").await.unwrap();
    mgr.create_session("alice", "agent-1", "two").await.unwrap();
    assert!(matches!(
        mgr.create_session("alice", "agent-1", "three").await,
        Err(CollabError::SessionLimitReached(2))
    ));
}

#[tokio::test]
async fn message_cap_preserves_existing_messages() {
    let store = MemoryStore::new();
    let mgr = manager_with_operator(
        &store,
        CollabConfig {
            max_messages_per_session: 2,
            ..CollabConfig::default()
        },
    )
    .await;

    let session_id = mgr.create_session("alice", "agent-1", "capped").await.unwrap();
    mgr.send_message(session_id, message(session_id, "alice", "one"))
        .await
        .unwrap();
    mgr.send_message(session_id, message(session_id, "alice", "two"))
        .await
        .unwrap();
    assert!(matches!(
        mgr.send_message(session_id, message(session_id, "alice", "three"))
            .await,
        Err(CollabError::MessageLimitReached(2))
    ));

    let messages = mgr.get_session_messages(session_id, 50).await.unwrap();
    assert_eq!(messages.len(), 2);
}

#[tokio::test]
async fn mismatched_session_id_is_rejected() {
    let store = MemoryStore::new();
    let mgr = manager_with_operator(&store, CollabConfig::default()).await;
    let session_id = mgr.create_session("alice", "agent-1", "s").await.unwrap();

    assert!(matches!(
        mgr.send_message(session_id, message(Uuid::new_v4(), "alice", "wrong"))
            .await,
        Err(CollabError::SessionMismatch)
    ));
}

#[tokio::test]
async fn inactive_sessions_time_out() {
    let store = MemoryStore::new();
    let mgr = manager_with_operator(
        &store,
        CollabConfig {
            session_timeout: Duration::from_secs(0),
            ..CollabConfig::default()
        },
    )
    .await;

    let session_id = mgr.create_session("alice", "agent-1", "idle").await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let (timed_out, _) = mgr.cleanup_expired().await;
    assert_eq!(timed_out, 1);

    assert!(matches!(
        mgr.send_message(session_id, message(session_id, "alice", "late"))
            .await,
        Err(CollabError::SessionNotFound(_))
    ));
    let persisted = store.load_session(session_id).await.unwrap().unwrap();
    assert_eq!(persisted.state, SessionState::Timeout);
}

#[tokio::test]
async fn register_user_is_idempotent_on_identical_payload() {
    let store = MemoryStore::new();
    let mgr = manager(&store, CollabConfig::default());
    let alice = user("alice", UserRole::Operator, &["agent-1"]);

    mgr.register_user(alice.clone()).await.unwrap();
    mgr.register_user(alice.clone()).await.unwrap();

    let mut changed = alice;
    changed.role = UserRole::Supervisor;
    assert!(matches!(
        mgr.register_user(changed).await,
        Err(CollabError::UserExists(_))
    ));
}

#[tokio::test]
async fn assistance_requests_expire_and_cap() {
    let store = MemoryStore::new();
    let mgr = manager_with_operator(
        &store,
        CollabConfig {
            max_active_requests: 2,
            ..CollabConfig::default()
        },
    )
    .await;

    let live = request("agent-1", 3600);
    let stale = request("agent-1", -1);
    mgr.create_assistance_request(live.clone()).await.unwrap();
    mgr.create_assistance_request(stale.clone()).await.unwrap();
    assert!(matches!(
        mgr.create_assistance_request(request("agent-1", 3600)).await,
        Err(CollabError::RequestLimitReached(2))
    ));

    // Expired requests disappear as a side effect of listing.
    let pending = mgr.get_pending_requests("agent-1").await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].request_id, live.request_id);
    assert!(matches!(
        mgr.respond_to_request(stale.request_id, serde_json::json!({}), "alice")
            .await,
        Err(CollabError::RequestNotFound(_))
    ));

    // Answering consumes the request.
    mgr.respond_to_request(live.request_id, serde_json::json!({"approved": true}), "alice")
        .await
        .unwrap();
    assert!(mgr.get_pending_requests("agent-1").await.is_empty());
}

#[tokio::test]
async fn responding_to_an_expired_request_fails() {
    let store = MemoryStore::new();
    let mgr = manager_with_operator(&store, CollabConfig::default()).await;
    let stale = request("agent-1", -1);
    mgr.create_assistance_request(stale.clone()).await.unwrap();

    assert!(matches!(
        mgr.respond_to_request(stale.request_id, serde_json::json!({}), "alice")
            .await,
        Err(CollabError::RequestExpired(_))
    ));
}

#[tokio::test]
async fn permission_matrix_and_agent_authorization() {
    let store = MemoryStore::new();
    let mgr = manager(&store, CollabConfig::default());
    mgr.register_user(user("root", UserRole::Administrator, &[]))
        .await
        .unwrap();
    mgr.register_user(user("sup", UserRole::Supervisor, &["agent-1"]))
        .await
        .unwrap();
    mgr.register_user(user("ana", UserRole::Analyst, &["agent-1"]))
        .await
        .unwrap();
    mgr.register_user(user("eye", UserRole::Viewer, &["agent-1"]))
        .await
        .unwrap();

    assert!(mgr.can_user_perform_action("root", "override", Some("any-agent")).await);
    assert!(mgr.can_user_perform_action("sup", "intervene", Some("agent-1")).await);
    assert!(!mgr.can_user_perform_action("sup", "intervene", Some("agent-2")).await);
    assert!(!mgr.can_user_perform_action("sup", "approve", None).await);
    assert!(mgr.can_user_perform_action("ana", "query", None).await);
    assert!(!mgr.can_user_perform_action("ana", "chat", None).await);
    assert!(mgr.can_user_perform_action("eye", "view", None).await);
    assert!(!mgr.can_user_perform_action("eye", "feedback", None).await);
    assert!(!mgr.can_user_perform_action("ghost", "view", None).await);
}

#[tokio::test]
async fn shutdown_cancels_active_sessions() {
    let store = MemoryStore::new();
    let mgr = manager_with_operator(&store, CollabConfig::default()).await;
    let session_id = mgr.create_session("alice", "agent-1", "open").await.unwrap();

    mgr.shutdown().await;

    let persisted = store.load_session(session_id).await.unwrap().unwrap();
    assert_eq!(persisted.state, SessionState::Cancelled);
}

#[tokio::test]
async fn stats_reflect_live_state() {
    let store = MemoryStore::new();
    let mgr = manager_with_operator(&store, CollabConfig::default()).await;
    let session_id = mgr.create_session("alice", "agent-1", "s").await.unwrap();
    mgr.send_message(session_id, message(session_id, "alice", "hi"))
        .await
        .unwrap();
    mgr.create_assistance_request(request("agent-1", 3600))
        .await
        .unwrap();

    let stats = mgr.collaboration_stats().await;
    assert_eq!(stats.active_sessions, 1);
    assert_eq!(stats.pending_requests, 1);
    assert_eq!(stats.registered_users, 1);
    assert_eq!(stats.sessions_by_state["active"], 1);

    let user_stats = mgr.user_stats("alice").await;
    assert_eq!(user_stats.active_sessions, 1);
    assert_eq!(user_stats.total_messages, 1);

    let export = mgr.export_sessions(Some("alice")).await;
    assert!(export.contains(&session_id.to_string()));
}
