#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! **sentinel-collab** – Human↔agent collaboration for Sentinel.
//!
//! Maintains user↔agent chat sessions with message, feedback, and
//! intervention history; agent assistance requests with TTLs; a user
//! registry; and the role-based permission matrix. A background task
//! times out inactive sessions and drops expired requests.
//!
//! All caps and timeouts come from the `COLLABORATION_*` environment
//! variables. Terminal sessions never accept new messages, and resource
//! caps reject new work without evicting existing state.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sentinel_collab::{CollabConfig, CollaborationManager};
//! use sentinel_store::MemoryStore;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let manager = Arc::new(CollaborationManager::new(
//!     Arc::new(MemoryStore::new()),
//!     CollabConfig::default(),
//! ));
//! manager.start().await;
//!
//! // ... register users, open sessions, answer assistance requests ...
//!
//! manager.shutdown().await;
//! # }
//! ```

use uuid::Uuid;

pub mod config;
pub mod manager;

pub use config::CollabConfig;
pub use manager::{CollaborationManager, CollaborationStats, UserStats};

/// Errors surfaced by collaboration operations.
#[derive(Debug, thiserror::Error)]
pub enum CollabError {
    /// Unknown user id.
    #[error("user not found: {0}")]
    UserNotFound(String),
    /// A user with this id already exists with a different payload.
    #[error("user already exists: {0}")]
    UserExists(String),
    /// The user is not authorized for the target agent.
    #[error("user {user} is not authorized for agent {agent}")]
    NotAuthorizedForAgent {
        /// User attempting the action.
        user: String,
        /// Target agent.
        agent: String,
    },
    /// The user has reached the per-user session cap.
    #[error("user has reached the maximum of {0} active sessions")]
    SessionLimitReached(usize),
    /// Unknown or already-ended session.
    #[error("session not found: {0}")]
    SessionNotFound(Uuid),
    /// The session is in a terminal state.
    #[error("session {0} is closed")]
    SessionClosed(Uuid),
    /// The message's session id does not match the addressed session.
    #[error("session id mismatch")]
    SessionMismatch,
    /// The session has reached its message cap.
    #[error("session has reached the maximum of {0} messages")]
    MessageLimitReached(usize),
    /// Unknown assistance request.
    #[error("assistance request not found: {0}")]
    RequestNotFound(Uuid),
    /// The assistance request expired before a response arrived.
    #[error("assistance request has expired: {0}")]
    RequestExpired(Uuid),
    /// The pending-request cap is reached.
    #[error("maximum of {0} active assistance requests reached")]
    RequestLimitReached(usize),
    /// `JWT_SECRET_KEY` is missing or too short while auth is required.
    #[error("JWT_SECRET_KEY must be set to at least 32 characters when COLLABORATION_REQUIRE_AUTH is enabled")]
    InvalidJwtSecret,
    /// The persistence store failed.
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}
