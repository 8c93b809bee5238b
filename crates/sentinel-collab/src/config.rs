//! Configuration from the `COLLABORATION_*` environment variables.

use std::time::Duration;

use crate::CollabError;

/// Caps, timeouts, and toggles for the collaboration manager.
#[derive(Debug, Clone)]
pub struct CollabConfig {
    /// Active sessions a single user may hold.
    pub max_sessions_per_user: usize,
    /// Messages a single session may accumulate.
    pub max_messages_per_session: usize,
    /// Inactivity window after which a session is timed out.
    pub session_timeout: Duration,
    /// Lifetime of an assistance request.
    pub request_timeout: Duration,
    /// Whether sessions, users, and requests are written to the store.
    pub enable_persistence: bool,
    /// Pending assistance requests allowed at once.
    pub max_active_requests: usize,
    /// Whether callers must be registered users authorized for the agent.
    pub require_auth: bool,
    /// Cleanup task cadence.
    pub cleanup_interval: Duration,
}

impl Default for CollabConfig {
    fn default() -> Self {
        Self {
            max_sessions_per_user: 10,
            max_messages_per_session: 1000,
            session_timeout: Duration::from_secs(24 * 60 * 60),
            request_timeout: Duration::from_secs(60 * 60),
            enable_persistence: true,
            max_active_requests: 100,
            require_auth: true,
            cleanup_interval: Duration::from_secs(300),
        }
    }
}

impl CollabConfig {
    /// Read the `COLLABORATION_*` variables with their defaults.
    ///
    /// Fails fast when auth is required but `JWT_SECRET_KEY` is absent or
    /// shorter than 32 characters; the token façade itself lives outside
    /// this crate.
    pub fn from_env() -> Result<Self, CollabError> {
        let var = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());
        let int = |key: &str, default: u64| {
            var(key).and_then(|v| v.parse::<u64>().ok()).unwrap_or(default)
        };
        let flag = |key: &str, default: bool| {
            var(key)
                .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
                .unwrap_or(default)
        };

        let config = Self {
            max_sessions_per_user: int("COLLABORATION_MAX_SESSIONS_PER_USER", 10) as usize,
            max_messages_per_session: int("COLLABORATION_MAX_MESSAGES_PER_SESSION", 1000) as usize,
            session_timeout: Duration::from_secs(
                int("COLLABORATION_SESSION_TIMEOUT_HOURS", 24) * 3600,
            ),
            request_timeout: Duration::from_secs(
                int("COLLABORATION_REQUEST_TIMEOUT_HOURS", 1) * 3600,
            ),
            enable_persistence: flag("COLLABORATION_ENABLE_PERSISTENCE", true),
            max_active_requests: int("COLLABORATION_MAX_ACTIVE_REQUESTS", 100) as usize,
            require_auth: flag("COLLABORATION_REQUIRE_AUTH", true),
            cleanup_interval: Duration::from_secs(300),
        };

        if config.require_auth {
            let secret = var("JWT_SECRET_KEY").unwrap_or_default();
            if secret.len() < 32 {
                return Err(CollabError::InvalidJwtSecret);
            }
        }
        Ok(config)
    }
}
