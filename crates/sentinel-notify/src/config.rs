//! Service tuning and SMTP environment configuration.

use std::time::Duration;

use secrecy::Secret;

/// Notification service tuning knobs.
#[derive(Debug, Clone)]
pub struct NotifyConfig {
    /// Number of delivery worker tasks.
    pub workers: usize,
    /// Retry ceiling; `retry_count` never exceeds it.
    pub max_retry_attempts: u32,
    /// Base delay for exponential backoff.
    pub base_retry_delay: Duration,
    /// How often the retry task polls for due retries.
    pub retry_check_interval: Duration,
    /// Maximum rows reclaimed per retry pass.
    pub retry_batch_limit: usize,
    /// Per-request HTTP timeout.
    pub http_timeout: Duration,
    /// Bounded delivery queue capacity.
    pub queue_capacity: usize,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            max_retry_attempts: 5,
            base_retry_delay: Duration::from_secs(60),
            retry_check_interval: Duration::from_secs(30),
            retry_batch_limit: 10,
            http_timeout: Duration::from_secs(30),
            queue_capacity: 1024,
        }
    }
}

/// SMTP submission settings, read from the `SMTP_*` environment variables.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    /// Mail host.
    pub host: String,
    /// Submission port.
    pub port: u16,
    /// Optional auth user.
    pub user: Option<String>,
    /// Optional auth password.
    pub password: Option<Secret<String>>,
    /// Default From address when a channel does not override it.
    pub from_email: String,
    /// Whether to negotiate TLS.
    pub use_tls: bool,
}

impl SmtpConfig {
    /// Read `SMTP_HOST|PORT|USER|PASSWORD|FROM_EMAIL|USE_TLS` with
    /// conventional defaults.
    pub fn from_env() -> Self {
        let var = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());
        Self {
            host: var("SMTP_HOST").unwrap_or_else(|| "localhost".to_string()),
            port: var("SMTP_PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(587),
            user: var("SMTP_USER"),
            password: var("SMTP_PASSWORD").map(Secret::new),
            from_email: var("SMTP_FROM_EMAIL")
                .unwrap_or_else(|| "alerts@sentinel.local".to_string()),
            use_tls: var("SMTP_USE_TLS")
                .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
                .unwrap_or(true),
        }
    }
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 587,
            user: None,
            password: None,
            from_email: "alerts@sentinel.local".to_string(),
            use_tls: true,
        }
    }
}
