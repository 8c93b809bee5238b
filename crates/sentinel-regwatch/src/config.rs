//! Subscriber configuration from the `REGULATORY_*` environment variables.

use std::time::Duration;

/// Polling configuration.
#[derive(Debug, Clone)]
pub struct RegwatchConfig {
    /// Base URL of the regulatory monitor service.
    pub monitor_url: String,
    /// Interval between polls.
    pub poll_interval: Duration,
    /// Retained for operator visibility; the failure backoff itself is
    /// derived from the consecutive-failure count.
    pub max_retry_attempts: u32,
    /// Whole-request timeout per poll.
    pub request_timeout: Duration,
    /// Connect timeout per poll.
    pub connect_timeout: Duration,
}

impl RegwatchConfig {
    /// Read `REGULATORY_MONITOR_URL`, `REGULATORY_POLL_INTERVAL_SECONDS`,
    /// and `REGULATORY_MAX_RETRY_ATTEMPTS` with their defaults.
    pub fn from_env() -> Self {
        let var = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());
        Self {
            monitor_url: var("REGULATORY_MONITOR_URL")
                .unwrap_or_else(|| "http://localhost:8081".to_string()),
            poll_interval: Duration::from_secs(
                var("REGULATORY_POLL_INTERVAL_SECONDS")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(30),
            ),
            max_retry_attempts: var("REGULATORY_MAX_RETRY_ATTEMPTS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Configuration pointing at an explicit monitor URL (tests, embedded
    /// deployments).
    pub fn for_monitor(url: impl Into<String>) -> Self {
        Self {
            monitor_url: url.into(),
            ..Self::from_env()
        }
    }
}

/// Backoff applied after `failures` consecutive poll failures:
/// `min(300, 2^(failures-3) · 10)` seconds, and none for the first three.
pub fn failure_backoff(failures: u32) -> Option<Duration> {
    if failures <= 3 {
        return None;
    }
    let exp = failures - 3;
    let seconds = (2u64.saturating_pow(exp.min(10)) * 10).min(300);
    Some(Duration::from_secs(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_starts_after_three_failures() {
        assert_eq!(failure_backoff(1), None);
        assert_eq!(failure_backoff(3), None);
        assert_eq!(failure_backoff(4), Some(Duration::from_secs(20)));
        assert_eq!(failure_backoff(5), Some(Duration::from_secs(40)));
        assert_eq!(failure_backoff(7), Some(Duration::from_secs(160)));
    }

    #[test]
    fn backoff_is_capped_at_five_minutes() {
        assert_eq!(failure_backoff(8), Some(Duration::from_secs(300)));
        assert_eq!(failure_backoff(40), Some(Duration::from_secs(300)));
    }
}
