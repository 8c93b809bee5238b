#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! **sentinel-regwatch** – Regulatory change subscriber for Sentinel.
//!
//! Bridges agents to the upstream regulatory monitor service. A single
//! polling task fetches new changes over HTTP, deduplicates them by change
//! id, and fans each unseen event out to every in-process subscriber whose
//! filter matches, serially and in arrival order.
//!
//! Subscription filters persist across restarts; callbacks cannot, so
//! agents re-register their callback on startup and the persisted filter
//! set is loaded with pending (callback-less) entries until they do.

pub mod config;
pub mod subscriber;

pub use config::RegwatchConfig;
pub use subscriber::{EventCallback, RegulatoryEventSubscriber, SubscriberStats};

/// Errors surfaced by the subscriber.
#[derive(Debug, thiserror::Error)]
pub enum RegwatchError {
    /// The monitor returned a non-200 status.
    #[error("regulatory monitor returned error: {0}")]
    MonitorStatus(u16),
    /// The monitor could not be reached.
    #[error("failed to poll regulatory monitor: {0}")]
    Transport(String),
    /// The subscriber is already running.
    #[error("event subscriber already running")]
    AlreadyRunning,
    /// The persistence store failed.
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}
