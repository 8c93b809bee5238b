#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! **sentinel-feed** – Real-time agent activity feed for Sentinel.
//!
//! Collects agent lifecycle and decision events into a bounded per-agent
//! ring (oldest-first eviction), maintains incremental per-agent
//! aggregates, streams matching events to subscribers in ingest order, and
//! answers filtered queries and exports. A background task evicts events
//! past the retention window.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

pub mod export;
pub mod feed;

pub use export::{to_csv, to_json, to_xml};
pub use feed::{ActivityCallback, AgentActivityFeed, FeedConfig};

/// Errors surfaced by the activity feed.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// Unknown subscription id.
    #[error("unknown activity subscription: {0}")]
    UnknownSubscription(Uuid),
    /// Unknown export format name.
    #[error(transparent)]
    Format(#[from] sentinel_types::ParseEnumError),
}

/// Feed-wide aggregate view.
#[derive(Debug, Clone, Default)]
pub struct FeedStats {
    /// Events currently retained across all rings.
    pub retained_events: usize,
    /// Events ever ingested.
    pub total_events: u64,
    /// Agents with at least one event.
    pub total_agents: usize,
    /// Ingested counts per activity type.
    pub events_by_type: HashMap<String, u64>,
    /// Ingested counts per severity.
    pub events_by_severity: HashMap<String, u64>,
    /// Live subscriptions.
    pub active_subscriptions: usize,
    /// Most recent event time.
    pub last_event_at: Option<DateTime<Utc>>,
}
