//! Feed storage, subscriptions, and the eviction task.

use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use sentinel_types::{ActivityFilter, AgentActivityEvent, AgentActivityStats, ExportFormat};

use crate::{export, FeedError, FeedStats};

/// Callback receiving each matching event in the recorder's task.
pub type ActivityCallback = Arc<dyn Fn(&AgentActivityEvent) + Send + Sync>;

/// Feed bounds and eviction cadence.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Ring bound per agent; inserting past it evicts the oldest event.
    pub max_events_per_agent: usize,
    /// Events older than this are pruned by the eviction task.
    pub retention: Duration,
    /// How often the eviction task runs.
    pub cleanup_interval: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            max_events_per_agent: 1000,
            retention: Duration::from_secs(24 * 60 * 60),
            cleanup_interval: Duration::from_secs(60 * 60),
        }
    }
}

struct Subscription {
    filter: ActivityFilter,
    callback: ActivityCallback,
}

#[derive(Default)]
struct State {
    activities: HashMap<String, VecDeque<AgentActivityEvent>>,
    stats: HashMap<String, AgentActivityStats>,
    subscriptions: HashMap<Uuid, Subscription>,
}

/// Collects, stores, streams, and queries agent activity.
pub struct AgentActivityFeed {
    config: FeedConfig,
    state: Arc<Mutex<State>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl AgentActivityFeed {
    /// Build a feed with the given bounds.
    pub fn new(config: FeedConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(State::default())),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Start the background eviction task.
    pub async fn start(self: &Arc<Self>) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            warn!("activity feed cleanup task already running");
            return;
        }
        let this = Arc::clone(self);
        let cancel = self.cancel.clone();
        let interval = self.config.cleanup_interval;
        *task = Some(tokio::spawn(async move {
            debug!("activity feed cleanup task started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                let removed = this.cleanup_old_activities().await;
                if removed > 0 {
                    debug!(removed, "evicted aged activity events");
                }
            }
            debug!("activity feed cleanup task ended");
        }));
        info!("activity feed started");
    }

    /// Join the eviction task. Ingest stays available to late writers
    /// until the feed itself is dropped.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(task) = self.task.lock().await.take() {
            let _ = task.await;
        }
        info!("activity feed shutdown complete");
    }

    /// Append an event, update the agent's aggregates, and notify matching
    /// subscribers in ingest order. Subscriber panics are isolated.
    pub async fn record_activity(&self, event: AgentActivityEvent) {
        let mut state = self.state.lock().await;

        let ring = state
            .activities
            .entry(event.agent_id.clone())
            .or_default();
        if ring.len() >= self.config.max_events_per_agent {
            ring.pop_front();
        }
        ring.push_back(event.clone());

        state
            .stats
            .entry(event.agent_id.clone())
            .or_insert_with(|| AgentActivityStats {
                agent_id: event.agent_id.clone(),
                ..Default::default()
            })
            .absorb(&event);

        for (sub_id, subscription) in &state.subscriptions {
            if !subscription.filter.matches(&event) {
                continue;
            }
            let callback = &subscription.callback;
            if std::panic::catch_unwind(AssertUnwindSafe(|| callback(&event))).is_err() {
                error!(subscription = %sub_id, "activity subscriber callback panicked");
            }
        }
    }

    /// Register a live subscription; returns its id for unsubscribe.
    pub async fn subscribe(&self, filter: ActivityFilter, callback: ActivityCallback) -> Uuid {
        let sub_id = Uuid::new_v4();
        self.state
            .lock()
            .await
            .subscriptions
            .insert(sub_id, Subscription { filter, callback });
        debug!(subscription = %sub_id, "activity subscription registered");
        sub_id
    }

    /// Drop a subscription.
    pub async fn unsubscribe(&self, sub_id: Uuid) -> Result<(), FeedError> {
        match self.state.lock().await.subscriptions.remove(&sub_id) {
            Some(_) => Ok(()),
            None => Err(FeedError::UnknownSubscription(sub_id)),
        }
    }

    /// Snapshot of matching events, newest first, capped by the filter's
    /// `max_results`.
    pub async fn query_activities(&self, filter: &ActivityFilter) -> Vec<AgentActivityEvent> {
        let state = self.state.lock().await;
        let mut matched: Vec<AgentActivityEvent> = state
            .activities
            .values()
            .flatten()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
        if let Some(cap) = filter.max_results {
            matched.truncate(cap);
        }
        matched
    }

    /// Aggregates for one agent.
    pub async fn get_agent_stats(&self, agent_id: &str) -> Option<AgentActivityStats> {
        self.state.lock().await.stats.get(agent_id).cloned()
    }

    /// Feed-wide aggregates.
    pub async fn feed_stats(&self) -> FeedStats {
        let state = self.state.lock().await;
        let mut stats = FeedStats {
            retained_events: state.activities.values().map(|r| r.len()).sum(),
            total_agents: state.stats.len(),
            active_subscriptions: state.subscriptions.len(),
            ..Default::default()
        };
        for agent in state.stats.values() {
            stats.total_events += agent.total_events;
            for (kind, count) in &agent.events_by_type {
                *stats.events_by_type.entry(kind.clone()).or_insert(0) += count;
            }
            for (severity, count) in &agent.events_by_severity {
                *stats.events_by_severity.entry(severity.clone()).or_insert(0) += count;
            }
            stats.last_event_at = match (stats.last_event_at, agent.last_seen) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            };
        }
        stats
    }

    /// Export matching events in the named format (`json`, `csv`, `xml`).
    pub async fn export_activities(
        &self,
        filter: &ActivityFilter,
        format: &str,
    ) -> Result<String, FeedError> {
        let format = ExportFormat::parse(format)?;
        let events = self.query_activities(filter).await;
        Ok(match format {
            ExportFormat::Json => export::to_json(&events),
            ExportFormat::Csv => export::to_csv(&events),
            ExportFormat::Xml => export::to_xml(&events),
        })
    }

    /// Prune events older than the retention window and truncate any ring
    /// past its bound. Returns how many events were removed.
    pub async fn cleanup_old_activities(&self) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.retention)
                .unwrap_or_else(|_| chrono::Duration::hours(24));
        let mut state = self.state.lock().await;
        let mut removed = 0usize;
        for ring in state.activities.values_mut() {
            let before = ring.len();
            ring.retain(|e| e.occurred_at >= cutoff);
            while ring.len() > self.config.max_events_per_agent {
                ring.pop_front();
            }
            removed += before - ring.len();
        }
        state.activities.retain(|_, ring| !ring.is_empty());
        removed
    }
}
