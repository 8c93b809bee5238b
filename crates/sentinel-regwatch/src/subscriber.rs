//! The polling loop and subscriber registry.

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::Client;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use sentinel_store::SubscriptionStore;
use sentinel_types::{RegulatoryEvent, SubscriptionFilter};

use crate::config::{failure_backoff, RegwatchConfig};
use crate::RegwatchError;

/// Callback invoked for each matching event, synchronously in the polling
/// task. Panics are isolated and logged.
pub type EventCallback = Arc<dyn Fn(&RegulatoryEvent) + Send + Sync>;

struct Subscription {
    filter: SubscriptionFilter,
    // None for filters restored from the store; the agent re-binds its
    // callback on its own startup.
    callback: Option<EventCallback>,
}

#[derive(Default)]
struct State {
    subscriptions: HashMap<String, Subscription>,
    processed_event_ids: HashSet<String>,
    last_event_id: Option<String>,
    last_poll_time: Option<DateTime<Utc>>,
    events_processed: u64,
    events_notified: u64,
    consecutive_failures: u32,
}

/// Snapshot of subscriber statistics.
#[derive(Debug, Clone)]
pub struct SubscriberStats {
    /// Registered subscriptions (bound and pending).
    pub total_subscriptions: usize,
    /// Unique events seen.
    pub events_processed: u64,
    /// Callback invocations delivered.
    pub events_notified: u64,
    /// Current consecutive poll failures.
    pub consecutive_failures: u32,
    /// When the last successful poll finished.
    pub last_poll_time: Option<DateTime<Utc>>,
    /// Monitor endpoint being polled.
    pub monitor_url: String,
}

/// Polls the regulatory monitor and fans matching events out to agents.
pub struct RegulatoryEventSubscriber {
    config: RegwatchConfig,
    store: Arc<dyn SubscriptionStore>,
    http: Client,
    state: Arc<Mutex<State>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RegulatoryEventSubscriber {
    /// Build a subscriber over the given store.
    pub fn new(
        config: RegwatchConfig,
        store: Arc<dyn SubscriptionStore>,
    ) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()?;
        info!(
            monitor_url = %config.monitor_url,
            poll_interval_secs = config.poll_interval.as_secs(),
            "regulatory event subscriber initialized"
        );
        Ok(Self {
            config,
            store,
            http,
            state: Arc::new(Mutex::new(State::default())),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        })
    }

    /// Subscribe an agent: the filter is persisted, the callback lives for
    /// this process only.
    pub async fn subscribe(
        &self,
        agent_id: &str,
        filter: SubscriptionFilter,
        callback: EventCallback,
    ) -> Result<(), RegwatchError> {
        self.store.upsert_subscription(agent_id, &filter).await?;
        let mut state = self.state.lock().await;
        state.subscriptions.insert(
            agent_id.to_string(),
            Subscription {
                filter,
                callback: Some(callback),
            },
        );
        info!(agent_id, "agent subscribed to regulatory events");
        Ok(())
    }

    /// Remove an agent's subscription, in memory and in the store.
    pub async fn unsubscribe(&self, agent_id: &str) -> Result<(), RegwatchError> {
        let removed = self.state.lock().await.subscriptions.remove(agent_id);
        if removed.is_some() {
            self.store.delete_subscription(agent_id).await?;
            info!(agent_id, "agent unsubscribed from regulatory events");
        }
        Ok(())
    }

    /// Load persisted subscription filters. Callbacks cannot be restored;
    /// entries stay pending until the agent re-subscribes.
    pub async fn load_persisted_subscriptions(&self) -> Result<usize, RegwatchError> {
        let persisted = self.store.subscriptions().await?;
        let count = persisted.len();
        let mut state = self.state.lock().await;
        for (agent_id, filter) in persisted {
            state
                .subscriptions
                .entry(agent_id)
                .or_insert(Subscription {
                    filter,
                    callback: None,
                });
        }
        info!(count, "loaded persisted regulatory subscriptions");
        Ok(count)
    }

    /// Start the polling loop.
    pub async fn start(self: &Arc<Self>) -> Result<(), RegwatchError> {
        let mut task = self.task.lock().await;
        if task.is_some() {
            warn!("event subscriber already running");
            return Err(RegwatchError::AlreadyRunning);
        }

        self.load_persisted_subscriptions().await?;

        let this = Arc::clone(self);
        let cancel = self.cancel.clone();
        *task = Some(tokio::spawn(async move {
            info!("regulatory polling loop started");
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                match this.poll_once().await {
                    Ok(count) => {
                        if count > 0 {
                            debug!(count, "processed regulatory events");
                        }
                    }
                    Err(e) => {
                        let failures = {
                            let mut state = this.state.lock().await;
                            state.consecutive_failures += 1;
                            state.consecutive_failures
                        };
                        error!(error = %e, consecutive_failures = failures, "error in polling loop");
                        if let Some(backoff) = failure_backoff(failures) {
                            warn!(backoff_secs = backoff.as_secs(), "backing off due to failures");
                            tokio::select! {
                                _ = cancel.cancelled() => break,
                                _ = tokio::time::sleep(backoff) => {}
                            }
                        }
                    }
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(this.config.poll_interval) => {}
                }
            }
            info!("regulatory polling loop stopped");
        }));
        info!("regulatory event subscriber started");
        Ok(())
    }

    /// Stop the polling loop and join it.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(task) = self.task.lock().await.take() {
            let _ = task.await;
        }
        info!("regulatory event subscriber shutdown complete");
    }

    /// One poll + fan-out cycle. Returns the number of unseen events
    /// processed.
    pub async fn poll_once(&self) -> Result<usize, RegwatchError> {
        let events = self.poll_monitor().await?;
        let count = self.process_events(events).await;
        let mut state = self.state.lock().await;
        state.consecutive_failures = 0;
        state.last_poll_time = Some(Utc::now());
        Ok(count)
    }

    /// Statistics snapshot.
    pub async fn statistics(&self) -> SubscriberStats {
        let state = self.state.lock().await;
        SubscriberStats {
            total_subscriptions: state.subscriptions.len(),
            events_processed: state.events_processed,
            events_notified: state.events_notified,
            consecutive_failures: state.consecutive_failures,
            last_poll_time: state.last_poll_time,
            monitor_url: self.config.monitor_url.clone(),
        }
    }

    async fn poll_monitor(&self) -> Result<Vec<RegulatoryEvent>, RegwatchError> {
        let mut url = format!("{}/api/regulatory/monitor/changes", self.config.monitor_url);
        if let Some(since_id) = &self.state.lock().await.last_event_id {
            url.push_str("?since_id=");
            url.push_str(since_id);
        }

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| RegwatchError::Transport(e.to_string()))?;
        if response.status().as_u16() != 200 {
            return Err(RegwatchError::MonitorStatus(response.status().as_u16()));
        }

        let body: serde_json::Value = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                error!(error = %e, "failed to parse regulatory monitor response");
                return Ok(Vec::new());
            }
        };

        let mut events = Vec::new();
        if let Some(items) = body.as_array() {
            let now = Utc::now();
            let mut state = self.state.lock().await;
            for item in items {
                let event = RegulatoryEvent::from_wire(item, now);
                if !event.event_id.is_empty() {
                    state.last_event_id = Some(event.event_id.clone());
                }
                events.push(event);
            }
        }
        Ok(events)
    }

    /// Fan unseen events out to matching subscribers, serially, in arrival
    /// order. A panicking callback is logged and does not affect the rest.
    async fn process_events(&self, events: Vec<RegulatoryEvent>) -> usize {
        let mut state = self.state.lock().await;
        let mut processed = 0usize;
        for event in events {
            if !state.processed_event_ids.insert(event.event_id.clone()) {
                continue;
            }
            state.events_processed += 1;
            processed += 1;

            let mut notified = 0u64;
            for (agent_id, subscription) in &state.subscriptions {
                if !subscription.filter.matches(&event) {
                    continue;
                }
                let Some(callback) = &subscription.callback else {
                    debug!(agent_id, event = %event.event_id, "subscription pending callback re-registration");
                    continue;
                };
                let call = AssertUnwindSafe(|| callback(&event));
                match std::panic::catch_unwind(call) {
                    Ok(()) => {
                        notified += 1;
                        debug!(agent_id, event = %event.event_id, source = %event.source_name,
                               "notified agent of regulatory event");
                    }
                    Err(_) => {
                        error!(agent_id, event = %event.event_id, "error in event callback");
                    }
                }
            }
            state.events_notified += notified;
        }
        processed
    }
}
