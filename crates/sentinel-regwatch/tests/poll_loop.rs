//! Polling, dedup, and fan-out tests against a mock monitor.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::Mutex;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use sentinel_regwatch::{RegulatoryEventSubscriber, RegwatchConfig, RegwatchError};
use sentinel_store::{MemoryStore, SubscriptionStore};
use sentinel_types::{RegulatoryEvent, SubscriptionFilter};

fn changes_body() -> serde_json::Value {
    json!([
        {
            "change_id": "a",
            "source_name": "SEC Release",
            "regulation_title": "Reg S-P amendments",
            "change_type": "AMENDMENT",
            "severity": "HIGH",
        },
        {
            "change_id": "b",
            "source_name": "FCA",
            "regulation_title": "Handbook update",
            "change_type": "AMENDMENT",
            "severity": "HIGH",
        },
    ])
}

fn subscriber(store: &MemoryStore, url: &str) -> Arc<RegulatoryEventSubscriber> {
    Arc::new(
        RegulatoryEventSubscriber::new(
            RegwatchConfig::for_monitor(url),
            Arc::new(store.clone()),
        )
        .unwrap(),
    )
}

fn recording_callback() -> (
    Arc<Mutex<Vec<RegulatoryEvent>>>,
    sentinel_regwatch::EventCallback,
) {
    let seen: Arc<Mutex<Vec<RegulatoryEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let callback: sentinel_regwatch::EventCallback = Arc::new(move |event| {
        sink.try_lock().unwrap().push(event.clone());
    });
    (seen, callback)
}

#[tokio::test]
async fn filters_select_matching_events_only() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/regulatory/monitor/changes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(changes_body()))
        .mount(&server)
        .await;

    let store = MemoryStore::new();
    let sub = subscriber(&store, &server.uri());
    let (seen, callback) = recording_callback();
    sub.subscribe(
        "agent-1",
        SubscriptionFilter {
            sources: vec!["SEC".into()],
            severities: vec!["HIGH".into()],
            ..Default::default()
        },
        callback,
    )
    .await
    .unwrap();

    let processed = sub.poll_once().await.unwrap();
    assert_eq!(processed, 2);

    let seen = seen.lock().await;
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].change_id, "a");

    let stats = sub.statistics().await;
    assert_eq!(stats.events_processed, 2);
    assert_eq!(stats.events_notified, 1);
}

#[tokio::test]
async fn duplicate_changes_are_delivered_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/regulatory/monitor/changes"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{
                "change_id": "x",
                "source_name": "SEC",
                "change_type": "NEW_RULE",
                "severity": "HIGH",
            }])),
        )
        .mount(&server)
        .await;

    let store = MemoryStore::new();
    let sub = subscriber(&store, &server.uri());
    let (seen, callback) = recording_callback();
    sub.subscribe("agent-1", SubscriptionFilter::default(), callback)
        .await
        .unwrap();

    assert_eq!(sub.poll_once().await.unwrap(), 1);
    assert_eq!(sub.poll_once().await.unwrap(), 0);

    assert_eq!(seen.lock().await.len(), 1);
    assert_eq!(sub.statistics().await.events_processed, 1);
}

#[tokio::test]
async fn second_poll_pages_with_since_id() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/regulatory/monitor/changes"))
        .and(query_param("since_id", "b"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/regulatory/monitor/changes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(changes_body()))
        .mount(&server)
        .await;

    let store = MemoryStore::new();
    let sub = subscriber(&store, &server.uri());
    sub.poll_once().await.unwrap();
    sub.poll_once().await.unwrap();
}

#[tokio::test]
async fn monitor_errors_count_consecutive_failures() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/regulatory/monitor/changes"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let store = MemoryStore::new();
    let sub = subscriber(&store, &server.uri());
    assert!(matches!(
        sub.poll_once().await,
        Err(RegwatchError::MonitorStatus(503))
    ));
}

#[tokio::test]
async fn panicking_callback_does_not_starve_other_subscribers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/regulatory/monitor/changes"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{
                "change_id": "c-1",
                "source_name": "SEC",
                "change_type": "GUIDANCE",
                "severity": "LOW",
            }])),
        )
        .mount(&server)
        .await;

    let store = MemoryStore::new();
    let sub = subscriber(&store, &server.uri());
    sub.subscribe(
        "agent-bad",
        SubscriptionFilter::default(),
        Arc::new(|_| panic!("callback blew up")),
    )
    .await
    .unwrap();
    let (seen, callback) = recording_callback();
    sub.subscribe("agent-good", SubscriptionFilter::default(), callback)
        .await
        .unwrap();

    sub.poll_once().await.unwrap();
    assert_eq!(seen.lock().await.len(), 1);
}

#[tokio::test]
async fn persisted_filters_reload_without_callbacks() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/regulatory/monitor/changes"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{
                "change_id": "r-1",
                "source_name": "SEC",
                "change_type": "NEW_RULE",
                "severity": "HIGH",
            }])),
        )
        .mount(&server)
        .await;

    let store = MemoryStore::new();
    store
        .upsert_subscription("agent-1", &SubscriptionFilter::default())
        .await
        .unwrap();

    let sub = subscriber(&store, &server.uri());
    assert_eq!(sub.load_persisted_subscriptions().await.unwrap(), 1);
    assert_eq!(sub.statistics().await.total_subscriptions, 1);

    // The restored entry has no callback yet: the event is processed but
    // nobody is notified.
    sub.poll_once().await.unwrap();
    let stats = sub.statistics().await;
    assert_eq!(stats.events_processed, 1);
    assert_eq!(stats.events_notified, 0);

    // After the agent re-registers, later events reach it.
    let (seen, callback) = recording_callback();
    sub.subscribe("agent-1", SubscriptionFilter::default(), callback)
        .await
        .unwrap();
    sub.poll_once().await.unwrap();
    assert!(seen.lock().await.is_empty());
}

#[tokio::test]
async fn unsubscribe_removes_persisted_state() {
    let server = MockServer::start().await;
    let store = MemoryStore::new();
    let sub = subscriber(&store, &server.uri());
    let (_seen, callback) = recording_callback();
    sub.subscribe("agent-1", SubscriptionFilter::default(), callback)
        .await
        .unwrap();
    assert_eq!(store.subscriptions().await.unwrap().len(), 1);

    sub.unsubscribe("agent-1").await.unwrap();
    assert_eq!(store.subscriptions().await.unwrap().len(), 0);
    assert_eq!(sub.statistics().await.total_subscriptions, 0);
}
