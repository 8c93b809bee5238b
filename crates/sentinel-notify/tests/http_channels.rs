//! HTTP channel integration tests against a local mock server.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use sentinel_notify::{
    NotificationService, NotifyConfig, RecordingTransport, SmtpConfig,
};
use sentinel_store::{ChannelStore, MemoryStore, NotificationStore};
use sentinel_types::{
    AlertPayload, ChannelType, DeliveryStatus, NotificationChannel, Severity,
};

fn alert(severity: Severity) -> AlertPayload {
    AlertPayload {
        title: "volume spike".into(),
        message: "too many transactions in window".into(),
        severity,
        data: json!({"current_value": 42}),
    }
}

fn channel(channel_type: ChannelType, configuration: serde_json::Value) -> NotificationChannel {
    NotificationChannel {
        channel_id: Uuid::new_v4(),
        channel_type,
        channel_name: "test channel".into(),
        configuration,
        is_enabled: true,
        last_tested_at: None,
        test_status: None,
    }
}

fn service(store: &MemoryStore) -> NotificationService {
    NotificationService::new(
        Arc::new(store.clone()),
        Arc::new(RecordingTransport::new()),
        SmtpConfig::default(),
        None,
        NotifyConfig {
            base_retry_delay: Duration::from_secs(0),
            ..NotifyConfig::default()
        },
    )
    .unwrap()
}

#[tokio::test]
async fn webhook_succeeds_on_second_retry() {
    let server = MockServer::start().await;
    // First request gets a 500, everything after succeeds.
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let store = MemoryStore::new();
    let hook = channel(
        ChannelType::Webhook,
        json!({"url": format!("{}/hook", server.uri())}),
    );
    store.insert_channel(&hook).await.unwrap();
    let service = service(&store);

    let id = service
        .send_notification(Uuid::new_v4(), hook.channel_id, alert(Severity::High))
        .await
        .unwrap();

    let attempt = store.attempt(&id).await.unwrap().unwrap();
    assert_eq!(attempt.delivery_status, DeliveryStatus::Failed);
    assert_eq!(attempt.retry_count, 1);
    assert!(attempt.error_message.unwrap().contains("500"));
    assert!(attempt.next_retry_at.is_some());

    service.run_retry_pass().await;

    let attempt = store.attempt(&id).await.unwrap().unwrap();
    assert_eq!(attempt.delivery_status, DeliveryStatus::Delivered);
    let metrics = service.metrics().await;
    assert_eq!(metrics.retries_attempted, 1);
    assert_eq!(metrics.successful_deliveries, 1);
}

#[tokio::test]
async fn webhook_sends_envelope_and_custom_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(header("x-team", "compliance"))
        .and(body_partial_json(json!({
            "alert": {"title": "volume spike", "severity": "high"},
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let store = MemoryStore::new();
    let hook = channel(
        ChannelType::Webhook,
        json!({
            "url": format!("{}/hook", server.uri()),
            "headers": {"x-team": "compliance"},
        }),
    );
    store.insert_channel(&hook).await.unwrap();

    let id = service(&store)
        .send_notification(Uuid::new_v4(), hook.channel_id, alert(Severity::High))
        .await
        .unwrap();
    let attempt = store.attempt(&id).await.unwrap().unwrap();
    assert_eq!(attempt.delivery_status, DeliveryStatus::Delivered);
}

#[tokio::test]
async fn webhook_4xx_is_permanent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let store = MemoryStore::new();
    let hook = channel(
        ChannelType::Webhook,
        json!({"url": format!("{}/hook", server.uri())}),
    );
    store.insert_channel(&hook).await.unwrap();
    let service = service(&store);

    let id = service
        .send_notification(Uuid::new_v4(), hook.channel_id, alert(Severity::High))
        .await
        .unwrap();
    // No retries happen for a permanent failure.
    service.run_retry_pass().await;
    service.run_retry_pass().await;

    let attempt = store.attempt(&id).await.unwrap().unwrap();
    assert_eq!(attempt.delivery_status, DeliveryStatus::Failed);
    assert_eq!(service.metrics().await.retries_attempted, 0);
}

#[tokio::test]
async fn slack_attachment_is_colored_by_severity() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/slack"))
        .and(body_partial_json(json!({
            "text": "volume spike",
            "attachments": [{"color": "danger"}],
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let store = MemoryStore::new();
    let slack = channel(
        ChannelType::Slack,
        json!({"webhook_url": format!("{}/slack", server.uri())}),
    );
    store.insert_channel(&slack).await.unwrap();

    let id = service(&store)
        .send_notification(Uuid::new_v4(), slack.channel_id, alert(Severity::Critical))
        .await
        .unwrap();
    let attempt = store.attempt(&id).await.unwrap().unwrap();
    assert_eq!(attempt.delivery_status, DeliveryStatus::Delivered);
}

#[tokio::test]
async fn pagerduty_event_carries_routing_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/enqueue"))
        .and(body_partial_json(json!({
            "routing_key": "pd-key-123",
            "event_action": "trigger",
            "payload": {"severity": "critical"},
        })))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    let store = MemoryStore::new();
    let pagerduty = channel(
        ChannelType::Pagerduty,
        json!({
            "integration_key": "pd-key-123",
            "api_url": format!("{}/v2/enqueue", server.uri()),
        }),
    );
    store.insert_channel(&pagerduty).await.unwrap();

    let id = service(&store)
        .send_notification(
            Uuid::new_v4(),
            pagerduty.channel_id,
            alert(Severity::Critical),
        )
        .await
        .unwrap();
    let attempt = store.attempt(&id).await.unwrap().unwrap();
    assert_eq!(attempt.delivery_status, DeliveryStatus::Delivered);
}

#[tokio::test]
async fn sms_post_is_bearer_authed_and_truncated() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sms"))
        .and(header("authorization", "Bearer carrier-key"))
        .and(body_partial_json(json!({"to": "+15550100"})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let store = MemoryStore::new();
    let sms = channel(
        ChannelType::Sms,
        json!({
            "api_url": format!("{}/sms", server.uri()),
            "api_key": "carrier-key",
            "recipient": "+15550100",
        }),
    );
    store.insert_channel(&sms).await.unwrap();

    let mut payload = alert(Severity::High);
    payload.title = "y".repeat(400);
    let id = service(&store)
        .send_notification(Uuid::new_v4(), sms.channel_id, payload)
        .await
        .unwrap();
    let attempt = store.attempt(&id).await.unwrap().unwrap();
    assert_eq!(attempt.delivery_status, DeliveryStatus::Delivered);
}

#[tokio::test]
async fn test_channel_records_probe_outcome() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let store = MemoryStore::new();
    let mut hook = channel(
        ChannelType::Webhook,
        json!({"url": format!("{}/hook", server.uri())}),
    );
    // Channel tests run even against disabled channels.
    hook.is_enabled = false;
    store.insert_channel(&hook).await.unwrap();
    let service = service(&store);

    let ok = service
        .test_channel(hook.channel_id, alert(Severity::Low))
        .await
        .unwrap();
    assert!(ok);

    let updated = store.channel(hook.channel_id).await.unwrap().unwrap();
    assert_eq!(updated.test_status.as_deref(), Some("success"));
    assert!(updated.last_tested_at.is_some());
}
