use async_trait::async_trait;
use serde_json::json;

use super::*;
use crate::bus::{BrokerConnection, InMemoryBroker};
use crate::envelope::{decode, TRACEPARENT_HEADER};
use crate::telemetry::RecordingSink;

fn publisher(broker: &InMemoryBroker, sink: &RecordingSink) -> Publisher {
    Publisher::new(
        Arc::new(broker.clone()),
        Arc::new(sink.clone()),
        PublisherConfig::new("main"),
    )
}

/// Broker whose connect never completes.
struct StallingBroker;

#[async_trait]
impl Broker for StallingBroker {
    async fn connect(&self) -> crate::bus::Result<Box<dyn BrokerConnection>> {
        futures::future::pending().await
    }
}

#[tokio::test]
async fn test_publish_declares_queue_and_enqueues_envelope() {
    let broker = InMemoryBroker::new();
    let sink = RecordingSink::new();
    let payload = json!({"id": 1, "title": "Widget", "image": "w.png"});

    publisher(&broker, &sink)
        .try_publish(EventKind::Created, &payload)
        .await
        .unwrap();

    let queued = broker.peek("main").await;
    assert_eq!(queued.len(), 1);

    let envelope = decode(&queued[0]).unwrap();
    assert_eq!(envelope.kind, EventKind::Created);
    assert_eq!(envelope.payload, payload);
}

#[tokio::test]
async fn test_publish_injects_its_own_span_context() {
    let broker = InMemoryBroker::new();
    let sink = RecordingSink::new();

    publisher(&broker, &sink)
        .try_publish(EventKind::Deleted, &json!(4))
        .await
        .unwrap();

    let spans = sink.spans_named("publish_message");
    assert_eq!(spans.len(), 1);
    let span = &spans[0];
    assert_eq!(span.status, SpanStatus::Ok);
    assert_eq!(span.attribute("messaging.destination"), Some("main"));
    assert_eq!(span.attribute("event.kind"), Some("product_deleted"));

    let queued = broker.peek("main").await;
    assert_eq!(
        queued[0].headers.get(TRACEPARENT_HEADER),
        Some(&span.context.to_traceparent())
    );
}

#[tokio::test]
async fn test_publish_is_child_of_current_span() {
    let broker = InMemoryBroker::new();
    let request = crate::telemetry::RecordingSink::new()
        .start_span("update_product", SpanParent::Root)
        .context();
    let sink = RecordingSink::new().with_ambient(request.clone());

    publisher(&broker, &sink)
        .publish(EventKind::Updated, &json!({"id": 1, "title": "t", "image": "i"}))
        .await;

    assert!(sink.spans_named("publish_message")[0].is_child_of(&request));
}

#[tokio::test]
async fn test_connection_failure_is_swallowed_by_publish() {
    let broker = InMemoryBroker::new();
    broker.set_fail_on_connect(true);
    let sink = RecordingSink::new();
    let publisher = publisher(&broker, &sink);

    publisher.publish(EventKind::Liked, &json!(5)).await;

    let result = publisher.try_publish(EventKind::Liked, &json!(5)).await;
    assert!(matches!(
        result,
        Err(PublishError::Transport(BusError::Connection(_)))
    ));

    let spans = sink.spans_named("publish_message");
    assert_eq!(spans.len(), 2);
    assert!(spans
        .iter()
        .all(|s| matches!(s.status, SpanStatus::Error(_))));
}

#[tokio::test]
async fn test_connection_released_after_each_publish() {
    let broker = InMemoryBroker::new();
    let sink = RecordingSink::new();
    let publisher = publisher(&broker, &sink);

    publisher.publish(EventKind::Liked, &json!(1)).await;
    publisher.publish(EventKind::Liked, &json!(2)).await;

    assert_eq!(broker.connect_count(), 2);
    assert_eq!(broker.open_connections(), 0);
    assert_eq!(broker.queue_len("main").await, 2);
}

#[tokio::test]
async fn test_connection_released_when_publish_fails() {
    let broker = InMemoryBroker::new();
    broker.set_fail_on_publish(true);
    let sink = RecordingSink::new();

    let result = publisher(&broker, &sink)
        .try_publish(EventKind::Created, &json!({"id": 1}))
        .await;

    assert!(matches!(
        result,
        Err(PublishError::Transport(BusError::Publish(_)))
    ));
    assert_eq!(broker.open_connections(), 0);
}

#[tokio::test]
async fn test_connect_timeout() {
    let sink = RecordingSink::new();
    let publisher = Publisher::new(
        Arc::new(StallingBroker),
        Arc::new(sink.clone()),
        PublisherConfig::new("main")
            .with_timeouts(Duration::from_millis(20), Duration::from_millis(20)),
    );

    let result = publisher.try_publish(EventKind::Deleted, &json!(1)).await;
    assert!(matches!(
        result,
        Err(PublishError::Timeout {
            operation: "connect",
            ..
        })
    ));

    // Swallowed on the fire-and-forget path.
    publisher.publish(EventKind::Deleted, &json!(1)).await;
}

#[tokio::test]
async fn test_publish_timeout_returns_promptly_on_dead_wire() {
    let broker = InMemoryBroker::new();
    broker.set_stall(true);
    let sink = RecordingSink::new();
    let publisher = Publisher::new(
        Arc::new(broker.clone()),
        Arc::new(sink.clone()),
        PublisherConfig::new("main")
            .with_timeouts(Duration::from_millis(20), Duration::from_millis(20)),
    );

    let result = tokio::time::timeout(
        Duration::from_secs(2),
        publisher.try_publish(EventKind::Created, &json!({"id": 1})),
    )
    .await
    .expect("publish blocked past its timeouts");

    assert!(matches!(
        result,
        Err(PublishError::Timeout {
            operation: "publish",
            ..
        })
    ));
    assert_eq!(broker.open_connections(), 0);
    assert_eq!(broker.queue_len("main").await, 0);

    tokio::time::timeout(
        Duration::from_secs(2),
        publisher.publish(EventKind::Created, &json!({"id": 1})),
    )
    .await
    .expect("fire-and-forget publish blocked past its timeouts");
    assert_eq!(broker.open_connections(), 0);
    assert!(matches!(
        sink.spans_named("publish_message")[0].status,
        SpanStatus::Error(_)
    ));
}

#[test]
fn test_config_from_settings() {
    let settings = AmqpSettings {
        publish_queue: "admin".to_string(),
        connect_timeout_ms: 250,
        publish_timeout_ms: 750,
        ..Default::default()
    };

    let config = PublisherConfig::from(&settings);
    assert_eq!(config.queue, "admin");
    assert_eq!(config.connect_timeout, Duration::from_millis(250));
    assert_eq!(config.publish_timeout, Duration::from_millis(750));
}
