use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::*;
use crate::bus::InMemoryBroker;
use crate::envelope::{encode, EventKind, TransportMessage};
use crate::storage::StoreError;
use crate::telemetry::RecordingSink;

/// Applier that records what it sees and fails according to a script.
#[derive(Default)]
struct ScriptedApplier {
    failures: Mutex<VecDeque<ApplyError>>,
    applied: Mutex<Vec<(EventKind, Value)>>,
}

impl ScriptedApplier {
    fn failing_with(errors: Vec<ApplyError>) -> Self {
        Self {
            failures: Mutex::new(errors.into()),
            ..Default::default()
        }
    }

    fn applied(&self) -> Vec<(EventKind, Value)> {
        self.applied.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProjectionApplier for ScriptedApplier {
    async fn apply(&self, kind: EventKind, payload: &Value) -> Result<(), ApplyError> {
        self.applied.lock().unwrap().push((kind, payload.clone()));
        match self.failures.lock().unwrap().pop_front() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn transient() -> ApplyError {
    ApplyError::Store(StoreError::Database(sqlx::Error::PoolTimedOut))
}

fn consumer(
    broker: &InMemoryBroker,
    applier: &Arc<ScriptedApplier>,
    sink: &RecordingSink,
    policy: AckPolicy,
) -> Consumer {
    Consumer::new(
        Arc::new(broker.clone()),
        Arc::clone(applier) as Arc<dyn ProjectionApplier>,
        Arc::new(sink.clone()),
        "main",
    )
    .with_ack_policy(policy)
}

async fn send(broker: &InMemoryBroker, kind: EventKind, payload: Value) {
    broker
        .send("main", encode(kind, &payload, None).unwrap())
        .await;
}

#[tokio::test]
async fn test_applies_in_order_and_returns_when_stream_ends() {
    let broker = InMemoryBroker::new();
    let applier = Arc::new(ScriptedApplier::default());
    let sink = RecordingSink::new();

    send(&broker, EventKind::Created, json!({"id": 1})).await;
    send(&broker, EventKind::Updated, json!({"id": 1})).await;
    send(&broker, EventKind::Deleted, json!(1)).await;
    broker.close_queue("main").await;

    let consumer = consumer(&broker, &applier, &sink, AckPolicy::AckBeforeApply);
    let state = consumer.state();
    consumer.run().await.unwrap();

    let kinds: Vec<_> = applier.applied().into_iter().map(|(k, _)| k).collect();
    assert_eq!(
        kinds,
        vec![EventKind::Created, EventKind::Updated, EventKind::Deleted]
    );
    assert_eq!(*state.borrow(), ConsumerState::Closed);
    assert_eq!(broker.open_connections(), 0);
}

#[tokio::test]
async fn test_unknown_kind_is_dropped_and_loop_continues() {
    let broker = InMemoryBroker::new();
    let applier = Arc::new(ScriptedApplier::default());
    let sink = RecordingSink::new();

    broker
        .send(
            "main",
            TransportMessage {
                content_type: Some("product_archived".to_string()),
                body: b"1".to_vec(),
                ..Default::default()
            },
        )
        .await;
    send(&broker, EventKind::Deleted, json!(2)).await;
    broker.close_queue("main").await;

    consumer(&broker, &applier, &sink, AckPolicy::AckBeforeApply)
        .run()
        .await
        .unwrap();

    assert_eq!(applier.applied(), vec![(EventKind::Deleted, json!(2))]);

    let spans = sink.spans_named("process_message");
    assert_eq!(spans.len(), 2);
    assert!(matches!(spans[0].status, SpanStatus::Error(_)));
    assert_eq!(spans[1].status, SpanStatus::Ok);
}

#[tokio::test]
async fn test_apply_failure_does_not_stop_loop() {
    let broker = InMemoryBroker::new();
    let applier = Arc::new(ScriptedApplier::failing_with(vec![ApplyError::NotFound(
        99,
    )]));
    let sink = RecordingSink::new();

    send(&broker, EventKind::Updated, json!({"id": 99})).await;
    send(&broker, EventKind::Created, json!({"id": 1})).await;
    broker.close_queue("main").await;

    consumer(&broker, &applier, &sink, AckPolicy::AckBeforeApply)
        .run()
        .await
        .unwrap();

    assert_eq!(applier.applied().len(), 2);
}

#[tokio::test]
async fn test_span_links_to_propagated_trace() {
    let broker = InMemoryBroker::new();
    let applier = Arc::new(ScriptedApplier::default());
    let sink = RecordingSink::new();

    let sender = TraceContext::from_traceparent(
        "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
    )
    .unwrap();
    broker
        .send(
            "main",
            encode(EventKind::Liked, &json!(5), Some(&sender)).unwrap(),
        )
        .await;
    send(&broker, EventKind::Liked, json!(6)).await;
    broker.close_queue("main").await;

    consumer(&broker, &applier, &sink, AckPolicy::AckBeforeApply)
        .run()
        .await
        .unwrap();

    let spans = sink.spans_named("process_message");
    assert!(spans[0].is_child_of(&sender));
    assert_eq!(spans[0].context.trace_id(), sender.trace_id());
    assert_eq!(spans[0].attribute("event.kind"), Some("product_liked"));

    assert!(spans[1].parent.is_none());
    assert_ne!(spans[1].context.trace_id(), sender.trace_id());
}

#[tokio::test]
async fn test_ack_before_apply_loses_failed_message() {
    let broker = InMemoryBroker::new();
    let applier = Arc::new(ScriptedApplier::failing_with(vec![transient()]));
    let sink = RecordingSink::new();

    send(&broker, EventKind::Created, json!({"id": 1})).await;
    broker.close_queue("main").await;

    consumer(&broker, &applier, &sink, AckPolicy::AckBeforeApply)
        .run()
        .await
        .unwrap();

    assert_eq!(applier.applied().len(), 1);
    let stats = broker.stats().await;
    assert_eq!(stats.acked, 1);
    assert_eq!(stats.requeued, 0);
}

#[tokio::test]
async fn test_ack_after_apply_requeues_transient_failure() {
    let broker = InMemoryBroker::new();
    let applier = Arc::new(ScriptedApplier::failing_with(vec![transient()]));
    let sink = RecordingSink::new();

    send(&broker, EventKind::Created, json!({"id": 1})).await;
    broker.close_queue("main").await;

    consumer(&broker, &applier, &sink, AckPolicy::AckAfterApply)
        .run()
        .await
        .unwrap();

    // Applied twice: the failed attempt and the redelivery.
    assert_eq!(applier.applied().len(), 2);
    let stats = broker.stats().await;
    assert_eq!(stats.requeued, 1);
    assert_eq!(stats.acked, 1);

    let spans = sink.spans_named("process_message");
    assert_eq!(spans[1].attribute("messaging.redelivered"), Some("true"));
}

#[tokio::test]
async fn test_ack_after_apply_acks_permanent_failure() {
    let broker = InMemoryBroker::new();
    let applier = Arc::new(ScriptedApplier::failing_with(vec![ApplyError::NotFound(
        99,
    )]));
    let sink = RecordingSink::new();

    send(&broker, EventKind::Deleted, json!(99)).await;
    broker.close_queue("main").await;

    consumer(&broker, &applier, &sink, AckPolicy::AckAfterApply)
        .run()
        .await
        .unwrap();

    let stats = broker.stats().await;
    assert_eq!(stats.acked, 1);
    assert_eq!(stats.requeued, 0);
    assert_eq!(applier.applied().len(), 1);
}

#[tokio::test]
async fn test_ack_after_apply_rejects_undecodable_message() {
    let broker = InMemoryBroker::new();
    let applier = Arc::new(ScriptedApplier::default());
    let sink = RecordingSink::new();

    broker
        .send(
            "main",
            TransportMessage {
                content_type: Some("product_created".to_string()),
                body: b"{oops".to_vec(),
                ..Default::default()
            },
        )
        .await;
    broker.close_queue("main").await;

    consumer(&broker, &applier, &sink, AckPolicy::AckAfterApply)
        .run()
        .await
        .unwrap();

    assert!(applier.applied().is_empty());
    let stats = broker.stats().await;
    assert_eq!(stats.rejected, 1);
    assert_eq!(stats.acked, 0);
}

#[tokio::test]
async fn test_setup_failure_returns_error_and_closes() {
    let broker = InMemoryBroker::new();
    broker.set_fail_on_connect(true);
    let applier = Arc::new(ScriptedApplier::default());
    let sink = RecordingSink::new();

    let consumer = consumer(&broker, &applier, &sink, AckPolicy::AckBeforeApply);
    let state = consumer.state();

    assert!(consumer.run().await.is_err());
    assert_eq!(*state.borrow(), ConsumerState::Closed);
}

#[tokio::test]
async fn test_consumer_declares_its_queue() {
    let broker = InMemoryBroker::new();
    let applier = Arc::new(ScriptedApplier::default());
    let sink = RecordingSink::new();

    let consumer = consumer(&broker, &applier, &sink, AckPolicy::AckBeforeApply);
    let mut state = consumer.state();
    let handle = tokio::spawn(async move { consumer.run().await });

    state
        .wait_for(|s| *s == ConsumerState::Consuming)
        .await
        .unwrap();
    send(&broker, EventKind::Liked, json!(1)).await;
    broker.close_queue("main").await;

    handle.await.unwrap().unwrap();
    assert_eq!(applier.applied(), vec![(EventKind::Liked, json!(1))]);
}

#[test]
fn test_ack_policy_names() {
    let policy: AckPolicy = serde_json::from_value(json!("ack-after-apply")).unwrap();
    assert_eq!(policy, AckPolicy::AckAfterApply);
    assert_eq!(AckPolicy::default(), AckPolicy::AckBeforeApply);
    assert_eq!(AckPolicy::AckBeforeApply.ack_mode(), AckMode::Auto);
}
