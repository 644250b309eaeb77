//! Consumer loop.
//!
//! Subscribes to one queue and feeds each delivery through decode and the
//! service's projection applier, one message at a time. Per-message failures
//! are logged and never end the loop; `run` returns only when the delivery
//! stream ends or setup fails.

use std::sync::Arc;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, warn, Instrument};

use crate::bus::{self, AckMode, Broker, Delivery};
use crate::envelope::{self, DecodeError, TraceContext};
use crate::projection::{ApplyError, ProjectionApplier};
use crate::telemetry::{ObservabilitySink, SpanParent, SpanStatus};

/// When a delivery is acknowledged relative to applying it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AckPolicy {
    /// Broker auto-ack on receipt. A failed apply loses the message.
    #[default]
    AckBeforeApply,
    /// Manual ack once the applier returns. Transient store failures are
    /// requeued, undecodable messages rejected, everything else acked.
    AckAfterApply,
}

impl AckPolicy {
    pub fn ack_mode(&self) -> AckMode {
        match self {
            AckPolicy::AckBeforeApply => AckMode::Auto,
            AckPolicy::AckAfterApply => AckMode::Manual,
        }
    }
}

/// Lifecycle of a consumer loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Connecting,
    Declaring,
    Consuming,
    Dispatching,
    Closed,
}

/// What happened to one delivery.
#[derive(Debug)]
pub enum DeliveryOutcome {
    Applied,
    /// Could not be decoded; dropped without applying.
    Dropped(DecodeError),
    Failed(ApplyError),
}

impl DeliveryOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            DeliveryOutcome::Applied => "applied",
            DeliveryOutcome::Dropped(_) => "dropped",
            DeliveryOutcome::Failed(_) => "failed",
        }
    }
}

/// Long-lived subscriber for one queue.
pub struct Consumer {
    broker: Arc<dyn Broker>,
    applier: Arc<dyn ProjectionApplier>,
    sink: Arc<dyn ObservabilitySink>,
    queue: String,
    policy: AckPolicy,
    state: watch::Sender<ConsumerState>,
}

impl Consumer {
    pub fn new(
        broker: Arc<dyn Broker>,
        applier: Arc<dyn ProjectionApplier>,
        sink: Arc<dyn ObservabilitySink>,
        queue: impl Into<String>,
    ) -> Self {
        let (state, _) = watch::channel(ConsumerState::Connecting);
        Self {
            broker,
            applier,
            sink,
            queue: queue.into(),
            policy: AckPolicy::default(),
            state,
        }
    }

    pub fn with_ack_policy(mut self, policy: AckPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn ack_policy(&self) -> AckPolicy {
        self.policy
    }

    /// Watch lifecycle transitions.
    pub fn state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: ConsumerState) {
        debug!(queue = %self.queue, ?state, "Consumer state");
        self.state.send_replace(state);
    }

    /// Consume until the delivery stream ends.
    pub async fn run(&self) -> bus::Result<()> {
        let result = self.consume_until_closed().await;
        match &result {
            Ok(()) => info!(queue = %self.queue, "Consumer stream ended"),
            Err(e) => error!(queue = %self.queue, error = %e, "Consumer stopped"),
        }
        self.set_state(ConsumerState::Closed);
        result
    }

    async fn consume_until_closed(&self) -> bus::Result<()> {
        self.set_state(ConsumerState::Connecting);
        let mut conn = self.broker.connect().await?;

        self.set_state(ConsumerState::Declaring);
        conn.declare_queue(&self.queue).await?;
        let mut deliveries = conn.consume(&self.queue, self.policy.ack_mode()).await?;

        self.set_state(ConsumerState::Consuming);
        info!(queue = %self.queue, policy = ?self.policy, "Started consuming");

        let result = loop {
            match deliveries.next().await {
                Some(Ok(delivery)) => {
                    self.set_state(ConsumerState::Dispatching);
                    self.handle_delivery(delivery).await;
                    self.set_state(ConsumerState::Consuming);
                }
                Some(Err(e)) => break Err(e),
                None => break Ok(()),
            }
        };

        drop(deliveries);
        if let Err(e) = conn.close().await {
            debug!(queue = %self.queue, error = %e, "Failed to close broker connection");
        }
        result
    }

    /// Process one delivery: trace, decode, apply, settle.
    pub async fn handle_delivery(&self, delivery: Delivery) -> DeliveryOutcome {
        let parent = match TraceContext::extract(&delivery.message.headers) {
            Some(ctx) => SpanParent::Remote(ctx),
            None => SpanParent::Root,
        };
        let mut span = self.sink.start_span("process_message", parent);
        span.set_attribute("messaging.source", self.queue.clone());
        if delivery.redelivered {
            span.set_attribute("messaging.redelivered", "true".to_string());
        }
        let tracing_span = span.tracing_span();

        let outcome = match envelope::decode(&delivery.message) {
            Ok(envelope) => {
                span.set_attribute("event.kind", envelope.kind.as_str().to_string());
                match self
                    .applier
                    .apply(envelope.kind, &envelope.payload)
                    .instrument(tracing_span.clone())
                    .await
                {
                    Ok(()) => {
                        debug!(parent: &tracing_span, queue = %self.queue, kind = %envelope.kind, "Event applied");
                        DeliveryOutcome::Applied
                    }
                    Err(e) => {
                        warn!(parent: &tracing_span, queue = %self.queue, kind = %envelope.kind, error = %e, "Failed to apply event");
                        DeliveryOutcome::Failed(e)
                    }
                }
            }
            Err(e) => {
                warn!(parent: &tracing_span, queue = %self.queue, error = %e, "Dropping undecodable message");
                DeliveryOutcome::Dropped(e)
            }
        };

        match &outcome {
            DeliveryOutcome::Applied => span.set_status(SpanStatus::Ok),
            DeliveryOutcome::Dropped(e) => span.set_status(SpanStatus::Error(e.to_string())),
            DeliveryOutcome::Failed(e) => span.set_status(SpanStatus::Error(e.to_string())),
        }

        self.settle(&delivery, &outcome)
            .instrument(tracing_span)
            .await;

        #[cfg(feature = "otel")]
        {
            use crate::utils::metrics::{consume_attrs, APPLY_FAILURES, CONSUME_TOTAL};
            let attrs = consume_attrs(&self.queue, outcome.label());
            CONSUME_TOTAL.add(1, &attrs);
            if matches!(outcome, DeliveryOutcome::Failed(_)) {
                APPLY_FAILURES.add(1, &attrs);
            }
        }

        span.end();
        outcome
    }

    async fn settle(&self, delivery: &Delivery, outcome: &DeliveryOutcome) {
        if self.policy == AckPolicy::AckBeforeApply {
            return;
        }

        let result = match outcome {
            DeliveryOutcome::Applied => delivery.ack().await,
            DeliveryOutcome::Dropped(_) => delivery.nack(false).await,
            DeliveryOutcome::Failed(e) if e.is_transient() => {
                debug!(queue = %self.queue, "Requeueing after transient failure");
                delivery.nack(true).await
            }
            DeliveryOutcome::Failed(_) => delivery.ack().await,
        };

        if let Err(e) = result {
            error!(queue = %self.queue, error = %e, "Failed to settle delivery");
        }
    }
}

#[cfg(test)]
mod tests;
