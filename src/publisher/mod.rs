//! Event publisher.
//!
//! One publish is one connection: connect, declare the target queue, send,
//! release. Delivery is at-most-once. `publish` never fails its caller;
//! `try_publish` returns the outcome of the same attempt.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::time::timeout;
use tracing::{debug, warn, Instrument};

use crate::bus::{Broker, BusError};
use crate::config::AmqpSettings;
use crate::envelope::{self, EventKind, TraceContext};
use crate::telemetry::{ObservabilitySink, SpanParent, SpanStatus};

/// Default bound on connecting and on publishing.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors from a single publish attempt.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Transport(#[from] BusError),

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
}

/// Where and how a publisher sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherConfig {
    /// Target queue; also the routing key on the default exchange.
    pub queue: String,
    pub connect_timeout: Duration,
    pub publish_timeout: Duration,
}

impl PublisherConfig {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            connect_timeout: DEFAULT_TIMEOUT,
            publish_timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeouts(mut self, connect: Duration, publish: Duration) -> Self {
        self.connect_timeout = connect;
        self.publish_timeout = publish;
        self
    }
}

impl From<&AmqpSettings> for PublisherConfig {
    fn from(settings: &AmqpSettings) -> Self {
        Self::new(settings.publish_queue.clone())
            .with_timeouts(settings.connect_timeout(), settings.publish_timeout())
    }
}

/// Sends domain events to one queue.
#[derive(Clone)]
pub struct Publisher {
    broker: Arc<dyn Broker>,
    sink: Arc<dyn ObservabilitySink>,
    config: PublisherConfig,
}

impl Publisher {
    pub fn new(
        broker: Arc<dyn Broker>,
        sink: Arc<dyn ObservabilitySink>,
        config: PublisherConfig,
    ) -> Self {
        Self {
            broker,
            sink,
            config,
        }
    }

    pub fn queue(&self) -> &str {
        &self.config.queue
    }

    /// Fire-and-forget publish. Failures are logged and dropped.
    pub async fn publish(&self, kind: EventKind, payload: &Value) {
        if let Err(e) = self.try_publish(kind, payload).await {
            warn!(
                queue = %self.config.queue,
                kind = %kind,
                error = %e,
                "Publish failed, event dropped"
            );
        }
    }

    /// Publish and report the outcome.
    pub async fn try_publish(&self, kind: EventKind, payload: &Value) -> Result<(), PublishError> {
        let mut span = self.sink.start_span("publish_message", SpanParent::Current);
        span.set_attribute("messaging.destination", self.config.queue.clone());
        span.set_attribute("event.kind", kind.as_str().to_string());

        let start = Instant::now();
        let result = self
            .send(kind, payload, span.context())
            .instrument(span.tracing_span())
            .await;

        match &result {
            Ok(()) => span.set_status(SpanStatus::Ok),
            Err(e) => span.set_status(SpanStatus::Error(e.to_string())),
        }

        #[cfg(feature = "otel")]
        {
            use crate::utils::metrics::{outcome_attrs, PUBLISH_DURATION, PUBLISH_TOTAL};
            let attrs = outcome_attrs(kind, result.is_ok());
            PUBLISH_TOTAL.add(1, &attrs);
            PUBLISH_DURATION.record(start.elapsed().as_secs_f64(), &attrs);
        }
        #[cfg(not(feature = "otel"))]
        let _ = start;

        span.end();
        result
    }

    async fn send(
        &self,
        kind: EventKind,
        payload: &Value,
        trace_context: TraceContext,
    ) -> Result<(), PublishError> {
        let queue = self.config.queue.as_str();
        let message = envelope::encode(kind, payload, Some(&trace_context))?;

        let mut conn = timeout(self.config.connect_timeout, self.broker.connect())
            .await
            .map_err(|_| PublishError::Timeout {
                operation: "connect",
                after: self.config.connect_timeout,
            })??;

        let sent = timeout(self.config.publish_timeout, async {
            conn.declare_queue(queue).await?;
            conn.publish(queue, message).await
        })
        .await;

        // Release on every path, including timeout. A close that stalls is
        // abandoned; dropping the connection releases it.
        match timeout(self.config.publish_timeout, conn.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(queue = %queue, error = %e, "Failed to close broker connection")
            }
            Err(_) => warn!(
                queue = %queue,
                after = ?self.config.publish_timeout,
                "Closing broker connection timed out, dropping it"
            ),
        }
        drop(conn);

        sent.map_err(|_| PublishError::Timeout {
            operation: "publish",
            after: self.config.publish_timeout,
        })??;

        debug!(queue = %queue, kind = %kind, "Published event");
        Ok(())
    }
}

#[cfg(test)]
mod tests;
