//! Broker connection seam.
//!
//! This module contains:
//! - `Broker` trait: connection provider, one connection per publish or consume session
//! - `BrokerConnection` trait: queue declare, publish, consume
//! - `Delivery` and `Acknowledger`: inbound messages and how they are settled
//! - Implementations: AMQP (RabbitMQ), in-memory

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::config::MessagingConfig;
use crate::envelope::TransportMessage;

// Implementation modules
#[cfg(feature = "amqp")]
pub mod amqp;
pub mod memory;

// Re-exports
#[cfg(feature = "amqp")]
pub use amqp::{AmqpBroker, AmqpConfig};
pub use memory::InMemoryBroker;

// ============================================================================
// Traits
// ============================================================================

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur talking to the broker.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Consume failed: {0}")]
    Consume(String),

    #[error("Acknowledgment failed: {0}")]
    Ack(String),

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("Queue '{0}' is closed")]
    QueueClosed(String),
}

/// How deliveries on a consume session are acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    /// The broker considers a message acknowledged as soon as it is delivered.
    Auto,
    /// The consumer must ack or nack each delivery.
    Manual,
}

/// Settles a single delivery with the broker.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> Result<()>;

    /// Negative acknowledgment. With `requeue` the broker redelivers the message.
    async fn nack(&self, requeue: bool) -> Result<()>;
}

/// Acknowledger for auto-ack sessions; the broker already settled the message.
pub struct AutoAck;

#[async_trait]
impl Acknowledger for AutoAck {
    async fn ack(&self) -> Result<()> {
        Ok(())
    }

    async fn nack(&self, _requeue: bool) -> Result<()> {
        Ok(())
    }
}

/// A message received from a queue.
pub struct Delivery {
    pub message: TransportMessage,
    /// Set when the broker has delivered this message before.
    pub redelivered: bool,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(
        message: TransportMessage,
        redelivered: bool,
        acker: impl Acknowledger + 'static,
    ) -> Self {
        Self {
            message,
            redelivered,
            acker: Box::new(acker),
        }
    }

    pub async fn ack(&self) -> Result<()> {
        self.acker.ack().await
    }

    pub async fn nack(&self, requeue: bool) -> Result<()> {
        self.acker.nack(requeue).await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("message", &self.message)
            .field("redelivered", &self.redelivered)
            .finish_non_exhaustive()
    }
}

/// Stream of deliveries from a consume session. Ends when the broker closes it.
pub type DeliveryStream = BoxStream<'static, Result<Delivery>>;

/// Connection provider.
///
/// Each call yields a fresh connection (or a pooled one, implementation's
/// choice). Callers release it with `close` when done.
///
/// Implementations:
/// - `AmqpBroker`: RabbitMQ via AMQP, per-call or pooled
/// - `InMemoryBroker`: in-process queues for tests and local runs
#[async_trait]
pub trait Broker: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn BrokerConnection>>;
}

/// An open broker connection with one channel.
#[async_trait]
pub trait BrokerConnection: Send {
    /// Declare a durable queue. Idempotent.
    async fn declare_queue(&mut self, queue: &str) -> Result<()>;

    /// Send a message through the default exchange, routed by queue name.
    async fn publish(&mut self, queue: &str, message: TransportMessage) -> Result<()>;

    /// Start consuming a queue.
    async fn consume(&mut self, queue: &str, mode: AckMode) -> Result<DeliveryStream>;

    /// Release the connection.
    async fn close(&mut self) -> Result<()>;
}

// ============================================================================
// Factory
// ============================================================================

/// Initialize the broker connection provider from configuration.
///
/// Requires the `amqp` feature.
pub fn init_broker(
    config: &MessagingConfig,
) -> std::result::Result<Arc<dyn Broker>, Box<dyn std::error::Error + Send + Sync>> {
    #[cfg(feature = "amqp")]
    {
        let broker = AmqpBroker::new(AmqpConfig::from(&config.amqp))?;
        tracing::info!(
            pooled = config.amqp.pool_size.is_some(),
            "Broker initialized"
        );
        Ok(Arc::new(broker))
    }

    #[cfg(not(feature = "amqp"))]
    {
        let _ = config;
        Err("AMQP support requires the 'amqp' feature. Rebuild with --features amqp".into())
    }
}
