//! In-memory broker for tests and single-process runs.
//!
//! Named queues held in process. Semantics follow the AMQP default exchange:
//! publishing to an undeclared queue silently drops the message, consuming an
//! undeclared queue fails, and a nacked message with requeue goes back to the
//! head of its queue marked as redelivered.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{Mutex, Notify};
use tracing::debug;

use super::{
    AckMode, Acknowledger, AutoAck, Broker, BrokerConnection, BusError, Delivery, DeliveryStream,
    Result,
};
use crate::envelope::TransportMessage;

/// Counters describing what the broker has seen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrokerStats {
    /// Messages accepted into a queue.
    pub published: usize,
    /// Messages published to a queue that did not exist or was closed.
    pub dropped: usize,
    /// Messages handed to consumers, redeliveries included.
    pub delivered: usize,
    /// Messages acknowledged, explicitly or by auto-ack.
    pub acked: usize,
    /// Messages nacked with requeue.
    pub requeued: usize,
    /// Messages nacked without requeue.
    pub rejected: usize,
}

struct Queued {
    message: TransportMessage,
    redelivered: bool,
}

#[derive(Default)]
struct QueueState {
    messages: VecDeque<Queued>,
    closed: bool,
}

#[derive(Default)]
struct Shared {
    queues: Mutex<HashMap<String, QueueState>>,
    stats: Mutex<BrokerStats>,
    notify: Notify,
    fail_on_connect: AtomicBool,
    fail_on_publish: AtomicBool,
    stall: AtomicBool,
    connects: AtomicUsize,
    open: AtomicUsize,
}

impl Shared {
    /// Wait for the next message on a queue. `None` once the queue is closed and drained.
    async fn next_message(&self, queue: &str) -> Option<Queued> {
        loop {
            // Register interest before checking so a concurrent publish can't slip between.
            let notified = self.notify.notified();
            {
                let mut queues = self.queues.lock().await;
                let state = queues.get_mut(queue)?;
                if let Some(queued) = state.messages.pop_front() {
                    return Some(queued);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }
}

/// In-memory connection provider.
///
/// Clones share the same queues, so a test can hand one clone to a publisher
/// and another to a consumer.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `connect` fail.
    pub fn set_fail_on_connect(&self, fail: bool) {
        self.shared.fail_on_connect.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent publish fail.
    pub fn set_fail_on_publish(&self, fail: bool) {
        self.shared.fail_on_publish.store(fail, Ordering::SeqCst);
    }

    /// Make publishes and closes hang forever, as on a dead wire.
    pub fn set_stall(&self, stall: bool) {
        self.shared.stall.store(stall, Ordering::SeqCst);
    }

    /// Declare a queue without opening a connection.
    pub async fn declare(&self, queue: &str) {
        self.shared
            .queues
            .lock()
            .await
            .entry(queue.to_string())
            .or_default();
    }

    /// Close a queue. Consumers drain what is left, then their streams end.
    pub async fn close_queue(&self, queue: &str) {
        if let Some(state) = self.shared.queues.lock().await.get_mut(queue) {
            state.closed = true;
        }
        self.shared.notify.notify_waiters();
    }

    /// Enqueue a raw message, declaring the queue if needed.
    pub async fn send(&self, queue: &str, message: TransportMessage) {
        self.shared
            .queues
            .lock()
            .await
            .entry(queue.to_string())
            .or_default()
            .messages
            .push_back(Queued {
                message,
                redelivered: false,
            });
        self.shared.stats.lock().await.published += 1;
        self.shared.notify.notify_waiters();
    }

    /// Messages waiting in a queue.
    pub async fn queue_len(&self, queue: &str) -> usize {
        self.shared
            .queues
            .lock()
            .await
            .get(queue)
            .map(|state| state.messages.len())
            .unwrap_or(0)
    }

    /// Copies of the messages waiting in a queue, head first.
    pub async fn peek(&self, queue: &str) -> Vec<TransportMessage> {
        self.shared
            .queues
            .lock()
            .await
            .get(queue)
            .map(|state| state.messages.iter().map(|q| q.message.clone()).collect())
            .unwrap_or_default()
    }

    pub async fn stats(&self) -> BrokerStats {
        self.shared.stats.lock().await.clone()
    }

    /// Connections opened so far.
    pub fn connect_count(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    /// Connections opened and not yet released.
    pub fn open_connections(&self) -> usize {
        self.shared.open.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn connect(&self) -> Result<Box<dyn BrokerConnection>> {
        if self.shared.fail_on_connect.load(Ordering::SeqCst) {
            return Err(BusError::Connection("Mock connection refused".to_string()));
        }
        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        self.shared.open.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(MemoryConnection {
            shared: Arc::clone(&self.shared),
            open: true,
        }))
    }
}

struct MemoryConnection {
    shared: Arc<Shared>,
    open: bool,
}

impl MemoryConnection {
    fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(BusError::Channel("Connection already closed".to_string()))
        }
    }

    async fn stall_if_dead(&self) {
        if self.shared.stall.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
    }

    fn release(&mut self) {
        if self.open {
            self.open = false;
            self.shared.open.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.release();
    }
}

#[async_trait]
impl BrokerConnection for MemoryConnection {
    async fn declare_queue(&mut self, queue: &str) -> Result<()> {
        self.ensure_open()?;
        self.shared
            .queues
            .lock()
            .await
            .entry(queue.to_string())
            .or_default();
        Ok(())
    }

    async fn publish(&mut self, queue: &str, message: TransportMessage) -> Result<()> {
        self.ensure_open()?;
        self.stall_if_dead().await;
        if self.shared.fail_on_publish.load(Ordering::SeqCst) {
            return Err(BusError::Publish("Mock publish failure".to_string()));
        }

        let accepted = match self.shared.queues.lock().await.get_mut(queue) {
            Some(state) if !state.closed => {
                state.messages.push_back(Queued {
                    message,
                    redelivered: false,
                });
                true
            }
            _ => false,
        };

        let mut stats = self.shared.stats.lock().await;
        if accepted {
            stats.published += 1;
            drop(stats);
            self.shared.notify.notify_waiters();
        } else {
            debug!(queue = %queue, "Unroutable message dropped");
            stats.dropped += 1;
        }
        Ok(())
    }

    async fn consume(&mut self, queue: &str, mode: AckMode) -> Result<DeliveryStream> {
        self.ensure_open()?;
        if !self.shared.queues.lock().await.contains_key(queue) {
            return Err(BusError::Consume(format!("Queue '{}' not declared", queue)));
        }

        let state = (Arc::clone(&self.shared), queue.to_string());
        let stream = futures::stream::unfold(state, move |(shared, queue)| async move {
            let Queued {
                message,
                redelivered,
            } = shared.next_message(&queue).await?;

            {
                let mut stats = shared.stats.lock().await;
                stats.delivered += 1;
                if mode == AckMode::Auto {
                    stats.acked += 1;
                }
            }

            let delivery = match mode {
                AckMode::Auto => Delivery::new(message, redelivered, AutoAck),
                AckMode::Manual => {
                    let acker = MemoryAcker {
                        shared: Arc::clone(&shared),
                        queue: queue.clone(),
                        message: message.clone(),
                        settled: AtomicBool::new(false),
                    };
                    Delivery::new(message, redelivered, acker)
                }
            };

            Some((Ok(delivery), (shared, queue)))
        });

        Ok(stream.boxed())
    }

    async fn close(&mut self) -> Result<()> {
        self.stall_if_dead().await;
        self.release();
        Ok(())
    }
}

struct MemoryAcker {
    shared: Arc<Shared>,
    queue: String,
    message: TransportMessage,
    settled: AtomicBool,
}

impl MemoryAcker {
    fn settle(&self) -> Result<()> {
        if self.settled.swap(true, Ordering::SeqCst) {
            return Err(BusError::Ack("Delivery already settled".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self) -> Result<()> {
        self.settle()?;
        self.shared.stats.lock().await.acked += 1;
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> Result<()> {
        self.settle()?;
        if requeue {
            if let Some(state) = self.shared.queues.lock().await.get_mut(&self.queue) {
                state.messages.push_front(Queued {
                    message: self.message.clone(),
                    redelivered: true,
                });
            }
            self.shared.stats.lock().await.requeued += 1;
            self.shared.notify.notify_waiters();
        } else {
            self.shared.stats.lock().await.rejected += 1;
        }
        Ok(())
    }
}
