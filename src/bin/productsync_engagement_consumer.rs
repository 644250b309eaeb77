//! productsync-engagement-consumer: keeps the product replica in step
//!
//! Consumes the engagement service's queue (default `main`) and applies
//! product created, updated and deleted events to the replica.
//!
//! ## Configuration
//! - PRODUCTSYNC__CONSUMER__ACK_POLICY: `ack-before-apply` (default) or `ack-after-apply`
//! - RABBIT_MQ_URL: Broker URL

use std::sync::Arc;

use tracing::info;

use productsync::bus::init_broker;
use productsync::config::{Config, ServiceRole};
use productsync::consumer::Consumer;
use productsync::projection::ReplicaProjection;
use productsync::storage::{self, ReplicaStore, SqliteReplicaStore};
use productsync::telemetry::TracingSink;
use productsync::utils::bootstrap::init_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = Config::load(ServiceRole::Engagement, None)?;
    let _telemetry = init_tracing(&config.telemetry)?;

    let store = Arc::new(SqliteReplicaStore::new(
        storage::connect(&config.storage.url).await?,
    ));
    store.init().await?;

    let consumer = Consumer::new(
        init_broker(&config.messaging)?,
        Arc::new(ReplicaProjection::new(store)),
        Arc::new(TracingSink::new()),
        config.messaging.amqp.consume_queue.clone(),
    )
    .with_ack_policy(config.consumer.ack_policy);

    info!(
        queue = %consumer.queue(),
        ack_policy = ?consumer.ack_policy(),
        "productsync-engagement-consumer started"
    );

    tokio::select! {
        result = consumer.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutdown signal received"),
    }

    Ok(())
}
