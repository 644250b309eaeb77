//! productsync-engagement: Engagement HTTP server
//!
//! Serves the replicated product list and records likes. Each like is
//! published to the catalog's queue.
//!
//! ## Configuration
//! - PRODUCTSYNC_CONFIG: Path to a YAML config file (optional)
//! - PRODUCTSYNC__SERVER__PORT: Port to listen on (default: 5000)
//! - PRODUCTSYNC__USERS__URL: Endpoint returning the current user id
//! - RABBIT_MQ_URL: Broker URL

use std::sync::Arc;

use tracing::info;

use productsync::bus::init_broker;
use productsync::config::{Config, ServiceRole};
use productsync::http::{engagement_router, serve, EngagementState, HttpUserDirectory};
use productsync::publisher::{Publisher, PublisherConfig};
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

    let broker = init_broker(&config.messaging)?;
    let publisher = Publisher::new(
        broker,
        Arc::new(TracingSink::new()),
        PublisherConfig::from(&config.messaging.amqp),
    );

    let app = engagement_router(EngagementState {
        store,
        users: Arc::new(HttpUserDirectory::new(&config.users)?),
        publisher,
    });

    info!(
        port = config.server.port,
        publish_queue = %config.messaging.amqp.publish_queue,
        users = %config.users.url,
        "productsync-engagement started"
    );

    tokio::select! {
        result = serve(app, &config.server) => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutdown signal received"),
    }

    Ok(())
}
