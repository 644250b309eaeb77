//! productsync-catalog: Catalog HTTP server
//!
//! Serves the product catalog of record. Every create, update and delete is
//! published to the engagement service's queue.
//!
//! ## Configuration
//! - PRODUCTSYNC_CONFIG: Path to a YAML config file (optional)
//! - PRODUCTSYNC__SERVER__PORT: Port to listen on (default: 8000)
//! - RABBIT_MQ_URL: Broker URL

use std::sync::Arc;

use tracing::info;

use productsync::bus::init_broker;
use productsync::config::{Config, ServiceRole};
use productsync::http::{catalog_router, serve, CatalogState};
use productsync::publisher::{Publisher, PublisherConfig};
use productsync::storage::{self, CatalogStore, SqliteCatalogStore};
use productsync::telemetry::TracingSink;
use productsync::utils::bootstrap::init_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = Config::load(ServiceRole::Catalog, None)?;
    let _telemetry = init_tracing(&config.telemetry)?;

    let store = Arc::new(SqliteCatalogStore::new(
        storage::connect(&config.storage.url).await?,
    ));
    store.init().await?;

    let broker = init_broker(&config.messaging)?;
    let publisher = Publisher::new(
        broker,
        Arc::new(TracingSink::new()),
        PublisherConfig::from(&config.messaging.amqp),
    );

    let app = catalog_router(CatalogState { store, publisher });

    info!(
        port = config.server.port,
        publish_queue = %config.messaging.amqp.publish_queue,
        "productsync-catalog started"
    );

    tokio::select! {
        result = serve(app, &config.server) => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutdown signal received"),
    }

    Ok(())
}
