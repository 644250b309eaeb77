//! productsync-catalog-consumer: applies likes to the catalog
//!
//! Consumes the catalog's queue (default `admin`) and increments the like
//! counter for every `product_liked` event. Exits when the stream ends or on
//! Ctrl-C; a broker that is unreachable at startup is fatal.
//!
//! ## Configuration
//! - PRODUCTSYNC__CONSUMER__ACK_POLICY: `ack-before-apply` (default) or `ack-after-apply`
//! - RABBIT_MQ_URL: Broker URL

use std::sync::Arc;

use tracing::info;

use productsync::bus::init_broker;
use productsync::config::{Config, ServiceRole};
use productsync::consumer::Consumer;
use productsync::projection::LikesProjection;
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

    let consumer = Consumer::new(
        init_broker(&config.messaging)?,
        Arc::new(LikesProjection::new(store)),
        Arc::new(TracingSink::new()),
        config.messaging.amqp.consume_queue.clone(),
    )
    .with_ack_policy(config.consumer.ack_policy);

    info!(
        queue = %consumer.queue(),
        ack_policy = ?consumer.ack_policy(),
        "productsync-catalog-consumer started"
    );

    tokio::select! {
        result = consumer.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutdown signal received"),
    }

    Ok(())
}
