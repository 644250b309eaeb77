use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{parse_identifier, parse_product, ApplyError, ProjectionApplier};
use crate::envelope::EventKind;
use crate::storage::ReplicaStore;

/// Keeps the engagement service's product replica in step with the catalog.
pub struct ReplicaProjection {
    store: Arc<dyn ReplicaStore>,
}

impl ReplicaProjection {
    pub fn new(store: Arc<dyn ReplicaStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ProjectionApplier for ReplicaProjection {
    async fn apply(&self, kind: EventKind, payload: &Value) -> Result<(), ApplyError> {
        match kind {
            EventKind::Created => {
                let product = parse_product(payload)?;
                self.store.insert_product(&product).await?;
                debug!(id = product.id, "Product created");
            }
            EventKind::Updated => {
                let product = parse_product(payload)?;
                self.store.update_product(&product).await?;
                debug!(id = product.id, "Product updated");
            }
            EventKind::Deleted => {
                let id = parse_identifier(payload)?;
                self.store.delete_product(id).await?;
                debug!(id, "Product deleted");
            }
            EventKind::Liked => return Err(ApplyError::UnsupportedKind(kind)),
        }
        Ok(())
    }
}
