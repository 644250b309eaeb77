use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{parse_identifier, ApplyError, ProjectionApplier};
use crate::envelope::EventKind;
use crate::storage::CatalogStore;

/// Counts likes reported by the engagement service against catalog products.
pub struct LikesProjection {
    store: Arc<dyn CatalogStore>,
}

impl LikesProjection {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ProjectionApplier for LikesProjection {
    async fn apply(&self, kind: EventKind, payload: &Value) -> Result<(), ApplyError> {
        if kind != EventKind::Liked {
            return Err(ApplyError::UnsupportedKind(kind));
        }

        let id = parse_identifier(payload)?;
        let likes = self.store.increment_likes(id).await?;
        debug!(id, likes, "Product likes increased");
        Ok(())
    }
}
