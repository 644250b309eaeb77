//! Projection appliers.
//!
//! An applier turns one decoded event into one mutation of the owning
//! service's store. Each service owns a subset of event kinds:
//! - `ReplicaProjection` (engagement): created, updated, deleted
//! - `LikesProjection` (catalog): liked

mod likes;
mod replica;

use async_trait::async_trait;
use serde_json::Value;

use crate::envelope::EventKind;
use crate::storage::{Product, StoreError};

pub use likes::LikesProjection;
pub use replica::ReplicaProjection;

/// Errors applying an event.
#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error("Product {0} not found")]
    NotFound(i64),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Unsupported event kind: {0}")]
    UnsupportedKind(EventKind),

    #[error("Store error: {0}")]
    Store(StoreError),
}

impl ApplyError {
    /// Transient failures may succeed on redelivery; everything else never will.
    pub fn is_transient(&self) -> bool {
        matches!(self, ApplyError::Store(_))
    }
}

impl From<StoreError> for ApplyError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => ApplyError::NotFound(id),
            StoreError::Duplicate(msg) => ApplyError::ConstraintViolation(msg),
            e @ StoreError::Database(_) => ApplyError::Store(e),
        }
    }
}

/// Maps an event to a local mutation.
#[async_trait]
pub trait ProjectionApplier: Send + Sync {
    async fn apply(&self, kind: EventKind, payload: &Value) -> Result<(), ApplyError>;
}

/// Read a bare identifier. Numbers and numeric strings are both accepted.
pub fn parse_identifier(payload: &Value) -> Result<i64, ApplyError> {
    match payload {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| ApplyError::InvalidPayload(format!("identifier {} is not an integer", n))),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| ApplyError::InvalidPayload(format!("identifier {:?} is not numeric", s))),
        other => Err(ApplyError::InvalidPayload(format!(
            "expected identifier, got {}",
            other
        ))),
    }
}

/// Read a `{id, title, image}` product. Extra fields (such as `likes`) are ignored.
pub fn parse_product(payload: &Value) -> Result<Product, ApplyError> {
    let object = payload
        .as_object()
        .ok_or_else(|| ApplyError::InvalidPayload(format!("expected product, got {}", payload)))?;

    let id = object
        .get("id")
        .ok_or_else(|| ApplyError::InvalidPayload("product has no id".to_string()))
        .and_then(parse_identifier)?;

    let field = |name: &str| {
        object
            .get(name)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ApplyError::InvalidPayload(format!("product has no {}", name)))
    };

    Ok(Product {
        id,
        title: field("title")?,
        image: field("image")?,
    })
}

#[cfg(test)]
mod tests;
