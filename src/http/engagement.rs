//! Engagement HTTP API: the replicated product list and likes.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::info;

use super::{ready, ApiError, UserDirectory};
use crate::envelope::EventKind;
use crate::publisher::Publisher;
use crate::storage::{Product, ReplicaStore};

#[derive(Clone)]
pub struct EngagementState {
    pub store: Arc<dyn ReplicaStore>,
    pub users: Arc<dyn UserDirectory>,
    pub publisher: Publisher,
}

pub fn engagement_router(state: EngagementState) -> Router {
    Router::new()
        .route("/api/products", get(list_products))
        .route("/api/products/{id}/like", post(like_product))
        .route("/ready", get(ready))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tracing::instrument(name = "list_products", skip_all)]
async fn list_products(
    State(state): State<EngagementState>,
) -> Result<Json<Vec<Product>>, ApiError> {
    Ok(Json(state.store.list_products().await?))
}

/// Record a like and tell the catalog to count it.
///
/// The product is not checked against the replica; the catalog decides
/// whether the id exists when it applies the like.
#[tracing::instrument(name = "like_product", skip_all, fields(product_id = id))]
async fn like_product(
    State(state): State<EngagementState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let user_id = state.users.current_user().await?;
    state.store.record_engagement(user_id, id).await?;
    info!(user_id, "Like recorded");

    state.publisher.publish(EventKind::Liked, &json!(id)).await;
    Ok(Json(json!({ "message": "success" })))
}
