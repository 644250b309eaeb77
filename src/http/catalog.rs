//! Catalog HTTP API.
//!
//! Endpoints:
//! - `GET /api/products`, `POST /api/products`
//! - `GET|PUT|DELETE /api/products/{id}`
//! - `GET /api/user`: a random user id
//! - `GET /ready`

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::info;

use super::{ready, ApiError};
use crate::envelope::EventKind;
use crate::publisher::Publisher;
use crate::storage::{CatalogProduct, CatalogStore, NewProduct};

/// Upper bound for ids handed out by `/api/user`.
const MAX_USER_ID: i64 = 10_000;

#[derive(Clone)]
pub struct CatalogState {
    pub store: Arc<dyn CatalogStore>,
    pub publisher: Publisher,
}

pub fn catalog_router(state: CatalogState) -> Router {
    Router::new()
        .route("/api/products", get(list_products).post(create_product))
        .route(
            "/api/products/{id}",
            get(get_product).put(update_product).delete(delete_product),
        )
        .route("/api/user", get(random_user))
        .route("/ready", get(ready))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tracing::instrument(name = "list_products", skip_all)]
async fn list_products(
    State(state): State<CatalogState>,
) -> Result<Json<Vec<CatalogProduct>>, ApiError> {
    Ok(Json(state.store.list().await?))
}

#[tracing::instrument(name = "create_product", skip_all)]
async fn create_product(
    State(state): State<CatalogState>,
    Json(body): Json<NewProduct>,
) -> Result<(StatusCode, Json<CatalogProduct>), ApiError> {
    let product = state.store.create(body).await?;
    info!(product_id = product.id, "Product created");

    state
        .publisher
        .publish(EventKind::Created, &json!(product))
        .await;
    Ok((StatusCode::CREATED, Json(product)))
}

#[tracing::instrument(name = "get_product", skip_all, fields(product_id = id))]
async fn get_product(
    State(state): State<CatalogState>,
    Path(id): Path<i64>,
) -> Result<Json<CatalogProduct>, ApiError> {
    Ok(Json(state.store.get(id).await?))
}

#[tracing::instrument(name = "update_product", skip_all, fields(product_id = id))]
async fn update_product(
    State(state): State<CatalogState>,
    Path(id): Path<i64>,
    Json(body): Json<NewProduct>,
) -> Result<(StatusCode, Json<CatalogProduct>), ApiError> {
    let product = state.store.update(id, body).await?;

    state
        .publisher
        .publish(EventKind::Updated, &json!(product))
        .await;
    Ok((StatusCode::ACCEPTED, Json(product)))
}

#[tracing::instrument(name = "delete_product", skip_all, fields(product_id = id))]
async fn delete_product(
    State(state): State<CatalogState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.store.delete(id).await?;
    info!("Product deleted");

    // Consumers accept the id as a number or a numeric string.
    state
        .publisher
        .publish(EventKind::Deleted, &Value::String(id.to_string()))
        .await;
    Ok(StatusCode::NO_CONTENT)
}

async fn random_user() -> Json<Value> {
    Json(json!({ "id": rand::random_range(1..=MAX_USER_ID) }))
}
