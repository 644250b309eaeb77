//! HTTP surfaces for both services.
//!
//! - `catalog`: product CRUD plus the user-id stub
//! - `engagement`: replica listing and likes
//!
//! Mutating handlers write their own store first, then publish the change.
//! Publishing never fails a request.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::json;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::storage::StoreError;

pub mod catalog;
pub mod engagement;
pub mod users;

pub use catalog::{catalog_router, CatalogState};
pub use engagement::{engagement_router, EngagementState};
pub use users::{HttpUserDirectory, UserDirectory, UserLookupError};

/// Errors a handler turns into a response.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    UserLookup(#[from] UserLookupError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Store(StoreError::NotFound(_)) => (StatusCode::NOT_FOUND, self.to_string()),
            ApiError::Store(StoreError::Duplicate(_)) => (
                StatusCode::BAD_REQUEST,
                "You already liked this product.".to_string(),
            ),
            ApiError::Store(StoreError::Database(e)) => {
                error!(error = %e, "store request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            ApiError::UserLookup(e) => {
                error!(error = %e, "user lookup failed");
                (StatusCode::BAD_GATEWAY, self.to_string())
            }
        };

        (status, Json(json!({ "message": message }))).into_response()
    }
}

/// Readiness probe.
pub async fn ready() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Bind and serve a router until the server stops.
///
/// With port 0 the OS picks one; the bound address is logged either way.
pub async fn serve(
    app: Router,
    config: &ServerConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = tokio::net::TcpListener::bind(config.bind_address()).await?;
    let addr = listener.local_addr()?;
    info!(address = %addr, "HTTP server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
