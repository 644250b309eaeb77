//! Storage for both services.
//!
//! - `CatalogStore`: the catalog of record (products with like counters)
//! - `ReplicaStore`: the engagement service's product replica and likes
//!
//! Both are SQLite-backed, built with sea-query and executed with sqlx.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

pub mod schema;
pub mod sqlite;

pub use sqlite::{SqliteCatalogStore, SqliteReplicaStore};

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors from a store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Product {0} not found")]
    NotFound(i64),

    #[error("Duplicate record: {0}")]
    Duplicate(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Duplicate(db.message().to_string())
            }
            _ => StoreError::Database(e),
        }
    }
}

/// A product as the replica holds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub title: String,
    pub image: String,
}

/// A product as the catalog holds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogProduct {
    pub id: i64,
    pub title: String,
    pub image: String,
    pub likes: i64,
}

/// Fields a client supplies when creating or updating a catalog product.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewProduct {
    pub title: String,
    pub image: String,
}

/// One user's like of one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Engagement {
    pub id: i64,
    pub user_id: i64,
    pub product_id: i64,
}

/// Catalog of record.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Create tables if they don't exist.
    async fn init(&self) -> Result<()>;

    async fn list(&self) -> Result<Vec<CatalogProduct>>;

    async fn get(&self, id: i64) -> Result<CatalogProduct>;

    /// Insert a product; the store assigns the id.
    async fn create(&self, product: NewProduct) -> Result<CatalogProduct>;

    async fn update(&self, id: i64, product: NewProduct) -> Result<CatalogProduct>;

    async fn delete(&self, id: i64) -> Result<()>;

    /// Add one like. Returns the new count.
    async fn increment_likes(&self, id: i64) -> Result<i64>;
}

/// Engagement service store: replicated products plus engagement records.
#[async_trait]
pub trait ReplicaStore: Send + Sync {
    /// Create tables if they don't exist.
    async fn init(&self) -> Result<()>;

    async fn list_products(&self) -> Result<Vec<Product>>;

    async fn get_product(&self, id: i64) -> Result<Product>;

    /// Insert with the caller's id. An existing id is `Duplicate`.
    async fn insert_product(&self, product: &Product) -> Result<()>;

    async fn update_product(&self, product: &Product) -> Result<()>;

    async fn delete_product(&self, id: i64) -> Result<()>;

    /// Record a like. A second like for the same pair is `Duplicate`.
    async fn record_engagement(&self, user_id: i64, product_id: i64) -> Result<Engagement>;
}

/// Open a SQLite pool.
///
/// `sqlite::memory:` (or `:memory:`) gets a single connection so every query
/// sees the same database.
pub async fn connect(url: &str) -> Result<SqlitePool> {
    let in_memory = url.contains(":memory:");
    let pool = if in_memory {
        let opts = SqliteConnectOptions::new()
            .filename(":memory:")
            .create_if_missing(true);
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?
    } else {
        SqlitePool::connect(url).await?
    };

    info!(url = %url, in_memory, "Connected to SQLite");
    Ok(pool)
}
