//! Database schema definitions using sea-query.
//!
//! Table and column identifiers for query building, plus the DDL each store
//! runs from `init`.

use sea_query::Iden;

/// Products table. Catalog rows carry `likes`; replica rows do not.
#[derive(Iden)]
pub enum Products {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "title"]
    Title,
    #[iden = "image"]
    Image,
    #[iden = "likes"]
    Likes,
}

/// Engagements table (one row per user like).
#[derive(Iden)]
pub enum Engagements {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "user_id"]
    UserId,
    #[iden = "product_id"]
    ProductId,
}

/// Catalog products. The catalog owns the id space.
pub const CREATE_CATALOG_PRODUCTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS products (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    image TEXT NOT NULL,
    likes INTEGER NOT NULL DEFAULT 0
);
"#;

/// Replica products. Ids are assigned by the catalog, never generated here.
pub const CREATE_REPLICA_PRODUCTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS products (
    id INTEGER PRIMARY KEY,
    title TEXT NOT NULL,
    image TEXT NOT NULL
);
"#;

pub const CREATE_ENGAGEMENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS engagements (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    product_id INTEGER NOT NULL,
    UNIQUE (user_id, product_id)
);
"#;
