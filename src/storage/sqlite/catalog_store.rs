//! SQLite CatalogStore implementation.

use async_trait::async_trait;
use sea_query::{Expr, Order, Query, SqliteQueryBuilder};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::storage::schema::{Products, CREATE_CATALOG_PRODUCTS_TABLE};
use crate::storage::{CatalogProduct, CatalogStore, NewProduct, Result, StoreError};

/// SQLite implementation of CatalogStore.
pub struct SqliteCatalogStore {
    pool: SqlitePool,
}

impl SqliteCatalogStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn from_row(row: &SqliteRow) -> CatalogProduct {
        CatalogProduct {
            id: row.get("id"),
            title: row.get("title"),
            image: row.get("image"),
            likes: row.get("likes"),
        }
    }
}

#[async_trait]
impl CatalogStore for SqliteCatalogStore {
    async fn init(&self) -> Result<()> {
        sqlx::query(CREATE_CATALOG_PRODUCTS_TABLE)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<CatalogProduct>> {
        let query = Query::select()
            .columns([
                Products::Id,
                Products::Title,
                Products::Image,
                Products::Likes,
            ])
            .from(Products::Table)
            .order_by(Products::Id, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(Self::from_row).collect())
    }

    async fn get(&self, id: i64) -> Result<CatalogProduct> {
        let query = Query::select()
            .columns([
                Products::Id,
                Products::Title,
                Products::Image,
                Products::Likes,
            ])
            .from(Products::Table)
            .and_where(Expr::col(Products::Id).eq(id))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        row.as_ref()
            .map(Self::from_row)
            .ok_or(StoreError::NotFound(id))
    }

    async fn create(&self, product: NewProduct) -> Result<CatalogProduct> {
        let query = Query::insert()
            .into_table(Products::Table)
            .columns([Products::Title, Products::Image])
            .values_panic([product.title.clone().into(), product.image.clone().into()])
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;

        Ok(CatalogProduct {
            id: result.last_insert_rowid(),
            title: product.title,
            image: product.image,
            likes: 0,
        })
    }

    async fn update(&self, id: i64, product: NewProduct) -> Result<CatalogProduct> {
        let query = Query::update()
            .table(Products::Table)
            .values([
                (Products::Title, product.title.into()),
                (Products::Image, product.image.into()),
            ])
            .and_where(Expr::col(Products::Id).eq(id))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }

        self.get(id).await
    }

    async fn delete(&self, id: i64) -> Result<()> {
        let query = Query::delete()
            .from_table(Products::Table)
            .and_where(Expr::col(Products::Id).eq(id))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn increment_likes(&self, id: i64) -> Result<i64> {
        let update = Query::update()
            .table(Products::Table)
            .value(Products::Likes, Expr::col(Products::Likes).add(1))
            .and_where(Expr::col(Products::Id).eq(id))
            .to_string(SqliteQueryBuilder);

        let select = Query::select()
            .column(Products::Likes)
            .from(Products::Table)
            .and_where(Expr::col(Products::Id).eq(id))
            .to_string(SqliteQueryBuilder);

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(&update).execute(&mut *tx).await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        let likes: i64 = sqlx::query(&select).fetch_one(&mut *tx).await?.get(0);

        tx.commit().await?;
        Ok(likes)
    }
}
