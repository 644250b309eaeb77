//! SQLite ReplicaStore implementation.

use async_trait::async_trait;
use sea_query::{Expr, OnConflict, Order, Query, SqliteQueryBuilder};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::storage::schema::{
    Engagements, Products, CREATE_ENGAGEMENTS_TABLE, CREATE_REPLICA_PRODUCTS_TABLE,
};
use crate::storage::{Engagement, Product, ReplicaStore, Result, StoreError};

/// SQLite implementation of ReplicaStore.
pub struct SqliteReplicaStore {
    pool: SqlitePool,
}

impl SqliteReplicaStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn from_row(row: &SqliteRow) -> Product {
        Product {
            id: row.get("id"),
            title: row.get("title"),
            image: row.get("image"),
        }
    }
}

#[async_trait]
impl ReplicaStore for SqliteReplicaStore {
    async fn init(&self) -> Result<()> {
        sqlx::query(CREATE_REPLICA_PRODUCTS_TABLE)
            .execute(&self.pool)
            .await?;
        sqlx::query(CREATE_ENGAGEMENTS_TABLE)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_products(&self) -> Result<Vec<Product>> {
        let query = Query::select()
            .columns([Products::Id, Products::Title, Products::Image])
            .from(Products::Table)
            .order_by(Products::Id, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(Self::from_row).collect())
    }

    async fn get_product(&self, id: i64) -> Result<Product> {
        let query = Query::select()
            .columns([Products::Id, Products::Title, Products::Image])
            .from(Products::Table)
            .and_where(Expr::col(Products::Id).eq(id))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        row.as_ref()
            .map(Self::from_row)
            .ok_or(StoreError::NotFound(id))
    }

    async fn insert_product(&self, product: &Product) -> Result<()> {
        let query = Query::insert()
            .into_table(Products::Table)
            .columns([Products::Id, Products::Title, Products::Image])
            .values_panic([
                product.id.into(),
                product.title.clone().into(),
                product.image.clone().into(),
            ])
            .on_conflict(OnConflict::column(Products::Id).do_nothing().to_owned())
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Duplicate(format!(
                "product {} already exists",
                product.id
            )));
        }
        Ok(())
    }

    async fn update_product(&self, product: &Product) -> Result<()> {
        let query = Query::update()
            .table(Products::Table)
            .values([
                (Products::Title, product.title.clone().into()),
                (Products::Image, product.image.clone().into()),
            ])
            .and_where(Expr::col(Products::Id).eq(product.id))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(product.id));
        }
        Ok(())
    }

    async fn delete_product(&self, id: i64) -> Result<()> {
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

    async fn record_engagement(&self, user_id: i64, product_id: i64) -> Result<Engagement> {
        let query = Query::insert()
            .into_table(Engagements::Table)
            .columns([Engagements::UserId, Engagements::ProductId])
            .values_panic([user_id.into(), product_id.into()])
            .on_conflict(
                OnConflict::columns([Engagements::UserId, Engagements::ProductId])
                    .do_nothing()
                    .to_owned(),
            )
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Duplicate(format!(
                "user {} already liked product {}",
                user_id, product_id
            )));
        }

        Ok(Engagement {
            id: result.last_insert_rowid(),
            user_id,
            product_id,
        })
    }
}
