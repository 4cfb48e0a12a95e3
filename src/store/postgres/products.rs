//! Product store

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::parse_stored;
use crate::domain::{Product, ProductKind};
use crate::store::{ProductStore, StoreError};

pub struct PgProductStore {
    pool: PgPool,
}

impl PgProductStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const PRODUCT_COLUMNS: &str = "id, code, name, description, category, provider, type, \
     base_price, selling_price, min_price, min_transaction_amount, max_transaction_amount, \
     is_active, is_unlimited_stock, stock_quantity, created_at, updated_at";

fn row_to_product(row: &PgRow) -> Result<Product, StoreError> {
    let kind: String = row.get("type");
    Ok(Product {
        id: row.get("id"),
        code: row.get("code"),
        name: row.get("name"),
        description: row.get("description"),
        category: row.get("category"),
        provider: row.get("provider"),
        kind: parse_stored(&kind, ProductKind::from_str, "product type")?,
        base_price: row.get("base_price"),
        selling_price: row.get("selling_price"),
        min_price: row.get("min_price"),
        min_transaction_amount: row.get("min_transaction_amount"),
        max_transaction_amount: row.get("max_transaction_amount"),
        is_active: row.get("is_active"),
        is_unlimited_stock: row.get("is_unlimited_stock"),
        stock_quantity: row.get("stock_quantity"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[async_trait]
impl ProductStore for PgProductStore {
    async fn create(&self, product: &Product) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO products
                (id, code, name, description, category, provider, type,
                 base_price, selling_price, min_price, min_transaction_amount,
                 max_transaction_amount, is_active, is_unlimited_stock, stock_quantity,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(product.id)
        .bind(&product.code)
        .bind(&product.name)
        .bind(&product.description)
        .bind(&product.category)
        .bind(&product.provider)
        .bind(product.kind.as_str())
        .bind(product.base_price)
        .bind(product.selling_price)
        .bind(product.min_price)
        .bind(product.min_transaction_amount)
        .bind(product.max_transaction_amount)
        .bind(product.is_active)
        .bind(product.is_unlimited_stock)
        .bind(product.stock_quantity)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Product, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::ProductNotFound)?;
        row_to_product(&row)
    }

    async fn get_by_code(&self, code: &str) -> Result<Product, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE code = $1"
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::ProductNotFound)?;
        row_to_product(&row)
    }

    async fn list_active(&self) -> Result<Vec<Product>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE is_active ORDER BY code"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_product).collect()
    }
}
