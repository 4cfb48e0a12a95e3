//! Product mapping store

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::parse_stored;
use crate::domain::{ProductMapping, StockStatus};
use crate::store::{MappingStore, StoreError};

pub struct PgMappingStore {
    pool: PgPool,
}

impl PgMappingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const MAPPING_COLUMNS: &str = "id, product_id, supplier_id, supplier_product_code, \
     supplier_price, additional_fee, priority, is_active, stock_status, success_count, \
     failure_count, last_success_at, last_failure_at, created_at, updated_at";

fn row_to_mapping(row: &PgRow) -> Result<ProductMapping, StoreError> {
    let stock_status: String = row.get("stock_status");
    Ok(ProductMapping {
        id: row.get("id"),
        product_id: row.get("product_id"),
        supplier_id: row.get("supplier_id"),
        supplier_product_code: row.get("supplier_product_code"),
        supplier_price: row.get("supplier_price"),
        additional_fee: row.get("additional_fee"),
        priority: row.get("priority"),
        is_active: row.get("is_active"),
        stock_status: parse_stored(&stock_status, StockStatus::from_str, "stock status")?,
        success_count: row.get("success_count"),
        failure_count: row.get("failure_count"),
        last_success_at: row.get("last_success_at"),
        last_failure_at: row.get("last_failure_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[async_trait]
impl MappingStore for PgMappingStore {
    async fn create(&self, mapping: &ProductMapping) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO product_mappings
                (id, product_id, supplier_id, supplier_product_code, supplier_price,
                 additional_fee, priority, is_active, stock_status, success_count,
                 failure_count, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(mapping.id)
        .bind(mapping.product_id)
        .bind(mapping.supplier_id)
        .bind(&mapping.supplier_product_code)
        .bind(mapping.supplier_price)
        .bind(mapping.additional_fee)
        .bind(mapping.priority)
        .bind(mapping.is_active)
        .bind(mapping.stock_status.as_str())
        .bind(mapping.success_count)
        .bind(mapping.failure_count)
        .bind(mapping.created_at)
        .bind(mapping.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn active_mappings(&self, product_id: Uuid) -> Result<Vec<ProductMapping>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {MAPPING_COLUMNS} FROM product_mappings \
             WHERE product_id = $1 AND is_active \
             ORDER BY priority ASC, supplier_price ASC"
        ))
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_mapping).collect()
    }

    async fn record_result(&self, mapping_id: Uuid, success: bool) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE product_mappings SET
                success_count = success_count + CASE WHEN $2 THEN 1 ELSE 0 END,
                failure_count = failure_count + CASE WHEN $2 THEN 0 ELSE 1 END,
                last_success_at = CASE WHEN $2 THEN NOW() ELSE last_success_at END,
                last_failure_at = CASE WHEN $2 THEN last_failure_at ELSE NOW() END,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(mapping_id)
        .bind(success)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::ProductNotFound);
        }
        Ok(())
    }
}
