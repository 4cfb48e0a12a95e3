//! Supplier store
//!
//! Metrics updates run as one row-locked statement: counters, success-rate
//! recompute, and the response-time EWMA all move together, so concurrent
//! attempts can never interleave a read-modify-write.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::domain::Supplier;
use crate::store::{StoreError, SupplierStore};

pub struct PgSupplierStore {
    pool: PgPool,
}

impl PgSupplierStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const SUPPLIER_COLUMNS: &str = "id, name, code, is_active, priority, timeout_seconds, \
     retry_attempts, balance, min_balance_threshold, success_rate, avg_response_time_ms, \
     total_transactions, failed_transactions, created_at, updated_at, last_checked_at, \
     last_success_at";

fn row_to_supplier(row: &PgRow) -> Result<Supplier, StoreError> {
    Ok(Supplier {
        id: row.get("id"),
        name: row.get("name"),
        code: row.get("code"),
        is_active: row.get("is_active"),
        priority: row.get("priority"),
        timeout_seconds: row.get::<i32, _>("timeout_seconds") as u32,
        retry_attempts: row.get::<i32, _>("retry_attempts") as u32,
        balance: row.get("balance"),
        min_balance_threshold: row.get("min_balance_threshold"),
        success_rate: row.get("success_rate"),
        avg_response_time_ms: row.get("avg_response_time_ms"),
        total_transactions: row.get("total_transactions"),
        failed_transactions: row.get("failed_transactions"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        last_checked_at: row.get("last_checked_at"),
        last_success_at: row.get("last_success_at"),
    })
}

#[async_trait]
impl SupplierStore for PgSupplierStore {
    async fn create(&self, supplier: &Supplier) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO suppliers
                (id, name, code, is_active, priority, timeout_seconds, retry_attempts,
                 balance, min_balance_threshold, success_rate, avg_response_time_ms,
                 total_transactions, failed_transactions, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(supplier.id)
        .bind(&supplier.name)
        .bind(&supplier.code)
        .bind(supplier.is_active)
        .bind(supplier.priority)
        .bind(supplier.timeout_seconds as i32)
        .bind(supplier.retry_attempts as i32)
        .bind(supplier.balance)
        .bind(supplier.min_balance_threshold)
        .bind(supplier.success_rate)
        .bind(supplier.avg_response_time_ms)
        .bind(supplier.total_transactions)
        .bind(supplier.failed_transactions)
        .bind(supplier.created_at)
        .bind(supplier.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Supplier, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {SUPPLIER_COLUMNS} FROM suppliers WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::SupplierNotFound)?;
        row_to_supplier(&row)
    }

    async fn get_by_code(&self, code: &str) -> Result<Supplier, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {SUPPLIER_COLUMNS} FROM suppliers WHERE code = $1"
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::SupplierNotFound)?;
        row_to_supplier(&row)
    }

    async fn list_active(&self) -> Result<Vec<Supplier>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {SUPPLIER_COLUMNS} FROM suppliers WHERE is_active ORDER BY priority, code"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_supplier).collect()
    }

    async fn update_metrics(
        &self,
        id: Uuid,
        success: bool,
        response_time_ms: i64,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE suppliers SET
                total_transactions = total_transactions + 1,
                failed_transactions = failed_transactions
                    + CASE WHEN $2 THEN 0 ELSE 1 END,
                success_rate =
                    (total_transactions + 1
                     - (failed_transactions + CASE WHEN $2 THEN 0 ELSE 1 END)) * 100.0
                    / (total_transactions + 1),
                avg_response_time_ms = CASE
                    WHEN avg_response_time_ms = 0 THEN $3
                    ELSE ROUND(avg_response_time_ms * 0.7 + $3 * 0.3)::bigint
                END,
                last_success_at = CASE WHEN $2 THEN NOW() ELSE last_success_at END,
                last_checked_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(success)
        .bind(response_time_ms)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::SupplierNotFound);
        }
        Ok(())
    }

    async fn get_balance(&self, id: Uuid) -> Result<Decimal, StoreError> {
        sqlx::query_scalar::<_, Decimal>("SELECT balance FROM suppliers WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::SupplierNotFound)
    }

    async fn update_balance(&self, id: Uuid, new_balance: Decimal) -> Result<(), StoreError> {
        let result =
            sqlx::query("UPDATE suppliers SET balance = $2, updated_at = NOW() WHERE id = $1")
                .bind(id)
                .bind(new_balance)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::SupplierNotFound);
        }
        Ok(())
    }
}
