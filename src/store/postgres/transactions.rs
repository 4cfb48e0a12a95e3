//! Transaction store
//!
//! State transitions are compare-and-swap updates gated in SQL: the
//! `pending -> processing` claim matches on the current status, and every
//! other transition refuses to leave the terminal fixpoint
//! (`success`/`refund`/`timeout`).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::parse_stored;
use crate::domain::{Transaction, TransactionStatus};
use crate::store::{StoreError, TransactionStore};

pub struct PgTransactionStore {
    pool: PgPool,
}

impl PgTransactionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Distinguish "row missing" from "row terminal" after a gated update
    /// matched nothing.
    async fn gate_failure(&self, id: Uuid) -> StoreError {
        match self.get(id).await {
            Ok(trx) => StoreError::TerminalStatus {
                id,
                status: trx.status,
            },
            Err(e) => e,
        }
    }
}

const TRX_COLUMNS: &str = "id, trx_code, user_id, product_id, supplier_id, final_supplier_id, \
     destination_number, product_code, hpp, selling_price, admin_fee, status, serial_number, \
     supplier_message, supplier_trx_id, routing_attempts, created_at, updated_at, processed_at, \
     completed_at, notes";

const TERMINAL: &str = "('success', 'refund', 'timeout')";

fn row_to_transaction(row: &PgRow) -> Result<Transaction, StoreError> {
    let status: String = row.get("status");
    Ok(Transaction {
        id: row.get("id"),
        trx_code: row.get("trx_code"),
        user_id: row.get("user_id"),
        product_id: row.get("product_id"),
        supplier_id: row.get("supplier_id"),
        final_supplier_id: row.get("final_supplier_id"),
        destination_number: row.get("destination_number"),
        product_code: row.get("product_code"),
        hpp: row.get("hpp"),
        selling_price: row.get("selling_price"),
        admin_fee: row.get("admin_fee"),
        status: parse_stored(&status, TransactionStatus::from_str, "transaction status")?,
        serial_number: row.get("serial_number"),
        supplier_message: row.get("supplier_message"),
        supplier_trx_id: row.get("supplier_trx_id"),
        routing_attempts: row.get("routing_attempts"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        processed_at: row.get("processed_at"),
        completed_at: row.get("completed_at"),
        notes: row.get("notes"),
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

#[async_trait]
impl TransactionStore for PgTransactionStore {
    async fn create(&self, trx: &Transaction) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO transactions
                (id, trx_code, user_id, product_id, supplier_id, final_supplier_id,
                 destination_number, product_code, hpp, selling_price, admin_fee, status,
                 serial_number, supplier_message, supplier_trx_id, routing_attempts,
                 created_at, updated_at, processed_at, completed_at, notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                    $13, $14, $15, $16, $17, $18, $19, $20, $21)
            "#,
        )
        .bind(trx.id)
        .bind(&trx.trx_code)
        .bind(trx.user_id)
        .bind(trx.product_id)
        .bind(trx.supplier_id)
        .bind(trx.final_supplier_id)
        .bind(&trx.destination_number)
        .bind(&trx.product_code)
        .bind(trx.hpp)
        .bind(trx.selling_price)
        .bind(trx.admin_fee)
        .bind(trx.status.as_str())
        .bind(&trx.serial_number)
        .bind(&trx.supplier_message)
        .bind(&trx.supplier_trx_id)
        .bind(trx.routing_attempts)
        .bind(trx.created_at)
        .bind(trx.updated_at)
        .bind(trx.processed_at)
        .bind(trx.completed_at)
        .bind(&trx.notes)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => {
                Err(StoreError::DuplicateTrxCode(trx.trx_code.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: Uuid) -> Result<Transaction, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {TRX_COLUMNS} FROM transactions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::TransactionNotFound)?;
        row_to_transaction(&row)
    }

    async fn get_by_code(&self, trx_code: &str) -> Result<Transaction, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {TRX_COLUMNS} FROM transactions WHERE trx_code = $1"
        ))
        .bind(trx_code)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::TransactionNotFound)?;
        row_to_transaction(&row)
    }

    async fn update(&self, trx: &Transaction) -> Result<(), StoreError> {
        // Attempts never decrease and terminal rows only accept same-status
        // field updates.
        let result = sqlx::query(&format!(
            r#"
            UPDATE transactions SET
                supplier_id = $2, final_supplier_id = $3, status = $4,
                serial_number = $5, supplier_message = $6, supplier_trx_id = $7,
                routing_attempts = GREATEST(routing_attempts, $8),
                processed_at = $9, completed_at = $10, notes = $11, updated_at = NOW()
            WHERE id = $1 AND (status NOT IN {TERMINAL} OR status = $4)
            "#
        ))
        .bind(trx.id)
        .bind(trx.supplier_id)
        .bind(trx.final_supplier_id)
        .bind(trx.status.as_str())
        .bind(&trx.serial_number)
        .bind(&trx.supplier_message)
        .bind(&trx.supplier_trx_id)
        .bind(trx.routing_attempts)
        .bind(trx.processed_at)
        .bind(trx.completed_at)
        .bind(&trx.notes)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.gate_failure(trx.id).await);
        }
        Ok(())
    }

    async fn list_by_user(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Transaction>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {TRX_COLUMNS} FROM transactions WHERE user_id = $1 \
             ORDER BY created_at DESC LIMIT $2 OFFSET $3"
        ))
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_transaction).collect()
    }

    async fn list_by_status(
        &self,
        status: TransactionStatus,
    ) -> Result<Vec<Transaction>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {TRX_COLUMNS} FROM transactions WHERE status = $1 ORDER BY created_at"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_transaction).collect()
    }

    async fn list_expired(&self, ttl_minutes: i64) -> Result<Vec<Transaction>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {TRX_COLUMNS} FROM transactions \
             WHERE status NOT IN {TERMINAL} \
               AND created_at < NOW() - INTERVAL '1 minute' * $1 \
             ORDER BY created_at LIMIT 500"
        ))
        .bind(ttl_minutes)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_transaction).collect()
    }

    async fn list_by_date_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Transaction>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {TRX_COLUMNS} FROM transactions \
             WHERE created_at >= $1 AND created_at <= $2 ORDER BY created_at"
        ))
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_transaction).collect()
    }

    async fn mark_processing(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE transactions \
             SET status = 'processing', processed_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_status(&self, id: Uuid, status: TransactionStatus) -> Result<(), StoreError> {
        let result = sqlx::query(&format!(
            "UPDATE transactions SET status = $2, \
                 processed_at = CASE WHEN $2 = 'processing' THEN NOW() ELSE processed_at END, \
                 updated_at = NOW() \
             WHERE id = $1 AND (status NOT IN {TERMINAL} OR status = $2)"
        ))
        .bind(id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.gate_failure(id).await);
        }
        Ok(())
    }

    async fn update_status_if(
        &self,
        id: Uuid,
        expected: TransactionStatus,
        status: TransactionStatus,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(&format!(
            "UPDATE transactions SET status = $2, \
                 processed_at = CASE WHEN $2 = 'processing' THEN NOW() ELSE processed_at END, \
                 updated_at = NOW() \
             WHERE id = $1 AND status = $3 \
               AND (status NOT IN {TERMINAL} OR status = $2)"
        ))
        .bind(id)
        .bind(status.as_str())
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_completion(
        &self,
        id: Uuid,
        status: TransactionStatus,
        serial_number: Option<&str>,
        message: Option<&str>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(&format!(
            "UPDATE transactions SET status = $2, \
                 serial_number = COALESCE($3, serial_number), \
                 supplier_message = COALESCE($4, supplier_message), \
                 completed_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND (status NOT IN {TERMINAL} OR status = $2)"
        ))
        .bind(id)
        .bind(status.as_str())
        .bind(serial_number)
        .bind(message)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.gate_failure(id).await);
        }
        Ok(())
    }

    async fn increment_attempts(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE transactions \
             SET routing_attempts = routing_attempts + 1, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::TransactionNotFound);
        }
        Ok(())
    }
}
