//! Mutation store (read side)
//!
//! Ledger rows are written exclusively by [`crate::ledger::PgLedger`]; this
//! store only reads them.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::parse_stored;
use crate::domain::{Mutation, MutationKind, MutationRef, ReferenceKind};
use crate::store::{MutationStore, StoreError};

pub struct PgMutationStore {
    pool: PgPool,
}

impl PgMutationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const MUTATION_COLUMNS: &str = "id, user_id, type, amount, balance_before, balance_after, \
     description, reference_type, reference_id, created_at";

fn row_to_mutation(row: &PgRow) -> Result<Mutation, StoreError> {
    let kind: String = row.get("type");
    let reference = match (
        row.get::<Option<String>, _>("reference_type"),
        row.get::<Option<Uuid>, _>("reference_id"),
    ) {
        (Some(ref_kind), Some(ref_id)) => Some(MutationRef {
            kind: parse_stored(&ref_kind, ReferenceKind::from_str, "reference type")?,
            id: ref_id,
        }),
        _ => None,
    };

    Ok(Mutation {
        id: row.get("id"),
        user_id: row.get("user_id"),
        kind: parse_stored(&kind, MutationKind::from_str, "mutation type")?,
        amount: row.get("amount"),
        balance_before: row.get("balance_before"),
        balance_after: row.get("balance_after"),
        description: row.get("description"),
        reference,
        created_at: row.get("created_at"),
    })
}

#[async_trait]
impl MutationStore for PgMutationStore {
    async fn list_by_user(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Mutation>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {MUTATION_COLUMNS} FROM mutations WHERE user_id = $1 \
             ORDER BY created_at DESC LIMIT $2 OFFSET $3"
        ))
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_mutation).collect()
    }

    async fn list_by_reference(&self, reference: MutationRef) -> Result<Vec<Mutation>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {MUTATION_COLUMNS} FROM mutations \
             WHERE reference_type = $1 AND reference_id = $2 ORDER BY created_at"
        ))
        .bind(reference.kind.as_str())
        .bind(reference.id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_mutation).collect()
    }

    async fn current_balance(&self, user_id: Uuid) -> Result<Decimal, StoreError> {
        let balance = sqlx::query_scalar::<_, Decimal>(
            "SELECT balance_after FROM mutations WHERE user_id = $1 \
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(balance.unwrap_or(Decimal::ZERO))
    }
}
