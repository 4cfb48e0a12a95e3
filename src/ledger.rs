//! Ledger - atomic balance mutations
//!
//! The only writer of `mutations` rows. Every apply re-reads the live
//! balance, enforces the credit floor, appends exactly one double-entry row,
//! and materializes the new balance on the user - all inside one storage
//! transaction so no interleaved apply can observe a partial update.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{Mutation, MutationKind, MutationRef};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("mutation amount must be positive")]
    InvalidAmount,
    #[error("insufficient funds: spending power {available}, requested {requested}")]
    InsufficientFunds {
        available: Decimal,
        requested: Decimal,
    },
    #[error("user not found")]
    UserNotFound,
    #[error("ledger storage error: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        LedgerError::Storage(err.to_string())
    }
}

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Apply one balance mutation and return the appended row.
    ///
    /// `debit` adds to the balance, `credit` subtracts. A credit that would
    /// push the balance below the user's credit floor (zero, or
    /// `-credit_limit` when debt is allowed) fails with `InsufficientFunds`
    /// and leaves no partial state behind.
    async fn apply(
        &self,
        user_id: Uuid,
        kind: MutationKind,
        amount: Decimal,
        description: &str,
        reference: Option<MutationRef>,
    ) -> Result<Mutation, LedgerError>;
}

/// Postgres ledger. Serializes per user via `SELECT ... FOR UPDATE` on the
/// user row.
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Ledger for PgLedger {
    async fn apply(
        &self,
        user_id: Uuid,
        kind: MutationKind,
        amount: Decimal,
        description: &str,
        reference: Option<MutationRef>,
    ) -> Result<Mutation, LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }

        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT balance, credit_limit, allow_debt FROM users WHERE id = $1 FOR UPDATE",
        )
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(LedgerError::UserNotFound)?;

        let balance_before: Decimal = row.get("balance");
        let credit_limit: Decimal = row.get("credit_limit");
        let allow_debt: bool = row.get("allow_debt");

        let balance_after = balance_before + kind.signed(amount);

        if kind == MutationKind::Credit {
            let floor = if allow_debt {
                -credit_limit
            } else {
                Decimal::ZERO
            };
            if balance_after < floor {
                return Err(LedgerError::InsufficientFunds {
                    available: balance_before - floor,
                    requested: amount,
                });
            }
        }

        let mutation = Mutation {
            id: Uuid::new_v4(),
            user_id,
            kind,
            amount,
            balance_before,
            balance_after,
            description: description.to_string(),
            reference,
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO mutations
                (id, user_id, type, amount, balance_before, balance_after,
                 description, reference_type, reference_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(mutation.id)
        .bind(mutation.user_id)
        .bind(mutation.kind.as_str())
        .bind(mutation.amount)
        .bind(mutation.balance_before)
        .bind(mutation.balance_after)
        .bind(&mutation.description)
        .bind(mutation.reference.map(|r| r.kind.as_str()))
        .bind(mutation.reference.map(|r| r.id))
        .bind(mutation.created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE users SET balance = $2, updated_at = NOW() WHERE id = $1")
            .bind(user_id)
            .bind(balance_after)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::debug!(
            user_id = %user_id,
            kind = kind.as_str(),
            amount = %amount,
            balance_after = %balance_after,
            "ledger mutation applied"
        );

        Ok(mutation)
    }
}
