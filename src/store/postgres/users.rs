//! User store

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::parse_stored;
use crate::domain::{User, UserLevel};
use crate::store::{StoreError, UserStore};

pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const USER_COLUMNS: &str = "id, username, email, full_name, phone, upline_id, level, is_active, \
     balance, credit_limit, markup_percentage, allow_debt, max_daily_transaction, \
     created_at, updated_at";

fn row_to_user(row: &PgRow) -> Result<User, StoreError> {
    let level: String = row.get("level");
    Ok(User {
        id: row.get("id"),
        username: row.get("username"),
        email: row.get("email"),
        full_name: row.get("full_name"),
        phone: row.get("phone"),
        upline_id: row.get("upline_id"),
        level: parse_stored(&level, UserLevel::from_str, "user level")?,
        is_active: row.get("is_active"),
        balance: row.get("balance"),
        credit_limit: row.get("credit_limit"),
        markup_percentage: row.get("markup_percentage"),
        allow_debt: row.get("allow_debt"),
        max_daily_transaction: row.get("max_daily_transaction"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn create(&self, user: &User) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO users
                (id, username, email, full_name, phone, upline_id, level, is_active,
                 balance, credit_limit, markup_percentage, allow_debt, max_daily_transaction,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.full_name)
        .bind(&user.phone)
        .bind(user.upline_id)
        .bind(user.level.as_str())
        .bind(user.is_active)
        .bind(user.balance)
        .bind(user.credit_limit)
        .bind(user.markup_percentage)
        .bind(user.allow_debt)
        .bind(user.max_daily_transaction)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<User, StoreError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::UserNotFound)?;
        row_to_user(&row)
    }

    async fn get_balance(&self, id: Uuid) -> Result<Decimal, StoreError> {
        sqlx::query_scalar::<_, Decimal>("SELECT balance FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::UserNotFound)
    }

    async fn update_balance(&self, id: Uuid, new_balance: Decimal) -> Result<(), StoreError> {
        let result =
            sqlx::query("UPDATE users SET balance = $2, updated_at = NOW() WHERE id = $1")
                .bind(id)
                .bind(new_balance)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::UserNotFound);
        }
        Ok(())
    }
}
