//! Postgres stores
//!
//! sqlx-backed implementations of the store traits. Queries are
//! runtime-checked (`sqlx::query` + `Row::get`); schema migrations are
//! managed outside this crate. Expected tables:
//!
//! - `users(id uuid pk, username unique, email unique, full_name, phone,
//!   upline_id, level, is_active, balance numeric(19,4), credit_limit,
//!   markup_percentage, allow_debt, max_daily_transaction, created_at,
//!   updated_at)`
//! - `products(id uuid pk, code unique, name, description, category,
//!   provider, type, base_price, selling_price, min_price,
//!   min_transaction_amount, max_transaction_amount, is_active,
//!   is_unlimited_stock, stock_quantity, created_at, updated_at)`
//! - `suppliers(id uuid pk, code unique, name, is_active, priority,
//!   timeout_seconds, retry_attempts, balance, min_balance_threshold,
//!   success_rate, avg_response_time_ms, total_transactions,
//!   failed_transactions, created_at, updated_at, last_checked_at,
//!   last_success_at)`
//! - `product_mappings(id uuid pk, product_id fk cascade, supplier_id fk
//!   cascade, supplier_product_code, supplier_price, additional_fee,
//!   priority, is_active, stock_status, success_count, failure_count,
//!   last_success_at, last_failure_at, created_at, updated_at,
//!   unique(product_id, supplier_id))`
//! - `transactions(id uuid pk, trx_code unique, user_id, product_id,
//!   supplier_id, final_supplier_id, destination_number, product_code, hpp,
//!   selling_price, admin_fee, status, serial_number, supplier_message,
//!   supplier_trx_id, routing_attempts, created_at, updated_at,
//!   processed_at, completed_at, notes)` with indexes on
//!   `(user_id, created_at desc)`, `status`, `completed_at`
//! - `mutations(id uuid pk, user_id, type, amount, balance_before,
//!   balance_after, description, reference_type, reference_id, created_at)`
//!   append-only, with a check that `balance_after` matches
//!   `balance_before +/- amount` per type
//! - `dispatch_queue(seq bigserial pk, transaction_id uuid, enqueued_at)`
//! - `api_clients(id uuid pk, client_id unique, api_key unique, secret,
//!   user_id nullable fk, ip_whitelist text[], is_active,
//!   max_requests_per_minute, created_at, updated_at, last_used_at)`

mod api_clients;
mod mappings;
mod mutations;
mod products;
mod queue;
mod suppliers;
mod transactions;
mod users;

pub use api_clients::PgApiClientStore;
pub use mappings::PgMappingStore;
pub use mutations::PgMutationStore;
pub use products::PgProductStore;
pub use queue::PgDispatchQueue;
pub use suppliers::PgSupplierStore;
pub use transactions::PgTransactionStore;
pub use users::PgUserStore;

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

use super::StoreError;

/// Shared connection pool wrapper.
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;

        tracing::info!("postgres connection pool established");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Map a stored enum string through a domain parser, surfacing corrupt rows
/// as storage errors instead of panics.
pub(crate) fn parse_stored<T>(
    value: &str,
    parse: impl Fn(&str) -> Option<T>,
    what: &str,
) -> Result<T, StoreError> {
    parse(value).ok_or_else(|| StoreError::Unavailable(format!("invalid stored {what}: {value}")))
}
