//! Persistence seams
//!
//! Trait-object boundaries between the dispatch pipeline and storage. The
//! Postgres implementations live in [`postgres`]; [`memory`] provides a
//! self-contained backend for tests and local runs.
//!
//! Mutations have no write trait on purpose: the ledger is the only writer
//! of ledger rows, and it owns its own atomicity.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{
    ApiClient, Mutation, MutationRef, Product, ProductMapping, Supplier, Transaction,
    TransactionStatus, User,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("user not found")]
    UserNotFound,
    #[error("product not found")]
    ProductNotFound,
    #[error("supplier not found")]
    SupplierNotFound,
    #[error("transaction not found")]
    TransactionNotFound,
    #[error("api client not found")]
    ApiClientNotFound,
    #[error("duplicate trx code: {0}")]
    DuplicateTrxCode(String),
    #[error("transaction {id} is terminal ({status}) and cannot change")]
    TerminalStatus {
        id: Uuid,
        status: TransactionStatus,
    },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create(&self, user: &User) -> Result<(), StoreError>;
    async fn get(&self, id: Uuid) -> Result<User, StoreError>;
    async fn get_balance(&self, id: Uuid) -> Result<Decimal, StoreError>;
    async fn update_balance(&self, id: Uuid, new_balance: Decimal) -> Result<(), StoreError>;
}

#[async_trait]
pub trait ProductStore: Send + Sync {
    async fn create(&self, product: &Product) -> Result<(), StoreError>;
    async fn get(&self, id: Uuid) -> Result<Product, StoreError>;
    async fn get_by_code(&self, code: &str) -> Result<Product, StoreError>;
    async fn list_active(&self) -> Result<Vec<Product>, StoreError>;
}

#[async_trait]
pub trait SupplierStore: Send + Sync {
    async fn create(&self, supplier: &Supplier) -> Result<(), StoreError>;
    async fn get(&self, id: Uuid) -> Result<Supplier, StoreError>;
    async fn get_by_code(&self, code: &str) -> Result<Supplier, StoreError>;
    async fn list_active(&self) -> Result<Vec<Supplier>, StoreError>;
    /// Fold one attempt outcome into the rolling metrics. Must be a single
    /// row-locked statement; callers never read-modify-write metrics.
    async fn update_metrics(
        &self,
        id: Uuid,
        success: bool,
        response_time_ms: i64,
    ) -> Result<(), StoreError>;
    async fn get_balance(&self, id: Uuid) -> Result<Decimal, StoreError>;
    async fn update_balance(&self, id: Uuid, new_balance: Decimal) -> Result<(), StoreError>;
}

#[async_trait]
pub trait MappingStore: Send + Sync {
    async fn create(&self, mapping: &ProductMapping) -> Result<(), StoreError>;
    /// Active mappings for a product, ordered by `(priority asc,
    /// supplier_price asc)`.
    async fn active_mappings(&self, product_id: Uuid) -> Result<Vec<ProductMapping>, StoreError>;
    /// Bump the per-mapping success/failure counters.
    async fn record_result(&self, mapping_id: Uuid, success: bool) -> Result<(), StoreError>;
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Persist a new record. `trx_code` collisions yield
    /// [`StoreError::DuplicateTrxCode`].
    async fn create(&self, trx: &Transaction) -> Result<(), StoreError>;
    async fn get(&self, id: Uuid) -> Result<Transaction, StoreError>;
    async fn get_by_code(&self, trx_code: &str) -> Result<Transaction, StoreError>;
    /// Field-granular update. Refuses to move a terminal record and never
    /// lowers `routing_attempts`.
    async fn update(&self, trx: &Transaction) -> Result<(), StoreError>;
    async fn list_by_user(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Transaction>, StoreError>;
    async fn list_by_status(
        &self,
        status: TransactionStatus,
    ) -> Result<Vec<Transaction>, StoreError>;
    /// Non-terminal records older than the wall-clock budget.
    async fn list_expired(&self, ttl_minutes: i64) -> Result<Vec<Transaction>, StoreError>;
    async fn list_by_date_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Transaction>, StoreError>;
    /// Compare-and-swap `pending -> processing`, stamping `processed_at`.
    /// Returns false when another worker already won the transition.
    async fn mark_processing(&self, id: Uuid) -> Result<bool, StoreError>;
    /// Status-only transition, gated by the terminal fixpoint.
    async fn update_status(&self, id: Uuid, status: TransactionStatus) -> Result<(), StoreError>;
    /// Compare-and-swap transition: applies only when the stored status
    /// matches `expected`. Returns false when another writer got there
    /// first. The terminal fixpoint holds here too: a terminal record never
    /// moves, regardless of what the caller passes as `expected`.
    async fn update_status_if(
        &self,
        id: Uuid,
        expected: TransactionStatus,
        status: TransactionStatus,
    ) -> Result<bool, StoreError>;
    /// Terminal-bound transition: status plus serial/message, stamping
    /// `completed_at`.
    async fn update_completion(
        &self,
        id: Uuid,
        status: TransactionStatus,
        serial_number: Option<&str>,
        message: Option<&str>,
    ) -> Result<(), StoreError>;
    async fn increment_attempts(&self, id: Uuid) -> Result<(), StoreError>;
}

#[async_trait]
pub trait MutationStore: Send + Sync {
    async fn list_by_user(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Mutation>, StoreError>;
    async fn list_by_reference(&self, reference: MutationRef) -> Result<Vec<Mutation>, StoreError>;
    /// Latest `balance_after` for the user, zero when no rows exist.
    async fn current_balance(&self, user_id: Uuid) -> Result<Decimal, StoreError>;
}

#[async_trait]
pub trait ApiClientStore: Send + Sync {
    async fn get_by_client_id(&self, client_id: &str) -> Result<ApiClient, StoreError>;
    /// Best-effort activity stamp; failures are logged, not propagated.
    async fn touch_last_used(&self, client_id: &str) -> Result<(), StoreError>;
}
