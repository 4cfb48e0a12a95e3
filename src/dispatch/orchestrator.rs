//! Transaction orchestrator
//!
//! End-to-end workflow for one purchase: create the pending record and
//! enqueue it, then - on a worker - claim it with a compare-and-swap, debit
//! the ledger, route to a supplier, execute the attempt, and settle. Every
//! step is gated by the lifecycle state machine so redelivered ids are
//! harmless.
//!
//! Atomicity discipline: the `pending -> processing` CAS comes FIRST and is
//! the exclusivity gate; only the CAS winner ever reaches the debit. The
//! debit itself is one ledger transaction. At-least-once queue delivery can
//! therefore never double-debit.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use super::queue::DispatchQueue;
use super::retry::{RetryController, RetryPolicy};
use super::{AttemptOutcome, DispatchConfig, DispatchCore, DispatchError, Shutdown};
use crate::adapter::AdapterRegistry;
use crate::domain::{
    phone, MutationKind, MutationRef, SupplierResponse, Transaction, TransactionStats,
    TransactionStatus, User,
};
use crate::ledger::{Ledger, LedgerError};
use crate::routing::{RoutingCriteria, RoutingError, RoutingResult, RoutingScorer};
use crate::store::{
    MappingStore, MutationStore, ProductStore, StoreError, SupplierStore, TransactionStore,
    UserStore,
};

/// Attempts at generating a fresh trx code before giving up.
const TRX_CODE_ATTEMPTS: usize = 5;

/// Inbound purchase request, already authenticated.
#[derive(Debug, Clone)]
pub struct CreateTransaction {
    pub user_id: Uuid,
    pub product_code: String,
    pub destination_number: String,
    pub notes: Option<String>,
}

pub struct Orchestrator {
    core: Arc<DispatchCore>,
    queue: Arc<dyn DispatchQueue>,
    scorer: RoutingScorer,
    retry: RetryController,
    shutdown: Shutdown,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        users: Arc<dyn UserStore>,
        products: Arc<dyn ProductStore>,
        suppliers: Arc<dyn SupplierStore>,
        mappings: Arc<dyn MappingStore>,
        transactions: Arc<dyn TransactionStore>,
        mutations: Arc<dyn MutationStore>,
        ledger: Arc<dyn Ledger>,
        adapters: Arc<AdapterRegistry>,
        queue: Arc<dyn DispatchQueue>,
        config: DispatchConfig,
        retry_policy: RetryPolicy,
        shutdown: Shutdown,
    ) -> Self {
        let scorer = RoutingScorer::new(suppliers.clone(), mappings.clone());
        let core = Arc::new(DispatchCore {
            users,
            products,
            suppliers,
            mappings,
            transactions,
            mutations,
            ledger,
            adapters,
            config,
        });
        let retry = RetryController::new(core.clone(), retry_policy);
        Self {
            core,
            queue,
            scorer,
            retry,
            shutdown,
        }
    }

    /// Validate, price, persist as `pending`, and enqueue. Does not block on
    /// dispatch.
    pub async fn create(&self, req: CreateTransaction) -> Result<Transaction, DispatchError> {
        if req.product_code.trim().is_empty() {
            return Err(DispatchError::Validation("product_code is required".into()));
        }
        let destination = phone::normalize(&req.destination_number)
            .map_err(|e| DispatchError::Validation(e.to_string()))?;

        let user = self.core.users.get(req.user_id).await?;
        if !user.is_active {
            return Err(DispatchError::UserInactive);
        }

        let product = self.core.products.get_by_code(req.product_code.trim()).await?;
        if !product.is_active {
            return Err(DispatchError::ProductInactive);
        }

        let selling_price = user.effective_price(product.base_price);
        if selling_price < product.min_price || selling_price > product.max_transaction_amount {
            return Err(DispatchError::PriceOutOfRange {
                price: selling_price,
            });
        }

        if !user.has_sufficient_balance(selling_price) {
            return Err(DispatchError::InsufficientBalance);
        }

        let now = Utc::now();
        let mut trx = Transaction {
            id: Uuid::new_v4(),
            trx_code: crate::domain::transaction::generate_trx_code(now),
            user_id: user.id,
            product_id: product.id,
            supplier_id: None,
            final_supplier_id: None,
            destination_number: destination,
            product_code: product.code.clone(),
            hpp: product.base_price,
            selling_price,
            admin_fee: Decimal::ZERO,
            status: TransactionStatus::Pending,
            serial_number: None,
            supplier_message: None,
            supplier_trx_id: None,
            routing_attempts: 0,
            created_at: now,
            updated_at: now,
            processed_at: None,
            completed_at: None,
            notes: req.notes,
        };

        // Trx codes carry a 4-digit random suffix; regenerate on the rare
        // same-day collision.
        let mut persisted = false;
        for _ in 0..TRX_CODE_ATTEMPTS {
            match self.core.transactions.create(&trx).await {
                Ok(()) => {
                    persisted = true;
                    break;
                }
                Err(StoreError::DuplicateTrxCode(_)) => {
                    trx.trx_code = crate::domain::transaction::generate_trx_code(Utc::now());
                }
                Err(e) => return Err(e.into()),
            }
        }
        if !persisted {
            return Err(DispatchError::Store(StoreError::Unavailable(
                "could not allocate a unique trx code".into(),
            )));
        }

        self.queue.enqueue(trx.id).await?;

        tracing::info!(
            trx_code = %trx.trx_code,
            user_id = %user.id,
            product_code = %trx.product_code,
            amount = %selling_price,
            "transaction created and queued"
        );

        Ok(trx)
    }

    /// Process one queued transaction id. Idempotent: any state but
    /// `pending` is a no-op, and two workers racing the same id settle it
    /// exactly once.
    pub async fn process(&self, id: Uuid) -> Result<(), DispatchError> {
        let trx = self.core.transactions.get(id).await?;
        if trx.status != TransactionStatus::Pending {
            tracing::debug!(trx_code = %trx.trx_code, status = %trx.status, "skipping non-pending record");
            return Ok(());
        }

        if !self.core.transactions.mark_processing(id).await? {
            tracing::debug!(trx_code = %trx.trx_code, "lost the processing claim to another worker");
            return Ok(());
        }
        // Re-read to pick up the processing stamps.
        let mut trx = self.core.transactions.get(id).await?;

        tracing::info!(
            trx_code = %trx.trx_code,
            amount = %trx.selling_price,
            "processing transaction"
        );

        // Balance may have drifted since creation.
        let user = self.core.users.get(trx.user_id).await?;
        if !user.has_sufficient_balance(trx.selling_price) {
            self.core
                .transactions
                .update_completion(
                    id,
                    TransactionStatus::Failed,
                    None,
                    Some("insufficient balance"),
                )
                .await?;
            tracing::warn!(trx_code = %trx.trx_code, "insufficient balance at dispatch time");
            return Ok(());
        }

        // Route before debiting: with no candidate there is nothing to
        // charge for, and the record settles as a refund with zero ledger
        // rows.
        let routing = match self
            .scorer
            .score(trx.product_id, &RoutingCriteria::default())
            .await
        {
            Ok(routing) => routing,
            Err(RoutingError::NoMappings) | Err(RoutingError::NoHealthySupplier) => {
                self.core
                    .transactions
                    .update_completion(
                        id,
                        TransactionStatus::Refund,
                        None,
                        Some("no supplier available"),
                    )
                    .await?;
                tracing::warn!(trx_code = %trx.trx_code, "no supplier available, settled without debit");
                return Ok(());
            }
            Err(RoutingError::Store(e)) => return Err(e.into()),
        };

        if let Err(e) = self.debit(&user, &trx).await {
            return match e {
                DispatchError::Ledger(LedgerError::InsufficientFunds { .. }) => {
                    self.core
                        .transactions
                        .update_completion(
                            id,
                            TransactionStatus::Failed,
                            None,
                            Some("insufficient balance"),
                        )
                        .await?;
                    Ok(())
                }
                other => Err(other),
            };
        }

        trx.supplier_id = Some(routing.selected.id);
        self.core.transactions.update(&trx).await?;

        self.run_attempts(&mut trx, routing).await
    }

    async fn debit(&self, user: &User, trx: &Transaction) -> Result<(), DispatchError> {
        let description = format!(
            "Pembelian {} {}",
            trx.product_code, trx.destination_number
        );
        self.core
            .ledger
            .apply(
                user.id,
                MutationKind::Credit,
                trx.selling_price,
                &description,
                Some(MutationRef::transaction(trx.id)),
            )
            .await?;
        Ok(())
    }

    /// First attempt on the selected supplier, then failover on the
    /// alternatives.
    async fn run_attempts(
        &self,
        trx: &mut Transaction,
        routing: RoutingResult,
    ) -> Result<(), DispatchError> {
        let outcome = self
            .core
            .execute_attempt(
                trx,
                &routing.selected,
                &routing.selected_mapping,
                &self.shutdown,
            )
            .await?;

        match outcome {
            AttemptOutcome::Success(resp) => {
                self.finalize_success(trx, routing.selected.id, &resp).await
            }
            AttemptOutcome::Refusal(resp) => {
                let message = if resp.message.is_empty() {
                    "supplier returned failure".to_string()
                } else {
                    resp.message.clone()
                };
                self.fail_over(trx, &routing, &message).await
            }
            AttemptOutcome::TransportFailure(message) => {
                self.fail_over(trx, &routing, &message).await
            }
            AttemptOutcome::Unknown => {
                // Not verifiable either way within budget: park for the
                // operator, keep the debit.
                self.core
                    .transactions
                    .update_completion(
                        trx.id,
                        TransactionStatus::Timeout,
                        None,
                        Some("supplier outcome indeterminate after reconciliation"),
                    )
                    .await?;
                tracing::warn!(trx_code = %trx.trx_code, "outcome indeterminate, marked timeout");
                Ok(())
            }
            AttemptOutcome::Cancelled => {
                self.core
                    .transactions
                    .update_completion(
                        trx.id,
                        TransactionStatus::Timeout,
                        None,
                        Some("dispatch cancelled by shutdown"),
                    )
                    .await?;
                tracing::warn!(trx_code = %trx.trx_code, "dispatch cancelled, marked timeout");
                Ok(())
            }
        }
    }

    async fn fail_over(
        &self,
        trx: &mut Transaction,
        routing: &RoutingResult,
        message: &str,
    ) -> Result<(), DispatchError> {
        tracing::warn!(
            trx_code = %trx.trx_code,
            supplier_code = %routing.selected.code,
            reason = message,
            "supplier attempt failed"
        );
        self.core
            .transactions
            .update_completion(trx.id, TransactionStatus::Failed, None, Some(message))
            .await?;
        trx.status = TransactionStatus::Failed;
        trx.supplier_message = Some(message.to_string());

        let result = self
            .retry
            .run(trx, &routing.alternatives, &self.shutdown)
            .await?;
        if result.success {
            tracing::info!(
                trx_code = %trx.trx_code,
                attempts = result.attempts_made,
                "settled via failover"
            );
        }
        Ok(())
    }

    async fn finalize_success(
        &self,
        trx: &mut Transaction,
        supplier_id: Uuid,
        resp: &SupplierResponse,
    ) -> Result<(), DispatchError> {
        let serial = if resp.serial_number.is_empty() {
            resp.trx_id.clone()
        } else {
            resp.serial_number.clone()
        };

        trx.final_supplier_id = Some(supplier_id);
        if !resp.trx_id.is_empty() {
            trx.supplier_trx_id = Some(resp.trx_id.clone());
        }
        if !resp.message.is_empty() {
            trx.supplier_message = Some(resp.message.clone());
        }
        self.core.transactions.update(trx).await?;

        self.core
            .transactions
            .update_completion(
                trx.id,
                TransactionStatus::Success,
                if serial.is_empty() {
                    None
                } else {
                    Some(serial.as_str())
                },
                trx.supplier_message.as_deref(),
            )
            .await?;
        trx.status = TransactionStatus::Success;

        tracing::info!(
            trx_code = %trx.trx_code,
            serial = %serial,
            "transaction settled successfully"
        );
        Ok(())
    }

    /// Cancel a still-pending transaction. The balance was never debited, so
    /// no refund mutation is written.
    pub async fn cancel(&self, id: Uuid) -> Result<Transaction, DispatchError> {
        let trx = self.core.transactions.get(id).await?;
        if trx.status != TransactionStatus::Pending {
            return Err(DispatchError::NotCancellable(trx.status));
        }
        if !self
            .core
            .transactions
            .update_status_if(id, TransactionStatus::Pending, TransactionStatus::Failed)
            .await?
        {
            // A worker claimed it in the meantime.
            let current = self.core.transactions.get(id).await?;
            return Err(DispatchError::NotCancellable(current.status));
        }
        self.core
            .transactions
            .update_completion(id, TransactionStatus::Failed, None, Some("cancelled by user"))
            .await?;

        tracing::info!(trx_code = %trx.trx_code, "transaction cancelled");
        self.core.transactions.get(id).await.map_err(Into::into)
    }

    pub async fn get(&self, id: Uuid) -> Result<Transaction, DispatchError> {
        self.core.transactions.get(id).await.map_err(Into::into)
    }

    pub async fn get_by_code(&self, trx_code: &str) -> Result<Transaction, DispatchError> {
        self.core
            .transactions
            .get_by_code(trx_code)
            .await
            .map_err(Into::into)
    }

    pub async fn list_user(
        &self,
        user_id: Uuid,
        page: i64,
        limit: i64,
    ) -> Result<Vec<Transaction>, DispatchError> {
        let page = page.max(1);
        let limit = limit.clamp(1, 100);
        let offset = (page - 1) * limit;
        self.core
            .transactions
            .list_by_user(user_id, limit, offset)
            .await
            .map_err(Into::into)
    }

    /// Ledger history for one user, newest first.
    pub async fn list_user_mutations(
        &self,
        user_id: Uuid,
        page: i64,
        limit: i64,
    ) -> Result<Vec<crate::domain::Mutation>, DispatchError> {
        let page = page.max(1);
        let limit = limit.clamp(1, 100);
        let offset = (page - 1) * limit;
        self.core
            .mutations
            .list_by_user(user_id, limit, offset)
            .await
            .map_err(Into::into)
    }

    /// Aggregate counters for one user over a date window.
    pub async fn stats(
        &self,
        user_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<TransactionStats, DispatchError> {
        let transactions = self.core.transactions.list_by_date_range(start, end).await?;

        let mut stats = TransactionStats::default();
        let mut total_amount = Decimal::ZERO;
        for trx in transactions.iter().filter(|t| t.user_id == user_id) {
            stats.total_transactions += 1;
            total_amount += trx.selling_price;
            match trx.status {
                TransactionStatus::Success => {
                    stats.success_count += 1;
                    stats.total_revenue += trx.selling_price;
                    stats.total_profit += trx.profit();
                }
                TransactionStatus::Failed => stats.failed_count += 1,
                TransactionStatus::Refund => stats.refund_count += 1,
                TransactionStatus::Timeout => stats.timeout_count += 1,
                TransactionStatus::Pending | TransactionStatus::Processing => {
                    stats.pending_count += 1
                }
            }
        }
        if stats.total_transactions > 0 {
            stats.average_amount =
                (total_amount / Decimal::from(stats.total_transactions)).round_dp(4);
        }
        Ok(stats)
    }

    /// Sweep non-terminal records past the wall-clock budget into `timeout`.
    /// Returns how many were swept.
    pub async fn expire_stale(&self) -> Result<u64, DispatchError> {
        let expired = self
            .core
            .transactions
            .list_expired(self.core.config.ttl_minutes)
            .await?;
        let mut swept = 0;
        for trx in expired {
            match self
                .core
                .transactions
                .update_completion(
                    trx.id,
                    TransactionStatus::Timeout,
                    None,
                    Some("exceeded wall-clock budget without a verifiable outcome"),
                )
                .await
            {
                Ok(()) => {
                    swept += 1;
                    tracing::warn!(trx_code = %trx.trx_code, "stale record swept to timeout");
                }
                Err(StoreError::TerminalStatus { .. }) => {} // settled meanwhile
                Err(e) => return Err(e.into()),
            }
        }
        Ok(swept)
    }

    pub async fn queue_depth(&self) -> Result<u64, DispatchError> {
        self.queue.len().await.map_err(Into::into)
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        self.retry.policy()
    }
}
