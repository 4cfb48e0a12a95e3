//! Dispatch pipeline
//!
//! The asynchronous path from an accepted purchase to a terminal outcome:
//! queue, orchestrator, retry/failover controller, and worker pool.

pub mod orchestrator;
pub mod queue;
pub mod retry;
pub mod worker;

pub use orchestrator::{CreateTransaction, Orchestrator};
pub use queue::{DispatchQueue, MemoryQueue, QueueError};
pub use retry::{RetryAttempt, RetryController, RetryPolicy, RetryResult};
pub use worker::WorkerPool;

use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use uuid::Uuid;

use crate::adapter::{AdapterError, AdapterRegistry};
use crate::domain::{
    ProductMapping, Supplier, SupplierRequest, SupplierResponse, Transaction, TransactionStatus,
};
use crate::ledger::{Ledger, LedgerError};
use crate::routing::RoutingError;
use crate::store::{
    MappingStore, MutationStore, ProductStore, StoreError, SupplierStore, TransactionStore,
    UserStore,
};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("user account is not active")]
    UserInactive,
    #[error("product is not available")]
    ProductInactive,
    #[error("price {price} is outside the allowed range")]
    PriceOutOfRange { price: Decimal },
    #[error("insufficient balance")]
    InsufficientBalance,
    #[error("transaction cannot be cancelled in status {0}")]
    NotCancellable(TransactionStatus),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Routing(#[from] RoutingError),
}

/// Cooperative shutdown signal carried into every blocking point.
#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
    // Keeps the channel open for signals that can never fire.
    _keep: Option<Arc<watch::Sender<bool>>>,
}

impl Shutdown {
    pub fn channel() -> (watch::Sender<bool>, Shutdown) {
        let (tx, rx) = watch::channel(false);
        (tx, Shutdown { rx, _keep: None })
    }

    /// A signal that never fires, for contexts without lifecycle management.
    pub fn disabled() -> Shutdown {
        let (tx, rx) = watch::channel(false);
        Shutdown {
            rx,
            _keep: Some(Arc::new(tx)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown is requested (or the sender is gone).
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Tunables for the orchestrator shared across attempts.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Wall-clock budget before a non-terminal record is swept to `timeout`.
    pub ttl_minutes: i64,
    /// `check_status` probes after an indeterminate attempt.
    pub reconcile_probes: u32,
    /// Spacing between reconciliation probes.
    pub reconcile_delay: Duration,
    /// Per-attempt deadline when the supplier row carries none.
    pub default_attempt_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            ttl_minutes: 30,
            reconcile_probes: 2,
            reconcile_delay: Duration::from_secs(2),
            default_attempt_timeout: Duration::from_secs(30),
        }
    }
}

/// Classified result of one supplier attempt.
#[derive(Debug)]
pub(crate) enum AttemptOutcome {
    /// Definite success.
    Success(SupplierResponse),
    /// Definite business refusal (`success = false`).
    Refusal(SupplierResponse),
    /// Known transport failure; the request did not complete upstream.
    TransportFailure(String),
    /// Outcome indeterminate even after reconciliation probes.
    Unknown,
    /// Shutdown interrupted the attempt.
    Cancelled,
}

/// Shared dependencies of the orchestrator and the retry controller.
pub(crate) struct DispatchCore {
    pub users: Arc<dyn UserStore>,
    pub products: Arc<dyn ProductStore>,
    pub suppliers: Arc<dyn SupplierStore>,
    pub mappings: Arc<dyn MappingStore>,
    pub transactions: Arc<dyn TransactionStore>,
    pub mutations: Arc<dyn MutationStore>,
    pub ledger: Arc<dyn Ledger>,
    pub adapters: Arc<AdapterRegistry>,
    pub config: DispatchConfig,
}

impl DispatchCore {
    /// Execute one supplier attempt against an already-`processing` record.
    ///
    /// Bumps `routing_attempts`, bounds the call with the supplier deadline,
    /// reconciles indeterminate outcomes via `check_status`, and folds every
    /// definite outcome into the supplier metrics and mapping counters.
    pub(crate) async fn execute_attempt(
        &self,
        trx: &mut Transaction,
        supplier: &Supplier,
        mapping: &ProductMapping,
        shutdown: &Shutdown,
    ) -> Result<AttemptOutcome, DispatchError> {
        self.transactions.increment_attempts(trx.id).await?;
        trx.routing_attempts += 1;

        let adapter = match self.adapters.get(&supplier.code) {
            Ok(adapter) => adapter,
            Err(AdapterError::NotFound(code)) => {
                tracing::warn!(
                    trx_code = %trx.trx_code,
                    supplier_code = %code,
                    "no adapter registered, skipping supplier"
                );
                return Ok(AttemptOutcome::TransportFailure(format!(
                    "no adapter registered for {code}"
                )));
            }
            Err(e) => return Ok(AttemptOutcome::TransportFailure(e.to_string())),
        };

        let request = SupplierRequest {
            product_code: mapping.supplier_product_code.clone(),
            destination_number: trx.destination_number.clone(),
            ref_id: trx.trx_code.clone(),
            additional_data: HashMap::new(),
        };

        let deadline = if supplier.timeout_seconds > 0 {
            Duration::from_secs(supplier.timeout_seconds as u64)
        } else {
            self.config.default_attempt_timeout
        };

        tracing::info!(
            trx_code = %trx.trx_code,
            supplier_code = %supplier.code,
            supplier_product_code = %mapping.supplier_product_code,
            attempt = trx.routing_attempts,
            "calling supplier"
        );

        let started = tokio::time::Instant::now();
        let call = tokio::time::timeout(deadline, adapter.top_up(&request));
        let result = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Ok(AttemptOutcome::Cancelled),
            result = call => result,
        };
        let elapsed_ms = started.elapsed().as_millis() as i64;

        let outcome = match result {
            Ok(Ok(resp)) if resp.success => AttemptOutcome::Success(resp),
            Ok(Ok(resp)) => AttemptOutcome::Refusal(resp),
            Ok(Err(AdapterError::Transport(msg))) => AttemptOutcome::TransportFailure(msg),
            Ok(Err(AdapterError::Timeout)) | Err(_) => {
                // The request may have reached the supplier. Probe before
                // giving up on the outcome.
                self.reconcile(adapter.as_ref(), &trx.trx_code, shutdown)
                    .await
            }
            Ok(Err(other)) => AttemptOutcome::TransportFailure(other.to_string()),
        };

        match &outcome {
            AttemptOutcome::Success(resp) => {
                let rtt = if resp.response_time_ms > 0 {
                    resp.response_time_ms
                } else {
                    elapsed_ms
                };
                self.observe(supplier.id, mapping.id, true, rtt).await;
            }
            AttemptOutcome::Refusal(resp) => {
                let rtt = if resp.response_time_ms > 0 {
                    resp.response_time_ms
                } else {
                    elapsed_ms
                };
                self.observe(supplier.id, mapping.id, false, rtt).await;
            }
            AttemptOutcome::TransportFailure(_) => {
                self.observe(supplier.id, mapping.id, false, elapsed_ms).await;
            }
            // Indeterminate or cancelled attempts carry no definite outcome
            // and stay out of the metrics.
            AttemptOutcome::Unknown | AttemptOutcome::Cancelled => {}
        }

        Ok(outcome)
    }

    /// Probe `check_status` for a verifiable outcome after an indeterminate
    /// attempt. `Ok(success = true)` and `Ok(success = false)` are taken as
    /// authoritative; probe errors keep the outcome unknown.
    async fn reconcile(
        &self,
        adapter: &dyn crate::adapter::SupplierAdapter,
        ref_id: &str,
        shutdown: &Shutdown,
    ) -> AttemptOutcome {
        for probe in 1..=self.config.reconcile_probes {
            let wait = tokio::time::sleep(self.config.reconcile_delay);
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return AttemptOutcome::Cancelled,
                _ = wait => {}
            }

            match adapter.check_status(ref_id).await {
                Ok(resp) if resp.success => {
                    tracing::info!(ref_id, probe, "reconciliation confirmed success");
                    return AttemptOutcome::Success(resp);
                }
                Ok(resp) => {
                    tracing::info!(ref_id, probe, "reconciliation confirmed failure");
                    return AttemptOutcome::Refusal(resp);
                }
                Err(e) => {
                    tracing::warn!(ref_id, probe, error = %e, "reconciliation probe inconclusive");
                }
            }
        }
        AttemptOutcome::Unknown
    }

    /// Metrics are best-effort: failures are logged and swallowed.
    async fn observe(&self, supplier_id: Uuid, mapping_id: Uuid, success: bool, rtt_ms: i64) {
        if let Err(e) = self
            .suppliers
            .update_metrics(supplier_id, success, rtt_ms)
            .await
        {
            tracing::warn!(supplier_id = %supplier_id, error = %e, "failed to update supplier metrics");
        }
        if let Err(e) = self.mappings.record_result(mapping_id, success).await {
            tracing::warn!(mapping_id = %mapping_id, error = %e, "failed to update mapping counters");
        }
    }
}
