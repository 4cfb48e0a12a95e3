//! Retry / failover controller
//!
//! Walks the alternatives produced by routing after a failed first attempt:
//! exponential backoff with optional jitter between attempts, a bounded
//! attempt budget, and an automatic refund once every candidate is spent.
//! Implemented as a sequential loop inside the worker task; durations come
//! from the monotonic clock, wall-clock timestamps only go into the store.

use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::{AttemptOutcome, DispatchCore, DispatchError, Shutdown};
use crate::domain::{MutationKind, MutationRef, Transaction, TransactionStatus};
use crate::routing::ScoredCandidate;

/// Backoff and budget configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub timeout_per_attempt: Duration,
    pub enable_jitter: bool,
    /// Transactions older than this are not retried.
    pub max_age: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            timeout_per_attempt: Duration::from_secs(30),
            enable_jitter: true,
            max_age: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `n` (1-based). The first attempt fires
    /// immediately; attempt `n` then waits
    /// `initial_delay * multiplier^(n-2)` capped at `max_delay`, plus up to
    /// 10% uniform jitter when enabled.
    pub fn delay_before_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exp = (attempt - 2) as i32;
        let base = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exp);
        let capped = base.min(self.max_delay.as_secs_f64());
        let jitter = if self.enable_jitter {
            rand::thread_rng().gen_range(0.0..=capped * 0.1)
        } else {
            0.0
        };
        Duration::from_secs_f64(capped + jitter)
    }

    /// Whether the record is still eligible for failover. Only `failed`
    /// qualifies: the storage layer pins `success`/`refund`/`timeout` as a
    /// fixpoint, so nothing can re-drive those.
    pub fn can_retry(&self, trx: &Transaction, now: DateTime<Utc>) -> bool {
        let within_budget = trx.routing_attempts < self.max_attempts as i32;
        let age = now - trx.created_at;
        let fresh = age <= chrono::Duration::from_std(self.max_age).unwrap_or(chrono::Duration::MAX);
        trx.status == TransactionStatus::Failed && within_budget && fresh
    }
}

/// Record of one failover attempt.
#[derive(Debug, Clone)]
pub struct RetryAttempt {
    pub attempt_number: i32,
    pub supplier_id: Uuid,
    pub supplier_code: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration: Duration,
    pub success: bool,
    pub error: Option<String>,
    pub response_time_ms: i64,
    pub reason: String,
}

/// Outcome of a failover run.
#[derive(Debug)]
pub struct RetryResult {
    pub success: bool,
    pub attempts_made: i32,
    pub total_duration: Duration,
    pub final_supplier_id: Option<Uuid>,
    pub refund_issued: bool,
    pub refund_amount: Decimal,
    pub attempt_history: Vec<RetryAttempt>,
}

pub struct RetryController {
    core: Arc<DispatchCore>,
    policy: RetryPolicy,
}

impl RetryController {
    pub(crate) fn new(core: Arc<DispatchCore>, policy: RetryPolicy) -> Self {
        Self { core, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Drive the failover loop for a freshly failed transaction.
    ///
    /// `alternatives` must not contain the already-tried supplier. On
    /// exhaustion the debited amount is refunded through the ledger and the
    /// record settles in `refund`; an indeterminate attempt settles in
    /// `timeout` with NO refund.
    pub(crate) async fn run(
        &self,
        trx: &mut Transaction,
        alternatives: &[ScoredCandidate],
        shutdown: &Shutdown,
    ) -> Result<RetryResult, DispatchError> {
        let started = tokio::time::Instant::now();
        let mut history = Vec::new();

        if trx.status != TransactionStatus::Failed {
            tracing::debug!(trx_code = %trx.trx_code, status = %trx.status, "record not in failed, nothing to fail over");
            return Ok(self.partial_result(trx, history, started));
        }
        if !self.policy.can_retry(trx, Utc::now()) {
            // Budget or age exhausted: go straight to the refund.
            tracing::debug!(trx_code = %trx.trx_code, "retry budget exhausted");
            return self.refund_and_finish(trx, history, started).await;
        }

        tracing::info!(
            trx_code = %trx.trx_code,
            max_attempts = self.policy.max_attempts,
            candidates = alternatives.len(),
            "starting failover"
        );

        let mut candidates = alternatives.iter();
        while trx.routing_attempts < self.policy.max_attempts as i32 {
            let Some(candidate) = candidates.next() else {
                tracing::warn!(trx_code = %trx.trx_code, "no more failover candidates");
                break;
            };
            let attempt_number = trx.routing_attempts + 1;

            let delay = self.policy.delay_before_attempt(attempt_number as u32);
            if !delay.is_zero() {
                let sleep = tokio::time::sleep(delay);
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => {
                        // Cancelled mid-backoff: hand back the partial
                        // history, leave the refund to the operator.
                        tracing::warn!(trx_code = %trx.trx_code, "failover cancelled during backoff");
                        return Ok(self.partial_result(trx, history, started));
                    }
                    _ = sleep => {}
                }
            }

            if !self
                .core
                .transactions
                .update_status_if(
                    trx.id,
                    TransactionStatus::Failed,
                    TransactionStatus::Processing,
                )
                .await?
            {
                tracing::warn!(trx_code = %trx.trx_code, "lost the retry transition, another writer owns the record");
                return Ok(self.partial_result(trx, history, started));
            }
            trx.status = TransactionStatus::Processing;
            trx.supplier_id = Some(candidate.supplier.id);
            self.core.transactions.update(trx).await?;

            let attempt_started = Utc::now();
            let clock = tokio::time::Instant::now();
            let outcome = self
                .core
                .execute_attempt(trx, &candidate.supplier, &candidate.mapping, shutdown)
                .await?;
            let duration = clock.elapsed();

            let mut record = RetryAttempt {
                attempt_number,
                supplier_id: candidate.supplier.id,
                supplier_code: candidate.supplier.code.clone(),
                started_at: attempt_started,
                ended_at: Utc::now(),
                duration,
                success: false,
                error: None,
                response_time_ms: duration.as_millis() as i64,
                reason: format!("failover attempt {attempt_number}"),
            };

            match outcome {
                AttemptOutcome::Success(resp) => {
                    record.success = true;
                    record.response_time_ms = if resp.response_time_ms > 0 {
                        resp.response_time_ms
                    } else {
                        record.response_time_ms
                    };
                    history.push(record);

                    self.finalize_success(trx, candidate.supplier.id, &resp)
                        .await?;

                    tracing::info!(
                        trx_code = %trx.trx_code,
                        supplier_code = %candidate.supplier.code,
                        attempt = attempt_number,
                        "failover succeeded"
                    );
                    return Ok(RetryResult {
                        success: true,
                        attempts_made: trx.routing_attempts,
                        total_duration: started.elapsed(),
                        final_supplier_id: Some(candidate.supplier.id),
                        refund_issued: false,
                        refund_amount: Decimal::ZERO,
                        attempt_history: history,
                    });
                }
                AttemptOutcome::Refusal(resp) => {
                    let message = if resp.message.is_empty() {
                        "supplier returned failure".to_string()
                    } else {
                        resp.message.clone()
                    };
                    record.error = Some(message.clone());
                    history.push(record);
                    self.mark_failed(trx, &message).await?;
                }
                AttemptOutcome::TransportFailure(message) => {
                    record.error = Some(message.clone());
                    history.push(record);
                    self.mark_failed(trx, &message).await?;
                }
                AttemptOutcome::Unknown => {
                    record.error = Some("outcome indeterminate".to_string());
                    history.push(record);
                    // Not verifiable either way: park the record for the
                    // operator instead of risking a double payout.
                    self.core
                        .transactions
                        .update_completion(
                            trx.id,
                            TransactionStatus::Timeout,
                            None,
                            Some("supplier outcome indeterminate after reconciliation"),
                        )
                        .await?;
                    trx.status = TransactionStatus::Timeout;
                    return Ok(self.partial_result(trx, history, started));
                }
                AttemptOutcome::Cancelled => {
                    record.error = Some("cancelled by shutdown".to_string());
                    history.push(record);
                    return Ok(self.partial_result(trx, history, started));
                }
            }
        }

        self.refund_and_finish(trx, history, started).await
    }

    async fn mark_failed(&self, trx: &mut Transaction, message: &str) -> Result<(), DispatchError> {
        self.core
            .transactions
            .update_completion(trx.id, TransactionStatus::Failed, None, Some(message))
            .await?;
        trx.status = TransactionStatus::Failed;
        trx.supplier_message = Some(message.to_string());
        Ok(())
    }

    async fn finalize_success(
        &self,
        trx: &mut Transaction,
        supplier_id: Uuid,
        resp: &crate::domain::SupplierResponse,
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
        Ok(())
    }

    /// Exhaustion path: restore the debited amount and settle in `refund`.
    async fn refund_and_finish(
        &self,
        trx: &mut Transaction,
        history: Vec<RetryAttempt>,
        started: tokio::time::Instant,
    ) -> Result<RetryResult, DispatchError> {
        let description = format!("Refund transaksi gagal {}", trx.trx_code);
        match self
            .core
            .ledger
            .apply(
                trx.user_id,
                MutationKind::Debit,
                trx.selling_price,
                &description,
                Some(MutationRef::transaction(trx.id)),
            )
            .await
        {
            Ok(_) => {
                self.core
                    .transactions
                    .update_completion(
                        trx.id,
                        TransactionStatus::Refund,
                        None,
                        Some("refunded after failover exhaustion"),
                    )
                    .await?;
                trx.status = TransactionStatus::Refund;

                tracing::warn!(
                    trx_code = %trx.trx_code,
                    amount = %trx.selling_price,
                    attempts = trx.routing_attempts,
                    "all attempts failed, refund issued"
                );
                Ok(RetryResult {
                    success: false,
                    attempts_made: trx.routing_attempts,
                    total_duration: started.elapsed(),
                    final_supplier_id: None,
                    refund_issued: true,
                    refund_amount: trx.selling_price,
                    attempt_history: history,
                })
            }
            Err(e) => {
                // The record stays `failed`: the only case in which failed
                // is allowed to be the end of the road.
                tracing::error!(
                    trx_code = %trx.trx_code,
                    error = %e,
                    "refund issuance failed, record left in failed for reconciliation"
                );
                self.core
                    .transactions
                    .update_completion(
                        trx.id,
                        TransactionStatus::Failed,
                        None,
                        Some("refund issuance failed, operator action required"),
                    )
                    .await?;
                Ok(self.partial_result(trx, history, started))
            }
        }
    }

    fn partial_result(
        &self,
        trx: &Transaction,
        history: Vec<RetryAttempt>,
        started: tokio::time::Instant,
    ) -> RetryResult {
        RetryResult {
            success: false,
            attempts_made: trx.routing_attempts,
            total_duration: started.elapsed(),
            final_supplier_id: None,
            refund_issued: false,
            refund_amount: Decimal::ZERO,
            attempt_history: history,
        }
    }
}
