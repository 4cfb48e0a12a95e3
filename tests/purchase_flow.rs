//! End-to-end purchase scenarios over the in-memory backend.
//!
//! Exercises the full dispatch pipeline (create -> queue -> process ->
//! settle/refund) with scripted supplier adapters, asserting the ledger
//! invariants along the way.

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use pulsagate::adapter::{AdapterError, AdapterRegistry, StaticAdapter};
use pulsagate::dispatch::{
    CreateTransaction, DispatchConfig, DispatchError, DispatchQueue, MemoryQueue, Orchestrator,
    RetryPolicy, Shutdown, WorkerPool,
};
use pulsagate::domain::{
    MutationKind, MutationRef, Product, ProductKind, ProductMapping, StockStatus, Supplier,
    SupplierResponse, TransactionStatus, User, UserLevel,
};
use pulsagate::ledger::Ledger;
use pulsagate::store::memory::MemoryBackend;
use pulsagate::store::{
    MappingStore, MutationStore, ProductStore, SupplierStore, TransactionStore, UserStore,
};

struct Harness {
    backend: Arc<MemoryBackend>,
    queue: Arc<MemoryQueue>,
    adapters: Arc<AdapterRegistry>,
    orchestrator: Arc<Orchestrator>,
}

fn harness() -> Harness {
    harness_with_shutdown(Shutdown::disabled())
}

fn harness_with_shutdown(shutdown: Shutdown) -> Harness {
    let backend = Arc::new(MemoryBackend::new());
    let queue = Arc::new(MemoryQueue::new(256));
    let adapters = Arc::new(AdapterRegistry::new());

    // Short delays keep the failover loop fast under test.
    let policy = RetryPolicy {
        max_attempts: 3,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        backoff_multiplier: 2.0,
        timeout_per_attempt: Duration::from_secs(5),
        enable_jitter: false,
        max_age: Duration::from_secs(24 * 60 * 60),
    };
    let config = DispatchConfig {
        ttl_minutes: 30,
        reconcile_probes: 2,
        reconcile_delay: Duration::from_millis(10),
        default_attempt_timeout: Duration::from_secs(5),
    };

    let orchestrator = Arc::new(Orchestrator::new(
        backend.clone(),
        backend.clone(),
        backend.clone(),
        backend.clone(),
        backend.clone(),
        backend.clone(),
        backend.clone(),
        adapters.clone(),
        queue.clone(),
        config,
        policy,
        shutdown,
    ));

    Harness {
        backend,
        queue,
        adapters,
        orchestrator,
    }
}

async fn seed_user(h: &Harness, balance: Decimal) -> Uuid {
    let user = User {
        id: Uuid::new_v4(),
        username: "reseller01".into(),
        email: "reseller01@example.com".into(),
        full_name: None,
        phone: None,
        upline_id: None,
        level: UserLevel::Reseller,
        is_active: true,
        balance,
        credit_limit: Decimal::ZERO,
        markup_percentage: Decimal::ZERO,
        allow_debt: false,
        max_daily_transaction: dec!(10000000),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    UserStore::create(&*h.backend, &user).await.unwrap();
    user.id
}

async fn seed_product(h: &Harness, code: &str, base_price: Decimal) -> Uuid {
    let product = Product {
        id: Uuid::new_v4(),
        code: code.into(),
        name: format!("Pulsa {code}"),
        description: None,
        category: "PULSA".into(),
        provider: "TSEL".into(),
        kind: ProductKind::Prepaid,
        base_price,
        selling_price: base_price,
        min_price: dec!(1000),
        min_transaction_amount: dec!(1000),
        max_transaction_amount: dec!(1000000),
        is_active: true,
        is_unlimited_stock: true,
        stock_quantity: 0,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    ProductStore::create(&*h.backend, &product).await.unwrap();
    product.id
}

async fn seed_supplier(h: &Harness, code: &str, priority: i32, success_rate: f64) -> Uuid {
    let supplier = Supplier {
        id: Uuid::new_v4(),
        name: code.into(),
        code: code.into(),
        is_active: true,
        priority,
        timeout_seconds: 5,
        retry_attempts: 3,
        balance: dec!(10000000),
        min_balance_threshold: Decimal::ZERO,
        success_rate,
        avg_response_time_ms: 200,
        total_transactions: 100,
        failed_transactions: 0,
        created_at: Utc::now(),
        updated_at: Utc::now(),
        last_checked_at: None,
        last_success_at: None,
    };
    SupplierStore::create(&*h.backend, &supplier)
        .await
        .unwrap();
    supplier.id
}

async fn seed_mapping(h: &Harness, product_id: Uuid, supplier_id: Uuid, price: Decimal) {
    let mapping = ProductMapping {
        id: Uuid::new_v4(),
        product_id,
        supplier_id,
        supplier_product_code: "UP-T10".into(),
        supplier_price: price,
        additional_fee: Decimal::ZERO,
        priority: 1,
        is_active: true,
        stock_status: StockStatus::Available,
        success_count: 0,
        failure_count: 0,
        last_success_at: None,
        last_failure_at: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    MappingStore::create(&*h.backend, &mapping).await.unwrap();
}

async fn create_trx(h: &Harness, user_id: Uuid, product_code: &str) -> pulsagate::Transaction {
    h.orchestrator
        .create(CreateTransaction {
            user_id,
            product_code: product_code.into(),
            destination_number: "0812-3456-789".into(),
            notes: None,
        })
        .await
        .unwrap()
}

async fn trx_mutations(h: &Harness, trx_id: Uuid) -> Vec<pulsagate::domain::Mutation> {
    MutationStore::list_by_reference(&*h.backend, MutationRef::transaction(trx_id))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_happy_path_single_attempt() {
    let h = harness();
    let user_id = seed_user(&h, dec!(50000)).await;
    let product_id = seed_product(&h, "T10", dec!(10000)).await;
    let supplier_id = seed_supplier(&h, "S1", 1, 98.0).await;
    seed_mapping(&h, product_id, supplier_id, dec!(9800)).await;
    h.adapters
        .register("S1", Arc::new(StaticAdapter::succeeding("SN0001")));

    let trx = create_trx(&h, user_id, "T10").await;
    assert_eq!(trx.status, TransactionStatus::Pending);
    assert_eq!(trx.selling_price, dec!(10000));
    assert_eq!(trx.destination_number, "628123456789");
    assert_eq!(h.queue.len().await.unwrap(), 1);

    h.orchestrator.process(trx.id).await.unwrap();

    let settled = h.orchestrator.get(trx.id).await.unwrap();
    assert_eq!(settled.status, TransactionStatus::Success);
    assert_eq!(settled.serial_number.as_deref(), Some("SN0001"));
    assert_eq!(settled.final_supplier_id, Some(supplier_id));
    assert_eq!(settled.routing_attempts, 1);
    assert!(settled.completed_at.is_some());

    // Exactly one credit mutation for the debit, balance down by the price.
    let mutations = trx_mutations(&h, trx.id).await;
    assert_eq!(mutations.len(), 1);
    assert_eq!(mutations[0].kind, MutationKind::Credit);
    assert_eq!(mutations[0].amount, dec!(10000));
    assert_eq!(
        UserStore::get_balance(&*h.backend, user_id).await.unwrap(),
        dec!(40000)
    );

    // Supplier metrics observed the success.
    let supplier = SupplierStore::get(&*h.backend, supplier_id).await.unwrap();
    assert_eq!(supplier.total_transactions, 101);
    assert_eq!(supplier.failed_transactions, 0);
}

#[tokio::test]
async fn test_failover_on_first_failure() {
    let h = harness();
    let user_id = seed_user(&h, dec!(50000)).await;
    let product_id = seed_product(&h, "T10", dec!(10000)).await;
    let s1 = seed_supplier(&h, "S1", 1, 60.0).await;
    let s2 = seed_supplier(&h, "S2", 2, 99.0).await;
    seed_mapping(&h, product_id, s1, dec!(9800)).await;
    seed_mapping(&h, product_id, s2, dec!(9900)).await;

    let a1 = Arc::new(StaticAdapter::new());
    a1.push_refusal("destination blocked upstream");
    h.adapters.register("S1", a1.clone());
    h.adapters
        .register("S2", Arc::new(StaticAdapter::succeeding("SN0002")));

    let trx = create_trx(&h, user_id, "T10").await;
    h.orchestrator.process(trx.id).await.unwrap();

    let settled = h.orchestrator.get(trx.id).await.unwrap();
    assert_eq!(settled.status, TransactionStatus::Success);
    assert_eq!(settled.final_supplier_id, Some(s2));
    assert_eq!(settled.routing_attempts, 2);

    // One debit, no refund, balance down once.
    let mutations = trx_mutations(&h, trx.id).await;
    assert_eq!(mutations.len(), 1);
    assert_eq!(
        UserStore::get_balance(&*h.backend, user_id).await.unwrap(),
        dec!(40000)
    );

    // First supplier took the failure in its metrics.
    let supplier1 = SupplierStore::get(&*h.backend, s1).await.unwrap();
    assert_eq!(supplier1.failed_transactions, 1);
    assert_eq!(a1.call_count(), 1);
}

#[tokio::test]
async fn test_all_suppliers_fail_refund() {
    let h = harness();
    let user_id = seed_user(&h, dec!(50000)).await;
    let product_id = seed_product(&h, "T10", dec!(10000)).await;
    for (code, priority) in [("S1", 1), ("S2", 2), ("S3", 3)] {
        let id = seed_supplier(&h, code, priority, 95.0).await;
        seed_mapping(&h, product_id, id, dec!(9800)).await;
        let adapter = Arc::new(StaticAdapter::new());
        adapter.push_refusal("supplier rejected");
        h.adapters.register(code, adapter);
    }

    let trx = create_trx(&h, user_id, "T10").await;
    h.orchestrator.process(trx.id).await.unwrap();

    let settled = h.orchestrator.get(trx.id).await.unwrap();
    assert_eq!(settled.status, TransactionStatus::Refund);
    assert_eq!(settled.routing_attempts, 3);

    // Refund completeness: one credit and one debit of equal amount.
    let mutations = trx_mutations(&h, trx.id).await;
    assert_eq!(mutations.len(), 2);
    let credits: Vec<_> = mutations
        .iter()
        .filter(|m| m.kind == MutationKind::Credit)
        .collect();
    let debits: Vec<_> = mutations
        .iter()
        .filter(|m| m.kind == MutationKind::Debit)
        .collect();
    assert_eq!(credits.len(), 1);
    assert_eq!(debits.len(), 1);
    assert_eq!(credits[0].amount, debits[0].amount);

    assert_eq!(
        UserStore::get_balance(&*h.backend, user_id).await.unwrap(),
        dec!(50000)
    );

    let refunded = TransactionStore::list_by_status(&*h.backend, TransactionStatus::Refund)
        .await
        .unwrap();
    assert_eq!(refunded.len(), 1);
    assert_eq!(refunded[0].id, trx.id);
}

#[tokio::test]
async fn test_insufficient_balance_at_create() {
    let h = harness();
    let user_id = seed_user(&h, dec!(5000)).await;
    let product_id = seed_product(&h, "T10", dec!(10000)).await;
    let supplier_id = seed_supplier(&h, "S1", 1, 98.0).await;
    seed_mapping(&h, product_id, supplier_id, dec!(9800)).await;

    let err = h
        .orchestrator
        .create(CreateTransaction {
            user_id,
            product_code: "T10".into(),
            destination_number: "081234567890".into(),
            notes: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::InsufficientBalance));

    // Rejected synchronously: no record, no queue entry, no mutation.
    assert!(h
        .orchestrator
        .list_user(user_id, 1, 20)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(h.queue.len().await.unwrap(), 0);
    assert!(h.backend.mutation_log().is_empty());
}

#[tokio::test]
async fn test_cancel_pending() {
    let h = harness();
    let user_id = seed_user(&h, dec!(50000)).await;
    let product_id = seed_product(&h, "T10", dec!(10000)).await;
    let supplier_id = seed_supplier(&h, "S1", 1, 98.0).await;
    seed_mapping(&h, product_id, supplier_id, dec!(9800)).await;
    h.adapters
        .register("S1", Arc::new(StaticAdapter::succeeding("SN1")));

    let trx = create_trx(&h, user_id, "T10").await;
    let cancelled = h.orchestrator.cancel(trx.id).await.unwrap();
    assert_eq!(cancelled.status, TransactionStatus::Failed);
    assert_eq!(cancelled.supplier_message.as_deref(), Some("cancelled by user"));

    // The queued id is now a no-op for the worker.
    h.orchestrator.process(trx.id).await.unwrap();
    let after = h.orchestrator.get(trx.id).await.unwrap();
    assert_eq!(after.status, TransactionStatus::Failed);

    // Never debited, never refunded.
    assert!(trx_mutations(&h, trx.id).await.is_empty());
    assert_eq!(
        UserStore::get_balance(&*h.backend, user_id).await.unwrap(),
        dec!(50000)
    );

    // Cancelling a settled record is rejected.
    let err = h.orchestrator.cancel(trx.id).await.unwrap_err();
    assert!(matches!(err, DispatchError::NotCancellable(_)));
}

#[tokio::test]
async fn test_duplicate_dispatch_is_idempotent() {
    let h = harness();
    let user_id = seed_user(&h, dec!(50000)).await;
    let product_id = seed_product(&h, "T10", dec!(10000)).await;
    let supplier_id = seed_supplier(&h, "S1", 1, 98.0).await;
    seed_mapping(&h, product_id, supplier_id, dec!(9800)).await;
    let adapter = Arc::new(StaticAdapter::succeeding("SN1"));
    h.adapters.register("S1", adapter.clone());

    let trx = create_trx(&h, user_id, "T10").await;
    // The queue delivered the same id twice.
    h.queue.enqueue(trx.id).await.unwrap();

    h.orchestrator.process(trx.id).await.unwrap();
    h.orchestrator.process(trx.id).await.unwrap();
    h.orchestrator.process(trx.id).await.unwrap();

    let settled = h.orchestrator.get(trx.id).await.unwrap();
    assert_eq!(settled.status, TransactionStatus::Success);

    // One adapter call, one debit, one balance change.
    assert_eq!(adapter.call_count(), 1);
    assert_eq!(trx_mutations(&h, trx.id).await.len(), 1);
    assert_eq!(
        UserStore::get_balance(&*h.backend, user_id).await.unwrap(),
        dec!(40000)
    );
}

#[tokio::test]
async fn test_balance_drift_fails_at_dispatch() {
    let h = harness();
    let user_id = seed_user(&h, dec!(50000)).await;
    let product_id = seed_product(&h, "T10", dec!(10000)).await;
    let supplier_id = seed_supplier(&h, "S1", 1, 98.0).await;
    seed_mapping(&h, product_id, supplier_id, dec!(9800)).await;
    h.adapters
        .register("S1", Arc::new(StaticAdapter::succeeding("SN1")));

    let trx = create_trx(&h, user_id, "T10").await;

    // Balance drains between create and dispatch.
    h.backend
        .apply(
            user_id,
            MutationKind::Credit,
            dec!(45000),
            "withdrawal",
            None,
        )
        .await
        .unwrap();

    h.orchestrator.process(trx.id).await.unwrap();
    let settled = h.orchestrator.get(trx.id).await.unwrap();
    assert_eq!(settled.status, TransactionStatus::Failed);
    assert_eq!(
        settled.supplier_message.as_deref(),
        Some("insufficient balance")
    );
    // Only the manual withdrawal is in the ledger.
    assert!(trx_mutations(&h, trx.id).await.is_empty());
}

#[tokio::test]
async fn test_no_supplier_settles_as_refund_without_debit() {
    let h = harness();
    let user_id = seed_user(&h, dec!(50000)).await;
    seed_product(&h, "T10", dec!(10000)).await;
    // No mappings at all.

    let trx = create_trx(&h, user_id, "T10").await;
    h.orchestrator.process(trx.id).await.unwrap();

    let settled = h.orchestrator.get(trx.id).await.unwrap();
    assert_eq!(settled.status, TransactionStatus::Refund);
    // Refund-without-debit: zero ledger rows, balance untouched.
    assert!(trx_mutations(&h, trx.id).await.is_empty());
    assert_eq!(
        UserStore::get_balance(&*h.backend, user_id).await.unwrap(),
        dec!(50000)
    );
}

#[tokio::test]
async fn test_transport_error_fails_over() {
    let h = harness();
    let user_id = seed_user(&h, dec!(50000)).await;
    let product_id = seed_product(&h, "T10", dec!(10000)).await;
    let s1 = seed_supplier(&h, "S1", 1, 95.0).await;
    let s2 = seed_supplier(&h, "S2", 2, 95.0).await;
    seed_mapping(&h, product_id, s1, dec!(9800)).await;
    seed_mapping(&h, product_id, s2, dec!(9900)).await;

    let a1 = Arc::new(StaticAdapter::new());
    a1.push_transport_error("connection refused");
    h.adapters.register("S1", a1);
    h.adapters
        .register("S2", Arc::new(StaticAdapter::succeeding("SN2")));

    let trx = create_trx(&h, user_id, "T10").await;
    h.orchestrator.process(trx.id).await.unwrap();

    let settled = h.orchestrator.get(trx.id).await.unwrap();
    assert_eq!(settled.status, TransactionStatus::Success);
    assert_eq!(settled.final_supplier_id, Some(s2));
}

#[tokio::test]
async fn test_indeterminate_outcome_reconciled_to_success() {
    let h = harness();
    let user_id = seed_user(&h, dec!(50000)).await;
    let product_id = seed_product(&h, "T10", dec!(10000)).await;
    let supplier_id = seed_supplier(&h, "S1", 1, 98.0).await;
    seed_mapping(&h, product_id, supplier_id, dec!(9800)).await;

    let adapter = Arc::new(StaticAdapter::new());
    adapter.push(Err(AdapterError::Timeout));
    adapter.set_status_outcome(Ok(SupplierResponse {
        success: true,
        message: "found".into(),
        trx_id: "UP-REC".into(),
        serial_number: "SNREC".into(),
        status_code: 0,
        response_time_ms: 80,
        ..SupplierResponse::default()
    }));
    h.adapters.register("S1", adapter);

    let trx = create_trx(&h, user_id, "T10").await;
    h.orchestrator.process(trx.id).await.unwrap();

    let settled = h.orchestrator.get(trx.id).await.unwrap();
    assert_eq!(settled.status, TransactionStatus::Success);
    assert_eq!(settled.serial_number.as_deref(), Some("SNREC"));
    assert_eq!(trx_mutations(&h, trx.id).await.len(), 1);
}

#[tokio::test]
async fn test_indeterminate_outcome_parks_as_timeout_without_refund() {
    let h = harness();
    let user_id = seed_user(&h, dec!(50000)).await;
    let product_id = seed_product(&h, "T10", dec!(10000)).await;
    let supplier_id = seed_supplier(&h, "S1", 1, 98.0).await;
    seed_mapping(&h, product_id, supplier_id, dec!(9800)).await;

    let adapter = Arc::new(StaticAdapter::new());
    adapter.push(Err(AdapterError::Timeout));
    // Probes stay inconclusive.
    adapter.set_status_outcome(Err(AdapterError::Transport("status unavailable".into())));
    h.adapters.register("S1", adapter);

    let trx = create_trx(&h, user_id, "T10").await;
    h.orchestrator.process(trx.id).await.unwrap();

    let settled = h.orchestrator.get(trx.id).await.unwrap();
    assert_eq!(settled.status, TransactionStatus::Timeout);

    // Debit kept for the operator; no automatic refund.
    let mutations = trx_mutations(&h, trx.id).await;
    assert_eq!(mutations.len(), 1);
    assert_eq!(mutations[0].kind, MutationKind::Credit);
    assert_eq!(
        UserStore::get_balance(&*h.backend, user_id).await.unwrap(),
        dec!(40000)
    );

    // Terminal fixpoint: the record never leaves timeout.
    h.orchestrator.process(trx.id).await.unwrap();
    assert_eq!(
        h.orchestrator.get(trx.id).await.unwrap().status,
        TransactionStatus::Timeout
    );
}

#[tokio::test]
async fn test_worker_pool_drains_queue() {
    let h = harness();
    let user_id = seed_user(&h, dec!(50000)).await;
    let product_id = seed_product(&h, "T10", dec!(10000)).await;
    let supplier_id = seed_supplier(&h, "S1", 1, 98.0).await;
    seed_mapping(&h, product_id, supplier_id, dec!(9800)).await;
    let adapter = Arc::new(StaticAdapter::new());
    for i in 0..3 {
        adapter.push_success(&format!("SN{i}"));
    }
    h.adapters.register("S1", adapter);

    let (shutdown_tx, shutdown) = Shutdown::channel();
    let pool = WorkerPool::new(
        h.orchestrator.clone(),
        h.queue.clone(),
        2,
        Duration::from_secs(60),
        shutdown,
    );
    let handles = pool.spawn();

    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(create_trx(&h, user_id, "T10").await.id);
    }

    // Wait for every record to settle.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let mut all_done = true;
        for id in &ids {
            if h.orchestrator.get(*id).await.unwrap().status != TransactionStatus::Success {
                all_done = false;
            }
        }
        if all_done {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "workers did not settle the queue in time"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    shutdown_tx.send(true).unwrap();
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(
        UserStore::get_balance(&*h.backend, user_id).await.unwrap(),
        dec!(20000)
    );
}

#[tokio::test]
async fn test_stats_over_window() {
    let h = harness();
    let user_id = seed_user(&h, dec!(100000)).await;
    let product_id = seed_product(&h, "T10", dec!(10000)).await;
    let supplier_id = seed_supplier(&h, "S1", 1, 98.0).await;
    seed_mapping(&h, product_id, supplier_id, dec!(9800)).await;

    let adapter = Arc::new(StaticAdapter::new());
    adapter.push_success("SN1");
    adapter.push_refusal("rejected");
    h.adapters.register("S1", adapter);

    let first = create_trx(&h, user_id, "T10").await;
    h.orchestrator.process(first.id).await.unwrap();
    let second = create_trx(&h, user_id, "T10").await;
    h.orchestrator.process(second.id).await.unwrap();

    let start = Utc::now() - chrono::Duration::hours(1);
    let end = Utc::now() + chrono::Duration::hours(1);
    let stats = h.orchestrator.stats(user_id, start, end).await.unwrap();

    assert_eq!(stats.total_transactions, 2);
    assert_eq!(stats.success_count, 1);
    // Single candidate, so the refusal exhausts failover into a refund.
    assert_eq!(stats.refund_count, 1);
    assert_eq!(stats.total_revenue, dec!(10000));
    assert_eq!(stats.average_amount, dec!(10000));
}

#[tokio::test]
async fn test_double_entry_holds_across_scenarios() {
    let h = harness();
    let user_id = seed_user(&h, dec!(100000)).await;
    let product_id = seed_product(&h, "T10", dec!(10000)).await;
    let supplier_id = seed_supplier(&h, "S1", 1, 98.0).await;
    seed_mapping(&h, product_id, supplier_id, dec!(9800)).await;

    let adapter = Arc::new(StaticAdapter::new());
    adapter.push_success("SN1");
    adapter.push_refusal("rejected");
    adapter.push_success("SN2");
    h.adapters.register("S1", adapter);

    for _ in 0..3 {
        let trx = create_trx(&h, user_id, "T10").await;
        h.orchestrator.process(trx.id).await.unwrap();
    }

    let signed_sum: Decimal = h
        .backend
        .mutation_log()
        .iter()
        .map(|m| m.kind.signed(m.amount))
        .sum();
    let balance = UserStore::get_balance(&*h.backend, user_id).await.unwrap();
    assert_eq!(signed_sum, balance - dec!(100000));

    // Every mutation row satisfies the double-entry write rule.
    for m in h.backend.mutation_log() {
        assert_eq!(m.balance_after, m.balance_before + m.kind.signed(m.amount));
    }
}
