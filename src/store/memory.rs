//! In-memory backend
//!
//! One struct implementing every store trait plus the ledger, backed by
//! `DashMap`. Used by the integration tests and by local runs without a
//! database. Semantics mirror the Postgres implementations, including the
//! CAS processing gate and the terminal-status fixpoint.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::RwLock;
use uuid::Uuid;

use super::{
    ApiClientStore, MappingStore, MutationStore, ProductStore, StoreError, SupplierStore,
    TransactionStore, UserStore,
};
use crate::domain::{
    ApiClient, Mutation, MutationKind, MutationRef, Product, ProductMapping, Supplier, Transaction,
    TransactionStatus, User,
};
use crate::ledger::{Ledger, LedgerError};

#[derive(Default)]
pub struct MemoryBackend {
    users: DashMap<Uuid, User>,
    products: DashMap<Uuid, Product>,
    product_codes: DashMap<String, Uuid>,
    suppliers: DashMap<Uuid, Supplier>,
    supplier_codes: DashMap<String, Uuid>,
    mappings: DashMap<Uuid, ProductMapping>,
    transactions: DashMap<Uuid, Transaction>,
    trx_codes: DashMap<String, Uuid>,
    api_clients: DashMap<String, ApiClient>,
    /// Append-only ledger log. Guarded together with user balances by
    /// `ledger_gate` during apply.
    mutations: RwLock<Vec<Mutation>>,
    ledger_gate: tokio::sync::Mutex<()>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_api_client(&self, client: ApiClient) {
        self.api_clients.insert(client.client_id.clone(), client);
    }

    /// Test helper: all ledger rows in append order.
    pub fn mutation_log(&self) -> Vec<Mutation> {
        self.mutations.read().expect("ledger log poisoned").clone()
    }
}

#[async_trait]
impl UserStore for MemoryBackend {
    async fn create(&self, user: &User) -> Result<(), StoreError> {
        self.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<User, StoreError> {
        self.users
            .get(&id)
            .map(|u| u.clone())
            .ok_or(StoreError::UserNotFound)
    }

    async fn get_balance(&self, id: Uuid) -> Result<Decimal, StoreError> {
        self.users
            .get(&id)
            .map(|u| u.balance)
            .ok_or(StoreError::UserNotFound)
    }

    async fn update_balance(&self, id: Uuid, new_balance: Decimal) -> Result<(), StoreError> {
        let mut user = self.users.get_mut(&id).ok_or(StoreError::UserNotFound)?;
        user.balance = new_balance;
        user.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl ProductStore for MemoryBackend {
    async fn create(&self, product: &Product) -> Result<(), StoreError> {
        self.product_codes.insert(product.code.clone(), product.id);
        self.products.insert(product.id, product.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Product, StoreError> {
        self.products
            .get(&id)
            .map(|p| p.clone())
            .ok_or(StoreError::ProductNotFound)
    }

    async fn get_by_code(&self, code: &str) -> Result<Product, StoreError> {
        let id = self
            .product_codes
            .get(code)
            .map(|id| *id)
            .ok_or(StoreError::ProductNotFound)?;
        ProductStore::get(self, id).await
    }

    async fn list_active(&self) -> Result<Vec<Product>, StoreError> {
        Ok(self
            .products
            .iter()
            .filter(|p| p.is_active)
            .map(|p| p.clone())
            .collect())
    }
}

#[async_trait]
impl SupplierStore for MemoryBackend {
    async fn create(&self, supplier: &Supplier) -> Result<(), StoreError> {
        self.supplier_codes
            .insert(supplier.code.clone(), supplier.id);
        self.suppliers.insert(supplier.id, supplier.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Supplier, StoreError> {
        self.suppliers
            .get(&id)
            .map(|s| s.clone())
            .ok_or(StoreError::SupplierNotFound)
    }

    async fn get_by_code(&self, code: &str) -> Result<Supplier, StoreError> {
        let id = self
            .supplier_codes
            .get(code)
            .map(|id| *id)
            .ok_or(StoreError::SupplierNotFound)?;
        SupplierStore::get(self, id).await
    }

    async fn list_active(&self) -> Result<Vec<Supplier>, StoreError> {
        let mut out: Vec<Supplier> = self
            .suppliers
            .iter()
            .filter(|s| s.is_active)
            .map(|s| s.clone())
            .collect();
        out.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.code.cmp(&b.code)));
        Ok(out)
    }

    async fn update_metrics(
        &self,
        id: Uuid,
        success: bool,
        response_time_ms: i64,
    ) -> Result<(), StoreError> {
        let mut supplier = self
            .suppliers
            .get_mut(&id)
            .ok_or(StoreError::SupplierNotFound)?;
        supplier.apply_observation(success, response_time_ms, Utc::now());
        Ok(())
    }

    async fn get_balance(&self, id: Uuid) -> Result<Decimal, StoreError> {
        self.suppliers
            .get(&id)
            .map(|s| s.balance)
            .ok_or(StoreError::SupplierNotFound)
    }

    async fn update_balance(&self, id: Uuid, new_balance: Decimal) -> Result<(), StoreError> {
        let mut supplier = self
            .suppliers
            .get_mut(&id)
            .ok_or(StoreError::SupplierNotFound)?;
        supplier.balance = new_balance;
        supplier.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl MappingStore for MemoryBackend {
    async fn create(&self, mapping: &ProductMapping) -> Result<(), StoreError> {
        self.mappings.insert(mapping.id, mapping.clone());
        Ok(())
    }

    async fn active_mappings(&self, product_id: Uuid) -> Result<Vec<ProductMapping>, StoreError> {
        let mut out: Vec<ProductMapping> = self
            .mappings
            .iter()
            .filter(|m| m.product_id == product_id && m.is_active)
            .map(|m| m.clone())
            .collect();
        out.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.supplier_price.cmp(&b.supplier_price))
        });
        Ok(out)
    }

    async fn record_result(&self, mapping_id: Uuid, success: bool) -> Result<(), StoreError> {
        let mut mapping = self
            .mappings
            .get_mut(&mapping_id)
            .ok_or(StoreError::ProductNotFound)?;
        let now = Utc::now();
        if success {
            mapping.success_count += 1;
            mapping.last_success_at = Some(now);
        } else {
            mapping.failure_count += 1;
            mapping.last_failure_at = Some(now);
        }
        mapping.updated_at = now;
        Ok(())
    }
}

#[async_trait]
impl TransactionStore for MemoryBackend {
    async fn create(&self, trx: &Transaction) -> Result<(), StoreError> {
        use dashmap::mapref::entry::Entry;
        match self.trx_codes.entry(trx.trx_code.clone()) {
            Entry::Occupied(_) => return Err(StoreError::DuplicateTrxCode(trx.trx_code.clone())),
            Entry::Vacant(slot) => slot.insert(trx.id),
        };
        self.transactions.insert(trx.id, trx.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Transaction, StoreError> {
        self.transactions
            .get(&id)
            .map(|t| t.clone())
            .ok_or(StoreError::TransactionNotFound)
    }

    async fn get_by_code(&self, trx_code: &str) -> Result<Transaction, StoreError> {
        let id = self
            .trx_codes
            .get(trx_code)
            .map(|id| *id)
            .ok_or(StoreError::TransactionNotFound)?;
        TransactionStore::get(self, id).await
    }

    async fn update(&self, trx: &Transaction) -> Result<(), StoreError> {
        let mut stored = self
            .transactions
            .get_mut(&trx.id)
            .ok_or(StoreError::TransactionNotFound)?;
        if stored.status.is_terminal() && trx.status != stored.status {
            return Err(StoreError::TerminalStatus {
                id: trx.id,
                status: stored.status,
            });
        }
        let attempts = stored.routing_attempts.max(trx.routing_attempts);
        *stored = trx.clone();
        stored.routing_attempts = attempts;
        stored.updated_at = Utc::now();
        Ok(())
    }

    async fn list_by_user(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Transaction>, StoreError> {
        let mut out: Vec<Transaction> = self
            .transactions
            .iter()
            .filter(|t| t.user_id == user_id)
            .map(|t| t.clone())
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn list_by_status(
        &self,
        status: TransactionStatus,
    ) -> Result<Vec<Transaction>, StoreError> {
        Ok(self
            .transactions
            .iter()
            .filter(|t| t.status == status)
            .map(|t| t.clone())
            .collect())
    }

    async fn list_expired(&self, ttl_minutes: i64) -> Result<Vec<Transaction>, StoreError> {
        let now = Utc::now();
        Ok(self
            .transactions
            .iter()
            .filter(|t| t.is_expired(ttl_minutes, now))
            .map(|t| t.clone())
            .collect())
    }

    async fn list_by_date_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Transaction>, StoreError> {
        Ok(self
            .transactions
            .iter()
            .filter(|t| t.created_at >= start && t.created_at <= end)
            .map(|t| t.clone())
            .collect())
    }

    async fn mark_processing(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut trx = self
            .transactions
            .get_mut(&id)
            .ok_or(StoreError::TransactionNotFound)?;
        if trx.status != TransactionStatus::Pending {
            return Ok(false);
        }
        let now = Utc::now();
        trx.status = TransactionStatus::Processing;
        trx.processed_at = Some(now);
        trx.updated_at = now;
        Ok(true)
    }

    async fn update_status(&self, id: Uuid, status: TransactionStatus) -> Result<(), StoreError> {
        let mut trx = self
            .transactions
            .get_mut(&id)
            .ok_or(StoreError::TransactionNotFound)?;
        if trx.status.is_terminal() && status != trx.status {
            return Err(StoreError::TerminalStatus {
                id,
                status: trx.status,
            });
        }
        let now = Utc::now();
        trx.status = status;
        if status == TransactionStatus::Processing {
            trx.processed_at = Some(now);
        }
        trx.updated_at = now;
        Ok(())
    }

    async fn update_status_if(
        &self,
        id: Uuid,
        expected: TransactionStatus,
        status: TransactionStatus,
    ) -> Result<bool, StoreError> {
        let mut trx = self
            .transactions
            .get_mut(&id)
            .ok_or(StoreError::TransactionNotFound)?;
        if trx.status != expected {
            return Ok(false);
        }
        // Terminal records never move, even on a matching CAS.
        if trx.status.is_terminal() && status != trx.status {
            return Ok(false);
        }
        let now = Utc::now();
        trx.status = status;
        if status == TransactionStatus::Processing {
            trx.processed_at = Some(now);
        }
        trx.updated_at = now;
        Ok(true)
    }

    async fn update_completion(
        &self,
        id: Uuid,
        status: TransactionStatus,
        serial_number: Option<&str>,
        message: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut trx = self
            .transactions
            .get_mut(&id)
            .ok_or(StoreError::TransactionNotFound)?;
        if trx.status.is_terminal() && status != trx.status {
            return Err(StoreError::TerminalStatus {
                id,
                status: trx.status,
            });
        }
        let now = Utc::now();
        trx.status = status;
        if let Some(serial) = serial_number {
            trx.serial_number = Some(serial.to_string());
        }
        if let Some(message) = message {
            trx.supplier_message = Some(message.to_string());
        }
        trx.completed_at = Some(now);
        trx.updated_at = now;
        Ok(())
    }

    async fn increment_attempts(&self, id: Uuid) -> Result<(), StoreError> {
        let mut trx = self
            .transactions
            .get_mut(&id)
            .ok_or(StoreError::TransactionNotFound)?;
        trx.routing_attempts += 1;
        trx.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl MutationStore for MemoryBackend {
    async fn list_by_user(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Mutation>, StoreError> {
        let log = self.mutations.read().expect("ledger log poisoned");
        Ok(log
            .iter()
            .rev()
            .filter(|m| m.user_id == user_id)
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn list_by_reference(&self, reference: MutationRef) -> Result<Vec<Mutation>, StoreError> {
        let log = self.mutations.read().expect("ledger log poisoned");
        Ok(log
            .iter()
            .filter(|m| m.reference == Some(reference))
            .cloned()
            .collect())
    }

    async fn current_balance(&self, user_id: Uuid) -> Result<Decimal, StoreError> {
        let log = self.mutations.read().expect("ledger log poisoned");
        Ok(log
            .iter()
            .rev()
            .find(|m| m.user_id == user_id)
            .map(|m| m.balance_after)
            .unwrap_or(Decimal::ZERO))
    }
}

#[async_trait]
impl ApiClientStore for MemoryBackend {
    async fn get_by_client_id(&self, client_id: &str) -> Result<ApiClient, StoreError> {
        self.api_clients
            .get(client_id)
            .map(|c| c.clone())
            .ok_or(StoreError::ApiClientNotFound)
    }

    async fn touch_last_used(&self, client_id: &str) -> Result<(), StoreError> {
        let mut client = self
            .api_clients
            .get_mut(client_id)
            .ok_or(StoreError::ApiClientNotFound)?;
        client.last_used_at = Some(Utc::now());
        Ok(())
    }
}

#[async_trait]
impl Ledger for MemoryBackend {
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

        // Serialize applies: the balance read, the floor check, the log
        // append, and the balance write must not interleave.
        let _gate = self.ledger_gate.lock().await;

        let (balance_before, credit_limit, allow_debt) = {
            let user = self.users.get(&user_id).ok_or(LedgerError::UserNotFound)?;
            (user.balance, user.credit_limit, user.allow_debt)
        };

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

        self.mutations
            .write()
            .expect("ledger log poisoned")
            .push(mutation.clone());

        let mut user = self.users.get_mut(&user_id).ok_or(LedgerError::UserNotFound)?;
        user.balance = balance_after;
        user.updated_at = Utc::now();

        Ok(mutation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::UserLevel;
    use rust_decimal_macros::dec;

    fn test_user(balance: Decimal) -> User {
        User {
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
            max_daily_transaction: dec!(1000000),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_ledger_debit_credit_roundtrip() {
        let backend = MemoryBackend::new();
        let user = test_user(dec!(50000));
        let user_id = user.id;
        UserStore::create(&backend, &user).await.unwrap();

        let out = backend
            .apply(user_id, MutationKind::Credit, dec!(10000), "purchase", None)
            .await
            .unwrap();
        assert_eq!(out.balance_before, dec!(50000));
        assert_eq!(out.balance_after, dec!(40000));

        let back = backend
            .apply(user_id, MutationKind::Debit, dec!(10000), "refund", None)
            .await
            .unwrap();
        assert_eq!(back.balance_after, dec!(50000));
        assert_eq!(
            MutationStore::current_balance(&backend, user_id)
                .await
                .unwrap(),
            dec!(50000)
        );
    }

    #[tokio::test]
    async fn test_ledger_rejects_overdraft() {
        let backend = MemoryBackend::new();
        let user = test_user(dec!(5000));
        let user_id = user.id;
        UserStore::create(&backend, &user).await.unwrap();

        let err = backend
            .apply(user_id, MutationKind::Credit, dec!(10000), "purchase", None)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
        // No partial state: log empty, balance untouched.
        assert!(backend.mutation_log().is_empty());
        assert_eq!(
            UserStore::get_balance(&backend, user_id).await.unwrap(),
            dec!(5000)
        );
    }

    #[tokio::test]
    async fn test_ledger_allows_debt_to_credit_limit() {
        let backend = MemoryBackend::new();
        let mut user = test_user(dec!(5000));
        user.allow_debt = true;
        user.credit_limit = dec!(10000);
        let user_id = user.id;
        UserStore::create(&backend, &user).await.unwrap();

        let out = backend
            .apply(user_id, MutationKind::Credit, dec!(12000), "purchase", None)
            .await
            .unwrap();
        assert_eq!(out.balance_after, dec!(-7000));

        let err = backend
            .apply(user_id, MutationKind::Credit, dec!(4000), "purchase", None)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
    }

    #[tokio::test]
    async fn test_double_entry_invariant() {
        let backend = MemoryBackend::new();
        let user = test_user(dec!(100000));
        let user_id = user.id;
        UserStore::create(&backend, &user).await.unwrap();

        for (kind, amount) in [
            (MutationKind::Credit, dec!(10000)),
            (MutationKind::Credit, dec!(25000)),
            (MutationKind::Debit, dec!(10000)),
            (MutationKind::Credit, dec!(500)),
        ] {
            backend
                .apply(user_id, kind, amount, "movement", None)
                .await
                .unwrap();
        }

        let signed_sum: Decimal = backend
            .mutation_log()
            .iter()
            .map(|m| m.kind.signed(m.amount))
            .sum();
        let balance = UserStore::get_balance(&backend, user_id).await.unwrap();
        assert_eq!(signed_sum, balance - dec!(100000));
    }

    #[tokio::test]
    async fn test_duplicate_trx_code_rejected() {
        let backend = MemoryBackend::new();
        let mut trx = sample_trx();
        TransactionStore::create(&backend, &trx).await.unwrap();
        trx.id = Uuid::new_v4();
        let err = TransactionStore::create(&backend, &trx).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateTrxCode(_)));
    }

    #[tokio::test]
    async fn test_mark_processing_cas() {
        let backend = MemoryBackend::new();
        let trx = sample_trx();
        TransactionStore::create(&backend, &trx).await.unwrap();

        assert!(backend.mark_processing(trx.id).await.unwrap());
        // Second claim loses.
        assert!(!backend.mark_processing(trx.id).await.unwrap());

        let stored = TransactionStore::get(&backend, trx.id).await.unwrap();
        assert_eq!(stored.status, TransactionStatus::Processing);
        assert!(stored.processed_at.is_some());
    }

    #[tokio::test]
    async fn test_terminal_status_is_fixpoint() {
        let backend = MemoryBackend::new();
        let trx = sample_trx();
        TransactionStore::create(&backend, &trx).await.unwrap();
        backend
            .update_completion(trx.id, TransactionStatus::Success, Some("SN1"), None)
            .await
            .unwrap();

        let err = backend
            .update_status(trx.id, TransactionStatus::Pending)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::TerminalStatus { .. }));

        // The CAS path refuses too, even with a matching expected status.
        assert!(!backend
            .update_status_if(trx.id, TransactionStatus::Success, TransactionStatus::Pending)
            .await
            .unwrap());
        let stored = TransactionStore::get(&backend, trx.id).await.unwrap();
        assert_eq!(stored.status, TransactionStatus::Success);
    }

    fn sample_trx() -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            trx_code: format!("TRX-20260314-{:04}", rand::random::<u16>() % 10000),
            user_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            supplier_id: None,
            final_supplier_id: None,
            destination_number: "628123456789".into(),
            product_code: "T10".into(),
            hpp: dec!(9800),
            selling_price: dec!(10000),
            admin_fee: Decimal::ZERO,
            status: TransactionStatus::Pending,
            serial_number: None,
            supplier_message: None,
            supplier_trx_id: None,
            routing_attempts: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            processed_at: None,
            completed_at: None,
            notes: None,
        }
    }
}
