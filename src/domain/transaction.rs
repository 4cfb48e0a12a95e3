//! Transactions and ledger mutations
//!
//! A `Transaction` is one purchase walking the lifecycle state machine; a
//! `Mutation` is one append-only double-entry ledger row. Mutations are never
//! updated or deleted.

use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status. Stored as text in `transactions.status`.
///
/// `success`, `refund`, and `timeout` are terminal; `failed` can re-enter
/// `processing` through the retry controller (or end the lifecycle when
/// refund issuance itself failed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Processing,
    Success,
    Failed,
    Refund,
    Timeout,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Processing => "processing",
            TransactionStatus::Success => "success",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Refund => "refund",
            TransactionStatus::Timeout => "timeout",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TransactionStatus::Pending),
            "processing" => Some(TransactionStatus::Processing),
            "success" => Some(TransactionStatus::Success),
            "failed" => Some(TransactionStatus::Failed),
            "refund" => Some(TransactionStatus::Refund),
            "timeout" => Some(TransactionStatus::Timeout),
            _ => None,
        }
    }

    /// Fixpoint statuses: once entered, no further transition is allowed.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Success | TransactionStatus::Refund | TransactionStatus::Timeout
        )
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One purchase request and its dispatch outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    /// External human-readable code, `TRX-YYYYMMDD-NNNN`. Unique forever.
    pub trx_code: String,
    pub user_id: Uuid,
    pub product_id: Uuid,
    /// Supplier chosen by routing for the current attempt.
    pub supplier_id: Option<Uuid>,
    /// Supplier that actually fulfilled the purchase.
    pub final_supplier_id: Option<Uuid>,

    pub destination_number: String,
    pub product_code: String,

    /// Cost price snapshot (harga pokok penjualan).
    pub hpp: Decimal,
    pub selling_price: Decimal,
    pub admin_fee: Decimal,

    pub status: TransactionStatus,

    pub serial_number: Option<String>,
    pub supplier_message: Option<String>,
    pub supplier_trx_id: Option<String>,

    /// Monotonic attempt counter, bounded by the retry configuration.
    pub routing_attempts: i32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    pub notes: Option<String>,
}

impl Transaction {
    /// Margin on this purchase: selling price minus cost minus fee.
    pub fn profit(&self) -> Decimal {
        self.selling_price - self.hpp - self.admin_fee
    }

    /// Whether the record sat in a non-terminal state longer than the
    /// wall-clock budget.
    pub fn is_expired(&self, ttl_minutes: i64, now: DateTime<Utc>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        now - self.created_at > chrono::Duration::minutes(ttl_minutes)
    }
}

/// Generate an external transaction code for the given instant.
///
/// Collisions are possible within a day (4-digit random suffix); the store
/// rejects duplicates and the caller regenerates.
pub fn generate_trx_code(now: DateTime<Utc>) -> String {
    let suffix: u16 = rand::thread_rng().gen_range(0..=9999);
    format!("TRX-{}-{:04}", now.format("%Y%m%d"), suffix)
}

/// Ledger entry direction. `debit` is money into the user balance, `credit`
/// is money out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    Debit,
    Credit,
}

impl MutationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::Debit => "debit",
            MutationKind::Credit => "credit",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "debit" => Some(MutationKind::Debit),
            "credit" => Some(MutationKind::Credit),
            _ => None,
        }
    }

    /// Signed contribution of an `amount` under this kind.
    pub fn signed(&self, amount: Decimal) -> Decimal {
        match self {
            MutationKind::Debit => amount,
            MutationKind::Credit => -amount,
        }
    }
}

/// What a mutation refers back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceKind {
    Transaction,
    Deposit,
    Withdrawal,
    Commission,
    Penalty,
}

impl ReferenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceKind::Transaction => "transaction",
            ReferenceKind::Deposit => "deposit",
            ReferenceKind::Withdrawal => "withdrawal",
            ReferenceKind::Commission => "commission",
            ReferenceKind::Penalty => "penalty",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "transaction" => Some(ReferenceKind::Transaction),
            "deposit" => Some(ReferenceKind::Deposit),
            "withdrawal" => Some(ReferenceKind::Withdrawal),
            "commission" => Some(ReferenceKind::Commission),
            "penalty" => Some(ReferenceKind::Penalty),
            _ => None,
        }
    }
}

/// Back-reference attached to a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationRef {
    pub kind: ReferenceKind,
    pub id: Uuid,
}

impl MutationRef {
    pub fn transaction(id: Uuid) -> Self {
        Self {
            kind: ReferenceKind::Transaction,
            id,
        }
    }
}

/// Append-only double-entry ledger row.
///
/// Write invariant: `balance_after = balance_before + amount` for debits and
/// `balance_before - amount` for credits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mutation {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: MutationKind,
    pub amount: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub description: String,
    pub reference: Option<MutationRef>,
    pub created_at: DateTime<Utc>,
}

/// Aggregate counters over a date window.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionStats {
    pub total_transactions: i64,
    pub success_count: i64,
    pub failed_count: i64,
    pub refund_count: i64,
    pub timeout_count: i64,
    pub pending_count: i64,
    pub total_revenue: Decimal,
    pub total_profit: Decimal,
    pub average_amount: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn test_trx_code_format() {
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap();
        let code = generate_trx_code(now);
        assert!(code.starts_with("TRX-20260314-"), "got {code}");
        assert_eq!(code.len(), "TRX-20260314-0000".len());
        assert!(code[13..].chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(TransactionStatus::Success.is_terminal());
        assert!(TransactionStatus::Refund.is_terminal());
        assert!(TransactionStatus::Timeout.is_terminal());
        assert!(!TransactionStatus::Pending.is_terminal());
        assert!(!TransactionStatus::Processing.is_terminal());
        assert!(!TransactionStatus::Failed.is_terminal());
    }

    #[test]
    fn test_status_roundtrip() {
        for s in [
            TransactionStatus::Pending,
            TransactionStatus::Processing,
            TransactionStatus::Success,
            TransactionStatus::Failed,
            TransactionStatus::Refund,
            TransactionStatus::Timeout,
        ] {
            assert_eq!(TransactionStatus::from_str(s.as_str()), Some(s));
        }
    }

    #[test]
    fn test_profit() {
        let trx = Transaction {
            id: Uuid::new_v4(),
            trx_code: "TRX-20260314-0001".into(),
            user_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            supplier_id: None,
            final_supplier_id: None,
            destination_number: "628123456789".into(),
            product_code: "T10".into(),
            hpp: dec!(9800),
            selling_price: dec!(10000),
            admin_fee: dec!(50),
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
        };
        assert_eq!(trx.profit(), dec!(150));
    }

    #[test]
    fn test_mutation_kind_signed() {
        assert_eq!(MutationKind::Debit.signed(dec!(100)), dec!(100));
        assert_eq!(MutationKind::Credit.signed(dec!(100)), dec!(-100));
    }

    #[test]
    fn test_expiry_only_for_non_terminal() {
        let created = Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).unwrap();
        let later = created + chrono::Duration::minutes(31);
        let mut trx = Transaction {
            id: Uuid::new_v4(),
            trx_code: "TRX-20260314-0002".into(),
            user_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            supplier_id: None,
            final_supplier_id: None,
            destination_number: "628123456789".into(),
            product_code: "T10".into(),
            hpp: dec!(9800),
            selling_price: dec!(10000),
            admin_fee: Decimal::ZERO,
            status: TransactionStatus::Processing,
            serial_number: None,
            supplier_message: None,
            supplier_trx_id: None,
            routing_attempts: 1,
            created_at: created,
            updated_at: created,
            processed_at: None,
            completed_at: None,
            notes: None,
        };
        assert!(trx.is_expired(30, later));
        trx.status = TransactionStatus::Success;
        assert!(!trx.is_expired(30, later));
    }
}
