//! Products and supplier mappings

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Product fulfillment type. Stored as text in `products.type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductKind {
    Prepaid,
    Postpaid,
    Voucher,
}

impl ProductKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductKind::Prepaid => "prepaid",
            ProductKind::Postpaid => "postpaid",
            ProductKind::Voucher => "voucher",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "prepaid" => Some(ProductKind::Prepaid),
            "postpaid" => Some(ProductKind::Postpaid),
            "voucher" => Some(ProductKind::Voucher),
            _ => None,
        }
    }
}

/// Mapping stock status as last reported by the supplier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockStatus {
    Available,
    OutOfStock,
    Unknown,
}

impl StockStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockStatus::Available => "available",
            StockStatus::OutOfStock => "out_of_stock",
            StockStatus::Unknown => "unknown",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "available" => Some(StockStatus::Available),
            "out_of_stock" => Some(StockStatus::OutOfStock),
            "unknown" => Some(StockStatus::Unknown),
            _ => None,
        }
    }
}

/// A sellable SKU.
///
/// Invariants: `min_price <= base_price <= selling_price` and
/// `min_transaction_amount <= max_transaction_amount`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub description: Option<String>,

    pub category: String,
    pub provider: String,
    pub kind: ProductKind,

    pub base_price: Decimal,
    pub selling_price: Decimal,
    pub min_price: Decimal,
    pub min_transaction_amount: Decimal,
    pub max_transaction_amount: Decimal,

    pub is_active: bool,
    pub is_unlimited_stock: bool,
    pub stock_quantity: i32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn in_stock(&self) -> bool {
        self.is_unlimited_stock || self.stock_quantity > 0
    }
}

/// The (product, supplier) join row. Unique on `(product_id, supplier_id)`;
/// exists only while both parents do.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductMapping {
    pub id: Uuid,
    pub product_id: Uuid,
    pub supplier_id: Uuid,
    pub supplier_product_code: String,

    pub supplier_price: Decimal,
    pub additional_fee: Decimal,

    pub priority: i32,
    pub is_active: bool,
    pub stock_status: StockStatus,

    pub success_count: i64,
    pub failure_count: i64,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProductMapping {
    /// Cost of fulfilling via this supplier, fees included.
    pub fn effective_price(&self) -> Decimal {
        self.supplier_price + self.additional_fee
    }

    /// Success ratio of recent attempts through this mapping, if any were
    /// recorded.
    pub fn success_ratio(&self) -> Option<f64> {
        let total = self.success_count + self.failure_count;
        if total == 0 {
            return None;
        }
        Some(self.success_count as f64 / total as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn mapping() -> ProductMapping {
        ProductMapping {
            id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            supplier_id: Uuid::new_v4(),
            supplier_product_code: "T10".into(),
            supplier_price: dec!(9800),
            additional_fee: dec!(50),
            priority: 1,
            is_active: true,
            stock_status: StockStatus::Available,
            success_count: 0,
            failure_count: 0,
            last_success_at: None,
            last_failure_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_effective_price_includes_fee() {
        assert_eq!(mapping().effective_price(), dec!(9850));
    }

    #[test]
    fn test_success_ratio_no_data() {
        assert_eq!(mapping().success_ratio(), None);
    }

    #[test]
    fn test_success_ratio() {
        let mut m = mapping();
        m.success_count = 9;
        m.failure_count = 1;
        assert_eq!(m.success_ratio(), Some(0.9));
    }

    #[test]
    fn test_stock_status_roundtrip() {
        for s in [
            StockStatus::Available,
            StockStatus::OutOfStock,
            StockStatus::Unknown,
        ] {
            assert_eq!(StockStatus::from_str(s.as_str()), Some(s));
        }
    }
}
